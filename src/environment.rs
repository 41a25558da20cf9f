//! The communication environment
//!
//! Group communication starts from a [`Universe`], the handle to an
//! initialized communication environment for one rank. [`initialize`]
//! sets up a single-process universe over the stub backend, at most once
//! per process; [`multi_process`] builds one universe per rank over the
//! in-process mesh backend, to be distributed across worker threads.
//!
//! Each universe owns the [`Logger`](crate::logger::Logger) for its rank
//! and reports the [`Threading`] level the backend grants.

use once_cell::sync::OnceCell;

use crate::logger::Logger;
use crate::topology::Communicator;
use crate::transport::mesh::{self, MeshTransport};
use crate::transport::stub::StubTransport;

static INITIALIZED: OnceCell<()> = OnceCell::new();

/// The level of threading support an environment provides.
///
/// Levels are ordered: a higher level permits everything a lower one
/// does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Threading {
    /// Only one thread exists in the process.
    Single,
    /// The process is multi-threaded but only the initializing thread
    /// makes communication calls.
    Funneled,
    /// Any thread may make communication calls, one at a time.
    Serialized,
    /// Any thread may make communication calls at any time.
    Multiple,
}

/// The handle to one rank's communication environment.
pub struct Universe {
    threading: Threading,
    logger: Logger,
    backend: UniverseBackend,
}

enum UniverseBackend {
    Stub(StubTransport),
    Mesh(MeshTransport),
}

impl Universe {
    /// The communicator containing every process in this environment.
    ///
    /// Every call hands out a handle onto the same communication context,
    /// so world communicators from one universe interoperate.
    pub fn world(&self) -> Communicator {
        match &self.backend {
            UniverseBackend::Stub(prototype) => {
                Communicator::from_transport(Box::new(prototype.clone_handle()))
            }
            UniverseBackend::Mesh(prototype) => {
                Communicator::from_transport(Box::new(prototype.clone_handle()))
            }
        }
    }

    /// The level of threading support this environment provides.
    pub fn threading_support(&self) -> Threading {
        self.threading
    }

    /// The diagnostic logger for this rank.
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Take ownership of this rank's logger, leaving the universe with a
    /// fresh listener-free one.
    ///
    /// Installation as the `log` facade backend consumes the logger, so
    /// this is the way to hand the universe's logger to
    /// [`Logger::install`](crate::logger::Logger::install).
    pub fn take_logger(&mut self) -> Logger {
        let rank = self.logger.rank();
        std::mem::replace(&mut self.logger, Logger::new(rank))
    }
}

impl Drop for Universe {
    fn drop(&mut self) {
        self.logger.flush();
        log::trace!("universe for rank {} shut down", self.logger.rank());
    }
}

/// Initialize a single-process environment over the stub backend.
///
/// Returns `None` if the environment was initialized before; an
/// environment is initialized at most once per process.
pub fn initialize() -> Option<Universe> {
    initialize_with_threading(Threading::Single).map(|(universe, _)| universe)
}

/// Initialize a single-process environment, asking for a threading level.
///
/// Returns the universe together with the granted level. The stub backend
/// carries no shared state across threads, so any requested level is
/// granted as asked.
pub fn initialize_with_threading(threading: Threading) -> Option<(Universe, Threading)> {
    INITIALIZED.set(()).ok()?;
    let universe = Universe {
        threading,
        logger: Logger::new(0),
        backend: UniverseBackend::Stub(StubTransport::new()),
    };
    Some((universe, threading))
}

/// Build an in-process environment of `size` ranks over the mesh backend.
///
/// Returns one universe per rank, in rank order, each meant to be moved
/// onto its own thread. The mesh supports concurrent calls from all its
/// ranks, so every universe reports [`Threading::Multiple`].
pub fn multi_process(size: usize) -> Vec<Universe> {
    assert!(size > 0, "a universe needs at least one rank");
    mesh::endpoints(size)
        .into_iter()
        .enumerate()
        .map(|(rank, prototype)| Universe {
            threading: Threading::Multiple,
            logger: Logger::new(rank as i32),
            backend: UniverseBackend::Mesh(prototype),
        })
        .collect()
}
