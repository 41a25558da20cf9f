//! Rank-aware diagnostic logging
//!
//! A [`Logger`] fans report lines out to a set of [`Listener`]s, each of
//! which subscribes to a bitmask of [`Categories`]. Loggers are plain
//! values handed to the code that needs them, typically owned by the
//! [`Universe`](crate::environment::Universe) and carried per rank, so
//! two ranks in one process never share mutable logging state. Lines are
//! prefixed with the owning rank, which keeps interleaved multi-rank
//! output attributable.
//!
//! A logger can also be installed as the backend of the `log` facade with
//! [`Logger::install`], mapping the facade's levels onto categories, so
//! crates that log through `log` feed the same listeners.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Stderr, Stdout, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::topology::Rank;

/// A bitmask of report categories a listener subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Categories(u16);

impl Categories {
    pub const NOTHING: Categories = Categories(0);
    pub const ASSERTION: Categories = Categories(1);
    pub const ERROR: Categories = Categories(2);
    pub const WARNING: Categories = Categories(4);
    pub const INFORMATION: Categories = Categories(8);
    pub const TRACE: Categories = Categories(16);
    pub const ALL: Categories = Categories(31);

    /// Whether the mask includes the given category.
    pub fn contains(self, category: Category) -> bool {
        self.0 & category.mask().0 != 0
    }
}

impl std::ops::BitOr for Categories {
    type Output = Categories;

    fn bitor(self, rhs: Categories) -> Categories {
        Categories(self.0 | rhs.0)
    }
}

/// The category of one report line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Assertion,
    Error,
    Warning,
    Information,
    Trace,
}

impl Category {
    fn mask(self) -> Categories {
        match self {
            Category::Assertion => Categories::ASSERTION,
            Category::Error => Categories::ERROR,
            Category::Warning => Categories::WARNING,
            Category::Information => Categories::INFORMATION,
            Category::Trace => Categories::TRACE,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Category::Assertion => "assertion",
            Category::Error => "error",
            Category::Warning => "warning",
            Category::Information => "information",
            Category::Trace => "trace",
        }
    }
}

/// A sink for report lines.
pub trait Listener: Send {
    /// The categories this listener wants to see.
    fn categories(&self) -> Categories;

    /// Consume one formatted report line.
    fn report(&mut self, line: &str);

    /// Flush any buffered output.
    fn flush(&mut self) {}
}

/// A fan-out logger owned by one rank.
pub struct Logger {
    rank: Rank,
    listeners: Mutex<Vec<(usize, Box<dyn Listener>)>>,
    next_token: AtomicUsize,
}

impl Logger {
    /// A logger with no listeners for the given rank.
    pub fn new(rank: Rank) -> Logger {
        Logger {
            rank,
            listeners: Mutex::new(Vec::new()),
            next_token: AtomicUsize::new(0),
        }
    }

    /// The rank this logger reports for.
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Add a listener; the returned token identifies it for
    /// [`unsubscribe`](Logger::unsubscribe).
    pub fn subscribe(&self, listener: Box<dyn Listener>) -> usize {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.listeners().push((token, listener));
        token
    }

    /// Remove a previously subscribed listener. Returns whether the token
    /// named one.
    pub fn unsubscribe(&self, token: usize) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|(t, _)| *t != token);
        listeners.len() != before
    }

    /// Report a line to every listener subscribed to its category.
    pub fn log(&self, category: Category, message: fmt::Arguments<'_>) {
        let line = format!("{} : [{}] {}", self.rank, category.label(), message);
        for (_, listener) in self.listeners().iter_mut() {
            if listener.categories().contains(category) {
                listener.report(&line);
            }
        }
    }

    /// Flush every listener.
    pub fn flush(&self) {
        for (_, listener) in self.listeners().iter_mut() {
            listener.flush();
        }
    }

    /// Install this logger as the backend of the `log` facade.
    ///
    /// The facade is process-global and can only be set once; a second
    /// installation reports the facade's error. Error and warn records map
    /// onto their category namesakes, info onto information, debug and
    /// trace onto trace.
    pub fn install(self) -> Result<(), log::SetLoggerError> {
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(log::LevelFilter::Trace);
        Ok(())
    }

    fn listeners(&self) -> std::sync::MutexGuard<'_, Vec<(usize, Box<dyn Listener>)>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl log::Log for Logger {
    fn enabled(&self, _: &log::Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &log::Record<'_>) {
        let category = match record.level() {
            log::Level::Error => Category::Error,
            log::Level::Warn => Category::Warning,
            log::Level::Info => Category::Information,
            log::Level::Debug | log::Level::Trace => Category::Trace,
        };
        Logger::log(self, category, *record.args());
    }

    fn flush(&self) {
        Logger::flush(self);
    }
}

/// A listener appending to a per-rank output file.
pub struct FileListener {
    categories: Categories,
    writer: BufWriter<File>,
}

impl FileListener {
    /// Create `{prefix}{rank:05}.txt` and listen for the given
    /// categories.
    pub fn create(
        prefix: impl AsRef<Path>,
        rank: Rank,
        categories: Categories,
    ) -> std::io::Result<FileListener> {
        let mut path = prefix.as_ref().as_os_str().to_os_string();
        path.push(format!("{:05}.txt", rank));
        let file = File::create(path)?;
        Ok(FileListener {
            categories,
            writer: BufWriter::new(file),
        })
    }
}

impl Listener for FileListener {
    fn categories(&self) -> Categories {
        self.categories
    }

    fn report(&mut self, line: &str) {
        // Logging failures must not take down the computation.
        let _ = writeln!(self.writer, "{}", line);
    }

    fn flush(&mut self) {
        let _ = self.writer.flush();
    }
}

/// A listener writing to standard output.
pub struct StdoutListener {
    categories: Categories,
    out: Stdout,
}

impl StdoutListener {
    pub fn new(categories: Categories) -> StdoutListener {
        StdoutListener {
            categories,
            out: std::io::stdout(),
        }
    }
}

impl Listener for StdoutListener {
    fn categories(&self) -> Categories {
        self.categories
    }

    fn report(&mut self, line: &str) {
        let _ = writeln!(self.out, "{}", line);
    }

    fn flush(&mut self) {
        let _ = self.out.flush();
    }
}

/// A listener writing to standard error.
pub struct StderrListener {
    categories: Categories,
    err: Stderr,
}

impl StderrListener {
    pub fn new(categories: Categories) -> StderrListener {
        StderrListener {
            categories,
            err: std::io::stderr(),
        }
    }
}

impl Listener for StderrListener {
    fn categories(&self) -> Categories {
        self.categories
    }

    fn report(&mut self, line: &str) {
        let _ = writeln!(self.err, "{}", line);
    }
}
