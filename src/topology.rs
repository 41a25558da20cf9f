//! Communicators and process groups
//!
//! A [`Communicator`] represents this process's membership in an ordered
//! group of communicating processes. Members are identified by rank, a
//! contiguous integer from zero up to the group size. All communication
//! happens through endpoint objects borrowed from a communicator:
//! [`Process`] names a specific rank and acts as a send destination,
//! receive source or collective root; [`AnyProcess`] is the wildcard
//! receive source.
//!
//! New communicators derive from existing ones. Splitting partitions the
//! group by [`Color`], ordering each subgroup by key, and duplication
//! yields a group with the same membership but an insulated communication
//! context. Both are collective calls. Cloning a communicator performs a
//! duplication, so a clone is never entangled with the traffic of its
//! original.

use crate::error::Result;
use crate::transport::Transport;

/// Topology traits
pub mod traits {
    pub use super::AsCommunicator;
}

/// Identifies a process within a group.
pub type Rank = i32;

/// Something that has a communicator associated with it.
pub trait AsCommunicator {
    /// The associated communicator.
    fn as_communicator(&self) -> &Communicator;
}

/// A group of processes this process belongs to.
pub struct Communicator {
    transport: Box<dyn Transport>,
    rank: Rank,
    size: Rank,
}

impl Communicator {
    /// Adopt an externally constructed transport as a communicator.
    ///
    /// This is how alternative backends plug in: anything implementing
    /// [`Transport`] becomes a fully functional communicator.
    pub fn from_transport(transport: Box<dyn Transport>) -> Communicator {
        let rank = transport.rank();
        let size = transport.size();
        Communicator {
            transport,
            rank,
            size,
        }
    }

    /// The rank of this process within the group.
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// The number of processes in the group.
    pub fn size(&self) -> Rank {
        self.size
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        &*self.transport
    }

    /// The process at the given rank.
    pub fn process_at_rank(&self, r: Rank) -> Process<'_> {
        assert!(0 <= r && r < self.size(), "rank {} is out of bounds", r);
        Process { comm: self, rank: r }
    }

    /// This process.
    pub fn this_process(&self) -> Process<'_> {
        Process {
            comm: self,
            rank: self.rank(),
        }
    }

    /// The wildcard receive source accepting messages from any rank.
    pub fn any_process(&self) -> AnyProcess<'_> {
        AnyProcess(self)
    }

    /// Derive a communicator over the same group with an insulated
    /// communication context. Collective over the whole group.
    pub fn duplicate(&self) -> Result<Communicator> {
        let transport = self.transport.duplicate()?;
        Ok(Communicator::from_transport(transport))
    }

    /// Partition the group by color. Collective over the whole group.
    ///
    /// Members passing the same defined color form a new group; within it
    /// ranks follow the current rank order. Members passing
    /// [`Color::undefined`] opt out and get `None`.
    pub fn split_by_color(&self, color: Color) -> Result<Option<Communicator>> {
        self.split_by_color_with_key(color, 0)
    }

    /// Partition the group by color, ordering each new group by key with
    /// the current rank breaking ties. Collective over the whole group.
    pub fn split_by_color_with_key(
        &self,
        color: Color,
        key: Key,
    ) -> Result<Option<Communicator>> {
        let transport = self.transport.split(color.as_option(), key)?;
        Ok(transport.map(Communicator::from_transport))
    }
}

impl AsCommunicator for Communicator {
    fn as_communicator(&self) -> &Communicator {
        self
    }
}

/// Cloning a communicator duplicates it, a collective call over the whole
/// group. Every member must clone at the same time.
impl Clone for Communicator {
    fn clone(&self) -> Communicator {
        self.duplicate()
            .expect("collective duplication during clone failed")
    }
}

impl std::fmt::Debug for Communicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Communicator")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

/// A color used to partition a group when splitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color(i32);

impl Color {
    /// The color that opts a member out of all new groups.
    pub fn undefined() -> Color {
        Color(-1)
    }

    /// A defined color of the given value.
    ///
    /// Valid values are non-negative.
    pub fn with_value(value: i32) -> Color {
        assert!(value >= 0, "color value {} is negative", value);
        Color(value)
    }

    pub(crate) fn as_option(self) -> Option<i32> {
        if self.0 < 0 {
            None
        } else {
            Some(self.0)
        }
    }
}

/// A key used to order the members of a new group when splitting.
pub type Key = i32;

/// A specific member of a communicator's group.
#[derive(Clone, Copy)]
pub struct Process<'a> {
    pub(crate) comm: &'a Communicator,
    pub(crate) rank: Rank,
}

impl<'a> Process<'a> {
    /// The rank of this process.
    pub fn rank(&self) -> Rank {
        self.rank
    }
}

impl<'a> AsCommunicator for Process<'a> {
    fn as_communicator(&self) -> &Communicator {
        self.comm
    }
}

/// Any member of a communicator's group, as a wildcard receive source.
#[derive(Clone, Copy)]
pub struct AnyProcess<'a>(pub(crate) &'a Communicator);

impl<'a> AsCommunicator for AnyProcess<'a> {
    fn as_communicator(&self) -> &Communicator {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_color_is_no_value() {
        assert_eq!(Color::undefined().as_option(), None);
        assert_eq!(Color::with_value(3).as_option(), Some(3));
    }

    #[test]
    #[should_panic]
    fn negative_color_value_panics() {
        let _ = Color::with_value(-2);
    }

    #[test]
    #[should_panic]
    fn out_of_bounds_process_panics() {
        let comm =
            Communicator::from_transport(Box::new(crate::transport::stub::StubTransport::new()));
        let _ = comm.process_at_rank(1);
    }
}
