//! Error handling for communication operations.
//!
//! Errors that are detectable locally (an invalid tag, a destination rank
//! outside the group, a receive buffer that is too small for the incoming
//! message) are reported through [`Result`] before the transport is ever
//! contacted. Failures surfaced by the transport itself map to
//! [`Error::Unknown`]. Misuse that spans several processes, such as
//! mismatched collective arguments or inconsistent split colors, cannot be
//! detected locally and is documented as undefined behavior instead.

use thiserror::Error;

use crate::topology::Rank;
use crate::{Count, Tag};

/// Result type for communication operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The kinds of failure a communication operation can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The incoming message holds more elements than the receiver can store.
    #[error("incoming count {incoming} exceeds receive capacity {capacity}")]
    Count {
        /// Element count declared by the sender.
        incoming: Count,
        /// Element capacity of the receiving buffer.
        capacity: Count,
    },

    /// A rank that does not exist in the addressed group.
    #[error("rank {0} does not exist in this communicator")]
    Rank(Rank),

    /// A tag value outside the valid (non-negative) range.
    #[error("invalid tag value {0}")]
    Tag(Tag),

    /// A message payload that is malformed or shorter than its declared
    /// element count.
    #[error("malformed or truncated message buffer")]
    Buffer,

    /// A failure reported by the transport backend that fits no other kind.
    #[error("transport failure: {0}")]
    Unknown(String),
}
