//! Message passing between groups of processes
//!
//! This library provides ordered process groups with typed point to point
//! and collective communication, in the style of the Message Passing
//! Interface, over pluggable in-process transports.
//!
//! # Usage
//!
//! A program obtains a [`Communicator`](topology::Communicator) from a
//! [`Universe`](environment::Universe) and addresses peers through
//! process objects:
//!
//! ```no_run
//! use parcomm::traits::*;
//!
//! let universe = parcomm::initialize().unwrap();
//! let world = universe.world();
//! let rank = world.rank();
//! let size = world.size();
//!
//! let next = world.process_at_rank((rank + 1) % size);
//! next.send(&rank).unwrap();
//! let (value, status) = world.any_process().receive::<i32>().unwrap();
//! println!("rank {} got {} from {}", rank, value, status.source_rank());
//! ```
//!
//! Multi-rank runs within one process use
//! [`multi_process`](environment::multi_process), which yields one
//! universe per rank to be moved onto worker threads.
//!
//! # Coverage
//!
//! - Point to point: blocking and non-blocking send and receive of single
//!   values, buffers and vectors, with tags and wildcard matching, in
//!   [`point_to_point`].
//! - Collectives: barrier, broadcast and rooted reduction with built-in
//!   or user operations, in [`collective`].
//! - Group management: splitting by color and key and duplication, in
//!   [`topology`].
//! - Wire formats: the compile-time mapping from element types to their
//!   wire representation, in [`datatype`]; user types join via
//!   [`packed_equivalence!`].
//! - Backends: the transport contract and the stub and mesh backends, in
//!   [`transport`].

pub mod collective;
pub mod datatype;
pub mod environment;
pub mod error;
pub mod logger;
pub mod point_to_point;
pub mod request;
pub mod topology;
pub mod transport;

/// Number of elements in a message.
pub type Count = i32;

/// A message tag. User tags are non-negative.
pub type Tag = i32;

pub use crate::environment::{
    initialize, initialize_with_threading, multi_process, Threading, Universe,
};
pub use crate::error::{Error, Result};

/// Re-exports all traits.
pub mod traits {
    pub use crate::collective::traits::*;
    pub use crate::datatype::traits::*;
    pub use crate::point_to_point::traits::*;
    pub use crate::topology::traits::*;
}
