//! Pluggable message transports
//!
//! A communicator delegates all actual data movement to a [`Transport`].
//! The trait is the backend contract: it carries the group membership
//! (rank and size), moves tagged frames between ranks, realizes the
//! collective rendezvous primitives, and derives new transports for group
//! splitting and duplication. Two backends are provided:
//!
//! * [`StubTransport`](stub::StubTransport) backs a single-process group of
//!   size one, for running group-structured code without any peers.
//! * [`MeshTransport`](mesh::MeshTransport) wires a set of thread-hosted
//!   ranks into a fully connected mesh within one process.
//!
//! A [`Frame`] is the unit of transfer: a payload annotated with the
//! communication context it belongs to, the sender's rank, a tag, and the
//! element type and count of the payload. Frames from different contexts
//! never match each other, which is what keeps traffic on a duplicated or
//! split communicator insulated from its parent.

pub mod mesh;
pub mod stub;

use crate::datatype::WireTag;
use crate::error::Result;
use crate::topology::Rank;
use crate::{Count, Tag};

/// Identifies one insulated communication context.
///
/// Frames only match receives posted in the same context. The world
/// communicator owns context zero; splitting and duplication allocate
/// fresh contexts.
pub(crate) type Context = u32;

/// The context of the initial world communicator.
pub(crate) const WORLD_CONTEXT: Context = 0;

/// Tags below zero are reserved for collective plumbing and are rejected
/// in user-facing calls.
pub(crate) const TAG_BARRIER: Tag = -1;
pub(crate) const TAG_BCAST: Tag = -2;
pub(crate) const TAG_REDUCE: Tag = -3;
pub(crate) const TAG_GROUP: Tag = -4;

/// One message in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The communication context the frame belongs to. Filled in by the
    /// transport on send.
    pub context: Context,
    /// Rank of the sender within the context. Filled in by the transport
    /// on send.
    pub source: Rank,
    /// The message tag.
    pub tag: Tag,
    /// Element type of the payload.
    pub wire_tag: WireTag,
    /// Number of elements in the payload.
    pub count: Count,
    /// The encoded elements.
    pub payload: Vec<u8>,
}

impl Frame {
    /// A data-bearing frame. Context and source are filled in on send.
    pub fn message(tag: Tag, wire_tag: WireTag, count: Count, payload: Vec<u8>) -> Frame {
        Frame {
            context: 0,
            source: 0,
            tag,
            wire_tag,
            count,
            payload,
        }
    }

    /// A payload-free frame used for rendezvous signalling.
    pub fn control(tag: Tag) -> Frame {
        Frame::message(tag, WireTag::UInt8, 0, Vec::new())
    }

    /// Whether this frame satisfies a receive posted for the given context,
    /// source and tag. `None` acts as a wildcard.
    pub fn matches(&self, context: Context, source: Option<Rank>, tag: Option<Tag>) -> bool {
        self.context == context
            && source.map_or(true, |s| self.source == s)
            && tag.map_or(true, |t| self.tag == t)
    }
}

/// The backend contract a communicator is built over.
///
/// A transport instance represents this process's membership in one
/// process group: it knows its own rank, the group size, and how to reach
/// every peer. Methods taking `Option<Rank>` or `Option<Tag>` treat `None`
/// as a wildcard.
///
/// The collective methods (`barrier`, `broadcast`, `reduce`, `split`,
/// `duplicate`) must be called by every member of the group; the transport
/// realizes the rendezvous using reserved negative tags, which is why user
/// tags are restricted to non-negative values.
pub trait Transport: Send {
    /// The rank of this process in the group.
    fn rank(&self) -> Rank;

    /// The number of processes in the group.
    fn size(&self) -> Rank;

    /// Deliver a frame to `dest`. Sends are eager: the call returns once
    /// the frame is handed off, without waiting for a matching receive.
    fn send_frame(&self, dest: Rank, frame: Frame) -> Result<()>;

    /// Block until a frame matching `source` and `tag` arrives and return
    /// it.
    fn recv_frame(&self, source: Option<Rank>, tag: Option<Tag>) -> Result<Frame>;

    /// Return a matching frame if one has already arrived.
    fn try_recv_frame(&self, source: Option<Rank>, tag: Option<Tag>) -> Result<Option<Frame>>;

    /// Block until every member of the group has entered the barrier.
    fn barrier(&self) -> Result<()>;

    /// Distribute the root's frame to every member. The root passes
    /// `Some(frame)`, everyone else `None`; all members receive the root's
    /// frame back.
    fn broadcast(&self, root: Rank, frame: Option<Frame>) -> Result<Frame>;

    /// Combine one frame per member into a single frame at `root`.
    ///
    /// Every member contributes `frame`; the root folds the contributions
    /// with `combine` and gets `Some(result)`, everyone else gets `None`.
    /// When `commutative` is false the fold visits contributions in
    /// ascending rank order, so the result is deterministic for
    /// non-commutative combiners.
    fn reduce(
        &self,
        root: Rank,
        frame: Frame,
        commutative: bool,
        combine: &mut dyn FnMut(Frame, Frame) -> Result<Frame>,
    ) -> Result<Option<Frame>>;

    /// Partition the group by color and derive a transport for this
    /// process's new subgroup, ordered by key with the current rank
    /// breaking ties. `None` for `color` opts out; such callers get
    /// `Ok(None)` back.
    fn split(&self, color: Option<i32>, key: i32) -> Result<Option<Box<dyn Transport>>>;

    /// Derive a transport over the same group in a fresh context.
    fn duplicate(&self) -> Result<Box<dyn Transport>>;
}

/// Remove and return the first frame in `queue` matching the given
/// context, source and tag, if any.
pub(crate) fn take_matching(
    queue: &mut std::collections::VecDeque<Frame>,
    context: Context,
    source: Option<Rank>,
    tag: Option<Tag>,
) -> Option<Frame> {
    let position = queue
        .iter()
        .position(|frame| frame.matches(context, source, tag))?;
    queue.remove(position)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcards_match_anything() {
        let mut frame = Frame::message(7, WireTag::Int32, 1, vec![1, 0, 0, 0]);
        frame.context = 3;
        frame.source = 2;
        assert!(frame.matches(3, None, None));
        assert!(frame.matches(3, Some(2), Some(7)));
        assert!(!frame.matches(3, Some(1), None));
        assert!(!frame.matches(3, None, Some(8)));
        assert!(!frame.matches(4, None, None));
    }

    #[test]
    fn take_matching_preserves_arrival_order() {
        let mut queue = std::collections::VecDeque::new();
        for tag in [5, 6, 5] {
            let mut frame = Frame::control(tag);
            frame.context = 0;
            frame.source = 0;
            queue.push_back(frame);
        }
        let first = take_matching(&mut queue, 0, None, Some(5)).unwrap();
        assert_eq!(first.tag, 5);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].tag, 6);
    }
}
