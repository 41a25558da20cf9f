//! The multi-process mesh backend
//!
//! [`MeshTransport`] wires a fixed set of ranks, each hosted on its own
//! thread within this process, into a fully connected mesh of unbounded
//! channels. Every endpoint holds one sender per peer and a single shared
//! inbox; because each peer delivers through its own channel into the
//! inbox, frames between any (source, destination, tag) pair arrive in the
//! order they were sent.
//!
//! A transport handle pairs an endpoint with a communication context and a
//! membership table mapping group ranks to mesh ranks. Splitting and
//! duplication derive new handles over the same endpoint with a fresh
//! context; frames addressed to one context never match receives posted in
//! another, so a derived group's traffic cannot collide with its parent's.
//! Context identifiers are allocated by group rank zero from a counter
//! shared by the whole mesh and distributed over the parent context.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::topology::Rank;
use crate::transport::{
    Context, Frame, Transport, TAG_BARRIER, TAG_GROUP, WORLD_CONTEXT,
};
use crate::Tag;

/// How long a blocked receive waits on the inbox before rechecking the
/// stash for frames another receive set aside.
const POLL_INTERVAL: Duration = Duration::from_micros(100);

/// The per-mesh-rank communication state shared by every transport handle
/// derived for that rank.
struct Endpoint {
    mesh_rank: usize,
    /// One sender per mesh rank, self included.
    peers: Vec<Sender<Frame>>,
    /// All peers deliver into this one receiver.
    inbox: Mutex<Receiver<Frame>>,
    /// Frames that arrived while a receive for a different match was
    /// posted.
    stash: Mutex<SmallVec<[Frame; 8]>>,
    /// Mesh-wide context allocator. Only group rank zero draws from it.
    next_context: Arc<AtomicU32>,
}

/// A transport handle over one context of an in-process rank mesh.
pub struct MeshTransport {
    endpoint: Arc<Endpoint>,
    context: Context,
    /// Mesh rank of each member, indexed by group rank.
    members: Vec<usize>,
    rank: Rank,
}

/// Build a fully wired mesh of `size` ranks and return one world-context
/// transport per rank.
pub(crate) fn endpoints(size: usize) -> Vec<MeshTransport> {
    let mut senders = Vec::with_capacity(size);
    let mut receivers = Vec::with_capacity(size);
    for _ in 0..size {
        let (tx, rx) = unbounded();
        senders.push(tx);
        receivers.push(rx);
    }
    let next_context = Arc::new(AtomicU32::new(WORLD_CONTEXT + 1));
    let members: Vec<usize> = (0..size).collect();
    receivers
        .into_iter()
        .enumerate()
        .map(|(mesh_rank, inbox)| MeshTransport {
            endpoint: Arc::new(Endpoint {
                mesh_rank,
                peers: senders.clone(),
                inbox: Mutex::new(inbox),
                stash: Mutex::new(SmallVec::new()),
                next_context: Arc::clone(&next_context),
            }),
            context: WORLD_CONTEXT,
            members: members.clone(),
            rank: mesh_rank as Rank,
        })
        .collect()
}

impl MeshTransport {
    /// Another handle onto the same context and membership.
    pub(crate) fn clone_handle(&self) -> MeshTransport {
        MeshTransport {
            endpoint: Arc::clone(&self.endpoint),
            context: self.context,
            members: self.members.clone(),
            rank: self.rank,
        }
    }

    fn derived(&self, context: Context, members: Vec<usize>, rank: Rank) -> MeshTransport {
        MeshTransport {
            endpoint: Arc::clone(&self.endpoint),
            context,
            members,
            rank,
        }
    }

    fn check_rank(&self, rank: Rank) -> Result<usize> {
        self.members
            .get(rank as usize)
            .copied()
            .filter(|_| rank >= 0)
            .ok_or(Error::Rank(rank))
    }

    fn stash(&self) -> std::sync::MutexGuard<'_, SmallVec<[Frame; 8]>> {
        self.endpoint.stash.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_stashed(&self, source: Option<Rank>, tag: Option<Tag>) -> Option<Frame> {
        let mut stash = self.stash();
        let position = stash
            .iter()
            .position(|frame| frame.matches(self.context, source, tag))?;
        Some(stash.remove(position))
    }

    fn deliver(&self, frame: Frame, source: Option<Rank>, tag: Option<Tag>) -> Option<Frame> {
        if frame.matches(self.context, source, tag) {
            Some(frame)
        } else {
            self.stash().push(frame);
            None
        }
    }

    /// Send a control value to a group member, encoded opaquely.
    fn send_control<T: serde::Serialize>(&self, dest: Rank, tag: Tag, value: &T) -> Result<()> {
        let payload = bincode::serialize(value).map_err(|e| Error::Unknown(e.to_string()))?;
        self.send_frame(dest, Frame::message(tag, crate::datatype::WireTag::Packed, 1, payload))
    }

    fn recv_control<T: serde::de::DeserializeOwned>(&self, source: Rank, tag: Tag) -> Result<T> {
        let frame = self.recv_frame(Some(source), Some(tag))?;
        bincode::deserialize(&frame.payload).map_err(|e| Error::Unknown(e.to_string()))
    }

    /// Gather one split ticket per member at group rank zero, form the
    /// subgroups, and hand every member its assignment.
    fn split_at_coordinator(
        &self,
        own_ticket: (Option<i32>, i32),
    ) -> Result<Option<(Rank, Context, Vec<usize>)>> {
        use std::collections::BTreeMap;

        let size = self.size();
        let mut tickets: Vec<(Rank, Option<i32>, i32)> = Vec::with_capacity(size as usize);
        tickets.push((0, own_ticket.0, own_ticket.1));
        for rank in 1..size {
            let (color, key): (Option<i32>, i32) = self.recv_control(rank, TAG_GROUP)?;
            tickets.push((rank, color, key));
        }

        let mut by_color: BTreeMap<i32, Vec<(Rank, i32)>> = BTreeMap::new();
        for &(rank, color, key) in &tickets {
            if let Some(color) = color {
                by_color.entry(color).or_default().push((rank, key));
            }
        }

        let mut assignments: Vec<Option<(Rank, Context, Vec<usize>)>> =
            vec![None; size as usize];
        for group in by_color.values_mut() {
            // Key orders the subgroup, with the parent rank as tie break.
            group.sort_by_key(|&(rank, key)| (key, rank));
            let context = self.endpoint.next_context.fetch_add(1, Ordering::Relaxed);
            let mesh_members: Vec<usize> = group
                .iter()
                .map(|&(rank, _)| self.members[rank as usize])
                .collect();
            for (new_rank, &(rank, _)) in group.iter().enumerate() {
                assignments[rank as usize] =
                    Some((new_rank as Rank, context, mesh_members.clone()));
            }
        }

        for rank in 1..size {
            self.send_control(rank, TAG_GROUP, &assignments[rank as usize])?;
        }
        Ok(assignments[0].take())
    }
}

impl Transport for MeshTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> Rank {
        self.members.len() as Rank
    }

    fn send_frame(&self, dest: Rank, mut frame: Frame) -> Result<()> {
        let mesh_dest = self.check_rank(dest)?;
        frame.context = self.context;
        frame.source = self.rank;
        log::trace!(
            "mesh send: ctx {} rank {} -> {} tag {} count {}",
            self.context,
            self.rank,
            dest,
            frame.tag,
            frame.count
        );
        self.endpoint.peers[mesh_dest]
            .send(frame)
            .map_err(|_| Error::Unknown(format!("peer for rank {} has shut down", dest)))
    }

    fn recv_frame(&self, source: Option<Rank>, tag: Option<Tag>) -> Result<Frame> {
        if let Some(s) = source {
            self.check_rank(s)?;
        }
        loop {
            if let Some(frame) = self.take_stashed(source, tag) {
                return Ok(frame);
            }
            // Hold the inbox only for a bounded wait so that a frame
            // stashed by another handle on this endpoint is noticed.
            let Ok(inbox) = self.endpoint.inbox.try_lock() else {
                std::thread::sleep(POLL_INTERVAL);
                continue;
            };
            match inbox.recv_timeout(POLL_INTERVAL) {
                Ok(frame) => {
                    drop(inbox);
                    if let Some(frame) = self.deliver(frame, source, tag) {
                        return Ok(frame);
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Unknown("all peers have shut down".into()));
                }
            }
        }
    }

    fn try_recv_frame(&self, source: Option<Rank>, tag: Option<Tag>) -> Result<Option<Frame>> {
        if let Some(s) = source {
            self.check_rank(s)?;
        }
        if let Some(frame) = self.take_stashed(source, tag) {
            return Ok(Some(frame));
        }
        let Ok(inbox) = self.endpoint.inbox.try_lock() else {
            return Ok(None);
        };
        while let Ok(frame) = inbox.try_recv() {
            if let Some(frame) = self.deliver(frame, source, tag) {
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    fn barrier(&self) -> Result<()> {
        let size = self.size();
        if size == 1 {
            return Ok(());
        }
        if self.rank == 0 {
            for rank in 1..size {
                self.recv_frame(Some(rank), Some(TAG_BARRIER))?;
            }
            for rank in 1..size {
                self.send_frame(rank, Frame::control(TAG_BARRIER))?;
            }
        } else {
            self.send_frame(0, Frame::control(TAG_BARRIER))?;
            self.recv_frame(Some(0), Some(TAG_BARRIER))?;
        }
        Ok(())
    }

    fn broadcast(&self, root: Rank, frame: Option<Frame>) -> Result<Frame> {
        self.check_rank(root)?;
        if self.rank == root {
            let mut frame = frame.ok_or(Error::Buffer)?;
            frame.tag = crate::transport::TAG_BCAST;
            for rank in 0..self.size() {
                if rank != root {
                    self.send_frame(rank, frame.clone())?;
                }
            }
            frame.context = self.context;
            frame.source = root;
            Ok(frame)
        } else {
            self.recv_frame(Some(root), Some(crate::transport::TAG_BCAST))
        }
    }

    fn reduce(
        &self,
        root: Rank,
        mut frame: Frame,
        _commutative: bool,
        combine: &mut dyn FnMut(Frame, Frame) -> Result<Frame>,
    ) -> Result<Option<Frame>> {
        self.check_rank(root)?;
        if self.rank != root {
            frame.tag = crate::transport::TAG_REDUCE;
            self.send_frame(root, frame)?;
            return Ok(None);
        }
        // Fold in ascending rank order so non-commutative combiners see a
        // deterministic operand sequence.
        frame.source = root;
        let mut accumulator: Option<Frame> = None;
        for rank in 0..self.size() {
            let contribution = if rank == root {
                frame.clone()
            } else {
                self.recv_frame(Some(rank), Some(crate::transport::TAG_REDUCE))?
            };
            accumulator = Some(match accumulator {
                None => contribution,
                Some(acc) => combine(acc, contribution)?,
            });
        }
        Ok(accumulator)
    }

    fn split(&self, color: Option<i32>, key: i32) -> Result<Option<Box<dyn Transport>>> {
        let assignment = if self.rank == 0 {
            self.split_at_coordinator((color, key))?
        } else {
            self.send_control(0, TAG_GROUP, &(color, key))?;
            self.recv_control(0, TAG_GROUP)?
        };
        log::trace!(
            "mesh split: ctx {} rank {} color {:?} key {} -> {:?}",
            self.context,
            self.rank,
            color,
            key,
            assignment.as_ref().map(|&(r, c, _)| (r, c))
        );
        Ok(assignment.map(|(rank, context, members)| {
            Box::new(self.derived(context, members, rank)) as Box<dyn Transport>
        }))
    }

    fn duplicate(&self) -> Result<Box<dyn Transport>> {
        let context = if self.rank == 0 {
            let context = self.endpoint.next_context.fetch_add(1, Ordering::Relaxed);
            for rank in 1..self.size() {
                self.send_control(rank, TAG_GROUP, &context)?;
            }
            context
        } else {
            self.recv_control(0, TAG_GROUP)?
        };
        Ok(Box::new(self.derived(context, self.members.clone(), self.rank)))
    }
}
