//! The single-process stub backend
//!
//! [`StubTransport`] backs a group of exactly one process. Sends to rank
//! zero land in a local mailbox and can be received back; collectives
//! degenerate to identities. This lets group-structured code run unchanged
//! without any peers, which is useful for tests and for tools that only
//! occasionally run multi-process.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::topology::Rank;
use crate::transport::{take_matching, Frame, Transport, WORLD_CONTEXT};
use crate::Tag;

/// A transport for a group of size one.
pub struct StubTransport {
    mailbox: Arc<Mutex<VecDeque<Frame>>>,
}

impl StubTransport {
    pub fn new() -> StubTransport {
        StubTransport {
            mailbox: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Another handle onto the same mailbox.
    pub(crate) fn clone_handle(&self) -> StubTransport {
        StubTransport {
            mailbox: Arc::clone(&self.mailbox),
        }
    }

    fn mailbox(&self) -> std::sync::MutexGuard<'_, VecDeque<Frame>> {
        self.mailbox.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for StubTransport {
    fn default() -> StubTransport {
        StubTransport::new()
    }
}

impl Transport for StubTransport {
    fn rank(&self) -> Rank {
        0
    }

    fn size(&self) -> Rank {
        1
    }

    fn send_frame(&self, dest: Rank, mut frame: Frame) -> Result<()> {
        if dest != 0 {
            return Err(Error::Rank(dest));
        }
        frame.context = WORLD_CONTEXT;
        frame.source = 0;
        self.mailbox().push_back(frame);
        Ok(())
    }

    fn recv_frame(&self, source: Option<Rank>, tag: Option<Tag>) -> Result<Frame> {
        // With a single rank there is no peer that could still deliver;
        // an empty match means the receive can never complete.
        self.try_recv_frame(source, tag)?.ok_or_else(|| {
            Error::Unknown("receive cannot complete: no matching message is pending".into())
        })
    }

    fn try_recv_frame(&self, source: Option<Rank>, tag: Option<Tag>) -> Result<Option<Frame>> {
        if let Some(s) = source {
            if s != 0 {
                return Err(Error::Rank(s));
            }
        }
        Ok(take_matching(&mut self.mailbox(), WORLD_CONTEXT, source, tag))
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }

    fn broadcast(&self, root: Rank, frame: Option<Frame>) -> Result<Frame> {
        if root != 0 {
            return Err(Error::Rank(root));
        }
        frame.ok_or(Error::Buffer)
    }

    fn reduce(
        &self,
        root: Rank,
        frame: Frame,
        _commutative: bool,
        _combine: &mut dyn FnMut(Frame, Frame) -> Result<Frame>,
    ) -> Result<Option<Frame>> {
        if root != 0 {
            return Err(Error::Rank(root));
        }
        Ok(Some(frame))
    }

    fn split(&self, color: Option<i32>, _key: i32) -> Result<Option<Box<dyn Transport>>> {
        match color {
            Some(_) => Ok(Some(Box::new(StubTransport::new()))),
            None => Ok(None),
        }
    }

    fn duplicate(&self) -> Result<Box<dyn Transport>> {
        Ok(Box::new(StubTransport::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::WireTag;

    #[test]
    fn self_send_is_received_back() {
        let transport = StubTransport::new();
        transport
            .send_frame(0, Frame::message(4, WireTag::Int32, 1, vec![9, 0, 0, 0]))
            .unwrap();
        let frame = transport.recv_frame(Some(0), Some(4)).unwrap();
        assert_eq!(frame.payload, vec![9, 0, 0, 0]);
    }

    #[test]
    fn send_to_missing_rank_is_rejected() {
        let transport = StubTransport::new();
        let outcome = transport.send_frame(1, Frame::control(0));
        assert_eq!(outcome, Err(Error::Rank(1)));
    }

    #[test]
    fn receive_with_nothing_pending_fails() {
        let transport = StubTransport::new();
        assert!(transport.recv_frame(None, None).is_err());
        assert_eq!(transport.try_recv_frame(None, None), Ok(None));
    }
}
