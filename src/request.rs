//! Request objects for non-blocking operations
//!
//! Non-blocking calls hand back a request value that must be consumed to
//! observe completion. The types are `#[must_use]` and their completion
//! methods take `self`, so a request cannot be waited on twice and
//! dropping one without completing it is flagged by the compiler.
//!
//! Sends are eager in every provided transport, so a [`Request`] from
//! `immediate_send` is complete on creation and `wait` returns its status
//! without blocking. Receives genuinely defer: [`ReceiveFuture`] resolves
//! to a newly produced message and [`ReceiveRequest`] keeps an exclusive
//! borrow of the destination buffer until completed, which is what makes
//! it impossible to read a buffer that is still being received into.

use std::marker::PhantomData;

use crate::datatype::traits::*;
use crate::error::Result;
use crate::point_to_point::{receive_frame_into, receive_message, Status};
use crate::topology::{Communicator, Rank};
use crate::Tag;

/// A completed or completable non-blocking operation.
#[must_use]
#[derive(Debug)]
pub struct Request {
    status: Status,
}

impl Request {
    pub(crate) fn completed(status: Status) -> Request {
        Request { status }
    }

    /// Block until the operation is complete and return its status.
    pub fn wait(self) -> Status {
        self.status
    }

    /// If the operation is complete return its status, otherwise give the
    /// request back.
    pub fn test(self) -> std::result::Result<Status, Request> {
        Ok(self.status)
    }
}

/// A pending receive that will produce a value of type `Msg`.
#[must_use]
pub struct ReceiveFuture<'a, Msg> {
    comm: &'a Communicator,
    source: Option<Rank>,
    tag: Option<Tag>,
    _msg: PhantomData<Msg>,
}

impl<'a, Msg> ReceiveFuture<'a, Msg>
where
    Msg: Equivalence,
{
    pub(crate) fn new(comm: &'a Communicator, source: Option<Rank>, tag: Option<Tag>) -> Self {
        ReceiveFuture {
            comm,
            source,
            tag,
            _msg: PhantomData,
        }
    }

    /// Block until a matching message arrives and return it with its
    /// status.
    pub fn wait(self) -> Result<(Msg, Status)> {
        let frame = self
            .comm
            .transport()
            .recv_frame(self.source, self.tag)?;
        receive_message(frame)
    }

    /// Resolve the future if a matching message has arrived, otherwise
    /// give it back.
    pub fn test(self) -> std::result::Result<Result<(Msg, Status)>, Self> {
        match self.comm.transport().try_recv_frame(self.source, self.tag) {
            Ok(Some(frame)) => Ok(receive_message(frame)),
            Ok(None) => Err(self),
            Err(e) => Ok(Err(e)),
        }
    }
}

/// A pending receive into a caller-provided buffer.
///
/// Holds the buffer exclusively borrowed until the receive completes.
#[must_use]
pub struct ReceiveRequest<'c, 'b, Buf: ?Sized> {
    comm: &'c Communicator,
    source: Option<Rank>,
    tag: Option<Tag>,
    buffer: &'b mut Buf,
}

impl<'c, 'b, Buf> ReceiveRequest<'c, 'b, Buf>
where
    Buf: BufferMut + ?Sized,
{
    pub(crate) fn new(
        comm: &'c Communicator,
        source: Option<Rank>,
        tag: Option<Tag>,
        buffer: &'b mut Buf,
    ) -> Self {
        ReceiveRequest {
            comm,
            source,
            tag,
            buffer,
        }
    }

    /// Block until a matching message has been received into the buffer.
    pub fn wait(self) -> Result<Status> {
        let frame = self
            .comm
            .transport()
            .recv_frame(self.source, self.tag)?;
        receive_frame_into(frame, self.buffer)
    }

    /// Complete the receive if a matching message has arrived, otherwise
    /// give the request back.
    pub fn test(self) -> std::result::Result<Result<Status>, Self> {
        match self.comm.transport().try_recv_frame(self.source, self.tag) {
            Ok(Some(frame)) => Ok(receive_frame_into(frame, self.buffer)),
            Ok(None) => Err(self),
            Err(e) => Ok(Err(e)),
        }
    }
}
