//! Point to point communication
//!
//! Endpoints of point to point communication are described by the
//! [`Source`] and [`Destination`] traits, implemented by the process
//! objects a communicator hands out. A send names a destination rank; a
//! receive names either a specific source rank or any rank, and either a
//! specific tag or any tag. Between one (source, destination, tag) triple
//! messages are delivered in the order they were sent; across different
//! triples no order is promised.
//!
//! Each direction comes in blocking and non-blocking form. Sends are eager
//! through every provided transport, so the blocking and non-blocking send
//! calls behave identically apart from the returned [`Request`]. Receives
//! come in three granularities: a single value, a fixed-capacity buffer,
//! and a vector sized from the message itself.
//!
//! Tags are non-negative; passing a negative tag is reported as
//! [`Error::Tag`](crate::Error). Negative tags are reserved for the
//! collective machinery inside the transports.

use crate::datatype::{decode_into_slice, decode_vec, encode_slice, traits::*};
use crate::error::{Error, Result};
use crate::request::{ReceiveFuture, ReceiveRequest, Request};
use crate::topology::{AnyProcess, AsCommunicator, Process, Rank};
use crate::transport::Frame;
use crate::{Count, Tag};

/// Point to point communication traits
pub mod traits {
    pub use super::{Destination, Source};
}

/// The default tag used by calls that do not name one.
pub const DEFAULT_TAG: Tag = 0;

/// Describes a completed receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    source: Rank,
    tag: Tag,
    count: Count,
}

impl Status {
    pub(crate) fn from_frame(frame: &Frame) -> Status {
        Status {
            source: frame.source,
            tag: frame.tag,
            count: frame.count,
        }
    }

    pub(crate) fn for_send(tag: Tag, count: Count) -> Status {
        Status {
            source: -1,
            tag,
            count,
        }
    }

    /// The rank the message was sent from.
    ///
    /// The status of a completed send has no originating message; there
    /// this reports `-1`.
    pub fn source_rank(&self) -> Rank {
        self.source
    }

    /// The tag the message was sent with.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// The number of elements in the message.
    pub fn count(&self) -> Count {
        self.count
    }
}

fn checked_tag(tag: Tag) -> Result<Tag> {
    if tag < 0 {
        Err(Error::Tag(tag))
    } else {
        Ok(tag)
    }
}

fn check_wire_tag<T: Equivalence>(frame: &Frame) -> Result<()> {
    let expected = T::equivalent_wire_tag();
    if frame.wire_tag == expected {
        Ok(())
    } else {
        Err(Error::Unknown(format!(
            "message element type {:?} does not match the receive type {:?}",
            frame.wire_tag, expected
        )))
    }
}

/// Decode a frame as a single value of type `Msg`.
pub(crate) fn receive_message<Msg: Equivalence>(frame: Frame) -> Result<(Msg, Status)> {
    check_wire_tag::<Msg>(&frame)?;
    if frame.count != 1 {
        return Err(Error::Count {
            incoming: frame.count,
            capacity: 1,
        });
    }
    let status = Status::from_frame(&frame);
    let (value, _) = Msg::unpack_from(&frame.payload)?;
    Ok((value, status))
}

/// Decode a frame into a caller-provided buffer, checking capacity.
pub(crate) fn receive_frame_into<Buf>(frame: Frame, buffer: &mut Buf) -> Result<Status>
where
    Buf: BufferMut + ?Sized,
{
    check_wire_tag::<Buf::Item>(&frame)?;
    if frame.count > buffer.count() {
        return Err(Error::Count {
            incoming: frame.count,
            capacity: buffer.count(),
        });
    }
    let status = Status::from_frame(&frame);
    decode_into_slice(buffer.as_mut_slice(), &frame.payload, frame.count)?;
    Ok(status)
}

/// Something that can be sent to.
pub trait Destination: AsCommunicator {
    /// The rank messages are addressed to.
    fn destination_rank(&self) -> Rank;

    /// Send the contents of `buf` with the default tag.
    fn send<Buf>(&self, buf: &Buf) -> Result<()>
    where
        Buf: Buffer + ?Sized,
    {
        self.send_with_tag(buf, DEFAULT_TAG)
    }

    /// Send the contents of `buf` with the given tag.
    fn send_with_tag<Buf>(&self, buf: &Buf, tag: Tag) -> Result<()>
    where
        Buf: Buffer + ?Sized,
    {
        let tag = checked_tag(tag)?;
        let payload = encode_slice(buf.as_slice())?;
        let frame = Frame::message(
            tag,
            <Buf::Item as Equivalence>::equivalent_wire_tag(),
            buf.count(),
            payload,
        );
        self.as_communicator()
            .transport()
            .send_frame(self.destination_rank(), frame)
    }

    /// Initiate a send of the contents of `buf` with the default tag.
    fn immediate_send<Buf>(&self, buf: &Buf) -> Result<Request>
    where
        Buf: Buffer + ?Sized,
    {
        self.immediate_send_with_tag(buf, DEFAULT_TAG)
    }

    /// Initiate a send of the contents of `buf` with the given tag.
    ///
    /// Sends are eager, so the returned request is already complete; the
    /// call exists so code written against the non-blocking interface
    /// works unchanged. The completion status carries the tag and count
    /// of the send and `-1` for the source rank.
    fn immediate_send_with_tag<Buf>(&self, buf: &Buf, tag: Tag) -> Result<Request>
    where
        Buf: Buffer + ?Sized,
    {
        self.send_with_tag(buf, tag)?;
        Ok(Request::completed(Status::for_send(tag, buf.count())))
    }
}

/// Something that can be received from.
pub trait Source: AsCommunicator {
    /// The rank receives are matched against, or `None` to accept any
    /// rank.
    fn source_rank(&self) -> Option<Rank>;

    /// Receive a single value with any tag.
    fn receive<Msg>(&self) -> Result<(Msg, Status)>
    where
        Msg: Equivalence,
    {
        let frame = self
            .as_communicator()
            .transport()
            .recv_frame(self.source_rank(), None)?;
        receive_message(frame)
    }

    /// Receive a single value sent with the given tag.
    fn receive_with_tag<Msg>(&self, tag: Tag) -> Result<(Msg, Status)>
    where
        Msg: Equivalence,
    {
        let tag = checked_tag(tag)?;
        let frame = self
            .as_communicator()
            .transport()
            .recv_frame(self.source_rank(), Some(tag))?;
        receive_message(frame)
    }

    /// Receive a message with any tag into `buf`.
    ///
    /// Fails with [`Error::Count`](crate::Error) if the message holds
    /// more elements than `buf` can take.
    fn receive_into<Buf>(&self, buf: &mut Buf) -> Result<Status>
    where
        Buf: BufferMut + ?Sized,
    {
        let frame = self
            .as_communicator()
            .transport()
            .recv_frame(self.source_rank(), None)?;
        receive_frame_into(frame, buf)
    }

    /// Receive a message sent with the given tag into `buf`.
    fn receive_into_with_tag<Buf>(&self, buf: &mut Buf, tag: Tag) -> Result<Status>
    where
        Buf: BufferMut + ?Sized,
    {
        let tag = checked_tag(tag)?;
        let frame = self
            .as_communicator()
            .transport()
            .recv_frame(self.source_rank(), Some(tag))?;
        receive_frame_into(frame, buf)
    }

    /// Receive a message with any tag into a vector sized from the
    /// message itself.
    fn receive_vec<Msg>(&self) -> Result<(Vec<Msg>, Status)>
    where
        Msg: Equivalence,
    {
        let frame = self
            .as_communicator()
            .transport()
            .recv_frame(self.source_rank(), None)?;
        receive_frame_vec(frame)
    }

    /// Receive a message sent with the given tag into a vector sized from
    /// the message itself.
    fn receive_vec_with_tag<Msg>(&self, tag: Tag) -> Result<(Vec<Msg>, Status)>
    where
        Msg: Equivalence,
    {
        let tag = checked_tag(tag)?;
        let frame = self
            .as_communicator()
            .transport()
            .recv_frame(self.source_rank(), Some(tag))?;
        receive_frame_vec(frame)
    }

    /// Initiate a receive of a single value with any tag.
    fn immediate_receive<Msg>(&self) -> ReceiveFuture<'_, Msg>
    where
        Msg: Equivalence,
    {
        ReceiveFuture::new(self.as_communicator(), self.source_rank(), None)
    }

    /// Initiate a receive of a single value sent with the given tag.
    fn immediate_receive_with_tag<Msg>(&self, tag: Tag) -> Result<ReceiveFuture<'_, Msg>>
    where
        Msg: Equivalence,
    {
        let tag = checked_tag(tag)?;
        Ok(ReceiveFuture::new(
            self.as_communicator(),
            self.source_rank(),
            Some(tag),
        ))
    }

    /// Initiate a receive with any tag into `buf`.
    ///
    /// The buffer stays exclusively borrowed by the returned request
    /// until the receive completes.
    fn immediate_receive_into<'b, Buf>(&self, buf: &'b mut Buf) -> ReceiveRequest<'_, 'b, Buf>
    where
        Buf: BufferMut + ?Sized,
    {
        ReceiveRequest::new(self.as_communicator(), self.source_rank(), None, buf)
    }

    /// Initiate a receive of a message sent with the given tag into `buf`.
    fn immediate_receive_into_with_tag<'b, Buf>(
        &self,
        buf: &'b mut Buf,
        tag: Tag,
    ) -> Result<ReceiveRequest<'_, 'b, Buf>>
    where
        Buf: BufferMut + ?Sized,
    {
        let tag = checked_tag(tag)?;
        Ok(ReceiveRequest::new(
            self.as_communicator(),
            self.source_rank(),
            Some(tag),
            buf,
        ))
    }
}

fn receive_frame_vec<Msg: Equivalence>(frame: Frame) -> Result<(Vec<Msg>, Status)> {
    check_wire_tag::<Msg>(&frame)?;
    let status = Status::from_frame(&frame);
    let elements = decode_vec(&frame.payload, frame.count)?;
    Ok((elements, status))
}

impl<'a> Destination for Process<'a> {
    fn destination_rank(&self) -> Rank {
        self.rank()
    }
}

impl<'a> Source for Process<'a> {
    fn source_rank(&self) -> Option<Rank> {
        Some(self.rank())
    }
}

impl<'a> Source for AnyProcess<'a> {
    fn source_rank(&self) -> Option<Rank> {
        None
    }
}
