//! Collective communication
//!
//! Collective operations involve every member of a communicator's group
//! and every member must make the matching call. The operations here are
//! [`barrier`](CommunicatorCollectives::barrier), rooted
//! [`broadcast_into`](Root::broadcast_into), and rooted reduction with
//! either a [`SystemOperation`] or a caller-supplied [`UserOperation`].
//!
//! Reductions combine buffers element-wise. When the operation is not
//! commutative the fold visits contributions in ascending rank order, so
//! every run over the same inputs produces the same result.

use crate::datatype::{decode_vec, encode_slice, traits::*};
use crate::error::{Error, Result};
use crate::topology::{AsCommunicator, Process, Rank};
use crate::transport::Frame;

/// Collective communication traits
pub mod traits {
    pub use super::{CommunicatorCollectives, Operation, Root, SystemReducible};
}

/// Collective operations with no root.
pub trait CommunicatorCollectives: AsCommunicator {
    /// Block until every member of the group has entered the call.
    fn barrier(&self) -> Result<()> {
        self.as_communicator().transport().barrier()
    }
}

impl<C: AsCommunicator> CommunicatorCollectives for C {}

/// The distinguished member of a rooted collective call.
pub trait Root: AsCommunicator {
    /// The rank that acts as the root.
    fn root_rank(&self) -> Rank;

    /// Distribute the root's buffer contents to every member's buffer.
    ///
    /// After the call every member holds the values the root passed in.
    /// Fails with [`Error::Count`](crate::Error) when a non-root buffer
    /// cannot hold the root's element count.
    fn broadcast_into<Buf>(&self, buf: &mut Buf) -> Result<()>
    where
        Buf: BufferMut + ?Sized,
    {
        let comm = self.as_communicator();
        let root = self.root_rank();
        let outgoing = if comm.rank() == root {
            let payload = encode_slice(buf.as_slice())?;
            Some(Frame::message(
                0,
                <Buf::Item as Equivalence>::equivalent_wire_tag(),
                buf.count(),
                payload,
            ))
        } else {
            None
        };
        let frame = comm.transport().broadcast(root, outgoing)?;
        if comm.rank() != root {
            if frame.count != buf.count() {
                return Err(Error::Count {
                    incoming: frame.count,
                    capacity: buf.count(),
                });
            }
            crate::datatype::decode_into_slice(buf.as_mut_slice(), &frame.payload, frame.count)?;
        }
        Ok(())
    }

    /// Contribute `sendbuf` to an element-wise reduction whose result
    /// lands at the root. To be called by every non-root member.
    fn reduce_into<Buf, O>(&self, sendbuf: &Buf, op: O) -> Result<()>
    where
        Buf: Buffer + ?Sized,
        O: Operation<Buf::Item>,
    {
        let comm = self.as_communicator();
        assert_ne!(comm.rank(), self.root_rank());
        let frame = contribution_frame(sendbuf)?;
        let folded = comm.transport().reduce(
            self.root_rank(),
            frame,
            op.is_commutative(),
            &mut fold_frames::<Buf::Item, _>(&op),
        )?;
        debug_assert!(folded.is_none());
        Ok(())
    }

    /// Contribute `sendbuf` and collect the element-wise reduction of all
    /// contributions into `recvbuf`. To be called by the root.
    fn reduce_into_root<Buf, BufMut, O>(
        &self,
        sendbuf: &Buf,
        recvbuf: &mut BufMut,
        op: O,
    ) -> Result<()>
    where
        Buf: Buffer + ?Sized,
        BufMut: BufferMut<Item = Buf::Item> + ?Sized,
        O: Operation<Buf::Item>,
    {
        let comm = self.as_communicator();
        assert_eq!(comm.rank(), self.root_rank());
        if sendbuf.count() != recvbuf.count() {
            return Err(Error::Count {
                incoming: sendbuf.count(),
                capacity: recvbuf.count(),
            });
        }
        let frame = contribution_frame(sendbuf)?;
        let folded = comm.transport().reduce(
            self.root_rank(),
            frame,
            op.is_commutative(),
            &mut fold_frames::<Buf::Item, _>(&op),
        )?;
        let folded = folded.ok_or(Error::Buffer)?;
        if folded.count != recvbuf.count() {
            return Err(Error::Count {
                incoming: folded.count,
                capacity: recvbuf.count(),
            });
        }
        crate::datatype::decode_into_slice(recvbuf.as_mut_slice(), &folded.payload, folded.count)?;
        Ok(())
    }
}

impl<'a> Root for Process<'a> {
    fn root_rank(&self) -> Rank {
        self.rank()
    }
}

fn contribution_frame<Buf>(sendbuf: &Buf) -> Result<Frame>
where
    Buf: Buffer + ?Sized,
{
    let payload = encode_slice(sendbuf.as_slice())?;
    Ok(Frame::message(
        0,
        <Buf::Item as Equivalence>::equivalent_wire_tag(),
        sendbuf.count(),
        payload,
    ))
}

/// A frame combiner that applies `op` element-wise to two contribution
/// frames of equal count.
fn fold_frames<'o, T, O>(op: &'o O) -> impl FnMut(Frame, Frame) -> Result<Frame> + 'o
where
    T: Equivalence,
    O: Operation<T>,
{
    move |acc: Frame, next: Frame| {
        if acc.count != next.count {
            return Err(Error::Count {
                incoming: next.count,
                capacity: acc.count,
            });
        }
        let left: Vec<T> = decode_vec(&acc.payload, acc.count)?;
        let right: Vec<T> = decode_vec(&next.payload, next.count)?;
        let mut combined = Vec::with_capacity(left.len());
        for (l, r) in left.into_iter().zip(right) {
            combined.push(op.combine(l, r)?);
        }
        let payload = encode_slice(&combined)?;
        Ok(Frame::message(acc.tag, acc.wire_tag, acc.count, payload))
    }
}

/// An operation usable in a reduction over elements of type `T`.
pub trait Operation<T> {
    /// Whether contributions may be combined in any order.
    fn is_commutative(&self) -> bool;

    /// Combine the accumulated value with the next contribution.
    fn combine(&self, acc: T, elem: T) -> Result<T>;
}

impl<T, O: Operation<T>> Operation<T> for &O {
    fn is_commutative(&self) -> bool {
        (**self).is_commutative()
    }

    fn combine(&self, acc: T, elem: T) -> Result<T> {
        (**self).combine(acc, elem)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SystemOp {
    Max,
    Min,
    Sum,
    Product,
    LogicalAnd,
    LogicalOr,
    LogicalXor,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
}

/// A built-in reduction operation.
///
/// Constructed with the lowercase constructor functions, e.g.
/// [`SystemOperation::sum()`]. All built-in operations are commutative.
/// Not every operation applies to every element type; applying, say, a
/// bitwise operation to floating point elements fails at the combining
/// step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemOperation(SystemOp);

macro_rules! system_operation_constructors {
    ($($ctor:ident => $variant:path),* $(,)?) => {
        impl SystemOperation {
            $(
                pub fn $ctor() -> SystemOperation {
                    SystemOperation($variant)
                }
            )*
        }
    };
}

system_operation_constructors! {
    max => SystemOp::Max,
    min => SystemOp::Min,
    sum => SystemOp::Sum,
    product => SystemOp::Product,
    logical_and => SystemOp::LogicalAnd,
    logical_or => SystemOp::LogicalOr,
    logical_xor => SystemOp::LogicalXor,
    bitwise_and => SystemOp::BitwiseAnd,
    bitwise_or => SystemOp::BitwiseOr,
    bitwise_xor => SystemOp::BitwiseXor,
}

impl<T: SystemReducible> Operation<T> for SystemOperation {
    fn is_commutative(&self) -> bool {
        true
    }

    fn combine(&self, acc: T, elem: T) -> Result<T> {
        match self.0 {
            SystemOp::Max => T::reduce_max(acc, elem),
            SystemOp::Min => T::reduce_min(acc, elem),
            SystemOp::Sum => T::reduce_sum(acc, elem),
            SystemOp::Product => T::reduce_product(acc, elem),
            SystemOp::LogicalAnd => T::reduce_logical_and(acc, elem),
            SystemOp::LogicalOr => T::reduce_logical_or(acc, elem),
            SystemOp::LogicalXor => T::reduce_logical_xor(acc, elem),
            SystemOp::BitwiseAnd => T::reduce_bitwise_and(acc, elem),
            SystemOp::BitwiseOr => T::reduce_bitwise_or(acc, elem),
            SystemOp::BitwiseXor => T::reduce_bitwise_xor(acc, elem),
        }
    }
}

/// Element types the built-in operations apply to.
pub trait SystemReducible: Sized {
    fn reduce_max(acc: Self, elem: Self) -> Result<Self>;
    fn reduce_min(acc: Self, elem: Self) -> Result<Self>;
    fn reduce_sum(acc: Self, elem: Self) -> Result<Self>;
    fn reduce_product(acc: Self, elem: Self) -> Result<Self>;
    fn reduce_logical_and(acc: Self, elem: Self) -> Result<Self>;
    fn reduce_logical_or(acc: Self, elem: Self) -> Result<Self>;
    fn reduce_logical_xor(acc: Self, elem: Self) -> Result<Self>;
    fn reduce_bitwise_and(acc: Self, elem: Self) -> Result<Self>;
    fn reduce_bitwise_or(acc: Self, elem: Self) -> Result<Self>;
    fn reduce_bitwise_xor(acc: Self, elem: Self) -> Result<Self>;
}

macro_rules! integer_reducible {
    ($($t:ty),*) => {
        $(
            impl SystemReducible for $t {
                fn reduce_max(acc: Self, elem: Self) -> Result<Self> {
                    Ok(acc.max(elem))
                }
                fn reduce_min(acc: Self, elem: Self) -> Result<Self> {
                    Ok(acc.min(elem))
                }
                fn reduce_sum(acc: Self, elem: Self) -> Result<Self> {
                    Ok(acc.wrapping_add(elem))
                }
                fn reduce_product(acc: Self, elem: Self) -> Result<Self> {
                    Ok(acc.wrapping_mul(elem))
                }
                fn reduce_logical_and(acc: Self, elem: Self) -> Result<Self> {
                    Ok(((acc != 0) && (elem != 0)) as $t)
                }
                fn reduce_logical_or(acc: Self, elem: Self) -> Result<Self> {
                    Ok(((acc != 0) || (elem != 0)) as $t)
                }
                fn reduce_logical_xor(acc: Self, elem: Self) -> Result<Self> {
                    Ok(((acc != 0) != (elem != 0)) as $t)
                }
                fn reduce_bitwise_and(acc: Self, elem: Self) -> Result<Self> {
                    Ok(acc & elem)
                }
                fn reduce_bitwise_or(acc: Self, elem: Self) -> Result<Self> {
                    Ok(acc | elem)
                }
                fn reduce_bitwise_xor(acc: Self, elem: Self) -> Result<Self> {
                    Ok(acc ^ elem)
                }
            }
        )*
    };
}

integer_reducible!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

macro_rules! float_reducible {
    ($($t:ty),*) => {
        $(
            impl SystemReducible for $t {
                fn reduce_max(acc: Self, elem: Self) -> Result<Self> {
                    Ok(acc.max(elem))
                }
                fn reduce_min(acc: Self, elem: Self) -> Result<Self> {
                    Ok(acc.min(elem))
                }
                fn reduce_sum(acc: Self, elem: Self) -> Result<Self> {
                    Ok(acc + elem)
                }
                fn reduce_product(acc: Self, elem: Self) -> Result<Self> {
                    Ok(acc * elem)
                }
                fn reduce_logical_and(acc: Self, elem: Self) -> Result<Self> {
                    Ok(((acc != 0.0) && (elem != 0.0)) as u8 as $t)
                }
                fn reduce_logical_or(acc: Self, elem: Self) -> Result<Self> {
                    Ok(((acc != 0.0) || (elem != 0.0)) as u8 as $t)
                }
                fn reduce_logical_xor(acc: Self, elem: Self) -> Result<Self> {
                    Ok(((acc != 0.0) != (elem != 0.0)) as u8 as $t)
                }
                fn reduce_bitwise_and(_: Self, _: Self) -> Result<Self> {
                    Err(Error::Unknown(
                        "bitwise operations do not apply to floating point elements".into(),
                    ))
                }
                fn reduce_bitwise_or(_: Self, _: Self) -> Result<Self> {
                    Err(Error::Unknown(
                        "bitwise operations do not apply to floating point elements".into(),
                    ))
                }
                fn reduce_bitwise_xor(_: Self, _: Self) -> Result<Self> {
                    Err(Error::Unknown(
                        "bitwise operations do not apply to floating point elements".into(),
                    ))
                }
            }
        )*
    };
}

float_reducible!(f32, f64);

impl SystemReducible for bool {
    fn reduce_max(acc: Self, elem: Self) -> Result<Self> {
        Ok(acc.max(elem))
    }
    fn reduce_min(acc: Self, elem: Self) -> Result<Self> {
        Ok(acc.min(elem))
    }
    fn reduce_sum(acc: Self, elem: Self) -> Result<Self> {
        Ok(acc | elem)
    }
    fn reduce_product(acc: Self, elem: Self) -> Result<Self> {
        Ok(acc & elem)
    }
    fn reduce_logical_and(acc: Self, elem: Self) -> Result<Self> {
        Ok(acc && elem)
    }
    fn reduce_logical_or(acc: Self, elem: Self) -> Result<Self> {
        Ok(acc || elem)
    }
    fn reduce_logical_xor(acc: Self, elem: Self) -> Result<Self> {
        Ok(acc != elem)
    }
    fn reduce_bitwise_and(acc: Self, elem: Self) -> Result<Self> {
        Ok(acc & elem)
    }
    fn reduce_bitwise_or(acc: Self, elem: Self) -> Result<Self> {
        Ok(acc | elem)
    }
    fn reduce_bitwise_xor(acc: Self, elem: Self) -> Result<Self> {
        Ok(acc ^ elem)
    }
}

/// A caller-supplied reduction operation.
///
/// [`associative`](UserOperation::associative) marks the closure as
/// non-commutative, which forces the fold to run in ascending rank order;
/// [`commutative`](UserOperation::commutative) permits any combining
/// order.
pub struct UserOperation<F> {
    commute: bool,
    function: F,
}

impl<F> UserOperation<F> {
    /// An operation that is associative but not commutative.
    pub fn associative(function: F) -> UserOperation<F> {
        UserOperation::new(false, function)
    }

    /// An operation that is associative and commutative.
    pub fn commutative(function: F) -> UserOperation<F> {
        UserOperation::new(true, function)
    }

    pub fn new(commute: bool, function: F) -> UserOperation<F> {
        UserOperation { commute, function }
    }
}

impl<T, F> Operation<T> for UserOperation<F>
where
    F: Fn(T, T) -> T,
{
    fn is_commutative(&self) -> bool {
        self.commute
    }

    fn combine(&self, acc: T, elem: T) -> Result<T> {
        Ok((self.function)(acc, elem))
    }
}

/// Perform a local element-wise reduction: each element of `inoutbuf`
/// becomes `op` applied to the corresponding elements of `inbuf` and
/// `inoutbuf`, in that operand order.
pub fn reduce_local_into<T, O>(inbuf: &[T], inoutbuf: &mut [T], op: O) -> Result<()>
where
    T: Equivalence + Clone,
    O: Operation<T>,
{
    if inbuf.len() != inoutbuf.len() {
        return Err(Error::Count {
            incoming: Buffer::count(inbuf),
            capacity: Buffer::count(&inoutbuf[..]),
        });
    }
    for (i, io) in inbuf.iter().zip(inoutbuf.iter_mut()) {
        *io = op.combine(i.clone(), io.clone())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_operations_combine() {
        let sum = SystemOperation::sum();
        assert_eq!(sum.combine(3i32, 4), Ok(7));
        let max = SystemOperation::max();
        assert_eq!(max.combine(3i32, 4), Ok(4));
        let land = SystemOperation::logical_and();
        assert_eq!(land.combine(2i32, 0), Ok(0));
        assert_eq!(land.combine(2i32, 5), Ok(1));
    }

    #[test]
    fn float_bitwise_is_rejected() {
        let band = SystemOperation::bitwise_and();
        assert!(band.combine(1.0f64, 2.0).is_err());
    }

    #[test]
    fn local_reduction_operand_order() {
        // The combiner must see (in, inout) in that order.
        let a = [1i32, 2, 3];
        let mut b = [10i32, 20, 30];
        let subtract = UserOperation::associative(|x: i32, y: i32| x - y);
        reduce_local_into(&a, &mut b, &subtract).unwrap();
        assert_eq!(b, [-9, -18, -27]);
    }
}
