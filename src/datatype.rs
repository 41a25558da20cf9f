//! Describing data on the wire
//!
//! Every value that travels through a communicator resolves at compile time
//! to one of two transfer strategies. Types with a direct native
//! representation (the primitive numeric types, `bool` and `char`) map to a
//! [`WireTag`] that the transport understands and are copied element by
//! element in a fixed-width little-endian layout. Every other type must be
//! *packed*: opaquely serialized before transfer and deserialized on
//! reception. The mapping is total over the set of types implementing
//! [`Equivalence`] — a type that implements neither path simply does not
//! compile into a communication call, so an ill-defined wire format cannot
//! appear silently.
//!
//! Primitive mappings are provided by this module. A user type opts into
//! the packed path with [`packed_equivalence!`](crate::packed_equivalence),
//! which requires the type to be serializable; [`String`] is mapped that way
//! here as the canonical example.
//!
//! The [`Buffer`] and [`BufferMut`] traits describe what a communication
//! call operates on. They are implemented for single values and for slices
//! of values, which gives every operation its single-object and
//! explicit-length granularities; dynamically sized containers are handled
//! by the `receive_vec` family, which sizes the container from the count
//! field carried in the message itself.

use conv::ConvUtil;

use crate::error::{Error, Result};
use crate::Count;

/// Datatype traits
pub mod traits {
    pub use super::{Buffer, BufferMut, Equivalence};
}

/// A transport-native identifier for the layout of one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireTag {
    /// Single byte boolean
    Bool,
    /// Unicode scalar value, 4 bytes
    Char,
    /// 8-bit signed integer
    Int8,
    /// 16-bit signed integer
    Int16,
    /// 32-bit signed integer
    Int32,
    /// 64-bit signed integer
    Int64,
    /// 8-bit unsigned integer
    UInt8,
    /// 16-bit unsigned integer
    UInt16,
    /// 32-bit unsigned integer
    UInt32,
    /// 64-bit unsigned integer
    UInt64,
    /// 32-bit floating point
    Float,
    /// 64-bit floating point
    Double,
    /// No native representation; elements are opaquely serialized.
    Packed,
}

impl WireTag {
    /// Whether values of this wire type must be opaquely serialized before
    /// transfer.
    pub fn must_be_packed(self) -> bool {
        matches!(self, WireTag::Packed)
    }
}

/// A mapping between the implementing type and its wire representation.
///
/// Implementing this trait is what admits a type into send, receive,
/// broadcast and reduce calls. `pack_into` appends the wire encoding of one
/// element; `unpack_from` decodes one element from the front of `bytes` and
/// reports how many bytes it consumed.
pub trait Equivalence: Sized {
    /// The wire type elements of this type map to.
    fn equivalent_wire_tag() -> WireTag;

    /// Append the wire encoding of `self` to `bytes`.
    fn pack_into(&self, bytes: &mut Vec<u8>) -> Result<()>;

    /// Decode one element from the front of `bytes`, returning it together
    /// with the number of bytes consumed.
    fn unpack_from(bytes: &[u8]) -> Result<(Self, usize)>;
}

macro_rules! native_equivalence {
    ($rstype:ty, $tag:path) => {
        impl Equivalence for $rstype {
            fn equivalent_wire_tag() -> WireTag {
                $tag
            }

            fn pack_into(&self, bytes: &mut Vec<u8>) -> Result<()> {
                bytes.extend_from_slice(&self.to_le_bytes());
                Ok(())
            }

            fn unpack_from(bytes: &[u8]) -> Result<(Self, usize)> {
                const WIDTH: usize = std::mem::size_of::<$rstype>();
                let chunk = bytes.get(..WIDTH).ok_or(Error::Buffer)?;
                let raw = chunk.try_into().map_err(|_| Error::Buffer)?;
                Ok((<$rstype>::from_le_bytes(raw), WIDTH))
            }
        }
    };
}

native_equivalence!(f32, WireTag::Float);
native_equivalence!(f64, WireTag::Double);

native_equivalence!(i8, WireTag::Int8);
native_equivalence!(i16, WireTag::Int16);
native_equivalence!(i32, WireTag::Int32);
native_equivalence!(i64, WireTag::Int64);

native_equivalence!(u8, WireTag::UInt8);
native_equivalence!(u16, WireTag::UInt16);
native_equivalence!(u32, WireTag::UInt32);
native_equivalence!(u64, WireTag::UInt64);

#[cfg(target_pointer_width = "32")]
native_equivalence!(usize, WireTag::UInt32);
#[cfg(target_pointer_width = "32")]
native_equivalence!(isize, WireTag::Int32);

#[cfg(target_pointer_width = "64")]
native_equivalence!(usize, WireTag::UInt64);
#[cfg(target_pointer_width = "64")]
native_equivalence!(isize, WireTag::Int64);

impl Equivalence for bool {
    fn equivalent_wire_tag() -> WireTag {
        WireTag::Bool
    }

    fn pack_into(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.push(*self as u8);
        Ok(())
    }

    fn unpack_from(bytes: &[u8]) -> Result<(Self, usize)> {
        let raw = bytes.first().ok_or(Error::Buffer)?;
        Ok((*raw != 0, 1))
    }
}

impl Equivalence for char {
    fn equivalent_wire_tag() -> WireTag {
        WireTag::Char
    }

    fn pack_into(&self, bytes: &mut Vec<u8>) -> Result<()> {
        bytes.extend_from_slice(&(*self as u32).to_le_bytes());
        Ok(())
    }

    fn unpack_from(bytes: &[u8]) -> Result<(Self, usize)> {
        let (raw, consumed) = u32::unpack_from(bytes)?;
        let value = char::from_u32(raw)
            .ok_or_else(|| Error::Unknown(format!("invalid char scalar {:#x}", raw)))?;
        Ok((value, consumed))
    }
}

/// Serialize one element for the packed wire path.
///
/// Used by [`packed_equivalence!`](crate::packed_equivalence); not intended
/// to be called directly.
pub fn serialize_packed<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| Error::Unknown(e.to_string()))
}

/// Deserialize one length-prefixed packed element from the front of `bytes`.
///
/// Used by [`packed_equivalence!`](crate::packed_equivalence); not intended
/// to be called directly.
pub fn deserialize_packed<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<(T, usize)> {
    let prefix = bytes.get(..8).ok_or(Error::Buffer)?;
    let raw: [u8; 8] = prefix.try_into().map_err(|_| Error::Buffer)?;
    let len = u64::from_le_bytes(raw) as usize;
    let blob = bytes.get(8..8 + len).ok_or(Error::Buffer)?;
    let value = bincode::deserialize(blob).map_err(|e| Error::Unknown(e.to_string()))?;
    Ok((value, 8 + len))
}

/// Maps a type onto the opaque packed wire representation.
///
/// This is the fallback category of the wire-type table: any type that is
/// not covered by a native mapping can be admitted to communication calls
/// by invoking this macro for it. The type must implement
/// `serde::Serialize` and `serde::Deserialize`. Each element travels as a
/// length-prefixed opaque blob; sender and receiver must agree on the type,
/// as with every other wire mapping.
#[macro_export]
macro_rules! packed_equivalence {
    ($t:ty) => {
        impl $crate::datatype::Equivalence for $t {
            fn equivalent_wire_tag() -> $crate::datatype::WireTag {
                $crate::datatype::WireTag::Packed
            }

            fn pack_into(&self, bytes: &mut Vec<u8>) -> $crate::Result<()> {
                let blob = $crate::datatype::serialize_packed(self)?;
                bytes.extend_from_slice(&(blob.len() as u64).to_le_bytes());
                bytes.extend_from_slice(&blob);
                Ok(())
            }

            fn unpack_from(bytes: &[u8]) -> $crate::Result<(Self, usize)> {
                $crate::datatype::deserialize_packed(bytes)
            }
        }
    };
}

packed_equivalence!(String);

/// Something a communication call can read elements from.
///
/// Implemented for single values and for slices, giving every operation its
/// single-object and explicit-length shapes.
pub trait Buffer {
    /// The element type of the buffer.
    type Item: Equivalence;

    /// The elements as a contiguous slice.
    fn as_slice(&self) -> &[Self::Item];

    /// How many elements the buffer holds.
    fn count(&self) -> Count {
        self.as_slice()
            .len()
            .value_as()
            .expect("buffer length cannot be expressed as a count")
    }
}

/// Something a communication call can write elements into.
pub trait BufferMut: Buffer {
    /// The elements as a mutable contiguous slice.
    fn as_mut_slice(&mut self) -> &mut [Self::Item];
}

impl<T> Buffer for T
where
    T: Equivalence,
{
    type Item = T;

    fn as_slice(&self) -> &[T] {
        std::slice::from_ref(self)
    }
}

impl<T> BufferMut for T
where
    T: Equivalence,
{
    fn as_mut_slice(&mut self) -> &mut [T] {
        std::slice::from_mut(self)
    }
}

impl<T> Buffer for [T]
where
    T: Equivalence,
{
    type Item = T;

    fn as_slice(&self) -> &[T] {
        self
    }
}

impl<T> BufferMut for [T]
where
    T: Equivalence,
{
    fn as_mut_slice(&mut self) -> &mut [T] {
        self
    }
}

/// Encode a slice of elements into a wire payload.
pub(crate) fn encode_slice<T: Equivalence>(elements: &[T]) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    for element in elements {
        element.pack_into(&mut bytes)?;
    }
    Ok(bytes)
}

/// Decode `count` elements from a wire payload into the front of `target`.
///
/// The caller has already checked that `target` can hold `count` elements.
pub(crate) fn decode_into_slice<T: Equivalence>(
    target: &mut [T],
    payload: &[u8],
    count: Count,
) -> Result<()> {
    let count = count
        .value_as::<usize>()
        .map_err(|_| Error::Buffer)?;
    let mut cursor = payload;
    for slot in target.iter_mut().take(count) {
        let (value, consumed) = T::unpack_from(cursor)?;
        *slot = value;
        cursor = &cursor[consumed..];
    }
    Ok(())
}

/// Decode `count` elements from a wire payload into a fresh `Vec`.
pub(crate) fn decode_vec<T: Equivalence>(payload: &[u8], count: Count) -> Result<Vec<T>> {
    let count = count
        .value_as::<usize>()
        .map_err(|_| Error::Buffer)?;
    let mut elements = Vec::with_capacity(count);
    let mut cursor = payload;
    for _ in 0..count {
        let (value, consumed) = T::unpack_from(cursor)?;
        elements.push(value);
        cursor = &cursor[consumed..];
    }
    Ok(elements)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_tags_are_not_packed() {
        assert!(!f64::equivalent_wire_tag().must_be_packed());
        assert!(!u8::equivalent_wire_tag().must_be_packed());
        assert!(!char::equivalent_wire_tag().must_be_packed());
        assert!(String::equivalent_wire_tag().must_be_packed());
    }

    #[test]
    fn primitive_roundtrip() {
        let values = [-3.5f64, 0.0, 1.25e300];
        let bytes = encode_slice(&values).unwrap();
        let back: Vec<f64> = decode_vec(&bytes, 3).unwrap();
        assert_eq!(&values[..], &back[..]);
    }

    #[test]
    fn packed_roundtrip() {
        let values = [String::from("alpha"), String::new(), String::from("γ")];
        let bytes = encode_slice(&values).unwrap();
        let back: Vec<String> = decode_vec(&bytes, 3).unwrap();
        assert_eq!(&values[..], &back[..]);
    }

    #[test]
    fn truncated_payload_is_a_buffer_error() {
        let bytes = encode_slice(&[1u64, 2]).unwrap();
        let short = &bytes[..bytes.len() - 1];
        assert_eq!(decode_vec::<u64>(short, 2), Err(Error::Buffer));
    }

    #[test]
    fn scalar_and_slice_buffers_count() {
        let x = 1.0f32;
        assert_eq!(Buffer::count(&x), 1);
        let xs = [1u32, 2, 3];
        assert_eq!(Buffer::count(&xs[..]), 3);
    }
}
