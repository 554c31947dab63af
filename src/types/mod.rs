/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! Native codecs for the standard `uavcan` data types the library speaks.
//!
//! The serialization follows DSDL v1: little-endian integers, implicit array
//! length prefixes sized to the array capacity, and composite fields aligned
//! to byte boundaries. Only the types needed for device interaction are
//! implemented; there is no DSDL compiler involved.

pub mod diagnostic;
pub mod file;
pub mod node;
pub mod pnp;
pub mod register;

pub use diagnostic::{Record, Severity};
pub use file::{FileRead, ReadRequest, ReadResponse};
pub use node::{
    ExecuteCommand, ExecuteCommandRequest, ExecuteCommandResponse, GetInfo, GetInfoRequest, GetInfoResponse, Health,
    Heartbeat, Mode, Version,
};
pub use pnp::NodeIdAllocationData;
pub use register::{AccessRequest, AccessResponse, ListRequest, ListResponse, RegisterAccess, RegisterList, Value};

use crate::transport::{ServiceId, SubjectId};

/// Deserialization failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("payload truncated: needed {needed} more bytes")]
    Truncated { needed: usize },
    #[error("array length {length} exceeds capacity {capacity}")]
    BadLength { length: usize, capacity: usize },
    #[error("invalid union tag {0}")]
    BadUnionTag(u8),
    #[error("invalid value for field '{0}'")]
    BadValue(&'static str),
}

/// Any serializable DSDL object (messages, requests, responses).
pub trait Object: Sized + Send + 'static {
    fn encode(&self, writer: &mut Writer);
    fn decode(reader: &mut Reader) -> Result<Self, DecodeError>;

    fn to_payload(&self) -> Vec<u8> {
        let mut writer = Writer::default();
        self.encode(&mut writer);
        writer.into_bytes()
    }

    fn from_payload(payload: &[u8]) -> Result<Self, DecodeError> {
        Self::decode(&mut Reader::new(payload))
    }
}

/// A fixed-subject Cyphal message type. The codec lives on [`Object`]; this
/// trait only binds it to a subject.
pub trait Message: Object {
    /// Default subject ID assigned by the standard.
    const SUBJECT: SubjectId;
    /// Full DSDL type name and version, e.g. `uavcan.node.Heartbeat.1.0`.
    const NAME: &'static str;
}

/// A Cyphal RPC service type: a request/response pair on a fixed service ID.
pub trait Service: Send + 'static {
    const SERVICE: ServiceId;
    const NAME: &'static str;

    type Request: Object;
    type Response: Object;
}

/// Little-endian byte sink.
#[derive(Debug, Default)]
pub struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    pub fn u64(&mut self, value: u64) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }

    /// Truncated unsigned integer of `bytes` bytes, little-endian.
    pub fn uint(&mut self, value: u64, bytes: usize) {
        self.bytes.extend_from_slice(&value.to_le_bytes()[..bytes]);
    }

    pub fn raw(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    /// Variable-length byte array with a length prefix sized to `capacity`.
    pub fn bytes(&mut self, bytes: &[u8], capacity: usize) {
        debug_assert!(bytes.len() <= capacity);
        self.length(bytes.len(), capacity);
        self.raw(bytes);
    }

    /// Implicit array length prefix: the smallest standard unsigned integer
    /// able to represent the capacity.
    pub fn length(&mut self, length: usize, capacity: usize) {
        if capacity < 256 {
            self.u8(length as u8);
        } else {
            self.u16(length as u16);
        }
    }
}

/// Little-endian byte source.
#[derive(Debug)]
pub struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len()
    }

    /// Implicit zero extension: a truncated payload reads as zeros, which is
    /// how DSDL handles extent-padded and minimized transfers.
    pub fn take(&mut self, count: usize) -> Vec<u8> {
        let available = count.min(self.bytes.len());
        let (head, tail) = self.bytes.split_at(available);
        self.bytes = tail;
        let mut out = head.to_vec();
        out.resize(count, 0);
        out
    }

    pub fn u8(&mut self) -> u8 {
        self.take(1)[0]
    }

    pub fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take(2).try_into().unwrap())
    }

    pub fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take(4).try_into().unwrap())
    }

    pub fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take(8).try_into().unwrap())
    }

    /// Truncated unsigned integer of `bytes` bytes, little-endian.
    pub fn uint(&mut self, bytes: usize) -> u64 {
        let mut buf = [0u8; 8];
        buf[..bytes].copy_from_slice(&self.take(bytes));
        u64::from_le_bytes(buf)
    }

    pub fn length(&mut self, capacity: usize) -> Result<usize, DecodeError> {
        let length = if capacity < 256 { usize::from(self.u8()) } else { usize::from(self.u16()) };
        if length > capacity {
            return Err(DecodeError::BadLength { length, capacity });
        }
        Ok(length)
    }

    pub fn bytes(&mut self, capacity: usize) -> Result<Vec<u8>, DecodeError> {
        let length = self.length(capacity)?;
        Ok(self.take(length))
    }
}

/// IEEE 754 binary16 conversion, used by `real16` register values.
pub(crate) mod f16 {
    pub fn to_f32(bits: u16) -> f32 {
        let sign = u32::from(bits >> 15) << 31;
        let exponent = (bits >> 10) & 0x1F;
        let mantissa = u32::from(bits & 0x3FF);
        let magnitude = match exponent {
            0 => {
                if mantissa == 0 {
                    0
                } else {
                    // Subnormal: renormalize.
                    let shift = mantissa.leading_zeros() - 21;
                    let mantissa = (mantissa << (shift + 1)) & 0x3FF;
                    let exponent = 127 - 15 - shift;
                    exponent << 23 | mantissa << 13
                }
            }
            0x1F => 0xFF << 23 | mantissa << 13,
            _ => (u32::from(exponent) + 127 - 15) << 23 | mantissa << 13,
        };
        f32::from_bits(sign | magnitude)
    }

    pub fn from_f32(value: f32) -> u16 {
        let bits = value.to_bits();
        let sign = ((bits >> 31) as u16) << 15;
        let exponent = ((bits >> 23) & 0xFF) as i32;
        let mantissa = bits & 0x7F_FFFF;
        if exponent == 0xFF {
            // Inf / NaN.
            return sign | 0x7C00 | if mantissa != 0 { 0x200 } else { 0 };
        }
        let unbiased = exponent - 127;
        if unbiased > 15 {
            return sign | 0x7C00; // overflow to infinity
        }
        if unbiased >= -14 {
            return sign | (((unbiased + 15) as u16) << 10) | (mantissa >> 13) as u16;
        }
        if unbiased >= -24 {
            // Subnormal half.
            let mantissa = (mantissa | 0x80_0000) >> (-(unbiased + 14) + 13 + 1);
            return sign | mantissa as u16;
        }
        sign // underflow to zero
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_prefix_width_follows_capacity() {
        let mut writer = Writer::default();
        writer.bytes(b"ab", 255);
        writer.bytes(b"cd", 256);
        assert_eq!(writer.into_bytes(), vec![2, b'a', b'b', 2, 0, b'c', b'd']);
    }

    #[test]
    fn truncated_payload_zero_extends() {
        let mut reader = Reader::new(&[0xAA]);
        assert_eq!(reader.u32(), 0xAA);
        assert_eq!(reader.u8(), 0);
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut reader = Reader::new(&[200, 0, 0]);
        assert_eq!(
            reader.length(100),
            Err(DecodeError::BadLength { length: 200, capacity: 100 })
        );
    }
}
