/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! `uavcan.register`: the Access and List services and the Value union.

use std::fmt;

use crate::transport::ServiceId;

use super::{f16, DecodeError, Object, Reader, Service, Writer};

const NAME_CAPACITY: usize = 255;

/// `uavcan.register.Value.1.0` union.
///
/// Array capacities follow the standard definition: 256 bytes of string or
/// unstructured data, 2048 bits, and as many integers or reals as fit the
/// same footprint.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Empty,
    String(String),
    Unstructured(Vec<u8>),
    Bit(Vec<bool>),
    Integer64(Vec<i64>),
    Integer32(Vec<i32>),
    Integer16(Vec<i16>),
    Integer8(Vec<i8>),
    Natural64(Vec<u64>),
    Natural32(Vec<u32>),
    Natural16(Vec<u16>),
    Natural8(Vec<u8>),
    Real64(Vec<f64>),
    Real32(Vec<f32>),
    Real16(Vec<f32>),
}

impl Value {
    /// DSDL type expression of the stored variant, e.g. `natural16[3]`.
    pub fn dtype(&self) -> String {
        match self {
            Value::Empty => "empty".into(),
            Value::String(_) => "string".into(),
            Value::Unstructured(data) => format!("unstructured[{}]", data.len()),
            Value::Bit(values) => format!("bit[{}]", values.len()),
            Value::Integer64(values) => format!("int64[{}]", values.len()),
            Value::Integer32(values) => format!("int32[{}]", values.len()),
            Value::Integer16(values) => format!("int16[{}]", values.len()),
            Value::Integer8(values) => format!("int8[{}]", values.len()),
            Value::Natural64(values) => format!("uint64[{}]", values.len()),
            Value::Natural32(values) => format!("uint32[{}]", values.len()),
            Value::Natural16(values) => format!("uint16[{}]", values.len()),
            Value::Natural8(values) => format!("uint8[{}]", values.len()),
            Value::Real64(values) => format!("float64[{}]", values.len()),
            Value::Real32(values) => format!("float32[{}]", values.len()),
            Value::Real16(values) => format!("float16[{}]", values.len()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    /// Number of array elements, 0 for empty and 1 for strings.
    pub fn len(&self) -> usize {
        match self {
            Value::Empty => 0,
            Value::String(_) | Value::Unstructured(_) => 1,
            Value::Bit(values) => values.len(),
            Value::Integer64(values) => values.len(),
            Value::Integer32(values) => values.len(),
            Value::Integer16(values) => values.len(),
            Value::Integer8(values) => values.len(),
            Value::Natural64(values) => values.len(),
            Value::Natural32(values) => values.len(),
            Value::Natural16(values) => values.len(),
            Value::Natural8(values) => values.len(),
            Value::Real64(values) => values.len(),
            Value::Real32(values) => values.len(),
            Value::Real16(values) => values.len(),
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Value::Empty => 0,
            Value::String(_) => 1,
            Value::Unstructured(_) => 2,
            Value::Bit(_) => 3,
            Value::Integer64(_) => 4,
            Value::Integer32(_) => 5,
            Value::Integer16(_) => 6,
            Value::Integer8(_) => 7,
            Value::Natural64(_) => 8,
            Value::Natural32(_) => 9,
            Value::Natural16(_) => 10,
            Value::Natural8(_) => 11,
            Value::Real64(_) => 12,
            Value::Real32(_) => 13,
            Value::Real16(_) => 14,
        }
    }
}

impl Object for Value {
    fn encode(&self, writer: &mut Writer) {
        writer.u8(self.tag());
        match self {
            Value::Empty => {}
            Value::String(text) => writer.bytes(text.as_bytes(), 256),
            Value::Unstructured(data) => writer.bytes(data, 256),
            Value::Bit(values) => {
                writer.length(values.len(), 2048);
                let mut byte = 0u8;
                for (index, &bit) in values.iter().enumerate() {
                    byte |= u8::from(bit) << (index % 8);
                    if index % 8 == 7 {
                        writer.u8(byte);
                        byte = 0;
                    }
                }
                if values.len() % 8 != 0 {
                    writer.u8(byte);
                }
            }
            Value::Integer64(values) => {
                writer.length(values.len(), 32);
                values.iter().for_each(|&value| writer.u64(value as u64));
            }
            Value::Integer32(values) => {
                writer.length(values.len(), 64);
                values.iter().for_each(|&value| writer.u32(value as u32));
            }
            Value::Integer16(values) => {
                writer.length(values.len(), 128);
                values.iter().for_each(|&value| writer.u16(value as u16));
            }
            Value::Integer8(values) => {
                writer.length(values.len(), 256);
                values.iter().for_each(|&value| writer.u8(value as u8));
            }
            Value::Natural64(values) => {
                writer.length(values.len(), 32);
                values.iter().for_each(|&value| writer.u64(value));
            }
            Value::Natural32(values) => {
                writer.length(values.len(), 64);
                values.iter().for_each(|&value| writer.u32(value));
            }
            Value::Natural16(values) => {
                writer.length(values.len(), 128);
                values.iter().for_each(|&value| writer.u16(value));
            }
            Value::Natural8(values) => {
                writer.length(values.len(), 256);
                values.iter().for_each(|&value| writer.u8(value));
            }
            Value::Real64(values) => {
                writer.length(values.len(), 32);
                values.iter().for_each(|&value| writer.u64(value.to_bits()));
            }
            Value::Real32(values) => {
                writer.length(values.len(), 64);
                values.iter().for_each(|&value| writer.u32(value.to_bits()));
            }
            Value::Real16(values) => {
                writer.length(values.len(), 128);
                values.iter().for_each(|&value| writer.u16(f16::from_f32(value)));
            }
        }
    }

    fn decode(reader: &mut Reader) -> Result<Self, DecodeError> {
        let tag = reader.u8();
        let value = match tag {
            0 => Value::Empty,
            1 => Value::String(String::from_utf8_lossy(&reader.bytes(256)?).into_owned()),
            2 => Value::Unstructured(reader.bytes(256)?),
            3 => {
                let length = reader.length(2048)?;
                let packed = reader.take(length.div_ceil(8));
                Value::Bit((0..length).map(|i| packed[i / 8] >> (i % 8) & 1 != 0).collect())
            }
            4 => {
                let length = reader.length(32)?;
                Value::Integer64((0..length).map(|_| reader.u64() as i64).collect())
            }
            5 => {
                let length = reader.length(64)?;
                Value::Integer32((0..length).map(|_| reader.u32() as i32).collect())
            }
            6 => {
                let length = reader.length(128)?;
                Value::Integer16((0..length).map(|_| reader.u16() as i16).collect())
            }
            7 => {
                let length = reader.length(256)?;
                Value::Integer8((0..length).map(|_| reader.u8() as i8).collect())
            }
            8 => {
                let length = reader.length(32)?;
                Value::Natural64((0..length).map(|_| reader.u64()).collect())
            }
            9 => {
                let length = reader.length(64)?;
                Value::Natural32((0..length).map(|_| reader.u32()).collect())
            }
            10 => {
                let length = reader.length(128)?;
                Value::Natural16((0..length).map(|_| reader.u16()).collect())
            }
            11 => {
                let length = reader.length(256)?;
                Value::Natural8(reader.take(length))
            }
            12 => {
                let length = reader.length(32)?;
                Value::Real64((0..length).map(|_| f64::from_bits(reader.u64())).collect())
            }
            13 => {
                let length = reader.length(64)?;
                Value::Real32((0..length).map(|_| f32::from_bits(reader.u32())).collect())
            }
            14 => {
                let length = reader.length(128)?;
                Value::Real16((0..length).map(|_| f16::to_f32(reader.u16())).collect())
            }
            other => return Err(DecodeError::BadUnionTag(other)),
        };
        Ok(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, values: &[T]) -> fmt::Result {
            if values.len() == 1 {
                return values[0].fmt(f);
            }
            write!(f, "[")?;
            for (index, value) in values.iter().enumerate() {
                if index > 0 {
                    write!(f, ", ")?;
                }
                value.fmt(f)?;
            }
            write!(f, "]")
        }

        match self {
            Value::Empty => write!(f, "-"),
            Value::String(text) => write!(f, "{text:?}"),
            Value::Unstructured(data) => {
                for byte in data {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Value::Bit(values) => list(f, &values.iter().map(|&bit| u8::from(bit)).collect::<Vec<_>>()),
            Value::Integer64(values) => list(f, values),
            Value::Integer32(values) => list(f, values),
            Value::Integer16(values) => list(f, values),
            Value::Integer8(values) => list(f, values),
            Value::Natural64(values) => list(f, values),
            Value::Natural32(values) => list(f, values),
            Value::Natural16(values) => list(f, values),
            Value::Natural8(values) => list(f, values),
            Value::Real64(values) => list(f, values),
            Value::Real32(values) => list(f, values),
            Value::Real16(values) => list(f, values),
        }
    }
}

/// `uavcan.register.Access.1.0` service marker.
pub struct RegisterAccess;

impl Service for RegisterAccess {
    const SERVICE: ServiceId = match ServiceId::new(384) {
        Some(id) => id,
        None => unreachable!(),
    };
    const NAME: &'static str = "uavcan.register.Access.1.0";

    type Request = AccessRequest;
    type Response = AccessResponse;
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccessRequest {
    pub name: String,
    /// [`Value::Empty`] performs a pure read.
    pub value: Value,
}

impl AccessRequest {
    pub fn read(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Value::Empty,
        }
    }

    pub fn write(name: impl Into<String>, value: Value) -> Self {
        Self { name: name.into(), value }
    }
}

impl Object for AccessRequest {
    fn encode(&self, writer: &mut Writer) {
        writer.bytes(self.name.as_bytes(), NAME_CAPACITY);
        self.value.encode(writer);
    }

    fn decode(reader: &mut Reader) -> Result<Self, DecodeError> {
        Ok(Self {
            name: String::from_utf8_lossy(&reader.bytes(NAME_CAPACITY)?).into_owned(),
            value: Value::decode(reader)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccessResponse {
    /// Optional time of last modification, microseconds; zero if unknown.
    pub timestamp: u64,
    pub mutable: bool,
    pub persistent: bool,
    /// [`Value::Empty`] if the register does not exist.
    pub value: Value,
}

impl Object for AccessResponse {
    fn encode(&self, writer: &mut Writer) {
        writer.uint(self.timestamp, 7);
        writer.u8(u8::from(self.mutable) | u8::from(self.persistent) << 1);
        self.value.encode(writer);
    }

    fn decode(reader: &mut Reader) -> Result<Self, DecodeError> {
        let timestamp = reader.uint(7);
        let flags = reader.u8();
        Ok(Self {
            timestamp,
            mutable: flags & 1 != 0,
            persistent: flags & 2 != 0,
            value: Value::decode(reader)?,
        })
    }
}

/// `uavcan.register.List.1.0` service marker.
pub struct RegisterList;

impl Service for RegisterList {
    const SERVICE: ServiceId = match ServiceId::new(385) {
        Some(id) => id,
        None => unreachable!(),
    };
    const NAME: &'static str = "uavcan.register.List.1.0";

    type Request = ListRequest;
    type Response = ListResponse;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListRequest {
    pub index: u16,
}

impl Object for ListRequest {
    fn encode(&self, writer: &mut Writer) {
        writer.u16(self.index);
    }

    fn decode(reader: &mut Reader) -> Result<Self, DecodeError> {
        Ok(Self { index: reader.u16() })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListResponse {
    /// Empty once the index walks past the last register.
    pub name: String,
}

impl Object for ListResponse {
    fn encode(&self, writer: &mut Writer) {
        writer.bytes(self.name.as_bytes(), NAME_CAPACITY);
    }

    fn decode(reader: &mut Reader) -> Result<Self, DecodeError> {
        Ok(Self {
            name: String::from_utf8_lossy(&reader.bytes(NAME_CAPACITY)?).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_round_trips() {
        let values = [
            Value::Empty,
            Value::String("uavcan.node.id".into()),
            Value::Unstructured(vec![1, 2, 3]),
            Value::Bit(vec![true, false, true, true, false, false, true, false, true]),
            Value::Integer64(vec![-5, 7]),
            Value::Integer8(vec![-128, 127]),
            Value::Natural16(vec![125]),
            Value::Natural8(vec![0, 255]),
            Value::Real64(vec![1.5, -2.25]),
            Value::Real32(vec![3.5]),
            Value::Real16(vec![1.0, -0.5]),
        ];
        for value in values {
            let decoded = Value::from_payload(&value.to_payload()).unwrap();
            assert_eq!(decoded, value, "{}", value.dtype());
        }
    }

    #[test]
    fn string_value_uses_16_bit_length() {
        let value = Value::String("ab".into());
        assert_eq!(value.to_payload(), vec![1, 2, 0, b'a', b'b']);
    }

    #[test]
    fn natural16_value_uses_8_bit_length() {
        let value = Value::Natural16(vec![125]);
        assert_eq!(value.to_payload(), vec![10, 1, 125, 0]);
    }

    #[test]
    fn bit_packing_is_lsb_first() {
        let value = Value::Bit(vec![true, false, false, true]);
        assert_eq!(value.to_payload(), vec![3, 4, 0, 0b1001]);
    }

    #[test]
    fn unknown_union_tag_is_rejected() {
        assert_eq!(Value::from_payload(&[15]), Err(DecodeError::BadUnionTag(15)));
    }

    #[test]
    fn access_response_flags_share_one_byte() {
        let response = AccessResponse {
            timestamp: 0,
            mutable: true,
            persistent: true,
            value: Value::Empty,
        };
        let payload = response.to_payload();
        // timestamp (7) + flags (1) + union tag (1)
        assert_eq!(payload.len(), 9);
        assert_eq!(payload[7], 0b11);
        assert_eq!(AccessResponse::from_payload(&payload).unwrap(), response);
    }

    #[test]
    fn list_walks_by_index() {
        let request = ListRequest { index: 260 };
        assert_eq!(request.to_payload(), vec![4, 1]);
        let response = ListResponse { name: "".into() };
        assert_eq!(response.to_payload(), vec![0]);
    }
}
