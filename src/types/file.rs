/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! `uavcan.file`: the Read service used by devices to pull firmware images.

use crate::transport::ServiceId;

use super::{DecodeError, Object, Reader, Service, Writer};

/// `uavcan.file.Error.1.0` codes, POSIX-flavored.
pub mod error {
    pub const OK: u16 = 0;
    pub const UNKNOWN: u16 = 65535;
    pub const NOT_FOUND: u16 = 2;
    pub const IO_ERROR: u16 = 5;
    pub const ACCESS_DENIED: u16 = 13;
    pub const IS_DIRECTORY: u16 = 21;
    pub const INVALID_VALUE: u16 = 22;
    pub const FILE_TOO_LARGE: u16 = 27;
    pub const OUT_OF_SPACE: u16 = 28;
    pub const NOT_SUPPORTED: u16 = 38;
}

/// `uavcan.file.Read.1.1` service marker.
pub struct FileRead;

impl FileRead {
    /// Maximum data bytes per response, `uavcan.primitive.Unstructured`-sized.
    pub const CHUNK_CAPACITY: usize = 256;
}

impl Service for FileRead {
    const SERVICE: ServiceId = match ServiceId::new(408) {
        Some(id) => id,
        None => unreachable!(),
    };
    const NAME: &'static str = "uavcan.file.Read.1.1";

    type Request = ReadRequest;
    type Response = ReadResponse;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    /// Byte offset into the file, 40 bits on the wire.
    pub offset: u64,
    pub path: String,
}

impl ReadRequest {
    const PATH_CAPACITY: usize = 255;
}

impl Object for ReadRequest {
    fn encode(&self, writer: &mut Writer) {
        writer.uint(self.offset, 5);
        writer.bytes(self.path.as_bytes(), Self::PATH_CAPACITY);
    }

    fn decode(reader: &mut Reader) -> Result<Self, DecodeError> {
        Ok(Self {
            offset: reader.uint(5),
            path: String::from_utf8_lossy(&reader.bytes(Self::PATH_CAPACITY)?).into_owned(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResponse {
    /// One of the [`error`] codes; [`error::OK`] on success.
    pub error: u16,
    /// A short read (fewer than [`FileRead::CHUNK_CAPACITY`] bytes) marks the
    /// end of the file.
    pub data: Vec<u8>,
}

impl ReadResponse {
    pub fn success(data: Vec<u8>) -> Self {
        Self { error: error::OK, data }
    }

    pub fn failure(error: u16) -> Self {
        Self { error, data: Vec::new() }
    }
}

impl Object for ReadResponse {
    fn encode(&self, writer: &mut Writer) {
        writer.u16(self.error);
        writer.bytes(&self.data, FileRead::CHUNK_CAPACITY);
    }

    fn decode(reader: &mut Reader) -> Result<Self, DecodeError> {
        Ok(Self {
            error: reader.u16(),
            data: reader.bytes(FileRead::CHUNK_CAPACITY)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_request_wire_format() {
        let request = ReadRequest {
            offset: 0x01_0203_0405,
            path: "fw.app.bin".into(),
        };
        let payload = request.to_payload();
        assert_eq!(&payload[..5], &[0x05, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(payload[5], 10);
        assert_eq!(ReadRequest::from_payload(&payload).unwrap(), request);
    }

    #[test]
    fn read_response_round_trip() {
        let response = ReadResponse::success((0..=255).collect());
        let payload = response.to_payload();
        // error (2) + length (2) + 256 data bytes
        assert_eq!(payload.len(), 260);
        assert_eq!(ReadResponse::from_payload(&payload).unwrap(), response);

        let failure = ReadResponse::failure(error::NOT_FOUND);
        assert_eq!(failure.to_payload(), vec![2, 0, 0, 0]);
    }
}
