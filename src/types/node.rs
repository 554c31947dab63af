/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! `uavcan.node`: heartbeat, node info, and remote command execution.

use std::fmt;

use crate::transport::{ServiceId, SubjectId};

use super::{DecodeError, Message, Object, Reader, Service, Writer};

/// `uavcan.node.Health.1.0`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Health {
    Nominal = 0,
    Advisory = 1,
    Caution = 2,
    Warning = 3,
}

impl Health {
    fn from_code(code: u8) -> Result<Self, DecodeError> {
        match code & 0x3 {
            0 => Ok(Health::Nominal),
            1 => Ok(Health::Advisory),
            2 => Ok(Health::Caution),
            _ => Ok(Health::Warning),
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Health::Nominal => "NOMINAL",
            Health::Advisory => "ADVISORY",
            Health::Caution => "CAUTION",
            Health::Warning => "WARNING",
        };
        f.write_str(name)
    }
}

/// `uavcan.node.Mode.1.0`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Mode {
    Operational = 0,
    Initialization = 1,
    Maintenance = 2,
    SoftwareUpdate = 3,
}

impl Mode {
    fn from_code(code: u8) -> Result<Self, DecodeError> {
        match code & 0x7 {
            0 => Ok(Mode::Operational),
            1 => Ok(Mode::Initialization),
            2 => Ok(Mode::Maintenance),
            3 => Ok(Mode::SoftwareUpdate),
            _ => Err(DecodeError::BadValue("mode")),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Operational => "OPERATIONAL",
            Mode::Initialization => "INITIALIZATION",
            Mode::Maintenance => "MAINTENANCE",
            Mode::SoftwareUpdate => "SOFTWARE_UPDATE",
        };
        f.write_str(name)
    }
}

/// `uavcan.node.Heartbeat.1.0`, published at 1 Hz by every non-anonymous node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub uptime: u32,
    pub health: Health,
    pub mode: Mode,
    pub vendor_specific_status_code: u8,
}

impl Heartbeat {
    pub const MAX_PUBLICATION_PERIOD: f64 = 1.0;
    pub const OFFLINE_TIMEOUT: f64 = 3.0;
}

impl Message for Heartbeat {
    const SUBJECT: SubjectId = match SubjectId::new(7509) {
        Some(id) => id,
        None => unreachable!(),
    };
    const NAME: &'static str = "uavcan.node.Heartbeat.1.0";
}

impl Object for Heartbeat {
    fn encode(&self, writer: &mut Writer) {
        writer.u32(self.uptime);
        writer.u8(self.health as u8);
        writer.u8(self.mode as u8);
        writer.u8(self.vendor_specific_status_code);
    }

    fn decode(reader: &mut Reader) -> Result<Self, DecodeError> {
        Ok(Self {
            uptime: reader.u32(),
            health: Health::from_code(reader.u8())?,
            mode: Mode::from_code(reader.u8())?,
            vendor_specific_status_code: reader.u8(),
        })
    }
}

/// `uavcan.node.Version.1.0`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    fn encode(&self, writer: &mut Writer) {
        writer.u8(self.major);
        writer.u8(self.minor);
    }

    fn decode(reader: &mut Reader) -> Self {
        Self {
            major: reader.u8(),
            minor: reader.u8(),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// `uavcan.node.GetInfo.1.0` service marker.
pub struct GetInfo;

impl Service for GetInfo {
    const SERVICE: ServiceId = match ServiceId::new(430) {
        Some(id) => id,
        None => unreachable!(),
    };
    const NAME: &'static str = "uavcan.node.GetInfo.1.0";

    type Request = GetInfoRequest;
    type Response = GetInfoResponse;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GetInfoRequest;

impl Object for GetInfoRequest {
    fn encode(&self, _writer: &mut Writer) {}

    fn decode(_reader: &mut Reader) -> Result<Self, DecodeError> {
        Ok(Self)
    }
}

/// Static node identity: versions, unique ID, and name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetInfoResponse {
    pub protocol_version: Version,
    pub hardware_version: Version,
    pub software_version: Version,
    pub software_vcs_revision_id: u64,
    pub unique_id: [u8; 16],
    pub name: String,
    pub software_image_crc: Option<u64>,
    pub certificate_of_authenticity: Vec<u8>,
}

impl GetInfoResponse {
    const NAME_CAPACITY: usize = 50;
    const CRC_CAPACITY: usize = 1;
    const CERTIFICATE_CAPACITY: usize = 222;

    /// The unique ID in its canonical hex form, e.g. for table output.
    pub fn unique_id_hex(&self) -> String {
        self.unique_id.iter().map(|byte| format!("{byte:02x}")).collect()
    }
}

impl Object for GetInfoResponse {
    fn encode(&self, writer: &mut Writer) {
        self.protocol_version.encode(writer);
        self.hardware_version.encode(writer);
        self.software_version.encode(writer);
        writer.u64(self.software_vcs_revision_id);
        writer.raw(&self.unique_id);
        writer.bytes(self.name.as_bytes(), Self::NAME_CAPACITY);
        match self.software_image_crc {
            Some(crc) => {
                writer.length(1, Self::CRC_CAPACITY);
                writer.u64(crc);
            }
            None => writer.length(0, Self::CRC_CAPACITY),
        }
        writer.bytes(&self.certificate_of_authenticity, Self::CERTIFICATE_CAPACITY);
    }

    fn decode(reader: &mut Reader) -> Result<Self, DecodeError> {
        let protocol_version = Version::decode(reader);
        let hardware_version = Version::decode(reader);
        let software_version = Version::decode(reader);
        let software_vcs_revision_id = reader.u64();
        let unique_id: [u8; 16] = reader
            .take(16)
            .try_into()
            .map_err(|_| DecodeError::BadValue("unique_id"))?;
        let name = String::from_utf8_lossy(&reader.bytes(Self::NAME_CAPACITY)?).into_owned();
        let software_image_crc = match reader.length(Self::CRC_CAPACITY)? {
            0 => None,
            _ => Some(reader.u64()),
        };
        let certificate_of_authenticity = reader.bytes(Self::CERTIFICATE_CAPACITY)?;
        Ok(Self {
            protocol_version,
            hardware_version,
            software_version,
            software_vcs_revision_id,
            unique_id,
            name,
            software_image_crc,
            certificate_of_authenticity,
        })
    }
}

/// `uavcan.node.ExecuteCommand.1.1` service marker.
pub struct ExecuteCommand;

impl ExecuteCommand {
    pub const COMMAND_RESTART: u16 = 65535;
    pub const COMMAND_POWER_OFF: u16 = 65534;
    pub const COMMAND_BEGIN_SOFTWARE_UPDATE: u16 = 65533;
    pub const COMMAND_FACTORY_RESET: u16 = 65532;
    pub const COMMAND_EMERGENCY_STOP: u16 = 65531;
    pub const COMMAND_STORE_PERSISTENT_STATES: u16 = 65530;
    pub const COMMAND_IDENTIFY: u16 = 65529;
}

impl Service for ExecuteCommand {
    const SERVICE: ServiceId = match ServiceId::new(435) {
        Some(id) => id,
        None => unreachable!(),
    };
    const NAME: &'static str = "uavcan.node.ExecuteCommand.1.1";

    type Request = ExecuteCommandRequest;
    type Response = ExecuteCommandResponse;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteCommandRequest {
    pub command: u16,
    pub parameter: Vec<u8>,
}

impl ExecuteCommandRequest {
    const PARAMETER_CAPACITY: usize = 255;

    pub fn new(command: u16, parameter: impl Into<Vec<u8>>) -> Self {
        Self {
            command,
            parameter: parameter.into(),
        }
    }
}

impl Object for ExecuteCommandRequest {
    fn encode(&self, writer: &mut Writer) {
        writer.u16(self.command);
        writer.bytes(&self.parameter, Self::PARAMETER_CAPACITY);
    }

    fn decode(reader: &mut Reader) -> Result<Self, DecodeError> {
        Ok(Self {
            command: reader.u16(),
            parameter: reader.bytes(Self::PARAMETER_CAPACITY)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteCommandResponse {
    pub status: u8,
    pub output: Vec<u8>,
}

impl ExecuteCommandResponse {
    pub const STATUS_SUCCESS: u8 = 0;
    pub const STATUS_FAILURE: u8 = 1;
    pub const STATUS_NOT_AUTHORIZED: u8 = 2;
    pub const STATUS_BAD_COMMAND: u8 = 3;
    pub const STATUS_BAD_PARAMETER: u8 = 4;
    pub const STATUS_BAD_STATE: u8 = 5;
    pub const STATUS_INTERNAL_ERROR: u8 = 6;

    const OUTPUT_CAPACITY: usize = 46;

    pub fn success() -> Self {
        Self {
            status: Self::STATUS_SUCCESS,
            output: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Self::STATUS_SUCCESS
    }

    /// Human-readable name of the status code.
    pub fn status_name(&self) -> &'static str {
        match self.status {
            Self::STATUS_SUCCESS => "SUCCESS",
            Self::STATUS_FAILURE => "FAILURE",
            Self::STATUS_NOT_AUTHORIZED => "NOT_AUTHORIZED",
            Self::STATUS_BAD_COMMAND => "BAD_COMMAND",
            Self::STATUS_BAD_PARAMETER => "BAD_PARAMETER",
            Self::STATUS_BAD_STATE => "BAD_STATE",
            Self::STATUS_INTERNAL_ERROR => "INTERNAL_ERROR",
            _ => "UNKNOWN",
        }
    }
}

impl Object for ExecuteCommandResponse {
    fn encode(&self, writer: &mut Writer) {
        writer.u8(self.status);
        writer.bytes(&self.output, Self::OUTPUT_CAPACITY);
    }

    fn decode(reader: &mut Reader) -> Result<Self, DecodeError> {
        Ok(Self {
            status: reader.u8(),
            output: reader.bytes(Self::OUTPUT_CAPACITY)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_is_seven_bytes() {
        let heartbeat = Heartbeat {
            uptime: 3601,
            health: Health::Nominal,
            mode: Mode::Operational,
            vendor_specific_status_code: 5,
        };
        let payload = heartbeat.to_payload();
        assert_eq!(payload, vec![0x11, 0x0E, 0, 0, 0, 0, 5]);
        assert_eq!(Heartbeat::from_payload(&payload).unwrap(), heartbeat);
    }

    #[test]
    fn heartbeat_rejects_reserved_mode() {
        let payload = [0, 0, 0, 0, 0, 5, 0];
        assert_eq!(
            Heartbeat::from_payload(&payload),
            Err(DecodeError::BadValue("mode"))
        );
    }

    #[test]
    fn get_info_round_trip() {
        let info = GetInfoResponse {
            protocol_version: Version { major: 1, minor: 0 },
            hardware_version: Version { major: 3, minor: 1 },
            software_version: Version { major: 0, minor: 9 },
            software_vcs_revision_id: 0xDEADBEEF,
            unique_id: [7; 16],
            name: "com.starcopter.aeric.mmb".into(),
            software_image_crc: Some(0x1234_5678_9ABC_DEF0),
            certificate_of_authenticity: vec![],
        };
        let decoded = GetInfoResponse::from_payload(&info.to_payload()).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn get_info_without_crc() {
        let info = GetInfoResponse {
            protocol_version: Version { major: 1, minor: 0 },
            hardware_version: Version::default(),
            software_version: Version::default(),
            software_vcs_revision_id: 0,
            unique_id: [0; 16],
            name: "x".into(),
            software_image_crc: None,
            certificate_of_authenticity: vec![],
        };
        let payload = info.to_payload();
        // versions (6) + vcs (8) + uid (16) + name (1+1) + crc len (1) + cert len (1)
        assert_eq!(payload.len(), 34);
        assert_eq!(GetInfoResponse::from_payload(&payload).unwrap(), info);
    }

    #[test]
    fn execute_command_wire_format() {
        let request = ExecuteCommandRequest::new(ExecuteCommand::COMMAND_RESTART, Vec::new());
        assert_eq!(request.to_payload(), vec![0xFF, 0xFF, 0]);

        let request = ExecuteCommandRequest::new(
            ExecuteCommand::COMMAND_BEGIN_SOFTWARE_UPDATE,
            b"fw.app.bin".to_vec(),
        );
        let payload = request.to_payload();
        assert_eq!(&payload[..3], &[0xFD, 0xFF, 10]);
        assert_eq!(ExecuteCommandRequest::from_payload(&payload).unwrap(), request);
    }

    #[test]
    fn execute_command_status_names() {
        let response = ExecuteCommandResponse {
            status: ExecuteCommandResponse::STATUS_BAD_COMMAND,
            output: b"nope".to_vec(),
        };
        assert!(!response.is_success());
        assert_eq!(response.status_name(), "BAD_COMMAND");
        let decoded = ExecuteCommandResponse::from_payload(&response.to_payload()).unwrap();
        assert_eq!(decoded, response);
    }
}
