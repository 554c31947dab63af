/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! `uavcan.diagnostic`: log records broadcast by remote nodes.

use std::fmt;

use crate::transport::SubjectId;

use super::{DecodeError, Message, Object, Reader, Writer};

/// `uavcan.diagnostic.Severity.1.0`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Severity {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Notice = 3,
    Warning = 4,
    Error = 5,
    Critical = 6,
    Alert = 7,
}

impl Severity {
    pub fn from_code_truncating(code: u8) -> Self {
        match code & 0x7 {
            0 => Severity::Trace,
            1 => Severity::Debug,
            2 => Severity::Info,
            3 => Severity::Notice,
            4 => Severity::Warning,
            5 => Severity::Error,
            6 => Severity::Critical,
            _ => Severity::Alert,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Notice => "NOTICE",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
            Severity::Alert => "ALERT",
        };
        f.write_str(name)
    }
}

/// `uavcan.diagnostic.Record.1.1`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Device-local timestamp in microseconds, zero if unknown.
    pub timestamp: u64,
    pub severity: Severity,
    pub text: String,
}

impl Record {
    const TEXT_CAPACITY: usize = 255;
}

impl Message for Record {
    const SUBJECT: SubjectId = match SubjectId::new(8184) {
        Some(id) => id,
        None => unreachable!(),
    };
    const NAME: &'static str = "uavcan.diagnostic.Record.1.1";
}

impl Object for Record {
    fn encode(&self, writer: &mut Writer) {
        writer.uint(self.timestamp, 7);
        writer.u8(self.severity as u8);
        writer.bytes(self.text.as_bytes(), Self::TEXT_CAPACITY);
    }

    fn decode(reader: &mut Reader) -> Result<Self, DecodeError> {
        Ok(Self {
            timestamp: reader.uint(7),
            severity: Severity::from_code_truncating(reader.u8()),
            text: String::from_utf8_lossy(&reader.bytes(Self::TEXT_CAPACITY)?).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Object;

    #[test]
    fn record_round_trip() {
        let record = Record {
            timestamp: 1_234_567,
            severity: Severity::Warning,
            text: "battery cell imbalance".into(),
        };
        let payload = record.to_payload();
        assert_eq!(payload[7], 4);
        assert_eq!(Record::from_payload(&payload).unwrap(), record);
    }

    #[test]
    fn severity_orders_by_importance() {
        assert!(Severity::Trace < Severity::Info);
        assert!(Severity::Error < Severity::Alert);
        assert_eq!(Severity::from_code_truncating(6), Severity::Critical);
    }
}
