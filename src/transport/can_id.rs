/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! 29-bit extended CAN ID codec for Cyphal/CAN v1.

use super::{NodeId, Priority, ServiceId, SubjectId};

const CAN_ID_MASK: u32 = lsb_mask(29);
const NODE_ID_MASK: u32 = lsb_mask(7);
const SUBJECT_ID_MASK: u32 = lsb_mask(13);
const SERVICE_ID_MASK: u32 = lsb_mask(9);

const PRIORITY_OFFSET: u32 = 26;
const SOURCE_OFFSET: u32 = 0;
const MSG_SUBJECT_OFFSET: u32 = 8;
const SRV_DESTINATION_OFFSET: u32 = 7;
const SRV_SERVICE_OFFSET: u32 = 14;

const SERVICE_FLAG: u32 = 1 << 25;
const RES_23_FLAG: u32 = 1 << 23;
const MSG_ANONYMOUS_FLAG: u32 = 1 << 24;
const MSG_RES_21_FLAG: u32 = 1 << 21;
const MSG_RES_22_FLAG: u32 = 1 << 22;
const MSG_RES_7_FLAG: u32 = 1 << 7;
const SRV_REQUEST_FLAG: u32 = 1 << 24;

const fn lsb_mask(n: u32) -> u32 {
    u32::MAX >> (u32::BITS - n)
}

/// Kind of the transfer a frame belongs to, with its data specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferKind {
    Message { subject: SubjectId },
    Request { service: ServiceId, destination: NodeId },
    Response { service: ServiceId, destination: NodeId },
}

/// Decoded semantic content of a 29-bit Cyphal/CAN frame ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub priority: Priority,
    pub kind: TransferKind,
    /// Source node ID, `None` for anonymous messages. The 7 source bits of an
    /// anonymous frame carry a pseudo-random value used only for arbitration.
    pub source: Option<NodeId>,
}

impl FrameHeader {
    /// Encodes the header into a raw 29-bit CAN ID.
    ///
    /// For anonymous messages, `entropy` fills the source field.
    pub fn encode(&self, entropy: u8) -> u32 {
        let priority = u32::from(u8::from(self.priority)) << PRIORITY_OFFSET;

        match self.kind {
            TransferKind::Message { subject } => {
                let source = match self.source {
                    Some(node) => u32::from(node.get()),
                    None => u32::from(entropy) & NODE_ID_MASK,
                };
                let anonymous = if self.source.is_none() { MSG_ANONYMOUS_FLAG } else { 0 };
                priority
                    | anonymous
                    | MSG_RES_21_FLAG
                    | MSG_RES_22_FLAG
                    | u32::from(subject.get()) << MSG_SUBJECT_OFFSET
                    | source << SOURCE_OFFSET
            }
            TransferKind::Request { service, destination } => {
                let source = self.source.map(NodeId::get).unwrap_or(0);
                priority
                    | SERVICE_FLAG
                    | SRV_REQUEST_FLAG
                    | u32::from(service.get()) << SRV_SERVICE_OFFSET
                    | u32::from(destination.get()) << SRV_DESTINATION_OFFSET
                    | u32::from(source) << SOURCE_OFFSET
            }
            TransferKind::Response { service, destination } => {
                let source = self.source.map(NodeId::get).unwrap_or(0);
                priority
                    | SERVICE_FLAG
                    | u32::from(service.get()) << SRV_SERVICE_OFFSET
                    | u32::from(destination.get()) << SRV_DESTINATION_OFFSET
                    | u32::from(source) << SOURCE_OFFSET
            }
        }
    }

    /// Decodes a raw 29-bit CAN ID. Returns `None` for malformed IDs
    /// (reserved bit 23 set, or service frames with reserved patterns).
    pub fn decode(can_id: u32) -> Option<Self> {
        let can_id = can_id & CAN_ID_MASK;
        if can_id & RES_23_FLAG != 0 {
            return None;
        }

        let priority = Priority::from_code_truncating((can_id >> PRIORITY_OFFSET) as u8);
        let source_bits = NodeId::from_truncating((can_id >> SOURCE_OFFSET) as u8);

        if can_id & SERVICE_FLAG == 0 {
            if can_id & MSG_RES_7_FLAG != 0 {
                return None;
            }
            let subject = SubjectId::from_truncating((can_id >> MSG_SUBJECT_OFFSET) as u16);
            let source = if can_id & MSG_ANONYMOUS_FLAG != 0 { None } else { Some(source_bits) };
            Some(Self {
                priority,
                kind: TransferKind::Message { subject },
                source,
            })
        } else {
            let service = ServiceId::from_truncating((can_id >> SRV_SERVICE_OFFSET) as u16);
            let destination = NodeId::from_truncating((can_id >> SRV_DESTINATION_OFFSET) as u8);
            let kind = if can_id & SRV_REQUEST_FLAG != 0 {
                TransferKind::Request { service, destination }
            } else {
                TransferKind::Response { service, destination }
            };
            Some(Self {
                priority,
                kind,
                source: Some(source_bits),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(id: u16) -> SubjectId {
        SubjectId::new(id).unwrap()
    }

    fn service(id: u16) -> ServiceId {
        ServiceId::new(id).unwrap()
    }

    fn node(id: u8) -> NodeId {
        NodeId::new(id).unwrap()
    }

    #[test]
    fn message_round_trip() {
        let header = FrameHeader {
            priority: Priority::Nominal,
            kind: TransferKind::Message { subject: subject(7509) },
            source: Some(node(42)),
        };
        let decoded = FrameHeader::decode(header.encode(0)).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn anonymous_message_discards_entropy() {
        let header = FrameHeader {
            priority: Priority::Low,
            kind: TransferKind::Message { subject: subject(8166) },
            source: None,
        };
        let decoded = FrameHeader::decode(header.encode(0x55)).unwrap();
        assert_eq!(decoded.source, None);
        assert_eq!(decoded.kind, header.kind);
    }

    #[test]
    fn request_and_response_round_trip() {
        for (kind, flag_expected) in [
            (TransferKind::Request { service: service(430), destination: node(9) }, true),
            (TransferKind::Response { service: service(430), destination: node(9) }, false),
        ] {
            let header = FrameHeader {
                priority: Priority::High,
                kind,
                source: Some(node(127)),
            };
            let raw = header.encode(0);
            assert_eq!(raw & SRV_REQUEST_FLAG != 0, flag_expected);
            assert_eq!(FrameHeader::decode(raw).unwrap(), header);
        }
    }

    #[test]
    fn reserved_bit_23_rejected() {
        let header = FrameHeader {
            priority: Priority::Nominal,
            kind: TransferKind::Message { subject: subject(100) },
            source: Some(node(1)),
        };
        assert!(FrameHeader::decode(header.encode(0) | RES_23_FLAG).is_none());
    }

    #[test]
    fn heartbeat_id_matches_reference() {
        // uavcan.node.Heartbeat from node 42 at nominal priority, a value
        // that can be verified against candump output of any v1 node.
        let header = FrameHeader {
            priority: Priority::Nominal,
            kind: TransferKind::Message { subject: subject(7509) },
            source: Some(node(42)),
        };
        assert_eq!(header.encode(0), 0x107D552A);
    }
}
