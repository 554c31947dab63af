/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! `uavcan.pnp`: plug-and-play node ID allocation, version 1 (CAN classic).

use crate::transport::{NodeId, SubjectId};

use super::{DecodeError, Message, Object, Reader, Writer};

/// `uavcan.pnp.NodeIDAllocationData.1.0`
///
/// Anonymous nodes publish this with their unique-ID hash and an empty
/// `allocated_node_id`; the allocator responds on the same subject with the
/// ID it granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeIdAllocationData {
    /// 48-bit CRC of the node's 128-bit unique ID.
    pub unique_id_hash: u64,
    pub allocated_node_id: Option<NodeId>,
}

impl Message for NodeIdAllocationData {
    const SUBJECT: SubjectId = match SubjectId::new(8166) {
        Some(id) => id,
        None => unreachable!(),
    };
    const NAME: &'static str = "uavcan.pnp.NodeIDAllocationData.1.0";
}

impl Object for NodeIdAllocationData {
    fn encode(&self, writer: &mut Writer) {
        writer.uint(self.unique_id_hash & 0xFFFF_FFFF_FFFF, 6);
        match self.allocated_node_id {
            Some(node) => {
                writer.length(1, 1);
                writer.u16(u16::from(node.get()));
            }
            None => writer.length(0, 1),
        }
    }

    fn decode(reader: &mut Reader) -> Result<Self, DecodeError> {
        let unique_id_hash = reader.uint(6);
        let allocated_node_id = match reader.length(1)? {
            0 => None,
            _ => {
                let raw = reader.u16();
                let raw = u8::try_from(raw).map_err(|_| DecodeError::BadValue("allocated_node_id"))?;
                Some(NodeId::new(raw).ok_or(DecodeError::BadValue("allocated_node_id"))?)
            }
        };
        Ok(Self {
            unique_id_hash,
            allocated_node_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Object;

    #[test]
    fn request_has_no_allocated_id() {
        let request = NodeIdAllocationData {
            unique_id_hash: 0xAABB_CCDD_EEFF,
            allocated_node_id: None,
        };
        let payload = request.to_payload();
        assert_eq!(payload, vec![0xFF, 0xEE, 0xDD, 0xCC, 0xBB, 0xAA, 0]);
        assert_eq!(NodeIdAllocationData::from_payload(&payload).unwrap(), request);
    }

    #[test]
    fn response_round_trip() {
        let response = NodeIdAllocationData {
            unique_id_hash: 42,
            allocated_node_id: NodeId::new(125),
        };
        let payload = response.to_payload();
        assert_eq!(payload.len(), 9);
        assert_eq!(NodeIdAllocationData::from_payload(&payload).unwrap(), response);
    }

    #[test]
    fn out_of_range_allocation_is_rejected() {
        let payload = [0, 0, 0, 0, 0, 0, 1, 200, 0];
        assert_eq!(
            NodeIdAllocationData::from_payload(&payload),
            Err(DecodeError::BadValue("allocated_node_id"))
        );
    }
}
