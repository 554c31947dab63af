/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! Plug-and-play node ID allocation.
//!
//! Factory-fresh devices come up anonymously and request a node ID on
//! `uavcan.pnp.NodeIDAllocationData`. The allocator answers with an unused ID,
//! remembering past grants so a device that asks again receives the same ID.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::node::LocalNode;
use crate::transport::{NodeId, Priority};
use crate::types::pnp::NodeIdAllocationData;

/// Highest node ID handed out; allocation walks downward from here. The IDs
/// just below 125 are conventionally kept free for diagnostic tooling.
const HIGHEST_ALLOCATED: u8 = 125;

#[derive(Default)]
struct Table {
    /// Granted IDs by unique-ID hash.
    granted: HashMap<u64, NodeId>,
}

impl Table {
    fn allocate(&mut self, hash: u64, own_id: Option<NodeId>, online: &[NodeId]) -> Option<NodeId> {
        if let Some(&existing) = self.granted.get(&hash) {
            return Some(existing);
        }
        let taken: Vec<NodeId> = self.granted.values().copied().chain(online.iter().copied()).collect();
        let candidate = (0..=HIGHEST_ALLOCATED)
            .rev()
            .filter_map(NodeId::new)
            .find(|id| Some(*id) != own_id && !taken.contains(id))?;
        self.granted.insert(hash, candidate);
        Some(candidate)
    }
}

/// Runs the allocator on the given node until the node shuts down.
///
/// `online` supplies the IDs currently in use on the bus, so the allocator
/// never grants an ID that some node already claimed statically.
pub fn spawn(node: LocalNode, online: impl Fn() -> Vec<NodeId> + Send + 'static) {
    let table = Arc::new(Mutex::new(Table::default()));
    tokio::spawn(async move {
        let mut requests = node.subscribe::<NodeIdAllocationData>();
        while let Some((meta, request)) = requests.recv().await {
            // Only anonymous requests without a granted ID are allocation
            // requests; everything else is another allocator's response.
            if meta.source.is_some() || request.allocated_node_id.is_some() {
                continue;
            }
            let allocated = {
                let mut table = match table.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                table.allocate(request.unique_id_hash, node.id(), &online())
            };
            let Some(allocated) = allocated else {
                tracing::warn!(hash = request.unique_id_hash, "node ID space exhausted");
                continue;
            };
            tracing::info!(hash = format!("{:012x}", request.unique_id_hash), node = %allocated, "allocated node ID");
            let response = NodeIdAllocationData {
                unique_id_hash: request.unique_id_hash,
                allocated_node_id: Some(allocated),
            };
            if let Err(error) = node.publish(&response, Priority::Nominal).await {
                tracing::warn!(%error, "failed to publish allocation response");
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_is_stable_per_hash() {
        let mut table = Table::default();
        let own = NodeId::new(126);
        let first = table.allocate(0xAAAA, own, &[]).unwrap();
        assert_eq!(first.get(), 125);
        assert_eq!(table.allocate(0xAAAA, own, &[]).unwrap(), first);
        assert_eq!(table.allocate(0xBBBB, own, &[]).unwrap().get(), 124);
    }

    #[test]
    fn online_nodes_are_skipped() {
        let mut table = Table::default();
        let online = [NodeId::new(125).unwrap(), NodeId::new(124).unwrap()];
        let granted = table.allocate(1, None, &online).unwrap();
        assert_eq!(granted.get(), 123);
    }
}
