/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! Online-node tracking from heartbeats.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::node::LocalNode;
use crate::transport::{NodeId, Priority};
use crate::types::{GetInfo, GetInfoRequest, GetInfoResponse, Heartbeat};
use crate::Result;

const OFFLINE_TIMEOUT: Duration = Duration::from_secs(3);
const INFO_TIMEOUT: Duration = Duration::from_secs(1);
const INFO_ATTEMPTS: u32 = 3;
const EVENT_CAPACITY: usize = 256;

/// Snapshot of one remote node.
#[derive(Debug, Clone)]
pub struct TrackedNode {
    pub node_id: NodeId,
    pub heartbeat: Heartbeat,
    pub last_seen: Instant,
    /// `None` until the GetInfo request has been answered.
    pub info: Option<GetInfoResponse>,
}

/// State changes of the tracked fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    /// First heartbeat of a node that was not tracked before.
    Appeared(NodeId),
    /// Node identity has been resolved (or re-resolved after a restart).
    InfoUpdated(NodeId),
    /// Uptime regression observed, the node rebooted.
    Restarted(NodeId),
    /// No heartbeat for three seconds.
    Offline(NodeId),
}

/// Watches heartbeats and keeps an inventory of online nodes.
///
/// For every node that appears (or restarts), its `uavcan.node.GetInfo`
/// identity is queried at [`Priority::Low`] so tracking never competes with
/// foreground traffic.
#[derive(Clone)]
pub struct NodeTracker {
    node: LocalNode,
    nodes: Arc<Mutex<HashMap<NodeId, TrackedNode>>>,
    events: broadcast::Sender<TrackerEvent>,
}

impl NodeTracker {
    pub fn spawn(node: LocalNode) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let tracker = Self {
            node,
            nodes: Arc::new(Mutex::new(HashMap::new())),
            events,
        };
        tokio::spawn(heartbeat_loop(tracker.clone()));
        tokio::spawn(expiry_loop(tracker.clone()));
        tracker
    }

    /// Snapshot of all currently tracked nodes, ordered by node ID.
    pub fn nodes(&self) -> Vec<TrackedNode> {
        let mut nodes: Vec<_> = self.lock().values().cloned().collect();
        nodes.sort_by_key(|node| node.node_id);
        nodes
    }

    pub fn get(&self, node_id: NodeId) -> Option<TrackedNode> {
        self.lock().get(&node_id).cloned()
    }

    pub fn online_count(&self) -> usize {
        self.lock().len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    /// Requests the identity of a node directly, bypassing the cache.
    pub async fn request_info(&self, node_id: NodeId) -> Result<GetInfoResponse> {
        let mut last_error = None;
        for _attempt in 0..INFO_ATTEMPTS {
            match self
                .node
                .call::<GetInfo>(node_id, &GetInfoRequest, Priority::Low, INFO_TIMEOUT)
                .await
            {
                Ok(info) => return Ok(info),
                Err(error) => last_error = Some(error),
            }
        }
        Err(last_error.unwrap_or(crate::Error::NodeClosed))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<NodeId, TrackedNode>> {
        match self.nodes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn emit(&self, event: TrackerEvent) {
        let _ = self.events.send(event);
    }
}

async fn heartbeat_loop(tracker: NodeTracker) {
    let mut heartbeats = tracker.node.subscribe::<Heartbeat>();
    while let Some((meta, heartbeat)) = heartbeats.recv().await {
        let Some(source) = meta.source else { continue };
        if Some(source) == tracker.node.id() {
            continue;
        }

        let now = Instant::now();
        let mut fetch_info = false;
        let mut restarted = false;
        {
            let mut nodes = tracker.lock();
            match nodes.get_mut(&source) {
                Some(entry) => {
                    if heartbeat.uptime < entry.heartbeat.uptime {
                        restarted = true;
                        fetch_info = true;
                        entry.info = None;
                    }
                    entry.heartbeat = heartbeat;
                    entry.last_seen = now;
                }
                None => {
                    nodes.insert(
                        source,
                        TrackedNode {
                            node_id: source,
                            heartbeat,
                            last_seen: now,
                            info: None,
                        },
                    );
                    fetch_info = true;
                    tracker.emit(TrackerEvent::Appeared(source));
                }
            }
        }
        if restarted {
            tracing::info!(node = %source, "node restarted");
            tracker.emit(TrackerEvent::Restarted(source));
        }
        if fetch_info {
            tokio::spawn(fetch_node_info(tracker.clone(), source));
        }
    }
}

async fn fetch_node_info(tracker: NodeTracker, node_id: NodeId) {
    match tracker.request_info(node_id).await {
        Ok(info) => {
            tracing::debug!(node = %node_id, name = %info.name, "node identified");
            if let Some(entry) = tracker.lock().get_mut(&node_id) {
                entry.info = Some(info);
            }
            tracker.emit(TrackerEvent::InfoUpdated(node_id));
        }
        Err(error) => {
            tracing::warn!(node = %node_id, %error, "failed to query node info");
        }
    }
}

async fn expiry_loop(tracker: NodeTracker) {
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        ticker.tick().await;
        let now = Instant::now();
        let expired: Vec<NodeId> = {
            let mut nodes = tracker.lock();
            let expired: Vec<NodeId> = nodes
                .values()
                .filter(|node| now.duration_since(node.last_seen) > OFFLINE_TIMEOUT)
                .map(|node| node.node_id)
                .collect();
            for node_id in &expired {
                nodes.remove(node_id);
            }
            expired
        };
        for node_id in expired {
            tracing::info!(node = %node_id, "node went offline");
            tracker.emit(TrackerEvent::Offline(node_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::loopback::VirtualBus;
    use crate::transport::Mtu;

    #[tokio::test]
    async fn tracks_appearing_nodes() {
        let bus = VirtualBus::new(Mtu::Classic);
        let observer = LocalNode::new(bus.attach(), NodeId::new(1));
        let tracker = NodeTracker::spawn(observer);
        let mut events = tracker.subscribe();

        let _device = LocalNode::new(bus.attach(), NodeId::new(55));

        loop {
            if let TrackerEvent::Appeared(node) = events.recv().await.unwrap() {
                assert_eq!(node.get(), 55);
                break;
            }
        }
        assert_eq!(tracker.online_count(), 1);
        let snapshot = tracker.get(NodeId::new(55).unwrap()).unwrap();
        assert_eq!(snapshot.node_id.get(), 55);
    }
}
