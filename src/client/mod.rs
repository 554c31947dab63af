/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! The high-level bus client.
//!
//! A [`Client`] owns the local node and everything a host-side tool needs on
//! a device bus: heartbeat tracking, diagnostic log forwarding, a file
//! server for software updates, and optionally plug-and-play node ID
//! allocation for factory-fresh devices.

mod allocator;
mod file_server;
mod tracker;

pub use file_server::FileServer;
pub use tracker::{NodeTracker, TrackedNode, TrackerEvent};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::cfg::CanConfig;
use crate::node::LocalNode;
use crate::transport::{CanBus, NodeId, Priority, SocketCanBus};
use crate::types::{ExecuteCommand, ExecuteCommandRequest, ExecuteCommandResponse, Record, Severity};
use crate::{Error, Result};

/// Simultaneous software updates when driving a whole fleet.
pub const DEFAULT_PARALLEL_UPDATES: usize = 12;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Application node name, e.g. `com.starcopter.tools.cyphal`.
    pub name: String,
    /// Explicit CAN configuration; `None` reads the environment.
    pub can: Option<CanConfig>,
    /// Answer plug-and-play allocation requests from anonymous devices.
    pub enable_allocator: bool,
    /// Maximum number of concurrent software updates.
    pub parallel_updates: usize,
}

impl ClientConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            can: None,
            enable_allocator: true,
            parallel_updates: DEFAULT_PARALLEL_UPDATES,
        }
    }
}

/// Shared handle to the bus client. Clones refer to the same client.
#[derive(Clone)]
pub struct Client {
    name: Arc<str>,
    node: LocalNode,
    tracker: NodeTracker,
    file_server: Arc<FileServer>,
    update_slots: Arc<Semaphore>,
}

impl Client {
    /// Connects to the CAN interface from the configuration (or environment)
    /// and starts all background services.
    pub async fn new(config: ClientConfig) -> Result<Self> {
        let can = match &config.can {
            Some(can) => can.clone(),
            None => CanConfig::from_env()?,
        };
        tracing::info!(iface = %can.iface, mtu = can.mtu().as_usize(), node_id = ?can.node_id, "opening CAN interface");
        let bus = SocketCanBus::open(&can.iface, can.mtu())?;
        Self::with_bus(config, bus, can.node_id)
    }

    /// Starts the client on an existing link, e.g. a loopback bus in tests.
    pub fn with_bus(config: ClientConfig, bus: impl CanBus + 'static, node_id: Option<NodeId>) -> Result<Self> {
        let node = LocalNode::new(bus, node_id);
        let tracker = NodeTracker::spawn(node.clone());
        let file_server = Arc::new(FileServer::new(&node)?);

        if config.enable_allocator {
            if node_id.is_some() {
                let online = tracker.clone();
                allocator::spawn(node.clone(), move || {
                    online.nodes().iter().map(|entry| entry.node_id).collect()
                });
            } else {
                tracing::warn!("plug-and-play allocation requires an own node ID, allocator disabled");
            }
        }

        tokio::spawn(forward_diagnostics(node.clone()));
        tokio::spawn(mirror_node_count(node.clone(), tracker.clone()));

        Ok(Self {
            name: config.name.into(),
            node,
            tracker,
            file_server,
            update_slots: Arc::new(Semaphore::new(config.parallel_updates.max(1))),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self) -> &LocalNode {
        &self.node
    }

    pub fn tracker(&self) -> &NodeTracker {
        &self.tracker
    }

    pub fn file_server(&self) -> &FileServer {
        &self.file_server
    }

    /// Permit gate bounding the number of concurrent software updates.
    pub fn update_slots(&self) -> &Arc<Semaphore> {
        &self.update_slots
    }

    /// Executes a command on a remote node, failing on a non-success status.
    pub async fn execute_command(
        &self,
        node_id: NodeId,
        command: u16,
        parameter: impl Into<Vec<u8>>,
    ) -> Result<ExecuteCommandResponse> {
        let request = ExecuteCommandRequest::new(command, parameter);
        let response = self
            .node
            .call::<ExecuteCommand>(node_id, &request, Priority::Nominal, COMMAND_TIMEOUT)
            .await?;
        if !response.is_success() {
            return Err(Error::CommandFailed {
                status: response.status,
                message: format!(
                    "{} ({})",
                    response.status_name(),
                    String::from_utf8_lossy(&response.output)
                ),
            });
        }
        Ok(response)
    }

    /// Sends a restart command.
    ///
    /// Devices commonly reboot before the response makes it onto the bus, so
    /// a service timeout here counts as success.
    pub async fn request_restart(&self, node_id: NodeId) -> Result<()> {
        match self
            .execute_command(node_id, ExecuteCommand::COMMAND_RESTART, Vec::new())
            .await
        {
            Ok(_) | Err(Error::ServiceTimeout(_, _)) => Ok(()),
            Err(error) => Err(error),
        }
    }

    /// Waits until the tracker observes a restart of the given node: either
    /// an explicit uptime regression, or the node coming back after a gap.
    pub async fn wait_for_restart(&self, node_id: NodeId, timeout: Duration) -> Result<()> {
        let mut events = self.tracker.subscribe();
        let mut went_offline = false;
        let wait = async {
            loop {
                match events.recv().await {
                    Ok(TrackerEvent::Restarted(id)) if id == node_id => return Ok(()),
                    Ok(TrackerEvent::Offline(id)) if id == node_id => went_offline = true,
                    Ok(TrackerEvent::Appeared(id)) if id == node_id && went_offline => return Ok(()),
                    Ok(_) => {}
                    Err(_) => return Err(Error::NodeClosed),
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::Timeout(format!("node {node_id} did not restart")))?
    }
}

/// Re-publishes remote diagnostic records into the local log.
async fn forward_diagnostics(node: LocalNode) {
    let mut records = node.subscribe::<Record>();
    while let Some((meta, record)) = records.recv().await {
        let source = meta.source.map(|id| id.to_string()).unwrap_or_else(|| "?".into());
        match record.severity {
            Severity::Trace | Severity::Debug => {
                tracing::debug!(target: "device", node = %source, "{}", record.text)
            }
            Severity::Info | Severity::Notice => {
                tracing::info!(target: "device", node = %source, "{}", record.text)
            }
            Severity::Warning => tracing::warn!(target: "device", node = %source, "{}", record.text),
            Severity::Error | Severity::Critical | Severity::Alert => {
                tracing::error!(target: "device", node = %source, "{}", record.text)
            }
        }
    }
}

/// Mirrors the number of tracked nodes into the heartbeat's vendor-specific
/// status code, making the client's view visible on the bus.
async fn mirror_node_count(node: LocalNode, tracker: NodeTracker) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        node.set_vendor_status(tracker.online_count().min(255) as u8);
    }
}
