/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! A handle to one remote device.
//!
//! Devices are usually found by name or unique ID through the client's node
//! tracker; the handle then bundles the common per-device operations:
//! commands, restarts, register access, and subscriptions to the device's
//! configurable ports.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::client::{Client, TrackerEvent};
use crate::node::Subscription;
use crate::registry::Registry;
use crate::transport::{NodeId, SubjectId};
use crate::types::{ExecuteCommandResponse, GetInfoResponse, Heartbeat, Message, Value};
use crate::{Error, Result};

pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);
const RESTART_TIMEOUT: Duration = Duration::from_secs(5);

/// Criteria for finding a device on the bus.
#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    /// Exact node name, e.g. `com.starcopter.aeric.mmb`.
    pub name: Option<String>,
    /// 128-bit unique ID.
    pub unique_id: Option<[u8; 16]>,
    /// Node IDs to ignore, e.g. devices already claimed by another handle.
    pub exclude: BTreeSet<NodeId>,
}

impl DeviceFilter {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    fn matches(&self, node_id: NodeId, info: &GetInfoResponse) -> bool {
        if self.exclude.contains(&node_id) {
            return false;
        }
        if let Some(name) = &self.name {
            if info.name != *name {
                return false;
            }
        }
        if let Some(unique_id) = &self.unique_id {
            if info.unique_id != *unique_id {
                return false;
            }
        }
        true
    }
}

/// One remote device on the bus.
#[derive(Clone)]
pub struct Device {
    client: Client,
    node_id: NodeId,
}

impl Device {
    /// Wraps a known node ID without any discovery.
    pub fn at(client: &Client, node_id: NodeId) -> Self {
        Self {
            client: client.clone(),
            node_id,
        }
    }

    /// Finds the first device with the given node name.
    pub async fn by_name(client: &Client, name: &str) -> Result<Self> {
        Self::discover(client, DeviceFilter::named(name), DISCOVERY_TIMEOUT).await
    }

    /// Finds the first device matching the filter, waiting up to `timeout`
    /// for it to appear on the bus.
    pub async fn discover(client: &Client, filter: DeviceFilter, timeout: Duration) -> Result<Self> {
        // Subscribe before scanning the snapshot so nothing slips between.
        let mut events = client.tracker().subscribe();

        for node in client.tracker().nodes() {
            if let Some(info) = &node.info {
                if filter.matches(node.node_id, info) {
                    return Ok(Self::at(client, node.node_id));
                }
            }
        }

        let wait = async {
            loop {
                match events.recv().await {
                    Ok(TrackerEvent::InfoUpdated(node_id)) => {
                        let Some(node) = client.tracker().get(node_id) else { continue };
                        let Some(info) = &node.info else { continue };
                        if filter.matches(node_id, info) {
                            return Ok(Self::at(client, node_id));
                        }
                    }
                    Ok(_) => {}
                    Err(_) => return Err(Error::NodeClosed),
                }
            }
        };
        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            Error::Discovery(format!(
                "no matching device appeared within {:.1} s",
                timeout.as_secs_f64()
            ))
        })?
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Last received heartbeat, if the device is currently online.
    pub fn heartbeat(&self) -> Option<Heartbeat> {
        self.client.tracker().get(self.node_id).map(|node| node.heartbeat)
    }

    pub fn is_online(&self) -> bool {
        self.client.tracker().get(self.node_id).is_some()
    }

    /// Node identity, served from the tracker cache when available.
    pub async fn info(&self) -> Result<GetInfoResponse> {
        if let Some(info) = self.client.tracker().get(self.node_id).and_then(|node| node.info) {
            return Ok(info);
        }
        self.client.tracker().request_info(self.node_id).await
    }

    pub async fn name(&self) -> Result<String> {
        Ok(self.info().await?.name)
    }

    /// Discovers the device's register map.
    pub async fn registry(&self) -> Result<Registry> {
        Registry::discover(self.client.node().clone(), self.node_id).await
    }

    pub async fn execute(&self, command: u16, parameter: impl Into<Vec<u8>>) -> Result<ExecuteCommandResponse> {
        self.client.execute_command(self.node_id, command, parameter).await
    }

    /// Restarts the device, optionally waiting for it to come back.
    pub async fn restart(&self, wait: bool, settle: Duration) -> Result<()> {
        self.client.request_restart(self.node_id).await?;
        if wait {
            self.client.wait_for_restart(self.node_id, RESTART_TIMEOUT).await?;
            tokio::time::sleep(settle).await;
        }
        Ok(())
    }

    /// Reads a single register.
    pub async fn read_register(&self, name: &str) -> Result<Value> {
        let mut registry = Registry::discover(self.client.node().clone(), self.node_id).await?;
        registry.read(name).await
    }

    /// Writes a single register; see [`Registry::set`] for the semantics.
    pub async fn write_register(&self, name: &str, value: &Value) -> Result<Value> {
        let mut registry = self.registry().await?;
        registry.set(name, value).await
    }

    /// Reassigns the device's node ID and retargets this handle. The device
    /// itself switches after the restart it performs on its own, or the next
    /// manual restart.
    pub async fn set_node_id(&mut self, new_id: NodeId) -> Result<()> {
        let mut registry = self.registry().await?;
        registry.set("uavcan.node.id", &Value::Natural16(vec![u16::from(new_id.get())])).await?;
        self.node_id = new_id;
        Ok(())
    }

    /// Subscribes to one of the device's configurable publication ports.
    ///
    /// The subject ID is read from the device's `uavcan.pub.<port>.id`
    /// register, and the advertised `uavcan.pub.<port>.type` is checked
    /// against the expected message type.
    pub async fn subscribe_port<T: Message>(&self, port: &str) -> Result<Subscription<T>> {
        let mut registry = self.registry().await?;

        let id_register = format!("uavcan.pub.{port}.id");
        let subject = match registry.read(&id_register).await? {
            Value::Natural16(values) if values.len() == 1 => SubjectId::new(values[0])
                .ok_or_else(|| Error::IncompatibleValue(format!("port '{port}' is not configured")))?,
            other => {
                return Err(Error::IncompatibleValue(format!(
                    "unexpected type {} in '{id_register}'",
                    other.dtype()
                )))
            }
        };

        let type_register = format!("uavcan.pub.{port}.type");
        match registry.read(&type_register).await {
            Ok(Value::String(advertised)) if !type_matches(&advertised, T::NAME) => {
                return Err(Error::IncompatibleValue(format!(
                    "port '{port}' publishes {advertised}, expected {}",
                    T::NAME
                )));
            }
            // A device without type introspection is taken at its word.
            Ok(_) | Err(Error::NoSuchRegister(_)) => {}
            Err(error) => return Err(error),
        }

        Ok(self.client.node().subscribe_on::<T>(subject))
    }
}

/// Compares DSDL type names ignoring the minor version.
fn type_matches(advertised: &str, expected: &str) -> bool {
    let strip_minor = |name: &str| {
        name.rsplit_once('.')
            .filter(|(_, minor)| minor.chars().all(|c| c.is_ascii_digit()))
            .map(|(base, _)| base.to_string())
            .unwrap_or_else(|| name.to_string())
    };
    strip_minor(advertised) == strip_minor(expected)
}
