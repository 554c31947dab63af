/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! End-to-end tests against a mock device on a loopback bus.

mod common;

use std::time::Duration;

use cyphal_device::client::{Client, ClientConfig};
use cyphal_device::device::{Device, DeviceFilter};
use cyphal_device::node::LocalNode;
use cyphal_device::transport::loopback::VirtualBus;
use cyphal_device::transport::{Mtu, NodeId};
use cyphal_device::types::{Value, Version};
use cyphal_device::{Error, Registry};

use common::{spawn_device, DeviceState};

fn test_client(bus: &VirtualBus) -> Client {
    Client::with_bus(
        ClientConfig::named("com.starcopter.tools.test"),
        bus.attach(),
        NodeId::new(126),
    )
    .expect("client starts")
}

#[tokio::test(flavor = "multi_thread")]
async fn discovers_device_by_name() {
    let bus = VirtualBus::new(Mtu::Fd);
    let client = test_client(&bus);
    let _device_task = spawn_device(&bus, 42, DeviceState::named("com.starcopter.aeric.mmb"));

    let device = Device::by_name(&client, "com.starcopter.aeric.mmb").await.unwrap();
    assert_eq!(device.node_id().get(), 42);

    let info = device.info().await.unwrap();
    assert_eq!(info.name, "com.starcopter.aeric.mmb");
    assert_eq!(info.hardware_version, Version { major: 3, minor: 1 });
    assert!(device.is_online());
}

#[tokio::test(flavor = "multi_thread")]
async fn discovery_honors_exclusions_and_times_out() {
    let bus = VirtualBus::new(Mtu::Fd);
    let client = test_client(&bus);
    let _device_task = spawn_device(&bus, 42, DeviceState::named("com.starcopter.aeric.mmb"));

    let mut filter = DeviceFilter::named("com.starcopter.aeric.mmb");
    filter.exclude.insert(NodeId::new(42).unwrap());
    let result = Device::discover(&client, filter, Duration::from_secs(2)).await;
    assert!(result.is_err(), "excluded device must not be discovered");

    let missing = Device::by_name(&client, "com.starcopter.aeric.esc").await;
    assert!(missing.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn reads_and_writes_registers() {
    let bus = VirtualBus::new(Mtu::Fd);
    let client = test_client(&bus);
    let _device_task = spawn_device(&bus, 42, DeviceState::named("com.starcopter.aeric.mmb"));

    let device = Device::by_name(&client, "com.starcopter.aeric.mmb").await.unwrap();
    let mut registry = device.registry().await.unwrap();

    // Special function registers fold into their base register.
    let register = registry.get("motor.ctl.gain_p").unwrap();
    assert_eq!(register.value, Value::Real32(vec![1.5]));
    assert_eq!(register.default, Some(Value::Real32(vec![1.0])));
    assert_eq!(register.min, Some(Value::Real32(vec![0.0])));
    assert_eq!(register.max, Some(Value::Real32(vec![10.0])));
    assert!(register.mutable);

    // Integers coerce into a real32 register.
    let stored = registry.set("motor.ctl.gain_p", &Value::Natural8(vec![3])).await.unwrap();
    assert_eq!(stored, Value::Real32(vec![3.0]));
    assert_eq!(registry.read("motor.ctl.gain_p").await.unwrap(), Value::Real32(vec![3.0]));

    // Reset restores the advertised default.
    let stored = registry.reset("motor.ctl.gain_p").await.unwrap();
    assert_eq!(stored, Value::Real32(vec![1.0]));

    let error = registry.set("motor.ctl.gain_p=", &Value::Real32(vec![2.0])).await;
    assert!(error.is_err(), "limit registers are immutable");

    let error = registry.set("no.such.register", &Value::Natural8(vec![1])).await;
    assert!(error.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_writes_are_errors() {
    let bus = VirtualBus::new(Mtu::Fd);
    let client = test_client(&bus);
    let _device_task = spawn_device(&bus, 42, DeviceState::named("com.starcopter.aeric.mmb"));

    let device = Device::by_name(&client, "com.starcopter.aeric.mmb").await.unwrap();
    let mut registry = device.registry().await.unwrap();

    // The device saturates at its advertised maximum, so the readback does
    // not match the request.
    let result = registry.set("motor.ctl.gain_p", &Value::Real32(vec![100.0])).await;
    assert!(matches!(result, Err(Error::WriteRejected { .. })), "got {result:?}");

    // The cache reflects what the device actually stored.
    assert_eq!(registry.get("motor.ctl.gain_p").unwrap().value, Value::Real32(vec![10.0]));
}

#[tokio::test(flavor = "multi_thread")]
async fn own_node_id_cannot_be_targeted() {
    let bus = VirtualBus::new(Mtu::Fd);
    let client = test_client(&bus);

    let device = Device::at(&client, NodeId::new(126).unwrap());
    let result = device.read_register("uavcan.node.id").await;
    assert!(matches!(result, Err(Error::SelfAddressed(_))), "got {result:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn node_without_register_api_has_empty_registry() {
    let bus = VirtualBus::new(Mtu::Fd);
    let client = test_client(&bus);
    // Publishes heartbeats but serves nothing.
    let _bare = LocalNode::new(bus.attach(), NodeId::new(50));

    let registry = Registry::discover(client.node().clone(), NodeId::new(50).unwrap())
        .await
        .unwrap();
    assert!(registry.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn set_node_id_retargets_the_handle() {
    let bus = VirtualBus::new(Mtu::Fd);
    let client = test_client(&bus);
    let _device_task = spawn_device(&bus, 42, DeviceState::named("com.starcopter.aeric.mmb"));

    let mut device = Device::by_name(&client, "com.starcopter.aeric.mmb").await.unwrap();
    device.set_node_id(NodeId::new(43).unwrap()).await.unwrap();
    assert_eq!(device.node_id().get(), 43);
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_is_observed_as_uptime_regression() {
    let bus = VirtualBus::new(Mtu::Fd);
    let client = test_client(&bus);
    let _device_task = spawn_device(&bus, 42, DeviceState::named("com.starcopter.aeric.mmb"));

    let device = Device::by_name(&client, "com.starcopter.aeric.mmb").await.unwrap();
    device.restart(true, Duration::ZERO).await.unwrap();

    let heartbeat = device.heartbeat().expect("device is back online");
    assert!(heartbeat.uptime < 2, "uptime must have regressed");
}
