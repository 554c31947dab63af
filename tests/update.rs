/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! Full software update flow against a mock device.

mod common;

use cyphal_device::client::{Client, ClientConfig};
use cyphal_device::device::Device;
use cyphal_device::transport::loopback::VirtualBus;
use cyphal_device::transport::{Mtu, NodeId};
use cyphal_device::types::Version;
use cyphal_device::update::{run_update, SoftwareFile, UpdateOutcome};

use common::{spawn_device, DeviceState};

const DEVICE_NAME: &str = "com.starcopter.aeric.mmb";

fn test_client(bus: &VirtualBus) -> Client {
    Client::with_bus(
        ClientConfig::named("com.starcopter.tools.test"),
        bus.attach(),
        NodeId::new(126),
    )
    .expect("client starts")
}

fn write_image(dir: &std::path::Path, file_name: &str, size: usize) -> SoftwareFile {
    let path = dir.join(file_name);
    let content: Vec<u8> = (0..size).map(|i| i as u8).collect();
    std::fs::write(&path, content).unwrap();
    SoftwareFile::parse(path).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn updates_device_to_newer_image() {
    let bus = VirtualBus::new(Mtu::Fd);
    let client = test_client(&bus);
    let _device_task = spawn_device(&bus, 42, DeviceState::named(DEVICE_NAME));

    let images = tempfile::tempdir().unwrap();
    // 700 bytes: several uavcan.file.Read round trips, ending in a short read.
    let file = write_image(
        images.path(),
        "com.starcopter.aeric.mmb-3.1-v1.2.00000000000000aa.00000000000000bb.app.bin",
        700,
    );

    let device = Device::by_name(&client, DEVICE_NAME).await.unwrap();
    let outcome = run_update(&client, &device, &file, false).await.unwrap();

    assert_eq!(
        outcome,
        UpdateOutcome::Updated {
            from: Version { major: 1, minor: 0 },
            to: Version { major: 1, minor: 2 },
        }
    );
    let info = device.info().await.unwrap();
    assert_eq!(info.software_version, Version { major: 1, minor: 2 });
    assert_eq!(info.software_vcs_revision_id, 0xAA);
    assert_eq!(info.software_image_crc, Some(0xBB));

    // The whole image was pulled through the file server.
    assert_eq!(client.file_server().bytes_served(file.file_name()), 700);
}

#[tokio::test(flavor = "multi_thread")]
async fn current_device_is_left_alone() {
    let bus = VirtualBus::new(Mtu::Fd);
    let client = test_client(&bus);
    let mut state = DeviceState::named(DEVICE_NAME);
    state.software = Version { major: 1, minor: 2 };
    state.vcs_revision_id = 0xAA;
    state.image_crc = Some(0xBB);
    let _device_task = spawn_device(&bus, 42, state);

    let images = tempfile::tempdir().unwrap();
    let file = write_image(
        images.path(),
        "com.starcopter.aeric.mmb-3.1-v1.2.00000000000000aa.00000000000000bb.app.bin",
        256,
    );

    let device = Device::by_name(&client, DEVICE_NAME).await.unwrap();
    let outcome = run_update(&client, &device, &file, false).await.unwrap();
    assert_eq!(outcome, UpdateOutcome::AlreadyCurrent);
}

#[tokio::test(flavor = "multi_thread")]
async fn incompatible_image_is_rejected() {
    let bus = VirtualBus::new(Mtu::Fd);
    let client = test_client(&bus);
    let _device_task = spawn_device(&bus, 42, DeviceState::named(DEVICE_NAME));

    let images = tempfile::tempdir().unwrap();
    let file = write_image(images.path(), "com.starcopter.aeric.esc-1.0-v9.9.app.bin", 128);

    let device = Device::by_name(&client, DEVICE_NAME).await.unwrap();
    let result = run_update(&client, &device, &file, false).await;
    assert!(result.is_err(), "image for a different device must be refused");
}
