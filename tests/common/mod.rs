/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! A scripted Cyphal device for integration tests.
//!
//! The mock serves the standard node services over a [`VirtualBus`] and
//! reacts to restart and software update commands the way real firmware
//! does: it leaves the bus, comes back with a fresh uptime, and after an
//! update reports the version encoded in the image file name.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use cyphal_device::node::LocalNode;
use cyphal_device::transport::loopback::VirtualBus;
use cyphal_device::transport::{NodeId, Priority};
use cyphal_device::types::file::{FileRead, ReadRequest};
use cyphal_device::types::{
    AccessResponse, ExecuteCommand, ExecuteCommandResponse, GetInfo, GetInfoResponse, ListResponse, Mode,
    RegisterAccess, RegisterList, Value, Version,
};
use cyphal_device::update::SoftwareFile;

/// Minimum time on the bus before a commanded restart, so at least one
/// heartbeat with a nonzero uptime precedes the uptime regression.
const MIN_ALIVE: Duration = Duration::from_millis(2700);
const REBOOT_GAP: Duration = Duration::from_millis(400);

#[derive(Debug, Clone)]
pub struct MockRegister {
    pub value: Value,
    pub mutable: bool,
    pub persistent: bool,
    /// Firmware-side saturation: real writes are clamped to this maximum.
    pub clamp_max: Option<f32>,
}

pub struct DeviceState {
    pub name: String,
    pub unique_id: [u8; 16],
    pub hardware: Version,
    pub software: Version,
    pub vcs_revision_id: u64,
    pub image_crc: Option<u64>,
    pub registers: BTreeMap<String, MockRegister>,
}

impl DeviceState {
    pub fn named(name: &str) -> Self {
        let mut registers = BTreeMap::new();
        registers.insert(
            "uavcan.node.id".into(),
            MockRegister {
                value: Value::Natural16(vec![42]),
                mutable: true,
                persistent: true,
                clamp_max: None,
            },
        );
        registers.insert(
            "motor.ctl.gain_p".into(),
            MockRegister {
                value: Value::Real32(vec![1.5]),
                mutable: true,
                persistent: true,
                // Saturates at the advertised maximum, like real firmware.
                clamp_max: Some(10.0),
            },
        );
        registers.insert(
            "motor.ctl.gain_p=".into(),
            MockRegister {
                value: Value::Real32(vec![1.0]),
                mutable: false,
                persistent: true,
                clamp_max: None,
            },
        );
        registers.insert(
            "motor.ctl.gain_p<".into(),
            MockRegister {
                value: Value::Real32(vec![0.0]),
                mutable: false,
                persistent: true,
                clamp_max: None,
            },
        );
        registers.insert(
            "motor.ctl.gain_p>".into(),
            MockRegister {
                value: Value::Real32(vec![10.0]),
                mutable: false,
                persistent: true,
                clamp_max: None,
            },
        );
        Self {
            name: name.into(),
            unique_id: *b"mock-device-0042",
            hardware: Version { major: 3, minor: 1 },
            software: Version { major: 1, minor: 0 },
            vcs_revision_id: 0x1111_2222_3333_4444,
            image_crc: Some(0xAAAA_BBBB_CCCC_DDDD),
            registers,
        }
    }

    fn info(&self) -> GetInfoResponse {
        GetInfoResponse {
            protocol_version: Version { major: 1, minor: 0 },
            hardware_version: self.hardware,
            software_version: self.software,
            software_vcs_revision_id: self.vcs_revision_id,
            unique_id: self.unique_id,
            name: self.name.clone(),
            software_image_crc: self.image_crc,
            certificate_of_authenticity: Vec::new(),
        }
    }
}

fn saturate(value: Value, clamp_max: Option<f32>) -> Value {
    match (value, clamp_max) {
        (Value::Real32(values), Some(max)) => Value::Real32(values.into_iter().map(|v| v.min(max)).collect()),
        (value, _) => value,
    }
}

enum Control {
    Restart,
    Update { image: String, source: NodeId },
}

/// Runs a mock device until the returned task handle is dropped or aborted.
pub fn spawn_device(bus: &VirtualBus, node_id: u8, state: DeviceState) -> tokio::task::JoinHandle<()> {
    let bus = bus.clone();
    let node_id = NodeId::new(node_id).expect("valid node ID");
    let state = Arc::new(Mutex::new(state));
    tokio::spawn(device_main(bus, node_id, state))
}

async fn device_main(bus: VirtualBus, node_id: NodeId, state: Arc<Mutex<DeviceState>>) {
    loop {
        let node = LocalNode::new(bus.attach(), Some(node_id));
        let (control_tx, mut control_rx) = mpsc::channel::<Control>(4);
        serve(&node, &state, control_tx);

        let Some(command) = control_rx.recv().await else { return };
        match command {
            Control::Restart => {
                wait_min_alive(&node).await;
            }
            Control::Update { image, source } => {
                node.set_mode(Mode::SoftwareUpdate);
                match download(&node, source, &image).await {
                    Ok(bytes) => {
                        let mut state = state.lock().unwrap();
                        if let Ok(file) = SoftwareFile::parse(&image) {
                            state.software = file.software;
                            state.vcs_revision_id = file.vcs_revision_id.unwrap_or(0);
                            state.image_crc = file.image_crc;
                        }
                        drop(state);
                        assert!(!bytes.is_empty(), "downloaded an empty image");
                    }
                    Err(error) => panic!("mock device failed to download {image}: {error}"),
                }
                wait_min_alive(&node).await;
            }
        }
        // Leave the bus briefly, then come back with a fresh uptime.
        node.close();
        drop(node);
        tokio::time::sleep(REBOOT_GAP).await;
    }
}

async fn wait_min_alive(node: &LocalNode) {
    let uptime = node.uptime();
    if uptime < MIN_ALIVE {
        tokio::time::sleep(MIN_ALIVE - uptime).await;
    }
}

fn serve(node: &LocalNode, state: &Arc<Mutex<DeviceState>>, control: mpsc::Sender<Control>) {
    {
        let state = Arc::clone(state);
        node.serve::<GetInfo, _, _>(move |_meta, _request| {
            let info = state.lock().unwrap().info();
            async move { Some(info) }
        });
    }

    {
        let state = Arc::clone(state);
        node.serve::<RegisterList, _, _>(move |_meta, request| {
            let name = state
                .lock()
                .unwrap()
                .registers
                .keys()
                .nth(usize::from(request.index))
                .cloned()
                .unwrap_or_default();
            async move { Some(ListResponse { name }) }
        });
    }

    {
        let state = Arc::clone(state);
        node.serve::<RegisterAccess, _, _>(move |_meta, request| {
            let response = {
                let mut state = state.lock().unwrap();
                match state.registers.get_mut(&request.name) {
                    Some(register) => {
                        if register.mutable && !request.value.is_empty() {
                            register.value = saturate(request.value, register.clamp_max);
                        }
                        AccessResponse {
                            timestamp: 0,
                            mutable: register.mutable,
                            persistent: register.persistent,
                            value: register.value.clone(),
                        }
                    }
                    None => AccessResponse {
                        timestamp: 0,
                        mutable: false,
                        persistent: false,
                        value: Value::Empty,
                    },
                }
            };
            async move { Some(response) }
        });
    }

    node.serve::<ExecuteCommand, _, _>(move |meta, request| {
        let control = control.clone();
        async move {
            let response = match request.command {
                ExecuteCommand::COMMAND_RESTART => {
                    let _ = control.send(Control::Restart).await;
                    ExecuteCommandResponse::success()
                }
                ExecuteCommand::COMMAND_BEGIN_SOFTWARE_UPDATE => {
                    let image = String::from_utf8_lossy(&request.parameter).into_owned();
                    match meta.source {
                        Some(source) => {
                            let _ = control.send(Control::Update { image, source }).await;
                            ExecuteCommandResponse::success()
                        }
                        None => ExecuteCommandResponse {
                            status: ExecuteCommandResponse::STATUS_BAD_PARAMETER,
                            output: Vec::new(),
                        },
                    }
                }
                _ => ExecuteCommandResponse {
                    status: ExecuteCommandResponse::STATUS_BAD_COMMAND,
                    output: Vec::new(),
                },
            };
            Some(response)
        }
    });
}

/// Pulls a complete file from the update server, like bootloader firmware
/// would.
async fn download(node: &LocalNode, server: NodeId, path: &str) -> cyphal_device::Result<Vec<u8>> {
    let mut image = Vec::new();
    loop {
        let request = ReadRequest {
            offset: image.len() as u64,
            path: path.to_string(),
        };
        let response = node
            .call::<FileRead>(server, &request, Priority::Low, Duration::from_secs(1))
            .await?;
        assert_eq!(response.error, 0, "file read error {}", response.error);
        let done = response.data.len() < FileRead::CHUNK_CAPACITY;
        image.extend_from_slice(&response.data);
        if done {
            return Ok(image);
        }
    }
}
