/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! # Cyphal Device Library
//!
//! A host-side library to simplify interaction with Cyphal devices over CAN.
//!
//! The library speaks Cyphal/CAN v1 over Linux SocketCAN (classic CAN and
//! CAN FD) and provides the building blocks a test bench or provisioning
//! station needs:
//!
//! * [`transport`] — the Cyphal/CAN transport: CAN ID codec, transfer
//!   (de)segmentation, and a [`transport::CanBus`] link abstraction with
//!   SocketCAN and in-process loopback implementations.
//! * [`types`] — native codecs for the standard `uavcan` data types the
//!   library exchanges (heartbeat, node info, commands, registers, files,
//!   diagnostics, plug-and-play).
//! * [`node`] — a local Cyphal node: publishers, subscribers, service
//!   clients and servers on top of a shared transport.
//! * [`client`] — the [`client::Client`]: node tracking, diagnostic log
//!   forwarding, a file server, plug-and-play allocation, and high-level
//!   operations like restarting or updating a remote node.
//! * [`registry`] — discovery and access of remote registers through the
//!   standard `uavcan.register` services.
//! * [`device`] — a per-device handle combining all of the above.
//! * [`update`] — firmware image directories and update planning.
//!
//! ```no_run
//! use cyphal_device::client::{Client, ClientConfig};
//! use cyphal_device::device::Device;
//!
//! # async fn demo() -> cyphal_device::Result<()> {
//! let client = Client::new(ClientConfig::named("com.starcopter.demo")).await?;
//! let device = Device::by_name(&client, "com.starcopter.aeric.mmb").await?;
//! device.restart(true, std::time::Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

pub mod cfg;
pub mod cli;
pub mod client;
pub mod device;
pub mod node;
pub mod registry;
pub mod transport;
pub mod types;
pub mod update;
pub mod util;

pub use client::Client;
pub use device::Device;
pub use registry::{Register, Registry};

/// Errors surfaced by the library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("CAN link error: {0}")]
    Link(#[from] std::io::Error),

    #[error("Malformed transfer: {0}")]
    Decode(#[from] types::DecodeError),

    #[error("{0} to node {1} timed out")]
    ServiceTimeout(&'static str, transport::NodeId),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Node is anonymous, an own node ID is required for this operation")]
    AnonymousNode,

    #[error("Node {0} is the local node itself")]
    SelfAddressed(transport::NodeId),

    #[error("Register '{0}' not found")]
    NoSuchRegister(String),

    #[error("Register '{0}' is immutable and thus may not be written to")]
    ImmutableRegister(String),

    #[error("Register '{0}' has no configured default")]
    NoDefaultValue(String),

    #[error("Incompatible register value: {0}")]
    IncompatibleValue(String),

    #[error("Write to '{register}' rejected: requested {requested}, device stored {stored}")]
    WriteRejected {
        register: String,
        requested: types::Value,
        stored: types::Value,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Command returned status {status}: {message}")]
    CommandFailed { status: u8, message: String },

    #[error("{0}")]
    Discovery(String),

    #[error("Software update failed: {0}")]
    UpdateFailed(String),

    #[error("Invalid firmware file name: {0}")]
    InvalidSoftwareFile(String),

    #[error("Node channel closed")]
    NodeClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
