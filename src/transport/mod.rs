/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! Cyphal/CAN transport layer.
//!
//! This module implements the wire level of Cyphal/CAN v1: the 29-bit CAN ID
//! codec, tail bytes, the transfer CRC, and transfer (de)segmentation. The
//! physical link is abstracted behind the [`CanBus`] trait with a SocketCAN
//! implementation for real buses and a loopback bus for tests and mocks.

pub mod bus;
pub mod can_id;
pub mod frame;
pub mod loopback;
pub mod session;

pub use bus::{CanBus, RawFrame, SocketCanBus};
pub use can_id::{FrameHeader, TransferKind};
pub use frame::{Mtu, TailByte, TransferCrc};
pub use loopback::LoopbackBus;

/// Node ID on a CAN transport, 0..=127.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u8);

impl NodeId {
    pub const MAX: u8 = 127;

    pub const fn new(value: u8) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    pub const fn from_truncating(value: u8) -> Self {
        Self(value & Self::MAX)
    }

    pub const fn get(self) -> u8 {
        self.0
    }
}

impl From<NodeId> for u8 {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for NodeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: u8 = s.parse().map_err(|_| format!("invalid node ID: {s}"))?;
        NodeId::new(raw).ok_or_else(|| format!("node ID {raw} out of range 0..={}", Self::MAX))
    }
}

/// Subject ID of a message port, 13 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubjectId(u16);

impl SubjectId {
    pub const MAX: u16 = 8191;

    pub const fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    pub const fn from_truncating(value: u16) -> Self {
        Self(value & Self::MAX)
    }

    pub const fn get(self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Service ID of an RPC port, 9 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceId(u16);

impl ServiceId {
    pub const MAX: u16 = 511;

    pub const fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    pub const fn from_truncating(value: u16) -> Self {
        Self(value & Self::MAX)
    }

    pub const fn get(self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Transfer priority. The numeric encoding matches the CAN ID encoding, so
/// lower numbers win arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    Exceptional = 0,
    Immediate = 1,
    Fast = 2,
    High = 3,
    Nominal = 4,
    Low = 5,
    Slow = 6,
    Optional = 7,
}

impl Priority {
    pub const fn from_code_truncating(code: u8) -> Self {
        match code & 0x7 {
            0 => Priority::Exceptional,
            1 => Priority::Immediate,
            2 => Priority::Fast,
            3 => Priority::High,
            4 => Priority::Nominal,
            5 => Priority::Low,
            6 => Priority::Slow,
            _ => Priority::Optional,
        }
    }
}

impl From<Priority> for u8 {
    fn from(value: Priority) -> Self {
        value as u8
    }
}

/// Modular transfer-ID counter, 5 bits on CAN.
pub const TRANSFER_ID_MODULO: u8 = 32;

/// Metadata of a received or sent transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferMeta {
    pub priority: Priority,
    /// Source node, `None` for anonymous messages.
    pub source: Option<NodeId>,
    pub transfer_id: u8,
}

/// A complete (reassembled) transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub meta: TransferMeta,
    pub kind: TransferKind,
    pub payload: Vec<u8>,
}
