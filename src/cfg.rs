/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! Transport configuration from the environment.
//!
//! Configuration follows the `UAVCAN__*` environment variable convention,
//! with a `.env` file in the working directory as fallback:
//!
//! * `UAVCAN__CAN__IFACE` — SocketCAN interface, e.g. `socketcan:can0`
//! * `UAVCAN__CAN__BITRATE` — arbitration and data bitrate, e.g. `1000000 5000000`
//! * `UAVCAN__NODE__ID` — local node ID; absent means anonymous

use std::str::FromStr;

use crate::transport::{Mtu, NodeId};
use crate::{Error, Result};

pub const IFACE_ENV: &str = "UAVCAN__CAN__IFACE";
pub const BITRATE_ENV: &str = "UAVCAN__CAN__BITRATE";
pub const NODE_ID_ENV: &str = "UAVCAN__NODE__ID";

const DEFAULT_IFACE: &str = "can0";
const DEFAULT_BITRATE: u32 = 1_000_000;

/// CAN link configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanConfig {
    /// SocketCAN channel name, e.g. `can0` or `vcan0`.
    pub iface: String,
    /// Arbitration-phase bitrate in bit/s.
    pub arbitration_bitrate: u32,
    /// Data-phase bitrate; equal to the arbitration bitrate on classic CAN.
    pub data_bitrate: u32,
    /// Local node ID; `None` runs the node anonymously.
    pub node_id: Option<NodeId>,
}

impl Default for CanConfig {
    fn default() -> Self {
        Self {
            iface: DEFAULT_IFACE.into(),
            arbitration_bitrate: DEFAULT_BITRATE,
            data_bitrate: DEFAULT_BITRATE,
            node_id: None,
        }
    }
}

impl CanConfig {
    /// Reads the configuration from the environment, after loading `.env`
    /// from the working directory if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();

        if let Ok(iface) = std::env::var(IFACE_ENV) {
            // pycyphal-style media prefix, e.g. "socketcan:can0".
            config.iface = iface.rsplit(':').next().unwrap_or(&iface).to_string();
        }
        if let Ok(bitrate) = std::env::var(BITRATE_ENV) {
            (config.arbitration_bitrate, config.data_bitrate) = parse_bitrate(&bitrate)?;
        }
        if let Ok(raw) = std::env::var(NODE_ID_ENV) {
            let node_id = NodeId::from_str(raw.trim()).map_err(Error::InvalidConfig)?;
            config.node_id = Some(node_id);
        }
        Ok(config)
    }

    /// CAN FD framing is assumed whenever the data phase runs faster than
    /// arbitration.
    pub fn mtu(&self) -> Mtu {
        if self.data_bitrate > self.arbitration_bitrate {
            Mtu::Fd
        } else {
            Mtu::Classic
        }
    }
}

pub(crate) fn parse_bitrate(raw: &str) -> Result<(u32, u32)> {
    let mut parts = raw.split_whitespace().map(|part| {
        part.parse::<u32>()
            .map_err(|_| Error::InvalidConfig(format!("invalid bitrate '{part}'")))
    });
    let arbitration = parts
        .next()
        .ok_or_else(|| Error::InvalidConfig("empty bitrate".into()))??;
    let data = parts.next().transpose()?.unwrap_or(arbitration);
    if parts.next().is_some() {
        return Err(Error::InvalidConfig(format!("too many bitrate values in '{raw}'")));
    }
    Ok((arbitration, data))
}
