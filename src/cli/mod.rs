/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! The `cyphal` command line tool.

mod discover;
mod registry;
mod restart;
mod update;
mod version;

use clap::Parser;

use crate::cfg::CanConfig;
use crate::client::{Client, ClientConfig};
use crate::transport::NodeId;

pub const CLIENT_NODE_NAME: &str = "com.starcopter.tools.cyphal";

#[derive(Parser)]
#[clap(name = "cyphal", version, about = "Interact with Cyphal devices on a CAN bus")]
pub struct App {
    /// Increase log verbosity (-v debug, -vv trace)
    #[clap(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// SocketCAN interface, overrides UAVCAN__CAN__IFACE
    #[clap(long, global = true)]
    pub iface: Option<String>,

    /// Own node ID, overrides UAVCAN__NODE__ID
    #[clap(long, global = true)]
    pub node_id: Option<NodeId>,

    /// Bitrate as "arbitration [data]", overrides UAVCAN__CAN__BITRATE
    #[clap(long, global = true)]
    pub bitrate: Option<String>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Parser)]
pub enum Command {
    /// Watch the bus and list all online nodes
    Discover(discover::Opts),
    /// Inspect and modify a device's registers
    Registry(registry::Opts),
    /// Restart one or more devices
    Restart(restart::Opts),
    /// Update device software from an image file or directory
    Update(update::Opts),
    /// Print version information
    Version,
}

impl App {
    /// Builds the effective CAN configuration: environment first, command
    /// line overrides on top.
    fn can_config(&self) -> crate::Result<CanConfig> {
        let mut config = CanConfig::from_env()?;
        if let Some(iface) = &self.iface {
            config.iface = iface.clone();
        }
        if let Some(node_id) = self.node_id {
            config.node_id = Some(node_id);
        }
        if let Some(bitrate) = &self.bitrate {
            (config.arbitration_bitrate, config.data_bitrate) = crate::cfg::parse_bitrate(bitrate)?;
        }
        Ok(config)
    }

    async fn client(&self, parallel_updates: Option<usize>) -> crate::Result<Client> {
        let mut config = ClientConfig::named(CLIENT_NODE_NAME);
        config.can = Some(self.can_config()?);
        if let Some(parallel) = parallel_updates {
            config.parallel_updates = parallel;
        }
        Client::new(config).await
    }
}

/// Entry point called from `main`.
pub async fn run(app: App) -> color_eyre::Result<()> {
    match &app.command {
        Command::Version => version::run(),
        Command::Discover(opts) => {
            let opts = opts.clone();
            let client = app.client(None).await?;
            discover::run(&client, &opts).await
        }
        Command::Registry(opts) => {
            let opts = opts.clone();
            let client = app.client(None).await?;
            registry::run(&client, &opts).await
        }
        Command::Restart(opts) => {
            let opts = opts.clone();
            let client = app.client(None).await?;
            restart::run(&client, &opts).await
        }
        Command::Update(opts) => {
            let opts = opts.clone();
            let client = app.client(Some(opts.parallel)).await?;
            update::run(&client, &opts).await
        }
    }
}
