/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! `cyphal discover` — list the nodes on the bus.

use std::time::Duration;

use clap::Parser;
use prettytable::{row, Table};
use serde::Serialize;

use crate::client::{Client, TrackedNode};
use crate::util::format_uptime;

#[derive(Parser, Clone)]
pub struct Opts {
    /// How long to listen for heartbeats before printing, in seconds
    #[clap(long, default_value_t = 3.0)]
    pub timeout: f64,

    /// Keep running and refresh the table once per second
    #[clap(short, long)]
    pub watch: bool,

    /// Print the node list as JSON instead of a table
    #[clap(long, conflicts_with = "watch")]
    pub json: bool,
}

#[derive(Serialize)]
struct NodeRow {
    node_id: u8,
    name: Option<String>,
    software_version: Option<String>,
    hardware_version: Option<String>,
    unique_id: Option<String>,
    uptime: u32,
    health: String,
    mode: String,
    vendor_status: u8,
}

impl From<&TrackedNode> for NodeRow {
    fn from(node: &TrackedNode) -> Self {
        Self {
            node_id: node.node_id.get(),
            name: node.info.as_ref().map(|info| info.name.clone()),
            software_version: node.info.as_ref().map(|info| {
                format!("{}.{:08x}", info.software_version, info.software_vcs_revision_id as u32)
            }),
            hardware_version: node.info.as_ref().map(|info| info.hardware_version.to_string()),
            unique_id: node.info.as_ref().map(|info| info.unique_id_hex()),
            uptime: node.heartbeat.uptime,
            health: node.heartbeat.health.to_string(),
            mode: node.heartbeat.mode.to_string(),
            vendor_status: node.heartbeat.vendor_specific_status_code,
        }
    }
}

pub async fn run(client: &Client, opts: &Opts) -> color_eyre::Result<()> {
    tokio::time::sleep(Duration::from_secs_f64(opts.timeout)).await;

    if opts.json {
        let rows: Vec<NodeRow> = client.tracker().nodes().iter().map(NodeRow::from).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if !opts.watch {
        print!("{}", render(&client.tracker().nodes()));
        return Ok(());
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Clear the screen and move the cursor home.
                print!("\x1b[2J\x1b[H{}", render(&client.tracker().nodes()));
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

fn render(nodes: &[TrackedNode]) -> String {
    let mut table = Table::new();
    table.add_row(row!["NID", "Name", "SW", "HW", "UID", "Up", "Health", "Mode", "VSSC"]);
    for node in nodes {
        let row = NodeRow::from(node);
        table.add_row(row![
            row.node_id,
            row.name.unwrap_or_else(|| "?".into()),
            row.software_version.unwrap_or_else(|| "?".into()),
            row.hardware_version.unwrap_or_else(|| "?".into()),
            row.unique_id.unwrap_or_else(|| "?".into()),
            format_uptime(u64::from(row.uptime)),
            row.health,
            row.mode,
            row.vendor_status
        ]);
    }
    if nodes.is_empty() {
        "no nodes online\n".to_string()
    } else {
        table.to_string()
    }
}
