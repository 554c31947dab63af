/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! `cyphal restart` — restart one or more devices.

use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::eyre;

use crate::client::Client;
use crate::device::Device;
use crate::util::{parse_node_selection, NodeSelection};

#[derive(Parser, Clone)]
pub struct Opts {
    /// Nodes to restart: "all", or a set like "1,3,10-20,!13"
    pub nodes: String,

    /// Return immediately instead of waiting for the nodes to come back
    #[clap(long)]
    pub no_wait: bool,

    /// How long to listen for heartbeats before restarting, in seconds
    #[clap(long, default_value_t = 3.0)]
    pub timeout: f64,
}

pub async fn run(client: &Client, opts: &Opts) -> color_eyre::Result<()> {
    let selection = parse_node_selection(&opts.nodes)?;
    tokio::time::sleep(Duration::from_secs_f64(opts.timeout)).await;

    let targets: Vec<_> = client
        .tracker()
        .nodes()
        .into_iter()
        .filter(|node| selection.contains(node.node_id))
        .collect();
    if targets.is_empty() {
        return Err(eyre!("no matching nodes online"));
    }
    if let NodeSelection::Ids(requested) = &selection {
        for id in requested {
            if !targets.iter().any(|node| node.node_id == *id) {
                tracing::warn!(node = %id, "requested node is not online, skipping");
            }
        }
    }

    let mut tasks = tokio::task::JoinSet::new();
    for target in targets {
        let device = Device::at(client, target.node_id);
        let wait = !opts.no_wait;
        tasks.spawn(async move {
            let result = device.restart(wait, Duration::ZERO).await;
            (device.node_id(), result)
        });
    }

    let mut failures = 0;
    while let Some(joined) = tasks.join_next().await {
        let (node_id, result) = joined?;
        match result {
            Ok(()) => println!("node {node_id}: restarted"),
            Err(error) => {
                failures += 1;
                eprintln!("node {node_id}: {error}");
            }
        }
    }
    if failures > 0 {
        return Err(eyre!("{failures} node(s) failed to restart"));
    }
    Ok(())
}
