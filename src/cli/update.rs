/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! `cyphal update` — flash device software from an image file or directory.

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::eyre;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use prettytable::{row, Table};

use crate::client::{Client, DEFAULT_PARALLEL_UPDATES};
use crate::device::Device;
use crate::transport::NodeId;
use crate::types::GetInfoResponse;
use crate::update::{run_update, SoftwareDirectory, SoftwareFile, UpdateOutcome};
use crate::util::parse_node_selection;

#[derive(Parser, Clone)]
pub struct Opts {
    /// A firmware image, or a directory of images
    pub path: PathBuf,

    /// Nodes to consider: "all", or a set like "1,3,10-20,!13"
    #[clap(long, default_value = "all")]
    pub nodes: String,

    /// Flash even if a device already runs the image
    #[clap(short, long)]
    pub force: bool,

    /// Skip the confirmation prompt
    #[clap(short, long)]
    pub yes: bool,

    /// Maximum number of devices updating at the same time
    #[clap(long, default_value_t = DEFAULT_PARALLEL_UPDATES)]
    pub parallel: usize,

    /// How long to listen for heartbeats before planning, in seconds
    #[clap(long, default_value_t = 3.0)]
    pub timeout: f64,
}

struct PlanEntry {
    node_id: NodeId,
    info: GetInfoResponse,
    file: SoftwareFile,
}

pub async fn run(client: &Client, opts: &Opts) -> color_eyre::Result<()> {
    let directory = if opts.path.is_dir() {
        SoftwareDirectory::scan(&opts.path)?
    } else {
        SoftwareDirectory::from_files(vec![SoftwareFile::parse(&opts.path)?])
    };
    if directory.is_empty() {
        return Err(eyre!("no firmware images found in {}", opts.path.display()));
    }

    let selection = parse_node_selection(&opts.nodes)?;
    tokio::time::sleep(Duration::from_secs_f64(opts.timeout)).await;

    let mut plan = Vec::new();
    let mut skipped = Vec::new();
    for node in client.tracker().nodes() {
        if !selection.contains(node.node_id) {
            continue;
        }
        let Some(info) = node.info else {
            tracing::warn!(node = %node.node_id, "node identity unknown, skipping");
            continue;
        };
        let Some(file) = directory.best_for(&info) else {
            tracing::debug!(node = %node.node_id, name = info.name, "no image for this device");
            continue;
        };
        if opts.force || file.is_update_for(&info) {
            plan.push(PlanEntry {
                node_id: node.node_id,
                info,
                file: file.clone(),
            });
        } else {
            skipped.push((node.node_id, info));
        }
    }

    print_plan(&plan, &skipped);
    if plan.is_empty() {
        println!("nothing to do");
        return Ok(());
    }
    if !opts.yes && !confirm(plan.len())? {
        println!("aborted");
        return Ok(());
    }

    execute(client, plan, opts.force).await
}

fn print_plan(plan: &[PlanEntry], skipped: &[(NodeId, GetInfoResponse)]) {
    let mut table = Table::new();
    table.add_row(row!["NID", "Device", "Installed", "Available", "Action"]);
    for entry in plan {
        table.add_row(row![
            entry.node_id,
            entry.info.name,
            entry.info.software_version,
            entry.file.software,
            "update"
        ]);
    }
    for (node_id, info) in skipped {
        table.add_row(row![node_id, info.name, info.software_version, "", "up to date"]);
    }
    print!("{table}");
}

fn confirm(count: usize) -> color_eyre::Result<bool> {
    print!("Update {count} node(s)? [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

async fn execute(client: &Client, plan: Vec<PlanEntry>, force: bool) -> color_eyre::Result<()> {
    let progress = MultiProgress::new();
    let spinner_style = ProgressStyle::with_template("{spinner} {msg}")?;
    let bar_style = ProgressStyle::with_template("{msg:>40} [{bar:30}] {bytes}/{total_bytes}")?;

    // One byte-level bar per distinct image, fed from the file server.
    let mut image_bars: HashMap<String, (u64, ProgressBar)> = HashMap::new();
    for entry in &plan {
        let name = entry.file.file_name().to_string();
        if !image_bars.contains_key(&name) {
            let size = std::fs::metadata(&entry.file.path)?.len();
            let bar = progress.add(ProgressBar::new(size).with_style(bar_style.clone()).with_message(name.clone()));
            image_bars.insert(name, (size, bar));
        }
    }

    let mut tasks = tokio::task::JoinSet::new();
    for entry in plan {
        let client = client.clone();
        let spinner = progress.add(
            ProgressBar::new_spinner()
                .with_style(spinner_style.clone())
                .with_message(format!("node {}: waiting", entry.node_id)),
        );
        spinner.enable_steady_tick(Duration::from_millis(120));
        tasks.spawn(async move {
            let device = Device::at(&client, entry.node_id);
            spinner.set_message(format!("node {}: updating to {}", entry.node_id, entry.file.software));
            let result = run_update(&client, &device, &entry.file, force).await;
            match &result {
                Ok(UpdateOutcome::Updated { to, .. }) => {
                    spinner.finish_with_message(format!("node {}: updated to {to}", entry.node_id))
                }
                Ok(UpdateOutcome::AlreadyCurrent) => {
                    spinner.finish_with_message(format!("node {}: already up to date", entry.node_id))
                }
                Err(error) => spinner.finish_with_message(format!("node {}: failed: {error}", entry.node_id)),
            }
            (entry.node_id, entry.info, entry.file, result)
        });
    }

    let mut results = Vec::new();
    let mut poll = tokio::time::interval(Duration::from_millis(200));
    loop {
        tokio::select! {
            joined = tasks.join_next() => {
                match joined {
                    Some(result) => results.push(result?),
                    None => break,
                }
            }
            _ = poll.tick() => {
                for (name, (size, bar)) in &image_bars {
                    bar.set_position(client.file_server().bytes_served(name).min(*size));
                }
            }
        }
    }
    for (_, (size, bar)) in &image_bars {
        bar.set_position(*size);
        bar.finish();
    }

    let mut failures = 0;
    let mut table = Table::new();
    table.add_row(row!["NID", "Device", "From", "To", "Result"]);
    results.sort_by_key(|(node_id, ..)| *node_id);
    for (node_id, info, file, result) in &results {
        let (to, outcome) = match result {
            Ok(UpdateOutcome::Updated { to, .. }) => (to.to_string(), "updated".to_string()),
            Ok(UpdateOutcome::AlreadyCurrent) => (info.software_version.to_string(), "up to date".to_string()),
            Err(error) => {
                failures += 1;
                (file.software.to_string(), format!("failed: {error}"))
            }
        };
        table.add_row(row![node_id, info.name, info.software_version, to, outcome]);
    }
    print!("{table}");

    if failures > 0 {
        return Err(eyre!("{failures} update(s) failed"));
    }
    Ok(())
}
