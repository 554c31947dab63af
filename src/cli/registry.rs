/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! `cyphal registry` — inspect and modify a device's registers.

use clap::Parser;
use color_eyre::eyre::eyre;
use prettytable::{row, Table};
use serde::Serialize;

use crate::client::Client;
use crate::device::Device;
use crate::registry::{parse_value, Register};
use crate::transport::NodeId;

#[derive(Parser, Clone)]
pub struct Opts {
    /// Target node ID
    pub node: NodeId,

    /// Register name; omit to list all registers
    pub name: Option<String>,

    /// New value to write; numbers, "true"/"false", or a string
    pub value: Option<String>,

    /// Reset the register to its device-provided default
    #[clap(long, conflicts_with = "value")]
    pub reset: bool,

    /// Print registers as JSON instead of a table
    #[clap(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct RegisterRow {
    name: String,
    value: String,
    dtype: String,
    mutable: bool,
    persistent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    default: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<String>,
}

impl From<&Register> for RegisterRow {
    fn from(register: &Register) -> Self {
        Self {
            name: register.name.clone(),
            value: register.value.to_string(),
            dtype: register.dtype(),
            mutable: register.mutable,
            persistent: register.persistent,
            default: register.default.as_ref().map(|v| v.to_string()),
            min: register.min.as_ref().map(|v| v.to_string()),
            max: register.max.as_ref().map(|v| v.to_string()),
        }
    }
}

pub async fn run(client: &Client, opts: &Opts) -> color_eyre::Result<()> {
    let device = Device::at(client, opts.node);
    let mut registry = device.registry().await?;

    match (&opts.name, &opts.value) {
        (None, _) => {
            let rows: Vec<RegisterRow> = registry.iter().map(RegisterRow::from).collect();
            if opts.json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                print!("{}", render(&rows));
            }
        }
        (Some(name), None) if opts.reset => {
            let stored = registry.reset(name).await?;
            println!("{name} = {stored}");
        }
        (Some(name), None) => {
            let register = registry
                .get(name)
                .ok_or_else(|| eyre!("node {} has no register '{name}'", opts.node))?;
            let row = RegisterRow::from(register);
            if opts.json {
                println!("{}", serde_json::to_string_pretty(&row)?);
            } else {
                print!("{}", render(std::slice::from_ref(&row)));
            }
        }
        (Some(name), Some(raw)) => {
            let register = registry
                .get(name)
                .ok_or_else(|| eyre!("node {} has no register '{name}'", opts.node))?;
            let value = parse_value(raw, &register.value)?;
            let stored = registry.set(name, &value).await?;
            println!("{name} = {stored}");
        }
    }
    Ok(())
}

fn render(rows: &[RegisterRow]) -> String {
    let mut table = Table::new();
    table.add_row(row!["Name", "Value", "Type", "Flags", "Default", "Min", "Max"]);
    for register in rows {
        let flags = format!(
            "{}{}",
            if register.mutable { "M" } else { "-" },
            if register.persistent { "P" } else { "-" }
        );
        let optional = |value: &Option<String>| value.clone().unwrap_or_default();
        table.add_row(row![
            register.name,
            register.value,
            register.dtype,
            flags,
            optional(&register.default),
            optional(&register.min),
            optional(&register.max)
        ]);
    }
    table.to_string()
}
