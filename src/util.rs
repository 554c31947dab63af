/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! Small shared helpers.

use std::collections::BTreeSet;

use crate::transport::NodeId;
use crate::{Error, Result};

/// Node selection on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeSelection {
    /// Every node currently online.
    All,
    /// An explicit set of node IDs.
    Ids(BTreeSet<NodeId>),
}

impl NodeSelection {
    pub fn contains(&self, node: NodeId) -> bool {
        match self {
            NodeSelection::All => true,
            NodeSelection::Ids(ids) => ids.contains(&node),
        }
    }
}

/// Parses a node set expression like `all` or `1,3,10-20,!13`.
///
/// Entries are comma separated: single IDs, inclusive ranges `a-b`, and
/// exclusions prefixed with `!`. Exclusions are applied after all inclusions.
pub fn parse_node_selection(raw: &str) -> Result<NodeSelection> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("all") {
        return Ok(NodeSelection::All);
    }

    let mut included = BTreeSet::new();
    let mut excluded = BTreeSet::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (target, entry) = match entry.strip_prefix('!') {
            Some(rest) => (&mut excluded, rest),
            None => (&mut included, entry),
        };
        match entry.split_once('-') {
            Some((start, end)) => {
                let start: NodeId = start.trim().parse().map_err(Error::InvalidConfig)?;
                let end: NodeId = end.trim().parse().map_err(Error::InvalidConfig)?;
                if start > end {
                    return Err(Error::InvalidConfig(format!("empty range '{entry}'")));
                }
                for id in start.get()..=end.get() {
                    target.extend(NodeId::new(id));
                }
            }
            None => {
                let id: NodeId = entry.parse().map_err(Error::InvalidConfig)?;
                target.insert(id);
            }
        }
    }

    if included.is_empty() {
        return Err(Error::InvalidConfig(format!("no nodes selected by '{raw}'")));
    }
    Ok(NodeSelection::Ids(&included - &excluded))
}

/// Formats an uptime in seconds as `[Nd ]HH:MM:SS`.
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = seconds % 86_400 / 3_600;
    let minutes = seconds % 3_600 / 60;
    let seconds = seconds % 60;
    if days > 0 {
        format!("{days}d {hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(selection: &NodeSelection) -> Vec<u8> {
        match selection {
            NodeSelection::All => panic!("expected explicit IDs"),
            NodeSelection::Ids(set) => set.iter().map(|id| id.get()).collect(),
        }
    }

    #[test]
    fn parses_all() {
        assert_eq!(parse_node_selection("all").unwrap(), NodeSelection::All);
        assert_eq!(parse_node_selection(" ALL ").unwrap(), NodeSelection::All);
    }

    #[test]
    fn parses_ranges_and_exclusions() {
        let selection = parse_node_selection("1,3,10-14,!13").unwrap();
        assert_eq!(ids(&selection), vec![1, 3, 10, 11, 12, 14]);
    }

    #[test]
    fn rejects_nonsense() {
        assert!(parse_node_selection("").is_err());
        assert!(parse_node_selection("twelve").is_err());
        assert!(parse_node_selection("20-10").is_err());
        assert!(parse_node_selection("!5").is_err());
    }

    #[test]
    fn formats_uptime() {
        assert_eq!(format_uptime(59), "00:00:59");
        assert_eq!(format_uptime(3_725), "01:02:05");
        assert_eq!(format_uptime(90_061), "1d 01:01:01");
    }
}
