/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! Software update planning and execution.
//!
//! Firmware images follow the standard naming convention
//! `<name>-<hw>-v<sw>[.<vcs>][.<crc>].app[.<ext>]`, for example
//! `com.starcopter.aeric.mmb-3.1-v0.9.8708f4b3b6a63a53.4b63a1d2c5e8f901.app.bin`.
//! The name and hardware version select the image for a device; the software
//! version, VCS revision, and image CRC decide whether an update is needed.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::client::Client;
use crate::device::Device;
use crate::types::{ExecuteCommand, GetInfoResponse, Mode, Version};
use crate::{Error, Result};

/// Update grace period: image transfer plus flash and reboot.
const UPDATE_TIMEOUT: Duration = Duration::from_secs(180);
/// How long the device has to enter software update mode after the command.
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_millis(200);
const BEGIN_ATTEMPTS: u32 = 3;

/// A firmware image file with the metadata encoded in its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftwareFile {
    pub path: PathBuf,
    /// Target node name, e.g. `com.starcopter.aeric.mmb`.
    pub name: String,
    pub hardware: Version,
    pub software: Version,
    pub vcs_revision_id: Option<u64>,
    pub image_crc: Option<u64>,
}

impl SoftwareFile {
    pub fn parse(path: impl Into<PathBuf>) -> Result<Self> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(
                r"(?x)^
                (?P<name>[a-z0-9_]+(?:\.[a-z0-9_]+)+)
                -(?P<hw_major>\d+)\.(?P<hw_minor>\d+)
                -v(?P<sw_major>\d+)\.(?P<sw_minor>\d+)
                (?:\.(?P<vcs>[0-9a-fA-F]{16}))?
                (?:\.(?P<crc>[0-9a-fA-F]{16}))?
                \.app(?:\.\w+)?$",
            )
            .unwrap()
        });

        let path: PathBuf = path.into();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::InvalidSoftwareFile(path.display().to_string()))?;
        let captures = pattern
            .captures(file_name)
            .ok_or_else(|| Error::InvalidSoftwareFile(file_name.to_string()))?;

        let version = |major: &str, minor: &str| Version {
            // The pattern guarantees decimal digits.
            major: captures[major].parse().unwrap_or(u8::MAX),
            minor: captures[minor].parse().unwrap_or(u8::MAX),
        };
        let hex = |group: &str| {
            captures
                .name(group)
                .map(|m| u64::from_str_radix(m.as_str(), 16).unwrap_or(0))
        };

        Ok(Self {
            name: captures["name"].to_string(),
            hardware: version("hw_major", "hw_minor"),
            software: version("sw_major", "sw_minor"),
            vcs_revision_id: hex("vcs"),
            image_crc: hex("crc"),
            path,
        })
    }

    pub fn file_name(&self) -> &str {
        // Parsing guarantees a valid UTF-8 file name.
        self.path.file_name().and_then(|name| name.to_str()).unwrap_or_default()
    }

    /// Whether this image targets the given device at all.
    pub fn compatible_with(&self, info: &GetInfoResponse) -> bool {
        self.name == info.name && self.hardware == info.hardware_version
    }

    /// Whether flashing this image would change the device.
    ///
    /// True for a newer software version, and for a same-version image whose
    /// VCS revision or image CRC differs from what the device reports.
    pub fn is_update_for(&self, info: &GetInfoResponse) -> bool {
        if !self.compatible_with(info) {
            return false;
        }
        if self.software != info.software_version {
            return self.software > info.software_version;
        }
        if let Some(vcs) = self.vcs_revision_id {
            if vcs != info.software_vcs_revision_id {
                return true;
            }
        }
        match (self.image_crc, info.software_image_crc) {
            (Some(ours), Some(theirs)) => ours != theirs,
            _ => false,
        }
    }
}

/// A directory of firmware images.
#[derive(Debug, Clone, Default)]
pub struct SoftwareDirectory {
    files: Vec<SoftwareFile>,
}

impl SoftwareDirectory {
    /// Scans a directory, collecting every file that parses as a firmware
    /// image. Other files are ignored.
    pub fn scan(dir: &Path) -> Result<Self> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            match SoftwareFile::parse(&path) {
                Ok(file) => files.push(file),
                Err(_) => tracing::debug!(path = %path.display(), "not a firmware image, skipping"),
            }
        }
        tracing::debug!(dir = %dir.display(), count = files.len(), "scanned software directory");
        Ok(Self { files })
    }

    pub fn from_files(files: Vec<SoftwareFile>) -> Self {
        Self { files }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SoftwareFile> {
        self.files.iter()
    }

    /// The most recent image compatible with the given device, if any.
    pub fn best_for(&self, info: &GetInfoResponse) -> Option<&SoftwareFile> {
        self.files
            .iter()
            .filter(|file| file.compatible_with(info))
            .max_by_key(|file| (file.software, file.vcs_revision_id))
    }
}

/// Result of one device update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The device was reflashed and came back with the new image.
    Updated { from: Version, to: Version },
    /// The device already runs this image; nothing was sent.
    AlreadyCurrent,
}

/// Updates one device from the given image.
///
/// Holds one of the client's update slots for the duration, bounding how
/// many devices flash concurrently. Unless `force` is set, a device already
/// running the image is left alone.
pub async fn run_update(client: &Client, device: &Device, file: &SoftwareFile, force: bool) -> Result<UpdateOutcome> {
    let info = device.info().await?;
    if !file.compatible_with(&info) {
        return Err(Error::UpdateFailed(format!(
            "{} is not applicable to {} hw {}",
            file.file_name(),
            info.name,
            info.hardware_version
        )));
    }
    if !force && !file.is_update_for(&info) {
        tracing::info!(node = %device.node_id(), "already up to date");
        return Ok(UpdateOutcome::AlreadyCurrent);
    }

    let _slot = client
        .update_slots()
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| Error::NodeClosed)?;

    let served_name = client.file_server().stage(&file.path)?;
    tracing::info!(
        node = %device.node_id(),
        image = served_name,
        from = %info.software_version,
        to = %file.software,
        "starting software update"
    );

    begin_update(device, &served_name).await?;
    wait_for_mode(device, Mode::SoftwareUpdate, ACCEPT_TIMEOUT)
        .await
        .map_err(|_| Error::UpdateFailed(format!("node {} did not enter update mode", device.node_id())))?;

    // The device pulls the image over uavcan.file.Read, flashes it, and
    // restarts; completion shows as a heartbeat out of update mode.
    client.wait_for_restart(device.node_id(), UPDATE_TIMEOUT).await?;
    wait_for_mode_change(device, Mode::SoftwareUpdate, ACCEPT_TIMEOUT)
        .await
        .map_err(|_| Error::UpdateFailed(format!("node {} is stuck in update mode", device.node_id())))?;

    let new_info = device.info().await?;
    if new_info.software_version != file.software {
        return Err(Error::UpdateFailed(format!(
            "node {} reports {} after flashing {}",
            device.node_id(),
            new_info.software_version,
            file.software
        )));
    }
    tracing::info!(node = %device.node_id(), version = %new_info.software_version, "software update complete");
    Ok(UpdateOutcome::Updated {
        from: info.software_version,
        to: new_info.software_version,
    })
}

async fn begin_update(device: &Device, image: &str) -> Result<()> {
    let mut last_error = None;
    for _attempt in 0..BEGIN_ATTEMPTS {
        match device
            .execute(ExecuteCommand::COMMAND_BEGIN_SOFTWARE_UPDATE, image.as_bytes().to_vec())
            .await
        {
            Ok(_) => return Ok(()),
            Err(error @ Error::ServiceTimeout(_, _)) => last_error = Some(error),
            Err(error) => return Err(error),
        }
    }
    Err(last_error.unwrap_or(Error::NodeClosed))
}

async fn wait_for_mode(device: &Device, mode: Mode, timeout: Duration) -> Result<()> {
    poll(timeout, || device.heartbeat().is_some_and(|hb| hb.mode == mode)).await
}

async fn wait_for_mode_change(device: &Device, mode: Mode, timeout: Duration) -> Result<()> {
    poll(timeout, || device.heartbeat().is_some_and(|hb| hb.mode != mode)).await
}

async fn poll(timeout: Duration, mut done: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if done() {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(Error::Timeout("condition not met".into()));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
