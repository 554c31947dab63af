/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! Transfer (de)segmentation.
//!
//! Outgoing transfers are cut into frames of at most MTU bytes, each closed
//! by a tail byte. Multi-frame transfers carry a big-endian CRC-16 after the
//! payload; padding inserted to reach a valid CAN FD length is covered by
//! the CRC. Incoming frames are reassembled per (port, source) session.

use std::time::{Duration, Instant};

use super::frame::{Mtu, TailByte, TransferCrc, PAD_VALUE, SOT_TOGGLE_BIT};
use super::TRANSFER_ID_MODULO;

/// Splits a transfer payload into CAN frame payloads, tail bytes included.
pub fn segment(payload: &[u8], mtu: Mtu, transfer_id: u8) -> Vec<Vec<u8>> {
    let mtu_bytes = mtu.as_usize();
    let transfer_id = transfer_id % TRANSFER_ID_MODULO;

    if payload.len() + 1 <= mtu_bytes {
        // Single-frame transfer, no CRC. Padding to a valid CAN FD length is
        // harmless: decoders tolerate trailing zeros.
        let padded = mtu.round_up(payload.len() + 1) - 1;
        let mut frame = Vec::with_capacity(padded + 1);
        frame.extend_from_slice(payload);
        frame.resize(padded, PAD_VALUE);
        frame.push(TailByte::new(true, true, SOT_TOGGLE_BIT, transfer_id).into());
        return vec![frame];
    }

    let chunk = mtu_bytes - 1;

    // Pad the payload so the final frame (remainder + CRC + tail) has a valid
    // CAN FD length. Classic CAN needs no padding, every length 0..=8 works.
    let mut padding = 0usize;
    loop {
        let total = payload.len() + padding + TransferCrc::LENGTH;
        let last = match total % chunk {
            0 => chunk,
            rem => rem,
        };
        if mtu.round_up(last + 1) == last + 1 {
            break;
        }
        padding += 1;
    }

    let mut crc = TransferCrc::default();
    crc.add_bytes(payload);
    for _ in 0..padding {
        crc.add(PAD_VALUE);
    }

    let mut stream = Vec::with_capacity(payload.len() + padding + TransferCrc::LENGTH);
    stream.extend_from_slice(payload);
    stream.resize(payload.len() + padding, PAD_VALUE);
    stream.extend_from_slice(&crc.get().to_be_bytes());

    let mut frames = Vec::new();
    let mut toggle = SOT_TOGGLE_BIT;
    let mut offset = 0;
    while offset < stream.len() {
        let end = (offset + chunk).min(stream.len());
        let sot = offset == 0;
        let eot = end == stream.len();
        let mut frame = Vec::with_capacity(end - offset + 1);
        frame.extend_from_slice(&stream[offset..end]);
        frame.push(TailByte::new(sot, eot, toggle, transfer_id).into());
        frames.push(frame);
        toggle = !toggle;
        offset = end;
    }
    frames
}

/// Per-session reassembly state machine.
///
/// A session is one (data specifier, source node) pair; the caller keys
/// reassemblers accordingly. Transfers not completed within the timeout are
/// discarded, and a completed transfer ID is remembered to drop duplicates.
#[derive(Debug)]
pub struct Reassembler {
    timeout: Duration,
    state: Option<InProgress>,
    last_completed: Option<(u8, Instant)>,
}

#[derive(Debug)]
struct InProgress {
    transfer_id: u8,
    toggle: bool,
    buffer: Vec<u8>,
    deadline: Instant,
}

impl Reassembler {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            state: None,
            last_completed: None,
        }
    }

    /// Feeds one frame payload (tail byte still attached) into the session.
    ///
    /// Returns the reassembled transfer payload once a transfer completes.
    /// Multi-frame payloads keep their padding (trailing zeros); the CRC is
    /// verified and stripped.
    pub fn push(&mut self, data: &[u8], now: Instant) -> Option<Vec<u8>> {
        let (&tail_raw, payload) = data.split_last()?;
        let tail = TailByte::from(tail_raw);

        if let Some((id, when)) = self.last_completed {
            if id == tail.transfer_id() && now.duration_since(when) < self.timeout {
                // Duplicate of a transfer we already delivered.
                return None;
            }
        }

        if tail.sot() {
            if tail.toggle() != SOT_TOGGLE_BIT {
                return None;
            }
            if tail.eot() {
                // Single-frame transfer.
                self.state = None;
                self.last_completed = Some((tail.transfer_id(), now));
                return Some(payload.to_vec());
            }
            self.state = Some(InProgress {
                transfer_id: tail.transfer_id(),
                toggle: !SOT_TOGGLE_BIT,
                buffer: payload.to_vec(),
                deadline: now + self.timeout,
            });
            return None;
        }

        let state = self.state.as_mut()?;
        if now > state.deadline || state.transfer_id != tail.transfer_id() || state.toggle != tail.toggle() {
            self.state = None;
            return None;
        }

        state.buffer.extend_from_slice(payload);
        state.toggle = !state.toggle;

        if !tail.eot() {
            return None;
        }

        let state = self.state.take()?;
        if state.buffer.len() < TransferCrc::LENGTH {
            return None;
        }
        let (payload, crc_bytes) = state.buffer.split_at(state.buffer.len() - TransferCrc::LENGTH);
        let mut crc = TransferCrc::default();
        crc.add_bytes(payload);
        if crc.get().to_be_bytes() != crc_bytes {
            tracing::debug!(transfer_id = state.transfer_id, "transfer CRC mismatch, dropping");
            return None;
        }
        self.last_completed = Some((state.transfer_id, now));
        Some(payload.to_vec())
    }
}
