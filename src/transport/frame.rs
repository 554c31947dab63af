/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! Frame-level primitives: tail byte, transfer CRC, MTU and DLC rounding.

/// Maximum transmission unit of the CAN link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Mtu {
    Classic,
    Fd,
}

impl Mtu {
    pub const fn as_usize(self) -> usize {
        match self {
            Mtu::Classic => 8,
            Mtu::Fd => 64,
        }
    }

    /// Rounds a frame length up to the next valid CAN data length.
    ///
    /// Classic CAN supports any length 0..=8; CAN FD DLCs only encode a
    /// limited set of lengths above 8.
    pub fn round_up(self, length: usize) -> usize {
        match self {
            Mtu::Classic => length.min(8),
            Mtu::Fd => match length {
                0..=8 => length,
                9..=12 => 12,
                13..=16 => 16,
                17..=20 => 20,
                21..=24 => 24,
                25..=32 => 32,
                33..=48 => 48,
                _ => 64,
            },
        }
    }
}

/// CRC-16/CCITT-FALSE over the transfer payload, appended to the last frame
/// of a multi-frame transfer.
#[derive(Debug, Clone, Copy)]
pub struct TransferCrc(u16);

impl Default for TransferCrc {
    fn default() -> Self {
        Self(Self::INIT_VALUE)
    }
}

impl TransferCrc {
    pub const LENGTH: usize = 2;
    const INIT_VALUE: u16 = 0xffff;
    const POLYNOMIAL: u16 = 0x1021;

    pub fn add(&mut self, byte: u8) {
        self.0 ^= u16::from(byte) << 8;
        for _bit in 0..8 {
            if (self.0 & 0x8000) != 0 {
                self.0 = (self.0 << 1) ^ Self::POLYNOMIAL;
            } else {
                self.0 <<= 1;
            }
        }
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) {
        bytes.iter().for_each(|&byte| self.add(byte));
    }

    pub fn get(&self) -> u16 {
        self.0
    }
}

/// Tail byte carried as the last byte of every Cyphal/CAN frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailByte(u8);

impl TailByte {
    const START_OF_TRANSFER: u8 = 7;
    const END_OF_TRANSFER: u8 = 6;
    const TOGGLE_BIT: u8 = 5;

    pub fn new(sot: bool, eot: bool, toggle: bool, transfer_id: u8) -> Self {
        Self(
            (sot as u8) << Self::START_OF_TRANSFER
                | (eot as u8) << Self::END_OF_TRANSFER
                | (toggle as u8) << Self::TOGGLE_BIT
                | (transfer_id & (super::TRANSFER_ID_MODULO - 1)),
        )
    }

    pub fn sot(self) -> bool {
        (self.0 >> Self::START_OF_TRANSFER) & 0x1 != 0
    }

    pub fn eot(self) -> bool {
        (self.0 >> Self::END_OF_TRANSFER) & 0x1 != 0
    }

    pub fn toggle(self) -> bool {
        (self.0 >> Self::TOGGLE_BIT) & 0x1 != 0
    }

    pub fn transfer_id(self) -> u8 {
        self.0 & (super::TRANSFER_ID_MODULO - 1)
    }
}

impl From<TailByte> for u8 {
    fn from(value: TailByte) -> Self {
        value.0
    }
}

impl From<u8> for TailByte {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

/// Toggle bit value of a start-of-transfer frame.
pub const SOT_TOGGLE_BIT: bool = true;

/// Value of padding bytes inserted to reach a valid CAN FD length.
pub const PAD_VALUE: u8 = 0;
