/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! Raw CAN frame link abstraction and the SocketCAN implementation.

use std::io;

use async_trait::async_trait;
use socketcan::tokio::{CanFdSocket, CanSocket};
use socketcan::{CanAnyFrame, CanFdFrame, CanFrame, EmbeddedFrame, ExtendedId, Frame};

use super::frame::Mtu;

/// A raw CAN frame with a 29-bit extended ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub can_id: u32,
    pub data: Vec<u8>,
}

/// Asynchronous CAN frame link.
///
/// Only extended-ID data frames are relevant to Cyphal; implementations drop
/// everything else. `recv` is only ever polled from one task at a time.
#[async_trait]
pub trait CanBus: Send + Sync {
    async fn send(&self, frame: RawFrame) -> io::Result<()>;
    async fn recv(&self) -> io::Result<RawFrame>;
    fn mtu(&self) -> Mtu;
}

/// SocketCAN link, classic or FD depending on the configured MTU.
pub enum SocketCanBus {
    Classic(CanSocket),
    Fd(CanFdSocket),
}

impl SocketCanBus {
    /// Opens the given channel, e.g. `can0` or `vcan0`.
    pub fn open(channel: &str, mtu: Mtu) -> io::Result<Self> {
        match mtu {
            Mtu::Classic => CanSocket::open(channel).map(Self::Classic),
            Mtu::Fd => CanFdSocket::open(channel).map(Self::Fd),
        }
    }
}

fn extended_id(can_id: u32) -> io::Result<ExtendedId> {
    ExtendedId::new(can_id).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("CAN ID {can_id:#x} exceeds 29 bits"))
    })
}

#[async_trait]
impl CanBus for SocketCanBus {
    async fn send(&self, frame: RawFrame) -> io::Result<()> {
        let id = extended_id(frame.can_id)?;
        match self {
            Self::Classic(socket) => {
                let frame = CanFrame::new(id, &frame.data)
                    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "frame exceeds 8 data bytes"))?;
                socket.write_frame(frame).await
            }
            Self::Fd(socket) => {
                let frame = CanFdFrame::new(id, &frame.data)
                    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "frame exceeds 64 data bytes"))?;
                socket.write_frame(&frame).await
            }
        }
    }

    async fn recv(&self) -> io::Result<RawFrame> {
        loop {
            match self {
                Self::Classic(socket) => {
                    if let CanFrame::Data(frame) = socket.read_frame().await? {
                        if frame.is_extended() {
                            return Ok(RawFrame {
                                can_id: frame.raw_id(),
                                data: frame.data().to_vec(),
                            });
                        }
                    }
                }
                Self::Fd(socket) => match socket.read_frame().await? {
                    CanAnyFrame::Normal(frame) if frame.is_extended() => {
                        return Ok(RawFrame {
                            can_id: frame.raw_id(),
                            data: frame.data().to_vec(),
                        });
                    }
                    CanAnyFrame::Fd(frame) if frame.is_extended() => {
                        return Ok(RawFrame {
                            can_id: frame.raw_id(),
                            data: frame.data().to_vec(),
                        });
                    }
                    _ => {}
                },
            }
        }
    }

    fn mtu(&self) -> Mtu {
        match self {
            Self::Classic(_) => Mtu::Classic,
            Self::Fd(_) => Mtu::Fd,
        }
    }
}
