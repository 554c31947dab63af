/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! In-process loopback bus.
//!
//! Every endpoint attached to a [`VirtualBus`] sees the frames sent by all
//! other endpoints, like nodes on a shared CAN segment. Used for tests and
//! for running mock devices against a real client without hardware.

use std::io;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::bus::{CanBus, RawFrame};
use super::frame::Mtu;

const BUS_CAPACITY: usize = 1024;

/// A shared virtual CAN segment. Cheap to clone; each [`attach`] creates a
/// new endpoint.
///
/// [`attach`]: VirtualBus::attach
#[derive(Clone)]
pub struct VirtualBus {
    sender: broadcast::Sender<(usize, RawFrame)>,
    mtu: Mtu,
}

impl VirtualBus {
    pub fn new(mtu: Mtu) -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender, mtu }
    }

    pub fn attach(&self) -> LoopbackBus {
        static NEXT_ENDPOINT: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);
        let endpoint = NEXT_ENDPOINT.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        LoopbackBus {
            endpoint,
            sender: self.sender.clone(),
            receiver: tokio::sync::Mutex::new(self.sender.subscribe()),
            mtu: self.mtu,
        }
    }
}

/// One endpoint on a [`VirtualBus`].
pub struct LoopbackBus {
    endpoint: usize,
    sender: broadcast::Sender<(usize, RawFrame)>,
    receiver: tokio::sync::Mutex<broadcast::Receiver<(usize, RawFrame)>>,
    mtu: Mtu,
}

#[async_trait]
impl CanBus for LoopbackBus {
    async fn send(&self, frame: RawFrame) -> io::Result<()> {
        // A send with no attached receivers is not an error on a CAN bus.
        let _ = self.sender.send((self.endpoint, frame));
        Ok(())
    }

    async fn recv(&self) -> io::Result<RawFrame> {
        let mut receiver = self.receiver.lock().await;
        loop {
            match receiver.recv().await {
                Ok((endpoint, _)) if endpoint == self.endpoint => continue,
                Ok((_, frame)) => return Ok(frame),
                Err(broadcast::error::RecvError::Lagged(lost)) => {
                    tracing::warn!(lost, "loopback bus overflow, frames dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "virtual bus closed"));
                }
            }
        }
    }

    fn mtu(&self) -> Mtu {
        self.mtu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_reach_other_endpoints_but_not_self() {
        let bus = VirtualBus::new(Mtu::Classic);
        let a = bus.attach();
        let b = bus.attach();

        let frame = RawFrame {
            can_id: 0x107D552A,
            data: vec![1, 2, 3],
        };
        a.send(frame.clone()).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), frame);

        // The sender must not receive its own frame.
        b.send(RawFrame { can_id: 1, data: vec![] }).await.unwrap();
        let received = a.recv().await.unwrap();
        assert_eq!(received.can_id, 1);
    }
}
