/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 starcopter GmbH
 * SPDX-License-Identifier: MIT
 */

//! A local Cyphal node.
//!
//! [`LocalNode`] multiplexes one CAN link between any number of publishers,
//! subscribers, service clients and service servers. A background pump task
//! owns the link; handles are cheap to clone and share it.

use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};

use crate::transport::can_id::{FrameHeader, TransferKind};
use crate::transport::session::{segment, Reassembler};
use crate::transport::{CanBus, Mtu, NodeId, Priority, RawFrame, ServiceId, SubjectId, Transfer, TransferMeta};
use crate::types::{Health, Heartbeat, Message, Mode, Object, Service};
use crate::{Error, Result};

const SUBSCRIPTION_BUFFER: usize = 64;
const SERVER_BUFFER: usize = 16;
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(2);

/// Handle to a local Cyphal node. Clones share the same node.
#[derive(Clone)]
pub struct LocalNode {
    inner: Arc<Inner>,
}

struct Inner {
    node_id: Option<NodeId>,
    mtu: Mtu,
    started: Instant,
    tx: mpsc::Sender<RawFrame>,
    shared: Arc<Mutex<Shared>>,
    health: AtomicU8,
    mode: AtomicU8,
    vendor_status: AtomicU8,
}

#[derive(Default)]
struct Shared {
    subscribers: HashMap<SubjectId, Vec<mpsc::Sender<(TransferMeta, Vec<u8>)>>>,
    servers: HashMap<ServiceId, mpsc::Sender<(TransferMeta, Vec<u8>)>>,
    pending: HashMap<(ServiceId, NodeId, u8), oneshot::Sender<Vec<u8>>>,
    transfer_ids: HashMap<TransferKind, u8>,
}

impl LocalNode {
    /// Starts a node on the given link.
    ///
    /// With `node_id == None` the node is anonymous: it can listen and send
    /// single-frame anonymous messages, but cannot use services. A node with
    /// an ID publishes its heartbeat at 1 Hz.
    pub fn new(bus: impl CanBus + 'static, node_id: Option<NodeId>) -> Self {
        let mtu = bus.mtu();
        let (tx, rx) = mpsc::channel(256);
        let shared = Arc::new(Mutex::new(Shared::default()));

        tokio::spawn(pump(bus, rx, Arc::clone(&shared)));

        let node = Self {
            inner: Arc::new(Inner {
                node_id,
                mtu,
                started: Instant::now(),
                tx,
                shared,
                health: AtomicU8::new(Health::Nominal as u8),
                mode: AtomicU8::new(Mode::Operational as u8),
                vendor_status: AtomicU8::new(0),
            }),
        };
        if node_id.is_some() {
            tokio::spawn(heartbeat_task(Arc::downgrade(&node.inner)));
        }
        node
    }

    pub fn id(&self) -> Option<NodeId> {
        self.inner.node_id
    }

    pub fn mtu(&self) -> Mtu {
        self.inner.mtu
    }

    pub fn uptime(&self) -> Duration {
        self.inner.started.elapsed()
    }

    /// Sets the vendor-specific status code carried in the heartbeat.
    pub fn set_vendor_status(&self, code: u8) {
        self.inner.vendor_status.store(code, Ordering::Relaxed);
    }

    pub fn set_mode(&self, mode: Mode) {
        self.inner.mode.store(mode as u8, Ordering::Relaxed);
    }

    pub fn set_health(&self, health: Health) {
        self.inner.health.store(health as u8, Ordering::Relaxed);
    }

    fn heartbeat(&self) -> Heartbeat {
        Heartbeat {
            uptime: self.uptime().as_secs() as u32,
            health: match self.inner.health.load(Ordering::Relaxed) {
                1 => Health::Advisory,
                2 => Health::Caution,
                3 => Health::Warning,
                _ => Health::Nominal,
            },
            mode: match self.inner.mode.load(Ordering::Relaxed) {
                1 => Mode::Initialization,
                2 => Mode::Maintenance,
                3 => Mode::SoftwareUpdate,
                _ => Mode::Operational,
            },
            vendor_specific_status_code: self.inner.vendor_status.load(Ordering::Relaxed),
        }
    }

    /// Publishes a message on its fixed subject.
    pub async fn publish<T: Message>(&self, message: &T, priority: Priority) -> Result<()> {
        self.publish_on(T::SUBJECT, message, priority).await
    }

    /// Publishes a message on an explicit subject, for non-fixed ports.
    pub async fn publish_on<T: Message>(&self, subject: SubjectId, message: &T, priority: Priority) -> Result<()> {
        self.send_transfer(
            TransferKind::Message { subject },
            priority,
            None,
            &Object::to_payload(message),
        )
        .await
    }

    /// Subscribes to a message type on its fixed subject.
    pub fn subscribe<T: Message>(&self) -> Subscription<T> {
        self.subscribe_on(T::SUBJECT)
    }

    /// Subscribes to a message type on an explicit subject.
    pub fn subscribe_on<T: Message>(&self, subject: SubjectId) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.lock_shared().subscribers.entry(subject).or_default().push(tx);
        Subscription {
            receiver: rx,
            _marker: std::marker::PhantomData,
        }
    }

    /// Invokes a service on a remote node and waits for the response.
    pub async fn call<S: Service>(
        &self,
        destination: NodeId,
        request: &S::Request,
        priority: Priority,
        timeout: Duration,
    ) -> Result<S::Response> {
        let source = self.inner.node_id.ok_or(Error::AnonymousNode)?;
        if source == destination {
            return Err(Error::SelfAddressed(destination));
        }

        let kind = TransferKind::Request {
            service: S::SERVICE,
            destination,
        };
        let (tx, rx) = oneshot::channel();
        let transfer_id = {
            let mut shared = self.lock_shared();
            let transfer_id = shared.next_transfer_id(kind);
            shared.pending.insert((S::SERVICE, destination, transfer_id), tx);
            transfer_id
        };

        let result = async {
            self.send_frames(kind, priority, transfer_id, &request.to_payload()).await?;
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(payload)) => Ok(S::Response::from_payload(&payload)?),
                Ok(Err(_)) => Err(Error::NodeClosed),
                Err(_) => Err(Error::ServiceTimeout(S::NAME, destination)),
            }
        }
        .await;

        if result.is_err() {
            self.lock_shared().pending.remove(&(S::SERVICE, destination, transfer_id));
        }
        result
    }

    /// Registers a request handler for a service.
    ///
    /// The handler runs on a dedicated task; returning `None` leaves the
    /// request unanswered.
    pub fn serve<S, F, Fut>(&self, handler: F)
    where
        S: Service,
        F: Fn(TransferMeta, S::Request) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Option<S::Response>> + Send,
    {
        let (tx, mut rx) = mpsc::channel::<(TransferMeta, Vec<u8>)>(SERVER_BUFFER);
        self.lock_shared().servers.insert(S::SERVICE, tx);

        let node = self.clone();
        tokio::spawn(async move {
            while let Some((meta, payload)) = rx.recv().await {
                let request = match S::Request::from_payload(&payload) {
                    Ok(request) => request,
                    Err(error) => {
                        tracing::debug!(service = S::NAME, %error, "dropping malformed request");
                        continue;
                    }
                };
                let Some(source) = meta.source else { continue };
                if let Some(response) = handler(meta, request).await {
                    let kind = TransferKind::Response {
                        service: S::SERVICE,
                        destination: source,
                    };
                    if let Err(error) = node
                        .send_frames(kind, meta.priority, meta.transfer_id, &response.to_payload())
                        .await
                    {
                        tracing::warn!(service = S::NAME, %error, "failed to send response");
                    }
                }
            }
        });
    }

    async fn send_transfer(
        &self,
        kind: TransferKind,
        priority: Priority,
        transfer_id: Option<u8>,
        payload: &[u8],
    ) -> Result<()> {
        let transfer_id = match transfer_id {
            Some(id) => id,
            None => self.lock_shared().next_transfer_id(kind),
        };
        self.send_frames(kind, priority, transfer_id, payload).await
    }

    async fn send_frames(&self, kind: TransferKind, priority: Priority, transfer_id: u8, payload: &[u8]) -> Result<()> {
        let header = FrameHeader {
            priority,
            kind,
            source: self.inner.node_id,
        };
        let frames = segment(payload, self.inner.mtu, transfer_id);
        if self.inner.node_id.is_none() && frames.len() > 1 {
            // Anonymous transfers are limited to a single frame.
            return Err(Error::AnonymousNode);
        }
        let can_id = header.encode(entropy(payload));
        for data in frames {
            self.inner
                .tx
                .send(RawFrame { can_id, data })
                .await
                .map_err(|_| Error::NodeClosed)?;
        }
        Ok(())
    }

    /// Shuts the node down: deregisters all servers, subscriptions, and
    /// pending calls, letting the background tasks (and the link pump, once
    /// the last handle is gone) wind down.
    pub fn close(&self) {
        let mut shared = self.lock_shared();
        shared.servers.clear();
        shared.subscribers.clear();
        shared.pending.clear();
    }

    fn lock_shared(&self) -> std::sync::MutexGuard<'_, Shared> {
        match self.inner.shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Shared {
    fn next_transfer_id(&mut self, kind: TransferKind) -> u8 {
        let counter = self.transfer_ids.entry(kind).or_insert(0);
        let id = *counter;
        *counter = (*counter + 1) % crate::transport::TRANSFER_ID_MODULO;
        id
    }
}

/// Pseudo-random source bits for anonymous frames, derived from the payload.
fn entropy(payload: &[u8]) -> u8 {
    let mut hasher = std::collections::hash_map::RandomState::new().build_hasher();
    payload.hash(&mut hasher);
    hasher.finish() as u8
}

/// A typed message subscription.
pub struct Subscription<T> {
    receiver: mpsc::Receiver<(TransferMeta, Vec<u8>)>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Message> Subscription<T> {
    /// Receives the next message, skipping any that fail to decode.
    ///
    /// Returns `None` once the node shuts down.
    pub async fn recv(&mut self) -> Option<(TransferMeta, T)> {
        loop {
            let (meta, payload) = self.receiver.recv().await?;
            match T::from_payload(&payload) {
                Ok(message) => return Some((meta, message)),
                Err(error) => {
                    tracing::debug!(r#type = T::NAME, %error, "dropping malformed message");
                }
            }
        }
    }
}

async fn heartbeat_task(inner: std::sync::Weak<Inner>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        // Stop once the last external handle is gone.
        let Some(inner) = inner.upgrade() else { break };
        let node = LocalNode { inner };
        let heartbeat = node.heartbeat();
        if node.publish(&heartbeat, Priority::Nominal).await.is_err() {
            break;
        }
    }
}

async fn pump(bus: impl CanBus, mut rx: mpsc::Receiver<RawFrame>, shared: Arc<Mutex<Shared>>) {
    let mut sessions: HashMap<(TransferKind, Option<NodeId>), Reassembler> = HashMap::new();

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                let Some(frame) = outgoing else { break };
                if let Err(error) = bus.send(frame).await {
                    tracing::error!(%error, "CAN send failed");
                }
            }
            incoming = bus.recv() => {
                let frame = match incoming {
                    Ok(frame) => frame,
                    Err(error) => {
                        tracing::error!(%error, "CAN receive failed, stopping node");
                        break;
                    }
                };
                let Some(header) = FrameHeader::decode(frame.can_id) else { continue };
                let reassembler = sessions
                    .entry((header.kind, header.source))
                    .or_insert_with(|| Reassembler::new(TRANSFER_TIMEOUT));
                let Some(payload) = reassembler.push(&frame.data, Instant::now()) else { continue };
                // Tail byte survives in the reassembler state, recover the ID.
                let transfer_id = crate::transport::TailByte::from(*frame.data.last().unwrap_or(&0)).transfer_id();
                let transfer = Transfer {
                    meta: TransferMeta {
                        priority: header.priority,
                        source: header.source,
                        transfer_id,
                    },
                    kind: header.kind,
                    payload,
                };
                dispatch(&shared, transfer);
            }
        }
    }
}

fn dispatch(shared: &Arc<Mutex<Shared>>, transfer: Transfer) {
    let mut shared = match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    match transfer.kind {
        TransferKind::Message { subject } => {
            if let Some(senders) = shared.subscribers.get_mut(&subject) {
                senders.retain(|sender| match sender.try_send((transfer.meta, transfer.payload.clone())) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(%subject, "subscription buffer full, dropping message");
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                });
                if senders.is_empty() {
                    shared.subscribers.remove(&subject);
                }
            }
        }
        TransferKind::Request { service, .. } => {
            if let Some(sender) = shared.servers.get(&service) {
                if sender.try_send((transfer.meta, transfer.payload)).is_err() {
                    tracing::warn!(service = service.get(), "server busy, dropping request");
                }
            }
        }
        TransferKind::Response { service, .. } => {
            if let Some(source) = transfer.meta.source {
                if let Some(waiter) = shared.pending.remove(&(service, source, transfer.meta.transfer_id)) {
                    let _ = waiter.send(transfer.payload);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::loopback::VirtualBus;
    use crate::types::{ExecuteCommand, ExecuteCommandRequest, ExecuteCommandResponse};

    fn node_id(id: u8) -> NodeId {
        NodeId::new(id).unwrap()
    }

    #[tokio::test]
    async fn publish_and_subscribe() {
        let bus = VirtualBus::new(Mtu::Classic);
        let alice = LocalNode::new(bus.attach(), Some(node_id(1)));
        let bob = LocalNode::new(bus.attach(), Some(node_id(2)));

        let mut heartbeats = bob.subscribe::<Heartbeat>();
        let sent = Heartbeat {
            uptime: 17,
            health: Health::Nominal,
            mode: Mode::Operational,
            vendor_specific_status_code: 3,
        };
        alice.publish(&sent, Priority::Nominal).await.unwrap();

        let (meta, received) = heartbeats.recv().await.unwrap();
        assert_eq!(meta.source, Some(node_id(1)));
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn service_call_round_trip() {
        let bus = VirtualBus::new(Mtu::Fd);
        let client = LocalNode::new(bus.attach(), Some(node_id(1)));
        let server = LocalNode::new(bus.attach(), Some(node_id(5)));

        server.serve::<ExecuteCommand, _, _>(|_meta, request| async move {
            assert_eq!(request.command, ExecuteCommand::COMMAND_IDENTIFY);
            Some(ExecuteCommandResponse::success())
        });

        let response = client
            .call::<ExecuteCommand>(
                node_id(5),
                &ExecuteCommandRequest::new(ExecuteCommand::COMMAND_IDENTIFY, Vec::new()),
                Priority::Nominal,
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn unanswered_call_times_out() {
        let bus = VirtualBus::new(Mtu::Classic);
        let client = LocalNode::new(bus.attach(), Some(node_id(1)));
        let _silent = LocalNode::new(bus.attach(), Some(node_id(9)));

        let result = client
            .call::<ExecuteCommand>(
                node_id(9),
                &ExecuteCommandRequest::new(ExecuteCommand::COMMAND_RESTART, Vec::new()),
                Priority::Nominal,
                Duration::from_millis(50),
            )
            .await;
        assert!(matches!(result, Err(Error::ServiceTimeout(_, _))));
    }

    #[tokio::test]
    async fn node_cannot_call_itself() {
        let bus = VirtualBus::new(Mtu::Classic);
        let node = LocalNode::new(bus.attach(), Some(node_id(7)));

        let result = node
            .call::<ExecuteCommand>(
                node_id(7),
                &ExecuteCommandRequest::new(ExecuteCommand::COMMAND_IDENTIFY, Vec::new()),
                Priority::Nominal,
                Duration::from_millis(50),
            )
            .await;
        assert!(matches!(result, Err(Error::SelfAddressed(_))));
    }

    #[tokio::test]
    async fn anonymous_node_cannot_call() {
        let bus = VirtualBus::new(Mtu::Classic);
        let anonymous = LocalNode::new(bus.attach(), None);

        let result = anonymous
            .call::<ExecuteCommand>(
                node_id(5),
                &ExecuteCommandRequest::new(ExecuteCommand::COMMAND_RESTART, Vec::new()),
                Priority::Nominal,
                Duration::from_millis(50),
            )
            .await;
        assert!(matches!(result, Err(Error::AnonymousNode)));
    }

    #[tokio::test]
    async fn heartbeat_is_published_automatically() {
        let bus = VirtualBus::new(Mtu::Classic);
        let node = LocalNode::new(bus.attach(), Some(node_id(3)));
        node.set_vendor_status(42);
        let listener = LocalNode::new(bus.attach(), None);

        let mut heartbeats = listener.subscribe::<Heartbeat>();
        let (meta, heartbeat) = heartbeats.recv().await.unwrap();
        assert_eq!(meta.source, Some(node_id(3)));
        assert_eq!(heartbeat.vendor_specific_status_code, 42);
    }
}
