use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_stream::stream;
use bank_commons::{BankConfig, CollectorRecord, MarkerId, Message};
use bank_store::BalanceStore;
use futures::stream::{BoxStream, SelectAll};
use futures::StreamExt;
use rand::Rng;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::collector::CollectorReporter;
use crate::peer::{self, LinkEvent, LinkWriter, PeerHandle, PeerHandleAllocator};
use crate::snapshot::SnapshotRegistry;
use crate::trigger::TriggerWatcher;

/// Upper bound on one poll-phase wait, matching the original's
/// `self._poller.poll(timeout=t)` with `t = 10`.
const POLL_TIMEOUT: Duration = Duration::from_millis(10);
/// Probability of message generation on any given loop iteration is
/// `1 / GENERATION_DIVISOR`, matching `self._max_time_between_messages = 5`.
const GENERATION_DIVISOR: u32 = 5;
const MIN_TRANSFER_AMOUNT: u64 = 10_000;
const MAX_TRANSFER_AMOUNT: u64 = 50_000;

enum PollStep {
    Accepted(TcpStream),
    Event(LinkEvent),
}

/// One running bank node: its peer links, its balance store, and the
/// Chandy-Lamport state needed to answer a snapshot trigger. Owns every
/// piece of mutable state the node loop touches; nothing here is shared
/// with another task.
pub struct Node<S: BalanceStore> {
    bank_id: String,
    store: Arc<S>,
    handles: PeerHandleAllocator,
    writers: HashMap<PeerHandle, LinkWriter>,
    incoming: SelectAll<BoxStream<'static, LinkEvent>>,
    accept_streams: SelectAll<BoxStream<'static, TcpStream>>,
    registry: SnapshotRegistry,
    trigger: TriggerWatcher,
    collector: CollectorReporter,
    self_initiated: bool,
}

impl<S: BalanceStore + 'static> Node<S> {
    /// Binds every configured listen port, dials every configured peer
    /// (running the CONNECT/OK handshake inline), and connects to the state
    /// collector. `working_dir` is where the `MARKER` trigger file is
    /// watched for.
    pub async fn new(
        bank_id: String,
        config: &BankConfig,
        store: Arc<S>,
        working_dir: &Path,
    ) -> Result<Self> {
        let mut handles = PeerHandleAllocator::default();
        let mut writers = HashMap::new();
        let mut incoming = SelectAll::new();
        let mut accept_streams = SelectAll::new();

        for port in &config.topology.listen_ports {
            let listener = TcpListener::bind(("0.0.0.0", *port))
                .await
                .with_context(|| format!("binding listen port {port}"))?;
            tracing::info!(port, "listening for inbound peer connections");
            accept_streams.push(accept_stream(listener));
        }

        for addr in &config.topology.dial_peers {
            let handle = handles.next();
            let (writer, events) = peer::dial(handle, addr)
                .await
                .with_context(|| format!("dialing configured peer {addr}"))?;
            tracing::info!(%handle, addr, "connected to peer");
            writers.insert(handle, writer);
            incoming.push(events);
        }

        let collector = CollectorReporter::connect(&bank_id, &config.collector_addr).await;

        Ok(Self {
            bank_id,
            store,
            handles,
            writers,
            incoming,
            accept_streams,
            registry: SnapshotRegistry::new(),
            trigger: TriggerWatcher::new(working_dir),
            collector,
            self_initiated: false,
        })
    }

    /// Runs the node loop forever: trigger check, bounded poll, message
    /// generation, repeated (spec.md §4.2). Returns only on a fatal error —
    /// a transport failure on an already-ready link, per spec.md §7.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            self.trigger_phase().await?;
            self.poll_phase().await?;
            self.generation_phase().await?;
        }
    }

    async fn trigger_phase(&mut self) -> Result<()> {
        if self.self_initiated {
            return Ok(());
        }
        if self.trigger.check()? {
            tracing::info!(bank_id = %self.bank_id, "MARKER file detected, starting snapshot");
            self.self_initiated = true;
            self.handle_marker(self.bank_id.clone(), None).await?;
        }
        Ok(())
    }

    async fn poll_phase(&mut self) -> Result<()> {
        let accept_ready = !self.accept_streams.is_empty();
        let incoming_ready = !self.incoming.is_empty();
        let step = async {
            tokio::select! {
                Some(stream) = self.accept_streams.next(), if accept_ready => PollStep::Accepted(stream),
                Some(event) = self.incoming.next(), if incoming_ready => PollStep::Event(event),
                // A node with no listen ports and no ready peers (spec.md §2
                // allows "zero or more" of either) has both sets empty;
                // without this arm `select!` panics instead of idling
                // through the poll window.
                else => std::future::pending().await,
            }
        };
        match timeout(POLL_TIMEOUT, step).await {
            Ok(PollStep::Accepted(stream)) => self.accept_incoming(stream),
            Ok(PollStep::Event(event)) => self.handle_link_event(event).await?,
            Err(_elapsed) => {}
        }
        Ok(())
    }

    async fn generation_phase(&mut self) -> Result<()> {
        let ready = self.ready_peer_handles();
        if ready.is_empty() {
            return Ok(());
        }
        let mut rng = rand::thread_rng();
        if rng.gen_range(0..GENERATION_DIVISOR) != 0 {
            return Ok(());
        }
        let target = ready[rng.gen_range(0..ready.len())];
        let amount = rng.gen_range(MIN_TRANSFER_AMOUNT..=MAX_TRANSFER_AMOUNT);
        let balance = self.store.get_balance()?;
        if rng.gen_bool(0.5) && balance >= amount {
            self.store.debit(amount)?;
            self.send(target, &Message::Credit(amount)).await?;
        } else {
            self.send(target, &Message::Debit(amount)).await?;
        }
        Ok(())
    }

    fn accept_incoming(&mut self, stream: TcpStream) {
        let handle = self.handles.next();
        let peer_addr = stream.peer_addr().ok();
        let (writer, events) = peer::accept(handle, stream);
        tracing::info!(%handle, ?peer_addr, "accepted inbound connection");
        self.writers.insert(handle, writer);
        self.incoming.push(events);
    }

    async fn handle_link_event(&mut self, event: LinkEvent) -> Result<()> {
        match event {
            LinkEvent::Message(handle, message) => self.on_message(handle, message).await,
            LinkEvent::Closed(handle, err) => self.on_closed(handle, err),
        }
    }

    fn on_closed(&mut self, handle: PeerHandle, err: anyhow::Error) -> Result<()> {
        let was_ready = self.writers.get(&handle).map(|w| w.ready).unwrap_or(false);
        self.writers.remove(&handle);
        if was_ready {
            Err(err.context(format!(
                "{handle} closed unexpectedly; transport failure on a ready link is fatal"
            )))
        } else {
            tracing::warn!(%handle, %err, "link closed before completing handshake, dropping it");
            Ok(())
        }
    }

    async fn on_message(&mut self, handle: PeerHandle, message: Message) -> Result<()> {
        let ready = self.writers.get(&handle).map(|w| w.ready).unwrap_or(false);
        if ready {
            self.dispatch(handle, message).await
        } else {
            self.handle_handshake(handle, message).await
        }
    }

    async fn handle_handshake(&mut self, handle: PeerHandle, message: Message) -> Result<()> {
        if message.is_connect() {
            if let Some(writer) = self.writers.get_mut(&handle) {
                writer.send(&Message::Ok).await?;
                writer.ready = true;
            }
            tracing::info!(%handle, "peer link handshake completed");
        } else {
            tracing::warn!(%handle, ?message, "refusing non-CONNECT message on an unready link");
            if let Some(writer) = self.writers.get_mut(&handle) {
                writer.send(&Message::Refused).await?;
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, handle: PeerHandle, message: Message) -> Result<()> {
        if !message.is_marker() {
            self.registry.record_for_all(handle, message.clone());
        }
        match message {
            Message::Credit(amount) => {
                self.store.credit(amount)?;
            }
            Message::Debit(amount) => {
                if self.store.get_balance()? >= amount {
                    self.store.debit(amount)?;
                    self.send(handle, &Message::Credit(amount)).await?;
                } else {
                    self.send(handle, &Message::Refused).await?;
                }
            }
            Message::Marker(marker_id) => {
                self.handle_marker(marker_id, Some(handle)).await?;
            }
            Message::Refused | Message::Ok | Message::Connect | Message::Greeting(_) => {
                tracing::debug!(%handle, ?message, "ignoring message on a ready link");
            }
        }
        Ok(())
    }

    async fn handle_marker(&mut self, marker_id: MarkerId, from: Option<PeerHandle>) -> Result<()> {
        if !self.registry.has(&marker_id) {
            let recorded_balance = self.store.get_balance()? as i64;
            let ready_peers = self.ready_peer_handles();
            let max_channels = ready_peers.len();
            self.registry
                .create(marker_id.clone(), recorded_balance, from, max_channels);
            for peer_handle in ready_peers {
                self.send(peer_handle, &Message::Marker(marker_id.clone()))
                    .await?;
            }
        } else if let Some(link) = from {
            self.registry.complete_channel(&marker_id, link);
        }

        if self.registry.is_complete(&marker_id) {
            self.report_and_clear(&marker_id).await?;
        }
        Ok(())
    }

    async fn report_and_clear(&mut self, marker_id: &str) -> Result<()> {
        let Some(snapshot) = self.registry.take(marker_id) else {
            return Ok(());
        };
        let channel_messages = snapshot
            .complete_channels
            .into_iter()
            .map(|(handle, messages)| (handle.to_string(), messages))
            .collect();
        let record = CollectorRecord {
            bank_id: self.bank_id.clone(),
            marker_id: marker_id.to_string(),
            status: snapshot.recorded_balance,
            channel_messages,
        };
        tracing::info!(
            marker_id,
            status = record.status,
            "snapshot complete, reporting to collector"
        );
        self.collector.report(record).await;
        if marker_id == self.bank_id {
            self.self_initiated = false;
        }
        Ok(())
    }

    async fn send(&mut self, handle: PeerHandle, message: &Message) -> Result<()> {
        if let Some(writer) = self.writers.get_mut(&handle) {
            writer.send(message).await?;
        }
        Ok(())
    }

    fn ready_peer_handles(&self) -> Vec<PeerHandle> {
        self.writers
            .iter()
            .filter(|(_, writer)| writer.ready)
            .map(|(handle, _)| *handle)
            .collect()
    }
}

fn accept_stream(listener: TcpListener) -> BoxStream<'static, TcpStream> {
    Box::pin(stream! {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => yield stream,
                Err(err) => tracing::warn!(%err, "error accepting inbound connection"),
            }
        }
    })
}
