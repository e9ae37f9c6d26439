//! The per-connection bidirectional message pipeline (C4).
//!
//! Owns the two streams for one client, the upstream reader task, and the
//! two bounded FIFOs (`pending`, `upstream_replies`) that the pairing
//! scheduler (`run_queue`) drains against each other.
//!
//! # Concurrency
//!
//! This runs on tokio's multi-threaded runtime rather than a single
//! cooperative executor, so the two queues and the client writer are
//! protected by one `tokio::sync::Mutex` held for the *entire* `run_queue`
//! invocation — the write it performs included — so that a call from the
//! client-read task and a call from the upstream-read task fully serialise
//! rather than interleave. A per-pair `watch` channel signals shutdown
//! between the two tasks; `watch` (rather than `Notify`) avoids the race
//! where the signal fires before either task is waiting on it.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{watch, Mutex};

use crate::error::Result;
use crate::policy::{Action, Responder, UpstreamKind};
use crate::proto::frame::{decode_one, encode, AgentMessage};
use crate::proto::message::{generic_failure, IdentitiesAnswer};
use crate::proto::opcode::Opcode;

/// Bounded capacity of both `pending` and `upstream_replies`.
pub const QUEUE_CAPACITY: usize = 256;

const READ_CHUNK: usize = 8192;

/// The identity filter hook for `SSH2_AGENTC_REQUEST_IDENTITIES` replies
///. Defaults to the identity function; a policy that hides
/// keys plugs in here.
pub type IdentityFilter = Arc<dyn Fn(IdentitiesAnswer) -> IdentitiesAnswer + Send + Sync>;

/// The default filter hook: passes every identity through unchanged.
pub fn identity_filter_passthrough() -> IdentityFilter {
    Arc::new(|answer| answer)
}

/// Shared per-connection state: the two FIFOs plus the client writer they
/// both eventually write through.
struct QueueState {
    pending: VecDeque<Responder>,
    upstream_replies: VecDeque<AgentMessage>,
    client_writer: OwnedWriteHalf,
}

/// Decode the next whole frame from `buf`, if any, returning how many bytes
/// it consumed from the front. Keeping this separate from
/// [`crate::proto::frame::decode_one`]'s borrowed-remainder return avoids
/// holding a borrow of `buf` across the `buf.drain(..)` call that follows.
fn decode_next(buf: &[u8]) -> Result<Option<(usize, AgentMessage)>> {
    let (remainder, message) = decode_one(buf)?;
    Ok(message.map(|m| (buf.len() - remainder.len(), m)))
}

/// Run a client message's paired upstream reply through the identity filter
/// hook if it's an `SSH2_AGENT_IDENTITIES_ANSWER`, else leave it untouched.
///
/// A reply that fails to parse as an identities answer is forwarded as-is
/// rather than torn down — it came from the trusted upstream agent, not
/// untrusted client input, so the conservative move is to pass it through.
fn apply_identity_filter(reply: AgentMessage, filter: &IdentityFilter) -> AgentMessage {
    if reply.opcode() != Opcode::Ssh2AgentIdentitiesAnswer {
        return reply;
    }
    match IdentitiesAnswer::parse(reply.body()) {
        Some(answer) => filter(answer).to_message(),
        None => reply,
    }
}

/// Construct a gubinge connection pipeline for one accepted client.
pub struct Pipeline {
    connection_id: u64,
    upstream_path: PathBuf,
    identity_filter: IdentityFilter,
}

impl Pipeline {
    pub fn new(connection_id: u64, upstream_path: PathBuf, identity_filter: IdentityFilter) -> Self {
        Self {
            connection_id,
            upstream_path,
            identity_filter,
        }
    }

    /// Drive one client connection to completion: open the upstream
    /// connection, spawn its reader task, and run the client reader loop
    /// until either side closes.
    ///
    /// If the upstream connection cannot be opened, the client connection
    /// is closed with no reply.
    pub async fn run(self, client_stream: UnixStream) {
        let id = self.connection_id;
        let (client_reader, client_writer) = client_stream.into_split();

        let upstream_stream = match UnixStream::connect(&self.upstream_path).await {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("[{id}] failed to connect to upstream agent: {e}");
                return;
            }
        };
        let (upstream_reader, upstream_writer) = upstream_stream.into_split();

        let state = Arc::new(Mutex::new(QueueState {
            pending: VecDeque::new(),
            upstream_replies: VecDeque::new(),
            client_writer,
        }));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let upstream_task = tokio::spawn(Self::upstream_loop(
            id,
            upstream_reader,
            state.clone(),
            self.identity_filter.clone(),
            shutdown_rx.clone(),
            shutdown_tx.clone(),
        ));

        Self::client_loop(
            id,
            client_reader,
            upstream_writer,
            state,
            self.identity_filter,
            shutdown_rx,
            shutdown_tx,
        )
        .await;

        // The upstream reader task owns teardown (stranding any leftover
        // Upstream responders and closing the client writer); we just join
        // it so it doesn't leak.
        if let Err(e) = upstream_task.await {
            log::warn!("[{id}] upstream reader task panicked: {e}");
        }
    }

    async fn client_loop(
        id: u64,
        mut reader: OwnedReadHalf,
        mut upstream_writer: OwnedWriteHalf,
        state: Arc<Mutex<QueueState>>,
        filter: IdentityFilter,
        mut shutdown_rx: watch::Receiver<bool>,
        shutdown_tx: watch::Sender<bool>,
    ) {
        let mut read_buf = vec![0u8; READ_CHUNK];
        let mut frame_buf: Vec<u8> = Vec::new();

        'outer: loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                result = reader.read(&mut read_buf) => match result {
                    Ok(0) => {
                        log::info!("[{id}] client disconnected");
                        break;
                    }
                    Ok(n) => {
                        frame_buf.extend_from_slice(&read_buf[..n]);
                        loop {
                            match decode_next(&frame_buf) {
                                Err(e) => {
                                    log::warn!("[{id}] client protocol error: {e}");
                                    break 'outer;
                                }
                                Ok(None) => break,
                                Ok(Some((consumed, message))) => {
                                    frame_buf.drain(..consumed);
                                    let keep_going = Self::on_client_message(
                                        id,
                                        &message,
                                        &mut upstream_writer,
                                        &state,
                                        &filter,
                                        &shutdown_tx,
                                    )
                                    .await;
                                    if !keep_going {
                                        break 'outer;
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        log::warn!("[{id}] client read error: {e}");
                        break;
                    }
                },
            }
        }

        let _ = upstream_writer.shutdown().await;
        let _ = shutdown_tx.send(true);
    }

    /// Classify and act on one client message. Returns `false` if the
    /// connection must be torn down (protocol error, upstream write
    /// failure, or `pending` backpressure).
    async fn on_client_message(
        id: u64,
        message: &AgentMessage,
        upstream_writer: &mut OwnedWriteHalf,
        state: &Arc<Mutex<QueueState>>,
        filter: &IdentityFilter,
        shutdown_tx: &watch::Sender<bool>,
    ) -> bool {
        let action = Action::classify(message);

        if let Some(upstream_message) = action.upstream_write() {
            if let Err(e) = encode(upstream_writer, upstream_message).await {
                log::warn!("[{id}] upstream write error: {e}");
                return false;
            }
        }

        if let Some(responder) = action.responder() {
            let accepted = {
                let mut guard = state.lock().await;
                if guard.pending.len() >= QUEUE_CAPACITY {
                    false
                } else {
                    guard.pending.push_back(responder);
                    true
                }
            };
            if !accepted {
                log::warn!("[{id}] pending queue at capacity, closing connection");
                let _ = shutdown_tx.send(true);
                return false;
            }
            Self::run_queue(id, state, filter, shutdown_tx).await;
        }

        true
    }

    async fn upstream_loop(
        id: u64,
        mut reader: OwnedReadHalf,
        state: Arc<Mutex<QueueState>>,
        filter: IdentityFilter,
        mut shutdown_rx: watch::Receiver<bool>,
        shutdown_tx: watch::Sender<bool>,
    ) {
        let mut read_buf = vec![0u8; READ_CHUNK];
        let mut frame_buf: Vec<u8> = Vec::new();

        'outer: loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                result = reader.read(&mut read_buf) => match result {
                    Ok(0) => {
                        log::info!("[{id}] upstream agent disconnected");
                        break;
                    }
                    Ok(n) => {
                        frame_buf.extend_from_slice(&read_buf[..n]);
                        loop {
                            match decode_next(&frame_buf) {
                                Err(e) => {
                                    log::warn!("[{id}] upstream protocol error: {e}");
                                    break 'outer;
                                }
                                Ok(None) => break,
                                Ok(Some((consumed, message))) => {
                                    frame_buf.drain(..consumed);
                                    let accepted = {
                                        let mut guard = state.lock().await;
                                        if guard.upstream_replies.len() >= QUEUE_CAPACITY {
                                            false
                                        } else {
                                            guard.upstream_replies.push_back(message);
                                            true
                                        }
                                    };
                                    if !accepted {
                                        log::warn!(
                                            "[{id}] upstream reply queue at capacity, closing connection"
                                        );
                                        break 'outer;
                                    }
                                    Self::run_queue(id, &state, &filter, &shutdown_tx).await;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        log::warn!("[{id}] upstream read error: {e}");
                        break;
                    }
                },
            }
        }

        let _ = shutdown_tx.send(true);
        Self::strand_and_close(id, &state).await;
    }

    /// The pairing scheduler. While `pending` is non-empty: a `Fixed` head
    /// is popped and executed unconditionally; an `Upstream` head is popped
    /// and executed only once `upstream_replies` has a reply for it,
    /// otherwise the loop stops leaving it in place.
    async fn run_queue(
        id: u64,
        state: &Arc<Mutex<QueueState>>,
        filter: &IdentityFilter,
        shutdown_tx: &watch::Sender<bool>,
    ) {
        let mut guard = state.lock().await;
        loop {
            let responder = match guard.pending.front() {
                None => break,
                Some(Responder::Fixed(_)) => guard.pending.pop_front(),
                Some(Responder::Upstream(_)) => {
                    if guard.upstream_replies.is_empty() {
                        break;
                    }
                    guard.pending.pop_front()
                }
            };

            let reply = match responder {
                Some(Responder::Fixed(message)) => message,
                Some(Responder::Upstream(kind)) => {
                    let upstream_reply = guard
                        .upstream_replies
                        .pop_front()
                        .expect("checked non-empty above");
                    if kind == UpstreamKind::FilterIdentities {
                        apply_identity_filter(upstream_reply, filter)
                    } else {
                        upstream_reply
                    }
                }
                None => unreachable!("front() just returned Some"),
            };

            if let Err(e) = encode(&mut guard.client_writer, &reply).await {
                log::warn!("[{id}] client write error: {e}");
                let _ = shutdown_tx.send(true);
                break;
            }
        }
    }

    /// Upstream is gone: any `Upstream` responder still in `pending` would
    /// block forever, so it's answered with a synthetic failure instead of
    /// being silently dropped. Finally the client writer is closed.
    async fn strand_and_close(id: u64, state: &Arc<Mutex<QueueState>>) {
        let mut guard = state.lock().await;
        while let Some(responder) = guard.pending.pop_front() {
            let reply = match responder {
                Responder::Fixed(message) => message,
                Responder::Upstream(_) => generic_failure(),
            };
            if let Err(e) = encode(&mut guard.client_writer, &reply).await {
                log::warn!("[{id}] client write error during teardown: {e}");
                break;
            }
        }
        let _ = guard.client_writer.shutdown().await;
    }
}

/// Allocate the next monotonically-increasing connection id, assigned by the
/// listener for diagnostic correlation.
#[derive(Debug, Default)]
pub struct ConnectionIdAllocator(AtomicU64);

impl ConnectionIdAllocator {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}
