//! The async sender: owns the single long-lived RPC connection to the
//! collector and ships spans and merge-logs off bounded in-process queues.

#[cfg(not(test))]
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tonic::transport::{Channel, Endpoint};

use crate::merge::Mergelog;
use crate::span::Span;
use crate::wire::proto::mergelog_service_client::MergelogServiceClient;
use crate::wire::proto::{PostMergelogsRequest, PostSpansRequest};
use crate::CHANNEL_SIZE;

/// Per-send RPC deadline. The RPC library's own keepalive cannot be relied
/// on to unblock a stalled collector, so every send carries its own budget.
const RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Enforces the single-`Sender`-per-process rule from `init`. Not `unsafe`:
/// a plain atomic flag is enough to forbid a second `init`.
///
/// Compiled out under `cfg(test)`: the test binary legitimately constructs
/// many independent senders (one or more per test, running concurrently in
/// one process), so the whole crate is test-compiled with the guard
/// disabled rather than working around a global latch from every test.
#[cfg(not(test))]
static SENDER_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// The sender's lifecycle, mirroring §4.4 of the design: `CONNECTING` is the
/// only non-terminal predecessor of both terminal states, and `RUNNING` is
/// the only state from which draining is reachable.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SenderState {
    Connecting,
    Running,
    Failed,
    Draining,
    Stopped,
}

/// Errors surfaced synchronously by the sender; delivery failures themselves
/// are logged and discarded, never returned (see the runtime loop).
#[derive(Debug, Error)]
pub enum SenderError {
    #[error("failed to dial collector at {endpoint}: {source}")]
    Dial {
        endpoint: String,
        #[source]
        source: tonic::transport::Error,
    },

    /// `init` was called a second time. At most one `Sender` is supported
    /// per process.
    #[error("Sender::init called more than once; at most one Sender per process is supported")]
    AlreadyInitialized,
}

/// A handle to a running sender. Cheap to clone; every clone shares the same
/// queues and worker.
#[derive(Clone)]
pub struct Sender {
    span_tx: mpsc::Sender<Span>,
    mergelog_tx: mpsc::Sender<Mergelog>,
    state_rx: watch::Receiver<SenderState>,
    shutdown_tx: watch::Sender<bool>,
}

impl Sender {
    /// Dials `endpoint` in the background and returns immediately with a
    /// handle plus a `setupResultSignal`-style state receiver.
    ///
    /// Callers must not synchronously block on the returned receiver; poll
    /// it from a separate task, since the collector may come up after this
    /// process does. At most one `Sender` is supported per process: a
    /// second call returns [`SenderError::AlreadyInitialized`].
    pub fn init(
        endpoint: impl Into<String>,
        setup_timeout: Duration,
    ) -> Result<(Sender, watch::Receiver<SenderState>), SenderError> {
        #[cfg(not(test))]
        if SENDER_INITIALIZED.swap(true, Ordering::SeqCst) {
            return Err(SenderError::AlreadyInitialized);
        }

        let endpoint = endpoint.into();
        let (span_tx, span_rx) = mpsc::channel(CHANNEL_SIZE);
        let (mergelog_tx, mergelog_rx) = mpsc::channel(CHANNEL_SIZE);
        let (state_tx, state_rx) = watch::channel(SenderState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(run_worker(
            endpoint,
            setup_timeout,
            span_rx,
            mergelog_rx,
            state_tx,
            shutdown_rx,
        ));

        let sender = Sender {
            span_tx,
            mergelog_tx,
            state_rx: state_rx.clone(),
            shutdown_tx,
        };
        Ok((sender, state_rx))
    }

    /// Enqueues a closed span. Blocks if the queue is full; this is the
    /// intended backpressure channel, not an error path.
    pub async fn send_span(&self, span: Span) {
        if self.span_tx.send(span).await.is_err() {
            tracing::warn!("span queue closed, dropping span");
        }
    }

    /// Enqueues a merge-log. Blocks if the queue is full.
    pub async fn send_mergelog(&self, mergelog: Mergelog) {
        if self.mergelog_tx.send(mergelog).await.is_err() {
            tracing::warn!("merge-log queue closed, dropping merge-log");
        }
    }

    /// The sender's current lifecycle state.
    pub fn state(&self) -> SenderState {
        *self.state_rx.borrow()
    }

    /// Requests shutdown and blocks until the worker reaches a terminal
    /// state. Idempotent: calling it again after the worker has already
    /// stopped returns immediately.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut state_rx = self.state_rx.clone();
        loop {
            if matches!(
                *state_rx.borrow(),
                SenderState::Stopped | SenderState::Failed
            ) {
                return;
            }
            if state_rx.changed().await.is_err() {
                return;
            }
        }
    }
}

async fn run_worker(
    endpoint: String,
    setup_timeout: Duration,
    mut span_rx: mpsc::Receiver<Span>,
    mut mergelog_rx: mpsc::Receiver<Mergelog>,
    state_tx: watch::Sender<SenderState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let dial = dial(&endpoint, setup_timeout);
    let client = tokio::select! {
        result = dial => result,
        _ = wait_for_shutdown(&mut shutdown_rx) => {
            let _ = state_tx.send(SenderState::Stopped);
            return;
        }
    };

    let mut client = match client {
        Ok(client) => {
            let _ = state_tx.send(SenderState::Running);
            client
        }
        Err(err) => {
            tracing::warn!(error = %err, "sender failed to dial collector");
            let _ = state_tx.send(SenderState::Failed);
            // Hold the queues open without draining them: enqueues still
            // succeed up to CHANNEL_SIZE, then block, until shutdown.
            wait_for_shutdown(&mut shutdown_rx).await;
            return;
        }
    };

    loop {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown_rx) => {
                let _ = state_tx.send(SenderState::Draining);
                break;
            }
            Some(span) = span_rx.recv() => {
                send_span_rpc(&mut client, span).await;
            }
            Some(mergelog) = mergelog_rx.recv() => {
                send_mergelog_rpc(&mut client, mergelog).await;
            }
        }
    }

    while let Ok(span) = span_rx.try_recv() {
        send_span_rpc(&mut client, span).await;
    }
    while let Ok(mergelog) = mergelog_rx.try_recv() {
        send_mergelog_rpc(&mut client, mergelog).await;
    }

    let _ = state_tx.send(SenderState::Stopped);
}

async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

async fn dial(
    endpoint: &str,
    setup_timeout: Duration,
) -> Result<MergelogServiceClient<Channel>, SenderError> {
    let channel = Endpoint::from_shared(format!("http://{endpoint}"))
        .map_err(|source| SenderError::Dial {
            endpoint: endpoint.to_string(),
            source,
        })?
        .timeout(RPC_TIMEOUT)
        .connect_timeout(setup_timeout)
        .connect()
        .await
        .map_err(|source| SenderError::Dial {
            endpoint: endpoint.to_string(),
            source,
        })?;
    Ok(MergelogServiceClient::new(channel))
}

async fn send_span_rpc(client: &mut MergelogServiceClient<Channel>, span: Span) {
    let wire = crate::wire::proto::Span::from(&span);
    let request = tonic::Request::new(PostSpansRequest { spans: vec![wire] });
    if let Err(status) = client.post_spans(request).await {
        tracing::warn!(error = %status, "PostSpans failed, discarding");
    }
}

async fn send_mergelog_rpc(client: &mut MergelogServiceClient<Channel>, mergelog: Mergelog) {
    let wire = crate::wire::proto::Mergelog::from(&mergelog);
    let request = tonic::Request::new(PostMergelogsRequest {
        mergelogs: vec![wire],
    });
    if let Err(status) = client.post_mergelogs(request).await {
        tracing::warn!(error = %status, "PostMergelogs failed, discarding");
    }
}
