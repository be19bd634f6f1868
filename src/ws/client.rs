//! Stream connection manager over `tokio-tungstenite`.
//!
//! A background tokio task owns the transport:
//! - Exponential backoff reconnection with a bounded retry budget
//! - Auto-resubscribe from the registry on reconnect
//! - Normalization + dispatch of live candle pushes
//! - Advisory event delivery to the consumer

use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream, Stream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::bus::PriceUpdate;
use crate::chart::normalize_bar;
use crate::chart::wire::ChartUpdate;
use crate::error::WsError;
use crate::shared::{InstrumentId, Timeframe};
use crate::ws::registry::CandleCallback;
use crate::ws::{ConnectionState, FeedEvent, Kind, MessageOut, StreamContext, WsConfig};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ─── Commands from public API to background task ─────────────────────────────

enum Command {
    Announce(MessageOut),
    Close,
}

enum DisconnectReason {
    UserRequested,
    Error(String),
}

// ─── Background task state ───────────────────────────────────────────────────

struct TaskState {
    config: WsConfig,
    ctx: StreamContext,
    event_tx: mpsc::Sender<FeedEvent>,
    cmd_rx: mpsc::Receiver<Command>,
    reconnect_attempts: u32,
    state: Arc<AtomicU8>,
}

impl TaskState {
    fn emit(&self, event: FeedEvent) {
        let _ = self.event_tx.try_send(event);
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

// ─── Public WsClient ─────────────────────────────────────────────────────────

/// Stream connection manager.
///
/// Owns the one transport connection; all other components observe it
/// through [`ConnectionState`] and the advisory event stream. Transient
/// network failures are hidden behind bounded-backoff reconnection.
pub struct WsClient {
    config: WsConfig,
    ctx: StreamContext,
    cmd_tx: Option<mpsc::Sender<Command>>,
    event_tx: mpsc::Sender<FeedEvent>,
    event_rx: tokio::sync::Mutex<mpsc::Receiver<FeedEvent>>,
    task_handle: Option<JoinHandle<()>>,
    state: Arc<AtomicU8>,
}

impl WsClient {
    /// Create a new client. Does not connect yet.
    pub(crate) fn new(config: WsConfig, ctx: StreamContext) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            config,
            ctx,
            cmd_tx: None,
            event_tx,
            event_rx: tokio::sync::Mutex::new(event_rx),
            task_handle: None,
            state: Arc::new(AtomicU8::new(ConnectionState::Disconnected as u8)),
        }
    }

    /// Start the stream connection.
    ///
    /// Idempotent while a connection cycle is live (connected, connecting,
    /// or backing off). After exhaustion or `close()`, starts a fresh cycle
    /// with the attempt counter reset.
    pub async fn connect(&mut self) -> Result<(), WsError> {
        if let Some(handle) = &self.task_handle {
            if !handle.is_finished() {
                return Ok(());
            }
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        self.cmd_tx = Some(cmd_tx);
        self.state
            .store(ConnectionState::Connecting as u8, Ordering::SeqCst);

        let state = TaskState {
            config: self.config.clone(),
            ctx: self.ctx.clone(),
            event_tx: self.event_tx.clone(),
            cmd_rx,
            reconnect_attempts: 0,
            state: Arc::clone(&self.state),
        };

        self.task_handle = Some(tokio::spawn(run_task(state)));
        Ok(())
    }

    /// Deliberate teardown: cancel any pending reconnect, close the
    /// transport, discard all subscriptions. No reconnection afterwards.
    pub async fn close(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(Command::Close).await;
        }

        if let Some(mut handle) = self.task_handle.take() {
            // A task stuck in a long connect attempt never sees the Close
            // command; abort it so it cannot overwrite the Closed state.
            if tokio::time::timeout(Duration::from_secs(5), &mut handle)
                .await
                .is_err()
            {
                handle.abort();
            }
        }

        self.ctx.lock_registry().clear();
        self.state
            .store(ConnectionState::Closed as u8, Ordering::SeqCst);
    }

    /// Register `callback` for live candles on `instrument`.
    ///
    /// Replaces any prior callback for the same instrument. The subscribe
    /// announcement goes out immediately when connected; otherwise the
    /// registry re-announces it on the next successful connect. Empty
    /// instrument ids register nothing.
    pub fn subscribe(
        &self,
        instrument: InstrumentId,
        timeframe: Timeframe,
        callback: CandleCallback,
    ) {
        let announce = self
            .ctx
            .lock_registry()
            .insert(instrument.clone(), timeframe.clone(), callback);

        if announce {
            self.announce(MessageOut::subscribe(instrument, timeframe));
        }
    }

    /// Drop the callback for `instrument` and announce the unsubscribe when
    /// connected. No-op when nothing was registered.
    pub fn unsubscribe(&self, instrument: &InstrumentId) {
        let removed = self.ctx.lock_registry().remove(instrument);

        if let Some(timeframe) = removed {
            self.announce(MessageOut::unsubscribe(instrument.clone(), timeframe));
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Advisory event stream. The returned stream borrows `self`, so drop it
    /// before calling `close()`.
    pub fn events(&self) -> Pin<Box<dyn Stream<Item = FeedEvent> + Send + '_>> {
        Box::pin(futures_util::stream::unfold(
            &self.event_rx,
            |rx| async move {
                let mut guard = rx.lock().await;
                guard.recv().await.map(|event| (event, rx))
            },
        ))
    }

    pub(crate) fn event_sender(&self) -> mpsc::Sender<FeedEvent> {
        self.event_tx.clone()
    }

    /// Best-effort send to the background task. A failed send while the
    /// connection is down is swallowed; the registry re-announces on
    /// recovery.
    fn announce(&self, msg: MessageOut) {
        let Some(tx) = &self.cmd_tx else {
            tracing::debug!("announce while not started, deferred to connect");
            return;
        };
        if let Err(e) = tx.try_send(Command::Announce(msg)) {
            tracing::debug!("announce deferred: {}", e);
        }
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

// ─── Background task ─────────────────────────────────────────────────────────

async fn run_task(mut state: TaskState) {
    loop {
        state.set_state(ConnectionState::Connecting);

        // ── 1. Attempt connection ────────────────────────────────────────
        let (mut sink, stream) = match attempt_connect(&state.config.url).await {
            Ok(parts) => parts,
            Err(e) => {
                tracing::error!("stream connection failed: {}", e);
                // Attempt over, retry pending: observably Disconnected for
                // the whole backoff sleep.
                state.set_state(ConnectionState::Disconnected);
                state.emit(FeedEvent::Disconnected { reason: e });
                match backoff(&mut state).await {
                    BackoffOutcome::Retry => continue,
                    BackoffOutcome::GiveUp => {
                        state.set_state(ConnectionState::Exhausted);
                        state.emit(FeedEvent::Exhausted);
                        return;
                    }
                    BackoffOutcome::Closed => {
                        state.set_state(ConnectionState::Closed);
                        return;
                    }
                }
            }
        };

        // ── 2. Connected: reset budget, re-announce subscriptions ────────
        state.reconnect_attempts = 0;
        state.set_state(ConnectionState::Connected);
        state.emit(FeedEvent::Connected);
        resubscribe_all(&mut sink, &state.ctx).await;

        // ── 3. Inner loop until the connection breaks ────────────────────
        let reason = run_connected(&mut state, sink, stream).await;

        // ── 4. Post-disconnect decision ──────────────────────────────────
        match reason {
            DisconnectReason::UserRequested => {
                state.set_state(ConnectionState::Closed);
                return;
            }
            DisconnectReason::Error(reason) => {
                state.set_state(ConnectionState::Disconnected);
                state.emit(FeedEvent::Disconnected { reason });
                if !state.config.reconnect {
                    return;
                }
                match backoff(&mut state).await {
                    BackoffOutcome::Retry => continue,
                    BackoffOutcome::GiveUp => {
                        state.set_state(ConnectionState::Exhausted);
                        state.emit(FeedEvent::Exhausted);
                        return;
                    }
                    BackoffOutcome::Closed => {
                        state.set_state(ConnectionState::Closed);
                        return;
                    }
                }
            }
        }
    }
}

/// The connected loop. Runs until the connection breaks or is closed.
async fn run_connected(
    state: &mut TaskState,
    mut sink: SplitSink<WsStream, Message>,
    mut stream: SplitStream<WsStream>,
) -> DisconnectReason {
    loop {
        tokio::select! {
            // ── a) Incoming stream message ───────────────────────────────
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(state, text.as_str());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "no close frame".to_string());
                        return DisconnectReason::Error(reason);
                    }
                    Some(Ok(_)) => {} // Binary, Pong, Frame: ignore
                    Some(Err(e)) => {
                        tracing::error!("stream error: {}", e);
                        return DisconnectReason::Error(e.to_string());
                    }
                    None => {
                        return DisconnectReason::Error("stream ended".into());
                    }
                }
            }

            // ── b) Command from public API ───────────────────────────────
            cmd = state.cmd_rx.recv() => {
                match cmd {
                    Some(Command::Announce(msg)) => {
                        if let Err(e) = send_msg(&mut sink, &msg).await {
                            tracing::warn!("announce send failed: {}", e);
                        }
                    }
                    Some(Command::Close) => {
                        let _ = sink.send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client close".into(),
                        }))).await;
                        return DisconnectReason::UserRequested;
                    }
                    None => {
                        // WsClient dropped; clean exit
                        return DisconnectReason::UserRequested;
                    }
                }
            }
        }
    }
}

/// Parse and route one text frame.
fn handle_text(state: &TaskState, text: &str) {
    match serde_json::from_str::<Kind>(text) {
        Ok(Kind::ChartUpdate(update)) => handle_update(state, update),
        Ok(Kind::Error(payload)) => {
            tracing::warn!(code = ?payload.code, "server error: {}", payload.message);
            state.emit(FeedEvent::StreamError(payload.message));
        }
        Err(e) => {
            tracing::warn!("dropping malformed message: {} (raw: {})", e, text);
            state.emit(FeedEvent::StreamError(format!("malformed message: {}", e)));
        }
    }
}

/// Normalize a live candle push, broadcast the raw price, and dispatch the
/// scaled candle to the registered callback.
fn handle_update(state: &TaskState, update: ChartUpdate) {
    let instrument = update.instrument_address;

    let candle = match normalize_bar(&update.data, state.ctx.multiplier) {
        Ok(candle) => candle,
        Err(e) => {
            tracing::warn!(
                instrument = %instrument,
                raw = ?update.data,
                "dropping candle: {}", e
            );
            state.emit(FeedEvent::StreamError(e.to_string()));
            return;
        }
    };

    // Bus listeners get the raw close so derived-metric math downstream is
    // not double-scaled; the chart callback gets the multiplied candle.
    let raw_close = update.data.close;
    state.ctx.lock_prices().update(instrument.clone(), raw_close);
    state.ctx.bus.publish(PriceUpdate {
        instrument: instrument.clone(),
        price: raw_close,
        timestamp: candle.timestamp,
    });

    // The registry lock is released before the callback runs, so a callback
    // may re-enter subscribe/unsubscribe through a shared handle.
    let callback = state.ctx.lock_registry().callback_for(&instrument);
    match callback {
        Some(cb) => (cb.lock().unwrap_or_else(PoisonError::into_inner))(candle),
        None => {
            tracing::trace!(instrument = %instrument, "no subscriber, update dropped");
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Establish the transport connection with a 30-second timeout.
async fn attempt_connect(
    url: &str,
) -> Result<(SplitSink<WsStream, Message>, SplitStream<WsStream>), String> {
    let (ws_stream, _) = tokio::time::timeout(Duration::from_secs(30), connect_async(url))
        .await
        .map_err(|_| "connection timeout".to_string())?
        .map_err(|e| e.to_string())?;

    Ok(ws_stream.split())
}

async fn send_msg(
    sink: &mut SplitSink<WsStream, Message>,
    msg: &MessageOut,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json.into()))
        .await
        .map_err(|e| e.to_string())
}

/// Re-announce every registered subscription in insertion order.
async fn resubscribe_all(sink: &mut SplitSink<WsStream, Message>, ctx: &StreamContext) {
    let pairs = ctx.lock_registry().pairs();
    if pairs.is_empty() {
        return;
    }
    tracing::info!("re-announcing {} subscription(s)", pairs.len());
    for (instrument, timeframe) in pairs {
        let msg = MessageOut::subscribe(instrument, timeframe);
        if let Err(e) = send_msg(sink, &msg).await {
            tracing::warn!("resubscribe failed: {}", e);
        }
    }
}

// ─── Reconnection backoff ────────────────────────────────────────────────────

enum BackoffOutcome {
    Retry,
    GiveUp,
    Closed,
}

/// Delay before reconnect attempt `attempt` (1-indexed):
/// `min(base * 2^attempt, max)`.
fn reconnect_delay(config: &WsConfig, attempt: u32) -> Duration {
    let exp = attempt.min(10);
    let ms = config
        .base_reconnect_delay_ms
        .saturating_mul(1u64 << exp)
        .min(config.max_reconnect_delay_ms);
    Duration::from_millis(ms)
}

/// Consume one unit of the retry budget and sleep the backoff delay.
///
/// Commands arriving during the sleep are drained: `Close` aborts the cycle,
/// announcements are discarded since the registry re-announces on connect.
async fn backoff(state: &mut TaskState) -> BackoffOutcome {
    if state.reconnect_attempts >= state.config.max_reconnect_attempts {
        tracing::warn!(
            "retry budget exhausted after {} attempt(s)",
            state.reconnect_attempts
        );
        return BackoffOutcome::GiveUp;
    }

    state.reconnect_attempts += 1;
    let delay = reconnect_delay(&state.config, state.reconnect_attempts);
    tracing::info!(
        "reconnect attempt {}/{} in {}ms",
        state.reconnect_attempts,
        state.config.max_reconnect_attempts,
        delay.as_millis()
    );

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            () = &mut sleep => return BackoffOutcome::Retry,
            cmd = state.cmd_rx.recv() => {
                match cmd {
                    Some(Command::Close) | None => return BackoffOutcome::Closed,
                    Some(Command::Announce(_)) => {
                        // Registry is authoritative; re-announced on connect.
                    }
                }
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
