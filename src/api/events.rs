//! Server-sent event listener for AR session end notifications.
//!
//! The listener itself stays simple: one connection, one terminal signal.
//! Reconnection lives in a separate supervisor task that only acts when no
//! connection exists and the terminal signal has not been raised.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::interval;
use url::Url;

use crate::config;

/// A once-raised flag with async waiters. Raising it a second time is a no-op.
#[derive(Clone)]
pub struct EndedSignal {
    inner: Arc<EndedInner>,
}

struct EndedInner {
    raised: AtomicBool,
    notify: Notify,
}

impl EndedSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EndedInner {
                raised: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Raise the signal. Returns true only for the first caller.
    pub fn raise(&self) -> bool {
        let first = !self.inner.raised.swap(true, Ordering::AcqRel);
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::Acquire)
    }

    /// Wait until the signal is raised. Returns immediately if it already was.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_raised() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for EndedSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Messages delivered over the event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StreamEvent {
    Connected,
    Ended { session_id: Option<String> },
    Heartbeat,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(rename = "type")]
    msg_type: String,
    #[serde(rename = "sessionId", default)]
    session_id: Option<String>,
}

/// Handle for closing one streaming connection.
pub struct SseHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl SseHandle {
    /// Ask the connection task to close; idempotent.
    pub fn close(&self) {
        let _ = self.shutdown_tx.try_send(());
    }
}

/// Event-stream subscription for one session, plus its reconnection supervisor.
pub struct EventChannel {
    client: reqwest::Client,
    base: Url,
    session_id: String,
    signal: EndedSignal,
    connected: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    conn: Mutex<Option<SseHandle>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl EventChannel {
    pub fn new(client: reqwest::Client, base: Url, session_id: impl Into<String>) -> Self {
        Self {
            client,
            base,
            session_id: session_id.into(),
            signal: EndedSignal::new(),
            connected: Arc::new(AtomicBool::new(false)),
            alive: Arc::new(AtomicBool::new(false)),
            conn: Mutex::new(None),
            supervisor: Mutex::new(None),
        }
    }

    /// The terminal "session ended" signal this channel feeds.
    pub fn signal(&self) -> EndedSignal {
        self.signal.clone()
    }

    /// Whether the server has acknowledged the subscription.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Open the streaming connection unless one already exists or the session
    /// has already ended.
    pub fn connect(&self) {
        if self.signal.is_raised() {
            log::debug!("Session already ended, not connecting event stream");
            return;
        }
        if self.alive.swap(true, Ordering::AcqRel) {
            log::debug!("Event stream connection already exists");
            return;
        }

        let url = match self.base.join(&config::ar_events_path(&self.session_id)) {
            Ok(url) => url.to_string(),
            Err(e) => {
                log::error!("Invalid event stream URL: {}", e);
                self.alive.store(false, Ordering::Release);
                return;
            }
        };

        let handle = connect_stream(
            self.client.clone(),
            url,
            self.session_id.clone(),
            self.signal.clone(),
            self.connected.clone(),
            self.alive.clone(),
        );
        *self.conn.lock().unwrap() = Some(handle);
    }

    /// Start the supervisor that reconnects a dropped stream. The supervisor
    /// stops on its own once the ended signal has been raised.
    pub fn start_supervisor(self: &Arc<Self>, check_interval: std::time::Duration) {
        let mut guard = self.supervisor.lock().unwrap();
        if guard.is_some() {
            return;
        }

        let channel = Arc::downgrade(self);
        *guard = Some(tokio::spawn(async move {
            let mut ticker = interval(check_interval);
            // The first tick completes immediately; the initial connect is
            // the caller's, not ours.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(channel) = channel.upgrade() else {
                    return;
                };
                if channel.signal.is_raised() {
                    return;
                }
                if !channel.alive.load(Ordering::Acquire) {
                    log::info!("Event stream down, reconnecting");
                    channel.connect();
                }
            }
        }));
    }

    /// Close the connection and stop the supervisor; idempotent.
    pub fn disconnect(&self) {
        if let Some(handle) = self.conn.lock().unwrap().take() {
            handle.close();
        }
        if let Some(task) = self.supervisor.lock().unwrap().take() {
            task.abort();
        }
        self.connected.store(false, Ordering::Release);
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Open one streaming connection and spawn a task that pumps its messages.
/// The task clears `alive` when the connection is gone, whatever the reason.
fn connect_stream(
    client: reqwest::Client,
    url: String,
    session_id: String,
    signal: EndedSignal,
    connected: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
) -> SseHandle {
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        log::info!("Connecting to event stream: {}", url);

        match client
            .get(&url)
            .header("Accept", "text/event-stream")
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                let mut stream = response.bytes_stream();
                let mut buffer = String::new();

                'conn: loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            log::info!("Event stream shutdown requested");
                            break 'conn;
                        }
                        chunk = stream.next() => {
                            match chunk {
                                Some(Ok(bytes)) => {
                                    let text = String::from_utf8_lossy(&bytes);
                                    buffer.extend(text.chars().filter(|c| *c != '\r'));
                                    for payload in drain_event_payloads(&mut buffer) {
                                        handle_payload(&payload, &session_id, &signal, &connected);
                                    }
                                }
                                Some(Err(e)) => {
                                    log::error!("Event stream error: {}", e);
                                    break 'conn;
                                }
                                None => {
                                    log::info!("Event stream closed by server");
                                    break 'conn;
                                }
                            }
                        }
                    }
                }
            }
            Ok(response) => {
                log::error!("Event stream request failed: {}", response.status());
            }
            Err(e) => {
                log::error!("Failed to connect event stream: {}", e);
            }
        }

        connected.store(false, Ordering::Release);
        alive.store(false, Ordering::Release);
    });

    SseHandle { shutdown_tx }
}

fn handle_payload(
    payload: &str,
    session_id: &str,
    signal: &EndedSignal,
    connected: &Arc<AtomicBool>,
) {
    match parse_event(payload) {
        Some(StreamEvent::Connected) => {
            log::info!("Event stream connected");
            connected.store(true, Ordering::Release);
        }
        Some(StreamEvent::Ended { session_id: ended }) => {
            if ended.as_deref() == Some(session_id) {
                if signal.raise() {
                    log::info!("AR session ended signal received");
                }
            } else {
                log::debug!("Ignoring ended event for another session");
            }
        }
        Some(StreamEvent::Heartbeat) => {}
        None => {}
    }
}

/// Pull complete event payloads out of the connection buffer. Events are
/// separated by a blank line; `data:` lines within one event are joined.
fn drain_event_payloads(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos + 2).collect();
        let data = block
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(str::trim_start)
            .collect::<Vec<_>>()
            .join("\n");
        if !data.is_empty() {
            payloads.push(data);
        }
    }

    payloads
}

fn parse_event(payload: &str) -> Option<StreamEvent> {
    let message: StreamMessage = match serde_json::from_str(payload) {
        Ok(m) => m,
        Err(e) => {
            log::warn!("Failed to parse event stream message: {} - {}", e, payload);
            return None;
        }
    };

    match message.msg_type.as_str() {
        "connected" => Some(StreamEvent::Connected),
        "ar_ended" => Some(StreamEvent::Ended {
            session_id: message.session_id,
        }),
        "heartbeat" => Some(StreamEvent::Heartbeat),
        other => {
            log::warn!("Unknown event stream message type: {}", other);
            None
        }
    }
}
