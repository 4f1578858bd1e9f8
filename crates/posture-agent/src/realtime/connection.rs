// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Realtime session connection over WebSocket
//!
//! All state mutation for one session goes through a single lock around the
//! [`SessionStateMachine`], so inbound dispatch, frame sends and teardown are
//! serialized even on a multi-worker runtime. Each `connect()` gets a new
//! epoch; events from an older transport are discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use posture_config::RealtimeConfig;
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::time;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::credentials::CredentialStore;
use crate::error::{PostureAgentError, Result};
use crate::realtime::frame::{EncodedFrame, FrameSource};
use crate::realtime::protocol::OutboundMessage;
use crate::realtime::scheduler::{frame_period, FrameScheduler, FrameSink};
use crate::realtime::state::{
    SessionAction, SessionPhase, SessionSnapshot, SessionStateMachine, TransportEvent,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Command {
    Send(String),
    Close,
}

/// Build `<ws|wss>://<host><path>?token=<access token>`
pub fn session_url(config: &RealtimeConfig, access_token: &str) -> Result<Url> {
    let base = format!("{}://{}{}", config.scheme(), config.host, config.path);
    let mut url = Url::parse(&base).map_err(|e| {
        PostureAgentError::InvalidConfig(format!("realtime endpoint {}: {}", base, e))
    })?;
    url.query_pairs_mut().append_pair("token", access_token);
    Ok(url)
}

fn redacted(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    format!("{}?token=<redacted>", shown)
}

struct ConnectionShared {
    config: RealtimeConfig,
    credentials: Arc<dyn CredentialStore>,
    machine: Mutex<SessionStateMachine>,
    snapshot: watch::Sender<SessionSnapshot>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    epoch: AtomicU64,
    scheduler: FrameScheduler,
}

impl ConnectionShared {
    /// Feed a transport event from the transport of `epoch`; false when stale
    fn apply(&self, epoch: u64, event: TransportEvent) -> bool {
        let actions = {
            let mut machine = self.machine.lock();
            if self.epoch.load(Ordering::SeqCst) != epoch {
                debug!("[SESSION] Discarding event from a previous transport");
                return false;
            }
            let actions = machine.step(event);
            self.snapshot.send_replace(machine.snapshot().clone());
            actions
        };

        for action in actions {
            match action {
                SessionAction::StopFrameLoop => self.scheduler.stop(),
            }
        }
        true
    }

    fn send(&self, message: &OutboundMessage) {
        let machine = self.machine.lock();
        if !machine.is_open() {
            debug!(
                "[SESSION] Dropping {} while {:?}",
                message.action(),
                machine.phase()
            );
            return;
        }
        let outbound = self.outbound.lock();
        let Some(commands) = outbound.as_ref() else {
            return;
        };

        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!("[SESSION] Could not encode {}: {}", message.action(), e);
                return;
            }
        };
        if commands.send(Command::Send(text)).is_err() {
            debug!("[SESSION] Transport already gone; {} dropped", message.action());
        } else if matches!(message, OutboundMessage::Frame { .. }) {
            trace!("[SESSION] -> frame");
        } else {
            debug!("[SESSION] -> {}", message.action());
        }
    }
}

/// Forwards scheduler frames without keeping the connection alive
struct SessionSink(Weak<ConnectionShared>);

impl FrameSink for SessionSink {
    fn send_frame(&self, frame: EncodedFrame) {
        if let Some(shared) = self.0.upgrade() {
            shared.send(&OutboundMessage::frame(&frame));
        }
    }
}

/// One realtime analysis session
///
/// Dropping the connection disconnects it.
pub struct SessionConnection {
    shared: Arc<ConnectionShared>,
}

impl SessionConnection {
    pub fn new(config: RealtimeConfig, credentials: Arc<dyn CredentialStore>) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        Self {
            shared: Arc::new(ConnectionShared {
                machine: Mutex::new(SessionStateMachine::new(config.auth_failed_close_code)),
                config,
                credentials,
                snapshot,
                outbound: Mutex::new(None),
                epoch: AtomicU64::new(0),
                scheduler: FrameScheduler::new(),
            }),
        }
    }

    /// Open the transport with the stored access token
    ///
    /// Returns once the attempt is started; watch [`subscribe`](Self::subscribe)
    /// or await [`wait_until_settled`](Self::wait_until_settled) for the outcome.
    /// Fails with `AuthRequired`, opening nothing, when no token is stored.
    pub fn connect(&self) -> Result<()> {
        let token = self
            .shared
            .credentials
            .access_token()
            .ok_or(PostureAgentError::AuthRequired)?;
        let url = session_url(&self.shared.config, &token)?;
        let runtime = Handle::try_current().map_err(|_| {
            PostureAgentError::InvalidConfig("connect() requires a tokio runtime".to_string())
        })?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let epoch = {
            let mut machine = self.shared.machine.lock();
            let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            self.shared.scheduler.stop();
            if let Some(previous) = self.shared.outbound.lock().replace(commands) {
                let _ = previous.send(Command::Close);
            }
            machine.begin_connect();
            self.shared.snapshot.send_replace(machine.snapshot().clone());
            epoch
        };

        info!("[SESSION] Connecting to {}", redacted(&url));
        runtime.spawn(run_transport(self.shared.clone(), epoch, url, command_rx));
        Ok(())
    }

    /// Transmit a message; silently dropped unless the channel is open
    pub fn send(&self, message: &OutboundMessage) {
        self.shared.send(message);
    }

    pub fn start_session(&self) {
        self.send(&OutboundMessage::StartSession);
    }

    pub fn start_calibration(&self) {
        self.send(&OutboundMessage::Calibrate);
    }

    pub fn send_frame(&self, frame: &EncodedFrame) {
        self.send(&OutboundMessage::frame(frame));
    }

    pub fn end_session(&self) {
        self.send(&OutboundMessage::EndSession);
    }

    /// Capture from `source` at a fixed rate and send each frame
    ///
    /// Replaces any running loop. Fails with `NotConnected` unless the channel
    /// is open; the loop stops on its own when the transport closes.
    pub fn start_frame_loop(
        &self,
        source: Arc<dyn FrameSource>,
        frames_per_second: f64,
    ) -> Result<()> {
        let period = frame_period(frames_per_second)?;
        let sink = Arc::new(SessionSink(Arc::downgrade(&self.shared)));

        let machine = self.shared.machine.lock();
        if !machine.is_open() {
            return Err(PostureAgentError::NotConnected);
        }
        self.shared
            .scheduler
            .start_with_period(source, sink, frames_per_second, period)
    }

    pub fn stop_frame_loop(&self) {
        self.shared.scheduler.stop();
    }

    pub fn is_frame_loop_running(&self) -> bool {
        self.shared.scheduler.is_running()
    }

    /// Tear down synchronously
    ///
    /// Stops the frame loop, starts the close handshake and resets the session
    /// before returning; the handshake itself finishes in the background.
    /// Safe in any state and when repeated.
    pub fn disconnect(&self) {
        let mut machine = self.shared.machine.lock();
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        // Under the machine lock so no frame loop can start between stop and reset
        self.shared.scheduler.stop();
        let had_transport = match self.shared.outbound.lock().take() {
            Some(commands) => {
                let _ = commands.send(Command::Close);
                true
            }
            None => false,
        };
        machine.reset();
        self.shared.snapshot.send_replace(machine.snapshot().clone());

        if had_transport {
            info!("[SESSION] Disconnected");
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Wait until a pending connect has either opened or closed
    pub async fn wait_until_settled(&self) -> SessionSnapshot {
        let mut updates = self.subscribe();
        loop {
            {
                let current = updates.borrow_and_update();
                if current.phase != SessionPhase::Connecting {
                    return current.clone();
                }
            }
            if updates.changed().await.is_err() {
                return self.snapshot();
            }
        }
    }
}

impl Drop for SessionConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

async fn run_transport(
    shared: Arc<ConnectionShared>,
    epoch: u64,
    url: Url,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(WsError::Http(response)) if matches!(response.status().as_u16(), 401 | 403) => {
            warn!(
                "[SESSION] Handshake rejected with HTTP {}",
                response.status().as_u16()
            );
            let code = Some(shared.config.auth_failed_close_code);
            shared.apply(epoch, TransportEvent::Closed { code, expected: false });
            return;
        }
        Err(e) => {
            shared.apply(epoch, TransportEvent::Failed(e.to_string()));
            shared.apply(epoch, TransportEvent::Closed { code: None, expected: false });
            return;
        }
    };

    let (mut sink, mut stream) = ws.split();
    let close_timeout = shared.config.close_timeout();

    if !shared.apply(epoch, TransportEvent::Opened) {
        // Disconnected while the handshake was in flight
        close_transport(sink, stream, close_timeout).await;
        return;
    }
    info!("[SESSION] Connected");

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(text)) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        shared.apply(epoch, TransportEvent::Failed(e.to_string()));
                        shared.apply(epoch, TransportEvent::Closed { code: None, expected: false });
                        return;
                    }
                }
                Some(Command::Close) | None => {
                    close_transport(sink, stream, close_timeout).await;
                    return;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    shared.apply(epoch, TransportEvent::Message(text));
                }
                Some(Ok(Message::Binary(data))) => {
                    let text = String::from_utf8_lossy(&data).into_owned();
                    shared.apply(epoch, TransportEvent::Message(text));
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|frame| u16::from(frame.code));
                    let expected = code == Some(u16::from(CloseCode::Normal));
                    shared.apply(epoch, TransportEvent::Closed { code, expected });
                    // Let tungstenite flush its close reply
                    let _ = time::timeout(close_timeout, drain(&mut stream)).await;
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    shared.apply(epoch, TransportEvent::Failed(e.to_string()));
                    shared.apply(epoch, TransportEvent::Closed { code: None, expected: false });
                    return;
                }
                None => {
                    shared.apply(epoch, TransportEvent::Closed { code: None, expected: false });
                    return;
                }
            }
        }
    }
}

async fn drain(stream: &mut SplitStream<WsStream>) {
    while let Some(Ok(_)) = stream.next().await {}
}

/// Client-initiated close; tolerates an already-closed transport
async fn close_transport(
    mut sink: SplitSink<WsStream, Message>,
    mut stream: SplitStream<WsStream>,
    close_timeout: std::time::Duration,
) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    };
    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
        debug!("[SESSION] Close frame not sent: {}", e);
    }
    if time::timeout(close_timeout, drain(&mut stream)).await.is_err() {
        debug!("[SESSION] Close handshake timed out");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_url_embeds_token() {
        let config = RealtimeConfig::default();
        let url = session_url(&config, "abc.def").unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:8000/ws/posture/analyze/?token=abc.def"
        );
    }

    #[test]
    fn test_secure_scheme_and_redaction() {
        let config = RealtimeConfig {
            host: "posture.example".to_string(),
            secure: true,
            ..RealtimeConfig::default()
        };
        let url = session_url(&config, "secret").unwrap();
        assert!(url.as_str().starts_with("wss://posture.example/ws/posture/analyze/"));
        let shown = redacted(&url);
        assert!(!shown.contains("secret"));
        assert!(shown.ends_with("?token=<redacted>"));
    }
}
