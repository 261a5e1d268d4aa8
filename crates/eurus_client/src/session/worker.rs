//! Session worker: one tokio task per run.
//!
//! The worker owns the transport. Every path out of [`Worker::pump`] releases
//! the sink before returning, and the next connect only starts after that, so
//! at most one transport is alive per session.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::heartbeat::KeepAlive;
use super::reconnect::ReconnectPolicy;
use super::state::{ConnectionState, Transition};
use super::{SessionEvent, Termination};
use crate::error::{Error, Result};
use crate::messages::{ChatCommand, ClientFrame, ServerMessage};
use crate::token::Token;
use crate::transport::{self, WsSink, WsStream};

enum Handshake {
    Ready(WsStream),
    Rejected(String),
    Failed(Error),
    Quit,
}

enum LinkEnd {
    Quit,
    Lost(Error),
}

enum Step {
    Quit,
    Inbound(Option<std::result::Result<Message, tungstenite::Error>>),
    Outbound(Option<ChatCommand>),
    Ping,
    PongOverdue,
}

/// Reports a worker that stops without reaching the end of `run` (a panic
/// unwinding through the task): state drops to `Disconnected` and the stream
/// still ends with `Terminated`.
struct TerminationGuard {
    state: Arc<watch::Sender<ConnectionState>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    armed: bool,
}

impl TerminationGuard {
    fn new(
        state: Arc<watch::Sender<ConnectionState>>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            state,
            events,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TerminationGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let previous = self.state.send_replace(ConnectionState::Disconnected);
        error!(state = %previous, "session worker stopped unexpectedly");
        if previous != ConnectionState::Disconnected {
            let _ = self
                .events
                .send(SessionEvent::StateChanged(ConnectionState::Disconnected));
        }
        let _ = self.events.send(SessionEvent::Terminated(Termination::Aborted {
            reason: "session worker stopped unexpectedly".into(),
        }));
    }
}

pub(super) struct Worker {
    config: Arc<SessionConfig>,
    token: Token,
    state: Arc<watch::Sender<ConnectionState>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    outbound: mpsc::UnboundedReceiver<ChatCommand>,
    quit_rx: oneshot::Receiver<()>,
    policy: ReconnectPolicy,
}

impl Worker {
    pub(super) fn new(
        config: Arc<SessionConfig>,
        token: Token,
        state: Arc<watch::Sender<ConnectionState>>,
        events: mpsc::UnboundedSender<SessionEvent>,
        outbound: mpsc::UnboundedReceiver<ChatCommand>,
        quit_rx: oneshot::Receiver<()>,
    ) -> Self {
        let policy = ReconnectPolicy::new(config.reconnect_attempts, config.backoff);
        Self {
            config,
            token,
            state,
            events,
            outbound,
            quit_rx,
            policy,
        }
    }

    /// Drive the session until it terminates. Hands the outbound queue back so
    /// the session can be started again.
    pub(super) async fn run(mut self) -> mpsc::UnboundedReceiver<ChatCommand> {
        let guard = TerminationGuard::new(self.state.clone(), self.events.clone());
        let termination = self.drive().await;
        match &termination {
            Termination::Quit => info!("session closed"),
            Termination::AuthRejected { reason } => warn!(reason = %reason, "token rejected"),
            Termination::ReconnectExhausted { attempts } => {
                warn!(attempts, "reconnect attempts exhausted")
            }
            Termination::Aborted { reason } => warn!(reason = %reason, "session aborted"),
        }
        self.emit(SessionEvent::Terminated(termination));
        guard.disarm();
        self.outbound
    }

    /// Runs with the state already at `Connecting`.
    async fn drive(&mut self) -> Termination {
        loop {
            let failure = match self.handshake().await {
                Handshake::Ready(ws) => {
                    self.discard_stale();
                    self.apply(Transition::HandshakeComplete);
                    self.policy.reset();
                    match self.pump(ws).await {
                        LinkEnd::Quit => return self.close(),
                        LinkEnd::Lost(e) => e,
                    }
                }
                Handshake::Rejected(reason) => {
                    self.apply(Transition::AuthRejected);
                    return Termination::AuthRejected { reason };
                }
                Handshake::Failed(e) => e,
                Handshake::Quit => return self.close(),
            };

            if !failure.is_transient() {
                error!(error = %failure, "session failed");
                self.discard_stale();
                self.apply(Transition::Close);
                return Termination::Aborted {
                    reason: failure.to_string(),
                };
            }

            self.apply(Transition::TransportFailed);
            self.discard_stale();

            let attempt = self.policy.record_failure();
            if !self.policy.should_retry() {
                debug!(error = %failure, attempt, "no retries left");
                self.apply(Transition::Exhausted);
                return Termination::ReconnectExhausted {
                    attempts: self.policy.max_attempts(),
                };
            }

            let delay = self.policy.next_delay();
            warn!(
                error = %failure,
                attempt,
                max_attempts = self.policy.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                "transport lost, reconnecting"
            );
            self.emit(SessionEvent::Reconnecting { attempt, delay });

            let quit = tokio::select! {
                _ = tokio::time::sleep(delay) => false,
                _ = &mut self.quit_rx => true,
            };
            if quit {
                return self.close();
            }
            self.apply(Transition::Retry);
        }
    }

    /// Connect and authenticate within the handshake budget. Any transport
    /// that opened but did not become `Ready` is released before returning.
    async fn handshake(&mut self) -> Handshake {
        let deadline = Instant::now() + self.config.handshake_timeout;
        debug!(url = %self.config.url, "connecting");

        let mut ws = tokio::select! {
            res = tokio::time::timeout_at(deadline, transport::connect(&self.config.url)) => match res {
                Ok(Ok(ws)) => ws,
                Ok(Err(e)) => return Handshake::Failed(e),
                Err(_) => return Handshake::Failed(Error::Timeout),
            },
            _ = &mut self.quit_rx => return Handshake::Quit,
        };

        let verdict = tokio::select! {
            res = tokio::time::timeout_at(deadline, transport::authenticate(&mut ws, &self.token)) => Some(res),
            _ = &mut self.quit_rx => None,
        };

        let outcome = match verdict {
            Some(Ok(Ok(username))) => {
                info!(
                    url = %self.config.url,
                    username = username.as_deref().unwrap_or("-"),
                    "authenticated"
                );
                self.apply(Transition::AuthAccepted);
                return Handshake::Ready(ws);
            }
            Some(Ok(Err(Error::Auth { reason }))) => Handshake::Rejected(reason),
            Some(Ok(Err(e))) => Handshake::Failed(e),
            Some(Err(_)) => Handshake::Failed(Error::Timeout),
            None => Handshake::Quit,
        };
        transport::release(ws).await;
        outcome
    }

    /// Carry traffic on a live transport until it drops or the user quits.
    async fn pump(&mut self, ws: WsStream) -> LinkEnd {
        let (mut sink, mut stream) = ws.split();
        let period = self.config.ping_interval;
        let mut keepalive = KeepAlive::new(self.config.pong_timeout);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let end = loop {
            let deadline = keepalive.deadline();
            let step = tokio::select! {
                _ = &mut self.quit_rx => Step::Quit,
                frame = stream.next() => Step::Inbound(frame),
                command = self.outbound.recv() => Step::Outbound(command),
                _ = ticker.tick() => Step::Ping,
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    Step::PongOverdue
                }
            };

            match step {
                Step::Quit | Step::Outbound(None) => {
                    self.flush_queued(&mut sink).await;
                    break LinkEnd::Quit;
                }
                Step::Inbound(None) => break LinkEnd::Lost(Error::ConnectionClosed),
                Step::Inbound(Some(Err(e))) => break LinkEnd::Lost(e.into()),
                Step::Inbound(Some(Ok(message))) => {
                    if let Err(e) = self.on_frame(message, &mut keepalive) {
                        break LinkEnd::Lost(e);
                    }
                }
                Step::Outbound(Some(command)) => {
                    if let Err(e) = self.send_command(&mut sink, &command).await {
                        self.emit(SessionEvent::Undelivered(command));
                        break LinkEnd::Lost(e);
                    }
                }
                Step::Ping => {
                    let payload = keepalive.ping(Instant::now());
                    debug!(outstanding = keepalive.outstanding(), "ping");
                    if let Err(e) = sink.send(Message::Ping(payload)).await {
                        break LinkEnd::Lost(e.into());
                    }
                }
                Step::PongOverdue => {
                    warn!(
                        timeout_ms = self.config.pong_timeout.as_millis() as u64,
                        outstanding = keepalive.outstanding(),
                        last_rtt_ms = keepalive.last_rtt().map(|rtt| rtt.as_millis() as u64),
                        "keep-alive unanswered"
                    );
                    break LinkEnd::Lost(Error::Timeout);
                }
            }
        };

        drop(stream);
        transport::release(sink).await;
        end
    }

    fn on_frame(&mut self, message: Message, keepalive: &mut KeepAlive) -> Result<()> {
        match message {
            Message::Text(text) => match ServerMessage::parse(&text) {
                Ok(msg) => self.emit(SessionEvent::Message(msg)),
                Err(e) => warn!(error = %e, "dropping malformed frame"),
            },
            Message::Pong(payload) => {
                if let Some(rtt) = keepalive.on_pong(&payload, Instant::now()) {
                    debug!(rtt_ms = rtt.as_millis() as u64, "pong");
                }
            }
            Message::Close(frame) => {
                debug!(?frame, "server closed the connection");
                return Err(Error::ConnectionClosed);
            }
            Message::Ping(_) | Message::Binary(_) | Message::Frame(_) => {}
        }
        Ok(())
    }

    async fn send_command(&self, sink: &mut WsSink, command: &ChatCommand) -> Result<()> {
        let text = ClientFrame::for_command(command, self.token.as_str()).to_text()?;
        sink.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Write commands accepted before a quit.
    async fn flush_queued(&mut self, sink: &mut WsSink) {
        let mut broken = false;
        while let Ok(command) = self.outbound.try_recv() {
            if !broken {
                match self.send_command(sink, &command).await {
                    Ok(()) => continue,
                    Err(e) => {
                        debug!(error = %e, "flush on quit failed");
                        broken = true;
                    }
                }
            }
            self.emit(SessionEvent::Undelivered(command));
        }
    }

    /// Fail commands that were accepted for a transport that no longer exists.
    fn discard_stale(&mut self) {
        while let Ok(command) = self.outbound.try_recv() {
            debug!(?command, "command not delivered");
            self.emit(SessionEvent::Undelivered(command));
        }
    }

    fn close(&mut self) -> Termination {
        self.apply(Transition::Close);
        Termination::Quit
    }

    fn apply(&mut self, transition: Transition) {
        let current = *self.state.borrow();
        match current.transition(transition) {
            Ok(next) => {
                self.state.send_replace(next);
                debug!(from = %current, to = %next, ?transition, "session state");
                if next != current {
                    self.emit(SessionEvent::StateChanged(next));
                }
            }
            Err(e) => error!(error = %e, ?transition, "illegal session transition"),
        }
    }

    fn emit(&self, event: SessionEvent) {
        // The consumer may have dropped its event stream.
        let _ = self.events.send(event);
    }
}
