//! Session manager: one logical connection to the chat server.
//!
//! A [`Session`] authenticates with a stored token, keeps the WebSocket alive
//! with pings, reconnects with bounded exponential backoff and reports every
//! inbound message and state change on an [`Events`] stream. Outbound
//! commands go through an [`Outbox`], which refuses them unless the session
//! is `Connected`.
//!
//! ```ignore
//! let mut session = Session::new(config.session_config(), token);
//! let mut events = session.start().await?;
//! let outbox = session.outbox();
//! while let Some(event) = events.next().await {
//!     if let SessionEvent::StateChanged(ConnectionState::Connected) = event {
//!         outbox.send(ChatCommand::JoinRoom { room_id: "lobby".into() })?;
//!     }
//! }
//! ```

mod config;
mod heartbeat;
mod reconnect;
mod state;
mod worker;

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Stream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::error;

pub use config::SessionConfig;
pub use heartbeat::KeepAlive;
pub use reconnect::{Backoff, ReconnectPolicy};
pub use state::{ConnectionState, Transition};

use crate::error::{Error, Result};
use crate::messages::{ChatCommand, ServerMessage};
use crate::token::Token;
use worker::Worker;

/// Why a session run ended. Always the last event of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The user closed the session.
    Quit,
    /// The server refused the token. Not retried.
    AuthRejected { reason: String },
    /// Consecutive transport failures exceeded the retry budget.
    ReconnectExhausted { attempts: u32 },
    /// The run stopped on an error reconnecting cannot fix.
    Aborted { reason: String },
}

impl Termination {
    /// The error this termination reports, if it was a failure.
    pub fn into_error(self) -> Option<Error> {
        match self {
            Termination::Quit => None,
            Termination::AuthRejected { reason } => Some(Error::Auth { reason }),
            Termination::ReconnectExhausted { attempts } => {
                Some(Error::ReconnectExhausted { attempts })
            }
            Termination::Aborted { reason } => Some(Error::Transport { message: reason }),
        }
    }
}

/// Something the UI layer should know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    /// Inbound server message, in transport order.
    Message(ServerMessage),
    /// A retry is scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// An accepted command was lost with its transport.
    Undelivered(ChatCommand),
    Terminated(Termination),
}

/// Inbound event stream for one session run. Ends after `Terminated`.
#[derive(Debug)]
pub struct Events {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Events {
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }
}

impl Stream for Events {
    type Item = SessionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Cloneable send handle, usable from any thread.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<ChatCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl Outbox {
    /// Queue `command` for the live transport. Fails with `NotConnected`
    /// unless the session is `Connected`; nothing is queued in that case.
    pub fn send(&self, command: ChatCommand) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.tx.send(command).map_err(|_| Error::NotConnected)
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }
}

struct Run {
    quit: oneshot::Sender<()>,
    task: JoinHandle<mpsc::UnboundedReceiver<ChatCommand>>,
}

/// Owner of one logical connection.
pub struct Session {
    config: Arc<SessionConfig>,
    token: Token,
    state: Arc<watch::Sender<ConnectionState>>,
    outbound_tx: mpsc::UnboundedSender<ChatCommand>,
    outbound_rx: Option<mpsc::UnboundedReceiver<ChatCommand>>,
    run: Option<Run>,
}

impl Session {
    /// Create a disconnected session. No I/O happens until [`Session::start`].
    pub fn new(config: SessionConfig, token: Token) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            config: Arc::new(config),
            token,
            state: Arc::new(state),
            outbound_tx,
            outbound_rx: Some(outbound_rx),
            run: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn outbox(&self) -> Outbox {
        Outbox {
            tx: self.outbound_tx.clone(),
            state: self.state.subscribe(),
        }
    }

    /// Shorthand for `self.outbox().send(command)`.
    pub fn send(&self, command: ChatCommand) -> Result<()> {
        self.outbox().send(command)
    }

    /// Start a run and return its event stream. Allowed only while
    /// `Disconnected`; a terminated session can be started again. Fails with
    /// `Config` if the session config cannot drive a run.
    pub async fn start(&mut self) -> Result<Events> {
        self.config.validate()?;
        let next = self.state().transition(Transition::Start)?;
        if let Some(run) = self.run.take() {
            self.reclaim(run.task).await;
        }

        let outbound = match self.outbound_rx.take() {
            Some(rx) => rx,
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                self.outbound_tx = tx;
                rx
            }
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (quit_tx, quit_rx) = oneshot::channel();

        self.state.send_replace(next);
        let _ = events_tx.send(SessionEvent::StateChanged(next));

        let worker = Worker::new(
            self.config.clone(),
            self.token.clone(),
            self.state.clone(),
            events_tx,
            outbound,
            quit_rx,
        );
        let task = tokio::spawn(worker.run());
        self.run = Some(Run {
            quit: quit_tx,
            task,
        });
        Ok(Events { rx: events_rx })
    }

    /// Quit: flush accepted commands, close the transport, stop the ping
    /// timer and wait for the worker. Safe to call in any state.
    pub async fn close(&mut self) {
        if let Some(run) = self.run.take() {
            let _ = run.quit.send(());
            self.reclaim(run.task).await;
        }
    }

    async fn reclaim(&mut self, task: JoinHandle<mpsc::UnboundedReceiver<ChatCommand>>) {
        match task.await {
            Ok(rx) => self.outbound_rx = Some(rx),
            Err(e) => {
                error!(error = %e, "session worker failed");
                self.state.send_replace(ConnectionState::Disconnected);
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("url", &self.config.url)
            .field("state", &self.state())
            .field("running", &self.run.is_some())
            .finish()
    }
}
