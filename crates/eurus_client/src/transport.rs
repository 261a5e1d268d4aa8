//! WebSocket transport: connect, authenticate, release.

use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::messages::{ClientFrame, ServerMessage};
use crate::token::Token;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
pub(crate) type WsSink = SplitSink<WsStream, Message>;

/// Upper bound on the close handshake when releasing a transport.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Open a WebSocket to `url` (e.g. `wss://host/ws`).
pub(crate) async fn connect(url: &str) -> Result<WsStream> {
    let (ws_stream, response) = tokio_tungstenite::connect_async(url).await?;
    debug!(url, status = %response.status(), "websocket open");
    Ok(ws_stream)
}

/// Present the token and wait for the server's verdict.
///
/// Returns the username the server reports, if any. An `error` frame or a
/// policy close before acceptance is a rejection.
pub(crate) async fn authenticate(ws: &mut WsStream, token: &Token) -> Result<Option<String>> {
    let frame = ClientFrame::authenticate(token.as_str()).to_text()?;
    ws.send(Message::Text(frame)).await?;

    while let Some(item) = ws.next().await {
        let text = match item? {
            Message::Text(t) => t,
            Message::Close(Some(frame)) if frame.code == CloseCode::Policy => {
                return Err(Error::Auth {
                    reason: frame.reason.into_owned(),
                });
            }
            Message::Close(_) => return Err(Error::ConnectionClosed),
            _ => continue,
        };
        match ServerMessage::parse(&text) {
            Ok(ServerMessage::Authenticated(payload)) => return Ok(payload.username),
            Ok(ServerMessage::Error(payload)) => {
                return Err(Error::Auth {
                    reason: payload.message,
                })
            }
            Ok(other) => debug!(?other, "ignoring message before authentication"),
            Err(e) => warn!(error = %e, "ignoring malformed frame during handshake"),
        }
    }
    Err(Error::ConnectionClosed)
}

/// Send a close frame and shut the sink (a split half or a whole stream).
/// Consumes it so a transport is released once.
pub(crate) async fn release<S>(mut sink: S)
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
        Ok(Ok(())) => debug!("websocket closed"),
        Ok(Err(e)) => debug!(error = %e, "websocket close failed"),
        Err(_) => debug!("websocket close timed out"),
    }
}
