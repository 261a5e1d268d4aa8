//! Integration tests for the session core: handshake, message flow, keep-alive,
//! reconnect budget and shutdown. Uses minimal in-process WebSocket servers
//! (no mocks).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eurus_client::{
    Backoff, ChatCommand, ConnectionState, Error, Events, ServerMessage, Session, SessionConfig,
    SessionEvent, Termination, Token,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

type ServerWs = WebSocketStream<TcpStream>;

const TOKEN: &str = "header.payload.signature";

fn token() -> Token {
    Token::new(TOKEN).unwrap()
}

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://127.0.0.1:{}", listener.local_addr().unwrap().port());
    (listener, url)
}

/// Short timers so failures and retries happen within milliseconds.
fn fast_config(url: &str) -> SessionConfig {
    SessionConfig::new(url)
        .with_reconnect_attempts(2)
        .with_backoff(Backoff::fixed(Duration::from_millis(10)))
        .with_handshake_timeout(Duration::from_secs(2))
}

async fn read_text(ws: &mut ServerWs) -> serde_json::Value {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(t))) => return serde_json::from_str(&t).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("expected a text frame, got {:?}", other),
        }
    }
}

/// Accept one connection, check the authenticate frame and accept the token.
async fn accept_authenticated(listener: &TcpListener) -> ServerWs {
    let (tcp, _) = listener.accept().await.unwrap();
    let mut ws = accept_async(tcp).await.unwrap();
    let auth = read_text(&mut ws).await;
    assert_eq!(auth["type"], "authenticate");
    assert_eq!(auth["payload"]["token"], TOKEN);
    ws.send(Message::Text(
        r#"{"type":"authenticated","payload":{"username":"alice"}}"#.into(),
    ))
    .await
    .unwrap();
    ws
}

/// Keep reading (so pongs get flushed) until the client goes away. Returns
/// the number of close frames seen.
async fn drain_until_closed(mut ws: ServerWs) -> usize {
    let mut close_frames = 0;
    while let Some(Ok(msg)) = ws.next().await {
        if msg.is_close() {
            close_frames += 1;
        }
    }
    close_frames
}

fn chat_frame(author: &str, content: &str) -> Message {
    Message::Text(format!(
        r#"{{"type":"message","payload":{{"content":"{}","createdAt":"2024-05-01T10:00:00Z","author":{{"username":"{}"}}}}}}"#,
        content, author
    ))
}

async fn next_event(events: &mut Events) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .expect("timed out waiting for a session event")
        .expect("event stream ended early")
}

async fn collect_until(
    events: &mut Events,
    done: impl Fn(&SessionEvent) -> bool,
) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let stop = done(&event);
        seen.push(event);
        if stop {
            return seen;
        }
    }
}

fn states(events: &[SessionEvent]) -> Vec<ConnectionState> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::StateChanged(s) => Some(*s),
            _ => None,
        })
        .collect()
}

fn is_connected(event: &SessionEvent) -> bool {
    *event == SessionEvent::StateChanged(ConnectionState::Connected)
}

fn is_terminated(event: &SessionEvent) -> bool {
    matches!(event, SessionEvent::Terminated(_))
}

#[tokio::test]
async fn connect_authenticate_and_receive_in_order() {
    let (listener, url) = bind().await;
    tokio::spawn(async move {
        let mut ws = accept_authenticated(&listener).await;
        ws.send(chat_frame("bob", "one")).await.unwrap();
        ws.send(chat_frame("carol", "two")).await.unwrap();
        drain_until_closed(ws).await;
    });

    let mut session = Session::new(fast_config(&url), token());
    let mut events = session.start().await.expect("start should succeed");

    let seen = collect_until(&mut events, |e| {
        matches!(e, SessionEvent::Message(ServerMessage::Message(m)) if m.content == "two")
    })
    .await;

    assert_eq!(
        states(&seen),
        [
            ConnectionState::Connecting,
            ConnectionState::Authenticated,
            ConnectionState::Connected
        ]
    );
    let contents: Vec<(String, String)> = seen
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Message(ServerMessage::Message(m)) => {
                Some((m.author.username.clone(), m.content.clone()))
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        contents,
        [("bob".to_string(), "one".to_string()), ("carol".to_string(), "two".to_string())]
    );
    assert_eq!(session.state(), ConnectionState::Connected);

    session.close().await;
    let tail = collect_until(&mut events, is_terminated).await;
    assert_eq!(
        tail.last(),
        Some(&SessionEvent::Terminated(Termination::Quit))
    );
    assert_eq!(states(&tail), [ConnectionState::Disconnected]);
    assert!(events.next().await.is_none(), "stream ends after Terminated");
}

#[tokio::test]
async fn outbound_commands_keep_order_and_carry_token() {
    let (listener, url) = bind().await;
    let (frames_tx, frames_rx) = oneshot::channel();
    tokio::spawn(async move {
        let mut ws = accept_authenticated(&listener).await;
        let mut frames = Vec::new();
        for _ in 0..3 {
            frames.push(read_text(&mut ws).await);
        }
        let _ = frames_tx.send(frames);
        drain_until_closed(ws).await;
    });

    let mut session = Session::new(fast_config(&url), token());
    let mut events = session.start().await.unwrap();
    collect_until(&mut events, is_connected).await;

    let outbox = session.outbox();
    outbox
        .send(ChatCommand::JoinRoom {
            room_id: "lobby".into(),
        })
        .unwrap();
    outbox
        .send(ChatCommand::Send {
            room_id: "lobby".into(),
            content: "first".into(),
        })
        .unwrap();
    session
        .send(ChatCommand::Send {
            room_id: "lobby".into(),
            content: "second".into(),
        })
        .unwrap();

    let frames = tokio::time::timeout(Duration::from_secs(5), frames_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frames[0]["type"], "joinRoom");
    assert_eq!(frames[0]["payload"]["roomId"], "lobby");
    assert_eq!(frames[1]["type"], "message");
    assert_eq!(frames[1]["payload"]["content"], "first");
    assert_eq!(frames[2]["payload"]["content"], "second");
    for frame in &frames {
        assert_eq!(frame["payload"]["token"], TOKEN);
    }

    session.close().await;
}

#[tokio::test]
async fn send_while_disconnected_fails_without_network_io() {
    let (listener, url) = bind().await;
    let session = Session::new(fast_config(&url), token());
    let outbox = session.outbox();

    let err = outbox
        .send(ChatCommand::Send {
            room_id: "lobby".into(),
            content: "hello".into(),
        })
        .unwrap_err();
    assert!(matches!(err, Error::NotConnected));
    assert!(matches!(
        session.send(ChatCommand::ListRooms),
        Err(Error::NotConnected)
    ));
    assert_eq!(session.state(), ConnectionState::Disconnected);

    let accepted = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
    assert!(accepted.is_err(), "no connection may be opened");
}

#[tokio::test]
async fn rejected_token_is_terminal_without_retries() {
    let (listener, url) = bind().await;
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = connections.clone();
    tokio::spawn(async move {
        loop {
            let (tcp, _) = listener.accept().await.unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
            let mut ws = accept_async(tcp).await.unwrap();
            let _ = read_text(&mut ws).await;
            ws.send(Message::Text(
                r#"{"type":"error","payload":{"message":"invalid token"}}"#.into(),
            ))
            .await
            .unwrap();
        }
    });

    let mut session = Session::new(fast_config(&url), token());
    let mut events = session.start().await.unwrap();
    let seen = collect_until(&mut events, is_terminated).await;

    assert_eq!(
        seen.last(),
        Some(&SessionEvent::Terminated(Termination::AuthRejected {
            reason: "invalid token".into()
        }))
    );
    assert!(!seen
        .iter()
        .any(|e| matches!(e, SessionEvent::Reconnecting { .. })));
    assert_eq!(
        states(&seen),
        [ConnectionState::Connecting, ConnectionState::Disconnected]
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(connections.load(Ordering::SeqCst), 1);
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn reconnect_attempts_are_bounded() {
    let (listener, url) = bind().await;
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = connections.clone();
    tokio::spawn(async move {
        loop {
            let (tcp, _) = listener.accept().await.unwrap();
            counter.fetch_add(1, Ordering::SeqCst);
            drop(tcp);
        }
    });

    let mut session = Session::new(fast_config(&url), token());
    let mut events = session.start().await.unwrap();
    let seen = collect_until(&mut events, is_terminated).await;

    let attempts: Vec<u32> = seen
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Reconnecting { attempt, delay } => {
                assert!(*delay > Duration::ZERO);
                Some(*attempt)
            }
            _ => None,
        })
        .collect();
    assert_eq!(attempts, [1, 2]);
    assert_eq!(
        seen.last(),
        Some(&SessionEvent::Terminated(Termination::ReconnectExhausted {
            attempts: 2
        }))
    );
    assert_eq!(
        states(&seen).last(),
        Some(&ConnectionState::Disconnected)
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(connections.load(Ordering::SeqCst), 3, "first try plus two retries");
}

#[tokio::test]
async fn zero_attempts_gives_up_after_first_failure() {
    let (listener, url) = bind().await;
    tokio::spawn(async move {
        loop {
            let (tcp, _) = listener.accept().await.unwrap();
            drop(tcp);
        }
    });

    let config = fast_config(&url).with_reconnect_attempts(0);
    let mut session = Session::new(config, token());
    let mut events = session.start().await.unwrap();
    let seen = collect_until(&mut events, is_terminated).await;

    assert_eq!(
        seen.last(),
        Some(&SessionEvent::Terminated(Termination::ReconnectExhausted {
            attempts: 0
        }))
    );
    assert!(!seen
        .iter()
        .any(|e| matches!(e, SessionEvent::Reconnecting { .. })));
}

#[tokio::test]
async fn silent_server_hits_handshake_timeout() {
    let (listener, url) = bind().await;
    let (closes_tx, closes_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let ws = accept_async(tcp).await.unwrap();
        // Never answer the authenticate frame.
        let _ = closes_tx.send(drain_until_closed(ws).await);
    });

    let config = fast_config(&url)
        .with_reconnect_attempts(0)
        .with_handshake_timeout(Duration::from_millis(100));
    let mut session = Session::new(config, token());
    let mut events = session.start().await.unwrap();
    let seen = collect_until(&mut events, is_terminated).await;

    assert_eq!(
        seen.last(),
        Some(&SessionEvent::Terminated(Termination::ReconnectExhausted {
            attempts: 0
        }))
    );

    let close_frames = tokio::time::timeout(Duration::from_secs(5), closes_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(close_frames, 1, "timed-out handshake still closes the socket");
}

#[tokio::test]
async fn rejected_handshake_sends_close_frame() {
    let (listener, url) = bind().await;
    let (closes_tx, closes_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        let _ = read_text(&mut ws).await;
        ws.send(Message::Text(
            r#"{"type":"error","payload":{"message":"invalid token"}}"#.into(),
        ))
        .await
        .unwrap();
        let _ = closes_tx.send(drain_until_closed(ws).await);
    });

    let mut session = Session::new(fast_config(&url), token());
    let mut events = session.start().await.unwrap();
    let seen = collect_until(&mut events, is_terminated).await;
    assert!(matches!(
        seen.last(),
        Some(SessionEvent::Terminated(Termination::AuthRejected { .. }))
    ));

    let close_frames = tokio::time::timeout(Duration::from_secs(5), closes_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(close_frames, 1);
}

#[tokio::test]
async fn zero_ping_interval_is_refused_before_any_io() {
    let (listener, url) = bind().await;
    let config = fast_config(&url).with_ping_interval(Duration::ZERO);
    let mut session = Session::new(config, token());

    let err = session.start().await.unwrap_err();
    assert!(matches!(err, Error::Config { .. }), "got {:?}", err);
    assert_eq!(session.state(), ConnectionState::Disconnected);

    let accepted = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
    assert!(accepted.is_err(), "no connection may be opened");

    // A usable config against the same endpoint connects normally.
    let mut session = Session::new(fast_config(&url), token());
    tokio::spawn(async move {
        let ws = accept_authenticated(&listener).await;
        drain_until_closed(ws).await;
    });
    let mut events = session.start().await.unwrap();
    collect_until(&mut events, is_connected).await;
    session.close().await;
    let tail = collect_until(&mut events, is_terminated).await;
    assert_eq!(
        tail.last(),
        Some(&SessionEvent::Terminated(Termination::Quit))
    );
}

#[tokio::test]
async fn server_drop_after_connect_reconnects() {
    let (listener, url) = bind().await;
    tokio::spawn(async move {
        let mut first = accept_authenticated(&listener).await;
        first.close(None).await.unwrap();
        drop(first);
        let second = accept_authenticated(&listener).await;
        drain_until_closed(second).await;
    });

    let mut session = Session::new(fast_config(&url), token());
    let mut events = session.start().await.unwrap();
    collect_until(&mut events, is_connected).await;

    let seen = collect_until(&mut events, is_connected).await;
    assert!(seen.contains(&SessionEvent::Reconnecting {
        attempt: 1,
        delay: Duration::from_millis(10)
    }));
    assert_eq!(
        states(&seen),
        [
            ConnectionState::Reconnecting,
            ConnectionState::Connecting,
            ConnectionState::Authenticated,
            ConnectionState::Connected
        ]
    );

    session.close().await;
}

#[tokio::test]
async fn keepalive_pings_follow_interval() {
    let (listener, url) = bind().await;
    let (gaps_tx, gaps_rx) = oneshot::channel();
    tokio::spawn(async move {
        let mut ws = accept_authenticated(&listener).await;
        let mut arrivals = Vec::new();
        while arrivals.len() < 5 {
            match ws.next().await {
                Some(Ok(Message::Ping(_))) => arrivals.push(tokio::time::Instant::now()),
                Some(Ok(_)) => {}
                _ => break,
            }
        }
        let gaps: Vec<Duration> = arrivals.windows(2).map(|w| w[1] - w[0]).collect();
        let _ = gaps_tx.send(gaps);
        drain_until_closed(ws).await;
    });

    let config = fast_config(&url)
        .with_ping_interval(Duration::from_millis(50))
        .with_pong_timeout(Duration::from_secs(1));
    let mut session = Session::new(config, token());
    let mut events = session.start().await.unwrap();
    collect_until(&mut events, is_connected).await;

    let gaps = tokio::time::timeout(Duration::from_secs(5), gaps_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(gaps.len(), 4);
    for gap in gaps {
        assert!(
            gap < Duration::from_millis(150),
            "ping gap {:?} far above the 50ms interval",
            gap
        );
    }
    assert_eq!(session.state(), ConnectionState::Connected);

    session.close().await;
    let tail = collect_until(&mut events, is_terminated).await;
    assert!(!tail
        .iter()
        .any(|e| matches!(e, SessionEvent::Reconnecting { .. })));
}

#[tokio::test]
async fn missing_pongs_drop_the_transport_and_close_stops_the_retry() {
    let (listener, url) = bind().await;
    let connections = Arc::new(AtomicUsize::new(0));
    let counter = connections.clone();
    tokio::spawn(async move {
        let ws = accept_authenticated(&listener).await;
        counter.fetch_add(1, Ordering::SeqCst);
        // Hold the socket without reading, so no pong is ever sent.
        tokio::time::sleep(Duration::from_secs(10)).await;
        drop(ws);
    });

    let config = fast_config(&url)
        .with_ping_interval(Duration::from_millis(30))
        .with_pong_timeout(Duration::from_millis(100))
        .with_backoff(Backoff::fixed(Duration::from_secs(30)));
    let mut session = Session::new(config, token());
    let mut events = session.start().await.unwrap();
    collect_until(&mut events, is_connected).await;

    let seen = collect_until(&mut events, |e| {
        matches!(e, SessionEvent::Reconnecting { .. })
    })
    .await;
    assert_eq!(states(&seen), [ConnectionState::Reconnecting]);
    assert_eq!(session.state(), ConnectionState::Reconnecting);

    tokio::time::timeout(Duration::from_secs(2), session.close())
        .await
        .expect("close must not wait out the backoff");
    let tail = collect_until(&mut events, is_terminated).await;
    assert_eq!(
        tail.last(),
        Some(&SessionEvent::Terminated(Termination::Quit))
    );
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn close_releases_the_transport_once() {
    let (listener, url) = bind().await;
    let (closes_tx, closes_rx) = oneshot::channel();
    tokio::spawn(async move {
        let ws = accept_authenticated(&listener).await;
        let _ = closes_tx.send(drain_until_closed(ws).await);
    });

    let mut session = Session::new(fast_config(&url), token());
    let mut events = session.start().await.unwrap();
    collect_until(&mut events, is_connected).await;

    session.close().await;
    session.close().await;

    let close_frames = tokio::time::timeout(Duration::from_secs(5), closes_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(close_frames, 1);
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(matches!(
        session.send(ChatCommand::ListRooms),
        Err(Error::NotConnected)
    ));
}

#[tokio::test]
async fn session_restarts_after_termination() {
    let (listener, url) = bind().await;
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        let _ = read_text(&mut ws).await;
        ws.send(Message::Text(
            r#"{"type":"error","payload":{"message":"token expired"}}"#.into(),
        ))
        .await
        .unwrap();
        drop(ws);

        let second = accept_authenticated(&listener).await;
        drain_until_closed(second).await;
    });

    let mut session = Session::new(fast_config(&url), token());
    let mut events = session.start().await.unwrap();
    let seen = collect_until(&mut events, is_terminated).await;
    assert!(matches!(
        seen.last(),
        Some(SessionEvent::Terminated(Termination::AuthRejected { .. }))
    ));

    let mut events = session.start().await.expect("restart after termination");
    collect_until(&mut events, is_connected).await;

    let err = session.start().await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));

    session.close().await;
}
