//! WebSocket sessions end to end: negotiation, echo, and the open/close pairing.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use scoped_server::http::websocket::{Negotiation, WebSocketHandler, WebSocketSession};
use scoped_server::http::{Request, ServerBuilder};

mod common;

#[derive(Default)]
struct Tally {
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl Tally {
    /// Wait until every opened session has been closed.
    async fn settle(&self, expected_opened: usize) {
        for _ in 0..100 {
            if self.opened.load(Ordering::SeqCst) == expected_opened
                && self.closed.load(Ordering::SeqCst) == expected_opened
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "sessions did not settle: opened={} closed={}",
            self.opened.load(Ordering::SeqCst),
            self.closed.load(Ordering::SeqCst)
        );
    }
}

struct Echo {
    tally: Arc<Tally>,
}

impl WebSocketHandler for Echo {
    fn on_check(&self, _request: &Request, offered: &[&str]) -> Negotiation {
        if offered.contains(&"forbidden") {
            return Negotiation::Reject;
        }
        Negotiation::Accept(offered.iter().find(|p| **p == "chat").map(|p| p.to_string()))
    }

    fn on_opened(&self, session: &Arc<WebSocketSession>) {
        self.tally.opened.fetch_add(1, Ordering::SeqCst);
        let _ = session.send_text("welcome");
    }

    fn on_message(&self, session: &Arc<WebSocketSession>, text: &str) {
        match text {
            "bye" => session.close(),
            "boom" => panic!("handler failure"),
            _ => {
                let _ = session.send_text(format!("echo: {text}"));
            }
        }
    }

    fn on_binary(&self, session: &Arc<WebSocketSession>, data: &[u8]) {
        let mut reversed = data.to_vec();
        reversed.reverse();
        let _ = session.send_binary(reversed);
    }

    fn on_closed(&self, _session: &Arc<WebSocketSession>) {
        self.tally.closed.fetch_add(1, Ordering::SeqCst);
    }
}

async fn start(addr: &str) -> (common::TestServer, Arc<Tally>) {
    let addr: SocketAddr = addr.parse().unwrap();
    let tally = Arc::new(Tally::default());
    let builder = ServerBuilder::new(common::test_config(addr)).websocket(
        "/ws",
        Echo {
            tally: Arc::clone(&tally),
        },
    );
    (common::start_server(builder).await, tally)
}

async fn next_text<S>(stream: &mut S) -> String
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return text.as_str().to_owned(),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn text_and_binary_frames_are_echoed() {
    let (server, tally) = start("127.0.0.1:38401").await;

    let (mut socket, response) = tokio_tungstenite::connect_async(server.ws_url("/ws")).await.unwrap();
    assert_eq!(response.status(), 101);
    assert!(response.headers().contains_key("x-request-id"));

    assert_eq!(next_text(&mut socket).await, "welcome");
    socket.send(Message::text("hello")).await.unwrap();
    assert_eq!(next_text(&mut socket).await, "echo: hello");

    socket.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
    match socket.next().await {
        Some(Ok(Message::Binary(data))) => assert_eq!(data.as_ref(), &[3u8, 2, 1]),
        other => panic!("expected a binary frame, got {other:?}"),
    }

    socket.close(None).await.unwrap();
    tally.settle(1).await;
    server.stop().await;
}

#[tokio::test]
async fn sub_protocol_is_negotiated() {
    let (server, tally) = start("127.0.0.1:38402").await;

    let mut request = server.ws_url("/ws").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("sec-websocket-protocol", "superchat, chat".parse().unwrap());
    let (mut socket, response) = tokio_tungstenite::connect_async(request).await.unwrap();
    assert_eq!(response.headers()["sec-websocket-protocol"], "chat");

    assert_eq!(next_text(&mut socket).await, "welcome");
    socket.close(None).await.unwrap();
    tally.settle(1).await;
    server.stop().await;
}

#[tokio::test]
async fn rejected_check_refuses_the_upgrade() {
    let (server, tally) = start("127.0.0.1:38403").await;

    let mut request = server.ws_url("/ws").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("sec-websocket-protocol", "forbidden".parse().unwrap());
    match tokio_tungstenite::connect_async(request).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 403),
        other => panic!("expected an HTTP rejection, got {:?}", other.map(|(_, r)| r.status())),
    }

    assert_eq!(tally.opened.load(Ordering::SeqCst), 0);
    assert_eq!(tally.closed.load(Ordering::SeqCst), 0);
    server.stop().await;
}

#[tokio::test]
async fn unknown_path_is_not_upgraded() {
    let (server, _tally) = start("127.0.0.1:38404").await;

    match tokio_tungstenite::connect_async(server.ws_url("/elsewhere")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 404),
        other => panic!("expected 404, got {:?}", other.map(|(_, r)| r.status())),
    }
    server.stop().await;
}

#[tokio::test]
async fn every_ending_closes_the_session_once() {
    let (server, tally) = start("127.0.0.1:38405").await;

    // Server-initiated close.
    let (mut socket, _) = tokio_tungstenite::connect_async(server.ws_url("/ws")).await.unwrap();
    assert_eq!(next_text(&mut socket).await, "welcome");
    socket.send(Message::text("bye")).await.unwrap();
    loop {
        match socket.next().await {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
            Some(Ok(_)) => continue,
        }
    }
    tally.settle(1).await;

    // Abrupt disconnect without a close frame.
    let (mut socket, _) = tokio_tungstenite::connect_async(server.ws_url("/ws")).await.unwrap();
    assert_eq!(next_text(&mut socket).await, "welcome");
    drop(socket);
    tally.settle(2).await;

    // Handler panic.
    let (mut socket, _) = tokio_tungstenite::connect_async(server.ws_url("/ws")).await.unwrap();
    assert_eq!(next_text(&mut socket).await, "welcome");
    socket.send(Message::text("boom")).await.unwrap();
    tally.settle(3).await;

    server.stop().await;
}
