use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use encore_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;
use crate::registry::ConnectionHandle;

/// Handle a single WebSocket connection.
///
/// The socket is anonymous until the client announces an identity with a
/// `connection` command. Whatever it registered is removed by `conn_id`
/// when the socket closes.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher) {
    let (mut sender, mut receiver) = socket.split();
    let (handle, mut events) = ConnectionHandle::new();
    let conn_id = handle.conn_id;

    info!("connection {} opened", conn_id);

    // Forward queued events -> client
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("failed to encode {:?}: {}", event, e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Read commands from client
    let recv_dispatcher = dispatcher.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(&recv_dispatcher, &handle, cmd).await,
                    Err(e) => {
                        warn!(
                            "connection {} bad command: {} -- raw: {}",
                            handle.conn_id,
                            e,
                            truncate(&text, 200)
                        );
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    let registry = dispatcher.registry();
    registry.unregister(conn_id).await;
    info!("connection {} closed ({} online)", conn_id, registry.online_count().await);
}

async fn handle_command(dispatcher: &Dispatcher, handle: &ConnectionHandle, cmd: GatewayCommand) {
    match cmd {
        GatewayCommand::Connection { id } => {
            dispatcher.registry().register(id, handle.clone()).await;
            // Acknowledged even when an earlier connection already holds `id`.
            if handle.send(GatewayEvent::ConnectionAck).is_err() {
                debug!("connection {} closed before ack", handle.conn_id);
            }
        }

        GatewayCommand::Message { text } => {
            let reached = dispatcher.broadcast(GatewayEvent::Notification { text }).await;
            debug!("connection {} relayed message to {} peers", handle.conn_id, reached);
        }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionRegistry;
    use axum::{Router, extract::State, extract::WebSocketUpgrade, response::IntoResponse, routing::get};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
    use uuid::Uuid;

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn upgrade(State(dispatcher): State<Dispatcher>, ws: WebSocketUpgrade) -> impl IntoResponse {
        ws.on_upgrade(move |socket| handle_connection(socket, dispatcher))
    }

    /// Serve `/gateway` on an ephemeral loopback port.
    async fn serve() -> (Dispatcher, SocketAddr) {
        let dispatcher = Dispatcher::new(ConnectionRegistry::new());
        let app = Router::new()
            .route("/gateway", get(upgrade))
            .with_state(dispatcher.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (dispatcher, addr)
    }

    async fn wait_until_gone(dispatcher: &Dispatcher, user: Uuid) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while dispatcher.registry().find(user).await.is_some() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("identity still registered after disconnect");
    }

    async fn announce(ws: &mut Client, user: Uuid) {
        let hello = serde_json::to_string(&GatewayCommand::Connection { id: user }).unwrap();
        ws.send(WsMessage::Text(hello.into())).await.unwrap();
        let ack = ws.next().await.unwrap().unwrap();
        let ack: GatewayEvent = serde_json::from_str(ack.to_text().unwrap()).unwrap();
        assert_eq!(ack, GatewayEvent::ConnectionAck);
    }

    #[tokio::test]
    async fn connection_command_registers_and_acks() {
        let dispatcher = Dispatcher::new(ConnectionRegistry::new());
        let (handle, mut rx) = ConnectionHandle::new();
        let user = Uuid::new_v4();

        handle_command(&dispatcher, &handle, GatewayCommand::Connection { id: user }).await;

        assert_eq!(rx.try_recv().unwrap(), GatewayEvent::ConnectionAck);
        let found = dispatcher.registry().find(user).await.unwrap();
        assert_eq!(found.handle.conn_id, handle.conn_id);
    }

    #[tokio::test]
    async fn duplicate_identity_still_acked_but_not_addressable() {
        let dispatcher = Dispatcher::new(ConnectionRegistry::new());
        let (first, _rx1) = ConnectionHandle::new();
        let (second, mut rx2) = ConnectionHandle::new();
        let user = Uuid::new_v4();

        handle_command(&dispatcher, &first, GatewayCommand::Connection { id: user }).await;
        handle_command(&dispatcher, &second, GatewayCommand::Connection { id: user }).await;

        assert_eq!(rx2.try_recv().unwrap(), GatewayEvent::ConnectionAck);
        assert_eq!(dispatcher.registry().find(user).await.unwrap().handle.conn_id, first.conn_id);
    }

    #[tokio::test]
    async fn message_command_is_relayed_to_everyone() {
        let dispatcher = Dispatcher::new(ConnectionRegistry::new());
        let (a, mut rx_a) = ConnectionHandle::new();
        let (b, mut rx_b) = ConnectionHandle::new();
        handle_command(&dispatcher, &a, GatewayCommand::Connection { id: Uuid::new_v4() }).await;
        handle_command(&dispatcher, &b, GatewayCommand::Connection { id: Uuid::new_v4() }).await;
        let _ = rx_a.try_recv();
        let _ = rx_b.try_recv();

        handle_command(&dispatcher, &a, GatewayCommand::Message { text: "hey".into() }).await;

        let expected = GatewayEvent::notification("hey");
        assert_eq!(rx_a.try_recv().unwrap(), expected);
        assert_eq!(rx_b.try_recv().unwrap(), expected);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 200), "hi");
    }

    #[tokio::test]
    async fn dropped_socket_unregisters_its_identity() {
        let (dispatcher, addr) = serve().await;
        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/gateway", addr))
            .await
            .unwrap();
        let user = Uuid::new_v4();

        announce(&mut ws, user).await;
        assert!(dispatcher.registry().find(user).await.is_some());

        // Targeted events reach the socket while it is open.
        assert!(dispatcher.send_to_user(user, GatewayEvent::notification("hi")).await);
        let frame = ws.next().await.unwrap().unwrap();
        let event: GatewayEvent = serde_json::from_str(frame.to_text().unwrap()).unwrap();
        assert_eq!(event, GatewayEvent::notification("hi"));

        // No close frame: the transport just goes away.
        drop(ws);
        wait_until_gone(&dispatcher, user).await;
        assert!(!dispatcher.send_to_user(user, GatewayEvent::notification("gone")).await);
    }

    #[tokio::test]
    async fn close_frame_unregisters_and_frees_the_identity() {
        let (dispatcher, addr) = serve().await;
        let url = format!("ws://{}/gateway", addr);
        let user = Uuid::new_v4();

        let (mut first, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        announce(&mut first, user).await;
        first.close(None).await.unwrap();
        wait_until_gone(&dispatcher, user).await;

        // The same identity can be claimed again by a new socket.
        let (mut second, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        announce(&mut second, user).await;
        assert!(dispatcher.registry().find(user).await.is_some());
        assert_eq!(dispatcher.registry().online_count().await, 1);
    }
}
