//! Persistent bidirectional connection endpoint.
//!
//! One relay per socket: the upgrade handler splits the socket into the two
//! halves the relay drives and hands over until the connection ends.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Extension,
    extract::{
        Path, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::sync::Mutex;
use tracing::debug;

use docrelay_core::ClientId;
use docrelay_relay::{ConnectionClosed, MessageSink, MessageSource, StreamRelay};

use crate::app::errors::json_error;
use crate::app::services::AppServices;

/// Write half of the socket. Acknowledgements and deliveries both travel
/// here, so sends are serialized behind a mutex.
struct WsSink(Mutex<SplitSink<WebSocket, Message>>);

#[async_trait]
impl MessageSink for WsSink {
    async fn send_text(&self, text: String) -> Result<(), ConnectionClosed> {
        self.0
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|_| ConnectionClosed)
    }
}

struct WsSource(SplitStream<WebSocket>);

#[async_trait]
impl MessageSource for WsSource {
    async fn next_text(&mut self) -> Result<Option<String>, ConnectionClosed> {
        loop {
            match self.0.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // Pings are answered by the socket layer; other frame kinds
                // carry nothing for the relay.
                Some(Ok(_)) => continue,
                Some(Err(_)) => return Err(ConnectionClosed),
            }
        }
    }
}

pub async fn relay_connection(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    Extension(services): Extension<Arc<AppServices>>,
) -> Response {
    let client = match ClientId::new(client_id) {
        Ok(client) => client,
        Err(e) => {
            return json_error(StatusCode::BAD_REQUEST, "invalid_client_id", e.to_string());
        }
    };

    ws.on_upgrade(move |socket| async move {
        debug!(client = %client, "websocket upgraded");
        let (sink, source) = socket.split();
        let relay = StreamRelay::new(
            client,
            services.log.clone(),
            services.checkpoints.clone(),
            services.dispatcher.clone(),
            services.relay_config.clone(),
        );
        relay
            .run(
                WsSource(source),
                Arc::new(WsSink(Mutex::new(sink))),
                services.shutdown.clone(),
            )
            .await;
    })
}
