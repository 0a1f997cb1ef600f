//! Shared WebSocket transport
//!
//! Provides the TLS-enabled connection helper and `WsConnection`, the
//! tokio-tungstenite implementation of the `Connection` contract: JSON text
//! frames in and out, a background reader task, and automatic reconnection
//! with backoff after the session drops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{
    connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream,
};

use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::adapters::shared::reconnect::{reconnect_with_backoff, ReconnectConfig};
use crate::adapters::traits::{Connection, ConnectionEvent, EventSender};

/// Type alias for the WebSocket stream with TLS
pub type TlsWebSocketStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

type WsWriter = SplitSink<TlsWebSocketStream, Message>;
type WsReader = SplitStream<TlsWebSocketStream>;

/// Connect to a WebSocket endpoint with TLS (TLSv1.2 minimum)
///
/// `ws://` URLs are connected in plain mode; the TLS connector only applies
/// to `wss://`.
pub async fn connect_tls(url: &str) -> Result<TlsWebSocketStream, ExchangeError> {
    let tls = native_tls::TlsConnector::builder()
        .min_protocol_version(Some(native_tls::Protocol::Tlsv12))
        .build()
        .map_err(|e| ExchangeError::ConnectionFailed(format!("TLS error: {}", e)))?;

    let (ws_stream, _response) =
        connect_async_tls_with_config(url, None, false, Some(Connector::NativeTls(tls)))
            .await
            .map_err(|e| ExchangeError::WebSocket(Box::new(e)))?;

    Ok(ws_stream)
}

/// State shared between the connection handle and its reader task
struct WsShared {
    connected: AtomicBool,
    closing: AtomicBool,
    writer: Mutex<Option<WsWriter>>,
}

impl WsShared {
    /// Open a fresh session, install its writer and hand back the reader
    async fn open(&self, url: &str) -> ExchangeResult<WsReader> {
        let stream = connect_tls(url).await?;
        let (writer, reader) = stream.split();
        *self.writer.lock().await = Some(writer);
        self.connected.store(true, Ordering::SeqCst);
        Ok(reader)
    }

    async fn mark_down(&self) {
        self.connected.store(false, Ordering::SeqCst);
        *self.writer.lock().await = None;
    }
}

/// WebSocket transport with automatic reconnect
pub struct WsConnection {
    url: String,
    reconnect: ReconnectConfig,
    shared: Arc<WsShared>,
    reader_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl WsConnection {
    pub fn new(url: impl Into<String>, reconnect: ReconnectConfig) -> Self {
        Self {
            url: url.into(),
            reconnect,
            shared: Arc::new(WsShared {
                connected: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                writer: Mutex::new(None),
            }),
            reader_handle: std::sync::Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Background reader: pumps frames, and on a drop re-opens the session
    /// with backoff, announcing success with `Reconnected`.
    async fn reader_loop(
        url: String,
        reconnect: ReconnectConfig,
        shared: Arc<WsShared>,
        mut reader: WsReader,
        events: EventSender,
    ) {
        tracing::info!(url = %url, "WebSocket reader started");

        loop {
            Self::pump(&mut reader, &events).await;
            shared.mark_down().await;

            if shared.closing.load(Ordering::SeqCst) || events.is_closed() {
                break;
            }

            tracing::warn!(url = %url, "WebSocket session dropped, reconnecting");

            let slot: Arc<std::sync::Mutex<Option<WsReader>>> =
                Arc::new(std::sync::Mutex::new(None));
            let result = reconnect_with_backoff(&reconnect, &url, || {
                let shared = Arc::clone(&shared);
                let slot = Arc::clone(&slot);
                let url = url.clone();
                async move {
                    if shared.closing.load(Ordering::SeqCst) {
                        return Err(ExchangeError::ConnectionFailed(
                            "connection closed locally".into(),
                        ));
                    }
                    let reader = shared.open(&url).await?;
                    *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(reader);
                    Ok(())
                }
            })
            .await;

            let next = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            match (result, next) {
                (Ok(()), Some(next)) => {
                    reader = next;
                    tracing::info!(url = %url, "WebSocket session re-established");
                    if events.send(ConnectionEvent::Reconnected).is_err() {
                        break;
                    }
                }
                (Err(e), _) => {
                    tracing::error!(url = %url, error = %e, "Giving up on reconnection");
                    let _ = events.send(ConnectionEvent::Error(e));
                    break;
                }
                (Ok(()), None) => break,
            }
        }

        shared.mark_down().await;
        let _ = events.send(ConnectionEvent::Closed);
        tracing::warn!(url = %url, "WebSocket reader ended");
    }

    /// Forward frames until the session ends
    async fn pump(reader: &mut WsReader, events: &EventSender) {
        while let Some(frame) = reader.next().await {
            match frame {
                Ok(Message::Text(text)) => Self::forward_text(&text, events),
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => Self::forward_text(&text, events),
                    Err(e) => tracing::debug!(error = %e, "Binary frame is not UTF-8, skipped"),
                },
                Ok(Message::Close(frame)) => {
                    tracing::info!(frame = ?frame, "WebSocket closed by server");
                    break;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {
                    tracing::trace!("Control frame received");
                }
                Err(e) => {
                    tracing::error!(error = %e, "WebSocket read error");
                    let _ = events.send(ConnectionEvent::Error(e.into()));
                    break;
                }
            }
        }
    }

    fn forward_text(text: &str, events: &EventSender) {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => {
                let _ = events.send(ConnectionEvent::Message(value));
            }
            Err(e) => {
                tracing::debug!(error = %e, raw = %text, "Non-JSON frame skipped");
            }
        }
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn connect(&self, events: EventSender) -> ExchangeResult<()> {
        self.shared.closing.store(false, Ordering::SeqCst);
        let reader = self.shared.open(&self.url).await?;

        let handle = tokio::spawn(Self::reader_loop(
            self.url.clone(),
            self.reconnect.clone(),
            Arc::clone(&self.shared),
            reader,
            events,
        ));

        let previous = self
            .reader_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }

        tracing::info!(url = %self.url, "WebSocket connected");
        Ok(())
    }

    async fn disconnect(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);

        let handle = self
            .reader_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }

        let writer = self.shared.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.close().await {
                tracing::debug!(error = %e, "WebSocket close handshake failed");
            }
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        tracing::info!(url = %self.url, "WebSocket disconnected");
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, payload: &Value) -> ExchangeResult<()> {
        let mut writer = self.shared.writer.lock().await;
        let sink = writer
            .as_mut()
            .ok_or_else(|| ExchangeError::NotConnected("WebSocket session is down".into()))?;
        sink.send(Message::Text(payload.to_string()))
            .await
            .map_err(|e| ExchangeError::SendFailed(e.to_string()))
    }
}
