use crate::config::SignalingConfig;
use crate::error::{CallError, Result};
use crate::signaling::link::{LinkEvent, SignalingLink};
use crate::signaling::messages::{ClientMessage, ServerMessage};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{error::ProtocolError, Error as WsError, Message};
use tracing::{debug, info, trace, warn};

/// Connection flag shared by the reader and writer tasks.
/// Whichever task notices the socket is gone first reports it.
#[derive(Clone)]
struct LinkStatus {
    connected: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl LinkStatus {
    fn new(events: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self {
            connected: Arc::new(AtomicBool::new(true)),
            events,
        }
    }

    fn is_up(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Emits `Disconnected` once; later calls are no-ops
    fn mark_down(&self, reason: String) -> bool {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return false;
        }
        info!(%reason, "signaling link disconnected");
        let _ = self.events.send(LinkEvent::Disconnected { reason });
        true
    }
}

/// Signaling link over a websocket to the relay server
pub struct WebSocketLink {
    send_tx: mpsc::UnboundedSender<ClientMessage>,
    status: LinkStatus,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WebSocketLink {
    pub async fn connect(
        config: &SignalingConfig,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<LinkEvent>)> {
        let url = config
            .url()
            .map_err(|e| CallError::Link(e.to_string()))?;
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| CallError::Link(format!("websocket connect to {url} failed: {e}")))?;
        info!(%url, "signaling websocket connected");

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (send_tx, mut send_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<LinkEvent>();
        let status = LinkStatus::new(event_tx.clone());

        let writer_status = status.clone();
        let writer = tokio::spawn(async move {
            while let Some(message) = send_rx.recv().await {
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("failed to encode {}: {e}", message.event_name());
                        continue;
                    }
                };
                trace!(event = message.event_name(), len = text.len(), "ws out");
                if let Err(e) = ws_write.send(Message::Text(text)).await {
                    warn!("signaling websocket write failed: {e}");
                    writer_status.mark_down(format!("write failed: {e}"));
                    break;
                }
            }
            let _ = ws_write.close().await;
        });

        let reader_status = status.clone();
        let reader = tokio::spawn(async move {
            let reason = loop {
                let Some(frame) = ws_read.next().await else {
                    break "stream ended".to_string();
                };
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!("dropping non-utf8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        break frame
                            .map(|f| format!("closed by server: {}", f.reason))
                            .unwrap_or_else(|| "closed by server".to_string());
                    }
                    Ok(_) => continue,
                    Err(err) => {
                        match &err {
                            WsError::ConnectionClosed
                            | WsError::AlreadyClosed
                            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                                debug!("signaling websocket closed: {err}");
                            }
                            _ => warn!("signaling websocket error: {err}"),
                        }
                        break err.to_string();
                    }
                };

                match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(_) if !reader_status.is_up() => {
                        break "write side failed".to_string();
                    }
                    Ok(message) => {
                        trace!(event = message.event_name(), len = text.len(), "ws in");
                        if event_tx.send(LinkEvent::Message(message)).is_err() {
                            break "receiver dropped".to_string();
                        }
                    }
                    Err(e) => warn!("ignoring unrecognised signaling message: {e}"),
                }
            };

            reader_status.mark_down(reason);
        });

        let link = Arc::new(Self {
            send_tx,
            status,
            tasks: Mutex::new(vec![writer, reader]),
        });
        Ok((link, event_rx))
    }
}

#[async_trait]
impl SignalingLink for WebSocketLink {
    async fn send(&self, message: ClientMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(CallError::Link(format!(
                "cannot send {}: link is disconnected",
                message.event_name()
            )));
        }
        debug!(event = message.event_name(), to = ?message.recipient(), "signaling send");
        self.send_tx
            .send(message)
            .map_err(|_| CallError::Link("signaling writer stopped".into()))
    }

    fn is_connected(&self) -> bool {
        self.status.is_up()
    }
}

impl Drop for WebSocketLink {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for handle in tasks.drain(..) {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_is_reported_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let status = LinkStatus::new(tx);
        let writer = status.clone();

        assert!(status.is_up());
        assert!(writer.mark_down("write failed: broken pipe".into()));
        assert!(!status.mark_down("stream ended".into()));
        assert!(!status.is_up());

        match rx.try_recv() {
            Ok(LinkEvent::Disconnected { reason }) => {
                assert_eq!(reason, "write failed: broken pipe")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }
}
