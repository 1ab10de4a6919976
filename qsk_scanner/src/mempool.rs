//! Push channel for unconfirmed transactions: an insight socket.io
//! websocket subscription to the `inv` room.
//!
//! The subscriber owns its reconnect loop and only stops when the scanner
//! signals it; every `tx` event feeds the pipeline a single-transaction
//! batch with empty block context.

use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::Error;
use crate::pipeline::ExtractPipeline;

const SUBSCRIBE_ROOM: &str = "inv";
const RECONNECT_WAIT: Duration = Duration::from_secs(5);
// engine.io v3 sessions drop without a client heartbeat.
const PING_INTERVAL: Duration = Duration::from_secs(25);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Websocket client subscribing to mempool transaction announcements.
pub struct MempoolSubscriber {
    ws_url: String,
    pipeline: ExtractPipeline,
}

impl MempoolSubscriber {
    /// Build a subscriber from the explorer API url: the websocket lives on
    /// the same host under `/socket.io/`.
    pub fn new(api_url: &str, pipeline: ExtractPipeline) -> Result<Self, Error> {
        let parsed = Url::parse(api_url)?;
        let scheme = if parsed.scheme() == "https" { "wss" } else { "ws" };
        let host = parsed
            .host_str()
            .ok_or_else(|| Error::Generic(format!("no host in url {api_url}")))?;
        let authority = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        Ok(MempoolSubscriber {
            ws_url: format!("{scheme}://{authority}/socket.io/?EIO=3&transport=websocket"),
            pipeline,
        })
    }

    /// Run until `stop` turns true, reconnecting after a fixed delay on
    /// every connection error.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        loop {
            if *stop.borrow() {
                break;
            }
            log::info!("block scanner socket.io connecting");
            match self.listen(&mut stop).await {
                Ok(()) => {
                    log::info!("block scanner socket.io has been stopped");
                    break;
                }
                Err(e) => log::warn!("socket.io connection error: {e}"),
            }
            log::info!(
                "auto reconnect after {} seconds ...",
                RECONNECT_WAIT.as_secs()
            );
            tokio::select! {
                _ = tokio::time::sleep(RECONNECT_WAIT) => {}
                _ = stop.changed() => {}
            }
        }
    }

    /// One connection's lifetime. Returns `Ok` only on a stop signal.
    async fn listen(&self, stop: &mut watch::Receiver<bool>) -> Result<(), Error> {
        let (stream, _) = connect_async(self.ws_url.as_str()).await?;
        let (mut write, mut read) = stream.split();
        // First heartbeat one interval in, not at connect time.
        let mut ping = tokio::time::interval_at(
            tokio::time::Instant::now() + PING_INTERVAL,
            PING_INTERVAL,
        );
        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }
                _ = ping.tick() => {
                    write.send(Message::Text("2".to_string())).await?;
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_frame(&text, &mut write).await?,
                    Some(Ok(Message::Ping(payload))) => write.send(Message::Pong(payload)).await?,
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(Error::Generic("socket.io stream closed".to_string()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                },
            }
        }
    }

    async fn handle_frame(&self, frame: &str, write: &mut WsSink) -> Result<(), Error> {
        if frame.starts_with("40") {
            // socket.io connect acknowledged, join the room
            log::info!("block scanner socket.io connected");
            write
                .send(Message::Text(format!(
                    "42[\"subscribe\",\"{SUBSCRIBE_ROOM}\"]"
                )))
                .await?;
        } else if let Some(payload) = frame.strip_prefix("42") {
            if let Some(tx_id) = decode_tx_event(payload) {
                log::debug!("new mempool tx: {tx_id}");
                let tx_ids = vec![tx_id];
                if let Err(e) = self.pipeline.extract_batch(0, "", &tx_ids).await {
                    log::info!("block scanner can not extract mempool transaction: {e}");
                }
            }
        } else if frame == "2" {
            // server-initiated heartbeat
            write.send(Message::Text("3".to_string())).await?;
        }
        Ok(())
    }
}

/// The txid of a socket.io `tx` event payload, `None` for anything else.
fn decode_tx_event(payload: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    let event = value.as_array()?;
    if event.first()?.as_str()? != "tx" {
        return None;
    }
    event
        .get(1)?
        .get("txid")?
        .as_str()
        .map(ToString::to_string)
}
