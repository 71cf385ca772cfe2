//! Persistent-channel session: one WebSocket from upgrade to disconnect.

use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::multiplexer::Multiplexer;
use crate::handler::Driver;

const OUTBOUND_BUFFER: usize = 256;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Outbound frames go out as text when they are valid UTF-8.
fn to_message(frame: Bytes) -> Message {
    match String::from_utf8(frame.to_vec()) {
        Ok(text) => Message::Text(text.into()),
        Err(_) => Message::Binary(frame),
    }
}

/// Run a channel session for a connected client.
///
/// Inbound text and binary messages are frames. A malformed frame closes
/// the channel. On disconnect every open invocation is retired.
#[instrument(skip_all, fields(channel_id = %channel_id))]
pub async fn run_channel_session(
    ws: WebSocket,
    channel_id: String,
    driver: Driver,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Bytes>(OUTBOUND_BUFFER);
    let root = shutdown.child_token();
    let mux = Multiplexer::new(driver, root.clone(), send_tx);

    let started = Instant::now();
    info!("channel opened");
    counter!("wok_channels_total").increment(1);
    gauge!("wok_channels_active").increment(1.0);

    let mut outbound = tokio::spawn(async move {
        while let Some(frame) = send_rx.recv().await {
            if ws_tx.send(to_message(frame)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            () = root.cancelled() => break,
        };
        let Some(Ok(msg)) = msg else { break };

        let data = match msg {
            Message::Text(text) => Bytes::from(text.as_str().to_owned()),
            Message::Binary(data) => data,
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        if let Err(err) = mux.dispatch(&data).await {
            warn!(category = err.category(), error = %err, "closing channel");
            counter!("wok_channel_protocol_errors_total").increment(1);
            break;
        }
    }

    mux.close_all().await;
    root.cancel();
    drop(mux);

    info!("channel closed");
    gauge!("wok_channels_active").decrement(1.0);
    histogram!("wok_channel_duration_seconds").record(started.elapsed().as_secs_f64());

    // Queued DONE frames flush once the last invocation task lets go.
    if tokio::time::timeout(FLUSH_TIMEOUT, &mut outbound).await.is_err() {
        warn!("outbound flush timed out");
        outbound.abort();
    }
}
