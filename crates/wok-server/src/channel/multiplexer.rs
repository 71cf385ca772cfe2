//! Invocation multiplexer for one persistent channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use wok_core::{Output, Params, WokError};
use wok_runtime::TransportClass;

use super::protocol::{
    Command, encode_apply, encode_done, encode_response, parse_event, parse_frame,
    parse_request_head,
};
use crate::app::RequestHead;
use crate::handler::Driver;

struct Invocation {
    generation: u64,
    token: CancellationToken,
    input: mpsc::Sender<Params>,
}

/// Routes channel frames to invocations and serializes their replies onto
/// one outbound queue.
///
/// Each `REQUEST` id owns a child token of the channel's root token, a
/// bounded input stream fed by `EVENT` and a bounded output stream drained
/// into `APPLY` frames. `DONE` is written exactly once per invocation.
#[derive(Clone)]
pub struct Multiplexer {
    driver: Driver,
    root: CancellationToken,
    outbound: mpsc::Sender<Bytes>,
    invocations: Arc<DashMap<String, Invocation>>,
    generation: Arc<AtomicU64>,
}

impl Multiplexer {
    /// Multiplexer writing frames to `outbound`. Cancelling `root` cancels
    /// every invocation.
    pub fn new(driver: Driver, root: CancellationToken, outbound: mpsc::Sender<Bytes>) -> Self {
        Self {
            driver,
            root,
            outbound,
            invocations: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Open invocations.
    pub fn active(&self) -> usize {
        self.invocations.len()
    }

    /// Handle one inbound frame.
    ///
    /// An error means the frame was malformed and the channel should close.
    pub async fn dispatch(&self, data: &[u8]) -> Result<(), WokError> {
        let frame = parse_frame(data)?;
        match frame.command {
            Command::Request => {
                self.cleanup(&frame.id, None).await;
                let head = parse_request_head(&frame.body)?;
                self.open(frame.id, head);
            }
            Command::Event => {
                let params = parse_event(&frame.body);
                if let Some(invocation) = self.invocations.get(&frame.id) {
                    if invocation.input.try_send(params).is_err() {
                        debug!(id = %frame.id, "event dropped, input full");
                    }
                }
            }
            Command::Close => self.cleanup(&frame.id, None).await,
            Command::Unknown(name) => {
                debug!(command = %name, id = %frame.id, "ignoring unknown command");
            }
        }
        Ok(())
    }

    /// Retire every open invocation.
    pub async fn close_all(&self) {
        let ids: Vec<String> = self
            .invocations
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in ids {
            self.cleanup(&id, None).await;
        }
    }

    fn open(&self, id: String, head: RequestHead) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();
        let config = self.driver.config();
        let (input_tx, input_rx) = mpsc::channel(config.input_buffer);
        let (output_tx, output_rx) = mpsc::channel(config.output_buffer);

        let _ = self.invocations.insert(
            id.clone(),
            Invocation {
                generation,
                token: token.clone(),
                input: input_tx,
            },
        );
        counter!("wok_channel_requests_total").increment(1);
        gauge!("wok_channel_invocations_active").increment(1.0);
        debug!(id = %id, generation, path = %head.path(), "invocation opened");

        let scope = self.driver.scope(
            &head,
            TransportClass::Socket,
            token.clone(),
            Some((input_rx, output_tx)),
        );

        let forwarder = self.clone();
        let forward_id = id.clone();
        let forward_token = token.clone();
        drop(tokio::spawn(async move {
            forwarder
                .forward(&forward_id, generation, output_rx, forward_token)
                .await;
        }));

        let mux = self.clone();
        drop(tokio::spawn(async move {
            let (reply, resolution) = mux.driver.serve(&scope, &head).await;
            if !token.is_cancelled() {
                let frame = encode_response(&id, reply.status, &reply.headers, &reply.body);
                if mux.outbound.send(frame).await.is_ok() {
                    if let Some(resolution) = resolution.filter(|r| r.reload_on_events) {
                        mux.driver.follow(&scope, resolution).await;
                    }
                }
            }
            drop(scope);
            mux.cleanup(&id, Some(generation)).await;
        }));
    }

    /// Drain pushed output into `APPLY` frames until the invocation ends.
    async fn forward(
        &self,
        id: &str,
        generation: u64,
        mut output: mpsc::Receiver<Output>,
        token: CancellationToken,
    ) {
        loop {
            let next = tokio::select! {
                next = output.recv() => next,
                () = token.cancelled() => None,
            };
            let Some(next) = next else { break };

            match encode_apply(id, &next) {
                Ok(frame) => {
                    if self.outbound.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(id, category = err.category(), error = %err, "failed to encode output");
                    break;
                }
            }
        }
        self.cleanup(id, Some(generation)).await;
    }

    /// Cancel and forget `id`, emitting `DONE` if it was still open.
    ///
    /// With a generation, only that incarnation of `id` is retired.
    async fn cleanup(&self, id: &str, generation: Option<u64>) {
        let removed = self.invocations.remove_if(id, |_, invocation| {
            generation.is_none_or(|g| invocation.generation == g)
        });
        let Some((_, invocation)) = removed else {
            return;
        };

        invocation.token.cancel();
        gauge!("wok_channel_invocations_active").decrement(1.0);
        debug!(id, generation = invocation.generation, "invocation retired");
        let _ = self.outbound.send(encode_done(id)).await;
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("active", &self.active())
            .finish_non_exhaustive()
    }
}
