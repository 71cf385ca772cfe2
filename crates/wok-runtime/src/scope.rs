//! Request scope: everything a `handle` call and its plans share with the
//! transport.
//!
//! A scope lives as long as its request token. On a persistent channel one
//! scope serves every re-evaluation of the same invocation, so the deduper,
//! route memo and vary set outlive any single `handle` call.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use wok_core::{Output, Params, Route, SegmentEncoding, WokError, from_header};

use crate::background::BackgroundTracker;
use crate::config::SchedulerConfig;
use crate::dedupe::Deduper;
use crate::memo::RouteMemo;
use crate::plan::TransportClass;

/// Response the transport must send instead of the aggregated output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseOverride {
    /// Status code.
    pub status: u16,
    /// Extra headers, in order.
    pub headers: Vec<(String, String)>,
    /// Body bytes.
    pub body: Bytes,
}

impl ResponseOverride {
    /// Empty response with `status`.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Add a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// Token of an instance that outlived its `handle` call.
#[derive(Clone, Debug)]
pub(crate) struct LiveInstance {
    pub(crate) depth: usize,
    pub(crate) dependencies: Vec<String>,
    pub(crate) always_run: bool,
    pub(crate) token: CancellationToken,
}

#[derive(Debug, Default)]
struct ResponseState {
    status: Option<u16>,
    custom: Option<ResponseOverride>,
}

/// Counted set of header names for the `Vary` response header.
#[derive(Clone, Debug, Default)]
struct VarySet {
    counts: Arc<Mutex<IndexMap<String, usize>>>,
}

impl VarySet {
    fn add(&self, header: &str) {
        *self.counts.lock().entry(header.to_string()).or_insert(0) += 1;
    }

    fn add_until(&self, header: &str, until: &CancellationToken) {
        self.add(header);
        let counts = Arc::clone(&self.counts);
        let token = until.clone();
        let header = header.to_string();
        drop(tokio::spawn(async move {
            token.cancelled().await;
            let mut counts = counts.lock();
            if let Some(n) = counts.get_mut(&header) {
                *n -= 1;
                if *n == 0 {
                    let _ = counts.shift_remove(&header);
                }
            }
        }));
    }

    fn headers(&self) -> Vec<String> {
        self.counts.lock().keys().cloned().collect()
    }
}

/// Shared state for one request or channel invocation.
#[derive(Debug)]
pub struct Scope {
    token: CancellationToken,
    abort: CancellationToken,
    method: String,
    transport: TransportClass,
    call: Option<String>,
    instance_id: Option<String>,
    headers: HashMap<String, String>,
    encoding: SegmentEncoding,
    deduper: Deduper,
    memo: RouteMemo,
    vary: VarySet,
    served: Mutex<HashMap<String, u64>>,
    live: Mutex<HashMap<String, Vec<LiveInstance>>>,
    response: Mutex<ResponseState>,
    input: Option<tokio::sync::Mutex<mpsc::Receiver<Params>>>,
    output: Option<mpsc::Sender<Output>>,
    background: BackgroundTracker,
}

impl Scope {
    /// Start building a scope.
    pub fn builder() -> ScopeBuilder {
        ScopeBuilder::default()
    }

    /// Request token. Cancelling it ends every plan context.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn abort_token(&self) -> &CancellationToken {
        &self.abort
    }

    /// Whether a plan took over the response.
    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    /// HTTP method.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// How the request arrived.
    pub fn transport(&self) -> TransportClass {
        self.transport
    }

    /// Named call, if the client asked for one.
    pub fn call(&self) -> Option<&str> {
        self.call.as_deref()
    }

    /// Client instance identity.
    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    /// Request header value (case-insensitive). Repeated headers are comma-joined.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Route and params the client last received under `header`.
    ///
    /// Values remembered earlier in this scope take precedence over the
    /// request header.
    pub fn remembered(&self, header: &str) -> (Params, Route) {
        match self.memo.latest(header) {
            Some(value) => from_header(&value, self.encoding),
            None => self
                .header(header)
                .map(|value| from_header(value, self.encoding))
                .unwrap_or_default(),
        }
    }

    /// Dependency deduplicator.
    pub fn deduper(&self) -> &Deduper {
        &self.deduper
    }

    /// Route memo.
    pub fn memo(&self) -> &RouteMemo {
        &self.memo
    }

    /// Background tracker for side-effect plans.
    pub fn background(&self) -> &BackgroundTracker {
        &self.background
    }

    /// Add headers to `Vary` for the rest of the scope.
    pub fn vary<I, S>(&self, headers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for header in headers {
            self.vary.add(header.as_ref());
        }
    }

    /// Add headers to `Vary` until `until` is cancelled.
    pub fn context_vary<I, S>(&self, headers: I, until: &CancellationToken)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for header in headers {
            self.vary.add_until(header.as_ref(), until);
        }
    }

    /// Current `Vary` header names.
    pub fn vary_headers(&self) -> Vec<String> {
        self.vary.headers()
    }

    /// Record `value` as what the client now holds under `header`.
    ///
    /// Replaces the entry recorded by the previous call on the same header,
    /// so repeated calls keep one memo entry and one `Vary` mark per header.
    pub(crate) fn record_served(&self, header: &str, value: String) {
        let id = self.memo.remember(header, value, &self.token);
        let previous = self.served.lock().insert(header.to_ascii_lowercase(), id);
        match previous {
            Some(previous) => self.memo.forget(previous),
            None => self.vary([header]),
        }
    }

    /// Instances left running by the last call under `header`.
    pub(crate) fn take_live(&self, header: &str) -> Vec<LiveInstance> {
        self.live
            .lock()
            .remove(&header.to_ascii_lowercase())
            .unwrap_or_default()
    }

    pub(crate) fn put_live(&self, header: &str, instances: Vec<LiveInstance>) {
        let _ = self
            .live
            .lock()
            .insert(header.to_ascii_lowercase(), instances);
    }

    /// Status code, 200 unless set.
    pub fn status_code(&self) -> u16 {
        self.response.lock().status.unwrap_or(200)
    }

    /// Set the status code.
    pub fn set_status_code(&self, status: u16) {
        self.response.lock().status = Some(status);
    }

    /// Take over the response. The first request wins and stops scheduling.
    ///
    /// Returns whether this call won.
    pub fn handle_response(&self, response: ResponseOverride) -> bool {
        {
            let mut state = self.response.lock();
            if state.custom.is_some() {
                return false;
            }
            debug!(status = response.status, "plan took over the response");
            state.custom = Some(response);
        }
        self.abort.cancel();
        true
    }

    /// Response requested by a plan, if any.
    pub fn response_override(&self) -> Option<ResponseOverride> {
        self.response.lock().custom.clone()
    }

    /// Whether plans can push output to the client.
    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    /// Push output to the client until `until` ends.
    pub async fn send(&self, output: Output, until: &CancellationToken) -> Result<(), WokError> {
        let Some(tx) = &self.output else {
            return Err(WokError::ChannelClosed);
        };
        if until.is_cancelled() {
            return Err(WokError::ChannelClosed);
        }
        tokio::select! {
            sent = tx.send(output) => sent.map_err(|_| WokError::ChannelClosed),
            () = until.cancelled() => Err(WokError::ChannelClosed),
        }
    }

    /// Next param update from the client, or `None` once the stream or
    /// `until` ends.
    pub async fn recv(&self, until: &CancellationToken) -> Option<Params> {
        let input = self.input.as_ref()?;
        let mut rx = tokio::select! {
            guard = input.lock() => guard,
            () = until.cancelled() => return None,
        };
        tokio::select! {
            params = rx.recv() => params,
            () = until.cancelled() => None,
        }
    }
}

/// Builder for [`Scope`].
#[derive(Debug, Default)]
pub struct ScopeBuilder {
    token: Option<CancellationToken>,
    method: Option<String>,
    transport: TransportClass,
    call: Option<String>,
    instance_id: Option<String>,
    headers: Vec<(String, String)>,
    input: Option<mpsc::Receiver<Params>>,
    output: Option<mpsc::Sender<Output>>,
    background: Option<BackgroundTracker>,
}

impl ScopeBuilder {
    /// Request token. Defaults to a fresh token.
    #[must_use]
    pub fn token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// HTTP method. Defaults to `GET`.
    #[must_use]
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Transport class.
    #[must_use]
    pub fn transport(mut self, transport: TransportClass) -> Self {
        self.transport = transport;
        self
    }

    /// Named call.
    #[must_use]
    pub fn call(mut self, call: impl Into<String>) -> Self {
        self.call = Some(call.into());
        self
    }

    /// Client instance identity.
    #[must_use]
    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    /// Add a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Client param updates.
    #[must_use]
    pub fn input(mut self, rx: mpsc::Receiver<Params>) -> Self {
        self.input = Some(rx);
        self
    }

    /// Sink for pushed output.
    #[must_use]
    pub fn output(mut self, tx: mpsc::Sender<Output>) -> Self {
        self.output = Some(tx);
        self
    }

    /// Share a tracker across scopes.
    #[must_use]
    pub fn background(mut self, tracker: BackgroundTracker) -> Self {
        self.background = Some(tracker);
        self
    }

    /// Finish. Reads the deps header to seed the deduper.
    pub fn build(self, config: &SchedulerConfig) -> Arc<Scope> {
        let mut headers: HashMap<String, String> = HashMap::new();
        for (name, value) in self.headers {
            let _ = headers
                .entry(name.to_ascii_lowercase())
                .and_modify(|existing| {
                    existing.push(',');
                    existing.push_str(&value);
                })
                .or_insert(value);
        }

        let client_loaded = headers
            .get(&config.deps_header.to_ascii_lowercase())
            .map(|value| from_header(value, config.segment_encoding).1)
            .unwrap_or_default();
        let deduper = Deduper::with_client_loaded(
            client_loaded.iter().map(|segment| segment.as_str().to_string()),
        );

        Arc::new(Scope {
            token: self.token.unwrap_or_default(),
            abort: CancellationToken::new(),
            method: self.method.unwrap_or_else(|| "GET".to_string()),
            transport: self.transport,
            call: self.call,
            instance_id: self.instance_id,
            headers,
            encoding: config.segment_encoding,
            deduper,
            memo: RouteMemo::new(),
            vary: VarySet::default(),
            served: Mutex::new(HashMap::new()),
            live: Mutex::new(HashMap::new()),
            response: Mutex::new(ResponseState::default()),
            input: self.input.map(tokio::sync::Mutex::new),
            output: self.output,
            background: self.background.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn scope() -> Arc<Scope> {
        Scope::builder().build(&SchedulerConfig::default())
    }

    #[test]
    fn headers_are_case_insensitive_and_joined() {
        let scope = Scope::builder()
            .header("X-Wok-Route", "a,b")
            .header("x-wok-route", "c")
            .build(&SchedulerConfig::default());
        assert_eq!(scope.header("X-WOK-ROUTE"), Some("a,b,c"));
    }

    #[test]
    fn remembered_falls_back_to_request_header() {
        let scope = Scope::builder()
            .header("X-Wok-Route", "a,b?id=1")
            .build(&SchedulerConfig::default());
        let (params, route) = scope.remembered("X-Wok-Route");
        assert_eq!(route.to_string(), "a,b");
        assert_eq!(params.first("id"), Some("1"));
    }

    #[tokio::test]
    async fn remembered_prefers_memo() {
        let scope = Scope::builder()
            .header("X-Wok-Route", "a,b")
            .build(&SchedulerConfig::default());
        let _ = scope.memo().remember("X-Wok-Route", "a,c".into(), scope.token());
        assert_eq!(scope.remembered("X-Wok-Route").1.to_string(), "a,c");
    }

    #[tokio::test]
    async fn record_served_replaces_previous_entry() {
        let scope = scope();
        for n in 0..1000 {
            scope.record_served("X-Wok-Route", format!("a?q={n}"));
        }
        scope.record_served("x-wok-route", "b".into());
        scope.record_served("X-Side", "s".into());

        let entries = scope.memo().entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(scope.memo().latest("X-Wok-Route").as_deref(), Some("b"));
        assert_eq!(scope.vary_headers(), vec!["X-Wok-Route", "X-Side"]);
    }

    #[test]
    fn missing_header_is_empty() {
        let (params, route) = scope().remembered("X-Wok-Route");
        assert!(params.is_empty());
        assert!(route.is_empty());
    }

    #[tokio::test]
    async fn deps_header_seeds_deduper() {
        let scope = Scope::builder()
            .header("X-Wok-Deps", "css,js")
            .build(&SchedulerConfig::default());
        scope.deduper().load("css", scope.token());
        scope.deduper().load("img", scope.token());
        assert_eq!(scope.deduper().snapshot(), ["img"]);
    }

    #[test]
    fn first_response_override_wins() {
        let scope = scope();
        assert!(scope.handle_response(ResponseOverride::new(204)));
        assert!(!scope.handle_response(ResponseOverride::new(500)));
        assert!(scope.is_aborted());
        assert_eq!(scope.response_override().unwrap().status, 204);
    }

    #[test]
    fn status_defaults_to_ok() {
        let scope = scope();
        assert_eq!(scope.status_code(), 200);
        scope.set_status_code(404);
        assert_eq!(scope.status_code(), 404);
    }

    #[tokio::test]
    async fn context_vary_is_scoped() {
        let scope = scope();
        let ctx = CancellationToken::new();
        scope.vary(["Accept"]);
        scope.context_vary(["X-Wok-Route"], &ctx);
        assert_eq!(scope.vary_headers(), ["Accept", "X-Wok-Route"]);
        ctx.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(scope.vary_headers(), ["Accept"]);
    }

    #[tokio::test]
    async fn send_without_stream_is_closed() {
        let scope = scope();
        let err = scope.send(Output::Nil, scope.token()).await.unwrap_err();
        assert_matches!(err, WokError::ChannelClosed);
    }

    #[tokio::test]
    async fn send_after_context_end_is_closed() {
        let (tx, _rx) = mpsc::channel(1);
        let scope = Scope::builder().output(tx).build(&SchedulerConfig::default());
        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = scope.send(Output::Nil, &ctx).await.unwrap_err();
        assert_matches!(err, WokError::ChannelClosed);
    }

    #[tokio::test]
    async fn blocked_send_returns_when_context_ends() {
        let (tx, _rx) = mpsc::channel(1);
        let scope = Scope::builder().output(tx).build(&SchedulerConfig::default());
        let ctx = CancellationToken::new();
        scope.send(Output::Nil, &ctx).await.unwrap();

        let cancel = ctx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        let err = scope.send(Output::Nil, &ctx).await.unwrap_err();
        assert_matches!(err, WokError::ChannelClosed);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn recv_reads_updates_then_ends() {
        let (tx, rx) = mpsc::channel(4);
        let scope = Scope::builder().input(rx).build(&SchedulerConfig::default());
        tx.send(Params::new().with("q", ["1"])).await.unwrap();
        drop(tx);
        let ctx = CancellationToken::new();
        assert_eq!(scope.recv(&ctx).await.unwrap().first("q"), Some("1"));
        assert!(scope.recv(&ctx).await.is_none());
    }
}
