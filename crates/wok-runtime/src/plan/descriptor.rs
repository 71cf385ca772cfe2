//! Immutable plan descriptors.
//!
//! A descriptor is built eagerly through value-consuming builder methods:
//!
//! ```ignore
//! let plan = PlanDescriptor::run(|ctx| async move { load_item(ctx).await })
//!     .with_params(["id"])
//!     .exclusive();
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use wok_core::{Output, Params};

use crate::context::PlanContext;

/// Boxed future returned by a plan body.
pub type PlanFuture = Pin<Box<dyn Future<Output = Output> + Send>>;

/// Plan body.
pub type PlanFn = Arc<dyn Fn(PlanContext) -> PlanFuture + Send + Sync>;

/// Callback invoked once per loaded dependency key during aggregation.
pub type DepsFn = Arc<dyn Fn(&str) -> Output + Send + Sync>;

/// What a plan does when dispatched.
#[derive(Clone)]
pub enum Payload {
    /// Run a body and keep its output.
    Run(PlanFn),
    /// Contribute a fixed output without running anything.
    Static(Output),
    /// Run a body in the background. Its output is discarded.
    SideEffect(PlanFn),
    /// Render each currently loaded dependency key at aggregation time.
    Deps(DepsFn),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run(_) => f.write_str("Run"),
            Self::Static(output) => f.debug_tuple("Static").field(output).finish(),
            Self::SideEffect(_) => f.write_str("SideEffect"),
            Self::Deps(_) => f.write_str("Deps"),
        }
    }
}

/// How a plan body is scheduled relative to its siblings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConcurrencyClass {
    /// Runs inline; dispatch resumes when it returns.
    Sync,
    /// Runs concurrently with other async plans.
    #[default]
    Async,
    /// Waits until nothing else is running, then runs inline.
    Exclusive,
}

/// How the current request reached the scheduler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TransportClass {
    /// Full page navigation.
    #[default]
    Navigation,
    /// Client-driven partial request carrying a route memo.
    Ajax,
    /// Invocation multiplexed on a persistent channel.
    Socket,
}

/// Filters deciding whether a descriptor applies to a request.
///
/// Empty filters match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Applicability {
    methods: Vec<String>,
    transports: Vec<TransportClass>,
    call: Option<String>,
}

impl Applicability {
    /// Whether a request with these properties is covered.
    pub fn matches(&self, method: &str, transport: TransportClass, call: Option<&str>) -> bool {
        let method_ok = self.methods.is_empty()
            || self.methods.iter().any(|m| m.eq_ignore_ascii_case(method));
        let transport_ok = self.transports.is_empty() || self.transports.contains(&transport);
        let call_ok = self.call.as_deref().is_none_or(|name| Some(name) == call);
        method_ok && transport_ok && call_ok
    }
}

/// Unit of work bound to a plan tree position.
#[derive(Clone, Debug)]
pub struct PlanDescriptor {
    payload: Payload,
    class: ConcurrencyClass,
    always_run: bool,
    dependencies: Vec<String>,
    applies: Applicability,
}

impl PlanDescriptor {
    fn with_payload(payload: Payload) -> Self {
        Self {
            payload,
            class: ConcurrencyClass::default(),
            always_run: false,
            dependencies: Vec::new(),
            applies: Applicability::default(),
        }
    }

    /// Async plan running `body`.
    pub fn run<F, Fut>(body: F) -> Self
    where
        F: Fn(PlanContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Output> + Send + 'static,
    {
        Self::with_payload(Payload::Run(Arc::new(move |ctx| Box::pin(body(ctx)))))
    }

    /// Plan contributing a fixed output.
    pub fn action(output: Output) -> Self {
        Self::with_payload(Payload::Static(output))
    }

    /// Fire-and-forget plan tracked for draining.
    pub fn side_effect<F, Fut>(body: F) -> Self
    where
        F: Fn(PlanContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::with_payload(Payload::SideEffect(Arc::new(move |ctx| {
            let fut = body(ctx);
            Box::pin(async move {
                fut.await;
                Output::Nil
            })
        })))
    }

    /// Plan rendering loaded dependency keys.
    pub fn deps<F>(render: F) -> Self
    where
        F: Fn(&str) -> Output + Send + Sync + 'static,
    {
        Self::with_payload(Payload::Deps(Arc::new(render)))
    }

    /// Run inline.
    #[must_use]
    pub fn sync(mut self) -> Self {
        self.class = ConcurrencyClass::Sync;
        self
    }

    /// Run concurrently.
    #[must_use]
    pub fn parallel(mut self) -> Self {
        self.class = ConcurrencyClass::Async;
        self
    }

    /// Run alone.
    #[must_use]
    pub fn exclusive(mut self) -> Self {
        self.class = ConcurrencyClass::Exclusive;
        self
    }

    /// Run on every call regardless of previous state.
    #[must_use]
    pub fn always(mut self) -> Self {
        self.always_run = true;
        self
    }

    /// Run only when the route or declared params require it.
    #[must_use]
    pub fn when_needed(mut self) -> Self {
        self.always_run = false;
        self
    }

    /// Declare the params this plan reads.
    #[must_use]
    pub fn with_params<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to HTTP methods.
    #[must_use]
    pub fn methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.applies.methods = methods.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to transports.
    #[must_use]
    pub fn on<I: IntoIterator<Item = TransportClass>>(mut self, transports: I) -> Self {
        self.applies.transports = transports.into_iter().collect();
        self
    }

    /// Only on full page navigations.
    #[must_use]
    pub fn navigation(self) -> Self {
        self.on([TransportClass::Navigation])
    }

    /// Only on partial requests and channel invocations.
    #[must_use]
    pub fn ajax(self) -> Self {
        self.on([TransportClass::Ajax, TransportClass::Socket])
    }

    /// Only when the request names this call.
    #[must_use]
    pub fn call(mut self, name: impl Into<String>) -> Self {
        self.applies.call = Some(name.into());
        self
    }

    /// What this plan does.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Scheduling class.
    pub fn class(&self) -> ConcurrencyClass {
        self.class
    }

    /// Whether the plan reruns on every call.
    pub fn is_always_run(&self) -> bool {
        self.always_run
    }

    /// Declared param keys. Empty means the plan sees every param.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Applicability filters.
    pub fn applicability(&self) -> &Applicability {
        &self.applies
    }

    /// Whether the plan applies to a request.
    pub fn applies_to(&self, method: &str, transport: TransportClass, call: Option<&str>) -> bool {
        self.applies.matches(method, transport, call)
    }

    /// Params handed to the plan body: declared keys only, or all of them.
    pub fn snapshot(&self, params: &Params) -> Params {
        params.filtered(&self.dependencies)
    }

    /// Whether a body has to be invoked for this plan.
    pub(crate) fn is_executable(&self) -> bool {
        matches!(self.payload, Payload::Run(_) | Payload::SideEffect(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_defaults_to_async_when_needed() {
        let plan = PlanDescriptor::run(|_| async { Output::Nil });
        assert_eq!(plan.class(), ConcurrencyClass::Async);
        assert!(!plan.is_always_run());
        assert!(plan.dependencies().is_empty());
    }

    #[test]
    fn builder_is_eager() {
        let plan = PlanDescriptor::run(|_| async { Output::Nil })
            .with_params(["id", "tab"])
            .exclusive()
            .always();
        assert_eq!(plan.class(), ConcurrencyClass::Exclusive);
        assert!(plan.is_always_run());
        assert_eq!(plan.dependencies(), ["id", "tab"]);
        assert!(!plan.when_needed().is_always_run());
    }

    #[test]
    fn snapshot_limits_to_dependencies() {
        let params = Params::new().with("id", ["1"]).with("page", ["2"]);
        let plan = PlanDescriptor::action(Output::Nil).with_params(["id"]);
        let snap = plan.snapshot(&params);
        assert!(snap.contains("id"));
        assert!(!snap.contains("page"));
        assert_eq!(PlanDescriptor::action(Output::Nil).snapshot(&params), params);
    }

    #[test]
    fn applicability_filters() {
        let plan = PlanDescriptor::action(Output::Value(json!(1)))
            .methods(["POST"])
            .navigation();
        assert!(plan.applies_to("post", TransportClass::Navigation, None));
        assert!(!plan.applies_to("GET", TransportClass::Navigation, None));
        assert!(!plan.applies_to("POST", TransportClass::Ajax, None));
    }

    #[test]
    fn call_filter() {
        let plan = PlanDescriptor::action(Output::Nil).call("save");
        assert!(plan.applies_to("GET", TransportClass::Socket, Some("save")));
        assert!(!plan.applies_to("GET", TransportClass::Socket, Some("load")));
        assert!(!plan.applies_to("GET", TransportClass::Socket, None));
    }

    #[test]
    fn ajax_covers_socket() {
        let plan = PlanDescriptor::action(Output::Nil).ajax();
        assert!(plan.applies_to("GET", TransportClass::Socket, None));
        assert!(!plan.applies_to("GET", TransportClass::Navigation, None));
    }

    #[test]
    fn executable_payloads() {
        assert!(PlanDescriptor::run(|_| async { Output::Nil }).is_executable());
        assert!(PlanDescriptor::side_effect(|_| async {}).is_executable());
        assert!(!PlanDescriptor::action(Output::Nil).is_executable());
        assert!(!PlanDescriptor::deps(|_| Output::Nil).is_executable());
    }
}
