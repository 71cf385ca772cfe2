//! The controller-diff loop.
//!
//! One [`Scheduler::handle`] call diffs what the client last received
//! against what it asked for, runs the plans that changed and folds their
//! outputs together. Plans may redirect mid-flight; each redirect starts a
//! new iteration, up to `max_redirections + 1` iterations in total.
//!
//! Instances below the scope floor survive an iteration untouched unless
//! their declared params changed. Everything at or above the floor is
//! cancelled and re-collected from the tree.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use metrics::counter;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use wok_core::{Output, Params, Route, WokError, divergence, params_changed, to_header};

use crate::aggregate::aggregate;
use crate::background::Drain;
use crate::config::SchedulerConfig;
use crate::context::PlanContext;
use crate::gate::{Gate, RedirectRequest};
use crate::plan::{ConcurrencyClass, Payload, PlanDescriptor, PlanFn, PlanNode, walk};
use crate::scope::{LiveInstance, Scope};

/// How a `handle` call ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleStatus {
    /// Converged after `iterations` passes.
    Resolved {
        /// Passes taken, redirects included.
        iterations: usize,
    },
    /// A plan took over the response.
    Aborted,
    /// Plans kept redirecting past the budget.
    BudgetExceeded,
}

/// Result of one `handle` call.
#[derive(Debug)]
pub struct Handled {
    /// Aggregated output. `Nil` unless resolved.
    pub output: Output,
    /// How the call ended.
    pub status: HandleStatus,
    /// Waits for side effects spawned by this call and its siblings.
    pub drain: Drain,
}

impl Handled {
    /// Whether the call converged.
    pub fn is_resolved(&self) -> bool {
        matches!(self.status, HandleStatus::Resolved { .. })
    }
}

/// Activation of one descriptor at one tree position.
struct Instance {
    plan: PlanDescriptor,
    depth: usize,
    index: usize,
    token: Option<CancellationToken>,
    snapshot: Params,
    output: Arc<Mutex<Output>>,
}

impl Instance {
    fn new(plan: PlanDescriptor, depth: usize, index: usize) -> Self {
        Self {
            plan,
            depth,
            index,
            token: None,
            snapshot: Params::new(),
            output: Arc::new(Mutex::new(Output::Nil)),
        }
    }

    fn retire(&self) {
        if let Some(token) = &self.token {
            token.cancel();
        }
    }

    fn live(&self) -> Option<LiveInstance> {
        self.token.clone().map(|token| LiveInstance {
            depth: self.depth,
            dependencies: self.plan.dependencies().to_vec(),
            always_run: self.plan.is_always_run(),
            token,
        })
    }

    /// Declared params still equal what this instance saw.
    fn unchanged(&self, params: &Params) -> bool {
        !params_changed(&self.snapshot, params, self.plan.dependencies())
    }
}

/// Target of the current call, moved by redirects.
struct Pass {
    old_params: Params,
    old_route: Route,
    params: Params,
    route: Route,
    redirection_offset: usize,
    redirect_handled: bool,
}

impl Pass {
    /// Adopt a posted redirect. Only the first one per iteration counts.
    fn absorb(&mut self, request: Option<RedirectRequest>) {
        let Some(request) = request else {
            return;
        };
        if self.redirect_handled {
            return;
        }
        self.redirect_handled = true;
        if let Some(params) = request.params {
            self.params = params;
        }
        if let Some(route) = request.route {
            self.redirection_offset = divergence(&self.route, &route);
            self.route = route;
        }
        debug!(
            route = %self.route,
            redirection_offset = self.redirection_offset,
            "redirect absorbed"
        );
    }

    /// Cancel instances left by an earlier call that the current target
    /// replaces.
    fn supersede(&self, previous: &mut Vec<LiveInstance>) {
        let offset = divergence(&self.old_route, &self.route);
        previous.retain(|live| {
            let stale = live.always_run
                || live.depth >= offset
                || params_changed(&self.old_params, &self.params, &live.dependencies);
            if stale {
                live.token.cancel();
            }
            !stale
        });
    }

    /// Queued work at `depth` was invalidated by a redirect.
    fn obsolete(&self, depth: usize) -> bool {
        self.redirect_handled && depth >= self.redirection_offset
    }
}

enum Outcome {
    Resolved {
        iterations: usize,
        instances: Vec<Instance>,
    },
    Aborted,
    BudgetExceeded,
}

enum Admission {
    Ready,
    Obsolete,
    Aborted,
}

/// Runs plan trees against a scope.
#[derive(Clone, Debug, Default)]
pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    /// Scheduler with the given configuration.
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Active configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Bring the client from the state remembered under `header` to
    /// `route` with `params`.
    #[instrument(skip_all, fields(header = %header, route = %route))]
    pub async fn handle(
        &self,
        scope: &Arc<Scope>,
        root: &Arc<dyn PlanNode>,
        header: &str,
        params: Params,
        route: Route,
    ) -> Handled {
        counter!("wok_handle_total").increment(1);
        let drain = Drain::new(scope.background().clone());
        let (old_params, old_route) = scope.remembered(header);
        let mut pass = Pass {
            old_params,
            old_route,
            params,
            route,
            redirection_offset: 0,
            redirect_handled: false,
        };

        let mut previous = scope.take_live(header);
        pass.supersede(&mut previous);

        match self.converge(scope, root, &mut pass).await {
            Outcome::Resolved {
                iterations,
                instances,
            } => {
                pass.supersede(&mut previous);
                let output = aggregate(
                    instances
                        .iter()
                        .map(|instance| (instance.plan.payload(), instance.output.lock().clone())),
                    scope.deduper(),
                );
                scope.record_served(header, to_header(&pass.params, &pass.route));

                previous.extend(instances.iter().filter_map(Instance::live));
                scope.put_live(header, previous);
                info!(
                    iterations,
                    instances = instances.len(),
                    route = %pass.route,
                    "resolved"
                );
                Handled {
                    output,
                    status: HandleStatus::Resolved { iterations },
                    drain,
                }
            }
            Outcome::Aborted => {
                scope.put_live(header, previous);
                Handled {
                    output: Output::Nil,
                    status: HandleStatus::Aborted,
                    drain,
                }
            }
            Outcome::BudgetExceeded => {
                scope.put_live(header, previous);
                Handled {
                    output: Output::Nil,
                    status: HandleStatus::BudgetExceeded,
                    drain,
                }
            }
        }
    }

    /// Iterate until no redirect is posted, a plan aborts, or the budget
    /// runs out.
    async fn converge(
        &self,
        scope: &Arc<Scope>,
        root: &Arc<dyn PlanNode>,
        pass: &mut Pass,
    ) -> Outcome {
        let gate = Arc::new(Gate::new());
        let mut instances: Vec<Instance> = Vec::new();
        let iterations = self.config.max_redirections.saturating_add(1);

        for iteration in 1..=iterations {
            let epoch = gate.begin_iteration();
            pass.redirect_handled = false;

            // ── Reconcile ──

            let offset = divergence(&pass.old_route, &pass.route);
            let floor = offset.min(pass.redirection_offset);
            debug!(iteration, offset, floor, route = %pass.route, "reconciling");

            let mut current = Vec::with_capacity(instances.len());
            let mut queue = Vec::new();
            for instance in instances.drain(..) {
                if instance.depth >= floor {
                    instance.retire();
                    continue;
                }
                if instance.unchanged(&pass.params) {
                    current.push(instance);
                    continue;
                }
                instance.retire();
                if instance.plan.is_always_run()
                    || params_changed(&pass.old_params, &pass.params, instance.plan.dependencies())
                {
                    queue.push(Instance::new(instance.plan, instance.depth, instance.index));
                }
            }

            for (depth, node) in walk(root, &pass.route).into_iter().enumerate().skip(floor) {
                let Some(node) = node else {
                    break;
                };
                for (index, plan) in node.plans().iter().enumerate() {
                    if !plan.applies_to(scope.method(), scope.transport(), scope.call()) {
                        continue;
                    }
                    if plan.is_always_run()
                        || depth >= offset
                        || params_changed(&pass.old_params, &pass.params, plan.dependencies())
                    {
                        queue.push(Instance::new(plan.clone(), depth, index));
                    }
                }
            }

            // ── Dispatch ──

            for mut instance in queue {
                if pass.obsolete(instance.depth) {
                    debug!(depth = instance.depth, "skipping plan made obsolete by redirect");
                    continue;
                }

                let exclusive = instance.plan.class() == ConcurrencyClass::Exclusive
                    && matches!(instance.plan.payload(), Payload::Run(_));
                if exclusive {
                    match admit_exclusive(&gate, scope, pass, instance.depth).await {
                        Admission::Ready => {}
                        Admission::Obsolete => continue,
                        Admission::Aborted => return aborted(&current),
                    }
                }

                instance.snapshot = instance.plan.snapshot(&pass.params);
                let inline = dispatch(&mut instance, scope, &gate, epoch, pass);
                current.push(instance);

                if let Some((body, ctx, slot)) = inline {
                    let output = run_isolated(body, ctx).await;
                    *slot.lock() = output;
                    if scope.is_aborted() {
                        return aborted(&current);
                    }
                    pass.absorb(gate.view().redirect);
                }
            }

            // ── Await ──

            loop {
                let view = gate.view();
                if scope.is_aborted() {
                    return aborted(&current);
                }
                if view.redirect.is_some() || view.running == 0 {
                    break;
                }
                gate.wait_past(view.generation, scope.abort_token()).await;
            }
            if scope.is_aborted() {
                return aborted(&current);
            }

            current.sort_by_key(|instance| (instance.depth, instance.index));
            instances = current;

            let posted = gate.view().redirect;
            if posted.is_none() {
                return Outcome::Resolved {
                    iterations: iteration,
                    instances,
                };
            }
            pass.absorb(posted);
            counter!("wok_redirects_total").increment(1);
            info!(iteration, route = %pass.route, "redirected");
        }

        let err = WokError::RedirectBudgetExceeded(iterations);
        warn!(error = %err, category = err.category(), "giving up on redirect loop");
        counter!("wok_redirect_budget_exceeded_total").increment(1);
        for instance in &instances {
            instance.retire();
        }
        Outcome::BudgetExceeded
    }
}

/// Start one instance. Inline bodies are handed back for the caller
/// to await; everything else is spawned or resolved here.
fn dispatch(
    instance: &mut Instance,
    scope: &Arc<Scope>,
    gate: &Arc<Gate>,
    epoch: u64,
    pass: &Pass,
) -> Option<(PlanFn, PlanContext, Arc<Mutex<Output>>)> {
    let context = |gate: Arc<Gate>, epoch: u64, token: CancellationToken| {
        PlanContext::new(
            Arc::clone(scope),
            gate,
            epoch,
            token,
            pass.route.clone(),
            instance.depth,
            instance.snapshot.clone(),
            pass.params.clone(),
            instance.plan.snapshot(&pass.old_params),
        )
    };

    match instance.plan.payload().clone() {
        Payload::Static(output) => {
            *instance.output.lock() = output;
            None
        }
        Payload::Deps(_) => None,
        Payload::SideEffect(body) => {
            let token = scope.token().child_token();
            // Redirects from side effects land on a gate nobody reads.
            let ctx = context(Arc::new(Gate::new()), 0, token.clone());
            instance.token = Some(token);
            debug!(depth = instance.depth, "spawning side effect");
            scope.background().spawn(async move {
                let _ = run_isolated(body, ctx).await;
            });
            None
        }
        Payload::Run(body) => {
            let token = scope.token().child_token();
            let ctx = context(Arc::clone(gate), epoch, token.clone());
            instance.token = Some(token);
            counter!("wok_plan_runs_total").increment(1);
            debug!(depth = instance.depth, class = ?instance.plan.class(), "running plan");

            match instance.plan.class() {
                ConcurrencyClass::Async => {
                    let guard = gate.start();
                    let slot = Arc::clone(&instance.output);
                    drop(tokio::spawn(async move {
                        let _guard = guard;
                        let output = run_isolated(body, ctx).await;
                        *slot.lock() = output;
                    }));
                    None
                }
                ConcurrencyClass::Sync | ConcurrencyClass::Exclusive => {
                    Some((body, ctx, Arc::clone(&instance.output)))
                }
            }
        }
    }
}

/// Wait until nothing async is in flight, watching for redirects and aborts.
async fn admit_exclusive(
    gate: &Gate,
    scope: &Scope,
    pass: &mut Pass,
    depth: usize,
) -> Admission {
    loop {
        let view = gate.view();
        if scope.is_aborted() {
            return Admission::Aborted;
        }
        pass.absorb(view.redirect);
        if pass.obsolete(depth) {
            debug!(depth, "exclusive plan made obsolete while waiting");
            return Admission::Obsolete;
        }
        if view.running == 0 {
            return Admission::Ready;
        }
        gate.wait_past(view.generation, scope.abort_token()).await;
    }
}

fn aborted(instances: &[Instance]) -> Outcome {
    info!(instances = instances.len(), "plan took over the response");
    for instance in instances {
        instance.retire();
    }
    Outcome::Aborted
}

/// Run a plan body, turning a panic into a logged fault and `Nil`.
async fn run_isolated(body: PlanFn, ctx: PlanContext) -> Output {
    let depth = ctx.depth();
    match AssertUnwindSafe(async move { body(ctx).await })
        .catch_unwind()
        .await
    {
        Ok(output) => output,
        Err(panic) => {
            let err = WokError::PlanFault(panic_message(panic.as_ref()));
            warn!(depth, error = %err, category = err.category(), "plan faulted");
            counter!("wok_plan_faults_total").increment(1);
            Output::Nil
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
