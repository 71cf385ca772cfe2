//! # wok-runtime
//!
//! Controller-diff scheduler. Given what a client last received and what it
//! now asks for, decides which plans to cancel, keep or run, runs them under
//! the concurrency rules, follows redirects and folds the results.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `plan` | Plan descriptors, the `PlanNode` tree contract, `StaticNode` |
//! | `scheduler` | `Scheduler::handle`, the iteration loop |
//! | `gate` | Running count and redirect slot shared per call |
//! | `context` | `PlanContext` handed to plan bodies |
//! | `scope` | Per-request state shared with the transport |
//! | `dedupe` | Refcounted dependency keys |
//! | `memo` | Route memo entries per header |
//! | `background` | Side-effect tracking and `Drain` |
//! | `aggregate` | Output folding |
//! | `config` | `SchedulerConfig` |

#![deny(unsafe_code)]

pub mod aggregate;
pub mod background;
pub mod config;
pub mod context;
pub mod dedupe;
pub mod gate;
pub mod memo;
pub mod plan;
pub mod scheduler;
pub mod scope;

pub use background::{BackgroundTracker, Drain};
pub use config::SchedulerConfig;
pub use context::PlanContext;
pub use dedupe::Deduper;
pub use gate::{Gate, RedirectRequest};
pub use memo::{MemoEntry, RouteMemo};
pub use plan::{
    ConcurrencyClass, PlanDescriptor, PlanNode, StaticNode, TransportClass,
};
pub use scheduler::{HandleStatus, Handled, Scheduler};
pub use scope::{ResponseOverride, Scope, ScopeBuilder};
