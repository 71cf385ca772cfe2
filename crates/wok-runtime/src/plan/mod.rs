//! Plan descriptors and the plan tree contract.

pub mod descriptor;
pub mod tree;

pub use descriptor::{
    Applicability, ConcurrencyClass, DepsFn, Payload, PlanDescriptor, PlanFn, PlanFuture,
    TransportClass,
};
pub use tree::{PlanNode, StaticNode, walk};
