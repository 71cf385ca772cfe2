//! # wok-core
//!
//! Foundation types shared by every wok crate.
//!
//! - **Routes**: [`Segment`] and [`Route`], plus [`divergence`] between two routes
//! - **Params**: multi-valued [`Params`] with standard query encoding and [`params_changed`]
//! - **Header codec**: [`to_header`] / [`from_header`] for the route memo and deps headers
//! - **Output**: [`Output`], the JSON-encodable result of a plan
//! - **Errors**: [`WokError`] taxonomy via `thiserror`
//! - **Logging**: [`logging::init_subscriber`]

#![deny(unsafe_code)]

pub mod errors;
pub mod header;
pub mod logging;
pub mod output;
pub mod params;
pub mod route;

pub use errors::{Result, WokError};
pub use header::{SegmentEncoding, from_header, to_header};
pub use output::Output;
pub use params::{Params, params_changed};
pub use route::{Route, Segment, divergence};
