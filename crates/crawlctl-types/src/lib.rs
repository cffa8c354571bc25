//! Shared data model for the crawl control plane.
//!
//! This crate holds the types that cross component boundaries —
//! `BrowserSpec`/fingerprinting, pool read-models, job records, and the
//! core error taxonomy — so that `crawlctl-pool`, `crawlctl-monitoring`,
//! `crawlctl-workers` and `crawlctl-api` can agree on shapes without a
//! dependency cycle back through the API crate.

pub mod errors;
pub mod model;

pub use errors::{CoreError, CoreResult};
pub use model::*;
