//! Shared utilities for the crawl control plane.
//!
//! - **HTTP**: HTTP client factory with connection pooling

#![warn(clippy::all)]

pub mod http;

pub use http::{HttpClientFactory, HttpConfig};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let _ = HttpConfig::default();
    }
}
