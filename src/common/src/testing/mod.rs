//! Test utilities for Telequery.
//!
//! This module provides reusable helpers for creating test configurations
//! and building result series without spelling out every struct literal.
//!
//! # Feature Flag
//!
//! This module is only available when the `testing` feature is enabled or during tests:
//!
//! ```toml
//! [dev-dependencies]
//! common = { path = "../common", features = ["testing"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use common::testing::{TestConfigBuilder, series};
//!
//! let config = TestConfigBuilder::new().without_cache().build();
//! let redis = series(&[("service", "redis")], &[(1000, 1.0), (2000, 2.0)]);
//! ```

mod config_builder;
mod fixtures;

pub use config_builder::TestConfigBuilder;
pub use fixtures::{series, time_series_data, time_series_result, values};
