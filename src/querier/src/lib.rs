//! Query compilation and result composition.
//!
//! `query` turns filter expressions into SQL over the resource tables,
//! `postprocess` shapes executed results and `cache` keeps them around in
//! time buckets.

pub mod cache;
pub mod postprocess;
pub mod query;

pub use cache::{BucketCache, Cache, InMemoryCache};
pub use postprocess::PostProcessor;
pub use query::resource_filter::ResourceFilterStatementBuilder;
