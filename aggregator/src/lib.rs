//! # Snapshot Aggregation
//!
//! Turns a collector fan-out result into one immutable, fully-populated
//! [`MetricSnapshot`]: a global document plus one child per tenant.
//!
//! Aggregation is pure arithmetic over the collected values; the only
//! time-dependent field of a snapshot is `created_at`, which the caller sets
//! once at persistence time. Identical collector input (and identical
//! previous-snapshot input) therefore yields byte-identical serialized
//! output.

pub mod aggregate;
pub mod arithmetic;
pub mod snapshot;

pub use aggregate::{
    aggregate_family,
    AggregateError,
};
pub use snapshot::{
    keys,
    MetricSnapshot,
    Scope,
    TenantSnapshot,
};
