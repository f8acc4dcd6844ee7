//! # Upstream Metrics Collector
//!
//! Fetches the raw counts a rollup run needs from the sibling platform
//! services, treating each of them as an opaque HTTP black box.
//!
//! ## Architecture
//!
//! - **`family`**: Metric family enum, aggregation window, tenant id
//! - **`sources`**: The per-family source tables (which endpoint, which shape)
//! - **`auth`**: Service-token minting; one token per run, reused across the fan-out
//! - **`client`**: The HTTP fetcher with per-call timeout and envelope parsing
//! - **`tenants`**: School directory lookup for per-tenant scoping
//! - **`collect`**: The fan-out itself; per-source failures are captured, never thrown
//!
//! All source calls for one family are issued concurrently and joined once
//! all of them settle. A timed-out or erroring source lands in the output's
//! `failures` map; its siblings are unaffected.

pub mod auth;
pub mod client;
pub mod collect;
pub mod family;
pub mod sources;
pub mod tenants;

pub use auth::{
    AccessToken,
    HttpTokenProvider,
    TokenProvider,
};
pub use client::{
    HttpSourceFetcher,
    SourceFetch,
};
pub use collect::{
    Collector,
    CollectorOutput,
    FamilyCollection,
};
pub use family::{
    MetricFamily,
    TenantId,
    Window,
};
pub use sources::{
    RawValue,
    SeriesPoint,
    SourceFailure,
    SourceKey,
    SourceKind,
    SourceSpec,
};
pub use tenants::{
    HttpTenantDirectory,
    TenantDirectory,
};
