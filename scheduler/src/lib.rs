//! # Rollup Scheduling
//!
//! Drives periodic and on-demand rollup runs and owns every write to the
//! snapshot and job stores.
//!
//! ## Architecture
//!
//! - **`job`**: The rollup job record and its monotonic status machine
//! - **`store`**: Snapshot/job store traits plus the in-memory implementation
//! - **`scheduler`**: The owned scheduler object: cron cadence, manual
//!   triggers, the per-run orchestration (collect → aggregate → persist),
//!   and the read lookups dashboards consume
//!
//! One scheduler is constructed at process start from configuration; there
//! is no ambient global registration.

pub mod job;
pub mod scheduler;
pub mod store;

pub use job::{
    ErrorKind,
    JobError,
    JobId,
    JobStatus,
    JobType,
    RollupJob,
    Trigger,
};
pub use scheduler::{
    RollupScheduler,
    TriggerError,
};
pub use store::{
    JobStore,
    MemoryJobStore,
    MemorySnapshotStore,
    SnapshotStore,
    StoreError,
};
