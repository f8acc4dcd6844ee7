//! HTTP surface of the rollup service: the manual trigger endpoint, job
//! status lookups, and snapshot reads for dashboard consumers.

mod error;
mod router;

pub use error::AppError;
pub use router::{
    create_router,
    AppState,
};
