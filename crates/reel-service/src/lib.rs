//! Job service façade for ReelBeat.
//!
//! The HTTP surface calls exactly three operations: `create`, `get`,
//! and `cancel`. Everything else (stage execution, retries,
//! retention) happens behind the queue.

pub mod error;
pub mod service;

pub use error::{ServiceError, ServiceResult};
pub use service::{JobService, JobView, ServiceConfig};
