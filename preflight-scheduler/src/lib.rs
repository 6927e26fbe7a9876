//! Job queue, executor, and scheduler loop (C5/C6/§4.7).

pub mod executor;
pub mod loop_;
pub mod queue;

pub use executor::JobExecutor;
pub use loop_::{run, wall_clock_now};
pub use queue::{JobId, JobQueue, UpdateJob};
