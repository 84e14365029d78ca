//! Background job processing.

pub mod history;
pub mod pool;

pub use pool::WorkerPool;
