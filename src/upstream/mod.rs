pub mod consumer;

pub use consumer::{run_consumer, Liveness};
