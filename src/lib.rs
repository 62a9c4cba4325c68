pub mod api;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod shutdown;
pub mod supervisor;
pub mod worker;

pub use supervisor::{Pool, ShutdownReport};
