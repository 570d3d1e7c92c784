//! Resumable action queues

pub mod action;
pub mod controller;
pub mod error;
pub mod executor;
pub mod runner;
pub mod storage;
pub mod validation;

pub use action::*;
pub use controller::*;
pub use error::*;
pub use executor::*;
pub use runner::*;
pub use storage::*;
pub use validation::*;
