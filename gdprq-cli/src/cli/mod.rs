//! CLI command handling

pub mod queue_handlers;
pub mod session;
