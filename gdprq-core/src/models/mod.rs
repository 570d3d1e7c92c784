//! Data models for gdprq

pub mod action;
pub mod configuration;

pub use action::*;
pub use configuration::*;
