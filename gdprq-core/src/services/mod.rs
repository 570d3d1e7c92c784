//! Process-wide services

pub mod logging;
