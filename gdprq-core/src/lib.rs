//! # gdprq core library
//!
//! Resumable action queues and the GDPR authorization-code workflows built
//! on them.
//!
//! A queue is an ordered list of actions run one at a time. The runner
//! persists the queue after every transition, so a workflow that has to send
//! the browser to an authorization server picks up where it left off on the
//! next page load.

pub mod gdpr;
pub mod models;
pub mod queue;
pub mod services;
