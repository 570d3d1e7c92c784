//! GDPR download and deletion workflows built on action queues

pub mod actions;
pub mod api;
pub mod auth_code;
pub mod queues;

pub use api::{AuthorizationCodes, GraphqlClient, ProfileApi, ServiceConnection};
pub use auth_code::{AuthCodeCallback, AuthCodeError, AuthCodeFlow};
pub use queues::{
    build_queue, drive_queue, start_page_url, GdprContext, QueueName, UnknownQueueName,
};
