//! Notification delivery loop: batching and formatting, rate-limited sending,
//! and the per-tenant scheduler driving it all.

pub mod format;
pub mod http;
pub mod messenger;
pub mod scheduler;
pub mod sender;
