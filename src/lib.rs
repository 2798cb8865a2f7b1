//! Watches a Derpibooru-style site for unread notifications and messages,
//! keeps a toolbar badge current and raises desktop notifications.

pub mod app;
pub mod badge;
pub mod consts;
pub mod core;
pub mod diagnostics;
pub mod domains;
pub mod engine;
mod error;
pub mod model;
pub mod notifications;
pub mod observer;
pub mod poller;
pub mod router;
pub mod settings;
pub mod shell;
pub mod site;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
