//! Shared domain types for Mission Control: events, missions, queued
//! messages, conversation messages, model stream events, errors and
//! configuration. No I/O lives here.

pub mod config;
pub mod error;
pub mod event;
pub mod ident;
pub mod message;
pub mod mission;
pub mod queue;
pub mod stream;

pub use error::{Error, Result};
