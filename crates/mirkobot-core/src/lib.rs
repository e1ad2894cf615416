//! # mirkobot-core
//!
//! Core types and primitives for the Mirkobot chat-bot runtime.
//! This crate defines the shared vocabulary used by every other crate in the
//! workspace: the error type, the `::`-delimited topic model and the
//! in-process publish/subscribe [`Bus`].

pub mod bus;
pub mod error;
pub mod topic;
pub mod topics;

pub use bus::{Bus, Envelope, Handler, SubscriptionId, handler, panic_message};
pub use error::{MirkobotError, Result};
pub use topic::{Segment, TopicPattern, DELIMITER, WILDCARD};
