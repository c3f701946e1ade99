//! CONFAB Events - World Channel and Thread Integrity
//!
//! The in-process publish/subscribe channel every world owns, the event
//! envelope broadcast on it, and the reply-thread integrity checker that
//! guards message persistence.

mod channel;
mod event;
pub mod thread;

pub use channel::{WorldChannel, DEFAULT_CHANNEL_CAPACITY};
pub use event::WorldEvent;
pub use thread::{thread_depth, validate_reply};
