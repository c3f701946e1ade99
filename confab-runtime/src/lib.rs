//! CONFAB Runtime - World Lifecycle and Event Routing
//!
//! Composes the policy crates into a running orchestrator. Each world is
//! owned by one mailbox actor: lifecycle transitions, message publication,
//! routing decisions, approval handling, and memory writes all execute
//! during that actor's processing turns, while provider completions and
//! tool executions run in spawned tasks whose results re-enter the mailbox.

mod actor;
mod handle;
mod loader;
mod registry;
pub mod telemetry;

pub use actor::MessageDraft;
pub use handle::{RegistryState, WorldHandle, WorldSubscription};
pub use loader::{StoreLoader, WorldLoader};
pub use registry::WorldRegistry;
