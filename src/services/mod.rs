//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own the engine's rules and store access so route
//! handlers can stay focused on protocol translation. `plan` is the only
//! writer of plan documents; the pure modules (`layout`, `validate`,
//! `recommend`, `guard`) never touch the store.

pub mod guard;
pub mod guests;
pub mod heartbeat;
pub mod history;
pub mod layout;
pub mod lease;
pub mod plan;
pub mod presence;
pub mod recommend;
pub mod relay;
pub mod sweeper;
pub mod validate;
