//! Lifecycle state machine.
//!
//! `transition` is the pure table; `LifecycleMachine` holds the canonical cycle,
//! enforces the iteration ceiling and exposes what happens next.

pub mod lifecycle;
pub mod transition;

pub use lifecycle::{LifecycleMachine, Step};
pub use transition::{Resolution, is_legal, is_loop_back, next_action, resolve, transition};
