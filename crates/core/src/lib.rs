//! Core event model for tree-structured collective signing.
//!
//! - [`Event`]: All inputs to a node
//! - [`Action`]: All outputs from a node
//! - [`EventPriority`]: Ordering priority for events at the same timestamp
//! - [`StateMachine`]: The trait the protocol engine implements
//!
//! ```text
//! Event → StateMachine::handle() → Vec<Action> → runner executes → Event ...
//! ```
//!
//! The state machine is synchronous and deterministic. Runners (simulation
//! or production) own all I/O: they deliver events, execute actions and
//! convert action results back into events.

mod action;
mod event;
mod timer;
mod traits;

pub use action::Action;
pub use event::{Event, EventPriority};
pub use timer::{TimerId, TimerScheduler};
pub use traits::StateMachine;
