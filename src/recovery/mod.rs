// src/recovery/mod.rs
// Channel recovery: wake primitive, shared flags, event queue, state machine and the loop driving them.

pub mod backoff;
pub mod events;
pub mod flags;
pub mod latch;
pub mod machine;
pub mod main_loop;

pub use backoff::RecreatePolicy;
pub use events::{event_channel, ChannelEvent, EventQueue, EventSender};
pub use flags::RecoveryFlags;
pub use latch::SignalLatch;
pub use machine::{CancelHandle, RecoveryPolicy, RecoveryState, RecoveryStateMachine, Transition};
pub use main_loop::{MainLoop, RunSummary};
