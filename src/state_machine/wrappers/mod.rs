//! Input wrappers that let a runtime hand system resources (clock readings, seeds) to a
//! [`StateMachine`](super::StateMachine) without the machine touching the system itself.

pub mod input;
