//! Call lifecycle: state machine, dial pad and the caller-facing view
//!
//! The [`CallMachine`] runs as one task that owns every piece of call state.
//! Callers drive it through a [`CallHandle`] and observe it through [`CallView`]
//! snapshots.

pub mod dialpad;
pub mod machine;
pub mod state;
pub mod typewriter;
pub mod view;

pub use dialpad::DialPad;
pub use machine::{CallDeps, CallHandle, CallMachine, Command};
pub use state::CallState;
pub use typewriter::Typewriter;
pub use view::CallView;
