//! gdbmux-session: GDB/MI session multiplexing.
//!
//! Each session owns one `gdb --interpreter=mi2` subprocess, a reader task
//! draining its stdout into an ordered channel, and an idle monitor. The
//! registry maps opaque ids to sessions, sweeps out idle ones, and exposes
//! the four operations a dispatcher consumes: open, send, close, list.

pub mod config;
pub mod registry;
pub mod session;

// Re-export commonly used items at crate root.
pub use config::Config;
pub use registry::{SessionInfo, SessionRegistry};
pub use session::{CommandOutcome, Session};
