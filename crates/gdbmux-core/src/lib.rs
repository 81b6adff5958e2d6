//! gdbmux-core: Shared library for the GDB session multiplexer.
//!
//! Provides the error taxonomy and the GDB/MI result-record parser used by
//! the session layer. No I/O, no async — this crate stays dependency-light
//! so the parser is trivially unit-testable.

pub mod error;
pub mod record;

// Re-export commonly used items at crate root.
pub use error::{MuxError, MuxResult};
pub use record::{Record, PROMPT, RESULT_PREFIX};
