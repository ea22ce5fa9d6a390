//! stepwise-window: bounded observation window for state tracking.
//!
//! Ring buffer of compact observation records so the tracker can run
//! consistency checks and analytics without holding full history in memory.
//! Two independent caps apply: a record-count cap and an estimated-byte cap.

mod record;
mod window;

pub use record::WindowRecord;
pub use window::{ObservationWindow, WindowStats};
