//! Memory observability
//!
//! Process and system memory readings logged around data loads.

mod monitor;

pub use monitor::{MemoryProbe, MemorySnapshot};
