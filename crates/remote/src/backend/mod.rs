//! Target implementations.
//!
//! - [`local::LocalTarget`]: a target whose storage is a local directory
//! - [`memory::MemoryTarget`]: in-memory, scriptable, for tests and rehearsals

pub mod local;
pub mod memory;
