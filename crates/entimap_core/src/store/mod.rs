//! Store adapters shipped with the engine.

mod memory;

pub use memory::{MemoryState, MemoryStore, IDENTITY_FIELD};
