#[cfg(unix)]
pub mod harness;
pub mod memory;
#[cfg(unix)]
pub mod tools;

#[cfg(unix)]
pub use harness::{InlineFacility, TestHarness};
pub use memory::MemoryBackend;
