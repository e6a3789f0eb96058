//! In-memory test doubles for the consumed contracts.
//!
//! [`MemoryHub`] simulates a pub/sub broker inside the process so peers can
//! be exercised without a network, and [`MemoryDeviceStore`] keeps key
//! material in memory. Both are also usable from downstream crates' tests.

mod memory_store;
mod memory_transport;

pub use memory_store::MemoryDeviceStore;
pub use memory_transport::{MemoryHub, MemoryTransport};
