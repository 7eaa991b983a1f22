//! Static cost estimates over a compiled graph.

mod flops;
mod memory;

pub use flops::{calculate_total_flops, node_flops};
pub use memory::{simulate_memory_usage, MemoryUsage};
