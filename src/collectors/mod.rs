pub mod cpu;
pub mod host;
pub mod memory;
pub mod network;
pub mod storage;

pub use cpu::{count_online_cores, read_all_core_counters, read_core_counters, CpuCounters};
pub use host::{read_host_info, HostInfo};
pub use memory::{read_memory_counters, MemoryCounters};
pub use network::{discover_outbound_ip, outbound_ip_or_loopback, LOOPBACK_FALLBACK};
pub use storage::{scan_partitions, DiskScanError, PartitionInfo, PartitionSnapshot};
