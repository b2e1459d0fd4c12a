use crate::collectors::{
    count_online_cores, outbound_ip_or_loopback, read_all_core_counters, read_host_info,
    read_memory_counters, scan_partitions, CpuCounters, HostInfo, MemoryCounters,
    PartitionSnapshot,
};
use crate::config::Config;
use crate::error::TelemetryError;
use serde::Serialize;
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub collected_at_unix: i64,
    pub host: HostInfo,
    pub outbound_ip: IpAddr,
    pub core_count: usize,
    pub cores: Vec<CpuCounters>,
    pub memory: MemoryCounters,
    pub storage: PartitionSnapshot,
}

// Only the outbound IP degrades (to loopback); any other failure is fatal.
pub fn collect_snapshot(cfg: &Config) -> Result<TelemetrySnapshot, TelemetryError> {
    let core_count = count_online_cores()?;
    let cores = read_all_core_counters(&cfg.sources.proc_stat)?;
    let memory = read_memory_counters()?;
    let storage = scan_partitions(&cfg.sources, &cfg.storage)?;
    let outbound_ip = outbound_ip_or_loopback(&cfg.network_probe);

    Ok(TelemetrySnapshot {
        collected_at_unix: now_unix(),
        host: read_host_info(),
        outbound_ip,
        core_count,
        cores,
        memory,
        storage,
    })
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
