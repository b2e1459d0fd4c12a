use crate::error::TelemetryError;
use serde::Serialize;

pub const MEMORY_FIELDS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryCounters {
    pub total_ram: u64,
    pub free_ram: u64,
    pub shared_ram: u64,
    pub buffer_ram: u64,
    pub total_swap: u64,
    pub free_swap: u64,
}

impl MemoryCounters {
    pub fn scaled(raw: [u64; MEMORY_FIELDS], unit: u64) -> Self {
        let unit = unit.max(1);
        let b = |v: u64| v.saturating_mul(unit);
        Self {
            total_ram: b(raw[0]),
            free_ram: b(raw[1]),
            shared_ram: b(raw[2]),
            buffer_ram: b(raw[3]),
            total_swap: b(raw[4]),
            free_swap: b(raw[5]),
        }
    }

    pub fn as_array(&self) -> [u64; MEMORY_FIELDS] {
        [
            self.total_ram,
            self.free_ram,
            self.shared_ram,
            self.buffer_ram,
            self.total_swap,
            self.free_swap,
        ]
    }
}

#[cfg(target_os = "linux")]
pub fn read_memory_counters() -> Result<MemoryCounters, TelemetryError> {
    // SAFETY: sysinfo is plain old data; the kernel fills it in place.
    let mut info: libc::sysinfo = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::sysinfo(&mut info) };
    if rc != 0 {
        return Err(TelemetryError::stat_source(
            "sysinfo(2)",
            std::io::Error::last_os_error(),
        ));
    }

    Ok(MemoryCounters::scaled(
        [
            info.totalram as u64,
            info.freeram as u64,
            info.sharedram as u64,
            info.bufferram as u64,
            info.totalswap as u64,
            info.freeswap as u64,
        ],
        info.mem_unit as u64,
    ))
}

#[cfg(not(target_os = "linux"))]
pub fn read_memory_counters() -> Result<MemoryCounters, TelemetryError> {
    Err(TelemetryError::stat_source(
        "sysinfo(2)",
        std::io::Error::new(std::io::ErrorKind::Unsupported, "only available on linux"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_applies_mem_unit() {
        let m = MemoryCounters::scaled([4, 1, 0, 2, 8, 8], 4096);
        assert_eq!(m.total_ram, 4 * 4096);
        assert_eq!(m.free_ram, 4096);
        assert_eq!(m.buffer_ram, 2 * 4096);
        assert_eq!(m.free_swap, 8 * 4096);
    }

    #[test]
    fn zero_unit_means_bytes() {
        let m = MemoryCounters::scaled([10, 5, 1, 1, 0, 0], 0);
        assert_eq!(m.as_array(), [10, 5, 1, 1, 0, 0]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn live_free_never_exceeds_total() {
        let m = read_memory_counters().expect("sysinfo должен работать");
        assert!(m.total_ram > 0);
        assert!(m.free_ram <= m.total_ram);
        assert!(m.free_swap <= m.total_swap);
    }
}
