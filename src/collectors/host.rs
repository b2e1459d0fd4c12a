use serde::Serialize;
use sysinfo::{System, SystemExt};

#[derive(Debug, Clone, Serialize)]
pub struct HostInfo {
    pub host_name: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub kernel_version: Option<String>,
    pub uptime_seconds: u64,
}

pub fn read_host_info() -> HostInfo {
    // These getters read the OS directly; no refresh is needed.
    let system = System::new();
    HostInfo {
        host_name: system.host_name(),
        os_name: system.name(),
        os_version: system.os_version(),
        kernel_version: system.kernel_version(),
        uptime_seconds: system.uptime(),
    }
}
