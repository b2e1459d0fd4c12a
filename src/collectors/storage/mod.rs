pub mod mounts;
pub mod probe;

use crate::config::{SourcePaths, StorageConfig};
use crate::error::TelemetryError;
use mounts::{filesystem_usage, find_mount, FsUsage};
use probe::{DeviceProbe, FsSignature};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const UNSET_LABEL: &str = "none";

// Usage fields are -1 when the partition is not mounted or statvfs fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionInfo {
    pub device_path: String,
    pub label: String,
    pub filesystem_type: String,
    pub size_bytes: u64,
    pub free_bytes: i64,
    pub total_inodes: i64,
    pub free_inodes: i64,
    pub mount_point: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiskScanError {
    pub device: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PartitionSnapshot {
    pub partitions: Vec<PartitionInfo>,
    pub errors: Vec<DiskScanError>,
}

impl PartitionInfo {
    fn new(
        device_path: String,
        sig: FsSignature,
        size_bytes: u64,
        usage: FsUsage,
        mount_point: Option<String>,
    ) -> Self {
        let label = sig
            .label
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| UNSET_LABEL.to_string());
        Self {
            device_path,
            label,
            filesystem_type: sig.fs_type,
            size_bytes,
            free_bytes: usage.free_bytes,
            total_inodes: usage.total_inodes,
            free_inodes: usage.free_inodes,
            mount_point,
        }
    }
}

pub fn scan_partitions(
    sources: &SourcePaths,
    cfg: &StorageConfig,
) -> Result<PartitionSnapshot, TelemetryError> {
    let mut snapshot = PartitionSnapshot::default();
    let mut report = FailureReport {
        fail_fast: cfg.fail_fast,
        errors: &mut snapshot.errors,
    };

    for name in candidate_disks(&sources.sys_block, &cfg.excluded_prefixes)? {
        let disk_path = sources.dev_dir.join(&name);
        scan_disk(&disk_path, &sources.mounts, &mut report, &mut snapshot.partitions)?;
    }

    Ok(snapshot)
}

// Unreadable devices abort the scan under `fail_fast`, otherwise they are
// recorded and the scan moves on.
struct FailureReport<'a> {
    fail_fast: bool,
    errors: &'a mut Vec<DiskScanError>,
}

impl FailureReport<'_> {
    fn failed(&mut self, device: &Path, err: TelemetryError) -> Result<(), TelemetryError> {
        if self.fail_fast {
            return Err(err);
        }
        warn!(device = %device.display(), error = %err, "устройство пропущено при сканировании");
        self.errors.push(DiskScanError {
            device: device.display().to_string(),
            error: err.to_string(),
        });
        Ok(())
    }
}

fn candidate_disks(sys_block: &Path, excluded: &[String]) -> Result<Vec<String>, TelemetryError> {
    let entries = fs::read_dir(sys_block).map_err(|source| TelemetryError::DirectoryUnavailable {
        path: sys_block.display().to_string(),
        source,
    })?;

    let mut names: Vec<String> = entries
        .flatten()
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| looks_like_disk(sys_block, name, excluded))
        .collect();
    names.sort();
    Ok(names)
}

fn looks_like_disk(sys_block: &Path, name: &str, excluded: &[String]) -> bool {
    if excluded.iter().any(|p| name.starts_with(p.as_str())) {
        return false;
    }
    // sysfs marks partitions with a `partition` attribute
    !sys_block.join(name).join("partition").exists()
}

fn scan_disk(
    disk_path: &Path,
    mounts_path: &Path,
    report: &mut FailureReport<'_>,
    out: &mut Vec<PartitionInfo>,
) -> Result<(), TelemetryError> {
    let numbers = {
        let disk = match DeviceProbe::open(disk_path) {
            Ok(disk) => disk,
            Err(err) => {
                debug!(disk = %disk_path.display(), error = %err, "устройство не открывается");
                return Ok(());
            }
        };
        match disk.partition_numbers() {
            Ok(numbers) => numbers,
            Err(source) => {
                let err = TelemetryError::ProbeUnavailable {
                    device: disk_path.display().to_string(),
                    source,
                };
                return report.failed(disk_path, err);
            }
        }
    };

    let mut classified = 0_usize;
    for &number in &numbers {
        let part_path = partition_path(disk_path, number);
        let probe = match DeviceProbe::open(&part_path) {
            Ok(probe) => probe,
            Err(err) => {
                debug!(partition = %part_path.display(), error = %err, "раздел не открывается");
                continue;
            }
        };
        match classify_partition(&probe, mounts_path) {
            Ok(Some(info)) => {
                classified += 1;
                out.push(info);
            }
            Ok(None) => {}
            Err(source) => {
                let err = TelemetryError::ProbeUnavailable {
                    device: part_path.display().to_string(),
                    source,
                };
                report.failed(&part_path, err)?;
            }
        }
    }

    debug!(
        disk = %disk_path.display(),
        partitions = ?numbers,
        classified,
        "диск просканирован"
    );
    Ok(())
}

fn partition_path(disk_path: &Path, number: usize) -> PathBuf {
    let mut name = disk_path.as_os_str().to_os_string();
    if disk_path
        .to_string_lossy()
        .ends_with(|c: char| c.is_ascii_digit())
    {
        name.push("p");
    }
    name.push(number.to_string());
    PathBuf::from(name)
}

fn classify_partition(
    probe: &DeviceProbe,
    mounts_path: &Path,
) -> io::Result<Option<PartitionInfo>> {
    let device_path = probe.path().display().to_string();
    let Some(sig) = probe.filesystem()? else {
        debug!(partition = %device_path, "тип файловой системы не определён");
        return Ok(None);
    };
    if sig.fs_type.is_empty() || sig.fs_type == "swap" {
        return Ok(None);
    }
    let size_bytes = probe.size()?;

    let (usage, mount_point) = match find_mount(mounts_path, &device_path) {
        Ok(Some(entry)) => {
            let usage = filesystem_usage(&entry.mount_point).unwrap_or_else(|err| {
                debug!(mount = %entry.mount_point.display(), error = %err, "statvfs не удался");
                FsUsage::UNKNOWN
            });
            (usage, Some(entry.mount_point.display().to_string()))
        }
        Ok(None) => (FsUsage::UNKNOWN, None),
        Err(err) => {
            debug!(
                mounts = %mounts_path.display(),
                error = %err,
                "таблица монтирования недоступна"
            );
            (FsUsage::UNKNOWN, None)
        }
    };

    Ok(Some(PartitionInfo::new(device_path, sig, size_bytes, usage, mount_point)))
}
