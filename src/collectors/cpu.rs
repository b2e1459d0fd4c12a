use crate::error::TelemetryError;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

pub const CPU_TICK_FIELDS: usize = 7;

/// Cumulative scheduler ticks for one logical CPU since boot.
///
/// These are raw counters. Utilization needs two samples: take
/// `later.ticks_since(&earlier)` and divide each category by `total()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CpuCounters {
    pub core: usize,
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
}

impl CpuCounters {
    fn from_ticks(core: usize, t: [u64; CPU_TICK_FIELDS]) -> Self {
        Self {
            core,
            user: t[0],
            nice: t[1],
            system: t[2],
            idle: t[3],
            iowait: t[4],
            irq: t[5],
            softirq: t[6],
        }
    }

    pub fn as_array(&self) -> [u64; CPU_TICK_FIELDS] {
        [
            self.user,
            self.nice,
            self.system,
            self.idle,
            self.iowait,
            self.irq,
            self.softirq,
        ]
    }

    pub fn total(&self) -> u64 {
        self.as_array().iter().fold(0_u64, |acc, v| acc.saturating_add(*v))
    }

    // A counter that went backwards (reset, hotplug) yields 0.
    pub fn ticks_since(&self, earlier: &CpuCounters) -> CpuCounters {
        let now = self.as_array();
        let before = earlier.as_array();
        let mut delta = [0_u64; CPU_TICK_FIELDS];
        for (i, slot) in delta.iter_mut().enumerate() {
            *slot = now[i].saturating_sub(before[i]);
        }
        CpuCounters::from_ticks(self.core, delta)
    }
}

pub fn count_online_cores() -> Result<usize, TelemetryError> {
    // SAFETY: sysconf only reads a process-wide constant.
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n < 1 {
        return Err(TelemetryError::stat_source(
            "sysconf(_SC_NPROCESSORS_ONLN)",
            std::io::Error::last_os_error(),
        ));
    }
    Ok(n as usize)
}

pub fn read_core_counters(stat_path: &Path, core: usize) -> Result<CpuCounters, TelemetryError> {
    let label = format!("cpu{core}");
    for line in per_core_lines(stat_path)? {
        let line = line?;
        let mut fields = line.split_whitespace();
        if fields.next() == Some(label.as_str()) {
            let ticks = parse_ticks(&label, fields)?;
            return Ok(CpuCounters::from_ticks(core, ticks));
        }
    }
    Err(TelemetryError::parse(
        stat_path.display().to_string(),
        format!("строка {label} не найдена"),
    ))
}

pub fn read_all_core_counters(stat_path: &Path) -> Result<Vec<CpuCounters>, TelemetryError> {
    let mut out = Vec::new();
    for line in per_core_lines(stat_path)? {
        let line = line?;
        let mut fields = line.split_whitespace();
        let Some(label) = fields.next() else {
            continue;
        };
        let core = core_index(label).ok_or_else(|| {
            TelemetryError::parse(
                stat_path.display().to_string(),
                format!("неожиданная метка {label}"),
            )
        })?;
        let ticks = parse_ticks(label, fields)?;
        out.push(CpuCounters::from_ticks(core, ticks));
    }
    Ok(out)
}

// Lines after the aggregate `cpu` line, up to the first non-cpu line.
fn per_core_lines(
    stat_path: &Path,
) -> Result<impl Iterator<Item = Result<String, TelemetryError>>, TelemetryError> {
    let path_display = stat_path.display().to_string();
    let file = File::open(stat_path)
        .map_err(|source| TelemetryError::stat_source(path_display.clone(), source))?;
    let mut lines = BufReader::new(file).lines();

    match lines.next() {
        Some(Ok(first)) if first.split_whitespace().next() == Some("cpu") => {}
        Some(Ok(_)) | None => {
            return Err(TelemetryError::parse(
                path_display,
                "первая строка должна быть агрегатом cpu",
            ))
        }
        Some(Err(source)) => return Err(TelemetryError::stat_source(path_display, source)),
    }

    Ok(lines
        .map(move |line| {
            line.map_err(|source| TelemetryError::stat_source(path_display.clone(), source))
        })
        .take_while(|line| match line {
            Ok(text) => text.starts_with("cpu"),
            Err(_) => true,
        }))
}

fn core_index(label: &str) -> Option<usize> {
    label.strip_prefix("cpu")?.parse().ok()
}

fn parse_ticks<'a>(
    label: &str,
    fields: impl Iterator<Item = &'a str>,
) -> Result<[u64; CPU_TICK_FIELDS], TelemetryError> {
    let mut ticks = [0_u64; CPU_TICK_FIELDS];
    let mut filled = 0;
    for (slot, raw) in ticks.iter_mut().zip(fields) {
        *slot = raw.parse().map_err(|_| {
            TelemetryError::parse(label, format!("некорректное значение счётчика '{raw}'"))
        })?;
        filled += 1;
    }
    if filled < CPU_TICK_FIELDS {
        return Err(TelemetryError::parse(
            label,
            format!("ожидалось {CPU_TICK_FIELDS} счётчиков, найдено {filled}"),
        ));
    }
    Ok(ticks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const STAT: &str = "\
cpu  900 10 300 5000 40 5 7 0 0 0
cpu0 500 6 200 2500 20 3 4 0 0 0
cpu1 400 4 100 2500 20 2 3 0 0 0
intr 123456 0 0
ctxt 99999
btime 1700000000
";

    fn stat_file(text: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().expect("временный файл");
        f.write_all(text.as_bytes()).expect("запись во временный файл");
        f
    }

    #[test]
    fn reads_requested_core_not_aggregate() {
        let f = stat_file(STAT);
        let c0 = read_core_counters(f.path(), 0).expect("cpu0");
        assert_eq!(c0.as_array(), [500, 6, 200, 2500, 20, 3, 4]);
        let c1 = read_core_counters(f.path(), 1).expect("cpu1");
        assert_eq!(c1.core, 1);
        assert_eq!(c1.user, 400);
        assert_eq!(c1.softirq, 3);
    }

    #[test]
    fn one_past_last_core_is_parse_error() {
        let f = stat_file(STAT);
        let err = read_core_counters(f.path(), 2).expect_err("cpu2 отсутствует");
        assert!(matches!(err, TelemetryError::Parse { .. }));
    }

    #[test]
    fn short_line_is_parse_error() {
        let f = stat_file("cpu  1 2 3 4 5 6 7\ncpu0 1 2 3\n");
        let err = read_core_counters(f.path(), 0).expect_err("мало полей");
        assert!(matches!(err, TelemetryError::Parse { .. }));
    }

    #[test]
    fn garbage_value_is_parse_error() {
        let f = stat_file("cpu  1 2 3 4 5 6 7\ncpu0 1 2 x 4 5 6 7\n");
        let err = read_core_counters(f.path(), 0).expect_err("нечисловое поле");
        assert!(matches!(err, TelemetryError::Parse { .. }));
    }

    #[test]
    fn missing_source_is_unavailable() {
        let err = read_core_counters(Path::new("/nonexistent/proc/stat"), 0)
            .expect_err("файла нет");
        assert!(matches!(err, TelemetryError::StatSourceUnavailable { .. }));
    }

    #[test]
    fn missing_aggregate_line_is_parse_error() {
        let f = stat_file("cpu0 1 2 3 4 5 6 7\n");
        let err = read_core_counters(f.path(), 0).expect_err("нет агрегата");
        assert!(matches!(err, TelemetryError::Parse { .. }));
    }

    #[test]
    fn reads_all_cores_in_order() {
        let f = stat_file(STAT);
        let all = read_all_core_counters(f.path()).expect("все ядра");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].core, 0);
        assert_eq!(all[1].core, 1);
        assert_eq!(all[1].idle, 2500);
    }

    #[test]
    fn ticks_since_saturates() {
        let f = stat_file(STAT);
        let later = read_core_counters(f.path(), 0).expect("cpu0");
        let mut earlier = later;
        earlier.user = 450;
        earlier.idle = 9999;
        let delta = later.ticks_since(&earlier);
        assert_eq!(delta.user, 50);
        assert_eq!(delta.idle, 0);
        assert_eq!(delta.nice, 0);
        assert_eq!(later.total(), 500 + 6 + 200 + 2500 + 20 + 3 + 4);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn live_counters_are_monotonic() {
        let cores = count_online_cores().expect("число ядер");
        assert!(cores >= 1);
        let stat = Path::new("/proc/stat");
        let first = read_core_counters(stat, 0).expect("первое чтение");
        let second = read_core_counters(stat, 0).expect("второе чтение");
        for (a, b) in first.as_array().iter().zip(second.as_array().iter()) {
            assert!(b >= a);
        }
    }
}
