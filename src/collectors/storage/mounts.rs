use std::ffi::CString;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub mount_point: PathBuf,
    pub fs_type: String,
}

// -1 means unknown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsUsage {
    pub free_bytes: i64,
    pub total_inodes: i64,
    pub free_inodes: i64,
}

impl FsUsage {
    pub const UNKNOWN: FsUsage = FsUsage {
        free_bytes: -1,
        total_inodes: -1,
        free_inodes: -1,
    };
}

pub fn find_mount(mounts_path: &Path, device: &str) -> io::Result<Option<MountEntry>> {
    let reader = BufReader::new(File::open(mounts_path)?);
    for line in reader.lines() {
        let line = line?;
        if let Some(entry) = parse_mount_line(&line) {
            if entry.source == device {
                return Ok(Some(entry));
            }
        }
    }
    Ok(None)
}

pub fn filesystem_usage(mount_point: &Path) -> io::Result<FsUsage> {
    let c_path = CString::new(mount_point.as_os_str().as_bytes())
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    // SAFETY: statvfs is plain old data and c_path is NUL-terminated.
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    let free_bytes = (stat.f_bfree as u64).saturating_mul(stat.f_frsize as u64);
    Ok(FsUsage {
        free_bytes: clamp_i64(free_bytes),
        total_inodes: clamp_i64(stat.f_files as u64),
        free_inodes: clamp_i64(stat.f_ffree as u64),
    })
}

fn parse_mount_line(line: &str) -> Option<MountEntry> {
    let mut fields = line.split_whitespace();
    let source = unescape(fields.next()?);
    let mount_point = PathBuf::from(unescape(fields.next()?));
    let fs_type = fields.next()?.to_string();
    Some(MountEntry {
        source,
        mount_point,
        fs_type,
    })
}

// The kernel writes space, tab, newline and backslash as `\ooo` octal escapes.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal_triplet(&bytes[i + 1..i + 4]) {
            let v = (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            out.push(v);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal_triplet(b: &[u8]) -> bool {
    b.len() == 3 && b[0] <= b'3' && b.iter().all(|c| (b'0'..=b'7').contains(c))
}

fn clamp_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}
