use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

const SECTOR: u64 = 512;
const MBR_SIGNATURE: [u8; 2] = [0x55, 0xAA];
const MBR_TABLE_OFFSET: usize = 446;
const MBR_ENTRY_SIZE: usize = 16;
const MBR_GPT_PROTECTIVE: u8 = 0xEE;
const MBR_EXTENDED: [u8; 3] = [0x05, 0x0F, 0x85];
const MBR_FIRST_LOGICAL: usize = 5;
const MBR_MAX_LOGICAL: usize = 128;
const GPT_SIGNATURE: &[u8] = b"EFI PART";
const GPT_MAX_ENTRIES: u32 = 256;
const GPT_MAX_ENTRY_SIZE: u32 = 1024;

const EXT_SUPERBLOCK: u64 = 1024;
const EXT_MAGIC: [u8; 2] = [0x53, 0xEF];
const EXT3_COMPAT_HAS_JOURNAL: u32 = 0x0004;
const EXT4_INCOMPAT_JOURNAL_DEV: u32 = 0x0008;
const EXT4_INCOMPAT_ONLY: u32 = 0x0040 | 0x0080 | 0x0200;

const SWAP_PAGE: u64 = 4096;
const BTRFS_SUPERBLOCK: u64 = 0x10000;
const ISO9660_DESCRIPTOR: u64 = 0x8000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsSignature {
    pub fs_type: String,
    pub label: Option<String>,
}

#[derive(Debug)]
pub struct DeviceProbe {
    path: PathBuf,
    file: File,
}

impl DeviceProbe {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> io::Result<u64> {
        let len = self.file.metadata()?.len();
        if len > 0 {
            return Ok(len);
        }
        // Block device nodes report zero length; seeking to the end gives the size.
        (&self.file).seek(SeekFrom::End(0))
    }

    // Partition numbers as the kernel names them: GPT entry index + 1,
    // MBR primary slots 1-4, logical partitions from 5.
    pub fn partition_numbers(&self) -> io::Result<Vec<usize>> {
        let Some(mbr) = self.read_at(0, SECTOR as usize)? else {
            return Ok(Vec::new());
        };
        if mbr[510..512] != MBR_SIGNATURE || is_fat_boot_sector(&mbr) || is_ntfs(&mbr) {
            return Ok(Vec::new());
        }

        let slots: Vec<MbrEntry> = (0..4).map(|slot| MbrEntry::parse(&mbr, slot)).collect();
        if slots.iter().any(|e| e.kind == MBR_GPT_PROTECTIVE) {
            if let Some(numbers) = self.gpt_partition_numbers()? {
                return Ok(numbers);
            }
        }

        let mut numbers: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter(|(_, e)| e.kind != 0)
            .map(|(slot, _)| slot + 1)
            .collect();
        if let Some(extended) = slots.iter().find(|e| MBR_EXTENDED.contains(&e.kind)) {
            let logical = self.logical_partition_count(extended.start_lba)?;
            numbers.extend(MBR_FIRST_LOGICAL..MBR_FIRST_LOGICAL + logical);
        }
        Ok(numbers)
    }

    fn gpt_partition_numbers(&self) -> io::Result<Option<Vec<usize>>> {
        let Some(header) = self.read_at(SECTOR, SECTOR as usize)? else {
            return Ok(None);
        };
        if &header[0..8] != GPT_SIGNATURE {
            return Ok(None);
        }

        let entries_lba = le_u64(&header[72..80]);
        let entry_count = le_u32(&header[80..84]).min(GPT_MAX_ENTRIES);
        let entry_size = le_u32(&header[84..88]);
        if entry_size < 16 || entry_size > GPT_MAX_ENTRY_SIZE {
            return Ok(None);
        }

        let table_len = entry_count as usize * entry_size as usize;
        let Some(table) = self.read_at(entries_lba.saturating_mul(SECTOR), table_len)? else {
            return Ok(None);
        };
        let used = table
            .chunks(entry_size as usize)
            .enumerate()
            .filter(|(_, entry)| entry[..16].iter().any(|b| *b != 0))
            .map(|(index, _)| index + 1)
            .collect();
        Ok(Some(used))
    }

    // EBR links are relative to the start of the extended partition.
    fn logical_partition_count(&self, extended_lba: u64) -> io::Result<usize> {
        if extended_lba == 0 {
            return Ok(0);
        }
        let mut count = 0;
        let mut visited = HashSet::new();
        let mut ebr_lba = extended_lba;
        while count < MBR_MAX_LOGICAL && visited.insert(ebr_lba) {
            let Some(ebr) = self.read_at(ebr_lba.saturating_mul(SECTOR), SECTOR as usize)? else {
                break;
            };
            if ebr[510..512] != MBR_SIGNATURE {
                break;
            }
            if MbrEntry::parse(&ebr, 0).kind != 0 {
                count += 1;
            }
            let next = MbrEntry::parse(&ebr, 1);
            if next.kind == 0 || next.start_lba == 0 {
                break;
            }
            ebr_lba = extended_lba.saturating_add(next.start_lba);
        }
        Ok(count)
    }

    pub fn filesystem(&self) -> io::Result<Option<FsSignature>> {
        if let Some(sig) = self.probe_swap()? {
            return Ok(Some(sig));
        }
        if let Some(sig) = self.probe_ext()? {
            return Ok(Some(sig));
        }
        if let Some(sig) = self.probe_xfs()? {
            return Ok(Some(sig));
        }
        if let Some(sig) = self.probe_btrfs()? {
            return Ok(Some(sig));
        }
        if let Some(sig) = self.probe_iso9660()? {
            return Ok(Some(sig));
        }
        self.probe_boot_sector()
    }

    fn probe_swap(&self) -> io::Result<Option<FsSignature>> {
        let Some(magic) = self.read_at(SWAP_PAGE - 10, 10)? else {
            return Ok(None);
        };
        if magic != b"SWAPSPACE2" && magic != b"SWAP-SPACE" {
            return Ok(None);
        }
        // version, last_page, nr_badpages and the uuid precede the volume name
        let label = self
            .read_at(1024 + 4 + 4 + 4 + 16, 16)?
            .and_then(|raw| decode_label(&raw));
        Ok(Some(FsSignature {
            fs_type: "swap".to_string(),
            label,
        }))
    }

    fn probe_ext(&self) -> io::Result<Option<FsSignature>> {
        let Some(sb) = self.read_at(EXT_SUPERBLOCK, 1024)? else {
            return Ok(None);
        };
        if sb[56..58] != EXT_MAGIC {
            return Ok(None);
        }

        let compat = le_u32(&sb[92..96]);
        let incompat = le_u32(&sb[96..100]);
        let fs_type = if incompat & EXT4_INCOMPAT_JOURNAL_DEV != 0 {
            "jbd"
        } else if incompat & EXT4_INCOMPAT_ONLY != 0 {
            "ext4"
        } else if compat & EXT3_COMPAT_HAS_JOURNAL != 0 {
            "ext3"
        } else {
            "ext2"
        };
        Ok(Some(FsSignature {
            fs_type: fs_type.to_string(),
            label: decode_label(&sb[120..136]),
        }))
    }

    fn probe_xfs(&self) -> io::Result<Option<FsSignature>> {
        let Some(sb) = self.read_at(0, 120)? else {
            return Ok(None);
        };
        if &sb[0..4] != b"XFSB" {
            return Ok(None);
        }
        Ok(Some(FsSignature {
            fs_type: "xfs".to_string(),
            label: decode_label(&sb[108..120]),
        }))
    }

    fn probe_btrfs(&self) -> io::Result<Option<FsSignature>> {
        let Some(sb) = self.read_at(BTRFS_SUPERBLOCK, 0x12b + 256)? else {
            return Ok(None);
        };
        if &sb[0x40..0x48] != b"_BHRfS_M" {
            return Ok(None);
        }
        Ok(Some(FsSignature {
            fs_type: "btrfs".to_string(),
            label: decode_label(&sb[0x12b..0x12b + 256]),
        }))
    }

    fn probe_iso9660(&self) -> io::Result<Option<FsSignature>> {
        let Some(pvd) = self.read_at(ISO9660_DESCRIPTOR, 72)? else {
            return Ok(None);
        };
        if &pvd[1..6] != b"CD001" {
            return Ok(None);
        }
        Ok(Some(FsSignature {
            fs_type: "iso9660".to_string(),
            label: decode_label(&pvd[40..72]),
        }))
    }

    fn probe_boot_sector(&self) -> io::Result<Option<FsSignature>> {
        let Some(bs) = self.read_at(0, SECTOR as usize)? else {
            return Ok(None);
        };
        if &bs[0..4] == b"hsqs" {
            return Ok(Some(FsSignature {
                fs_type: "squashfs".to_string(),
                label: None,
            }));
        }
        if is_ntfs(&bs) {
            return Ok(Some(FsSignature {
                fs_type: "ntfs".to_string(),
                label: None,
            }));
        }
        if bs[510..512] != MBR_SIGNATURE || !is_fat_boot_sector(&bs) {
            return Ok(None);
        }
        let raw_label = if &bs[82..87] == b"FAT32" {
            &bs[71..82]
        } else {
            &bs[43..54]
        };
        let label = decode_label(raw_label).filter(|l| l != "NO NAME");
        Ok(Some(FsSignature {
            fs_type: "vfat".to_string(),
            label,
        }))
    }

    // `None` when the device is shorter than `offset + len`
    fn read_at(&self, offset: u64, len: usize) -> io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0_u8; len];
        match self.file.read_exact_at(&mut buf, offset) {
            Ok(()) => Ok(Some(buf)),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(err) => Err(err),
        }
    }
}

struct MbrEntry {
    kind: u8,
    start_lba: u64,
}

impl MbrEntry {
    fn parse(sector: &[u8], slot: usize) -> Self {
        let e = MBR_TABLE_OFFSET + slot * MBR_ENTRY_SIZE;
        Self {
            kind: sector[e + 4],
            start_lba: u64::from(le_u32(&sector[e + 8..e + 12])),
        }
    }
}

fn is_fat_boot_sector(bs: &[u8]) -> bool {
    &bs[82..87] == b"FAT32" || &bs[54..58] == b"FAT1" || &bs[54..59] == b"MSDOS"
}

fn is_ntfs(bs: &[u8]) -> bool {
    &bs[3..11] == b"NTFS    "
}

fn decode_label(raw: &[u8]) -> Option<String> {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    let label = String::from_utf8_lossy(&raw[..end]).trim().to_string();
    if label.is_empty() {
        None
    } else {
        Some(label)
    }
}

fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn le_u64(b: &[u8]) -> u64 {
    let mut arr = [0_u8; 8];
    arr.copy_from_slice(&b[..8]);
    u64::from_le_bytes(arr)
}

#[cfg(test)]
pub(crate) mod fixtures {
    const EXTENDED_LBA: usize = 8;

    pub fn mbr_disk(partition_types: &[u8]) -> Vec<u8> {
        mbr_disk_with_logical(partition_types, &[])
    }

    // An extended slot starts at EXTENDED_LBA; each EBR holds one logical
    // partition and links to the next EBR two sectors further on.
    pub fn mbr_disk_with_logical(partition_types: &[u8], logical_types: &[u8]) -> Vec<u8> {
        let sectors = (EXTENDED_LBA + 2 * logical_types.len() + 2).max(8);
        let mut img = vec![0_u8; 512 * sectors];
        for (i, t) in partition_types.iter().take(4).enumerate() {
            let e = 446 + i * 16;
            img[e + 4] = *t;
            if matches!(*t, 0x05 | 0x0F | 0x85) {
                img[e + 8..e + 12].copy_from_slice(&(EXTENDED_LBA as u32).to_le_bytes());
            }
        }
        img[510] = 0x55;
        img[511] = 0xAA;

        for (k, t) in logical_types.iter().enumerate() {
            let ebr = (EXTENDED_LBA + 2 * k) * 512;
            img[ebr + 446 + 4] = *t;
            img[ebr + 446 + 8..ebr + 446 + 12].copy_from_slice(&1_u32.to_le_bytes());
            if k + 1 < logical_types.len() {
                let next = (2 * (k + 1)) as u32;
                img[ebr + 462 + 4] = 0x05;
                img[ebr + 462 + 8..ebr + 462 + 12].copy_from_slice(&next.to_le_bytes());
            }
            img[ebr + 510] = 0x55;
            img[ebr + 511] = 0xAA;
        }
        img
    }

    pub fn gpt_disk(used_entries: &[usize]) -> Vec<u8> {
        let mut img = vec![0_u8; 512 * 40];
        img[446 + 4] = 0xEE;
        img[510] = 0x55;
        img[511] = 0xAA;
        let h = 512;
        img[h..h + 8].copy_from_slice(b"EFI PART");
        img[h + 72..h + 80].copy_from_slice(&2_u64.to_le_bytes());
        img[h + 80..h + 84].copy_from_slice(&128_u32.to_le_bytes());
        img[h + 84..h + 88].copy_from_slice(&128_u32.to_le_bytes());
        // 128 entries * 128 bytes = 32 sectors starting at LBA 2
        for i in used_entries {
            let e = 1024 + i * 128;
            img[e] = 0xAF;
            img[e + 1] = 0x3D;
        }
        img
    }

    pub fn ext4(label: &str) -> Vec<u8> {
        let mut img = vec![0_u8; 8192];
        let sb = 1024;
        img[sb + 56] = 0x53;
        img[sb + 57] = 0xEF;
        img[sb + 92..sb + 96].copy_from_slice(&0x0004_u32.to_le_bytes());
        img[sb + 96..sb + 100].copy_from_slice(&0x0240_u32.to_le_bytes());
        let bytes = label.as_bytes();
        img[sb + 120..sb + 120 + bytes.len()].copy_from_slice(bytes);
        img
    }

    pub fn ext3() -> Vec<u8> {
        let mut img = ext4("");
        img[1024 + 96..1024 + 100].copy_from_slice(&0_u32.to_le_bytes());
        img
    }

    pub fn swap(label: &str) -> Vec<u8> {
        let mut img = vec![0_u8; 8192];
        img[4086..4096].copy_from_slice(b"SWAPSPACE2");
        let off = 1024 + 28;
        let bytes = label.as_bytes();
        img[off..off + bytes.len()].copy_from_slice(bytes);
        img
    }

    pub fn xfs(label: &str) -> Vec<u8> {
        let mut img = vec![0_u8; 4096];
        img[0..4].copy_from_slice(b"XFSB");
        let bytes = label.as_bytes();
        img[108..108 + bytes.len()].copy_from_slice(bytes);
        img
    }

    pub fn fat32(label: &str) -> Vec<u8> {
        let mut img = vec![0_u8; 4096];
        img[0..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
        let mut padded = [b' '; 11];
        padded[..label.len()].copy_from_slice(label.as_bytes());
        img[71..82].copy_from_slice(&padded);
        img[82..90].copy_from_slice(b"FAT32   ");
        img[510] = 0x55;
        img[511] = 0xAA;
        img
    }
}
