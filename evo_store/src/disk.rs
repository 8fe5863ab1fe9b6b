//! Disk Store: per-(consumer, sensor) directories of fixed-format block
//! files, with size-based rotation and byte-cap eviction (§4.6).
//!
//! Layout: `<root>/consumer_<c>/sensor_<sensor_id>/data_<seq:010>.bin`.
//! Each file is a concatenation of block records, a 38-byte header
//! followed by exactly `payload_bytes` of sector-formatted payload — the
//! same bytes a RAM sector would hold, so `crate::record`'s packing
//! helpers decode disk payloads unchanged.

use crate::error::DiskError;
use crate::ids::{ConsumerId, SensorId};
use crate::record::{SectorBytes, SensorKind};
use evo_common::consts::SECTOR_SIZE;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic number identifying a valid block header, little-endian on disk.
pub const BLOCK_MAGIC: u32 = 0xDEAD_5EC7;

/// Set on a block whose `record_count` is less than the format maximum
/// for its kind — a sector or disk buffer flushed partially, typically
/// by a shutdown (§4.7, §4.8).
pub const FLAG_PARTIAL: u8 = 0b0000_0001;

/// Wire size of [`BlockHeader::to_bytes`].
pub const HEADER_LEN: usize = 4 + 1 + 1 + 4 + 4 + 8 + 8 + 4 + 4;

/// One block's header, exactly as specified in §4.6. All integers
/// little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub kind: SensorKind,
    pub flags: u8,
    pub sensor_id: u32,
    pub record_count: u32,
    pub first_utc_ms: u64,
    pub last_utc_ms: u64,
    pub payload_bytes: u32,
    pub crc32: u32,
}

impl BlockHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        let mut off = 0;
        buf[off..off + 4].copy_from_slice(&BLOCK_MAGIC.to_le_bytes());
        off += 4;
        buf[off] = self.kind.wire_tag();
        off += 1;
        buf[off] = self.flags;
        off += 1;
        buf[off..off + 4].copy_from_slice(&self.sensor_id.to_le_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&self.record_count.to_le_bytes());
        off += 4;
        buf[off..off + 8].copy_from_slice(&self.first_utc_ms.to_le_bytes());
        off += 8;
        buf[off..off + 8].copy_from_slice(&self.last_utc_ms.to_le_bytes());
        off += 8;
        buf[off..off + 4].copy_from_slice(&self.payload_bytes.to_le_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&self.crc32.to_le_bytes());
        off += 4;
        debug_assert_eq!(off, HEADER_LEN);
        buf
    }

    /// Parse and validate a header's magic number. CRC validation against
    /// the payload happens separately, once the payload has been read
    /// (see [`DiskStore::current_block`]).
    pub fn parse(buf: &[u8; HEADER_LEN], file_label: &str) -> Result<Self, DiskError> {
        let mut off = 0;
        let magic = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        if magic != BLOCK_MAGIC {
            return Err(DiskError::BadMagic { file: file_label.to_string() });
        }
        off += 4;
        let kind_tag = buf[off];
        off += 1;
        let flags = buf[off];
        off += 1;
        let sensor_id = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let record_count = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let first_utc_ms = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;
        let last_utc_ms = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;
        let payload_bytes = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let crc32 = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        debug_assert_eq!(off, HEADER_LEN);

        let kind = SensorKind::from_wire_tag(kind_tag)
            .ok_or_else(|| DiskError::BadMagic { file: file_label.to_string() })?;
        if record_count > kind.records_per_sector() {
            return Err(DiskError::ImplausibleRecordCount {
                file: file_label.to_string(),
                kind,
                count: record_count,
            });
        }
        Ok(BlockHeader {
            kind,
            flags,
            sensor_id,
            record_count,
            first_utc_ms,
            last_utc_ms,
            payload_bytes,
            crc32,
        })
    }
}

/// One not-yet-written block, as handed to [`DiskStore::prepend_blocks`]
/// by the shutdown flush.
pub struct PendingBlock {
    pub kind: SensorKind,
    pub sensor_id: u32,
    pub record_count: u32,
    pub first_utc_ms: u64,
    pub last_utc_ms: u64,
    pub payload: SectorBytes,
}

/// Read-cursor position into a (consumer, sensor) disk directory.
/// `seq: None` means "not yet resolved" — the next read opens whatever
/// the lowest surviving sequence number is, which is how a fresh SCB or
/// one whose oldest file was byte-cap-evicted both recover lazily.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiskPos {
    pub seq: Option<u64>,
    pub block_offset: u64,
    pub record_index: u32,
}

impl DiskPos {
    pub const START: DiskPos = DiskPos { seq: None, block_offset: 0, record_index: 0 };
}

/// Owns the on-disk root directory; all file operations for a given
/// (consumer, sensor) pair are expected to run under that sensor's lock
/// (§4.6 concurrency note) — this type itself holds no locks.
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DiskStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn quarantine_dir(&self) -> PathBuf {
        self.root.join("quarantine")
    }

    pub fn sensor_dir(&self, consumer: ConsumerId, sensor: SensorId) -> PathBuf {
        self.root
            .join(format!("consumer_{consumer}"))
            .join(format!("sensor_{sensor}"))
    }

    fn file_path(dir: &Path, seq: u64) -> PathBuf {
        dir.join(format!("data_{seq:010}.bin"))
    }

    /// Every file sequence number present in `dir`, ascending. An absent
    /// directory is an empty result, not an error (a sensor that has
    /// never spilled to disk).
    pub fn list_sequences(&self, dir: &Path) -> io::Result<Vec<u64>> {
        let mut out = Vec::new();
        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e),
        };
        for entry in entries {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if let Some(seq_str) = name.strip_prefix("data_").and_then(|s| s.strip_suffix(".bin")) {
                    if let Ok(seq) = seq_str.parse::<u64>() {
                        out.push(seq);
                    }
                }
            }
        }
        out.sort_unstable();
        Ok(out)
    }

    /// Total bytes across every file in `dir`.
    pub fn total_bytes(&self, dir: &Path) -> io::Result<u64> {
        let mut total = 0u64;
        for seq in self.list_sequences(dir)? {
            total += fs::metadata(Self::file_path(dir, seq)).map(|m| m.len()).unwrap_or(0);
        }
        Ok(total)
    }

    /// Append one block to `dir`, rotating to a new sequence number if
    /// the active file would exceed `rotation_bytes`, then evicting
    /// oldest-first until `byte_cap` holds.
    #[allow(clippy::too_many_arguments)]
    pub fn append_block(
        &self,
        dir: &Path,
        kind: SensorKind,
        sensor_id: u32,
        record_count: u32,
        first_utc_ms: u64,
        last_utc_ms: u64,
        payload: &SectorBytes,
        rotation_bytes: u64,
        byte_cap: u64,
    ) -> Result<(), DiskError> {
        fs::create_dir_all(dir)?;
        let seqs = self.list_sequences(dir)?;
        let mut seq = seqs.last().copied().unwrap_or(0);
        let mut path = Self::file_path(dir, seq);
        let existing_size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let block_len = HEADER_LEN as u64 + payload.len() as u64;
        if existing_size > 0 && existing_size + block_len > rotation_bytes {
            seq += 1;
            path = Self::file_path(dir, seq);
        }

        let header = BlockHeader {
            kind,
            flags: if record_count < kind.records_per_sector() { FLAG_PARTIAL } else { 0 },
            sensor_id,
            record_count,
            first_utc_ms,
            last_utc_ms,
            payload_bytes: payload.len() as u32,
            crc32: crc32fast::hash(payload),
        };

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(&header.to_bytes())?;
        file.write_all(payload)?;
        drop(file);

        self.enforce_byte_cap(dir, byte_cap)?;
        Ok(())
    }

    /// Write `blocks` as the oldest data in `dir`, ahead of anything
    /// already written there. The tiered write path can spill newly
    /// arriving records straight to disk while older records are still
    /// waiting in RAM (§4.5); when the shutdown flush finally drains
    /// that RAM backlog to the same directory it must land *before*
    /// those already-spilled blocks, or a consumer reading the
    /// directory back in ascending-sequence order would see newer
    /// records ahead of older ones (§4.8). Existing sequence numbers
    /// are shifted up to make room, then `blocks` are written through
    /// the same rotation rule `append_block` uses, starting fresh at
    /// sequence zero.
    pub fn prepend_blocks(
        &self,
        dir: &Path,
        blocks: &[PendingBlock],
        rotation_bytes: u64,
        byte_cap: u64,
    ) -> Result<(), DiskError> {
        if blocks.is_empty() {
            return Ok(());
        }
        fs::create_dir_all(dir)?;
        let existing = self.list_sequences(dir)?;
        if !existing.is_empty() {
            let reserve = blocks.len() as u64;
            // Highest sequence first, so a partially completed shift
            // never renames a file onto one that hasn't moved yet.
            for &seq in existing.iter().rev() {
                fs::rename(Self::file_path(dir, seq), Self::file_path(dir, seq + reserve))?;
            }
        }

        let mut seq = 0u64;
        let mut current_size = 0u64;
        for block in blocks {
            let block_len = HEADER_LEN as u64 + block.payload.len() as u64;
            if current_size > 0 && current_size + block_len > rotation_bytes {
                seq += 1;
                current_size = 0;
            }
            let header = BlockHeader {
                kind: block.kind,
                flags: if block.record_count < block.kind.records_per_sector() { FLAG_PARTIAL } else { 0 },
                sensor_id: block.sensor_id,
                record_count: block.record_count,
                first_utc_ms: block.first_utc_ms,
                last_utc_ms: block.last_utc_ms,
                payload_bytes: block.payload.len() as u32,
                crc32: crc32fast::hash(&block.payload),
            };
            let mut file = OpenOptions::new().create(true).append(true).open(Self::file_path(dir, seq))?;
            file.write_all(&header.to_bytes())?;
            file.write_all(&block.payload)?;
            current_size += block_len;
        }

        self.enforce_byte_cap(dir, byte_cap)?;
        Ok(())
    }

    /// Delete oldest files until `dir`'s total size is at or under
    /// `byte_cap`. Always leaves at least one file behind, even if that
    /// file alone exceeds the cap.
    pub fn enforce_byte_cap(&self, dir: &Path, byte_cap: u64) -> Result<(), DiskError> {
        let mut seqs = self.list_sequences(dir)?;
        loop {
            let total: u64 = seqs
                .iter()
                .map(|s| fs::metadata(Self::file_path(dir, *s)).map(|m| m.len()).unwrap_or(0))
                .sum();
            if total <= byte_cap || seqs.len() <= 1 {
                break;
            }
            let oldest = seqs.remove(0);
            fs::remove_file(Self::file_path(dir, oldest))?;
        }
        Ok(())
    }

    /// Delete whole files up to and including `through_seq` — used by
    /// `ack_all_pending` once a consumer's cursor has moved past them
    /// entirely.
    pub fn delete_files_through(&self, dir: &Path, through_seq: u64) -> io::Result<()> {
        for seq in self.list_sequences(dir)? {
            if seq <= through_seq {
                let _ = fs::remove_file(Self::file_path(dir, seq));
            }
        }
        Ok(())
    }

    /// Resolve `pos` to the block it names, normalizing `seq` if it was
    /// unset and skipping over files removed by eviction since `pos` was
    /// last recorded. Returns `None` once there is nothing left to read.
    pub fn current_block(
        &self,
        dir: &Path,
        mut pos: DiskPos,
    ) -> Result<Option<(BlockHeader, SectorBytes, DiskPos)>, DiskError> {
        loop {
            let seq = match pos.seq {
                Some(s) => s,
                None => match self.list_sequences(dir)?.into_iter().next() {
                    Some(s) => {
                        pos = DiskPos { seq: Some(s), block_offset: 0, record_index: 0 };
                        s
                    }
                    None => return Ok(None),
                },
            };
            let path = Self::file_path(dir, seq);
            let mut file = match File::open(&path) {
                Ok(f) => f,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    match self.list_sequences(dir)?.into_iter().find(|&s| s > seq) {
                        Some(next) => {
                            pos = DiskPos { seq: Some(next), block_offset: 0, record_index: 0 };
                            continue;
                        }
                        None => return Ok(None),
                    }
                }
                Err(e) => return Err(e.into()),
            };
            file.seek(SeekFrom::Start(pos.block_offset))?;
            let mut hdr_buf = [0u8; HEADER_LEN];
            match file.read_exact(&mut hdr_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    match self.list_sequences(dir)?.into_iter().find(|&s| s > seq) {
                        Some(next) => {
                            pos = DiskPos { seq: Some(next), block_offset: 0, record_index: 0 };
                            continue;
                        }
                        None => return Ok(None),
                    }
                }
                Err(e) => return Err(e.into()),
            }

            let label = path.display().to_string();
            let header = BlockHeader::parse(&hdr_buf, &label)?;
            let mut payload = [0u8; SECTOR_SIZE];
            file.read_exact(&mut payload[..header.payload_bytes as usize])?;

            if header.record_count == 0 || pos.record_index >= header.record_count {
                pos.block_offset += HEADER_LEN as u64 + header.payload_bytes as u64;
                pos.record_index = 0;
                continue;
            }
            return Ok(Some((header, payload, pos)));
        }
    }

    /// Advance `pos` past the current record of a block whose header has
    /// already been read (`header.record_count`), crossing to the next
    /// block within the same file when the block is exhausted.
    pub fn advance(pos: DiskPos, header: &BlockHeader) -> DiskPos {
        let next_index = pos.record_index + 1;
        if next_index < header.record_count {
            DiskPos { record_index: next_index, ..pos }
        } else {
            DiskPos {
                seq: pos.seq,
                block_offset: pos.block_offset + HEADER_LEN as u64 + header.payload_bytes as u64,
                record_index: 0,
            }
        }
    }

    /// Move a corrupt file aside during startup recovery (§4.8). The
    /// whole file is quarantined, never an individual block.
    pub fn quarantine_file(
        &self,
        dir: &Path,
        seq: u64,
        consumer: ConsumerId,
        sensor: SensorId,
    ) -> io::Result<()> {
        let quarantine = self.quarantine_dir();
        fs::create_dir_all(&quarantine)?;
        let src = Self::file_path(dir, seq);
        let dst = quarantine.join(format!("consumer_{consumer}_sensor_{sensor}_data_{seq:010}.bin"));
        fs::rename(src, dst)
    }

    /// `fsync` every file in `dir`, used by the shutdown flush (§4.8
    /// step 5).
    pub fn fsync_dir(&self, dir: &Path) -> io::Result<()> {
        for seq in self.list_sequences(dir)? {
            if let Ok(file) = File::open(Self::file_path(dir, seq)) {
                file.sync_all()?;
            }
        }
        Ok(())
    }

    /// Remove every file under `dir`, used when shutdown is configured
    /// to erase disk state rather than retain it for the next boot.
    pub fn erase_dir(&self, dir: &Path) -> io::Result<()> {
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn payload_with(byte0: u8) -> SectorBytes {
        let mut b = [0u8; SECTOR_SIZE];
        b[0] = byte0;
        b
    }

    #[test]
    fn append_then_read_round_trips() {
        let tmp = tempdir().unwrap();
        let store = DiskStore::new(tmp.path());
        let dir = store.sensor_dir(0, 7);
        store
            .append_block(&dir, SensorKind::Tsd, 7, 6, 1_000, 1_005, &payload_with(1), 64 * 1024, 1024 * 1024)
            .unwrap();
        store
            .append_block(&dir, SensorKind::Tsd, 7, 6, 1_006, 1_011, &payload_with(2), 64 * 1024, 1024 * 1024)
            .unwrap();

        let (h1, p1, pos1) = store.current_block(&dir, DiskPos::START).unwrap().unwrap();
        assert_eq!(h1.first_utc_ms, 1_000);
        assert_eq!(p1[0], 1);
        let pos1_next = DiskStore::advance(pos1, &h1);

        // first block has 6 records; after stepping through all of them
        // the cursor should land on the second block.
        let mut pos = pos1_next;
        for _ in 1..6 {
            let (h, _, p) = store.current_block(&dir, pos).unwrap().unwrap();
            pos = DiskStore::advance(p, &h);
        }
        let (h2, p2, _) = store.current_block(&dir, pos).unwrap().unwrap();
        assert_eq!(h2.first_utc_ms, 1_006);
        assert_eq!(p2[0], 2);
    }

    #[test]
    fn rotation_starts_new_file_past_threshold() {
        let tmp = tempdir().unwrap();
        let store = DiskStore::new(tmp.path());
        let dir = store.sensor_dir(1, 3);
        let rotation = (HEADER_LEN + SECTOR_SIZE) as u64; // exactly one block per file
        for i in 0..3u8 {
            store
                .append_block(&dir, SensorKind::Evt, 3, 2, 0, 0, &payload_with(i), rotation, 1024 * 1024)
                .unwrap();
        }
        let seqs = store.list_sequences(&dir).unwrap();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn byte_cap_evicts_oldest_first() {
        let tmp = tempdir().unwrap();
        let store = DiskStore::new(tmp.path());
        let dir = store.sensor_dir(0, 9);
        let block_len = (HEADER_LEN + SECTOR_SIZE) as u64;
        let rotation = block_len; // one block per file
        let cap = block_len * 2; // room for at most two files
        for i in 0..4u8 {
            store
                .append_block(&dir, SensorKind::Evt, 9, 2, 0, 0, &payload_with(i), rotation, cap)
                .unwrap();
        }
        let seqs = store.list_sequences(&dir).unwrap();
        assert_eq!(seqs, vec![2, 3]);
    }

    #[test]
    fn missing_file_is_treated_as_drained_when_no_later_seq() {
        let tmp = tempdir().unwrap();
        let store = DiskStore::new(tmp.path());
        let dir = store.sensor_dir(0, 5);
        assert!(store.current_block(&dir, DiskPos::START).unwrap().is_none());
    }

    #[test]
    fn prepend_inserts_ahead_of_existing_files() {
        let tmp = tempdir().unwrap();
        let store = DiskStore::new(tmp.path());
        let dir = store.sensor_dir(0, 7);
        store
            .append_block(&dir, SensorKind::Tsd, 7, 6, 12_000, 12_005, &payload_with(9), 64 * 1024, 1024 * 1024)
            .unwrap();

        let older = vec![
            PendingBlock { kind: SensorKind::Tsd, sensor_id: 7, record_count: 6, first_utc_ms: 0, last_utc_ms: 5, payload: payload_with(1) },
            PendingBlock { kind: SensorKind::Tsd, sensor_id: 7, record_count: 6, first_utc_ms: 6_000, last_utc_ms: 6_005, payload: payload_with(2) },
        ];
        store.prepend_blocks(&dir, &older, 64 * 1024, 1024 * 1024).unwrap();

        let (h1, p1, pos1) = store.current_block(&dir, DiskPos::START).unwrap().unwrap();
        assert_eq!(h1.first_utc_ms, 0);
        assert_eq!(p1[0], 1);
        let pos2 = DiskStore::advance(pos1, &h1);
        let (h2, p2, pos2) = store.current_block(&dir, pos2).unwrap().unwrap();
        assert_eq!(h2.first_utc_ms, 6_000);
        assert_eq!(p2[0], 2);
        let pos3 = DiskStore::advance(pos2, &h2);
        let (h3, p3, _) = store.current_block(&dir, pos3).unwrap().unwrap();
        assert_eq!(h3.first_utc_ms, 12_000);
        assert_eq!(p3[0], 9);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let tmp = tempdir().unwrap();
        let store = DiskStore::new(tmp.path());
        let dir = store.sensor_dir(0, 2);
        fs::create_dir_all(&dir).unwrap();
        let path = DiskStore::file_path(&dir, 0);
        let mut f = File::create(&path).unwrap();
        f.write_all(&[0u8; HEADER_LEN + SECTOR_SIZE]).unwrap();
        let err = store.current_block(&dir, DiskPos::START).unwrap_err();
        assert!(matches!(err, DiskError::BadMagic { .. }));
    }
}
