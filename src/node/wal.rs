//! Write-Ahead Log
//!
//! Append-only record of every mutation, synced to stable storage before the
//! in-memory map is touched. On boot the log is replayed in file order to
//! rebuild the map.
//!
//! ## File Format
//!
//! A sequence of frames:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ LEN: u32 LE (payload length)                 │
//! ├──────────────────────────────────────────────┤
//! │ CRC32: u32 LE (over the payload)             │
//! ├──────────────────────────────────────────────┤
//! │ PAYLOAD: bincode(WalRecord)                  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! A frame whose checksum or decoding fails is skipped and counted; replay
//! continues at the next frame. An incomplete frame at the end of the file
//! (torn write during a crash) ends replay.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use crc::{Crc, CRC_32_ISO_HDLC};
use serde::{Deserialize, Serialize};

use super::store::Entry;

const WAL_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Upper bound on a single record; a length field beyond this is corruption,
/// not data, and replay cannot resynchronize past it.
const MAX_RECORD_BYTES: u32 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalOp {
    Set,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalRecord {
    pub op: WalOp,
    pub key: String,
    pub value: Vec<u8>,
    /// Content type presented with the SET, if any.
    pub content_type: Option<String>,
    /// Time-to-live in nanoseconds at write time; `None` for no expiry and
    /// for deletes.
    pub ttl_ns: Option<u64>,
    pub timestamp_unix_ns: u64,
}

impl WalRecord {
    pub fn set(
        key: &str,
        value: Vec<u8>,
        content_type: Option<String>,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            op: WalOp::Set,
            key: key.to_string(),
            value,
            content_type,
            ttl_ns: ttl.map(|ttl| ttl.as_nanos() as u64),
            timestamp_unix_ns: unix_now_ns(),
        }
    }

    pub fn delete(key: &str) -> Self {
        Self {
            op: WalOp::Delete,
            key: key.to_string(),
            value: Vec::new(),
            content_type: None,
            ttl_ns: None,
            timestamp_unix_ns: unix_now_ns(),
        }
    }

    pub fn timestamp(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.timestamp_unix_ns)
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ns.map(Duration::from_nanos)
    }
}

/// Result of replaying a WAL file.
pub struct ReplaySummary {
    pub records: Vec<WalRecord>,
    /// Frames that were skipped because of a checksum or decode failure.
    pub corrupt_records: u64,
}

/// Append handle to a node's WAL file.
pub struct Wal {
    file: File,
    path: PathBuf,
}

impl Wal {
    /// Opens the WAL for appending, creating it if absent.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open WAL file {}", path.display()))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Appends a record and forces it to stable storage. On failure the
    /// caller must not apply the mutation to the in-memory map.
    pub fn append(&mut self, record: &WalRecord) -> Result<()> {
        let frame = encode_frame(record)?;
        self.file
            .write_all(&frame)
            .context("failed to write WAL frame")?;
        self.file.sync_data().context("failed to sync WAL")?;
        Ok(())
    }

    /// Reads every decodable record from the file in order. A missing file
    /// is an empty log, not an error.
    pub fn replay(path: &Path) -> Result<ReplaySummary> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(ReplaySummary {
                    records: Vec::new(),
                    corrupt_records: 0,
                });
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to open WAL for replay: {}", path.display()));
            }
        };

        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut corrupt_records = 0u64;

        loop {
            let mut header = [0u8; 8];
            match reader.read_exact(&mut header) {
                Ok(()) => {}
                // Clean end of log, or a torn header: either way replay ends.
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e).context("failed to read WAL frame header"),
            }

            let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let checksum = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

            if len == 0 || len > MAX_RECORD_BYTES {
                // A corrupted length field; there is no way to find the next
                // frame boundary, so replay stops here.
                corrupt_records += 1;
                break;
            }

            let mut payload = vec![0u8; len as usize];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    corrupt_records += 1;
                    break;
                }
                Err(e) => return Err(e).context("failed to read WAL frame payload"),
            }

            if WAL_CRC.checksum(&payload) != checksum {
                corrupt_records += 1;
                continue;
            }

            match bincode::deserialize::<WalRecord>(&payload) {
                Ok(record) => records.push(record),
                Err(_) => corrupt_records += 1,
            }
        }

        Ok(ReplaySummary {
            records,
            corrupt_records,
        })
    }

    /// Size of the log file in bytes.
    pub fn size(&self) -> u64 {
        std::fs::metadata(&self.path)
            .map(|meta| meta.len())
            .unwrap_or(0)
    }

    /// Rewrites the log from a snapshot of live entries: each entry becomes
    /// a fresh SET record stamped now with its remaining TTL, the new file
    /// atomically replaces the old one, and the handle reopens for append.
    ///
    /// The caller serializes compaction with mutations.
    pub fn compact(&mut self, entries: &[Entry]) -> Result<()> {
        let tmp_path = self.path.with_extension("log.tmp");
        let mut tmp = File::create(&tmp_path)
            .with_context(|| format!("failed to create {}", tmp_path.display()))?;

        let now = SystemTime::now();
        let now_ns = unix_now_ns();
        for entry in entries {
            let record = WalRecord {
                op: WalOp::Set,
                key: entry.key.clone(),
                value: entry.value.clone(),
                content_type: entry.content_type.clone(),
                ttl_ns: entry
                    .remaining_ttl(now)
                    .map(|remaining| remaining.as_nanos() as u64),
                timestamp_unix_ns: now_ns,
            };
            tmp.write_all(&encode_frame(&record)?)
                .context("failed to write compacted WAL frame")?;
        }
        tmp.sync_all().context("failed to sync compacted WAL")?;
        drop(tmp);

        std::fs::rename(&tmp_path, &self.path).context("failed to swap compacted WAL")?;

        self.file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .context("failed to reopen WAL after compaction")?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn encode_frame(record: &WalRecord) -> Result<Vec<u8>> {
    let payload = bincode::serialize(record).context("failed to encode WAL record")?;
    let mut frame = Vec::with_capacity(8 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&WAL_CRC.checksum(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

fn unix_now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
