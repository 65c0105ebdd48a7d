//! Durable file-backed measurement queue.
//!
//! Every entry is stored as one JSON document per line in an append-only
//! data file. A small head file next to it records the byte offset of the
//! first unacknowledged line, so acknowledging a batch never touches the
//! data file. The consumed prefix is dropped when the queue runs empty and
//! whenever the backlog is reopened.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use kostal_common::Measurement;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};

#[derive(Debug)]
struct Entry {
    measurement: Measurement,
    /// Byte offset just past this entry's line in the data file.
    end: u64,
}

#[derive(Debug)]
struct Appender {
    file: File,
    /// Current length of the data file.
    len: u64,
}

/// FIFO backlog of measurements not yet acknowledged by the primary target.
///
/// Lock order is `appender` before `entries`. `push` only ever holds them
/// for one append, and `ack` only takes `appender` to truncate an empty file.
#[derive(Debug)]
pub struct Backlog {
    path: PathBuf,
    head_path: PathBuf,
    appender: Mutex<Appender>,
    entries: Mutex<VecDeque<Entry>>,
    /// Serializes acknowledgements.
    acking: Mutex<()>,
    /// Mirror of `entries.len()` for lock-free reads.
    len: AtomicUsize,
}

impl Backlog {
    /// Open the backlog at `path`, reloading entries left by a previous run.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let head_path = path.with_extension("head");

        let head = read_head(&head_path);
        let mut loaded = if path.exists() {
            load_entries(&path, head)?
        } else {
            Loaded {
                needs_compaction: true,
                ..Loaded::default()
            }
        };

        // Start every run from a compact file with no partial lines
        if loaded.needs_compaction {
            let (buf, ends) = encode(loaded.entries.iter().map(|entry| &entry.measurement))?;
            write_atomic(&path, &buf)?;
            write_head(&head_path, 0)?;
            for (entry, end) in loaded.entries.iter_mut().zip(ends) {
                entry.end = end;
            }
        }
        let entries = loaded.entries;

        if !entries.is_empty() {
            info!(
                path = %path.display(),
                entries = entries.len(),
                "Reloaded measurement backlog"
            );
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| BridgeError::backlog(&path, e))?;
        let file_len = file
            .metadata()
            .map_err(|e| BridgeError::backlog(&path, e))?
            .len();

        let len = AtomicUsize::new(entries.len());
        Ok(Self {
            path,
            head_path,
            appender: Mutex::new(Appender {
                file,
                len: file_len,
            }),
            entries: Mutex::new(entries),
            acking: Mutex::new(()),
            len,
        })
    }

    /// Path of the data file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a measurement durably.
    ///
    /// A failed append is truncated away so the next line starts clean.
    pub fn push(&self, measurement: &Measurement) -> Result<()> {
        let mut line = measurement.to_json_line()?;
        line.push('\n');

        let mut appender = self.appender.lock();
        let Appender { file, len } = &mut *appender;
        let start = *len;
        if let Err(e) = file.write_all(line.as_bytes()).and_then(|_| file.sync_data()) {
            if let Err(truncate) = file.set_len(start) {
                warn!(
                    path = %self.path.display(),
                    error = %truncate,
                    "Failed to truncate partial backlog entry"
                );
            }
            return Err(BridgeError::backlog(&self.path, e));
        }
        *len = start + line.len() as u64;

        let mut entries = self.entries.lock();
        entries.push_back(Entry {
            measurement: measurement.clone(),
            end: *len,
        });
        self.len.store(entries.len(), Ordering::Relaxed);
        Ok(())
    }

    /// Copy up to `max` entries from the head without removing them.
    pub fn peek(&self, max: usize) -> Vec<Measurement> {
        self.entries
            .lock()
            .iter()
            .take(max)
            .map(|entry| entry.measurement.clone())
            .collect()
    }

    /// Remove `count` entries from the head.
    ///
    /// The new head offset is persisted before the in-memory queue changes,
    /// so a failed write leaves both untouched.
    pub fn ack(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Ok(());
        }

        let _acking = self.acking.lock();
        let (count, head) = {
            let entries = self.entries.lock();
            let count = count.min(entries.len());
            match count.checked_sub(1).and_then(|last| entries.get(last)) {
                Some(entry) => (count, entry.end),
                None => return Ok(()),
            }
        };

        write_head(&self.head_path, head)?;

        let drained = {
            let mut entries = self.entries.lock();
            entries.drain(..count);
            self.len.store(entries.len(), Ordering::Relaxed);
            entries.is_empty()
        };

        if drained {
            self.truncate_if_empty()?;
        }
        Ok(())
    }

    /// Drop the consumed prefix once every entry is acknowledged.
    fn truncate_if_empty(&self) -> Result<()> {
        let mut appender = self.appender.lock();
        if !self.entries.lock().is_empty() {
            return Ok(());
        }

        let Appender { file, len } = &mut *appender;
        file.set_len(0)
            .and_then(|_| file.sync_data())
            .map_err(|e| BridgeError::backlog(&self.path, e))?;
        *len = 0;
        write_head(&self.head_path, 0)?;
        debug!(path = %self.path.display(), "Backlog empty, data file truncated");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Loaded {
    entries: VecDeque<Entry>,
    /// Set when the file holds a consumed prefix, malformed lines or a
    /// partial trailing line.
    needs_compaction: bool,
}

fn load_entries(path: &Path, head: u64) -> Result<Loaded> {
    let bytes = fs::read(path).map_err(|e| BridgeError::backlog(path, e))?;
    let mut loaded = Loaded::default();

    let start = match usize::try_from(head) {
        Ok(head) if head <= bytes.len() => head,
        _ => {
            warn!(
                path = %path.display(),
                head,
                len = bytes.len(),
                "Backlog head beyond end of file, reading from start"
            );
            0
        }
    };
    loaded.needs_compaction = start > 0;

    let mut offset = start;
    let mut index = 0;
    while offset < bytes.len() {
        index += 1;
        let Some(newline) = bytes[offset..].iter().position(|&b| b == b'\n') else {
            warn!(
                path = %path.display(),
                line = index,
                "Dropping partial backlog entry"
            );
            loaded.needs_compaction = true;
            break;
        };
        let line = &bytes[offset..offset + newline];
        offset += newline + 1;

        if line.iter().all(u8::is_ascii_whitespace) {
            loaded.needs_compaction = true;
            continue;
        }
        let parsed = std::str::from_utf8(line)
            .map_err(|e| e.to_string())
            .and_then(|line| Measurement::from_json_line(line).map_err(|e| e.to_string()));
        match parsed {
            Ok(measurement) => loaded.entries.push_back(Entry {
                measurement,
                end: offset as u64,
            }),
            Err(error) => {
                warn!(
                    path = %path.display(),
                    line = index,
                    error = %error,
                    "Skipping malformed backlog entry"
                );
                loaded.needs_compaction = true;
            }
        }
    }

    Ok(loaded)
}

/// Encode measurements as JSON lines, returning the buffer and the end
/// offset of every line.
fn encode<'a>(measurements: impl Iterator<Item = &'a Measurement>) -> Result<(Vec<u8>, Vec<u64>)> {
    let mut buf = Vec::new();
    let mut ends = Vec::new();
    for measurement in measurements {
        buf.extend_from_slice(measurement.to_json_line()?.as_bytes());
        buf.push(b'\n');
        ends.push(buf.len() as u64);
    }
    Ok((buf, ends))
}

fn read_head(path: &Path) -> u64 {
    match fs::read_to_string(path) {
        Ok(text) => text.trim().parse().unwrap_or_else(|_| {
            warn!(path = %path.display(), "Invalid backlog head, reading from start");
            0
        }),
        Err(_) => 0,
    }
}

fn write_head(path: &Path, head: u64) -> Result<()> {
    write_atomic(path, head.to_string().as_bytes())
}

/// Write through a temporary file and rename it over `path`.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let mut file = File::create(&tmp).map_err(|e| BridgeError::backlog(&tmp, e))?;
    file.write_all(contents)
        .and_then(|_| file.sync_data())
        .map_err(|e| BridgeError::backlog(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| BridgeError::backlog(path, e))?;
    Ok(())
}
