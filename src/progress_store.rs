use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::formats::{ProgressItem, ProgressRecord};
use crate::report::Report;

pub const PROGRESS_FILE_NAME: &str = "progress.jsonl";

/// Mutable state of one run. Items live in an arena in disposition order and
/// are looked up by uuid through `by_uuid`.
#[derive(Debug)]
pub struct RunState {
    pub total_entries: usize,
    pub completed_count: usize,
    pub resumed: bool,
    pub report: Report,
    items: Vec<ProgressItem>,
    by_uuid: HashMap<String, usize>,
}

impl RunState {
    pub fn new(total_entries: usize) -> Self {
        Self {
            total_entries,
            completed_count: 0,
            resumed: false,
            report: Report::default(),
            items: Vec::new(),
            by_uuid: HashMap::new(),
        }
    }

    pub fn get(&self, uuid: &str) -> Option<&ProgressItem> {
        self.by_uuid.get(uuid).map(|&slot| &self.items[slot])
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.by_uuid.contains_key(uuid)
    }

    pub fn items(&self) -> &[ProgressItem] {
        &self.items
    }

    pub fn is_complete(&self) -> bool {
        self.completed_count == self.total_entries
    }

    /// Returns `false` and leaves the state untouched when the uuid is known.
    fn register(&mut self, item: ProgressItem) -> bool {
        if self.by_uuid.contains_key(&item.uuid) {
            return false;
        }
        self.by_uuid.insert(item.uuid.clone(), self.items.len());
        self.items.push(item);
        self.completed_count += 1;
        true
    }
}

/// Append-only JSON Lines log of disposed entries under the book root.
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    file: File,
}

impl ProgressStore {
    /// Opens (or creates) the progress log and replays it into a fresh
    /// [`RunState`]. A torn trailing record left by a crash is cut off.
    pub fn open(book_root: &Path, total_entries: usize) -> anyhow::Result<(Self, RunState)> {
        let path = book_root.join(PROGRESS_FILE_NAME);
        let mut state = RunState::new(total_entries);

        let existing = read_bytes(&path)?;
        let replay = match existing.as_deref() {
            Some(bytes) => Some(
                replay(bytes).with_context(|| format!("replay progress: {}", path.display()))?,
            ),
            None => None,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open progress log: {}", path.display()))?;

        if let Some(replay) = replay {
            state.resumed = true;
            if replay.torn {
                tracing::warn!(
                    path = %path.display(),
                    valid_len = replay.valid_len,
                    "dropping torn progress record"
                );
                file.set_len(replay.valid_len as u64)
                    .with_context(|| format!("truncate progress log: {}", path.display()))?;
            }
            if replay.needs_newline {
                file.write_all(b"\n")
                    .with_context(|| format!("terminate progress log: {}", path.display()))?;
            }
            for record in replay.records {
                let uuid = record.item.uuid.clone();
                if !state.register(record.item) {
                    tracing::warn!(%uuid, "duplicate progress record ignored");
                }
            }
            tracing::info!(
                completed = state.completed_count,
                total = state.total_entries,
                "resuming from progress log"
            );
        }

        Ok((Self { path, file }, state))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Swaps the log handle for a read-only one so every append fails.
    #[cfg(test)]
    pub(crate) fn make_read_only(&mut self) -> anyhow::Result<()> {
        self.file = File::open(&self.path)?;
        Ok(())
    }

    /// Durably records `item` before registering it in `state`.
    pub fn append(
        &mut self,
        state: &mut RunState,
        item: ProgressItem,
        success: bool,
    ) -> anyhow::Result<()> {
        if state.contains(&item.uuid) {
            anyhow::bail!("entry already recorded: {}", item.uuid);
        }

        let record = ProgressRecord {
            item,
            success,
            disposed_at: chrono::Utc::now().to_rfc3339(),
        };
        let mut line = serde_json::to_vec(&record).context("serialize progress record")?;
        line.push(b'\n');

        self.file
            .write_all(&line)
            .with_context(|| format!("append progress: {}", self.path.display()))?;
        self.file
            .flush()
            .with_context(|| format!("flush progress: {}", self.path.display()))?;
        self.file
            .sync_data()
            .with_context(|| format!("sync progress: {}", self.path.display()))?;

        state.register(record.item);
        Ok(())
    }
}

/// Reads the recorded items without opening the log for writing.
pub fn read(book_root: &Path) -> anyhow::Result<Option<Vec<ProgressRecord>>> {
    let path = book_root.join(PROGRESS_FILE_NAME);
    let Some(bytes) = read_bytes(&path)? else {
        return Ok(None);
    };
    let replay = replay(&bytes).with_context(|| format!("replay progress: {}", path.display()))?;
    Ok(Some(replay.records))
}

fn read_bytes(path: &Path) -> anyhow::Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => {
            Err(err).with_context(|| format!("read progress log: {}", path.display()))
        }
    }
}

#[derive(Debug)]
struct Replay {
    records: Vec<ProgressRecord>,
    valid_len: usize,
    torn: bool,
    needs_newline: bool,
}

fn replay(bytes: &[u8]) -> anyhow::Result<Replay> {
    let mut records = Vec::new();
    let mut offset = 0usize;
    let mut valid_len = 0usize;
    let mut torn = false;
    let mut needs_newline = false;

    while offset < bytes.len() {
        let (line, next, terminated) = match bytes[offset..].iter().position(|&b| b == b'\n') {
            Some(idx) => (&bytes[offset..offset + idx], offset + idx + 1, true),
            None => (&bytes[offset..], bytes.len(), false),
        };

        if line.iter().all(u8::is_ascii_whitespace) {
            if terminated {
                valid_len = next;
            }
            offset = next;
            continue;
        }

        match serde_json::from_slice::<ProgressRecord>(line) {
            Ok(record) => {
                records.push(record);
                valid_len = next;
                needs_newline = !terminated;
            }
            Err(_) if next >= bytes.len() => {
                torn = true;
                needs_newline = false;
                break;
            }
            Err(err) => {
                return Err(err).with_context(|| format!("malformed progress record at byte {offset}"));
            }
        }
        offset = next;
    }

    if !torn && valid_len < bytes.len() {
        torn = true;
    }

    Ok(Replay {
        records,
        valid_len,
        torn,
        needs_newline,
    })
}
