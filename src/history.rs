use std::fs::OpenOptions;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};
use std::thread;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::HistoryError;
use crate::types::{ActionKind, Frame};

pub const HISTORY_FILE: &str = "history.json";
pub const SCREENSHOT_DIR: &str = "screenshots";

/// One answered question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub id: Uuid,
    /// `"(auto)"` for auto-continuations.
    pub question: String,
    /// Capture sequence number; only unique within one agent run.
    pub frame_id: u64,
    pub frame_width: u32,
    pub frame_height: u32,
    /// PNG of the frame the answer was given for. Only persistent logs keep one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<PathBuf>,
    pub answer: Option<String>,
    pub action_kind: Option<ActionKind>,
    pub action_summary: Option<String>,
    pub reasoner_ms: u64,
    #[serde(default)]
    pub pointer_ms: Vec<u64>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryEntry {
    Turn(TurnRecord),
    Note {
        id: Uuid,
        text: String,
        recorded_at: DateTime<Utc>,
    },
}

impl HistoryEntry {
    pub fn recorded_at(&self) -> DateTime<Utc> {
        match self {
            HistoryEntry::Turn(turn) => turn.recorded_at,
            HistoryEntry::Note { recorded_at, .. } => *recorded_at,
        }
    }
}

enum WriteJob {
    Entries(Vec<HistoryEntry>),
    Screenshot { path: PathBuf, frame: Arc<Frame> },
    ClearScreenshots,
    Flush(mpsc::Sender<()>),
}

/// Background thread that applies file writes in the order they were queued.
#[derive(Debug)]
struct Writer {
    jobs: mpsc::Sender<WriteJob>,
}

impl Writer {
    fn spawn(path: PathBuf) -> Result<Self, HistoryError> {
        let (jobs, queue) = mpsc::channel();
        thread::Builder::new()
            .name("history-writer".into())
            .spawn(move || write_loop(&path, queue))?;
        Ok(Self { jobs })
    }

    fn submit(&self, job: WriteJob) {
        if self.jobs.send(job).is_err() {
            warn!("history writer stopped; change not saved");
        }
    }
}

fn write_loop(path: &Path, queue: mpsc::Receiver<WriteJob>) {
    let screenshots = screenshot_dir(path);
    while let Ok(mut job) = queue.recv() {
        // Only the newest snapshot of a run of entry updates matters.
        if let WriteJob::Entries(_) = job {
            while let Ok(next) = queue.try_recv() {
                match next {
                    WriteJob::Entries(_) => job = next,
                    other => {
                        run_job(path, &screenshots, job);
                        job = other;
                        break;
                    }
                }
            }
        }
        run_job(path, &screenshots, job);
    }
    debug!("history writer finished");
}

// A failed write must not break the guidance loop.
fn run_job(path: &Path, screenshots: &Path, job: WriteJob) {
    match job {
        WriteJob::Entries(entries) => {
            if let Err(e) = save_history(path, &entries) {
                warn!(path = %path.display(), error = %e, "failed to save history");
            }
        }
        WriteJob::Screenshot { path: file, frame } => {
            let written = std::fs::create_dir_all(screenshots).and_then(|()| std::fs::write(&file, frame.png()));
            if let Err(e) = written {
                warn!(path = %file.display(), error = %e, "failed to save screenshot");
            }
        }
        WriteJob::ClearScreenshots => {
            if screenshots.exists() {
                if let Err(e) = std::fs::remove_dir_all(screenshots) {
                    warn!(path = %screenshots.display(), error = %e, "failed to remove screenshots");
                }
            }
        }
        WriteJob::Flush(done) => {
            let _ = done.send(());
        }
    }
}

/// `screenshots/` next to the history file.
pub fn screenshot_dir(history_path: &Path) -> PathBuf {
    history_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
        .join(SCREENSHOT_DIR)
}

/// Entries newest first, optionally mirrored to a JSON file after every change.
///
/// Persistent logs hand their writes to a background thread so callers on the runtime never block
/// on the disk. Dropping the log waits for queued writes.
#[derive(Debug, Default)]
pub struct HistoryLog {
    entries: Vec<HistoryEntry>,
    path: Option<PathBuf>,
    writer: Option<Writer>,
}

impl HistoryLog {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens the log at `path`, starting empty if the file does not exist yet.
    pub fn persistent(path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let path = path.into();
        let entries = load_history(&path)?;
        let writer = Writer::spawn(path.clone())?;
        Ok(Self {
            entries,
            path: Some(path),
            writer: Some(writer),
        })
    }

    /// `<data dir>/screen-guide/history.json`, or the working directory when the platform has none.
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .map(|dir| dir.join("screen-guide"))
            .unwrap_or_default()
            .join(HISTORY_FILE)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records a turn, saving `frame` alongside it when the log is persistent.
    pub fn record_turn(&mut self, mut turn: TurnRecord, frame: Option<Arc<Frame>>) {
        if let (Some(path), Some(writer), Some(frame)) = (&self.path, &self.writer, frame) {
            if !frame.png().is_empty() {
                let file = screenshot_dir(path).join(format!("{}.png", turn.id));
                turn.screenshot = Some(file.clone());
                writer.submit(WriteJob::Screenshot { path: file, frame });
            }
        }
        self.entries.insert(0, HistoryEntry::Turn(turn));
        self.persist();
    }

    pub fn note(&mut self, text: &str) {
        self.entries.insert(
            0,
            HistoryEntry::Note {
                id: Uuid::new_v4(),
                text: text.to_string(),
                recorded_at: Utc::now(),
            },
        );
        self.persist();
    }

    /// Drops every entry and the saved screenshots.
    pub fn clear(&mut self) {
        self.entries.clear();
        if let Some(writer) = &self.writer {
            writer.submit(WriteJob::ClearScreenshots);
        }
        self.persist();
    }

    /// Blocks until every queued write has reached the disk.
    pub fn flush(&self) {
        let Some(writer) = &self.writer else {
            return;
        };
        let (done, wait) = mpsc::channel();
        writer.submit(WriteJob::Flush(done));
        let _ = wait.recv();
    }

    fn persist(&self) {
        if let Some(writer) = &self.writer {
            writer.submit(WriteJob::Entries(self.entries.clone()));
        }
    }
}

impl Drop for HistoryLog {
    fn drop(&mut self) {
        self.flush();
    }
}

pub fn load_history(path: &Path) -> Result<Vec<HistoryEntry>, HistoryError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let entries: Vec<HistoryEntry> = serde_json::from_reader(reader)?;
    Ok(entries)
}

pub fn save_history(path: &Path, entries: &[HistoryEntry]) -> Result<(), HistoryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;

    serde_json::to_writer_pretty(file, entries)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(question: &str) -> TurnRecord {
        TurnRecord {
            id: Uuid::new_v4(),
            question: question.to_string(),
            frame_id: 3,
            frame_width: 1280,
            frame_height: 720,
            screenshot: None,
            answer: Some("Click File".into()),
            action_kind: Some(ActionKind::Click),
            action_summary: Some("Click the File menu".into()),
            reasoner_ms: 850,
            pointer_ms: vec![1200],
            recorded_at: Utc::now(),
        }
    }

    fn scratch_file(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("screen-guide-{}", Uuid::new_v4()))
            .join(name)
    }

    #[test]
    fn newest_entry_comes_first() {
        let mut log = HistoryLog::in_memory();
        log.record_turn(turn("How do I save?"), None);
        log.note("User Completed The Action");
        assert_eq!(log.len(), 2);
        assert!(matches!(log.entries()[0], HistoryEntry::Note { .. }));
        assert!(matches!(&log.entries()[1], HistoryEntry::Turn(t) if t.question == "How do I save?"));
    }

    #[test]
    fn persistent_log_survives_reopen() {
        let path = scratch_file("history.json");
        {
            let mut log = HistoryLog::persistent(&path).unwrap();
            assert!(log.is_empty());
            log.record_turn(turn("Where is the export button?"), None);
            log.note("User input: never mind");
        }

        let reopened = HistoryLog::persistent(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.path(), Some(path.as_path()));
        match &reopened.entries()[1] {
            HistoryEntry::Turn(t) => {
                assert_eq!(t.action_kind, Some(ActionKind::Click));
                assert_eq!(t.pointer_ms, vec![1200]);
            }
            other => panic!("expected a turn, got {other:?}"),
        }

        let mut cleared = reopened;
        cleared.clear();
        cleared.flush();
        assert!(load_history(&path).unwrap().is_empty());

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn turn_keeps_its_screenshot_until_cleared() {
        let path = scratch_file("history.json");
        let png = vec![0x89, b'P', b'N', b'G', 1, 2, 3];
        let frame = Arc::new(Frame::new(9, 640, 480, png.clone()));

        let mut log = HistoryLog::persistent(&path).unwrap();
        log.record_turn(turn("Open the settings"), Some(frame));
        log.flush();

        let shot = match &log.entries()[0] {
            HistoryEntry::Turn(t) => t.screenshot.clone().expect("screenshot path"),
            other => panic!("expected a turn, got {other:?}"),
        };
        assert!(shot.starts_with(screenshot_dir(&path)));
        assert_eq!(std::fs::read(&shot).unwrap(), png);
        match &load_history(&path).unwrap()[0] {
            HistoryEntry::Turn(t) => assert_eq!(t.screenshot.as_ref(), Some(&shot)),
            other => panic!("expected a turn, got {other:?}"),
        }

        log.clear();
        log.flush();
        assert!(!shot.exists());
        assert!(load_history(&path).unwrap().is_empty());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn in_memory_turns_have_no_screenshot() {
        let mut log = HistoryLog::in_memory();
        let frame = Arc::new(Frame::new(1, 10, 10, vec![1, 2, 3]));
        log.record_turn(turn("Where is Wi-Fi?"), Some(frame));
        assert!(matches!(&log.entries()[0], HistoryEntry::Turn(t) if t.screenshot.is_none()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn writes_on_the_runtime_land_in_order() {
        let path = scratch_file("history.json");
        let mut log = HistoryLog::persistent(&path).unwrap();
        for n in 0..20 {
            log.note(&format!("note {n}"));
        }
        log.record_turn(turn("last"), None);
        let written = tokio::task::spawn_blocking(move || {
            log.flush();
            load_history(&path).map(|entries| (entries, path))
        })
        .await
        .unwrap();
        let (entries, path) = written.unwrap();

        assert_eq!(entries.len(), 21);
        assert!(matches!(&entries[0], HistoryEntry::Turn(t) if t.question == "last"));
        assert!(matches!(&entries[20], HistoryEntry::Note { text, .. } if text == "note 0"));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let path = scratch_file("broken.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            HistoryLog::persistent(&path),
            Err(HistoryError::Json(_))
        ));
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn entries_are_tagged_by_kind() {
        let json = serde_json::to_value(HistoryEntry::Turn(turn("Save"))).unwrap();
        assert!(json.get("screenshot").is_none());

        let entry = HistoryEntry::Note {
            id: Uuid::nil(),
            text: "hello".into(),
            recorded_at: Utc::now(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["kind"], "note");
        assert_eq!(json["text"], "hello");
    }
}
