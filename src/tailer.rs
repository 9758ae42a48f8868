/// Tails the NWN client log, emitting complete new lines as they are written.
///
/// Uses the `notify` crate to wake up on file modifications and a plain
/// interval as a fallback (some platforms and network drives never deliver
/// events), then reads from the last known byte offset.
///
/// Tailing starts at end-of-file: history already in the log is never
/// replayed. A trailing line without its newline is held back until the
/// client finishes writing it.
///
/// Rotation handling: the client starts a fresh nwclientLogN.txt each session
/// and may truncate an existing one. If the file shrank we restart from
/// byte 0; if a newer log shows up in the directory we follow it from its
/// start. Switching back to a log already seen resumes where it was left.
use crate::{
    config::{is_nwn_log_file, LogSource},
    error::TrackerError,
};
use anyhow::Result;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

// ---------------------------------------------------------------------------
// Stream status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StreamStatus {
    /// No log file found yet.
    #[default]
    Waiting,
    Following { path: PathBuf },
    /// Last read failed; retried on the next poll.
    Stalled { path: PathBuf, reason: String },
}

// ---------------------------------------------------------------------------
// Single-file reader
// ---------------------------------------------------------------------------

pub struct TailerState {
    path:     PathBuf,
    position: u64,
    /// Bytes after the last newline, waiting for the rest of their line.
    partial:  Vec<u8>,
}

impl TailerState {
    /// Follow `path` from its current end; existing content is skipped.
    pub fn at_end(path: PathBuf) -> Self {
        let position = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        Self::resume(path, position)
    }

    /// Follow `path` from byte 0 (a log that appeared after we started).
    pub fn from_start(path: PathBuf) -> Self {
        Self::resume(path, 0)
    }

    /// Follow `path` from a byte offset recorded earlier by `offset`.
    pub fn resume(path: PathBuf, position: u64) -> Self {
        Self { path, position, partial: Vec::new() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start of the first line not yet delivered; resuming here loses nothing.
    pub fn offset(&self) -> u64 {
        self.position.saturating_sub(self.partial.len() as u64)
    }

    /// Complete lines appended since the last call, in file order.
    pub fn read_new_lines(&mut self) -> Result<Vec<String>, TrackerError> {
        let read_err = |source| TrackerError::ReadLog { path: self.path.clone(), source };

        let file_len = std::fs::metadata(&self.path).map_err(read_err)?.len();

        // Truncation: file shrank since our last read
        if file_len < self.position {
            tracing::info!("Log truncated, restarting from byte 0: {:?}", self.path);
            self.position = 0;
            self.partial.clear();
        }
        if file_len == self.position {
            return Ok(Vec::new());
        }

        let mut file = File::open(&self.path).map_err(read_err)?;
        file.seek(SeekFrom::Start(self.position)).map_err(read_err)?;
        let mut buf = Vec::with_capacity((file_len - self.position) as usize);
        let read = file.read_to_end(&mut buf).map_err(read_err)?;
        self.position += read as u64;
        self.partial.extend_from_slice(&buf);

        let mut lines = Vec::new();
        while let Some(idx) = self.partial.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.partial.drain(..=idx).collect();
            // The client writes Latin-1 on some locales; never fail on bad bytes.
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            if !line.is_empty() {
                lines.push(line.to_owned());
            }
        }
        Ok(lines)
    }
}

/// Where each log should be read from if the tailer (re)visits it.
///
/// Logs present at startup are known at their end, so their history is never
/// replayed; a log left for a newer one keeps the offset it was left at. A log
/// with no entry appeared after startup and is read from byte 0.
#[derive(Debug, Default)]
pub struct Offsets(HashMap<PathBuf, u64>);

impl Offsets {
    pub fn at_startup(source: &LogSource) -> Self {
        let paths: Vec<PathBuf> = match source {
            LogSource::File(path) => vec![path.clone()],
            LogSource::Directory(dir) => std::fs::read_dir(dir)
                .map(|entries| {
                    entries
                        .flatten()
                        .filter(|e| is_nwn_log_file(&e.file_name().to_string_lossy()))
                        .map(|e| e.path())
                        .collect()
                })
                .unwrap_or_default(),
        };
        Self(
            paths
                .into_iter()
                .filter_map(|p| Some((p.clone(), std::fs::metadata(&p).ok()?.len())))
                .collect(),
        )
    }

    pub fn remember(&mut self, state: &TailerState) {
        self.0.insert(state.path().to_path_buf(), state.offset());
    }

    pub fn open(&self, path: PathBuf) -> TailerState {
        match self.0.get(&path) {
            Some(&offset) => TailerState::resume(path, offset),
            None          => TailerState::from_start(path),
        }
    }
}

// ---------------------------------------------------------------------------
// Tailer task
// ---------------------------------------------------------------------------

fn publish(status_tx: &watch::Sender<StreamStatus>, status: StreamStatus) {
    status_tx.send_if_modified(|current| {
        if *current == status {
            return false;
        }
        *current = status;
        true
    });
}

fn start_watcher(
    dir: &Path,
    poll: Duration,
    fs_tx: mpsc::UnboundedSender<notify::Result<Event>>,
) -> Result<RecommendedWatcher, TrackerError> {
    let watch_err = |source| TrackerError::Watch { path: dir.to_path_buf(), source };
    let config = notify::Config::default().with_poll_interval(poll);
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = fs_tx.send(res);
        },
        config,
    )
    .map_err(watch_err)?;
    watcher.watch(dir, RecursiveMode::NonRecursive).map_err(watch_err)?;
    Ok(watcher)
}

/// Runs until the line receiver is dropped. Read failures are reported through
/// `status_tx` and retried; they never end the task.
pub async fn run(
    source:    LogSource,
    poll:      Duration,
    tx:        mpsc::Sender<String>,
    status_tx: watch::Sender<StreamStatus>,
) -> Result<()> {
    tracing::info!("Tailer starting: {:?}", source);

    let watch_dir = match &source {
        LogSource::File(path) => path.parent().unwrap_or(path.as_path()).to_path_buf(),
        LogSource::Directory(dir) => dir.clone(),
    };

    let (fs_tx, mut fs_rx) = mpsc::unbounded_channel();
    // Held for the lifetime of the task; dropping it stops the OS watch.
    let _watcher = match start_watcher(&watch_dir, poll, fs_tx) {
        Ok(w) => Some(w),
        Err(e) => {
            tracing::warn!("{}; falling back to polling", e);
            None
        }
    };

    let mut offsets = Offsets::at_startup(&source);
    let mut state = source.current_file().map(|path| offsets.open(path));
    match &state {
        Some(s) => publish(&status_tx, StreamStatus::Following { path: s.path().to_path_buf() }),
        None => tracing::info!("No log file yet, waiting"),
    }

    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            Some(res) = fs_rx.recv() => {
                if let Err(e) = res {
                    tracing::warn!("Watcher error: {}", e);
                }
            }
            _ = ticker.tick() => {}
        }

        if tx.is_closed() {
            break;
        }

        // A newer log in the directory (or the configured file appearing) takes over.
        let latest = source.current_file();
        if let Some(latest) = latest {
            if state.as_ref().map(|s| s.path()) != Some(latest.as_path()) {
                tracing::info!("Following log {:?}", latest);
                if let Some(previous) = &state {
                    offsets.remember(previous);
                }
                state = Some(offsets.open(latest));
            }
        }

        let Some(tailer) = state.as_mut() else { continue };
        match tailer.read_new_lines() {
            Ok(lines) => {
                publish(&status_tx, StreamStatus::Following { path: tailer.path().to_path_buf() });
                for line in lines {
                    if tx.send(line).await.is_err() {
                        tracing::info!("Line receiver closed, tailer exiting");
                        return Ok(());
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Tailer read error: {}", e);
                publish(&status_tx, StreamStatus::Stalled {
                    path:   tailer.path().to_path_buf(),
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::time::SystemTime;
    use tempfile::{tempdir, NamedTempFile};

    fn append(path: &Path, text: &str) {
        let mut f = OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
        f.flush().unwrap();
    }

    #[test]
    fn starts_at_end_of_file() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "history line").unwrap();
        f.flush().unwrap();

        let mut state = TailerState::at_end(f.path().to_path_buf());
        assert!(state.read_new_lines().unwrap().is_empty());

        append(f.path(), "line one\nline two\n");
        assert_eq!(state.read_new_lines().unwrap(), vec!["line one", "line two"]);
        assert!(state.read_new_lines().unwrap().is_empty());
    }

    #[test]
    fn holds_back_partial_line() {
        let f = NamedTempFile::new().unwrap();
        let mut state = TailerState::at_end(f.path().to_path_buf());

        append(f.path(), "Azoni Stout att");
        assert!(state.read_new_lines().unwrap().is_empty());

        append(f.path(), "acks Goblin\r\nnext");
        assert_eq!(state.read_new_lines().unwrap(), vec!["Azoni Stout attacks Goblin"]);
    }

    #[test]
    fn detects_truncation() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "original content").unwrap();
        f.flush().unwrap();

        let mut state = TailerState::from_start(f.path().to_path_buf());
        assert_eq!(state.read_new_lines().unwrap(), vec!["original content"]);

        let mut f2 = File::create(f.path()).unwrap();
        writeln!(f2, "new").unwrap();
        f2.flush().unwrap();

        assert_eq!(state.read_new_lines().unwrap(), vec!["new"]);
    }

    #[test]
    fn multibyte_character_split_across_reads() {
        let f = NamedTempFile::new().unwrap();
        let mut state = TailerState::at_end(f.path().to_path_buf());
        let bytes = "Azoni Stout attacks Dûrin\n".as_bytes();
        let split = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;

        OpenOptions::new().append(true).open(f.path()).unwrap().write_all(&bytes[..split]).unwrap();
        assert!(state.read_new_lines().unwrap().is_empty());
        assert_eq!(state.offset(), 0);

        OpenOptions::new().append(true).open(f.path()).unwrap().write_all(&bytes[split..]).unwrap();
        assert_eq!(state.read_new_lines().unwrap(), vec!["Azoni Stout attacks Dûrin"]);
    }

    #[test]
    fn offsets_resume_known_logs_and_start_new_ones() {
        let dir = tempdir().unwrap();
        let known = dir.path().join("nwclientLog1.txt");
        std::fs::write(&known, "history\n").unwrap();
        let source = LogSource::Directory(dir.path().to_path_buf());

        let mut offsets = Offsets::at_startup(&source);
        let mut state = offsets.open(known.clone());
        append(&known, "one\ntw");
        assert_eq!(state.read_new_lines().unwrap(), vec!["one"]);
        offsets.remember(&state);

        append(&known, "o\n");
        assert_eq!(offsets.open(known).read_new_lines().unwrap(), vec!["two"]);

        let fresh = dir.path().join("nwclientLog2.txt");
        std::fs::write(&fresh, "first\n").unwrap();
        assert_eq!(offsets.open(fresh).read_new_lines().unwrap(), vec!["first"]);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempdir().unwrap();
        let mut state = TailerState::from_start(dir.path().join("nwclientLog1.txt"));
        assert!(matches!(state.read_new_lines(), Err(TrackerError::ReadLog { .. })));
    }

    async fn recv(rx: &mut mpsc::Receiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn follows_directory_and_switches_to_newer_log() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("nwclientLog1.txt");
        let old = SystemTime::now() - Duration::from_secs(600);
        std::fs::write(&first, "before start\n").unwrap();
        File::options().write(true).open(&first).unwrap().set_modified(old).unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let (status_tx, mut status_rx) = watch::channel(StreamStatus::default());
        let task = tokio::spawn(run(
            LogSource::Directory(dir.path().to_path_buf()),
            Duration::from_millis(20),
            tx,
            status_tx,
        ));

        status_rx
            .wait_for(|s| matches!(s, StreamStatus::Following { .. }))
            .await
            .unwrap();
        append(&first, "Azoni Stout attacks Goblin : *hit*\n");
        assert_eq!(recv(&mut rx).await, "Azoni Stout attacks Goblin : *hit*");

        // Keep the first log older so the new one wins on mtime.
        File::options().write(true).open(&first).unwrap().set_modified(old).unwrap();
        std::fs::write(dir.path().join("nwclientLog2.txt"), "fresh session\n").unwrap();
        assert_eq!(recv(&mut rx).await, "fresh session");

        drop(rx);
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap().unwrap();
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        File::options().write(true).open(path).unwrap().set_modified(time).unwrap();
    }

    #[tokio::test]
    async fn switching_between_logs_never_replays() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("nwclientLog1.txt");
        let b = dir.path().join("nwclientLog2.txt");
        let old = SystemTime::now() - Duration::from_secs(600);
        std::fs::write(&a, "A history\n").unwrap();
        std::fs::write(&b, "B history\n").unwrap();
        set_mtime(&b, old);

        let (tx, mut rx) = mpsc::channel(16);
        let (status_tx, mut status_rx) = watch::channel(StreamStatus::default());
        let task = tokio::spawn(run(
            LogSource::Directory(dir.path().to_path_buf()),
            Duration::from_millis(20),
            tx,
            status_tx,
        ));

        status_rx
            .wait_for(|s| matches!(s, StreamStatus::Following { path } if *path == a))
            .await
            .unwrap();
        append(&a, "A1\n");
        assert_eq!(recv(&mut rx).await, "A1");

        append(&b, "B1\n");
        set_mtime(&a, old);
        assert_eq!(recv(&mut rx).await, "B1");

        append(&a, "A2\n");
        set_mtime(&b, old - Duration::from_secs(60));
        assert_eq!(recv(&mut rx).await, "A2");

        let extra = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(extra.is_err(), "unexpected line: {:?}", extra);

        drop(rx);
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn read_failure_stalls_then_recovers() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("nwclientLog1.txt");
        std::fs::write(&log, "a long line of history from before\n").unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let (status_tx, mut status_rx) = watch::channel(StreamStatus::default());
        let task = tokio::spawn(run(LogSource::File(log.clone()), Duration::from_millis(20), tx, status_tx));

        status_rx
            .wait_for(|s| matches!(s, StreamStatus::Following { .. }))
            .await
            .unwrap();

        std::fs::remove_file(&log).unwrap();
        let stalled = status_rx
            .wait_for(|s| matches!(s, StreamStatus::Stalled { .. }))
            .await
            .unwrap()
            .clone();
        assert!(matches!(stalled, StreamStatus::Stalled { path, .. } if path == log));
        assert!(!task.is_finished());

        std::fs::write(&log, "back\n").unwrap();
        status_rx
            .wait_for(|s| matches!(s, StreamStatus::Following { .. }))
            .await
            .unwrap();
        assert_eq!(recv(&mut rx).await, "back");

        drop(rx);
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn waits_for_a_log_that_does_not_exist_yet() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("nwclientLog1.txt");

        let (tx, mut rx) = mpsc::channel(16);
        let (status_tx, mut status_rx) = watch::channel(StreamStatus::default());
        let task = tokio::spawn(run(LogSource::File(log.clone()), Duration::from_millis(20), tx, status_tx));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(*status_rx.borrow(), StreamStatus::Waiting);

        std::fs::write(&log, "session start\n").unwrap();
        assert_eq!(recv(&mut rx).await, "session start");
        status_rx
            .wait_for(|s| matches!(s, StreamStatus::Following { .. }))
            .await
            .unwrap();

        drop(rx);
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap().unwrap();
    }
}
