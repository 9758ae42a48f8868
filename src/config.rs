/// Application configuration, persisted as TOML in the platform config directory.
///
/// On Linux this is typically:
///   ~/.config/nwn-combat-tracker/config.toml
/// and on Windows:
///   %APPDATA%\nwn-combat-tracker\config.toml
///
/// NOTE: log_path may name either the NWN **logs directory** or one specific
/// log file. With a directory the tailer follows the newest nwclientLog*.txt
/// and switches when the client starts a new one. Empty means auto-detect.
use crate::{classifier::MatchMode, error::TrackerError, window::AB_WINDOW_MS};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const CONFIG_FILE: &str = "config.toml";
const APP_DIR: &str = "nwn-combat-tracker";

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// NWN logs directory or a single log file; empty = auto-detect.
    #[serde(default)]
    pub log_path: PathBuf,

    /// Character name as it appears in the combat log. Required.
    #[serde(default)]
    pub player_name: String,

    /// Target to track (empty = auto-lock onto the first creature attacked).
    #[serde(default)]
    pub target: String,

    #[serde(default)]
    pub match_mode: MatchMode,

    /// Short names for long creature names, e.g. `lich = "Lich Lord of the Crypt"`.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,

    /// Width of the attack-bonus window
    #[serde(default = "default_ab_window_secs")]
    pub ab_window_secs: u64,

    /// Fallback poll interval for the log tailer
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How often a snapshot is published and rendered
    #[serde(default = "default_refresh_ms")]
    pub refresh_ms: u64,

    #[serde(default)]
    pub output: OutputFormat,
}

fn default_ab_window_secs() -> u64 { AB_WINDOW_MS / 1000 }
fn default_poll_interval_ms() -> u64 { 500 }
fn default_refresh_ms() -> u64 { 1000 }

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_path:         PathBuf::new(),
            player_name:      String::new(),
            target:           String::new(),
            match_mode:       MatchMode::default(),
            aliases:          BTreeMap::new(),
            ab_window_secs:   default_ab_window_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            refresh_ms:       default_refresh_ms(),
            output:           OutputFormat::default(),
        }
    }
}

impl AppConfig {
    /// Substitute an alias for its canonical creature name. Unknown names pass through.
    pub fn resolve_alias(&self, name: &str) -> String {
        let key = name.trim();
        self.aliases
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(key))
            .map(|(_, canonical)| canonical.clone())
            .unwrap_or_else(|| key.to_owned())
    }

    pub fn ab_window_ms(&self) -> u64 {
        self.ab_window_secs.saturating_mul(1000)
    }

    /// Where to read the log from, auto-detecting the directory if none is configured.
    pub fn log_source(&self) -> Result<LogSource, TrackerError> {
        if self.log_path.as_os_str().is_empty() {
            return detect_log_dir()
                .map(LogSource::Directory)
                .ok_or_else(|| TrackerError::NoLogFiles {
                    path: standard_log_dirs().into_iter().next().unwrap_or_default(),
                });
        }
        if self.log_path.is_dir() {
            return Ok(LogSource::Directory(self.log_path.clone()));
        }
        // A client log that does not exist yet is waited for; the client creates it on login.
        let log_name = self
            .log_path
            .file_name()
            .is_some_and(|n| is_nwn_log_file(&n.to_string_lossy()));
        if self.log_path.is_file() || log_name {
            Ok(LogSource::File(self.log_path.clone()))
        } else {
            Err(TrackerError::MissingLogPath { path: self.log_path.clone() })
        }
    }
}

/// What the tailer follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSource {
    File(PathBuf),
    /// Follow the newest log in this directory.
    Directory(PathBuf),
}

impl LogSource {
    /// The file to read right now; for a directory, its newest client log.
    pub fn current_file(&self) -> Option<PathBuf> {
        match self {
            LogSource::File(path)     => path.exists().then(|| path.clone()),
            LogSource::Directory(dir) => find_latest_log(dir),
        }
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// `<platform config dir>/nwn-combat-tracker`
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR))
}

pub fn load_or_default(config_dir: &Path) -> Result<AppConfig> {
    let path = config_dir.join(CONFIG_FILE);
    if path.exists() {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let cfg: AppConfig = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("Config parse error: {}", e))?;
        Ok(cfg)
    } else {
        Ok(AppConfig::default())
    }
}

pub fn save(config: &AppConfig, config_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating {}", config_dir.display()))?;
    let raw = toml::to_string_pretty(config)
        .map_err(|e| anyhow::anyhow!("Config serialize error: {}", e))?;
    std::fs::write(config_dir.join(CONFIG_FILE), raw)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Log directory helpers
// ---------------------------------------------------------------------------

/// `nwclientLog.txt`, `nwclientLog1.txt`, `nwclientLog12` and so on.
pub fn is_nwn_log_file(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    let Some(rest) = lower.strip_prefix("nwclientlog") else {
        return false;
    };
    let rest = rest.strip_suffix(".txt").unwrap_or(rest);
    rest.chars().all(|c| c.is_ascii_digit())
}

/// Scans `logs_dir` for NWN client logs and returns the one with the most
/// recent `modified` timestamp. `None` if there are none.
pub fn find_latest_log(logs_dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(logs_dir).ok()?;

    let mut best: Option<(PathBuf, std::time::SystemTime)> = None;

    for entry in entries.flatten() {
        if !is_nwn_log_file(&entry.file_name().to_string_lossy()) {
            continue;
        }

        let path = entry.path();
        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => continue,
        };

        match &best {
            None => best = Some((path, modified)),
            Some((_, best_time)) if modified > *best_time => best = Some((path, modified)),
            _ => {}
        }
    }

    if let Some((ref p, _)) = best {
        tracing::debug!("find_latest_log: selected {:?}", p);
    }
    best.map(|(p, _)| p)
}

/// Where the Enhanced Edition client writes its logs by default.
fn standard_log_dirs() -> Vec<PathBuf> {
    let mut dirs_found = Vec::new();
    if let Some(docs) = dirs::document_dir() {
        dirs_found.push(docs.join("Neverwinter Nights").join("logs"));
    }
    if let Some(data) = dirs::data_dir() {
        dirs_found.push(data.join("Neverwinter Nights").join("logs"));
    }
    dirs_found
}

/// First standard logs directory that actually contains a client log.
pub fn detect_log_dir() -> Option<PathBuf> {
    for dir in standard_log_dirs() {
        if dir.is_dir() && find_latest_log(&dir).is_some() {
            tracing::info!("Auto-detected NWN logs dir: {:?}", dir);
            return Some(dir);
        }
    }
    tracing::info!("NWN logs dir not auto-detected; pass --log");
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    #[test]
    fn round_trips_config() {
        let dir = tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.player_name = "Azoni Stout".to_owned();
        cfg.match_mode  = MatchMode::Exact;
        cfg.output      = OutputFormat::Json;
        cfg.aliases.insert("lich".to_owned(), "Lich Lord".to_owned());

        save(&cfg, dir.path()).unwrap();

        let loaded = load_or_default(dir.path()).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn returns_default_when_missing() {
        let dir = tempdir().unwrap();
        let cfg = load_or_default(dir.path()).unwrap();
        assert_eq!(cfg.ab_window_secs, 30);
        assert_eq!(cfg.ab_window_ms(), 30_000);
        assert_eq!(cfg.poll_interval_ms, 500);
        assert_eq!(cfg.match_mode, MatchMode::Partial);
        assert!(cfg.log_path.as_os_str().is_empty());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "player_name = \"Tobin\"\nmatch_mode = \"exact\"\n[aliases]\nbbod = \"Balor Lord\"\n",
        )
        .unwrap();
        let cfg = load_or_default(dir.path()).unwrap();
        assert_eq!(cfg.player_name, "Tobin");
        assert_eq!(cfg.match_mode, MatchMode::Exact);
        assert_eq!(cfg.refresh_ms, 1000);
        assert_eq!(cfg.resolve_alias("BBOD"), "Balor Lord");
        assert_eq!(cfg.resolve_alias(" Goblin "), "Goblin");
    }

    #[test]
    fn rejects_malformed_config() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "ab_window_secs = \"soon\"").unwrap();
        assert!(load_or_default(dir.path()).is_err());
    }

    #[test]
    fn recognises_client_log_names() {
        assert!(is_nwn_log_file("nwclientLog1.txt"));
        assert!(is_nwn_log_file("nwclientLog.txt"));
        assert!(is_nwn_log_file("nwclientLog12"));
        assert!(is_nwn_log_file("NWCLIENTLOG3.TXT"));
        assert!(!is_nwn_log_file("nwclientError1.txt"));
        assert!(!is_nwn_log_file("nwclientLog1.txt.bak"));
        assert!(!is_nwn_log_file("nwserverLog1.txt"));
    }

    #[test]
    fn find_latest_log_picks_newest() {
        let dir = tempdir().unwrap();
        let base = SystemTime::now() - Duration::from_secs(600);

        let older = dir.path().join("nwclientLog1.txt");
        let newer = dir.path().join("nwclientLog2.txt");
        let noise = dir.path().join("nwclientError1.txt");

        File::create(&older).unwrap().set_modified(base).unwrap();
        File::create(&newer).unwrap().set_modified(base + Duration::from_secs(60)).unwrap();
        File::create(&noise).unwrap().set_modified(base + Duration::from_secs(120)).unwrap();

        assert_eq!(find_latest_log(dir.path()).unwrap(), newer);
    }

    #[test]
    fn find_latest_log_returns_none_for_empty_dir() {
        let dir = tempdir().unwrap();
        assert!(find_latest_log(dir.path()).is_none());
    }

    #[test]
    fn log_source_distinguishes_file_and_dir() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("nwclientLog1.txt");
        File::create(&file).unwrap();

        let mut cfg = AppConfig { log_path: dir.path().to_path_buf(), ..AppConfig::default() };
        assert_eq!(cfg.log_source().unwrap(), LogSource::Directory(dir.path().to_path_buf()));

        cfg.log_path = file.clone();
        assert_eq!(cfg.log_source().unwrap(), LogSource::File(file));

        let pending = dir.path().join("nwclientLog2.txt");
        cfg.log_path = pending.clone();
        assert_eq!(cfg.log_source().unwrap(), LogSource::File(pending));

        cfg.log_path = dir.path().join("missing.txt");
        assert!(matches!(cfg.log_source(), Err(TrackerError::MissingLogPath { .. })));
    }
}
