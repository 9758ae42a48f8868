/// Guesses the player's character name from the tail of a client log.
///
/// NWN never writes "you are X" anywhere, but several message kinds are only
/// ever printed for the local character:
///   [Azoni] Azoni Stout: [Talk] hello                   +15 (own chat echo)
///   Azoni Stout Experience Points Gained:  120          +10
///   Azoni Stout: [TELEPORT] Home                        +8  (menu action)
///   Azoni Stout casts Bless on Azoni Stout              +5  (self-cast)
///   Azoni Stout uses Potion of Heal                     +3
/// Each hit adds its weight to the name; the best total wins, earliest seen
/// breaking ties.
use crate::parser::strip_prefix;
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

/// How far back from the end of the log to look.
pub const SCAN_LINES: usize = 500;

struct Pattern {
    regex:  Regex,
    weight: u32,
}

fn pattern(re: &str, weight: u32) -> Pattern {
    // Patterns are literals in this file and covered by the tests below.
    let regex = Regex::new(re).unwrap_or_else(|e| panic!("invalid built-in pattern {re:?}: {e}"));
    Pattern { regex, weight }
}

static PATTERNS: Lazy<Vec<Pattern>> = Lazy::new(|| {
    vec![
        pattern(r"(?i)^\[[^\]]+\]\s+(?P<n>.+?):\s+\[Talk\]", 15),
        pattern(r"(?i)^(?P<n>.+?)\s+Experience Points Gained:", 10),
        pattern(r"(?i)^(?P<n>.+?):\s+\[(?:TELEPORT|RAID)\]", 8),
        pattern(r"(?i)^(?P<n>.+?)\s+uses\s+Potion of Heal", 3),
    ]
});

static SELF_CAST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?P<n>.+?)\s+casts\s+.+?\s+on\s+(?P<t>.+?)\.?\s*$")
        .unwrap_or_else(|e| panic!("invalid built-in pattern: {e}"))
});
const SELF_CAST_WEIGHT: u32 = 5;

fn plausible(name: &str) -> bool {
    let len = name.chars().count();
    (2..40).contains(&len) && !name.starts_with('[')
}

#[derive(Debug, Default)]
struct Scores {
    /// Insertion ordered so ties go to the name seen first.
    entries: Vec<(String, u32)>,
}

impl Scores {
    fn add(&mut self, name: &str, weight: u32) {
        let name = name.trim();
        if !plausible(name) {
            return;
        }
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, score)) => *score += weight,
            None             => self.entries.push((name.to_owned(), weight)),
        }
    }

    fn best(self) -> Option<String> {
        let mut best: Option<(String, u32)> = None;
        for (name, score) in self.entries {
            if best.as_ref().map_or(true, |(_, top)| score > *top) {
                best = Some((name, score));
            }
        }
        best.map(|(name, _)| name)
    }
}

/// Score every line and return the most likely player name.
pub fn detect_from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let mut scores = Scores::default();
    for raw in lines {
        let line = strip_prefix(raw);
        for p in PATTERNS.iter() {
            if let Some(c) = p.regex.captures(line) {
                scores.add(&c["n"], p.weight);
            }
        }
        if let Some(c) = SELF_CAST.captures(line) {
            if c["n"].trim() == c["t"].trim() {
                scores.add(&c["n"], SELF_CAST_WEIGHT);
            }
        }
    }
    scores.best()
}

/// Scan the last `SCAN_LINES` lines of `log_file`.
pub fn detect_player(log_file: &Path) -> Result<Option<String>> {
    let bytes = std::fs::read(log_file)
        .with_context(|| format!("reading {}", log_file.display()))?;
    let content = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = content.lines().collect();
    let tail = &lines[lines.len().saturating_sub(SCAN_LINES)..];

    let name = detect_from_lines(tail.iter().copied());
    match &name {
        Some(n) => tracing::info!("Detected player '{}' from {:?}", n, log_file),
        None    => tracing::info!("No player name found in {:?}", log_file),
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    const PREFIX: &str = "[CHAT WINDOW TEXT] [Thu Jan 15 20:14:33] ";

    #[test]
    fn talk_outweighs_potions() {
        let lines = [
            format!("{PREFIX}Tobin uses Potion of Heal"),
            format!("{PREFIX}Tobin uses Potion of Heal"),
            format!("{PREFIX}[Azoni] Azoni Stout: [Talk] anyone for the crypt?"),
        ];
        let found = detect_from_lines(lines.iter().map(String::as_str));
        assert_eq!(found.as_deref(), Some("Azoni Stout"));
    }

    #[test]
    fn self_cast_only_counts_on_self() {
        let lines = [
            format!("{PREFIX}Tobin casts Bless on Azoni Stout."),
            format!("{PREFIX}Azoni Stout casts Haste on Azoni Stout."),
        ];
        let found = detect_from_lines(lines.iter().map(String::as_str));
        assert_eq!(found.as_deref(), Some("Azoni Stout"));
    }

    #[test]
    fn xp_and_menu_actions() {
        let lines = [
            "Azoni Stout Experience Points Gained:  120",
            "Azoni Stout: [TELEPORT] Home",
            "Tobin uses Potion of Heal",
        ];
        assert_eq!(detect_from_lines(lines).as_deref(), Some("Azoni Stout"));
    }

    #[test]
    fn tie_goes_to_first_seen() {
        let lines = ["Tobin uses Potion of Heal", "Azoni uses Potion of Heal"];
        assert_eq!(detect_from_lines(lines).as_deref(), Some("Tobin"));
    }

    #[test]
    fn nothing_recognisable() {
        let lines = ["Azoni attacks Goblin : *hit* : (10 + 5 = 15)", "", "X uses Potion of Heal"];
        assert_eq!(detect_from_lines(lines), None);
    }

    #[test]
    fn only_the_tail_is_scanned() {
        let f = NamedTempFile::new().unwrap();
        let mut content = String::from("Old Name Experience Points Gained: 50\n");
        for _ in 0..SCAN_LINES {
            content.push_str("Azoni uses Potion of Heal\n");
        }
        std::fs::write(f.path(), content).unwrap();
        assert_eq!(detect_player(f.path()).unwrap().as_deref(), Some("Azoni"));
    }
}
