/// Presentation bridge: renders fight snapshots to the terminal.
///
/// The engine publishes a FightSnapshot on every refresh tick through a
/// watch channel; the tailer publishes its StreamStatus the same way. This
/// task waits on both and writes either a human-readable block or one JSON
/// object per line, so other tools can consume the stream.
use crate::{
    config::OutputFormat,
    state::{FightSnapshot, Phase},
    tailer::StreamStatus,
};
use anyhow::Result;
use serde::Serialize;
use std::fmt::Write as _;
use std::io::Write;
use tokio::sync::watch;

/// How many of the most recent saves the text view lists.
const SAVES_SHOWN: usize = 3;

/// One output record: the fight plus the health of the log stream.
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub stream: &'a StreamStatus,
    #[serde(flatten)]
    pub fight:  &'a FightSnapshot,
}

pub fn render_json(fight: &FightSnapshot, stream: &StreamStatus) -> Result<String> {
    Ok(serde_json::to_string(&Report { stream, fight })?)
}

fn opt<T: std::fmt::Display>(v: Option<T>) -> String {
    v.map_or_else(|| "-".to_owned(), |v| v.to_string())
}

fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Idle       => "IDLE",
        Phase::Acquiring  => "ACQUIRING",
        Phase::Active     => "ACTIVE",
        Phase::TargetDown => "DOWN",
    }
}

pub fn render_text(fight: &FightSnapshot, stream: &StreamStatus) -> String {
    let mut out = String::new();
    let secs = fight.elapsed_secs as u64;
    let target = fight.target.as_deref().unwrap_or("(auto-lock)");

    let _ = writeln!(
        out,
        "[{}] {} vs {}  {:02}:{:02}",
        phase_label(fight.phase), fight.player, target, secs / 60, secs % 60
    );

    let ac = fight.ac.as_ref().map_or("?", |ac| ac.label.as_str());
    let _ = write!(
        out,
        "AB {} (max {})  AC {}  DPS {:.1}  Damage {}",
        opt(fight.current_ab), opt(fight.max_ab), ac, fight.dps, fight.total_damage
    );
    if fight.overkill > 0 {
        let _ = write!(out, " (+{} overkill)", fight.overkill);
    }
    out.push('\n');

    let a = &fight.attacks;
    let _ = write!(out, "Hits {}  Misses {}  Crits {}  Concealed {}", a.hits, a.misses, a.crits, a.concealed);
    if let Some(rate) = fight.hit_rate {
        let _ = write!(out, "  Hit {:.0}%", rate * 100.0);
    }
    if let Some(pct) = fight.concealment_pct {
        let _ = write!(out, "  Conceal {:.0}%", pct);
        if let Some(seen) = fight.observed_concealment {
            let _ = write!(out, " (game {}%)", seen);
        }
    }
    out.push('\n');

    let d = &fight.damage;
    let _ = writeln!(
        out,
        "Weapon {} avg {}  Crit {} avg {}  Buff {}  Reflect {}",
        d.weapon.total,
        opt(d.weapon.average().map(|v| format!("{v:.1}"))),
        d.critical.total,
        opt(d.critical.average().map(|v| format!("{v:.1}"))),
        d.buff.total,
        d.reflect.total,
    );

    if !fight.damage_taken.is_empty() {
        let taken: Vec<String> = fight
            .damage_taken
            .iter()
            .map(|(kind, t)| format!("{} {} ({} hits, max {})", kind, t.total, t.hits, t.max))
            .collect();
        let _ = writeln!(out, "Taken: {}", taken.join(", "));
    }

    if !fight.saves.is_empty() {
        let start = fight.saves.len().saturating_sub(SAVES_SHOWN);
        let saves: Vec<String> = fight.saves[start..]
            .iter()
            .map(|s| {
                format!(
                    "{:?} {}{:+} vs DC {} {}",
                    s.save_type, s.roll, s.bonus, s.dc,
                    if s.success { "ok" } else { "failed" }
                )
            })
            .collect();
        let _ = writeln!(out, "Saves: {}", saves.join(", "));
    }

    let _ = writeln!(
        out,
        "Heals self {} target {}  Target AB {}",
        fight.heals_self, fight.heals_target, opt(fight.target_ab)
    );

    let _ = writeln!(
        out,
        "Log: {}",
        match stream {
            StreamStatus::Waiting                   => "waiting for a log file".to_owned(),
            StreamStatus::Following { path }        => format!("following {}", path.display()),
            StreamStatus::Stalled { path, reason }  => format!("STALLED {} ({})", path.display(), reason),
        }
    );
    out
}

pub fn render(format: OutputFormat, fight: &FightSnapshot, stream: &StreamStatus) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(render_text(fight, stream)),
        OutputFormat::Json => render_json(fight, stream),
    }
}

// ---------------------------------------------------------------------------
// Output task
// ---------------------------------------------------------------------------

/// Writes one record per published snapshot until the engine goes away.
pub async fn run<W: Write>(
    mut snap_rx:   watch::Receiver<FightSnapshot>,
    mut status_rx: watch::Receiver<StreamStatus>,
    format:        OutputFormat,
    mut out:       W,
) -> Result<()> {
    loop {
        tokio::select! {
            changed = snap_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            Ok(()) = status_rx.changed() => {}
        }

        let record = {
            let fight = snap_rx.borrow_and_update();
            let stream = status_rx.borrow_and_update();
            render(format, &fight, &stream)?
        };
        writeln!(out, "{}", record)?;
        out.flush()?;
    }
    Ok(())
}
