/// Tracking engine: the single writer of fight state.
///
/// Receives typed CombatEvents from the parser and operator commands from
/// the console, serialises both through one `select!` loop, and publishes a
/// FightSnapshot on every refresh tick. Readers only ever see snapshots, so
/// the fight itself is never shared.
use crate::{
    classifier::{Classifier, MatchMode},
    error::TrackerError,
    parser::{now_ms, CombatEvent},
    state::{FightSnapshot, FightState, Phase},
};
use anyhow::Result;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// An empty name clears the target and re-enables auto-lock.
    SetTarget { name: String, mode: MatchMode },
    NewTarget,
    Reset,
}

/// Cloneable front for sending commands to a running engine.
#[derive(Debug, Clone)]
pub struct TrackerHandle {
    tx: mpsc::Sender<Command>,
}

impl TrackerHandle {
    pub fn new(tx: mpsc::Sender<Command>) -> Self {
        Self { tx }
    }

    pub async fn set_target(&self, name: &str, mode: MatchMode) -> Result<()> {
        self.send(Command::SetTarget { name: name.to_owned(), mode }).await
    }

    pub async fn new_target(&self) -> Result<()> {
        self.send(Command::NewTarget).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.send(Command::Reset).await
    }

    async fn send(&self, cmd: Command) -> Result<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| anyhow::anyhow!("tracking engine has stopped"))
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Tracker {
    classifier: Classifier,
    fight:      FightState,
}

impl Tracker {
    pub fn new(player: &str, ab_window_ms: u64) -> Result<Self, TrackerError> {
        Ok(Self {
            classifier: Classifier::new(player)?,
            fight:      FightState::new(ab_window_ms),
        })
    }

    pub fn player(&self) -> &str {
        self.classifier.player()
    }

    pub fn fight(&self) -> &FightState {
        &self.fight
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn set_target(&mut self, name: &str, mode: MatchMode) {
        self.classifier.set_target(name, mode);
        match self.classifier.target() {
            Some(filter) => {
                let name = filter.name.clone();
                self.fight.engage(&name);
            }
            None => {
                self.fight.reset();
                tracing::info!("Target cleared, waiting for auto-lock");
            }
        }
    }

    /// Start a fresh engagement: an explicit target is kept, an auto-locked
    /// one is released so the next swing picks a new one.
    pub fn new_target(&mut self) {
        if self.classifier.release_lock() {
            self.fight.reset();
            tracing::info!("New target: auto-lock released");
            return;
        }
        self.fight.clear();
        if self.fight.target.is_some() {
            self.fight.phase = Phase::Acquiring;
        }
        tracing::info!("New target: accumulators cleared");
    }

    /// Forget everything including the target. The player name survives.
    pub fn reset(&mut self) {
        self.classifier.clear_target();
        self.fight.reset();
        tracing::info!("Tracker reset");
    }

    pub fn apply(&mut self, cmd: Command) {
        match cmd {
            Command::SetTarget { name, mode } => self.set_target(&name, mode),
            Command::NewTarget                => self.new_target(),
            Command::Reset                    => self.reset(),
        }
    }

    pub fn ingest(&mut self, event: &CombatEvent) {
        let class = self.classifier.classify(event);
        if let Some(name) = &class.locked {
            self.fight.engage(name);
        }
        self.fight.apply(event, class.relevance);
    }

    pub fn snapshot(&mut self, now_ms: u64) -> FightSnapshot {
        let player = self.classifier.player().to_owned();
        self.fight.snapshot(&player, now_ms)
    }
}

// ---------------------------------------------------------------------------
// Main engine task
// ---------------------------------------------------------------------------

pub async fn run(
    mut tracker:  Tracker,
    mut event_rx: mpsc::Receiver<CombatEvent>,
    mut cmd_rx:   mpsc::Receiver<Command>,
    snap_tx:      watch::Sender<FightSnapshot>,
    refresh:      Duration,
) -> Result<()> {
    let mut ticker = tokio::time::interval(refresh);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            // Operator commands are rare, publish their effect immediately
            Some(cmd) = cmd_rx.recv() => {
                tracing::debug!("Command: {:?}", cmd);
                tracker.apply(cmd);
                snap_tx.send_replace(tracker.snapshot(now_ms()));
            }

            event = event_rx.recv() => match event {
                Some(event) => tracker.ingest(&event),
                None        => break,
            },

            _ = ticker.tick() => {
                snap_tx.send_replace(tracker.snapshot(now_ms()));
            }
        }
    }
    tracing::info!("Engine stopped");
    Ok(())
}
