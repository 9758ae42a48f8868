/// Per-engagement fight model, maintained by the engine and snapshotted for output.
///
/// A FightState is owned by the engine task and mutated only there, one event
/// at a time, so nothing in here needs locking. It owns its attack-bonus
/// window and AC estimate; both are rebuilt whenever the fight is cleared.
use crate::{
    ac::{AcEstimate, AcSnapshot},
    classifier::{attribute_damage, DamageSource, LastHit, Relevance},
    parser::{AttackOutcome, CombatEvent, DamagePart, SaveType},
    window::RollingWindow,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No target yet; waiting for one to be set or auto-locked.
    #[default]
    Idle,
    /// Target known, no damage exchanged yet.
    Acquiring,
    Active,
    TargetDown,
}

// ---------------------------------------------------------------------------
// Accumulators
// ---------------------------------------------------------------------------

/// Damage from one source, split by damage type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceTotals {
    pub total:   u64,
    /// Number of damage lines attributed to this source.
    pub count:   u32,
    pub by_type: BTreeMap<String, u64>,
}

impl SourceTotals {
    fn add(&mut self, amount: u32, parts: &[DamagePart]) {
        self.total += u64::from(amount);
        self.count += 1;
        if parts.is_empty() {
            *self.by_type.entry("Unknown".to_owned()).or_insert(0) += u64::from(amount);
        }
        for part in parts.iter().filter(|p| p.amount > 0) {
            *self.by_type.entry(part.damage_type.clone()).or_insert(0) += u64::from(part.amount);
        }
    }

    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.total as f64 / self.count as f64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DamageBreakdown {
    pub weapon:   SourceTotals,
    pub critical: SourceTotals,
    pub buff:     SourceTotals,
    pub reflect:  SourceTotals,
}

impl DamageBreakdown {
    pub fn total(&self) -> u64 {
        self.weapon.total + self.critical.total + self.buff.total + self.reflect.total
    }

    fn bucket(&mut self, source: DamageSource) -> &mut SourceTotals {
        match source {
            DamageSource::Weapon         => &mut self.weapon,
            DamageSource::WeaponCritical => &mut self.critical,
            DamageSource::Buff           => &mut self.buff,
            DamageSource::Reflect        => &mut self.reflect,
        }
    }
}

/// Damage the player took of one type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TakenTotals {
    pub total: u64,
    pub hits:  u32,
    pub max:   u32,
}

impl TakenTotals {
    fn add(&mut self, amount: u32) {
        self.total += u64::from(amount);
        self.hits  += 1;
        self.max    = self.max.max(amount);
    }

    pub fn average(&self) -> Option<f64> {
        (self.hits > 0).then(|| self.total as f64 / self.hits as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveRecord {
    pub timestamp_ms: u64,
    pub save_type:    SaveType,
    pub vs:           Option<String>,
    pub roll:         i32,
    pub bonus:        i32,
    pub dc:           i32,
    pub success:      bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackCounters {
    pub hits:      u32,
    pub misses:    u32,
    pub crits:     u32,
    /// Swings lost to the concealment check.
    pub concealed: u32,
}

impl AttackCounters {
    pub fn hit_rate(&self) -> Option<f64> {
        let swings = self.hits + self.misses + self.concealed;
        (swings > 0).then(|| self.hits as f64 / swings as f64)
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Point-in-time copy of a fight, published to the output layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FightSnapshot {
    pub phase:                Phase,
    pub player:               String,
    pub target:               Option<String>,
    pub current_ab:           Option<i32>,
    pub max_ab:               Option<i32>,
    pub dps:                  f64,
    pub ac:                   Option<AcSnapshot>,
    pub damage:               DamageBreakdown,
    pub damage_taken:         BTreeMap<String, TakenTotals>,
    pub saves:                Vec<SaveRecord>,
    /// Share of concealment-flagged swings lost to concealment, 0-100.
    pub concealment_pct:      Option<f64>,
    /// Last concealment percentage printed by the game.
    pub observed_concealment: Option<u8>,
    pub attacks:              AttackCounters,
    pub hit_rate:             Option<f64>,
    pub heals_self:           u32,
    pub heals_target:         u32,
    pub target_ab:            Option<i32>,
    pub total_damage:         u64,
    pub overkill:             u64,
    pub elapsed_secs:         f64,
}

// ---------------------------------------------------------------------------
// FightState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FightState {
    pub phase:                Phase,
    pub target:               Option<String>,
    pub started_ms:           Option<u64>,
    pub last_activity_ms:     Option<u64>,
    pub died_ms:              Option<u64>,
    ab:                       RollingWindow<i32>,
    ac:                       AcEstimate,
    pub damage:               DamageBreakdown,
    pub damage_taken:         BTreeMap<String, TakenTotals>,
    pub saves:                Vec<SaveRecord>,
    pub concealment_misses:   u32,
    pub concealed_hits:       u32,
    pub observed_concealment: Option<u8>,
    pub attacks:              AttackCounters,
    pub heals_self:           u32,
    pub heals_target:         u32,
    pub target_ab:            Option<i32>,
    pub overkill:             u64,
    last_hit:                 Option<LastHit>,
}

impl FightState {
    pub fn new(ab_window_ms: u64) -> Self {
        Self {
            phase:                Phase::Idle,
            target:               None,
            started_ms:           None,
            last_activity_ms:     None,
            died_ms:              None,
            ab:                   RollingWindow::new(ab_window_ms),
            ac:                   AcEstimate::new(),
            damage:               DamageBreakdown::default(),
            damage_taken:         BTreeMap::new(),
            saves:                Vec::new(),
            concealment_misses:   0,
            concealed_hits:       0,
            observed_concealment: None,
            attacks:              AttackCounters::default(),
            heals_self:           0,
            heals_target:         0,
            target_ab:            None,
            overkill:             0,
            last_hit:             None,
        }
    }

    /// Start tracking `target`: drops whatever the previous engagement accumulated.
    pub fn engage(&mut self, target: &str) {
        self.clear();
        self.target = Some(target.to_owned());
        self.phase  = Phase::Acquiring;
        tracing::info!("Acquiring target '{}'", target);
    }

    /// Clears every accumulator, keeping target and phase as they are.
    pub fn clear(&mut self) {
        let (phase, target) = (self.phase, self.target.take());
        *self = Self::new(self.ab.window_ms());
        self.phase  = phase;
        self.target = target;
    }

    /// Back to `Idle` with no target.
    pub fn reset(&mut self) {
        *self = Self::new(self.ab.window_ms());
    }

    pub fn ac(&self) -> &AcEstimate {
        &self.ac
    }

    pub fn apply(&mut self, event: &CombatEvent, relevance: Relevance) {
        let Some(ts) = event.timestamp_ms() else { return };

        match relevance {
            Relevance::Ignored => {}
            Relevance::Player => {
                if matches!(event, CombatEvent::Heal { .. }) {
                    self.heals_self += 1;
                }
            }
            _ if self.phase == Phase::TargetDown => self.apply_after_death(event, relevance),
            Relevance::Outgoing => {
                self.touch(ts);
                self.apply_outgoing(event, ts);
            }
            Relevance::Incoming => {
                self.touch(ts);
                self.apply_incoming(event);
            }
            Relevance::Target => {
                self.touch(ts);
                self.apply_target(event, ts);
            }
        }
    }

    fn touch(&mut self, ts: u64) {
        self.started_ms.get_or_insert(ts);
        self.last_activity_ms = Some(ts);
    }

    fn activate(&mut self) {
        if self.phase == Phase::Acquiring {
            self.phase = Phase::Active;
            tracing::info!("Fight active against {:?}", self.target);
        }
    }

    fn apply_outgoing(&mut self, event: &CombatEvent, ts: u64) {
        match event {
            CombatEvent::Attack { outcome, roll, concealment, ac_hint, .. } => {
                if let Some(roll) = roll {
                    self.ab.record(roll.bonus, ts);
                }
                if let Some(ac) = ac_hint {
                    self.ac.reveal(*ac);
                }
                if let Some(pct) = concealment {
                    self.observed_concealment = Some(*pct);
                    if outcome.is_hit() {
                        self.concealed_hits += 1;
                    }
                }
                if *outcome == AttackOutcome::Unresolved {
                    return;
                }

                if outcome.is_hit() {
                    self.attacks.hits += 1;
                    if *outcome == AttackOutcome::CriticalHit {
                        self.attacks.crits += 1;
                    }
                    self.last_hit = Some(LastHit {
                        by_player: true,
                        critical:  *outcome == AttackOutcome::CriticalHit,
                    });
                    if let Some(roll) = roll {
                        self.ac.record_hit(roll.total);
                    }
                } else if outcome.is_miss() {
                    self.attacks.misses += 1;
                    if let Some(roll) = roll {
                        self.ac.record_miss(roll.total, roll.roll);
                    }
                }
            }
            CombatEvent::Concealment { concealment_pct, missed, .. } => {
                self.observed_concealment = Some(*concealment_pct);
                if *missed {
                    self.concealment_misses += 1;
                    self.attacks.concealed  += 1;
                }
            }
            CombatEvent::Damage { amount, parts, .. } => {
                self.activate();
                let source = attribute_damage(parts, self.last_hit);
                self.damage.bucket(source).add(*amount, parts);
            }
            _ => {}
        }
    }

    fn apply_incoming(&mut self, event: &CombatEvent) {
        match event {
            CombatEvent::Attack { outcome, roll, .. } if outcome.is_hit() => {
                self.last_hit = Some(LastHit { by_player: false, critical: false });
                if let Some(roll) = roll {
                    self.target_ab = Some(self.target_ab.map_or(roll.bonus, |ab| ab.max(roll.bonus)));
                }
            }
            CombatEvent::Damage { amount, parts, .. } => {
                self.activate();
                if parts.is_empty() {
                    self.damage_taken.entry("Unknown".to_owned()).or_default().add(*amount);
                }
                for part in parts.iter().filter(|p| p.amount > 0) {
                    self.damage_taken.entry(part.damage_type.clone()).or_default().add(part.amount);
                }
            }
            _ => {}
        }
    }

    fn apply_target(&mut self, event: &CombatEvent, ts: u64) {
        match event {
            CombatEvent::Save { save_type, vs, roll, bonus, dc, success, .. } => {
                self.saves.push(SaveRecord {
                    timestamp_ms: ts,
                    save_type:    *save_type,
                    vs:           vs.clone(),
                    roll:         *roll,
                    bonus:        *bonus,
                    dc:           *dc,
                    success:      *success,
                });
            }
            CombatEvent::Heal { .. } => self.heals_target += 1,
            CombatEvent::Death { killer, victim, .. } => {
                self.phase   = Phase::TargetDown;
                self.died_ms = Some(ts);
                tracing::info!("Target '{}' killed by '{}'", victim, killer);
            }
            _ => {}
        }
    }

    /// The fight is frozen; only damage piled onto the corpse is still counted.
    fn apply_after_death(&mut self, event: &CombatEvent, relevance: Relevance) {
        if let (Relevance::Outgoing, CombatEvent::Damage { amount, .. }) = (relevance, event) {
            self.overkill += u64::from(*amount);
            tracing::debug!("Overkill damage {} after target death", amount);
        }
    }

    /// Fight duration in milliseconds, frozen at the moment of death.
    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        match self.started_ms {
            Some(start) => self.died_ms.unwrap_or(now_ms).saturating_sub(start),
            None        => 0,
        }
    }

    pub fn dps(&self, now_ms: u64) -> f64 {
        let elapsed = self.elapsed_ms(now_ms);
        if elapsed == 0 {
            return 0.0;
        }
        self.damage.total() as f64 / (elapsed as f64 / 1000.0)
    }

    /// `None` until a concealment-flagged swing has been seen.
    pub fn concealment_pct(&self) -> Option<f64> {
        let seen = self.concealment_misses + self.concealed_hits;
        (seen > 0).then(|| self.concealment_misses as f64 * 100.0 / seen as f64)
    }

    pub fn current_ab(&self) -> Option<i32> {
        self.ab.current_value()
    }

    pub fn max_ab(&mut self, now_ms: u64) -> Option<i32> {
        self.ab.current_max(now_ms)
    }

    pub fn snapshot(&mut self, player: &str, now_ms: u64) -> FightSnapshot {
        let has_ac_data = self.ac.point().is_some() || self.target.is_some();
        FightSnapshot {
            phase:                self.phase,
            player:               player.to_owned(),
            target:               self.target.clone(),
            current_ab:           self.current_ab(),
            max_ab:               self.max_ab(now_ms),
            dps:                  self.dps(now_ms),
            ac:                   has_ac_data.then(|| self.ac.snapshot()),
            damage:               self.damage.clone(),
            damage_taken:         self.damage_taken.clone(),
            saves:                self.saves.clone(),
            concealment_pct:      self.concealment_pct(),
            observed_concealment: self.observed_concealment,
            attacks:              self.attacks,
            hit_rate:             self.attacks.hit_rate(),
            heals_self:           self.heals_self,
            heals_target:         self.heals_target,
            target_ab:            self.target_ab,
            total_damage:         self.damage.total(),
            overkill:             self.overkill,
            elapsed_secs:         self.elapsed_ms(now_ms) as f64 / 1000.0,
        }
    }
}
