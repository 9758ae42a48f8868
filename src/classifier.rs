/// Decides whether an event concerns the tracked player/target pair.
///
/// The classifier owns the player name and the current target filter. With
/// no target configured it auto-locks onto whatever the player first swings
/// at or damages, switching to an exact match on that name.
use crate::{
    error::TrackerError,
    parser::{CombatEvent, DamagePart},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    Exact,
    #[default]
    Partial,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFilter {
    pub name:        String,
    pub mode:        MatchMode,
    /// Acquired by auto-lock rather than configured by the operator.
    pub auto_locked: bool,
}

impl TargetFilter {
    pub fn matches(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        let wanted = self.name.to_lowercase();
        match self.mode {
            MatchMode::Exact   => name == wanted,
            MatchMode::Partial => name.contains(&wanted),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relevance {
    /// Player acting on the target.
    Outgoing,
    /// Target acting on the player.
    Incoming,
    /// Concerns the target alone (its saves, heals, death).
    Target,
    /// Concerns the player alone (own heals).
    Player,
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub relevance: Relevance,
    /// Set when this event caused an auto-lock onto a new target.
    pub locked:    Option<String>,
}

impl Classification {
    fn of(relevance: Relevance) -> Self {
        Self { relevance, locked: None }
    }
}

#[derive(Debug, Clone)]
pub struct Classifier {
    player: String,
    target: Option<TargetFilter>,
}

impl Classifier {
    /// Rejects an empty player name before any tracking state exists.
    pub fn new(player: &str) -> Result<Self, TrackerError> {
        let player = player.trim();
        if player.is_empty() {
            return Err(TrackerError::EmptyPlayerName);
        }
        Ok(Self { player: player.to_owned(), target: None })
    }

    pub fn player(&self) -> &str {
        &self.player
    }

    pub fn target(&self) -> Option<&TargetFilter> {
        self.target.as_ref()
    }

    /// An empty name clears the filter, which re-enables auto-lock.
    pub fn set_target(&mut self, name: &str, mode: MatchMode) {
        let name = name.trim();
        self.target = (!name.is_empty()).then(|| TargetFilter {
            name: name.to_owned(),
            mode,
            auto_locked: false,
        });
    }

    pub fn clear_target(&mut self) {
        self.target = None;
    }

    /// Drop an auto-locked target so the next swing locks again.
    /// Returns false when the target was configured explicitly and is kept.
    pub fn release_lock(&mut self) -> bool {
        if self.target.as_ref().is_some_and(|t| t.auto_locked) {
            self.target = None;
            return true;
        }
        false
    }

    pub fn is_player(&self, name: &str) -> bool {
        !name.is_empty() && name.to_lowercase().contains(&self.player.to_lowercase())
    }

    pub fn is_target(&self, name: &str) -> bool {
        match &self.target {
            Some(filter) => !self.is_player(name) && filter.matches(name),
            None         => false,
        }
    }

    pub fn classify(&mut self, event: &CombatEvent) -> Classification {
        match event {
            CombatEvent::Attack { attacker, defender, .. }
            | CombatEvent::Concealment { attacker, defender, .. }
            | CombatEvent::Damage { source: attacker, target: defender, .. } => {
                let locked = self.try_lock(attacker, defender);
                let relevance = if self.is_player(attacker) && self.is_target(defender) {
                    Relevance::Outgoing
                } else if self.is_target(attacker) && self.is_player(defender) {
                    Relevance::Incoming
                } else {
                    Relevance::Ignored
                };
                Classification { relevance, locked }
            }
            CombatEvent::Save { defender, .. } if self.is_target(defender) => {
                Classification::of(Relevance::Target)
            }
            CombatEvent::Heal { actor, .. } if self.is_player(actor) => {
                Classification::of(Relevance::Player)
            }
            CombatEvent::Heal { actor, .. } if self.is_target(actor) => {
                Classification::of(Relevance::Target)
            }
            CombatEvent::Death { victim, .. } if self.is_target(victim) => {
                Classification::of(Relevance::Target)
            }
            _ => Classification::of(Relevance::Ignored),
        }
    }

    fn try_lock(&mut self, attacker: &str, defender: &str) -> Option<String> {
        if self.target.is_some() || defender.is_empty() {
            return None;
        }
        if !self.is_player(attacker) || self.is_player(defender) {
            return None;
        }
        tracing::info!("Auto-locked target: {}", defender);
        self.target = Some(TargetFilter {
            name:        defender.to_owned(),
            mode:        MatchMode::Exact,
            auto_locked: true,
        });
        Some(defender.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Damage attribution
// ---------------------------------------------------------------------------

/// Where a point of damage dealt to the target came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageSource {
    Weapon,
    WeaponCritical,
    /// Elemental proc riding on the player's weapon hit.
    Buff,
    /// Damage shield reflecting the target's hit back at it.
    Reflect,
}

/// Most recent hit exchanged between player and target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LastHit {
    pub by_player: bool,
    pub critical:  bool,
}

/// A weapon hit prints one damage line with every type it dealt, so a line with
/// several non-zero types (or physical alone) is weapon damage. A line carrying a
/// single elemental type is a separate proc: a weapon buff when the player landed
/// the last hit, otherwise a damage shield answering the target's hit.
pub fn attribute_damage(parts: &[DamagePart], last_hit: Option<LastHit>) -> DamageSource {
    let mut dealt = parts.iter().filter(|p| p.amount > 0);
    let single = match (dealt.next(), dealt.next()) {
        (Some(only), None) => Some(only),
        _                  => None,
    };
    let elemental = single.is_some_and(|p| !p.damage_type.eq_ignore_ascii_case("physical"));

    let last = last_hit.unwrap_or_default();
    if elemental {
        return if last_hit.is_some() && last.by_player {
            DamageSource::Buff
        } else {
            DamageSource::Reflect
        };
    }
    if last.by_player && last.critical {
        DamageSource::WeaponCritical
    } else {
        DamageSource::Weapon
    }
}
