/// Armor class inference from the player's attack outcomes.
///
/// A miss with total T means the target's AC is above T, a hit with total T
/// means it is at most T. The interval only ever narrows for the life of a
/// fight; an observation that would invert it is dropped instead.
use serde::{Deserialize, Serialize};

/// What an observation did to the interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Narrowed,
    Unchanged,
    /// Contradicted the current interval and was discarded.
    Rejected,
    /// Carried no AC information (natural 1, or AC already revealed).
    Ignored,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcEstimate {
    /// Highest total that missed.
    low:      Option<i32>,
    /// Lowest total that hit.
    high:     Option<i32>,
    revealed: Option<i32>,
}

/// Read-only view for snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcSnapshot {
    pub low:   i32,
    /// `None` means unbounded.
    pub high:  Option<i32>,
    pub point: Option<f64>,
    pub label: String,
}

impl AcEstimate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lower_bound(&self) -> i32 {
        self.revealed.or(self.low).unwrap_or(0)
    }

    pub fn upper_bound(&self) -> Option<i32> {
        self.revealed.or(self.high)
    }

    pub fn is_revealed(&self) -> bool {
        self.revealed.is_some()
    }

    /// `None` while the upper side is still unbounded.
    pub fn width(&self) -> Option<i64> {
        self.upper_bound().map(|high| i64::from(high) - i64::from(self.lower_bound()))
    }

    /// A natural 1 always misses and says nothing about AC.
    pub fn record_miss(&mut self, total: i32, natural_roll: i32) -> Observation {
        if self.revealed.is_some() || natural_roll == 1 {
            return Observation::Ignored;
        }
        let candidate = self.low.map_or(total, |low| low.max(total));
        if self.high.is_some_and(|high| candidate > high) {
            tracing::debug!(
                "AC miss total {} contradicts upper bound {:?}, discarded",
                total, self.high
            );
            return Observation::Rejected;
        }
        if self.low == Some(candidate) {
            return Observation::Unchanged;
        }
        self.low = Some(candidate);
        Observation::Narrowed
    }

    pub fn record_hit(&mut self, total: i32) -> Observation {
        if self.revealed.is_some() {
            return Observation::Ignored;
        }
        let candidate = self.high.map_or(total, |high| high.min(total));
        if candidate < self.lower_bound() {
            tracing::debug!(
                "AC hit total {} contradicts lower bound {}, discarded",
                total, self.lower_bound()
            );
            return Observation::Rejected;
        }
        if self.high == Some(candidate) {
            return Observation::Unchanged;
        }
        self.high = Some(candidate);
        Observation::Narrowed
    }

    /// The log disclosed the AC outright; both bounds collapse onto it for good.
    pub fn reveal(&mut self, ac: i32) {
        self.revealed = Some(ac);
    }

    /// Midpoint of the interval, or the single observed bound.
    pub fn point(&self) -> Option<f64> {
        if let Some(ac) = self.revealed {
            return Some(ac as f64);
        }
        match (self.low, self.high) {
            (Some(low), Some(high)) => Some((f64::from(low) + f64::from(high)) / 2.0),
            (Some(low), None)       => Some(low as f64),
            (None, Some(high))      => Some(high as f64),
            (None, None)            => None,
        }
    }

    /// Compact label in the usual notation: `?`, `>15`, `≤22`, `16-22`, `22`.
    pub fn label(&self) -> String {
        if let Some(ac) = self.revealed {
            return ac.to_string();
        }
        // Widened so totals near i32::MAX cannot overflow.
        match (self.low.map(i64::from), self.high.map(i64::from)) {
            (Some(low), Some(high)) if low + 1 == high => high.to_string(),
            (Some(low), Some(high)) if low < high      => format!("{}-{}", low + 1, high),
            (Some(_), Some(high))                      => format!("~{}", high),
            (None, Some(high))                         => format!("≤{}", high),
            (Some(low), None)                          => format!(">{}", low),
            (None, None)                               => "?".to_owned(),
        }
    }

    pub fn snapshot(&self) -> AcSnapshot {
        AcSnapshot {
            low:   self.lower_bound(),
            high:  self.upper_bound(),
            point: self.point(),
            label: self.label(),
        }
    }
}
