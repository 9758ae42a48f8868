/// Parses raw Neverwinter Nights chat-log lines into typed `CombatEvent`s.
///
/// Every line the client writes to `nwclientLog*.txt` looks like:
///
///   [CHAT WINDOW TEXT] [Thu Jan 15 20:14:33] Azoni Stout attacks Goblin : *hit* : (14 + 20 = 34)
///
/// The bracketed prefix is stripped, then the remaining sentence is matched
/// against a fixed, ordered list of rules. The first rule that matches wins,
/// so the more specific templates (concealment variants) come before the
/// generic ones they would otherwise be swallowed by.
///
/// Rule order:
///   1. concealed attack with outcome      `A attacks D : *target concealed: 50%* : (r + b = t) : *hit*`
///   2. concealed attack, outcome pending  `A attacks D : *target concealed: 50%* : (r + b = t)`
///   3. attack lost to concealment         `A attacks D : *target concealed: 50%*`
///   4. attack                             `A attacks D : *critical hit* : (r + b = t)`
///   5. saving throw                       `SAVE: D : Will Save vs. Fear : *failed* : (r + b = t vs. DC: n)`
///   6. damage                             `S damages T: 25 (10 Physical 15 Fire)`
///   7. heal potion                        `A uses Potion of Heal`
///   8. undead self heal                   `A casts Harm Self (Undead)`
///   9. death                              `K killed V`
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{Receiver, Sender};

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackOutcome {
    Hit,
    CriticalHit,
    Miss,
    Parried,
    Resisted,
    /// Concealment line printed the roll but not (yet) the outcome.
    Unresolved,
}

impl AttackOutcome {
    fn from_log(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "hit"          => Self::Hit,
            "critical hit" => Self::CriticalHit,
            "miss"         => Self::Miss,
            "parried"      => Self::Parried,
            "resisted"     => Self::Resisted,
            _              => Self::Unresolved,
        }
    }

    pub fn is_hit(self) -> bool {
        matches!(self, Self::Hit | Self::CriticalHit)
    }

    pub fn is_miss(self) -> bool {
        matches!(self, Self::Miss | Self::Parried | Self::Resisted)
    }
}

/// The `(roll + bonus = total)` group of an attack line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roll {
    pub roll:  i32,
    pub bonus: i32,
    pub total: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamagePart {
    pub damage_type: String,
    pub amount:      u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveType {
    Fort,
    Ref,
    Will,
}

impl SaveType {
    fn from_log(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "fort" | "fortitude" => Self::Fort,
            "reflex"             => Self::Ref,
            _                    => Self::Will,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "item", rename_all = "snake_case")]
pub enum HealKind {
    /// `Potion of Heal` and its variants; carries the item name as logged.
    Potion(String),
    /// Undead creatures heal themselves with Harm.
    HarmSelf,
}

/// Typed combat log events the tracker cares about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CombatEvent {
    Attack {
        timestamp_ms: u64,
        attacker:     String,
        defender:     String,
        outcome:      AttackOutcome,
        roll:         Option<Roll>,
        /// Concealment percentage printed on the line, if any.
        concealment:  Option<u8>,
        /// Armor class disclosed by the line itself.
        ac_hint:      Option<i32>,
        opportunity:  bool,
    },
    Damage {
        timestamp_ms: u64,
        source:       String,
        target:       String,
        amount:       u32,
        parts:        Vec<DamagePart>,
    },
    Save {
        timestamp_ms: u64,
        defender:     String,
        save_type:    SaveType,
        vs:           Option<String>,
        roll:         i32,
        bonus:        i32,
        dc:           i32,
        success:      bool,
    },
    /// An attack that never reached the AC roll because the concealment check failed.
    Concealment {
        timestamp_ms:    u64,
        attacker:        String,
        defender:        String,
        concealment_pct: u8,
        missed:          bool,
    },
    Heal {
        timestamp_ms: u64,
        actor:        String,
        kind:         HealKind,
    },
    Death {
        timestamp_ms: u64,
        killer:       String,
        victim:       String,
    },
    Unparseable,
}

impl CombatEvent {
    pub fn timestamp_ms(&self) -> Option<u64> {
        match self {
            Self::Attack      { timestamp_ms, .. } => Some(*timestamp_ms),
            Self::Damage      { timestamp_ms, .. } => Some(*timestamp_ms),
            Self::Save        { timestamp_ms, .. } => Some(*timestamp_ms),
            Self::Concealment { timestamp_ms, .. } => Some(*timestamp_ms),
            Self::Heal        { timestamp_ms, .. } => Some(*timestamp_ms),
            Self::Death       { timestamp_ms, .. } => Some(*timestamp_ms),
            Self::Unparseable                      => None,
        }
    }

    /// Name of the entity that performed this action, if any.
    pub fn actor(&self) -> Option<&str> {
        match self {
            Self::Attack      { attacker, .. } => Some(attacker),
            Self::Damage      { source, .. }   => Some(source),
            Self::Concealment { attacker, .. } => Some(attacker),
            Self::Heal        { actor, .. }    => Some(actor),
            Self::Death       { killer, .. }   => Some(killer),
            Self::Save { .. } | Self::Unparseable => None,
        }
    }

    /// Name of the entity on the receiving end of this event, if any.
    pub fn recipient(&self) -> Option<&str> {
        match self {
            Self::Attack      { defender, .. } => Some(defender),
            Self::Damage      { target, .. }   => Some(target),
            Self::Save        { defender, .. } => Some(defender),
            Self::Concealment { defender, .. } => Some(defender),
            Self::Death       { victim, .. }   => Some(victim),
            Self::Heal { .. } | Self::Unparseable => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

fn compile(pattern: &str) -> Regex {
    // Patterns are literals in this file and covered by the tests below.
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid built-in pattern {pattern:?}: {e}"))
}

static PREFIX: Lazy<Regex> =
    Lazy::new(|| compile(r"(?i)^\[CHAT WINDOW TEXT\]\s*\[(?P<stamp>[^\]]+)\]\s*"));

/// Time of day inside the stamp, e.g. `Thu Jan 15 20:14:33`.
static STAMP_CLOCK: Lazy<Regex> =
    Lazy::new(|| compile(r"(\d{1,2}):(\d{2}):(\d{2})\s*$"));

static ATTACK_CONCEALED: Lazy<Regex> = Lazy::new(|| compile(
    r"(?i)^(?P<aoo>Attack Of Opportunity\s*:\s*)?(?P<attacker>[^:]+?)\s+attacks\s+(?P<defender>[^:]+?)\s*:\s*\*target concealed:\s*(?P<conceal>\d+)%\*\s*:\s*\((?P<roll>\d+)\s*\+\s*(?P<bonus>-?\d+)\s*=\s*(?P<total>-?\d+)[^)]*\)\s*:\s*\*(?P<outcome>critical hit|hit|miss|parried|resisted)\*",
));

static ATTACK_CONCEALED_UNRESOLVED: Lazy<Regex> = Lazy::new(|| compile(
    r"(?i)^(?P<aoo>Attack Of Opportunity\s*:\s*)?(?P<attacker>[^:]+?)\s+attacks\s+(?P<defender>[^:]+?)\s*:\s*\*target concealed:\s*(?P<conceal>\d+)%\*\s*:\s*\((?P<roll>\d+)\s*\+\s*(?P<bonus>-?\d+)\s*=\s*(?P<total>-?\d+)[^)]*\)\s*$",
));

static CONCEALMENT_MISS: Lazy<Regex> = Lazy::new(|| compile(
    r"(?i)^(?:Attack Of Opportunity\s*:\s*)?(?P<attacker>[^:]+?)\s+attacks\s+(?P<defender>[^:]+?)\s*:\s*\*target concealed:\s*(?P<conceal>\d+)%\*\s*$",
));

static ATTACK: Lazy<Regex> = Lazy::new(|| compile(
    r"(?i)^(?P<aoo>Attack Of Opportunity\s*:\s*)?(?P<attacker>[^:]+?)\s+attacks\s+(?P<defender>[^:]+?)\s*:\s*\*(?P<outcome>critical hit|hit|miss|parried|resisted)\*\s*(?::\s*\((?P<roll>\d+)\s*\+\s*(?P<bonus>-?\d+)\s*=\s*(?P<total>-?\d+))?",
));

static SAVE: Lazy<Regex> = Lazy::new(|| compile(
    r"(?i)^(?:SAVE:\s*)?(?P<defender>[^:]+?)\s*:\s*(?P<save>Fortitude|Fort|Reflex|Will)\s+Save(?:\s+vs\.\s*(?P<vs>[^:]+?))?\s*:\s*\*(?P<outcome>success|failed)\*\s*:\s*\((?P<roll>\d+)\s*\+\s*(?P<bonus>-?\d+)\s*(?:=\s*-?\d+\s*)?vs\.\s*DC:\s*(?P<dc>\d+)\)",
));

static DAMAGE: Lazy<Regex> = Lazy::new(|| compile(
    r"(?i)^(?P<source>[^:]+?)\s+damages\s+(?P<target>[^:]+?)\s*:\s*(?P<amount>\d+)(?:\s*\((?P<breakdown>[^)]*)\))?",
));

static DAMAGE_PART: Lazy<Regex> =
    Lazy::new(|| compile(r"(\d+)\s+([A-Za-z]+(?:\s+[A-Za-z]+)?)"));

static HEAL_POTION: Lazy<Regex> =
    Lazy::new(|| compile(r"(?i)^(?P<actor>.+?)\s+uses\s+(?P<item>Potion of Heal.*)$"));

static HARM_SELF: Lazy<Regex> =
    Lazy::new(|| compile(r"(?i)^(?P<actor>.+?)\s+casts\s+Harm Self \(Undead\)"));

// Names never contain `:` or `[`, so `Tobin: [Party] we killed ...` is chat, not a kill.
static KILL: Lazy<Regex> =
    Lazy::new(|| compile(r"(?i)^(?P<killer>[^:\[]+?)\s+killed\s+(?P<victim>[^:\[]+)$"));

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Remove the `[CHAT WINDOW TEXT] [timestamp]` prefix and surrounding whitespace.
pub fn strip_prefix(line: &str) -> &str {
    let line = line.trim();
    match PREFIX.find(line) {
        Some(m) => line[m.end()..].trim(),
        None    => line,
    }
}

/// Participant names sometimes carry sentence punctuation (`killed Goblin.`).
pub fn clean_name(name: &str) -> String {
    name.trim()
        .trim_end_matches(['.', '!', ','])
        .trim()
        .to_owned()
}

/// "positive energy" -> "Positive Energy", matching how the client capitalises types.
fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None        => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn int(caps: &Captures, name: &str) -> Option<i32> {
    caps.name(name)?.as_str().parse().ok()
}

fn text(caps: &Captures, name: &str) -> String {
    caps.name(name).map(|m| clean_name(m.as_str())).unwrap_or_default()
}

fn roll(caps: &Captures) -> Option<Roll> {
    Some(Roll {
        roll:  int(caps, "roll")?,
        bonus: int(caps, "bonus")?,
        total: int(caps, "total")?,
    })
}

fn concealment(caps: &Captures) -> Option<u8> {
    caps.name("conceal")?.as_str().parse().ok()
}

/// Split a damage breakdown such as `10 Physical 15 Fire` into typed parts.
/// Zero-amount parts are kept; the client prints them for immunities.
pub fn parse_breakdown(breakdown: &str) -> Vec<DamagePart> {
    DAMAGE_PART
        .captures_iter(breakdown)
        .filter_map(|c| {
            Some(DamagePart {
                amount:      c.get(1)?.as_str().parse().ok()?,
                damage_type: title_case(c.get(2)?.as_str()),
            })
        })
        .collect()
}

fn attack(caps: &Captures, ts: u64, outcome: AttackOutcome) -> CombatEvent {
    CombatEvent::Attack {
        timestamp_ms: ts,
        attacker:     text(caps, "attacker"),
        defender:     text(caps, "defender"),
        outcome,
        roll:         roll(caps),
        concealment:  concealment(caps),
        ac_hint:      None,
        opportunity:  caps.name("aoo").is_some(),
    }
}

fn outcome(caps: &Captures) -> AttackOutcome {
    caps.name("outcome")
        .map(|m| AttackOutcome::from_log(m.as_str()))
        .unwrap_or(AttackOutcome::Unresolved)
}

/// Parse one raw log line stamped with `ts` (see `LogClock`).
///
/// Never fails: lines that match no rule (chat, loot, server messages) come
/// back as `CombatEvent::Unparseable`.
pub fn parse_line(raw: &str, ts: u64) -> CombatEvent {
    let line = strip_prefix(raw);
    if line.is_empty() {
        return CombatEvent::Unparseable;
    }

    if let Some(c) = ATTACK_CONCEALED.captures(line) {
        return attack(&c, ts, outcome(&c));
    }
    if let Some(c) = ATTACK_CONCEALED_UNRESOLVED.captures(line) {
        return attack(&c, ts, AttackOutcome::Unresolved);
    }
    if let Some(c) = CONCEALMENT_MISS.captures(line) {
        return CombatEvent::Concealment {
            timestamp_ms:    ts,
            attacker:        text(&c, "attacker"),
            defender:        text(&c, "defender"),
            concealment_pct: concealment(&c).unwrap_or(0),
            missed:          true,
        };
    }
    if let Some(c) = ATTACK.captures(line) {
        return attack(&c, ts, outcome(&c));
    }
    if let Some(c) = SAVE.captures(line) {
        if let (Some(roll), Some(bonus), Some(dc)) = (int(&c, "roll"), int(&c, "bonus"), int(&c, "dc")) {
            return CombatEvent::Save {
                timestamp_ms: ts,
                defender:     text(&c, "defender"),
                save_type:    SaveType::from_log(&c["save"]),
                vs:           c.name("vs").map(|m| m.as_str().trim().to_owned()),
                roll,
                bonus,
                dc,
                success:      c["outcome"].eq_ignore_ascii_case("success"),
            };
        }
    }
    if let Some(c) = DAMAGE.captures(line) {
        if let Ok(amount) = c["amount"].parse::<u32>() {
            return CombatEvent::Damage {
                timestamp_ms: ts,
                source:       text(&c, "source"),
                target:       text(&c, "target"),
                amount,
                parts:        c.name("breakdown").map(|b| parse_breakdown(b.as_str())).unwrap_or_default(),
            };
        }
    }
    if let Some(c) = HEAL_POTION.captures(line) {
        return CombatEvent::Heal {
            timestamp_ms: ts,
            actor:        text(&c, "actor"),
            kind:         HealKind::Potion(c["item"].trim().to_owned()),
        };
    }
    if let Some(c) = HARM_SELF.captures(line) {
        return CombatEvent::Heal {
            timestamp_ms: ts,
            actor:        text(&c, "actor"),
            kind:         HealKind::HarmSelf,
        };
    }
    if let Some(c) = KILL.captures(line) {
        return CombatEvent::Death {
            timestamp_ms: ts,
            killer:       text(&c, "killer"),
            victim:       text(&c, "victim"),
        };
    }

    CombatEvent::Unparseable
}

/// Seconds since midnight from the `[CHAT WINDOW TEXT] [Thu Jan 15 20:14:33]` prefix.
pub fn log_clock_secs(raw: &str) -> Option<u32> {
    let stamp = PREFIX.captures(raw.trim())?.name("stamp")?.as_str();
    let c = STAMP_CLOCK.captures(stamp)?;
    let (h, m, s): (u32, u32, u32) = (c[1].parse().ok()?, c[2].parse().ok()?, c[3].parse().ok()?);
    (h < 24 && m < 60 && s < 60).then_some(h * 3600 + m * 60 + s)
}

/// Maps the log's own time of day onto the wall clock.
///
/// The stamp has no date or zone, so it is anchored to ingestion time: the
/// offset is the smallest `received - stamp` seen so far, i.e. the read with
/// the least delay. Lines that arrive in one burst after a slow poll keep
/// their real spacing. A jump of more than `REANCHOR_MS` (midnight, a new
/// session, a clock change) re-anchors. Lines without a stamp use ingestion time.
#[derive(Debug, Default)]
pub struct LogClock {
    offset_ms: Option<i64>,
}

const REANCHOR_MS: i64 = 10 * 60 * 1000;

impl LogClock {
    pub fn timestamp(&mut self, raw: &str, received_ms: u64) -> u64 {
        let Some(secs) = log_clock_secs(raw) else {
            return received_ms;
        };
        let stamp_ms = i64::from(secs) * 1000;
        let candidate = received_ms as i64 - stamp_ms;
        let offset = match self.offset_ms {
            Some(o) if candidate >= o && candidate - o <= REANCHOR_MS => o,
            _ => candidate,
        };
        self.offset_ms = Some(offset);
        (stamp_ms + offset).max(0) as u64
    }
}

/// Wall-clock milliseconds since the Unix epoch; the ingestion timestamp of a line.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Async pipeline task: receive raw lines, parse, forward typed events.
pub async fn run(mut rx: Receiver<String>, tx: Sender<CombatEvent>) -> Result<()> {
    let mut clock = LogClock::default();
    while let Some(line) = rx.recv().await {
        let event = parse_line(&line, clock.timestamp(&line, now_ms()));
        if event == CombatEvent::Unparseable {
            tracing::trace!("Unparsed line: {}", line);
            continue;
        }
        if tx.send(event).await.is_err() {
            break;
        }
    }
    Ok(())
}
