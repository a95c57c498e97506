//! AIMP/0.1 protocol data model: `Session`, `Room`, and the pure functions
//! that operate on them. No I/O, no logging, no wall-clock reads outside of
//! `#[cfg(test)]` fixtures — every timestamp is injected by the caller.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::HubError;

pub const PROTOCOL_VERSION: &str = "AIMP/0.1";
pub const MAX_ROUNDS: usize = 5;

/// One entry in a Session's or Room's append-only history/transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub version: u64,
    pub from: String,
    pub action: String,
    pub summary: String,
}

/// Vote state for a single agenda item (`time`, `location`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalItem {
    pub options: Vec<String>,
    pub votes: std::collections::BTreeMap<String, Option<String>>,
}

impl ProposalItem {
    fn add_option(&mut self, option: &str) {
        if !self.options.iter().any(|o| o == option) {
            self.options.push(option.to_string());
        }
    }

    fn vote(&mut self, voter: &str, choice: &str) -> Result<(), HubError> {
        if !self.options.iter().any(|o| o == choice) {
            return Err(HubError::UnknownOption {
                item: String::new(),
                choice: choice.to_string(),
            });
        }
        self.votes.insert(voter.to_string(), Some(choice.to_string()));
        Ok(())
    }

    /// `Some(option)` iff every participant has voted and all votes agree.
    fn check_consensus(&self) -> Option<String> {
        let cast: Vec<&String> = self.votes.values().filter_map(|v| v.as_ref()).collect();
        if cast.is_empty() || cast.len() != self.votes.len() {
            return None;
        }
        let first = cast[0];
        if cast.iter().all(|v| *v == first) {
            Some(first.clone())
        } else {
            None
        }
    }
}

/// A scheduling negotiation over a fixed (extensible) set of agenda items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub topic: String,
    pub participants: Vec<String>,
    pub initiator: String,
    pub version: u64,
    pub proposals: std::collections::BTreeMap<String, ProposalItem>,
    pub history: Vec<HistoryEntry>,
    pub status: SessionStatus,
    pub current_round: u64,
    pub round_respondents: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Negotiating,
    Confirmed,
    Escalated,
}

/// Default agenda items every new Session is seeded with.
const DEFAULT_ITEMS: [&str; 2] = ["time", "location"];

impl Session {
    pub fn new(session_id: impl Into<String>, topic: impl Into<String>, participants: Vec<String>, initiator: impl Into<String>) -> Self {
        let mut proposals = std::collections::BTreeMap::new();
        for item in DEFAULT_ITEMS {
            proposals.insert(
                item.to_string(),
                ProposalItem {
                    options: Vec::new(),
                    votes: participants.iter().map(|p| (p.clone(), None)).collect(),
                },
            );
        }
        let initiator = initiator.into();
        let mut session = Session {
            session_id: session_id.into(),
            topic: topic.into(),
            participants,
            initiator: initiator.clone(),
            version: 0,
            proposals,
            history: Vec::new(),
            status: SessionStatus::Negotiating,
            current_round: 1,
            round_respondents: BTreeSet::new(),
        };
        // The initiator's proposal counts as the opening history entry; the
        // stall predicate (history.len() >= MAX_ROUNDS) is measured from here.
        session.add_history(initiator, "propose", "session opened");
        session
    }

    /// Adds an unvoted slot for `addr` in every existing agenda item. No-op if
    /// already present. Also adds `addr` to `participants` if missing.
    pub fn ensure_participant(&mut self, addr: &str) {
        if !self.participants.iter().any(|p| p.eq_ignore_ascii_case(addr)) {
            self.participants.push(addr.to_string());
        }
        for item in self.proposals.values_mut() {
            item.votes.entry(addr.to_string()).or_insert(None);
        }
    }

    /// Idempotent append of a new option to `item`. Creates the item if absent.
    pub fn add_option(&mut self, item: &str, option: &str) {
        let entry = self.proposals.entry(item.to_string()).or_insert_with(|| ProposalItem {
            options: Vec::new(),
            votes: self.participants.iter().map(|p| (p.clone(), None)).collect(),
        });
        entry.add_option(option);
    }

    /// Records `voter`'s choice for `item`. Ensures `voter` is a participant
    /// first (I2 referential integrity: fails if `choice` isn't an option).
    pub fn apply_vote(&mut self, voter: &str, item: &str, choice: &str) -> Result<(), HubError> {
        self.ensure_participant(voter);
        let entry = self
            .proposals
            .get_mut(item)
            .ok_or_else(|| HubError::InvariantViolation(format!("unknown agenda item '{item}'")))?;
        entry.vote(voter, choice).map_err(|_| HubError::UnknownOption {
            item: item.to_string(),
            choice: choice.to_string(),
        })
    }

    /// `{item -> resolved_choice}`; an item is absent from the map (well,
    /// present with `None`) when it hasn't reached consensus yet.
    pub fn check_consensus(&self) -> std::collections::BTreeMap<String, Option<String>> {
        self.proposals
            .iter()
            .map(|(name, item)| (name.clone(), item.check_consensus()))
            .collect()
    }

    pub fn is_fully_resolved(&self) -> bool {
        self.check_consensus().values().all(|v| v.is_some())
    }

    pub fn record_round_reply(&mut self, addr: &str) {
        self.round_respondents.insert(addr.to_string());
    }

    /// I4: round 1 needs every non-initiator; round >= 2 needs everyone,
    /// including the initiator. An empty participant list is never complete.
    pub fn is_round_complete(&self) -> bool {
        if self.participants.is_empty() {
            return false;
        }
        let required: Vec<&String> = if self.current_round == 1 {
            self.participants.iter().filter(|p| !p.eq_ignore_ascii_case(&self.initiator)).collect()
        } else {
            self.participants.iter().collect()
        };
        required
            .iter()
            .all(|p| self.round_respondents.iter().any(|r| r.eq_ignore_ascii_case(p)))
    }

    pub fn advance_round(&mut self) {
        self.current_round += 1;
        self.round_respondents.clear();
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    pub fn add_history(&mut self, from: impl Into<String>, action: impl Into<String>, summary: impl Into<String>) {
        self.history.push(HistoryEntry {
            version: self.version,
            from: from.into(),
            action: action.into(),
            summary: summary.into(),
        });
    }

    /// The stall predicate (`spec.md` §4.4.1 transition 2): stall is measured
    /// against the append-only history length, not `current_round` — they
    /// diverge once a round folds in multiple messages without reaching
    /// consensus (see `SPEC_FULL.md` §3 clarification). `max_rounds` is the
    /// configurable threshold (`spec.md` §6.5 `max_rounds`, default
    /// `MAX_ROUNDS`).
    pub fn is_stalled(&self, max_rounds: usize) -> bool {
        self.history.len() >= max_rounds
    }

    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::to_value(WireSession::from(self)).expect("Session always serializes")
    }

    pub fn from_wire(value: &serde_json::Value) -> Result<Self, HubError> {
        let wire: WireSession = serde_json::from_value(value.clone()).map_err(|e| HubError::Parse(e.to_string()))?;
        Ok(wire.into())
    }
}

/// Wire-form shadow of `Session` matching `spec.md` §6.2 field names exactly.
#[derive(Serialize, Deserialize)]
struct WireSession {
    protocol: String,
    session_id: String,
    version: u64,
    topic: String,
    from: String,
    participants: Vec<String>,
    proposals: std::collections::BTreeMap<String, ProposalItem>,
    status: SessionStatus,
    history: Vec<HistoryEntry>,
    current_round: u64,
    round_respondents: BTreeSet<String>,
}

impl From<&Session> for WireSession {
    fn from(s: &Session) -> Self {
        WireSession {
            protocol: PROTOCOL_VERSION.to_string(),
            session_id: s.session_id.clone(),
            version: s.version,
            topic: s.topic.clone(),
            from: s.initiator.clone(),
            participants: s.participants.clone(),
            proposals: s.proposals.clone(),
            status: s.status,
            history: s.history.clone(),
            current_round: s.current_round,
            round_respondents: s.round_respondents.clone(),
        }
    }
}

impl From<WireSession> for Session {
    fn from(w: WireSession) -> Self {
        Session {
            session_id: w.session_id,
            topic: w.topic,
            participants: w.participants,
            initiator: w.from,
            version: w.version,
            proposals: w.proposals,
            history: w.history,
            status: w.status,
            current_round: w.current_round,
            round_respondents: w.round_respondents,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Room
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub content_type: String,
    pub body_text: String,
    pub author: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Open,
    Finalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionRules {
    Majority,
    Consensus,
    InitiatorDecides,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub room_id: String,
    pub topic: String,
    pub initiator: String,
    pub participants: Vec<String>,
    pub deadline: i64,
    pub artifacts: std::collections::BTreeMap<String, Artifact>,
    pub transcript: Vec<HistoryEntry>,
    pub status: RoomStatus,
    pub accepted_by: BTreeSet<String>,
    pub resolution_rules: ResolutionRules,
    pub current_round: u64,
    pub round_respondents: BTreeSet<String>,
}

impl Room {
    pub fn new(
        room_id: impl Into<String>,
        topic: impl Into<String>,
        initiator: impl Into<String>,
        participants: Vec<String>,
        deadline: i64,
        resolution_rules: ResolutionRules,
    ) -> Self {
        Room {
            room_id: room_id.into(),
            topic: topic.into(),
            initiator: initiator.into(),
            participants,
            deadline,
            artifacts: std::collections::BTreeMap::new(),
            transcript: Vec::new(),
            status: RoomStatus::Open,
            accepted_by: BTreeSet::new(),
            resolution_rules,
            current_round: 1,
            round_respondents: BTreeSet::new(),
        }
    }

    pub fn is_participant(&self, addr: &str) -> bool {
        self.participants.iter().any(|p| p.eq_ignore_ascii_case(addr))
    }

    pub fn accept(&mut self, addr: &str) {
        self.accepted_by.insert(addr.to_string());
    }

    pub fn all_accepted(&self) -> bool {
        !self.participants.is_empty()
            && self
                .participants
                .iter()
                .all(|p| self.accepted_by.iter().any(|a| a.eq_ignore_ascii_case(p)))
    }

    pub fn is_deadline_expired(&self, now: i64) -> bool {
        self.deadline < now
    }

    pub fn record_round_reply(&mut self, addr: &str) {
        self.round_respondents.insert(addr.to_string());
    }

    /// Same I4 semantics as Session::is_round_complete.
    pub fn is_round_complete(&self) -> bool {
        if self.participants.is_empty() {
            return false;
        }
        let required: Vec<&String> = if self.current_round == 1 {
            self.participants.iter().filter(|p| !p.eq_ignore_ascii_case(&self.initiator)).collect()
        } else {
            self.participants.iter().collect()
        };
        required
            .iter()
            .all(|p| self.round_respondents.iter().any(|r| r.eq_ignore_ascii_case(p)))
    }

    pub fn advance_round(&mut self) {
        self.current_round += 1;
        self.round_respondents.clear();
    }

    pub fn add_transcript(&mut self, from: impl Into<String>, action: impl Into<String>, summary: impl Into<String>) {
        let version = self.transcript.len() as u64 + 1;
        self.transcript.push(HistoryEntry {
            version,
            from: from.into(),
            action: action.into(),
            summary: summary.into(),
        });
    }

    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("Room always serializes")
    }

    pub fn from_wire(value: &serde_json::Value) -> Result<Self, HubError> {
        serde_json::from_value(value.clone()).map_err(|e| HubError::Parse(e.to_string()))
    }
}
