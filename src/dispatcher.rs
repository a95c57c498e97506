//! Dispatcher (`spec.md` §4.5): subject-line classification, member-command
//! resolution, and the stranger-reply throttle. The tick orchestration that
//! ties classification to store/engine calls lives in `poll_loop.rs`; this
//! module holds the decision logic that doesn't need store access.

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};
use std::time::{Duration, Instant};

use regex::Regex;
use serde_json::Value;

use crate::config::ContactConfig;
use crate::identity::MemberRegistry;

static ROOM_SUBJECT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[AIMP:Room:([^\]]+)\]").expect("static regex is valid"));
static SESSION_SUBJECT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[AIMP:(?!Room:)([^\]]+)\]").expect("static regex is valid"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectClass {
    Room(String),
    Session(String),
    None,
}

/// Classifies a subject line per §6.1: Room markers are checked first since
/// `[AIMP:Room:<id>]` would otherwise also match the bare session pattern.
pub fn classify_subject(subject: &str) -> SubjectClass {
    if let Some(caps) = ROOM_SUBJECT_RE.captures(subject) {
        return SubjectClass::Room(caps[1].to_string());
    }
    if let Some(caps) = SESSION_SUBJECT_RE.captures(subject) {
        return SubjectClass::Session(caps[1].to_string());
    }
    SubjectClass::None
}

/// §4.5.2: structured outcome of the LLM's `parse_member_request` call,
/// after dispatcher-side completeness/resolution checks.
#[derive(Debug)]
pub enum MemberCommandOutcome {
    ScheduleMeeting { topic: String, participants: Vec<String> },
    CreateRoom { topic: String, participants: Vec<String>, deadline: String, initial_proposal: Option<String> },
    MissingFields(Vec<String>),
    UnresolvedParticipants(Vec<String>),
    Unclear,
}

/// Resolves a participant name to an address: members table, then the
/// contacts map, then a bare-address heuristic (`SPEC_FULL.md` §9,
/// grounded in `original_source/handlers/command_handler.py
/// ::_find_participant_contact`).
pub fn resolve_participant(name: &str, members: &MemberRegistry, contacts: &[ContactConfig]) -> Option<String> {
    if let Some(member) = members.all().iter().find(|m| m.name.eq_ignore_ascii_case(name) || m.address.eq_ignore_ascii_case(name)) {
        return Some(member.address.clone());
    }
    if let Some(contact) = contacts.iter().find(|c| c.name.eq_ignore_ascii_case(name)) {
        return Some(contact.email.clone());
    }
    if name.contains('@') {
        return Some(name.to_string());
    }
    None
}

/// Interprets the LLM's `parse_member_request` response (`spec.md` §4.5.2,
/// §6.3) into a dispatch decision, resolving participant names along the way.
pub fn interpret_member_request(parsed: &Value, members: &MemberRegistry, contacts: &[ContactConfig]) -> MemberCommandOutcome {
    let intent = parsed.get("intent").and_then(|v| v.as_str()).unwrap_or("unclear");
    let explicit_missing: Vec<String> = parsed
        .get("missing")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    if !explicit_missing.is_empty() {
        return MemberCommandOutcome::MissingFields(explicit_missing);
    }

    let topic = parsed.get("topic").and_then(|v| v.as_str()).map(str::to_string);
    let participant_names: Vec<String> = parsed
        .get("participants")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    let mut missing = Vec::new();
    if topic.is_none() {
        missing.push("topic".to_string());
    }
    if participant_names.is_empty() {
        missing.push("participants".to_string());
    }

    match intent {
        "schedule_meeting" => {
            if !missing.is_empty() {
                return MemberCommandOutcome::MissingFields(missing);
            }
            let (resolved, unresolved) = resolve_all(&participant_names, members, contacts);
            if !unresolved.is_empty() {
                return MemberCommandOutcome::UnresolvedParticipants(unresolved);
            }
            MemberCommandOutcome::ScheduleMeeting { topic: topic.unwrap(), participants: resolved }
        }
        "create_room" => {
            let deadline = parsed.get("deadline").and_then(|v| v.as_str()).map(str::to_string);
            if deadline.is_none() {
                missing.push("deadline".to_string());
            }
            if !missing.is_empty() {
                return MemberCommandOutcome::MissingFields(missing);
            }
            let (resolved, unresolved) = resolve_all(&participant_names, members, contacts);
            if !unresolved.is_empty() {
                return MemberCommandOutcome::UnresolvedParticipants(unresolved);
            }
            MemberCommandOutcome::CreateRoom {
                topic: topic.unwrap(),
                participants: resolved,
                deadline: deadline.unwrap(),
                initial_proposal: parsed.get("initial_proposal").and_then(|v| v.as_str()).map(str::to_string),
            }
        }
        _ => MemberCommandOutcome::Unclear,
    }
}

fn resolve_all(names: &[String], members: &MemberRegistry, contacts: &[ContactConfig]) -> (Vec<String>, Vec<String>) {
    let mut resolved = Vec::new();
    let mut unresolved = Vec::new();
    for name in names {
        match resolve_participant(name, members, contacts) {
            Some(addr) => resolved.push(addr),
            None => unresolved.push(name.clone()),
        }
    }
    (resolved, unresolved)
}

/// Throttles the "how to register" reply to strangers: at most once per
/// sender per configured window. Modeled on the teacher's
/// `RateLimiter { limits: Mutex<HashMap<String, Vec<Instant>>> }` sliding
/// window, simplified to single-use-per-window since this isn't a rate
/// budget, just a once-per-period suppressor.
pub struct StrangerThrottle {
    last_reply: Mutex<HashMap<String, Instant>>,
    window: Duration,
}

impl StrangerThrottle {
    pub fn new(window_hours: u64) -> Self {
        StrangerThrottle { last_reply: Mutex::new(HashMap::new()), window: Duration::from_secs(window_hours * 3600) }
    }

    /// Returns true iff a reply should be sent now, and records that a reply
    /// was sent so subsequent calls within the window return false.
    pub fn should_reply(&self, sender: &str) -> bool {
        let mut map = self.last_reply.lock().unwrap();
        let now = Instant::now();
        match map.get(sender) {
            Some(last) if now.duration_since(*last) < self.window => false,
            _ => {
                map.insert(sender.to_string(), now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Member, Role};
    use serde_json::json;

    #[test]
    fn classifies_room_subject_before_session_pattern() {
        assert_eq!(classify_subject("[AIMP:Room:r1] budget"), SubjectClass::Room("r1".to_string()));
    }

    #[test]
    fn classifies_session_subject() {
        assert_eq!(classify_subject("[AIMP:s1] v2 quarterly sync"), SubjectClass::Session("s1".to_string()));
    }

    #[test]
    fn classifies_unrelated_subject_as_none() {
        assert_eq!(classify_subject("Re: dinner plans"), SubjectClass::None);
    }

    #[test]
    fn resolves_participant_through_fallback_chain() {
        let members = MemberRegistry::new(vec![Member { address: "alice@x.com".into(), name: "Alice".into(), role: Role::Member }]);
        let contacts = vec![ContactConfig { name: "Bob".into(), email: "bob@external.com".into() }];

        assert_eq!(resolve_participant("Alice", &members, &contacts), Some("alice@x.com".to_string()));
        assert_eq!(resolve_participant("Bob", &members, &contacts), Some("bob@external.com".to_string()));
        assert_eq!(resolve_participant("carol@other.com", &members, &contacts), Some("carol@other.com".to_string()));
        assert_eq!(resolve_participant("Nobody", &members, &contacts), None);
    }

    #[test]
    fn member_request_with_unresolved_participant_is_flagged() {
        let members = MemberRegistry::new(vec![]);
        let contacts = vec![];
        let parsed = json!({"intent": "schedule_meeting", "topic": "sync", "participants": ["Bob"], "missing": []});
        let outcome = interpret_member_request(&parsed, &members, &contacts);
        assert!(matches!(outcome, MemberCommandOutcome::UnresolvedParticipants(names) if names == vec!["Bob".to_string()]));
    }

    #[test]
    fn member_request_missing_participants_is_flagged() {
        let members = MemberRegistry::new(vec![]);
        let contacts = vec![];
        let parsed = json!({"intent": "schedule_meeting", "topic": "sync", "participants": [], "missing": []});
        let outcome = interpret_member_request(&parsed, &members, &contacts);
        assert!(matches!(outcome, MemberCommandOutcome::MissingFields(_)));
    }

    #[test]
    fn stranger_throttle_allows_one_reply_per_window() {
        let throttle = StrangerThrottle::new(24);
        assert!(throttle.should_reply("stranger@x.com"));
        assert!(!throttle.should_reply("stranger@x.com"));
        assert!(throttle.should_reply("other@x.com"));
    }
}
