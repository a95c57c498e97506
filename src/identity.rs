//! Identity/registration layer (`spec.md` §4.5.1, §4.5.3, §4.5.4): who the
//! hub will act on behalf of, and the heuristics that keep it from replying
//! to machines.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
    Trusted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub address: String,
    pub name: String,
    pub role: Role,
}

/// Case-insensitive address → member lookup, plus self-registration.
#[derive(Debug, Default)]
pub struct MemberRegistry {
    members: Vec<Member>,
}

impl MemberRegistry {
    pub fn new(members: Vec<Member>) -> Self {
        MemberRegistry { members }
    }

    pub fn identify(&self, address: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.address.eq_ignore_ascii_case(address))
    }

    /// Registers `address` as a `trusted` member if not already known.
    /// Returns the new member record, or the existing one if present.
    pub fn register_trusted(&mut self, address: &str, display_name: &str) -> Member {
        if let Some(existing) = self.identify(address) {
            return existing.clone();
        }
        let member = Member {
            address: address.to_string(),
            name: display_name.to_string(),
            role: Role::Trusted,
        };
        self.members.push(member.clone());
        member
    }

    pub fn all(&self) -> &[Member] {
        &self.members
    }

    /// The address escalation/confirmation notices go to: the first admin
    /// on record, if any.
    pub fn owner_address(&self) -> Option<&str> {
        self.members.iter().find(|m| m.role == Role::Admin).map(|m| m.address.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Auto-reply / bounce suppression (§4.5.3)
// ─────────────────────────────────────────────────────────────────────────

const BOUNCE_LOCAL_PARTS: [&str; 12] = [
    "no-reply",
    "noreply",
    "mailer-daemon",
    "postmaster",
    "bounce",
    "bounces",
    "do-not-reply",
    "donotreply",
    "auto-reply",
    "autoreply",
    "notifications",
    "notification",
];

const BOUNCE_SUBJECT_PREFIXES: [&str; 10] = [
    "out of office",
    "automatic reply",
    "auto reply",
    "autoreply",
    "undeliverable",
    "delivery status notification",
    "delivery failure",
    "mail delivery failed",
    "returned mail",
    "failure notice",
];

/// True iff the sender's local-part or the subject matches a known
/// auto-reply/bounce signature. A positive match means: drop silently.
pub fn looks_like_auto_reply(sender: &str, subject: &str) -> bool {
    let local_part = sender.split('@').next().unwrap_or(sender).to_lowercase();
    if BOUNCE_LOCAL_PARTS.iter().any(|p| local_part == *p || local_part.contains(p)) {
        return true;
    }
    let subject_trimmed = subject.trim().to_lowercase();
    BOUNCE_SUBJECT_PREFIXES.iter().any(|p| subject_trimmed.starts_with(p))
}

// ─────────────────────────────────────────────────────────────────────────
// Invite codes (§4.5.4)
// ─────────────────────────────────────────────────────────────────────────

static INVITE_SUBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[AIMP-INVITE:([^\]]+)\]").expect("static invite regex is valid"));

/// Extracts the invite code from a subject line, if the `[AIMP-INVITE:...]`
/// marker is present.
pub fn extract_invite_code(subject: &str) -> Option<String> {
    INVITE_SUBJECT_RE.captures(subject).map(|c| c[1].to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteCode {
    pub code: String,
    pub expires: Option<DateTime<Utc>>,
    pub max_uses: Option<u32>,
    pub used: u32,
}

impl InviteCode {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        if let Some(expires) = self.expires {
            if now > expires {
                return false;
            }
        }
        if let Some(max_uses) = self.max_uses {
            if max_uses > 0 && self.used >= max_uses {
                return false;
            }
        }
        true
    }

    pub fn consume(&mut self) {
        self.used += 1;
    }
}
