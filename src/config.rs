//! Configuration surface (`spec.md` §6.5). These structs describe the shape
//! of hub configuration; no loader (YAML/TOML/env parsing) is implemented
//! here, as loading config from a file is CLI/outer-surface territory and
//! out of scope for this crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_poll_interval_seconds() -> u64 {
    30
}

fn default_max_rounds() -> usize {
    5
}

fn default_stranger_reply_window_hours() -> u64 {
    24
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    pub db_path: String,
    /// `hub.email` (§6.5): the hub's own address, used to skip self-sent mail
    /// and as the `<hub-domain>` component of generated `Message-ID`s.
    pub email: String,
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    #[serde(default = "default_stranger_reply_window_hours")]
    pub stranger_reply_window_hours: u64,
    #[serde(default)]
    pub members: Vec<MemberConfig>,
    #[serde(default)]
    pub contacts: Vec<ContactConfig>,
    #[serde(default)]
    pub invite_codes: Vec<InviteCodeConfig>,
    pub oracle: OracleConfig,
    #[serde(default)]
    pub notify_mode: NotifyMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberConfig {
    pub email: String,
    pub display_name: String,
    #[serde(default = "default_member_role")]
    pub role: crate::identity::Role,
}

fn default_member_role() -> crate::identity::Role {
    crate::identity::Role::Member
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactConfig {
    pub name: String,
    pub email: String,
}

/// Mirrors `spec.md` §6.5 `invite_codes: [{code, expires?, max_uses?}]`; the
/// mutable `used` counter is tracked by `identity::InviteCode` at runtime,
/// not here — this struct is only the config-file shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteCodeConfig {
    pub code: String,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_uses: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// `notify_mode` (`spec.md` §6.5): whether owner/admin notifications
/// (confirm, escalate) go out as an email to `owner_address`, or as a
/// structured `tracing` event on the output stream for a caller without a
/// mailbox to watch (e.g. a demo harness piping stdout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotifyMode {
    #[default]
    Email,
    Stdout,
}
