//! Wiring: turns a `HubConfig` plus injected `Transport`/`LlmOracle`
//! collaborators into a runnable `PollLoop`. Config-file loading (YAML/TOML),
//! IMAP/SMTP transport construction, and the CLI that calls this are all out
//! of scope (`spec.md` §1) — the embedding binary owns those and calls
//! `hub::build` with the concrete pieces it constructed.

use crate::config::HubConfig;
use crate::error::{HubError, HubResult};
use crate::identity::{InviteCode, Member, MemberRegistry, Role};
use crate::oracle::LlmOracle;
use crate::poll_loop::PollLoop;
use crate::store::Store;
use crate::transport::Transport;

/// Builds a `PollLoop` ready for `run_forever`/`tick`. Opens (and migrates)
/// the sqlite file named by `config.db_path`; fails loudly (`HubError::
/// Config`) if the config is missing a field needed to run, matching §7's
/// "startup validation fails loudly and aborts" propagation policy.
pub fn build(
    config: HubConfig,
    transport: Box<dyn Transport>,
    oracle: Box<dyn LlmOracle>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> HubResult<PollLoop> {
    if config.email.is_empty() {
        return Err(HubError::Config("hub.email must not be empty".to_string()));
    }
    if config.db_path.is_empty() {
        return Err(HubError::Config("db_path must not be empty".to_string()));
    }

    let store = Store::open(&config.db_path)?;

    let members: Vec<Member> = config
        .members
        .iter()
        .map(|m| Member { address: m.email.clone(), name: m.display_name.clone(), role: m.role })
        .collect();
    if !members.iter().any(|m| m.role == Role::Admin) {
        tracing::warn!("no admin configured; owner notifications will fall back to stdout logging");
    }
    let registry = MemberRegistry::new(members);

    let invite_codes: Vec<InviteCode> = config
        .invite_codes
        .iter()
        .map(|c| InviteCode { code: c.code.clone(), expires: c.expires, max_uses: c.max_uses, used: 0 })
        .collect();

    Ok(PollLoop::new(config, store, transport, oracle, registry, invite_codes, shutdown_rx))
}
