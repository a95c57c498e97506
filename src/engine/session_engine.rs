//! `SessionEngine`: drives the slot-negotiation state machine through one
//! round at a time (`spec.md` §4.4.1). Transport sends and oracle calls are
//! the only I/O; the consensus/round checks it calls stay pure functions on
//! `Session`.

use serde_json::Value;

use crate::config::NotifyMode;
use crate::error::HubResult;
use crate::mail::OutboundEmail;
use crate::oracle::LlmOracle;
use crate::protocol::{Session, SessionStatus, MAX_ROUNDS};
use crate::store::{PendingEmail, Store};
use crate::transport::Transport;

/// One inbound message folded into a round, with the pending row id carried
/// through so the caller can mark it processed after the fold completes.
pub struct SessionInput {
    pub pending_id: i64,
    pub sender: String,
    pub protocol: Option<Value>,
}

impl SessionInput {
    pub fn from_pending(pending: &PendingEmail) -> Self {
        let protocol = pending.body.get("protocol").filter(|v| !v.is_null()).cloned();
        SessionInput {
            pending_id: pending.id,
            sender: pending.sender.clone(),
            protocol,
        }
    }

    fn free_text<'a>(pending: &'a PendingEmail) -> Option<&'a str> {
        pending.body.get("free_text").and_then(|v| v.as_str())
    }
}

pub struct SessionEngine<'a> {
    pub oracle: &'a dyn LlmOracle,
    pub transport: &'a dyn Transport,
    pub store: &'a Store,
    pub hub_domain: String,
    pub owner_address: String,
    pub notify_mode: NotifyMode,
    /// Stall threshold (`spec.md` §6.5 `max_rounds`, default `MAX_ROUNDS`).
    pub max_rounds: usize,
}

impl<'a> SessionEngine<'a> {
    /// Folds every pending message into `session`, advances the round, and
    /// applies the transition decision (§4.4.1 steps 1-3). Returns the list
    /// of pending row ids that were folded, so the caller marks them
    /// processed only after this function returns successfully.
    pub async fn process_round(&self, session: &mut Session, pending: &[PendingEmail]) -> HubResult<Vec<i64>> {
        let mut folded_ids = Vec::new();

        for row in pending {
            let input = SessionInput::from_pending(row);
            folded_ids.push(input.pending_id);

            if let Some(protocol) = &input.protocol {
                self.fold_protocol_attachment(session, &input.sender, protocol);
            } else if let Some(text) = SessionInput::free_text(row) {
                self.fold_free_text_reply(session, &input.sender, text).await?;
            }
            session.record_round_reply(&input.sender);
        }

        session.advance_round();

        if session.is_fully_resolved() {
            self.confirm(session).await?;
        } else if session.is_stalled(self.max_rounds) {
            self.escalate(session).await?;
        } else {
            self.counter(session).await?;
        }

        Ok(folded_ids)
    }

    /// Merges the attachment's option lists (dedup) and applies the sender's
    /// own recorded vote, per `spec.md` §4.4.1 step A. Unknown item/option
    /// combinations are skipped with a warning rather than failing the round.
    fn fold_protocol_attachment(&self, session: &mut Session, sender: &str, protocol: &Value) {
        let Some(proposals) = protocol.get("proposals").and_then(|p| p.as_object()) else {
            return;
        };
        for (item, item_value) in proposals {
            if let Some(options) = item_value.get("options").and_then(|o| o.as_array()) {
                for option in options.iter().filter_map(|o| o.as_str()) {
                    session.add_option(item, option);
                }
            }
            if let Some(choice) = item_value
                .get("votes")
                .and_then(|v| v.get(sender))
                .and_then(|v| v.as_str())
            {
                if let Err(err) = session.apply_vote(sender, item, choice) {
                    tracing::warn!(session_id = %session.session_id, %sender, item, choice, %err, "skipping vote from protocol attachment");
                }
            }
        }
    }

    /// Falls back to the LLM oracle for plain-text replies (§4.4.1 step B /
    /// §4.4.3): a dynamically-discovered choice is added as an option first,
    /// since humans never see the enumerated option list (`spec.md` §9).
    async fn fold_free_text_reply(&self, session: &mut Session, sender: &str, text: &str) -> HubResult<()> {
        let proposals_json = serde_json::to_value(&session.proposals).unwrap_or(Value::Null);
        let parsed = match self.oracle.parse_human_reply(&proposals_json, text).await {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(session_id = %session.session_id, %sender, %err, "llm failure parsing free-text vote, skipping");
                return Ok(());
            }
        };
        let Some(votes) = parsed.get("votes").and_then(|v| v.as_object()) else {
            return Ok(());
        };
        for (item, choice_value) in votes {
            let Some(choice) = choice_value.as_str() else { continue };
            session.add_option(item, choice);
            if let Err(err) = session.apply_vote(sender, item, choice) {
                tracing::warn!(session_id = %session.session_id, %sender, item, choice, %err, "skipping llm-derived vote");
            }
        }
        Ok(())
    }

    async fn confirm(&self, session: &mut Session) -> HubResult<()> {
        session.status = SessionStatus::Confirmed;
        session.bump_version();
        session.add_history("hub", "confirm", "all items resolved");
        self.broadcast(session, "confirmed").await?;
        self.notify_owner(session, &format!("Session '{}' confirmed.", session.topic)).await?;
        Ok(())
    }

    /// Per `spec.md` §4.4.1 step 2: escalation sets status and notifies the
    /// owner, but unlike confirm/counter does not bump version or append a
    /// history entry.
    async fn escalate(&self, session: &mut Session) -> HubResult<()> {
        session.status = SessionStatus::Escalated;
        let summary = render_human_summary(session);
        self.notify_owner(session, &summary).await?;
        Ok(())
    }

    async fn counter(&self, session: &mut Session) -> HubResult<()> {
        session.bump_version();
        session.add_history("hub", "counter", format!("round {} summary", session.current_round));
        self.broadcast(session, "counter").await?;
        Ok(())
    }

    /// Sends the current wire form to every participant except `from`
    /// (confirm replies exclude no one but the hub itself; this mirrors the
    /// original's `_send_session_reply` recipient exclusion of self).
    async fn broadcast(&self, session: &Session, action: &str) -> HubResult<()> {
        let prior_ids = self.store.load_message_ids(&session.session_id)?;
        let subject = format!("[AIMP:{}] v{} {}", session.session_id, session.version, session.topic);
        let body = render_human_summary(session);
        for recipient in &session.participants {
            let mut email = OutboundEmail::new(vec![recipient.clone()], subject.clone(), format!("{body}\n\n[{action}]"))
                .with_references(prior_ids.clone());
            if let Some(last) = prior_ids.last() {
                email = email.in_reply_to(last.clone());
            }
            let message_id = self.transport.send(email).await?;
            self.store.save_message_id(&session.session_id, &message_id)?;
        }
        Ok(())
    }

    /// Owner/admin notification (confirm, escalate): per `spec.md` §6.5,
    /// `notify_mode` picks between an email to `owner_address` and a
    /// structured stdout event. Falls back to stdout regardless of mode if
    /// no owner is configured, since there is nowhere to send the email.
    async fn notify_owner(&self, session: &Session, summary: &str) -> HubResult<()> {
        if self.notify_mode == NotifyMode::Stdout || self.owner_address.is_empty() {
            tracing::info!(session_id = %session.session_id, topic = %session.topic, summary, "owner notification");
            return Ok(());
        }
        let email = OutboundEmail::new(
            vec![self.owner_address.clone()],
            format!("[AIMP:{}] {}", session.session_id, session.topic),
            summary.to_string(),
        );
        self.transport.send(email).await?;
        Ok(())
    }
}

fn render_human_summary(session: &Session) -> String {
    let mut lines = vec![format!("Session: {}", session.topic), format!("Status: {:?}", session.status)];
    for (item, proposal) in &session.proposals {
        let votes: Vec<String> = proposal
            .votes
            .iter()
            .map(|(addr, choice)| format!("  {addr}: {}", choice.clone().unwrap_or_else(|| "unvoted".to_string())))
            .collect();
        lines.push(format!("{item}:"));
        lines.extend(votes);
    }
    lines.join("\n")
}

/// Builds an invite/vote-request email for a newly-created session. Not part
/// of `process_round` (no round is in progress yet), but lives here since it
/// shares `render_human_summary` and the threading helpers.
pub async fn send_invitations(transport: &dyn Transport, store: &Store, session: &Session) -> HubResult<()> {
    let subject = format!("[AIMP:{}] v{} {}", session.session_id, session.version, session.topic);
    let body = render_human_summary(session);
    for recipient in &session.participants {
        if recipient.eq_ignore_ascii_case(&session.initiator) {
            continue;
        }
        let email = OutboundEmail::new(vec![recipient.clone()], subject.clone(), body.clone());
        let message_id = transport.send(email).await?;
        store.save_message_id(&session.session_id, &message_id)?;
    }
    Ok(())
}
