//! `RoomEngine`: drives the content-negotiation state machine (`spec.md`
//! §4.4.2) through rounds, deadline finalization, and post-finalize
//! CONFIRM/REJECT veto handling.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::HubResult;
use crate::mail::OutboundEmail;
use crate::oracle::LlmOracle;
use crate::protocol::{Artifact, Room, RoomStatus};
use crate::store::{PendingEmail, Store};
use crate::transport::Transport;

pub struct RoomEngine<'a> {
    pub oracle: &'a dyn LlmOracle,
    pub transport: &'a dyn Transport,
    pub store: &'a Store,
}

enum Action {
    Propose,
    Amend,
    Accept,
    Reject,
}

impl<'a> RoomEngine<'a> {
    /// Folds pending messages into `room`, advances the round, and finalizes
    /// or broadcasts an aggregated digest (§4.4.2). `now` is the wall-clock
    /// instant used for the deadline check, injected by the caller.
    pub async fn process_round(&self, room: &mut Room, pending: &[PendingEmail], now: DateTime<Utc>) -> HubResult<Vec<i64>> {
        let mut folded_ids = Vec::new();

        for row in pending {
            folded_ids.push(row.id);
            let free_text = row.body.get("free_text").and_then(|v| v.as_str()).unwrap_or("");
            self.apply_room_action(room, &row.sender, free_text, now).await?;
        }

        room.advance_round();

        if room.all_accepted() || room.is_deadline_expired(now.timestamp()) {
            self.finalize(room, now).await?;
        } else {
            self.broadcast_digest(room).await?;
        }

        Ok(folded_ids)
    }

    async fn apply_room_action(&self, room: &mut Room, sender: &str, body: &str, now: DateTime<Utc>) -> HubResult<()> {
        let current_content = room.artifacts.values().last().map(|a| a.body_text.as_str()).unwrap_or("");
        let parsed = match self.oracle.parse_amendment(current_content, body).await {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(room_id = %room.room_id, %sender, %err, "llm failure parsing amendment, defaulting to AMEND with truncated summary");
                self.record_amendment_result(room, sender, &Action::Amend, None, body, now);
                room.record_round_reply(sender);
                return Ok(());
            }
        };
        let action = match parsed.get("action").and_then(|v| v.as_str()).map(str::to_ascii_uppercase).as_deref() {
            Some("ACCEPT") => Action::Accept,
            Some("REJECT") => Action::Reject,
            Some("PROPOSE") => Action::Propose,
            _ => Action::Amend,
        };
        let new_content = parsed.get("new_content").and_then(|v| v.as_str());

        if matches!(action, Action::Accept) {
            room.accept(sender);
        }
        self.record_amendment_result(room, sender, &action, new_content, body, now);
        room.record_round_reply(sender);
        Ok(())
    }

    fn record_amendment_result(&self, room: &mut Room, sender: &str, action: &Action, new_content: Option<&str>, body: &str, now: DateTime<Utc>) {
        let action_label = match action {
            Action::Propose => "PROPOSE",
            Action::Amend => "AMEND",
            Action::Accept => "ACCEPT",
            Action::Reject => "REJECT",
        };
        if matches!(action, Action::Propose | Action::Amend) {
            let content = new_content.unwrap_or(body);
            let local_part = sender.split('@').next().unwrap_or(sender);
            let name = format!("proposal_{local_part}_{}", now.timestamp());
            room.artifacts.insert(
                name.clone(),
                Artifact {
                    name,
                    content_type: "text/plain".to_string(),
                    body_text: content.to_string(),
                    author: sender.to_string(),
                    timestamp: now.timestamp(),
                },
            );
        }
        room.add_transcript(sender, action_label, body);
    }

    async fn broadcast_digest(&self, room: &Room) -> HubResult<()> {
        let transcript_json = serde_json::to_value(&room.transcript).unwrap_or(Value::Null);
        let current_content = room.artifacts.values().last().map(|a| a.body_text.as_str()).unwrap_or("");
        let digest = self
            .oracle
            .aggregate_amendments(current_content, &room.transcript.iter().map(|h| h.summary.clone()).collect::<Vec<_>>())
            .await
            .unwrap_or_else(|_| current_content.to_string());
        let _ = transcript_json;
        let subject = format!("[AIMP:Room:{}] {}", room.room_id, room.topic);
        let prior_ids = self.store.load_message_ids(&room.room_id)?;
        for recipient in &room.participants {
            let mut email = OutboundEmail::new(vec![recipient.clone()], subject.clone(), digest.clone()).with_references(prior_ids.clone());
            if let Some(last) = prior_ids.last() {
                email = email.in_reply_to(last.clone());
            }
            let message_id = self.transport.send(email).await?;
            self.store.save_message_id(&room.room_id, &message_id)?;
        }
        Ok(())
    }

    /// `spec.md` §4.4.2 `finalize`: sets status, records the trigger, drafts
    /// minutes (falling back to a deterministic template on LLM failure),
    /// and emails every participant.
    pub async fn finalize(&self, room: &mut Room, now: DateTime<Utc>) -> HubResult<()> {
        room.status = RoomStatus::Finalized;
        let trigger = if room.all_accepted() { "all_accepted" } else { "deadline_expired" };
        room.add_transcript("hub", "FINALIZED", format!("trigger: {trigger}"));

        let final_content = room.artifacts.values().last().map(|a| a.body_text.clone()).unwrap_or_default();
        let transcript_json = serde_json::to_value(&room.transcript).unwrap_or(Value::Null);
        let minutes = match self.oracle.generate_minutes(&room.topic, &transcript_json, &final_content).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(room_id = %room.room_id, %err, "llm failure generating minutes, using deterministic fallback");
                deterministic_minutes(room, &final_content, now)
            }
        };

        let subject = format!("[AIMP:Room:{}] Minutes: {}", room.room_id, room.topic);
        let body = format!("{minutes}\n\nReply CONFIRM or REJECT <reason>.");
        for recipient in &room.participants {
            let email = OutboundEmail::new(vec![recipient.clone()], subject.clone(), body.clone());
            let message_id = self.transport.send(email).await?;
            self.store.save_message_id(&room.room_id, &message_id)?;
        }
        Ok(())
    }

    /// Post-finalize `CONFIRM`: add to `accepted_by`, transcript entry, ack.
    pub async fn handle_confirm(&self, room: &mut Room, sender: &str) -> HubResult<()> {
        room.accept(sender);
        room.add_transcript(sender, "CONFIRM", "confirmed finalized room");
        let email = OutboundEmail::new(
            vec![sender.to_string()],
            format!("[AIMP:Room:{}] Confirmation received", room.room_id),
            "Your confirmation has been recorded.".to_string(),
        );
        self.transport.send(email).await?;
        Ok(())
    }

    /// Deadline sweep step (`spec.md` §4.3 step 4): finalizes `room` iff its
    /// deadline has already passed and it's still open. No-op otherwise.
    pub async fn finalize_if_due(&self, room: &mut Room, now: DateTime<Utc>) -> HubResult<()> {
        if room.status == RoomStatus::Open && room.is_deadline_expired(now.timestamp()) {
            self.finalize(room, now).await?;
        }
        Ok(())
    }

    /// Post-finalize `REJECT <reason>`: transcript entry, escalation to the
    /// initiator with reopen/keep choices, ack to the rejecter.
    pub async fn handle_reject(&self, room: &mut Room, sender: &str, reason: &str) -> HubResult<()> {
        room.add_transcript(sender, "REJECT", reason);
        let escalation = OutboundEmail::new(
            vec![room.initiator.clone()],
            format!("[AIMP:Room:{}] Veto recorded", room.room_id),
            format!("{sender} rejected the finalized room:\n{reason}\n\nReply REOPEN or KEEP."),
        );
        self.transport.send(escalation).await?;
        let ack = OutboundEmail::new(
            vec![sender.to_string()],
            format!("[AIMP:Room:{}] Veto recorded", room.room_id),
            "Your rejection has been recorded and escalated to the initiator.".to_string(),
        );
        self.transport.send(ack).await?;
        Ok(())
    }
}

fn deterministic_minutes(room: &Room, final_content: &str, now: DateTime<Utc>) -> String {
    let mut lines = vec![format!("# Minutes: {}", room.topic), format!("Generated: {}", now.to_rfc3339()), String::new(), "## Transcript".to_string()];
    for entry in &room.transcript {
        lines.push(format!("- [{}] {}: {}", entry.action, entry.from, entry.summary));
    }
    lines.push(String::new());
    lines.push("## Final content".to_string());
    lines.push(final_content.to_string());
    lines.join("\n")
}
