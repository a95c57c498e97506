//! Poll Loop (`spec.md` §4.3): the tick algorithm. One invocation of `tick`
//! fetches, classifies, store-firsts, round-gates, and dispatches — mirroring
//! the teacher's `retention::spawn_retention_task` shape (initial delay, then
//! `loop { tick().await; sleep(interval).await }`), with a shutdown channel
//! added since this crate has no always-on web server keeping it alive.

use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::{ContactConfig, HubConfig, NotifyMode};
use crate::dispatcher::{self, MemberCommandOutcome, StrangerThrottle, SubjectClass};
use crate::engine::{RoomEngine, SessionEngine};
use crate::error::HubResult;
use crate::identity::{self, InviteCode, MemberRegistry};
use crate::mail::{InboundEmail, OutboundEmail};
use crate::oracle::LlmOracle;
use crate::protocol::{ResolutionRules, Room, Session};
use crate::store::Store;
use crate::transport::Transport;

/// Observability summary for one tick; not consumed by any wire protocol,
/// purely for logging and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub fetched: usize,
    pub processed: usize,
    pub errored: usize,
    pub rooms_finalized: usize,
}

pub struct PollLoop {
    store: Store,
    transport: Box<dyn Transport>,
    oracle: Box<dyn LlmOracle>,
    members: Mutex<MemberRegistry>,
    contacts: Vec<ContactConfig>,
    invite_codes: Mutex<Vec<InviteCode>>,
    stranger_throttle: StrangerThrottle,
    config: HubConfig,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

impl PollLoop {
    pub fn new(
        config: HubConfig,
        store: Store,
        transport: Box<dyn Transport>,
        oracle: Box<dyn LlmOracle>,
        members: MemberRegistry,
        invite_codes: Vec<InviteCode>,
        shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> Self {
        let contacts = config.contacts.clone();
        let stranger_throttle = StrangerThrottle::new(config.stranger_reply_window_hours);
        PollLoop {
            store,
            transport,
            oracle,
            members: Mutex::new(members),
            contacts,
            invite_codes: Mutex::new(invite_codes),
            stranger_throttle,
            config,
            shutdown_rx,
        }
    }

    /// Startup delay then `loop { tick; sleep }`, exiting when the shutdown
    /// channel is signalled between sleeps.
    pub async fn run_forever(&self) {
        tokio::time::sleep(Duration::from_secs(5)).await;
        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            if *shutdown_rx.borrow() {
                return;
            }
            match self.tick().await {
                Ok(report) => tracing::info!(?report, "tick complete"),
                Err(err) => tracing::error!(%err, "tick failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(self.config.poll_interval_seconds)) => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return;
                    }
                }
            }
        }
    }

    pub async fn tick(&self) -> HubResult<TickReport> {
        let mut report = TickReport::default();
        let emails = self.transport.fetch_unread().await?;
        report.fetched = emails.len();

        let mut room_emails = Vec::new();
        let mut session_emails = Vec::new();
        let mut other_emails = Vec::new();

        for email in emails {
            if email.from.eq_ignore_ascii_case(&self.config.email) {
                continue;
            }
            match dispatcher::classify_subject(&email.subject) {
                SubjectClass::Room(room_id) => room_emails.push((room_id, email)),
                SubjectClass::Session(session_id) => session_emails.push((session_id, email)),
                SubjectClass::None => other_emails.push(email),
            }
        }

        for (room_id, email) in room_emails {
            if let Err(err) = self.handle_room_email(&room_id, &email, &mut report).await {
                report.errored += 1;
                tracing::warn!(%room_id, %err, "failed handling room email");
            }
        }

        for (session_id, email) in session_emails {
            if let Err(err) = self.handle_session_email(&session_id, &email, &mut report).await {
                report.errored += 1;
                tracing::warn!(%session_id, %err, "failed handling session email");
            }
        }

        for email in other_emails {
            if let Err(err) = self.handle_other_email(&email).await {
                report.errored += 1;
                tracing::warn!(sender = %email.from, %err, "failed handling unrouted email");
            }
        }

        self.deadline_sweep(&mut report).await?;

        Ok(report)
    }

    // ---- step 1: Room messages -----------------------------------------

    async fn handle_room_email(&self, room_id: &str, email: &InboundEmail, report: &mut TickReport) -> HubResult<()> {
        let Some(mut room) = self.store.load_room(room_id)? else {
            tracing::warn!(room_id, "room message for unknown room, dropping");
            return Ok(());
        };
        if room.status == crate::protocol::RoomStatus::Finalized {
            return self.handle_room_post_finalize(&mut room, email).await;
        }
        if !room.is_participant(&email.from) {
            tracing::warn!(room_id, sender = %email.from, "room message from non-participant, dropping");
            return Ok(());
        }

        let body = json!({"free_text": email.body_text});
        self.store.save_pending(None, Some(room_id), &email.from, &email.message_id, &body)?;
        room.record_round_reply(&email.from);
        self.store.save_room(&room)?;

        if room.is_round_complete() {
            let pending = self.store.load_pending_for_room(room_id)?;
            let engine = self.room_engine();
            let folded = engine.process_round(&mut room, &pending, Utc::now()).await?;
            self.store.save_room(&room)?;
            for id in folded {
                self.store.mark_processed(id)?;
                report.processed += 1;
            }
            if room.status == crate::protocol::RoomStatus::Finalized {
                report.rooms_finalized += 1;
            }
        }
        Ok(())
    }

    async fn handle_room_post_finalize(&self, room: &mut Room, email: &InboundEmail) -> HubResult<()> {
        let body = email.body_text.trim();
        let engine = self.room_engine();
        if body.eq_ignore_ascii_case("CONFIRM") {
            engine.handle_confirm(room, &email.from).await?;
            self.store.save_room(room)?;
        } else if let Some(reason) = body.strip_prefix("REJECT").map(str::trim) {
            engine.handle_reject(room, &email.from, reason).await?;
            self.store.save_room(room)?;
        } else {
            tracing::info!(room_id = %room.room_id, sender = %email.from, "ignoring non-veto reply to finalized room");
        }
        Ok(())
    }

    // ---- step 2: Session messages --------------------------------------

    async fn handle_session_email(&self, session_id: &str, email: &InboundEmail, report: &mut TickReport) -> HubResult<()> {
        let Some(mut session) = self.store.load_session(session_id)? else {
            tracing::warn!(session_id, "session message for unknown session, dropping");
            return Ok(());
        };
        if session.status != crate::protocol::SessionStatus::Negotiating {
            tracing::info!(session_id, "late message for terminal session, dropping");
            return Ok(());
        }

        let protocol = email.protocol_attachment.clone().filter(|v| !v.is_null());
        let free_text = if protocol.is_none() { Some(email.body_text.clone()) } else { None };
        let body = json!({"protocol": protocol, "free_text": free_text});
        self.store.save_pending(Some(session_id), None, &email.from, &email.message_id, &body)?;

        session.record_round_reply(&email.from);
        self.store.save_session(&session)?;

        if session.is_round_complete() {
            let pending = self.store.load_pending_for_session(session_id)?;
            let engine = self.session_engine();
            let folded = engine.process_round(&mut session, &pending).await?;
            self.store.save_session(&session)?;
            for id in folded {
                self.store.mark_processed(id)?;
                report.processed += 1;
            }
        }
        Ok(())
    }

    // ---- step 3: everything else ----------------------------------------

    async fn handle_other_email(&self, email: &InboundEmail) -> HubResult<()> {
        let identified = {
            let members = self.members.lock().unwrap();
            members.identify(&email.from).cloned()
        };

        if identified.is_some() {
            return self.handle_member_command(&email.from, &email.body_text).await;
        }

        if identity::looks_like_auto_reply(&email.from, &email.subject) {
            return Ok(());
        }

        if let Some(code) = identity::extract_invite_code(&email.subject) {
            return self.handle_invite(&email.from, &code).await;
        }

        if self.stranger_throttle.should_reply(&email.from) {
            let reply = OutboundEmail::new(
                vec![email.from.clone()],
                "How to reach this hub".to_string(),
                "This address is not registered. Ask a member to invite you, or reply with a valid [AIMP-INVITE:<code>] subject.".to_string(),
            );
            self.transport.send(reply).await?;
        }
        Ok(())
    }

    async fn handle_member_command(&self, sender: &str, body: &str) -> HubResult<()> {
        let parsed = self.oracle.parse_member_request(body).await?;
        let outcome = {
            let members = self.members.lock().unwrap();
            dispatcher::interpret_member_request(&parsed, &members, &self.contacts)
        };
        match outcome {
            MemberCommandOutcome::ScheduleMeeting { topic, participants } => {
                self.initiate_meeting(&topic, participants, sender).await?;
            }
            MemberCommandOutcome::CreateRoom { topic, participants, deadline, initial_proposal } => {
                let deadline_ts = parse_deadline(&deadline);
                self.initiate_room(&topic, participants, sender, deadline_ts, initial_proposal, ResolutionRules::Consensus).await?;
            }
            MemberCommandOutcome::MissingFields(fields) => {
                let reply = OutboundEmail::new(
                    vec![sender.to_string()],
                    "More information needed".to_string(),
                    format!("Please provide: {}", fields.join(", ")),
                );
                self.transport.send(reply).await?;
            }
            MemberCommandOutcome::UnresolvedParticipants(names) => {
                let reply = OutboundEmail::new(
                    vec![sender.to_string()],
                    "Could not resolve participants".to_string(),
                    format!("I couldn't find an address for: {}", names.join(", ")),
                );
                self.transport.send(reply).await?;
            }
            MemberCommandOutcome::Unclear => {
                let reply = OutboundEmail::new(
                    vec![sender.to_string()],
                    "Could you clarify?".to_string(),
                    "I didn't understand the request. Please state a topic and the participants.".to_string(),
                );
                self.transport.send(reply).await?;
            }
        }
        Ok(())
    }

    async fn handle_invite(&self, sender: &str, code: &str) -> HubResult<()> {
        let now = Utc::now();
        let valid = {
            let mut codes = self.invite_codes.lock().unwrap();
            match codes.iter_mut().find(|c| c.code == code) {
                Some(entry) if entry.is_valid(now) => {
                    entry.consume();
                    true
                }
                _ => false,
            }
        };
        if valid {
            let display_name = sender.split('@').next().unwrap_or(sender).to_string();
            {
                let mut members = self.members.lock().unwrap();
                members.register_trusted(sender, &display_name);
            }
            let reply = OutboundEmail::new(
                vec![sender.to_string()],
                "Welcome".to_string(),
                format!("You're registered. Capabilities: {}", capability_card()),
            );
            self.transport.send(reply).await?;
        } else {
            let reply = OutboundEmail::new(vec![sender.to_string()], "Invite code invalid".to_string(), "That invite code is unknown, expired, or exhausted.".to_string());
            self.transport.send(reply).await?;
        }
        Ok(())
    }

    // ---- step 4: deadline sweep ------------------------------------------

    async fn deadline_sweep(&self, report: &mut TickReport) -> HubResult<()> {
        let now = Utc::now();
        let open_rooms = self.store.load_open_rooms()?;
        for mut room in open_rooms {
            let engine = self.room_engine();
            engine.finalize_if_due(&mut room, now).await?;
            if room.status == crate::protocol::RoomStatus::Finalized {
                self.store.save_room(&room)?;
                report.rooms_finalized += 1;
            }
        }
        Ok(())
    }

    // ---- entity creation (§3.5 "created by initiate (external call)") ----

    /// Creates a Session. Participants already resolved to addresses named
    /// by a Hub member are split into internal Hub members and external
    /// contacts; a hybrid meeting invites internal members with an
    /// open-ended availability ask and externals with the standard AIMP
    /// invitation, all under one session (`SPEC_FULL.md` §9). Both groups
    /// are already in `Session.participants`, so round-gating, the confirm/
    /// escalate broadcast, and every other `SessionEngine` path treat them
    /// identically from here on — no separate bookkeeping is needed to
    /// re-notify internal members later.
    pub async fn initiate_meeting(&self, topic: &str, participants: Vec<String>, initiator: &str) -> HubResult<()> {
        let session_id = format!("sess-{}", Uuid::new_v4());
        let mut all_participants = vec![initiator.to_string()];
        all_participants.extend(participants.iter().cloned());
        let session = Session::new(session_id.as_str(), topic, all_participants, initiator);
        self.store.save_session(&session)?;

        let (internal, external): (Vec<String>, Vec<String>) = {
            let members = self.members.lock().unwrap();
            participants.into_iter().partition(|p| members.identify(p).is_some())
        };

        for member in &internal {
            let reply = OutboundEmail::new(
                vec![member.clone()],
                format!("Availability needed: {topic}"),
                "When are you free? Reply with your preferred time and location.".to_string(),
            );
            let message_id = self.transport.send(reply).await?;
            self.store.save_message_id(&session_id, &message_id)?;
        }

        if !external.is_empty() {
            crate::engine::session_engine::send_invitations(self.transport.as_ref(), &self.store, &session).await?;
        }
        Ok(())
    }

    /// Creates a Room and sends the call-for-proposals to every participant
    /// including the initiator (`spec.md` §3.5, §4.4.2).
    pub async fn initiate_room(
        &self,
        topic: &str,
        participants: Vec<String>,
        initiator: &str,
        deadline: i64,
        initial_proposal: Option<String>,
        resolution_rules: ResolutionRules,
    ) -> HubResult<()> {
        let room_id = format!("room-{}", Uuid::new_v4());
        let mut all_participants = vec![initiator.to_string()];
        all_participants.extend(participants);
        let mut room = Room::new(room_id.as_str(), topic, initiator, all_participants.clone(), deadline, resolution_rules);

        if let Some(content) = &initial_proposal {
            let local_part = initiator.split('@').next().unwrap_or(initiator);
            let name = format!("proposal_{local_part}_{}", Utc::now().timestamp());
            room.artifacts.insert(
                name.clone(),
                crate::protocol::Artifact { name, content_type: "text/plain".into(), body_text: content.clone(), author: initiator.to_string(), timestamp: Utc::now().timestamp() },
            );
        }
        room.add_transcript(initiator, "PROPOSE", initial_proposal.clone().unwrap_or_else(|| "room opened".to_string()));
        self.store.save_room(&room)?;

        let subject = format!("[AIMP:Room:{room_id}] {topic}");
        let body = initial_proposal.unwrap_or_else(|| format!("New room opened for: {topic}"));
        for recipient in &all_participants {
            let email = OutboundEmail::new(vec![recipient.clone()], subject.clone(), body.clone());
            let message_id = self.transport.send(email).await?;
            self.store.save_message_id(&room_id, &message_id)?;
        }
        Ok(())
    }

    fn session_engine(&self) -> SessionEngine<'_> {
        let owner = {
            let members = self.members.lock().unwrap();
            members.owner_address().unwrap_or("").to_string()
        };
        SessionEngine {
            max_rounds: self.config.max_rounds,
            oracle: self.oracle.as_ref(),
            transport: self.transport.as_ref(),
            store: &self.store,
            hub_domain: self.config.email.clone(),
            owner_address: owner,
            notify_mode: self.config.notify_mode,
        }
    }

    fn room_engine(&self) -> RoomEngine<'_> {
        RoomEngine { oracle: self.oracle.as_ref(), transport: self.transport.as_ref(), store: &self.store }
    }
}

fn capability_card() -> Value {
    json!({
        "hub": "aimp",
        "operations": ["schedule_meeting", "create_room"],
        "protocol": crate::protocol::PROTOCOL_VERSION,
    })
}

/// Parses a free-text deadline string into a Unix timestamp. Accepts RFC3339
/// directly; anything else is rejected by the caller upstream (the LLM
/// oracle is expected to normalize natural language before this point).
fn parse_deadline(text: &str) -> i64 {
    chrono::DateTime::parse_from_rfc3339(text).map(|dt| dt.timestamp()).unwrap_or_else(|_| Utc::now().timestamp() + 86_400)
}
