//! Shared harness for the integration suite: wires a `PollLoop` over a
//! file-backed sqlite db (so the test can open its own `Store` handle onto
//! the same file to assert on persisted state) plus an `Arc<MockTransport>`
//! / `Arc<MockLlmOracle>` the test keeps a handle to. Mirrors the teacher's
//! `tests/integration/common.rs::TestClient` (temp db path + `Drop` cleanup).

use std::sync::Arc;

use aimp_hub::config::{ContactConfig, HubConfig, InviteCodeConfig, MemberConfig, NotifyMode, OracleConfig};
use aimp_hub::identity::{InviteCode, Member, MemberRegistry, Role};
use aimp_hub::mail::InboundEmail;
use aimp_hub::oracle::mock::MockLlmOracle;
use aimp_hub::store::Store;
use aimp_hub::transport::mock::MockTransport;
use aimp_hub::PollLoop;
use chrono::Utc;
use uuid::Uuid;

pub struct TestHub {
    pub poll_loop: PollLoop,
    pub transport: Arc<MockTransport>,
    pub oracle: Arc<MockLlmOracle>,
    db_path: String,
}

impl Drop for TestHub {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_path));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_path));
    }
}

impl TestHub {
    /// A second connection onto the same db file, for assertions after a
    /// tick — `PollLoop` owns its own `Store` privately.
    pub fn reopen_store(&self) -> Store {
        Store::open(&self.db_path).expect("reopen store")
    }
}

pub struct HubBuilder {
    members: Vec<Member>,
    invite_codes: Vec<InviteCode>,
    contacts: Vec<ContactConfig>,
    notify_mode: NotifyMode,
}

impl HubBuilder {
    pub fn new() -> Self {
        HubBuilder { members: Vec::new(), invite_codes: Vec::new(), contacts: Vec::new(), notify_mode: NotifyMode::Email }
    }

    pub fn with_admin(mut self, address: &str, name: &str) -> Self {
        self.members.push(Member { address: address.to_string(), name: name.to_string(), role: Role::Admin });
        self
    }

    pub fn with_member(mut self, address: &str, name: &str) -> Self {
        self.members.push(Member { address: address.to_string(), name: name.to_string(), role: Role::Member });
        self
    }

    pub fn with_contact(mut self, name: &str, email: &str) -> Self {
        self.contacts.push(ContactConfig { name: name.to_string(), email: email.to_string() });
        self
    }

    pub fn with_invite_code(mut self, code: &str, max_uses: Option<u32>) -> Self {
        self.invite_codes.push(InviteCode { code: code.to_string(), expires: None, max_uses, used: 0 });
        self
    }

    pub fn with_notify_mode(mut self, mode: NotifyMode) -> Self {
        self.notify_mode = mode;
        self
    }

    pub fn build(self) -> TestHub {
        let db_path = format!("/tmp/aimp_hub_test_{}.db", Uuid::new_v4().simple());
        let store = Store::open(&db_path).expect("open store");
        let transport = Arc::new(MockTransport::new());
        let oracle = Arc::new(MockLlmOracle::new());
        let registry = MemberRegistry::new(self.members);
        let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        let config = HubConfig {
            db_path: db_path.clone(),
            email: "hub@hub.local".to_string(),
            poll_interval_seconds: 30,
            max_rounds: 5,
            stranger_reply_window_hours: 24,
            members: Vec::<MemberConfig>::new(),
            contacts: self.contacts,
            invite_codes: self.invite_codes.iter().map(|c| InviteCodeConfig { code: c.code.clone(), expires: c.expires, max_uses: c.max_uses }).collect(),
            oracle: OracleConfig { provider: "anthropic".to_string(), model: "test".to_string(), api_key_env: "UNUSED".to_string(), base_url: None },
            notify_mode: self.notify_mode,
        };

        let poll_loop = PollLoop::new(
            config,
            store,
            Box::new(transport.clone()),
            Box::new(oracle.clone()),
            registry,
            self.invite_codes,
            shutdown_rx,
        );

        TestHub { poll_loop, transport, oracle, db_path }
    }
}

pub fn inbound(from: &str, subject: &str, body: &str) -> InboundEmail {
    InboundEmail {
        message_id: format!("<{}@sender.test>", Uuid::new_v4()),
        from: from.to_string(),
        to: vec!["hub@hub.local".to_string()],
        subject: subject.to_string(),
        body_text: body.to_string(),
        in_reply_to: None,
        references: Vec::new(),
        received_at: Utc::now(),
        protocol_attachment: None,
    }
}

pub fn inbound_with_protocol(from: &str, subject: &str, body: &str, protocol: serde_json::Value) -> InboundEmail {
    let mut email = inbound(from, subject, body);
    email.protocol_attachment = Some(protocol);
    email
}
