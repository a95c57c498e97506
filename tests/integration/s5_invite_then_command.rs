// S5 (`spec.md` §8): an unregistered sender redeems an invite code and is
// welcomed as a trusted member, then a later free-text message from that
// same address is routed as a member command instead of the stranger path.

use crate::common::{inbound, HubBuilder};
use serde_json::json;

#[tokio::test]
async fn invite_redemption_then_member_command_schedules_meeting() {
    let hub = HubBuilder::new().with_contact("Bob", "bob@ext.com").with_invite_code("open2026", Some(5)).build();

    hub.transport.push_inbound(inbound("x@stranger.com", "[AIMP-INVITE:open2026]", "let me in"));
    hub.poll_loop.tick().await.unwrap();

    let sent = hub.transport.sent();
    assert!(sent.iter().any(|e| e.to == vec!["x@stranger.com".to_string()] && e.subject == "Welcome"));

    hub.oracle.member_request_queue.lock().unwrap().push(json!({
        "intent": "schedule_meeting",
        "topic": "planning",
        "participants": ["Bob"],
        "missing": [],
    }));
    hub.transport.push_inbound(inbound("x@stranger.com", "let's talk", "schedule a meeting with Bob tomorrow"));
    hub.poll_loop.tick().await.unwrap();

    let sent = hub.transport.sent();
    assert!(sent.iter().any(|e| e.to == vec!["bob@ext.com".to_string()]));
    // the stranger-throttle "how to reach this hub" reply never fires for a now-trusted sender
    assert!(!sent.iter().any(|e| e.subject == "How to reach this hub"));
}

#[tokio::test]
async fn invalid_invite_code_is_rejected() {
    let hub = HubBuilder::new().with_invite_code("open2026", Some(1)).build();

    hub.transport.push_inbound(inbound("y@stranger.com", "[AIMP-INVITE:wrong-code]", "let me in"));
    hub.poll_loop.tick().await.unwrap();

    let sent = hub.transport.sent();
    assert!(sent.iter().any(|e| e.to == vec!["y@stranger.com".to_string()] && e.subject == "Invite code invalid"));
}
