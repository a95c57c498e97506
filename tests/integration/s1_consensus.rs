// S1 (`spec.md` §8): every participant votes the same option for every
// agenda item inside round 1 — the session confirms without escalating.

use crate::common::{inbound_with_protocol, HubBuilder};
use aimp_hub::protocol::SessionStatus;
use serde_json::json;

#[tokio::test]
async fn consensus_in_one_round_confirms_session() {
    let hub = HubBuilder::new().with_admin("owner@x.com", "Owner").build();
    hub.poll_loop
        .initiate_meeting("quarterly sync", vec!["a@x.com".into(), "b@x.com".into()], "i@x.com")
        .await
        .unwrap();

    let store = hub.reopen_store();
    let mut session = store.load_active_sessions().unwrap().into_iter().next().unwrap();
    let session_id = session.session_id.clone();

    session.add_option("time", "Mon 10am");
    session.add_option("time", "Tue 2pm");
    session.add_option("location", "Zoom");
    session.apply_vote("i@x.com", "time", "Mon 10am").unwrap();
    session.apply_vote("i@x.com", "location", "Zoom").unwrap();
    store.save_session(&session).unwrap();

    let subject = format!("[AIMP:{session_id}] v0 quarterly sync");
    for addr in ["a@x.com", "b@x.com"] {
        let mut wire = session.to_wire();
        wire["proposals"]["time"]["votes"][addr] = json!("Mon 10am");
        wire["proposals"]["location"]["votes"][addr] = json!("Zoom");
        hub.transport.push_inbound(inbound_with_protocol(addr, &subject, "Mon 10am, Zoom works for me", wire));
    }

    let report = hub.poll_loop.tick().await.unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.errored, 0);

    let store = hub.reopen_store();
    let session = store.load_session(&session_id).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Confirmed);
    assert!(session.history.iter().any(|h| h.action == "confirm"));

    let sent = hub.transport.sent();
    // invitations to a/b at creation, plus the confirm broadcast to all three
    // participants (owner notification goes by email too since an admin is set).
    assert!(sent.iter().any(|e| e.to == vec!["a@x.com".to_string()] && e.body_text.contains("[confirmed]")));
    assert!(sent.iter().any(|e| e.to == vec!["b@x.com".to_string()] && e.body_text.contains("[confirmed]")));
    assert!(sent.iter().any(|e| e.to == vec!["owner@x.com".to_string()]));
}
