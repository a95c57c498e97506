// S2 (`spec.md` §8): five consecutive rounds with no consensus escalate to
// the owner instead of confirming or looping forever.

use crate::common::{inbound, HubBuilder};
use aimp_hub::protocol::SessionStatus;

#[tokio::test]
async fn five_stalled_rounds_escalate_to_owner() {
    let hub = HubBuilder::new().with_admin("owner@x.com", "Owner").build();
    hub.poll_loop.initiate_meeting("sync", vec!["a@x.com".into()], "i@x.com").await.unwrap();

    let store = hub.reopen_store();
    let session = store.load_active_sessions().unwrap().into_iter().next().unwrap();
    let session_id = session.session_id.clone();
    let subject = format!("[AIMP:{session_id}] v0 sync");

    // Round 1 only requires the non-initiator participant to reply.
    hub.transport.push_inbound(inbound("a@x.com", &subject, "still deciding"));
    hub.poll_loop.tick().await.unwrap();

    let store = hub.reopen_store();
    let session = store.load_session(&session_id).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Negotiating);
    assert_eq!(session.current_round, 2);

    // Rounds 2 through 5 require both the initiator and the participant.
    for _ in 0..4 {
        hub.transport.push_inbound(inbound("i@x.com", &subject, "still deciding"));
        hub.transport.push_inbound(inbound("a@x.com", &subject, "still deciding"));
        hub.poll_loop.tick().await.unwrap();
    }

    let store = hub.reopen_store();
    let session = store.load_session(&session_id).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Escalated);
    assert!(session.history.len() >= aimp_hub::protocol::MAX_ROUNDS);

    // No further broadcast once escalated: a late reply after escalation is dropped.
    hub.transport.push_inbound(inbound("a@x.com", &subject, "actually Monday works"));
    let report = hub.poll_loop.tick().await.unwrap();
    assert_eq!(report.processed, 0);
}
