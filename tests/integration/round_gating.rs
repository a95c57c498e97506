// Testable properties from `spec.md` §8: a round only folds once every
// required respondent has replied (I4), and a duplicate inbound message
// (same `message_id` re-fetched) is folded at most once (I6).

use crate::common::{inbound, HubBuilder};

#[tokio::test]
async fn round_not_processed_until_all_required_respondents_reply() {
    let hub = HubBuilder::new().build();
    hub.poll_loop.initiate_meeting("quarterly sync", vec!["a@x.com".into(), "b@x.com".into()], "i@x.com").await.unwrap();

    let store = hub.reopen_store();
    let session = store.load_active_sessions().unwrap().into_iter().next().unwrap();
    let session_id = session.session_id.clone();
    let subject = format!("[AIMP:{session_id}] v0 quarterly sync");

    hub.transport.push_inbound(inbound("a@x.com", &subject, "Mon 10am works for me"));
    let report = hub.poll_loop.tick().await.unwrap();
    assert_eq!(report.processed, 0, "round 1 still needs b@x.com");

    let store = hub.reopen_store();
    let session = store.load_session(&session_id).unwrap().unwrap();
    assert_eq!(session.current_round, 1);
    assert!(session.round_respondents.iter().any(|r| r == "a@x.com"));

    hub.transport.push_inbound(inbound("b@x.com", &subject, "Mon 10am works for me too"));
    let report = hub.poll_loop.tick().await.unwrap();
    assert_eq!(report.processed, 2, "both pending messages fold once the round completes");

    let store = hub.reopen_store();
    let session = store.load_session(&session_id).unwrap().unwrap();
    assert_eq!(session.current_round, 2);
    assert!(session.round_respondents.is_empty(), "round_respondents resets on advance");
}

#[tokio::test]
async fn duplicate_message_id_is_folded_at_most_once() {
    let hub = HubBuilder::new().build();
    hub.poll_loop.initiate_meeting("quarterly sync", vec!["a@x.com".into()], "i@x.com").await.unwrap();

    let store = hub.reopen_store();
    let session = store.load_active_sessions().unwrap().into_iter().next().unwrap();
    let session_id = session.session_id.clone();
    let subject = format!("[AIMP:{session_id}] v0 quarterly sync");

    let mut email = inbound("a@x.com", &subject, "Mon 10am works for me");
    email.message_id = "duplicate@sender.test".to_string();

    // Same message re-fetched twice in the same tick (e.g. a transport retry).
    hub.transport.push_inbound(email.clone());
    hub.transport.push_inbound(email);
    let report = hub.poll_loop.tick().await.unwrap();
    assert_eq!(report.processed, 1, "the duplicate message_id is deduped at the store layer");
}
