// S4 (`spec.md` §8): a participant rejects a room after it has already
// finalized; the veto is recorded and escalated to the initiator, bypassing
// round gating entirely since the room is terminal.

use crate::common::{inbound, HubBuilder};
use aimp_hub::protocol::{ResolutionRules, RoomStatus};
use chrono::Utc;

#[tokio::test]
async fn reject_after_finalize_escalates_to_initiator() {
    let hub = HubBuilder::new().build();
    hub.poll_loop
        .initiate_room("budget", vec!["c@x.com".into()], "a@x.com", Utc::now().timestamp() + 3600, None, ResolutionRules::Consensus)
        .await
        .unwrap();

    let store = hub.reopen_store();
    let mut room = store.load_open_rooms().unwrap().into_iter().next().unwrap();
    let room_id = room.room_id.clone();
    room.status = RoomStatus::Finalized;
    store.save_room(&room).unwrap();

    let subject = format!("[AIMP:Room:{room_id}] budget");
    hub.transport.push_inbound(inbound("c@x.com", &subject, "REJECT numbers wrong"));
    hub.poll_loop.tick().await.unwrap();

    let store = hub.reopen_store();
    let room = store.load_room(&room_id).unwrap().unwrap();
    assert!(room.transcript.iter().any(|e| e.action == "REJECT" && e.summary == "numbers wrong"));

    let sent = hub.transport.sent();
    assert!(sent.iter().any(|e| e.to == vec!["a@x.com".to_string()] && e.subject.contains("Veto recorded")));
    assert!(sent.iter().any(|e| e.to == vec!["c@x.com".to_string()] && e.subject.contains("Veto recorded")));
}

#[tokio::test]
async fn confirm_after_finalize_is_recorded_without_escalation() {
    let hub = HubBuilder::new().build();
    hub.poll_loop
        .initiate_room("budget", vec!["c@x.com".into()], "a@x.com", Utc::now().timestamp() + 3600, None, ResolutionRules::Consensus)
        .await
        .unwrap();

    let store = hub.reopen_store();
    let mut room = store.load_open_rooms().unwrap().into_iter().next().unwrap();
    let room_id = room.room_id.clone();
    room.status = RoomStatus::Finalized;
    store.save_room(&room).unwrap();

    let subject = format!("[AIMP:Room:{room_id}] budget");
    hub.transport.push_inbound(inbound("c@x.com", &subject, "CONFIRM"));
    hub.poll_loop.tick().await.unwrap();

    let store = hub.reopen_store();
    let room = store.load_room(&room_id).unwrap().unwrap();
    assert!(room.accepted_by.contains("c@x.com"));
    assert!(room.transcript.iter().any(|e| e.action == "CONFIRM"));

    let sent = hub.transport.sent();
    assert!(sent.iter().any(|e| e.to == vec!["c@x.com".to_string()] && e.subject.contains("Confirmation received")));
    assert!(!sent.iter().any(|e| e.subject.contains("Veto recorded")));
}
