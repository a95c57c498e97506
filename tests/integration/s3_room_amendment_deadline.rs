// S3 (`spec.md` §8): participants amend a Room's document across rounds,
// then the deadline passes with no full acceptance and the room finalizes
// with drafted minutes.

use crate::common::{inbound, HubBuilder};
use aimp_hub::protocol::{ResolutionRules, RoomStatus};
use chrono::Utc;
use serde_json::json;

#[tokio::test]
async fn amendments_then_deadline_finalizes_room() {
    let hub = HubBuilder::new().build();
    let future_deadline = Utc::now().timestamp() + 3600;
    hub.poll_loop
        .initiate_room("budget", vec!["b@x.com".into(), "c@x.com".into()], "a@x.com", future_deadline, None, ResolutionRules::Consensus)
        .await
        .unwrap();

    let store = hub.reopen_store();
    let room = store.load_open_rooms().unwrap().into_iter().next().unwrap();
    let room_id = room.room_id.clone();
    let subject = format!("[AIMP:Room:{room_id}] budget");

    hub.oracle.amendment_queue.lock().unwrap().push(json!({"action": "AMEND", "new_content": "v2 numbers updated"}));
    hub.oracle.amendment_queue.lock().unwrap().push(json!({"action": "AMEND", "new_content": "v3 numbers updated again"}));

    hub.transport.push_inbound(inbound("b@x.com", &subject, "change the numbers"));
    hub.transport.push_inbound(inbound("c@x.com", &subject, "change again"));
    let report = hub.poll_loop.tick().await.unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.rooms_finalized, 0);

    let store = hub.reopen_store();
    let room = store.load_room(&room_id).unwrap().unwrap();
    assert_eq!(room.status, RoomStatus::Open);
    assert!(room.transcript.iter().any(|e| e.action == "AMEND" && e.from == "b@x.com"));
    assert!(room.artifacts.values().any(|a| a.body_text == "v3 numbers updated again"));

    // Simulate the deadline passing with no further replies arriving.
    let mut room = room;
    room.deadline = Utc::now().timestamp() - 1;
    store.save_room(&room).unwrap();

    let report = hub.poll_loop.tick().await.unwrap();
    assert_eq!(report.rooms_finalized, 1);

    let store = hub.reopen_store();
    let room = store.load_room(&room_id).unwrap().unwrap();
    assert_eq!(room.status, RoomStatus::Finalized);
    assert!(room.transcript.iter().any(|e| e.action == "FINALIZED"));

    let sent = hub.transport.sent();
    assert!(sent.iter().any(|e| e.subject.contains("Minutes") && e.body_text.contains("CONFIRM or REJECT")));
}
