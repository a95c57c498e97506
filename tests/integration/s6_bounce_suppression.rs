// S6 (`spec.md` §8): bounce/auto-reply messages are dropped silently — no
// reply sent, no state touched, no error recorded.

use crate::common::{inbound, HubBuilder};

#[tokio::test]
async fn bounce_from_mailer_daemon_is_dropped_silently() {
    let hub = HubBuilder::new().build();
    hub.transport.push_inbound(inbound("mailer-daemon@example.com", "Undeliverable: your message", "bounce body"));

    let report = hub.poll_loop.tick().await.unwrap();
    assert_eq!(report.fetched, 1);
    assert_eq!(report.processed, 0);
    assert_eq!(report.errored, 0);
    assert!(hub.transport.sent().is_empty());
}

#[tokio::test]
async fn out_of_office_auto_reply_is_dropped_silently() {
    let hub = HubBuilder::new().build();
    hub.transport.push_inbound(inbound("alice@example.com", "Out of Office: Re: planning", "I am away"));

    hub.poll_loop.tick().await.unwrap();
    assert!(hub.transport.sent().is_empty());
}

#[tokio::test]
async fn hub_self_sent_mail_is_skipped() {
    let hub = HubBuilder::new().build();
    hub.transport.push_inbound(inbound("hub@hub.local", "anything", "self echo"));

    let report = hub.poll_loop.tick().await.unwrap();
    assert_eq!(report.fetched, 1);
    assert!(hub.transport.sent().is_empty());
}
