//! Pagination and ingress behavior against an in-memory store.

mod common;

use std::collections::HashSet;

use uuid::Uuid;

use courier_api::ApiError;
use courier_api::ingress::{self, MAX_CONTENT_CHARS, Submission};
use courier_api::pagination::fetch_page;
use courier_gateway::Delivery;
use courier_types::api::MessagePage;
use courier_types::models::{Message, MessageId};
use courier_types::{MESSAGE_BATCH, topic_for};

use common::{Fixture, fixture};

fn page(fx: &Fixture, cursor: Option<MessageId>) -> MessagePage {
    fetch_page(&fx.state.db, &fx.ada, fx.general, cursor).unwrap()
}

fn contents(page: &MessagePage) -> Vec<&str> {
    page.items.iter().map(|m| m.content.as_str()).collect()
}

fn walk_history(fx: &Fixture) -> Vec<Message> {
    let mut all = Vec::new();
    let mut cursor = None;
    loop {
        let page = page(fx, cursor);
        all.extend(page.items);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => return all,
        }
    }
}

fn submission(fx: &Fixture, content: &str) -> Submission {
    Submission {
        server_id: Some(fx.server_id),
        channel_id: fx.general,
        content: content.to_string(),
        file_url: None,
    }
}

// --- Pagination ---

#[test]
fn test_general_channel_walkthrough() {
    let fx = fixture();
    for c in ["A", "B", "C"] {
        fx.post(&fx.ada, c);
    }

    let first = page(&fx, None);
    assert_eq!(contents(&first), vec!["C", "B", "A"]);
    assert_eq!(first.next_cursor, None);

    for c in ["D", "E", "F", "G", "H", "I", "J", "K", "L", "M"] {
        fx.post(&fx.bob, c);
    }

    let first = page(&fx, None);
    assert_eq!(
        contents(&first),
        vec!["M", "L", "K", "J", "I", "H", "G", "F", "E", "D"]
    );
    assert_eq!(first.next_cursor, Some(first.items[9].id));

    let second = page(&fx, first.next_cursor);
    assert_eq!(contents(&second), vec!["C", "B", "A"]);
    assert_eq!(second.next_cursor, None);
}

#[test]
fn test_following_cursors_yields_every_message_once_in_order() {
    for n in [0usize, 1, 9, 10, 11, 20, 27] {
        let fx = fixture();
        let posted: Vec<MessageId> = (0..n).map(|i| fx.post(&fx.ada, &format!("m{i}")).id).collect();

        let walked = walk_history(&fx);
        let ids: Vec<MessageId> = walked.iter().map(|m| m.id).collect();

        let mut expected = posted.clone();
        expected.reverse();
        assert_eq!(ids, expected, "history of {n} messages");
        assert!(ids.windows(2).all(|w| w[0] > w[1]));
    }
}

#[test]
fn test_exactly_one_batch_leaves_an_empty_tail_page() {
    let fx = fixture();
    for i in 0..MESSAGE_BATCH {
        fx.post(&fx.ada, &format!("m{i}"));
    }

    let first = page(&fx, None);
    assert_eq!(first.items.len(), MESSAGE_BATCH);
    let cursor = first.next_cursor.expect("full page carries a cursor");

    let tail = page(&fx, Some(cursor));
    assert!(tail.items.is_empty());
    assert_eq!(tail.next_cursor, None);
}

#[test]
fn test_pages_are_idempotent_without_writes() {
    let fx = fixture();
    for i in 0..15 {
        fx.post(&fx.ada, &format!("m{i}"));
    }

    let first = page(&fx, None);
    assert_eq!(first, page(&fx, None));
    assert_eq!(page(&fx, first.next_cursor), page(&fx, first.next_cursor));
}

#[test]
fn test_unknown_and_hidden_channels_look_empty() {
    let fx = fixture();
    fx.post(&fx.ada, "hello");

    let unknown = fetch_page(&fx.state.db, &fx.ada, Uuid::new_v4(), None).unwrap();
    assert_eq!(unknown, MessagePage::empty());

    let hidden = fetch_page(&fx.state.db, &fx.outsider, fx.general, None).unwrap();
    assert_eq!(hidden, MessagePage::empty());
}

#[test]
fn test_messages_carry_hydrated_author() {
    let fx = fixture();
    fx.post(&fx.bob, "hi");

    let msg = &page(&fx, None).items[0];
    assert_eq!(msg.member.profile.name, "Bob");
    assert_eq!(msg.member.member.server_id, fx.server_id);
    assert_eq!(msg.channel_id, fx.general);
}

// --- Ingress ---

#[test]
fn test_empty_content_is_rejected_without_attachment() {
    let fx = fixture();
    let err = ingress::submit(&fx.state.db, &fx.state.fanout, &fx.ada, submission(&fx, "   "))
        .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));
    assert!(page(&fx, None).items.is_empty());
}

#[test]
fn test_attachment_alone_is_enough() {
    let fx = fixture();
    let mut sub = submission(&fx, "");
    sub.file_url = Some("https://files.example/cat.png".into());

    let msg = ingress::submit(&fx.state.db, &fx.state.fanout, &fx.ada, sub).unwrap();
    assert_eq!(msg.file_url.as_deref(), Some("https://files.example/cat.png"));
    assert_eq!(msg.content, "");
}

#[test]
fn test_overlong_content_is_rejected() {
    let fx = fixture();
    let long = "x".repeat(MAX_CONTENT_CHARS + 1);
    let err = ingress::submit(&fx.state.db, &fx.state.fanout, &fx.ada, submission(&fx, &long))
        .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));
}

#[test]
fn test_non_members_and_unknown_channels_get_the_same_answer() {
    let fx = fixture();

    let outsider = ingress::submit(&fx.state.db, &fx.state.fanout, &fx.outsider, submission(&fx, "hi"))
        .unwrap_err();

    let mut missing = submission(&fx, "hi");
    missing.channel_id = Uuid::new_v4();
    let unknown = ingress::submit(&fx.state.db, &fx.state.fanout, &fx.ada, missing).unwrap_err();

    let mut wrong_server = submission(&fx, "hi");
    wrong_server.server_id = Some(Uuid::new_v4());
    let mismatch = ingress::submit(&fx.state.db, &fx.state.fanout, &fx.ada, wrong_server).unwrap_err();

    for err in [&outsider, &unknown, &mismatch] {
        assert!(matches!(err, ApiError::NotFound(_)));
        assert_eq!(err.to_string(), outsider.to_string());
    }
    assert!(page(&fx, None).items.is_empty());
}

#[test]
fn test_only_text_channels_accept_messages() {
    let fx = fixture();
    let mut sub = submission(&fx, "hello?");
    sub.channel_id = fx.voice;
    let err = ingress::submit(&fx.state.db, &fx.state.fanout, &fx.ada, sub).unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)));
}

#[tokio::test]
async fn test_live_subscriber_receives_each_message_once() {
    let fx = fixture();
    let mut sub = fx.state.fanout.subscribe(&topic_for(fx.general));

    let sent = fx.post(&fx.ada, "ping");
    let Some(Delivery::Message(got)) = sub.recv().await else {
        panic!("no message delivered");
    };
    assert_eq!(got, sent);

    let nothing_else =
        tokio::time::timeout(std::time::Duration::from_millis(50), sub.recv()).await;
    assert!(nothing_else.is_err());
}

#[test]
fn test_publish_failure_does_not_fail_submission() {
    let fx = fixture();
    fx.state.fanout.shutdown();

    let msg = fx.post(&fx.ada, "still stored");
    let page = page(&fx, None);
    assert_eq!(page.items, vec![msg]);
}

#[tokio::test]
async fn test_store_failure_is_internal_and_writes_nothing() {
    let fx = fixture();
    fx.post(&fx.ada, "before");
    let mut sub = fx.state.fanout.subscribe(&topic_for(fx.general));
    fx.fail_message_writes();

    let err = ingress::submit(
        &fx.state.db,
        &fx.state.fanout,
        &fx.ada,
        submission(&fx, "lost"),
    )
    .unwrap_err();
    assert!(matches!(err, ApiError::Internal));
    assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);

    assert_eq!(contents(&page(&fx, None)), vec!["before"]);
    let nothing_published =
        tokio::time::timeout(std::time::Duration::from_millis(50), sub.recv()).await;
    assert!(nothing_published.is_err());
}

#[test]
fn test_retries_are_not_deduplicated() {
    let fx = fixture();
    let a = fx.post(&fx.ada, "same");
    let b = fx.post(&fx.ada, "same");
    assert_ne!(a.id, b.id);
    assert_eq!(page(&fx, None).items.len(), 2);
}

#[test]
fn test_concurrent_writers_get_distinct_ordered_ids() {
    let fx = fixture();
    let threads: Vec<_> = (0..4)
        .map(|t| {
            let state = fx.state.clone();
            let author = if t % 2 == 0 { fx.ada.clone() } else { fx.bob.clone() };
            let server_id = fx.server_id;
            let channel_id = fx.general;
            std::thread::spawn(move || {
                (0..10)
                    .map(|i| {
                        ingress::submit(
                            &state.db,
                            &state.fanout,
                            &author,
                            Submission {
                                server_id: Some(server_id),
                                channel_id,
                                content: format!("t{t}-{i}"),
                                file_url: None,
                            },
                        )
                        .unwrap()
                        .id
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut per_thread = Vec::new();
    for handle in threads {
        let ids = handle.join().unwrap();
        // each writer sees its own messages in the order it created them
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        per_thread.extend(ids);
    }

    let walked = walk_history(&fx);
    assert_eq!(walked.len(), 40);
    let unique: HashSet<MessageId> = walked.iter().map(|m| m.id).collect();
    assert_eq!(unique.len(), 40);
    assert_eq!(unique, per_thread.into_iter().collect());
}
