use std::fs;

use chrono::{Duration, Utc};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use tg_chat_scrape::db;
use tg_chat_scrape::db_store::DbStore;
use tg_chat_scrape::memory::{MemorySink, MemorySource};
use tg_chat_scrape::migrate;
use tg_chat_scrape::models::{ChatEvent, ChatRef, MessageRecord};
use tg_chat_scrape::scrape::{run_scrape, ScrapeError, ScrapeOptions};
use tg_chat_scrape::sink_jsonl::JsonLinesSink;
use tg_chat_scrape::state_file::FileStateStore;
use tg_chat_scrape::traits::StateStore;

const PEER: i64 = -1001234567890;

fn msg(id: i32, hours_ago: i64) -> MessageRecord {
    MessageRecord::new(
        PEER,
        id,
        Utc::now() - Duration::hours(hours_ago) - Duration::seconds(i64::from(id)),
        format!("message {}", id),
    )
}

fn source_with(ids: &[i32]) -> MemorySource {
    let (source, _events) = MemorySource::new(PEER, "Test Chat");
    source.push_history(ids.iter().map(|&id| msg(id, 1)));
    source
}

fn emitted_ids(output: Vec<u8>) -> Vec<i32> {
    String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str::<MessageRecord>(line).unwrap().id)
        .collect()
}

fn state_file(tmp: &TempDir) -> String {
    fs::read_to_string(tmp.path().join("state").join(PEER.to_string())).unwrap()
}

#[tokio::test]
async fn second_run_without_new_messages_emits_nothing() {
    let tmp = TempDir::new().unwrap();
    let state = FileStateStore::open(tmp.path().join("state")).unwrap();
    let source = source_with(&[1, 2, 3]);
    let opts = ScrapeOptions::new(24);
    let cancel = CancellationToken::new();
    let chat = ChatRef::Id(PEER);

    let first = JsonLinesSink::new(Vec::new());
    run_scrape(&source, &chat, &first, &state, &opts, &cancel)
        .await
        .unwrap();
    assert_eq!(emitted_ids(first.into_inner()), vec![1, 2, 3]);
    assert_eq!(state_file(&tmp), "3");

    let second = JsonLinesSink::new(Vec::new());
    let report = run_scrape(&source, &chat, &second, &state, &opts, &cancel)
        .await
        .unwrap();
    assert!(emitted_ids(second.into_inner()).is_empty());
    assert_eq!(report.start_id, Some(3));
    assert_eq!(report.catchup_count, 0);
    assert_eq!(state_file(&tmp), "3");
}

#[tokio::test]
async fn repeated_database_runs_store_each_message_once() {
    let tmp = TempDir::new().unwrap();
    let url = format!("sqlite:{}", tmp.path().join("scrape.sqlite").display());
    let database = db::connect(&url).await.unwrap();
    migrate::run_migrations(&database).await.unwrap();
    let store = DbStore::new(database.clone());

    let source = source_with(&[10, 11, 12]);
    let opts = ScrapeOptions::new(24);
    let cancel = CancellationToken::new();

    for _ in 0..2 {
        run_scrape(&source, &ChatRef::Id(PEER), &store, &store, &opts, &cancel)
            .await
            .unwrap();
    }
    // --reset replays the window; rows are upserted, not duplicated.
    let mut reset = opts.clone();
    reset.reset = true;
    run_scrape(&source, &ChatRef::Id(PEER), &store, &store, &reset, &cancel)
        .await
        .unwrap();

    let db::Database::Sqlite(pool) = &database else {
        panic!("expected sqlite");
    };
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE chat_peer_id = ?")
        .bind(PEER)
        .fetch_one(pool)
        .await
        .unwrap();
    assert_eq!(rows, 3);
    assert_eq!(store.load(PEER).await.unwrap(), Some(12));
}

#[tokio::test]
async fn out_of_order_history_is_emitted_ascending() {
    let tmp = TempDir::new().unwrap();
    let state = FileStateStore::open(tmp.path().join("state")).unwrap();
    let source = source_with(&[7, 5, 6]);
    let sink = JsonLinesSink::new(Vec::new());

    let report = run_scrape(
        &source,
        &ChatRef::Id(PEER),
        &sink,
        &state,
        &ScrapeOptions::new(24),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(emitted_ids(sink.into_inner()), vec![5, 6, 7]);
    assert_eq!(report.last_id, Some(7));
    assert_eq!(state_file(&tmp), "7");
}

#[tokio::test]
async fn reset_ignores_checkpoint_but_keeps_lookback() {
    let tmp = TempDir::new().unwrap();
    let state = FileStateStore::open(tmp.path().join("state")).unwrap();
    state.save(PEER, 100, Utc::now()).await.unwrap();

    let (source, _events) = MemorySource::new(PEER, "Test Chat");
    source.push_history([msg(50, 48), msg(60, 1)]);

    let mut opts = ScrapeOptions::new(24);
    opts.reset = true;
    let sink = JsonLinesSink::new(Vec::new());
    let report = run_scrape(
        &source,
        &ChatRef::Id(PEER),
        &sink,
        &state,
        &opts,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.start_id, None);
    assert_eq!(emitted_ids(sink.into_inner()), vec![60]);
    assert_eq!(state_file(&tmp), "60");
}

#[tokio::test]
async fn failed_emit_keeps_checkpoint_at_last_delivered_message() {
    let tmp = TempDir::new().unwrap();
    let state = FileStateStore::open(tmp.path().join("state")).unwrap();
    let source = source_with(&[1, 2, 3, 4, 5]);
    let opts = ScrapeOptions::new(24);
    let cancel = CancellationToken::new();

    let sink = MemorySink::new();
    sink.fail_on(Some(3));
    let err = run_scrape(&source, &ChatRef::Id(PEER), &sink, &state, &opts, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ScrapeError::Emit { message_id: 3, .. }));
    assert_eq!(sink.ids(), vec![1, 2]);
    assert_eq!(state_file(&tmp), "2");

    let retry = MemorySink::new();
    run_scrape(&source, &ChatRef::Id(PEER), &retry, &state, &opts, &cancel)
        .await
        .unwrap();
    assert_eq!(retry.ids(), vec![3, 4, 5]);
    assert_eq!(state_file(&tmp), "5");
}

#[tokio::test]
async fn empty_history_writes_no_state() {
    let tmp = TempDir::new().unwrap();
    let state = FileStateStore::open(tmp.path().join("state")).unwrap();
    let (source, _events) = MemorySource::new(PEER, "Quiet Chat");
    let sink = JsonLinesSink::new(Vec::new());

    let report = run_scrape(
        &source,
        &ChatRef::Id(PEER),
        &sink,
        &state,
        &ScrapeOptions::new(24),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.catchup_count, 0);
    assert_eq!(report.last_id, None);
    assert!(sink.into_inner().is_empty());
    assert!(!state.path_for(PEER).exists());
}

#[tokio::test]
async fn cancelling_live_follow_keeps_last_live_checkpoint() {
    let tmp = TempDir::new().unwrap();
    let state = FileStateStore::open(tmp.path().join("state")).unwrap();
    let (source, events) = MemorySource::new(PEER, "Live Chat");
    source.push_history([msg(40, 2), msg(41, 1)]);
    let sink = MemorySink::new();
    let cancel = CancellationToken::new();
    let mut opts = ScrapeOptions::new(24);
    opts.follow = true;

    events.send(ChatEvent::NewMessage(msg(42, 0)));

    let (report, _) = tokio::join!(
        run_scrape(&source, &ChatRef::Id(PEER), &sink, &state, &opts, &cancel),
        async {
            while sink.len() < 3 {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
            cancel.cancel();
        }
    );
    let report = report.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.live_count, 1);
    assert_eq!(sink.ids(), vec![40, 41, 42]);
    assert_eq!(state_file(&tmp), "42");
    assert!(!source.is_subscribed(PEER));
}

/// Follow a chat whose first message gets edited after catch-up; returns once
/// the new message 3 has been checkpointed.
async fn follow_through_edit(
    sink: &dyn tg_chat_scrape::traits::Sink,
    state: &dyn StateStore,
) -> tg_chat_scrape::scrape::ScrapeReport {
    let (source, events) = MemorySource::new(PEER, "Live Chat");
    source.push_history([msg(1, 2), msg(2, 1)]);
    let cancel = CancellationToken::new();
    let mut opts = ScrapeOptions::new(24);
    opts.follow = true;

    let mut edited = msg(1, 2);
    edited.text = "message 1 (edited)".to_string();
    edited.edit_date = Some(Utc::now());
    events.send(ChatEvent::Edited(edited));
    events.send(ChatEvent::NewMessage(msg(3, 0)));

    let (report, _) = tokio::join!(
        run_scrape(&source, &ChatRef::Id(PEER), sink, state, &opts, &cancel),
        async {
            while state.load(PEER).await.unwrap() != Some(3) {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
            cancel.cancel();
        }
    );
    report.unwrap()
}

#[tokio::test]
async fn stream_output_skips_edits_of_delivered_messages() {
    let tmp = TempDir::new().unwrap();
    let state = FileStateStore::open(tmp.path().join("state")).unwrap();
    let sink = JsonLinesSink::new(Vec::new());

    let report = follow_through_edit(&sink, &state).await;

    assert!(report.cancelled);
    assert_eq!(emitted_ids(sink.into_inner()), vec![1, 2, 3]);
    assert_eq!(state_file(&tmp), "3");
}

#[tokio::test]
async fn database_output_applies_edits_in_place() {
    let tmp = TempDir::new().unwrap();
    let url = format!("sqlite:{}", tmp.path().join("scrape.sqlite").display());
    let database = db::connect(&url).await.unwrap();
    migrate::run_migrations(&database).await.unwrap();
    let store = DbStore::new(database.clone());

    let report = follow_through_edit(&store, &store).await;
    assert_eq!(report.live_count, 2);

    let db::Database::Sqlite(pool) = &database else {
        panic!("expected sqlite");
    };
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
        .fetch_one(pool)
        .await
        .unwrap();
    assert_eq!(rows, 3);
    let data: String =
        sqlx::query_scalar("SELECT data FROM messages WHERE chat_peer_id = ? AND message_id = 1")
            .bind(PEER)
            .fetch_one(pool)
            .await
            .unwrap();
    let stored: MessageRecord = serde_json::from_str(&data).unwrap();
    assert_eq!(stored.text, "message 1 (edited)");
    assert!(stored.edit_date.is_some());
    assert_eq!(store.load(PEER).await.unwrap(), Some(3));
}
