//! Integration tests for `SqliteStore` against an in-memory database.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use serde_json::{Value, json};

use concur_core::{
  actor::{Actor, UserId},
  clock::ManualClock,
  presence::{Feature, PresencePolicy},
  record::{NewRecord, RecordFields, RecordId, RecordUpdate},
  store::{PresenceStore, RecordStore},
  version::{ExpectedVersion, Guarded},
};

use crate::{Error, SqliteStore};

fn start() -> DateTime<Utc> { Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap() }

async fn store() -> (SqliteStore, ManualClock) {
  let clock = ManualClock::new(start());
  let store = SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
    .with_clock(clock.clone());
  (store, clock)
}

fn alice() -> Actor { Actor::new(1, "Alice") }
fn bob() -> Actor { Actor::new(2, "Bob") }
fn carol() -> Actor { Actor::new(3, "Carol") }

fn fields(title: &str) -> RecordFields {
  RecordFields {
    title: title.into(),
    status: Some("Open".into()),
    ..Default::default()
  }
}

fn attrs(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
  pairs.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
}

async fn create(s: &SqliteStore, attributes: BTreeMap<String, Value>) -> RecordId {
  s.create_record(alice(), NewRecord { fields: fields("Checkout fails"), attributes })
    .await
    .unwrap()
    .record
    .record_id
}

// ─── Records ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_and_get_record() {
  let (s, _) = store().await;
  let id = create(
    &s,
    attrs(&[
      ("page_ids", json!("3, 1,1")),
      ("browser", json!("Firefox, ESR")),
      ("empty", json!("")),
    ]),
  )
  .await;

  let view = s.get_record(id).await.unwrap().expect("record");
  assert_eq!(view.record.fields.title, "Checkout fails");
  assert_eq!(view.record.created_by, UserId(1));
  assert_eq!(view.record.created_at, start());
  assert_eq!(view.version.updated_at, start());
  assert_eq!(view.version.history_seq, 0);
  assert_eq!(view.attributes["page_ids"], vec!["3", "1"]);
  assert_eq!(view.attributes["browser"], vec!["Firefox, ESR"]);
  assert!(!view.attributes.contains_key("empty"));
  assert!(s.history(id).await.unwrap().is_empty());
}

#[tokio::test]
async fn get_missing_record_returns_none() {
  let (s, _) = store().await;
  assert!(s.get_record(RecordId(99)).await.unwrap().is_none());
  assert!(!s.record_exists(RecordId(99)).await.unwrap());
}

#[tokio::test]
async fn blank_title_is_a_validation_error() {
  let (s, _) = store().await;
  let err = s
    .create_record(alice(), NewRecord { fields: fields("  "), ..Default::default() })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Core(concur_core::Error::Validation { ref field, .. }) if field == "title"));
}

#[tokio::test]
async fn update_missing_record_returns_none() {
  let (s, _) = store().await;
  let update = RecordUpdate { fields: fields("x"), ..Default::default() };
  assert!(s.update_record(RecordId(7), alice(), update).await.unwrap().is_none());
}

// ─── Conflict guard ──────────────────────────────────────────────────────────

#[tokio::test]
async fn stale_save_conflicts_then_resubmit_succeeds() {
  let (s, clock) = store().await;
  let id = create(&s, BTreeMap::new()).await;

  // A and B both open the record at t0.
  let seen_by_a = s.get_record(id).await.unwrap().unwrap().version;
  let seen_by_b = s.get_record(id).await.unwrap().unwrap().version;
  assert_eq!(seen_by_a, seen_by_b);

  clock.advance(TimeDelta::seconds(30));
  let a_save = RecordUpdate {
    fields:     fields("Checkout fails on Safari"),
    attributes: BTreeMap::new(),
    expected:   ExpectedVersion::exactly(seen_by_a),
  };
  let applied = s
    .update_record(id, alice(), a_save)
    .await
    .unwrap()
    .unwrap()
    .applied()
    .expect("A's save applies");
  let t1 = applied.version;
  assert!(t1.updated_at > seen_by_a.updated_at);

  clock.advance(TimeDelta::seconds(5));
  let b_save = RecordUpdate {
    fields:     RecordFields { priority: Some("High".into()), ..fields("Checkout fails") },
    attributes: BTreeMap::new(),
    expected:   ExpectedVersion::exactly(seen_by_b),
  };
  let outcome = s.update_record(id, bob(), b_save.clone()).await.unwrap().unwrap();
  let Guarded::Conflict(conflict) = outcome else {
    panic!("B's stale save must conflict");
  };
  assert_eq!(conflict.current, t1);

  // Nothing from B's rejected save was written.
  let current = s.get_record(id).await.unwrap().unwrap();
  assert_eq!(current.record.fields.title, "Checkout fails on Safari");
  assert_eq!(current.record.fields.priority, None);
  assert_eq!(current.version, t1);

  let retry = RecordUpdate { expected: ExpectedVersion::exactly(conflict.current), ..b_save };
  let outcome = s.update_record(id, bob(), retry).await.unwrap().unwrap();
  assert!(!outcome.is_conflict());
}

#[tokio::test]
async fn history_seq_alone_detects_staleness() {
  let (s, clock) = store().await;
  let id = create(&s, BTreeMap::new()).await;
  let seen = s.get_record(id).await.unwrap().unwrap().version;

  clock.advance(TimeDelta::seconds(1));
  let update = RecordUpdate { fields: fields("Renamed"), ..Default::default() };
  s.update_record(id, alice(), update).await.unwrap().unwrap();

  let stale = RecordUpdate {
    fields:   fields("Other"),
    expected: ExpectedVersion { updated_at: None, history_seq: Some(seen.history_seq) },
    ..Default::default()
  };
  let outcome = s.update_record(id, bob(), stale).await.unwrap().unwrap();
  assert!(outcome.is_conflict());
}

#[tokio::test]
async fn updated_at_advances_even_when_clock_stands_still() {
  let (s, _) = store().await;
  let id = create(&s, BTreeMap::new()).await;
  let before = s.get_record(id).await.unwrap().unwrap().version;

  let update = RecordUpdate {
    fields:   fields("Checkout fails"),
    expected: ExpectedVersion::exactly(before),
    ..Default::default()
  };
  let applied = s
    .update_record(id, alice(), update)
    .await
    .unwrap()
    .unwrap()
    .applied()
    .unwrap();
  assert!(applied.version.updated_at > before.updated_at);
  assert!(applied.changes.is_empty());
}

#[tokio::test]
async fn unconditional_update_applies() {
  let (s, _) = store().await;
  let id = create(&s, BTreeMap::new()).await;
  let update = RecordUpdate { fields: fields("Legacy client"), ..Default::default() };
  let outcome = s.update_record(id, alice(), update).await.unwrap().unwrap();
  assert!(!outcome.is_conflict());
}

// ─── Audit trail ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn reencoded_attributes_write_no_history() {
  let (s, _) = store().await;
  let id = create(&s, attrs(&[("page_ids", json!(["a", "b"]))])).await;

  for encoding in [json!("b, a"), json!(r#"["b","a"]"#), json!(["B", "a", "a"])] {
    let update = RecordUpdate {
      fields:     fields("Checkout fails"),
      attributes: attrs(&[("page_ids", encoding.clone())]),
      expected:   ExpectedVersion::default(),
    };
    let applied = s
      .update_record(id, alice(), update)
      .await
      .unwrap()
      .unwrap()
      .applied()
      .unwrap();
    if encoding == json!(["B", "a", "a"]) {
      assert_eq!(applied.changes.len(), 1, "case change is a real change");
    } else {
      assert!(applied.changes.is_empty(), "{encoding} should not be a change");
    }
  }
}

#[tokio::test]
async fn one_entry_per_changed_field_with_canonical_values() {
  let (s, clock) = store().await;
  let id = create(&s, attrs(&[("qa_status", json!("retest,fail"))])).await;

  clock.advance(TimeDelta::minutes(1));
  let update = RecordUpdate {
    fields:     RecordFields { severity: Some("major".into()), ..fields("Checkout fails") },
    attributes: attrs(&[("qa_status", json!(["pass", "fail"]))]),
    expected:   ExpectedVersion::default(),
  };
  let applied = s
    .update_record(id, bob(), update)
    .await
    .unwrap()
    .unwrap()
    .applied()
    .unwrap();
  assert_eq!(applied.version.history_seq, 2);

  let history = s.history(id).await.unwrap();
  assert_eq!(history.len(), 2);
  // Newest first.
  assert_eq!(history[0].seq, 2);
  assert_eq!(history[0].field, "meta:qa_status");
  assert_eq!(history[0].old_value, "fail, retest");
  assert_eq!(history[0].new_value, "fail, pass");
  assert_eq!(history[1].field, "severity");
  assert_eq!(history[1].new_value, "major");
  assert_eq!(history[0].actor_id, UserId(2));
  assert_eq!(history[0].actor_name.as_deref(), Some("Bob"));
  assert_eq!(history[0].recorded_at, start() + TimeDelta::minutes(1));
}

#[tokio::test]
async fn absent_keys_untouched_and_empty_value_clears() {
  let (s, _) = store().await;
  let id = create(
    &s,
    attrs(&[("page_ids", json!("1,2")), ("grouped_urls", json!(["https://a"]))]),
  )
  .await;

  let update = RecordUpdate {
    fields:     fields("Checkout fails"),
    attributes: attrs(&[("page_ids", json!([]))]),
    expected:   ExpectedVersion::default(),
  };
  let applied = s
    .update_record(id, alice(), update)
    .await
    .unwrap()
    .unwrap()
    .applied()
    .unwrap();
  assert_eq!(applied.changes.len(), 1);
  assert_eq!(applied.changes[0].old_value, "1, 2");
  assert_eq!(applied.changes[0].new_value, "");

  let view = s.get_record(id).await.unwrap().unwrap();
  assert!(!view.attributes.contains_key("page_ids"));
  assert_eq!(view.attributes["grouped_urls"], vec!["https://a"]);
}

#[tokio::test]
async fn failed_audit_insert_is_skipped_and_save_commits() {
  let (s, _) = store().await;
  let id = create(&s, BTreeMap::new()).await;
  s.conn
    .call(|conn| {
      conn.execute_batch(
        "CREATE TRIGGER reject_title_audit BEFORE INSERT ON audit_entries
         WHEN NEW.field_name = 'title'
         BEGIN SELECT RAISE(ABORT, 'audit rejected'); END;",
      )?;
      Ok(())
    })
    .await
    .unwrap();

  let update = RecordUpdate {
    fields: RecordFields { severity: Some("minor".into()), ..fields("New title") },
    ..Default::default()
  };
  let outcome = s.update_record(id, bob(), update).await.unwrap().unwrap();
  assert!(outcome.applied().is_some());

  let view = s.get_record(id).await.unwrap().unwrap();
  assert_eq!(view.record.fields.title, "New title");
  assert_eq!(view.record.fields.severity.as_deref(), Some("minor"));

  let history = s.history(id).await.unwrap();
  let logged: Vec<_> = history.iter().map(|e| e.field.as_str()).collect();
  assert_eq!(logged, ["severity"]);
}

// ─── Heartbeats ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn heartbeat_visible_within_ttl_only() {
  let (s, clock) = store().await;
  let id = create(&s, BTreeMap::new()).await;

  assert!(s.ping(id, alice()).await.unwrap());

  clock.advance(TimeDelta::seconds(2));
  let seen = s.list_present(id, Some(carol().user_id)).await.unwrap();
  assert_eq!(seen.len(), 1);
  assert_eq!(seen[0].user_id, UserId(1));
  assert_eq!(seen[0].display_name.as_deref(), Some("Alice"));
  assert_eq!(seen[0].last_seen, start());

  clock.advance(TimeDelta::seconds(5));
  assert!(s.list_present(id, Some(carol().user_id)).await.unwrap().is_empty());
}

#[tokio::test]
async fn heartbeat_expires_exactly_at_ttl() {
  let (s, clock) = store().await;
  let id = create(&s, BTreeMap::new()).await;
  s.ping(id, alice()).await.unwrap();

  clock.advance(TimeDelta::seconds(6) - TimeDelta::microseconds(1));
  assert_eq!(s.list_present(id, None).await.unwrap().len(), 1);
  clock.advance(TimeDelta::microseconds(1));
  assert!(s.list_present(id, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn presence_excludes_caller_and_orders_by_recency() {
  let (s, clock) = store().await;
  let id = create(&s, BTreeMap::new()).await;

  s.ping(id, bob()).await.unwrap();
  clock.advance(TimeDelta::seconds(1));
  s.ping(id, alice()).await.unwrap();
  // Second tab for Alice collapses into the same entry.
  s.ping(id, alice()).await.unwrap();
  s.ping(id, carol()).await.unwrap();

  let for_carol = s.list_present(id, Some(carol().user_id)).await.unwrap();
  let ids: Vec<_> = for_carol.iter().map(|p| p.user_id).collect();
  assert_eq!(ids, vec![UserId(1), UserId(2)]);
}

#[tokio::test]
async fn leave_removes_heartbeat() {
  let (s, _) = store().await;
  let id = create(&s, BTreeMap::new()).await;
  s.ping(id, alice()).await.unwrap();
  s.leave(id, alice().user_id).await.unwrap();
  assert!(s.list_present(id, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn ping_prunes_stale_rows() {
  let (s, clock) = store().await;
  let id = create(&s, BTreeMap::new()).await;
  s.ping(id, bob()).await.unwrap();
  clock.advance(TimeDelta::seconds(10));
  s.ping(id, alice()).await.unwrap();

  let rows: i64 = s
    .conn
    .call(move |conn| {
      Ok(conn.query_row(
        "SELECT COUNT(*) FROM presence_heartbeats WHERE record_id = ?1",
        [id.0],
        |row| row.get(0),
      )?)
    })
    .await
    .unwrap();
  assert_eq!(rows, 1);
}

// ─── Sessions ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn close_fixes_duration_and_second_close_is_noop() {
  let (s, clock) = store().await;
  let id = create(&s, BTreeMap::new()).await;

  let token = s.open_session(id, alice()).await.unwrap().expect("token");
  assert_eq!(token.as_str().len(), 32);

  clock.advance(TimeDelta::seconds(95));
  assert_eq!(s.close_session(id, alice().user_id, Some(token.clone())).await.unwrap(), 1);

  clock.advance(TimeDelta::seconds(30));
  assert_eq!(s.close_session(id, alice().user_id, Some(token)).await.unwrap(), 0);

  let sessions = s.list_sessions(id).await.unwrap();
  assert_eq!(sessions.len(), 1);
  assert_eq!(sessions[0].duration_seconds, Some(95));
  assert_eq!(sessions[0].closed_at, Some(start() + TimeDelta::seconds(95)));
  assert!(!sessions[0].is_open());
}

#[tokio::test]
async fn token_must_match_record_and_user() {
  let (s, _) = store().await;
  let id = create(&s, BTreeMap::new()).await;
  let token = s.open_session(id, alice()).await.unwrap().unwrap();

  assert!(!s.touch_session(token.clone(), id, bob().user_id).await.unwrap());
  assert_eq!(s.close_session(id, bob().user_id, Some(token.clone())).await.unwrap(), 0);
  assert!(s.touch_session(token, id, alice().user_id).await.unwrap());
}

#[tokio::test]
async fn tokenless_close_closes_every_open_session() {
  let (s, clock) = store().await;
  let id = create(&s, BTreeMap::new()).await;
  s.open_session(id, alice()).await.unwrap();
  clock.advance(TimeDelta::seconds(10));
  s.open_session(id, alice()).await.unwrap();
  s.open_session(id, bob()).await.unwrap();

  clock.advance(TimeDelta::seconds(10));
  assert_eq!(s.close_session(id, alice().user_id, None).await.unwrap(), 2);

  let sessions = s.list_sessions(id).await.unwrap();
  let open: Vec<_> = sessions.iter().filter(|s| s.is_open()).collect();
  assert_eq!(open.len(), 1);
  assert_eq!(open[0].user_id, UserId(2));
  let durations: Vec<_> = sessions
    .iter()
    .filter(|s| s.user_id == UserId(1))
    .map(|s| s.duration_seconds)
    .collect();
  assert_eq!(durations, vec![Some(10), Some(20)]);
}

#[tokio::test]
async fn abandoned_sessions_are_swept_with_duration_at_sweep_time() {
  let (s, clock) = store().await;
  let id = create(&s, BTreeMap::new()).await;
  let kept = s.open_session(id, alice()).await.unwrap().unwrap();
  s.open_session(id, bob()).await.unwrap();

  clock.advance(TimeDelta::seconds(100));
  s.touch_session(kept, id, alice().user_id).await.unwrap();

  clock.advance(TimeDelta::seconds(30));
  assert_eq!(s.sweep_abandoned().await.unwrap(), 1);

  let sessions = s.list_sessions(id).await.unwrap();
  let bob_session = sessions.iter().find(|s| s.user_id == UserId(2)).unwrap();
  assert_eq!(bob_session.duration_seconds, Some(130));
  let alice_session = sessions.iter().find(|s| s.user_id == UserId(1)).unwrap();
  assert!(alice_session.is_open());
}

#[tokio::test]
async fn list_sessions_is_newest_first_and_limited() {
  let clock = ManualClock::new(start());
  let s = SqliteStore::open_in_memory()
    .await
    .unwrap()
    .with_clock(clock.clone())
    .with_policy(PresencePolicy { session_list_limit: 3, ..Default::default() });
  let id = create(&s, BTreeMap::new()).await;

  for _ in 0..5 {
    s.open_session(id, alice()).await.unwrap();
    clock.advance(TimeDelta::seconds(1));
  }

  let sessions = s.list_sessions(id).await.unwrap();
  assert_eq!(sessions.len(), 3);
  assert_eq!(sessions[0].opened_at, start() + TimeDelta::seconds(4));
  assert!(sessions.windows(2).all(|w| w[0].opened_at >= w[1].opened_at));
}

#[tokio::test]
async fn tokens_are_unique() {
  let (s, _) = store().await;
  let id = create(&s, BTreeMap::new()).await;
  let a = s.open_session(id, alice()).await.unwrap().unwrap();
  let b = s.open_session(id, alice()).await.unwrap().unwrap();
  assert_ne!(a, b);
}

// ─── Bootstrap ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn heartbeats_degrade_when_table_cannot_be_created() {
  let (s, _) = store().await;
  let id = create(&s, BTreeMap::new()).await;
  s.conn
    .call(|conn| {
      conn.execute_batch(
        "CREATE VIEW presence_heartbeats AS
         SELECT 0 AS record_id, 0 AS user_id, '' AS last_seen",
      )?;
      Ok(())
    })
    .await
    .unwrap();

  assert!(!s.ensure_ready(Feature::Heartbeats).await.unwrap());
  assert!(!s.ping(id, alice()).await.unwrap());
  assert!(s.list_present(id, None).await.unwrap().is_empty());
  s.leave(id, alice().user_id).await.unwrap();

  // Record saves and sessions are unaffected.
  assert!(s.open_session(id, alice()).await.unwrap().is_some());
  let update = RecordUpdate { fields: fields("Still saves"), ..Default::default() };
  assert!(!s.update_record(id, alice(), update).await.unwrap().unwrap().is_conflict());
}

#[tokio::test]
async fn legacy_session_table_gains_missing_columns() {
  let (s, clock) = store().await;
  let id = create(&s, BTreeMap::new()).await;
  s.conn
    .call(|conn| {
      conn.execute_batch(
        "CREATE TABLE presence_sessions (
           session_id    INTEGER PRIMARY KEY AUTOINCREMENT,
           session_token TEXT NOT NULL,
           record_id     INTEGER NOT NULL,
           user_id       INTEGER NOT NULL,
           opened_at     TEXT NOT NULL
         )",
      )?;
      Ok(())
    })
    .await
    .unwrap();

  assert!(s.ensure_ready(Feature::Sessions).await.unwrap());
  let token = s.open_session(id, alice()).await.unwrap().unwrap();
  clock.advance(TimeDelta::seconds(12));
  assert_eq!(s.close_session(id, alice().user_id, Some(token)).await.unwrap(), 1);
  assert_eq!(s.list_sessions(id).await.unwrap()[0].duration_seconds, Some(12));
}

#[tokio::test]
async fn concurrent_bootstrap_creates_one_table() {
  let path = std::env::temp_dir().join(format!(
    "concur-bootstrap-{}-{}.db",
    std::process::id(),
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
  ));
  let first = SqliteStore::open(&path).await.unwrap();
  let second = SqliteStore::open(&path).await.unwrap();

  let mut tasks = tokio::task::JoinSet::new();
  for i in 0..8 {
    let store = if i % 2 == 0 { first.clone() } else { second.clone() };
    tasks.spawn(async move { store.ensure_ready(Feature::Sessions).await });
  }
  while let Some(result) = tasks.join_next().await {
    assert!(result.unwrap().unwrap());
  }

  let tables: i64 = first
    .conn
    .call(|conn| {
      Ok(conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'presence_sessions'",
        [],
        |row| row.get(0),
      )?)
    })
    .await
    .unwrap();
  assert_eq!(tables, 1);

  drop((first, second));
  for suffix in ["", "-wal", "-shm"] {
    let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
  }
}
