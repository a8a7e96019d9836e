//! Heartbeats and sessions: the SQLite implementation of [`PresenceStore`].
//!
//! Every operation first asks the bootstrapper whether its feature is ready.
//! When it is not, writes do nothing and reads return nothing.

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use concur_core::{
  actor::{Actor, UserId},
  presence::{Feature, PresenceSession, PresentUser, SessionToken, session_duration},
  record::RecordId,
  store::PresenceStore,
};

use crate::{
  Error, Result, SqliteStore,
  encode::{RawPresentUser, RawSession, decode_dt_sql, encode_dt},
  store::upsert_user,
};

/// Close each `(session_id, opened_at)` pair at `now`, fixing its duration.
///
/// Rows closed by someone else in the meantime are left alone. Returns how
/// many rows this call closed.
fn close_rows(
  conn: &Connection,
  rows: Vec<(i64, String)>,
  now: DateTime<Utc>,
) -> rusqlite::Result<usize> {
  let closed_at = encode_dt(now);
  let mut update = conn.prepare_cached(
    "UPDATE presence_sessions
     SET closed_at = ?2, last_seen = ?2, duration_seconds = ?3
     WHERE session_id = ?1 AND closed_at IS NULL",
  )?;

  let mut closed = 0;
  for (session_id, opened_at) in rows {
    let duration = session_duration(decode_dt_sql(&opened_at)?, now);
    closed += update.execute(rusqlite::params![session_id, closed_at, duration])?;
  }
  Ok(closed)
}

fn select_pairs(
  conn: &Connection,
  sql: &str,
  params: impl rusqlite::Params,
) -> rusqlite::Result<Vec<(i64, String)>> {
  let mut stmt = conn.prepare(sql)?;
  let rows = stmt
    .query_map(params, |row| Ok((row.get(0)?, row.get(1)?)))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

impl PresenceStore for SqliteStore {
  type Error = Error;

  async fn ensure_ready(&self, feature: Feature) -> Result<bool> {
    self.ensure_feature(feature).await
  }

  // ── Heartbeats ────────────────────────────────────────────────────────────

  async fn ping(&self, record: RecordId, actor: Actor) -> Result<bool> {
    if !self.ensure_feature(Feature::Heartbeats).await? {
      return Ok(false);
    }

    let now = self.now();
    let seen = encode_dt(now);
    let cutoff = encode_dt(self.policy.heartbeat_freshness().cutoff(now));

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        // Opportunistic cleanup keeps each record's rows bounded.
        tx.execute(
          "DELETE FROM presence_heartbeats WHERE record_id = ?1 AND last_seen <= ?2",
          rusqlite::params![record.0, cutoff],
        )?;
        tx.execute(
          "INSERT INTO presence_heartbeats (record_id, user_id, last_seen)
           VALUES (?1, ?2, ?3)
           ON CONFLICT (record_id, user_id) DO UPDATE SET last_seen = excluded.last_seen",
          rusqlite::params![record.0, actor.user_id.0, seen],
        )?;
        upsert_user(&tx, &actor)?;
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(true)
  }

  async fn list_present(
    &self,
    record: RecordId,
    excluding: Option<UserId>,
  ) -> Result<Vec<PresentUser>> {
    if !self.ensure_feature(Feature::Heartbeats).await? {
      return Ok(Vec::new());
    }

    let cutoff = encode_dt(self.policy.heartbeat_freshness().cutoff(self.now()));
    let excluding = excluding.map(|u| u.0);

    let raws: Vec<RawPresentUser> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT h.user_id, u.display_name, h.last_seen
           FROM presence_heartbeats h
           LEFT JOIN users u ON u.user_id = h.user_id
           WHERE h.record_id = ?1
             AND h.last_seen > ?2
             AND (?3 IS NULL OR h.user_id <> ?3)
           ORDER BY h.last_seen DESC, u.display_name COLLATE NOCASE ASC, h.user_id ASC",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![record.0, cutoff, excluding], |row| {
            Ok(RawPresentUser {
              user_id:      row.get(0)?,
              display_name: row.get(1)?,
              last_seen:    row.get(2)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawPresentUser::into_present).collect()
  }

  async fn leave(&self, record: RecordId, user: UserId) -> Result<()> {
    if !self.ensure_feature(Feature::Heartbeats).await? {
      return Ok(());
    }

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM presence_heartbeats WHERE record_id = ?1 AND user_id = ?2",
          rusqlite::params![record.0, user.0],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Sessions ──────────────────────────────────────────────────────────────

  async fn open_session(&self, record: RecordId, actor: Actor) -> Result<Option<SessionToken>> {
    if !self.ensure_feature(Feature::Sessions).await? {
      return Ok(None);
    }

    let token = SessionToken::generate();
    let stored = token.as_str().to_owned();
    let now = encode_dt(self.now());
    let user_id = actor.user_id;

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO presence_sessions
             (session_token, record_id, user_id, opened_at, last_seen)
           VALUES (?1, ?2, ?3, ?4, ?4)",
          rusqlite::params![stored, record.0, actor.user_id.0, now],
        )?;
        upsert_user(&tx, &actor)?;
        tx.commit()?;
        Ok(())
      })
      .await?;

    tracing::debug!(record_id = %record, %user_id, "session opened");
    Ok(Some(token))
  }

  async fn touch_session(
    &self,
    token: SessionToken,
    record: RecordId,
    user: UserId,
  ) -> Result<bool> {
    if !self.ensure_feature(Feature::Sessions).await? {
      return Ok(false);
    }

    let now = encode_dt(self.now());
    let touched: usize = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE presence_sessions SET last_seen = ?1
           WHERE session_token = ?2 AND record_id = ?3 AND user_id = ?4
             AND closed_at IS NULL",
          rusqlite::params![now, token.as_str(), record.0, user.0],
        )?)
      })
      .await?;
    Ok(touched > 0)
  }

  async fn close_session(
    &self,
    record: RecordId,
    user: UserId,
    token: Option<SessionToken>,
  ) -> Result<usize> {
    if !self.ensure_feature(Feature::Sessions).await? {
      return Ok(0);
    }

    let now = self.now();
    let closed = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let rows = match &token {
          Some(token) => select_pairs(
            &tx,
            "SELECT session_id, opened_at FROM presence_sessions
             WHERE session_token = ?1 AND record_id = ?2 AND user_id = ?3
               AND closed_at IS NULL",
            rusqlite::params![token.as_str(), record.0, user.0],
          )?,
          None => select_pairs(
            &tx,
            "SELECT session_id, opened_at FROM presence_sessions
             WHERE record_id = ?1 AND user_id = ?2 AND closed_at IS NULL",
            rusqlite::params![record.0, user.0],
          )?,
        };
        let closed = close_rows(&tx, rows, now)?;
        tx.commit()?;
        Ok(closed)
      })
      .await?;

    if closed > 0 {
      tracing::debug!(record_id = %record, user_id = %user, closed, "sessions closed");
    }
    Ok(closed)
  }

  async fn sweep_abandoned(&self) -> Result<usize> {
    if !self.ensure_feature(Feature::Sessions).await? {
      return Ok(0);
    }

    let now = self.now();
    let cutoff = encode_dt(self.policy.session_freshness().cutoff(now));
    let swept = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let rows = select_pairs(
          &tx,
          "SELECT session_id, opened_at FROM presence_sessions
           WHERE closed_at IS NULL AND last_seen <= ?1",
          rusqlite::params![cutoff],
        )?;
        let closed = close_rows(&tx, rows, now)?;
        tx.commit()?;
        Ok(closed)
      })
      .await?;

    if swept > 0 {
      tracing::info!(swept, "closed abandoned sessions");
    }
    Ok(swept)
  }

  async fn list_sessions(&self, record: RecordId) -> Result<Vec<PresenceSession>> {
    if !self.ensure_feature(Feature::Sessions).await? {
      return Ok(Vec::new());
    }
    self.sweep_abandoned().await?;

    let limit = i64::try_from(self.policy.session_list_limit).unwrap_or(i64::MAX);
    let raws: Vec<RawSession> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT s.record_id, s.user_id, u.display_name, s.opened_at, s.last_seen,
                  s.closed_at, s.duration_seconds
           FROM presence_sessions s
           LEFT JOIN users u ON u.user_id = s.user_id
           WHERE s.record_id = ?1
           ORDER BY s.opened_at DESC, s.session_id DESC
           LIMIT ?2",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![record.0, limit], |row| {
            Ok(RawSession {
              record_id:        row.get(0)?,
              user_id:          row.get(1)?,
              display_name:     row.get(2)?,
              opened_at:        row.get(3)?,
              last_seen:        row.get(4)?,
              closed_at:        row.get(5)?,
              duration_seconds: row.get(6)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSession::into_session).collect()
  }
}
