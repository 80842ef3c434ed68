//! Postgres `CallStore`.
//!
//! All queries are parameterized runtime queries. Idempotence is carried by
//! the schema: partial unique indexes allow one active session per room and
//! one open attendance row per (session, user), and the host rule runs under
//! a per-room advisory transaction lock.

use super::{CallStore, StartedSession};
use crate::errors::RcError;
use crate::models::{
    ActivityKind, Attendance, CallSession, MediaFlags, ParticipantState, ParticipantStatus, Room,
};
use crate::observability::metrics;
use async_trait::async_trait;
use common::types::{RoomCode, SessionId, UserId};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::time::Instant;
use tracing::{debug, instrument};
use uuid::Uuid;

const SESSION_COLUMNS: &str = "id, room_code, created_by, started_at, ended_at, \
     participant_count, message_count, poll_count, hand_raise_count, recording_ref";

const PARTICIPANT_COLUMNS: &str = "room_code, user_id, is_host, status, video_enabled, \
     audio_enabled, screen_share, muted_by_host, last_active_at";

/// Call store backed by a Postgres pool.
#[derive(Debug, Clone)]
pub struct PgCallStore {
    pool: PgPool,
}

impl PgCallStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the bundled schema migrations.
    ///
    /// # Errors
    ///
    /// Returns `RcError::Database` if a migration fails.
    pub async fn migrate(&self) -> Result<(), RcError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RcError::Database(format!("migration failed: {e}")))
    }

    /// Check database connectivity.
    ///
    /// # Errors
    ///
    /// Returns `RcError::Database` if the database is unreachable.
    pub async fn ping(&self) -> Result<(), RcError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Record query timing and map the error.
fn finish<T>(operation: &str, start: Instant, result: Result<T, sqlx::Error>) -> Result<T, RcError> {
    let duration = start.elapsed();
    match result {
        Ok(value) => {
            metrics::record_db_query(operation, "success", duration);
            Ok(value)
        }
        Err(e) => {
            metrics::record_db_query(operation, "error", duration);
            Err(RcError::Database(e.to_string()))
        }
    }
}

fn parse_code(raw: &str) -> Result<RoomCode, RcError> {
    raw.parse()
        .map_err(|e| RcError::Database(format!("stored room code is invalid: {e}")))
}

fn map_row_to_room(row: &PgRow) -> Result<Room, RcError> {
    Ok(Room {
        code: parse_code(row.try_get("code")?)?,
        created_by: UserId::from(row.try_get::<String, _>("created_by")?),
        is_open: row.try_get("is_open")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_row_to_session(row: &PgRow) -> Result<CallSession, RcError> {
    Ok(CallSession {
        id: SessionId(row.try_get("id")?),
        room_code: parse_code(row.try_get("room_code")?)?,
        created_by: UserId::from(row.try_get::<String, _>("created_by")?),
        started_at: row.try_get("started_at")?,
        ended_at: row.try_get("ended_at")?,
        participant_count: row.try_get("participant_count")?,
        message_count: row.try_get("message_count")?,
        poll_count: row.try_get("poll_count")?,
        hand_raise_count: row.try_get("hand_raise_count")?,
        recording_ref: row.try_get("recording_ref")?,
    })
}

fn map_row_to_attendance(row: &PgRow) -> Result<Attendance, RcError> {
    Ok(Attendance {
        id: row.try_get("id")?,
        session_id: SessionId(row.try_get("session_id")?),
        user_id: UserId::from(row.try_get::<String, _>("user_id")?),
        joined_at: row.try_get("joined_at")?,
        left_at: row.try_get("left_at")?,
    })
}

fn map_row_to_participant(row: &PgRow) -> Result<ParticipantState, RcError> {
    Ok(ParticipantState {
        room_code: parse_code(row.try_get("room_code")?)?,
        user_id: UserId::from(row.try_get::<String, _>("user_id")?),
        is_host: row.try_get("is_host")?,
        status: ParticipantStatus::from_db(row.try_get("status")?),
        media: MediaFlags {
            video: row.try_get("video_enabled")?,
            audio: row.try_get("audio_enabled")?,
            screen_share: row.try_get("screen_share")?,
        },
        muted_by_host: row.try_get("muted_by_host")?,
        last_active_at: row.try_get("last_active_at")?,
    })
}

#[async_trait]
impl CallStore for PgCallStore {
    #[instrument(skip_all, name = "rc.store.create_room")]
    async fn create_room(&self, code: &RoomCode, created_by: &UserId) -> Result<bool, RcError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            INSERT INTO rooms (code, created_by)
            VALUES ($1, $2)
            ON CONFLICT (code) DO NOTHING
            "#,
        )
        .bind(code.as_str())
        .bind(created_by.as_str())
        .execute(&self.pool)
        .await;

        let done = finish("create_room", start, result)?;
        Ok(done.rows_affected() == 1)
    }

    #[instrument(skip_all, name = "rc.store.get_room")]
    async fn get_room(&self, code: &RoomCode) -> Result<Option<Room>, RcError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            SELECT code, created_by, is_open, created_at
            FROM rooms
            WHERE code = $1
            "#,
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await;

        finish("get_room", start, result)?
            .as_ref()
            .map(map_row_to_room)
            .transpose()
    }

    #[instrument(skip_all, name = "rc.store.close_room")]
    async fn close_room(&self, code: &RoomCode) -> Result<bool, RcError> {
        let start = Instant::now();
        let result = sqlx::query("UPDATE rooms SET is_open = FALSE WHERE code = $1")
            .bind(code.as_str())
            .execute(&self.pool)
            .await;

        Ok(finish("close_room", start, result)?.rows_affected() == 1)
    }

    #[instrument(skip_all, name = "rc.store.start_session")]
    async fn start_session(&self, code: &RoomCode) -> Result<StartedSession, RcError> {
        let start = Instant::now();

        // Losing the insert race leaves the winner's row as the active session.
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO call_sessions (id, room_code, created_by)
            SELECT $1, code, created_by FROM rooms WHERE code = $2
            ON CONFLICT (room_code) WHERE ended_at IS NULL DO NOTHING
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await;

        if let Some(row) = finish("start_session", start, inserted)? {
            return Ok(StartedSession {
                session: map_row_to_session(&row)?,
                created: true,
            });
        }

        match self.active_session(code).await? {
            Some(session) => Ok(StartedSession {
                session,
                created: false,
            }),
            None => {
                if self.get_room(code).await?.is_none() {
                    Err(RcError::RoomNotFound(code.to_string()))
                } else {
                    Err(RcError::Conflict(
                        "Session ended while starting, retry".to_string(),
                    ))
                }
            }
        }
    }

    #[instrument(skip_all, name = "rc.store.end_session")]
    async fn end_session(&self, code: &RoomCode) -> Result<Option<CallSession>, RcError> {
        let start = Instant::now();
        let mut tx = finish("end_session", start, self.pool.begin().await)?;

        let ended = sqlx::query(&format!(
            r#"
            UPDATE call_sessions
            SET ended_at = GREATEST(now(), started_at)
            WHERE room_code = $1 AND ended_at IS NULL
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(code.as_str())
        .fetch_optional(&mut *tx)
        .await;

        let Some(row) = finish("end_session", start, ended)? else {
            return Ok(None);
        };
        let session = map_row_to_session(&row)?;

        let closed = sqlx::query(
            r#"
            UPDATE attendance
            SET left_at = GREATEST(now(), joined_at)
            WHERE session_id = $1 AND left_at IS NULL
            "#,
        )
        .bind(session.id.0)
        .execute(&mut *tx)
        .await;
        let closed = finish("end_session", start, closed)?.rows_affected();

        let left = sqlx::query(
            "UPDATE participants SET status = 'left' WHERE room_code = $1 AND status = 'joined'",
        )
        .bind(code.as_str())
        .execute(&mut *tx)
        .await;
        finish("end_session", start, left)?;

        finish("end_session", start, tx.commit().await)?;

        debug!(
            target: "rc.store",
            room_code = %code,
            session_id = %session.id,
            attendance_closed = closed,
            "Session ended"
        );

        Ok(Some(session))
    }

    #[instrument(skip_all, name = "rc.store.session")]
    async fn session(&self, id: SessionId) -> Result<Option<CallSession>, RcError> {
        let start = Instant::now();
        let result = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM call_sessions WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await;

        finish("session", start, result)?
            .as_ref()
            .map(map_row_to_session)
            .transpose()
    }

    #[instrument(skip_all, name = "rc.store.active_session")]
    async fn active_session(&self, code: &RoomCode) -> Result<Option<CallSession>, RcError> {
        let start = Instant::now();
        let result = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM call_sessions WHERE room_code = $1 AND ended_at IS NULL"
        ))
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await;

        finish("active_session", start, result)?
            .as_ref()
            .map(map_row_to_session)
            .transpose()
    }

    async fn set_participant_count(&self, id: SessionId, count: i64) -> Result<(), RcError> {
        let start = Instant::now();
        let result = sqlx::query("UPDATE call_sessions SET participant_count = $2 WHERE id = $1")
            .bind(id.0)
            .bind(count)
            .execute(&self.pool)
            .await;

        if finish("set_participant_count", start, result)?.rows_affected() == 0 {
            return Err(RcError::SessionNotFound);
        }
        Ok(())
    }

    async fn increment_counter(&self, id: SessionId, kind: ActivityKind) -> Result<(), RcError> {
        let column = match kind {
            ActivityKind::Message => "message_count",
            ActivityKind::Poll => "poll_count",
            ActivityKind::HandRaise => "hand_raise_count",
        };

        let start = Instant::now();
        let result = sqlx::query(&format!(
            "UPDATE call_sessions SET {column} = {column} + 1 WHERE id = $1"
        ))
        .bind(id.0)
        .execute(&self.pool)
        .await;

        if finish("increment_counter", start, result)?.rows_affected() == 0 {
            return Err(RcError::SessionNotFound);
        }
        Ok(())
    }

    #[instrument(skip_all, name = "rc.store.open_attendance")]
    async fn open_attendance(&self, id: SessionId, user: &UserId) -> Result<bool, RcError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            INSERT INTO attendance (id, session_id, user_id)
            SELECT $1, s.id, $3
            FROM call_sessions s
            WHERE s.id = $2 AND s.ended_at IS NULL
            ON CONFLICT (session_id, user_id) WHERE left_at IS NULL DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(id.0)
        .bind(user.as_str())
        .execute(&self.pool)
        .await;

        Ok(finish("open_attendance", start, result)?.rows_affected() == 1)
    }

    #[instrument(skip_all, name = "rc.store.close_attendance")]
    async fn close_attendance(&self, id: SessionId, user: &UserId) -> Result<bool, RcError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE attendance
            SET left_at = GREATEST(now(), joined_at)
            WHERE session_id = $1 AND user_id = $2 AND left_at IS NULL
            "#,
        )
        .bind(id.0)
        .bind(user.as_str())
        .execute(&self.pool)
        .await;

        Ok(finish("close_attendance", start, result)?.rows_affected() > 0)
    }

    async fn attendance_for_session(&self, id: SessionId) -> Result<Vec<Attendance>, RcError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            SELECT id, session_id, user_id, joined_at, left_at
            FROM attendance
            WHERE session_id = $1
            ORDER BY joined_at, id
            "#,
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await;

        finish("attendance_for_session", start, result)?
            .iter()
            .map(map_row_to_attendance)
            .collect()
    }

    #[instrument(skip_all, name = "rc.store.mark_participant_joined")]
    async fn mark_participant_joined(
        &self,
        code: &RoomCode,
        user: &UserId,
    ) -> Result<ParticipantState, RcError> {
        let start = Instant::now();
        let mut tx = finish("mark_participant_joined", start, self.pool.begin().await)?;

        // Serialises the NOT EXISTS check below against concurrent first joins.
        let locked = sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(code.as_str())
            .execute(&mut *tx)
            .await;
        finish("mark_participant_joined", start, locked)?;

        let upserted = sqlx::query(&format!(
            r#"
            INSERT INTO participants (room_code, user_id, is_host, status, last_active_at)
            VALUES (
                $1, $2,
                NOT EXISTS (SELECT 1 FROM participants WHERE room_code = $1),
                'joined', now()
            )
            ON CONFLICT (room_code, user_id)
            DO UPDATE SET status = 'joined', last_active_at = now()
            RETURNING {PARTICIPANT_COLUMNS}
            "#
        ))
        .bind(code.as_str())
        .bind(user.as_str())
        .fetch_one(&mut *tx)
        .await;
        let row = finish("mark_participant_joined", start, upserted)?;

        finish("mark_participant_joined", start, tx.commit().await)?;
        map_row_to_participant(&row)
    }

    async fn mark_participant_left(&self, code: &RoomCode, user: &UserId) -> Result<(), RcError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE participants
            SET status = 'left', last_active_at = now()
            WHERE room_code = $1 AND user_id = $2
            "#,
        )
        .bind(code.as_str())
        .bind(user.as_str())
        .execute(&self.pool)
        .await;

        finish("mark_participant_left", start, result)?;
        Ok(())
    }

    async fn participant(
        &self,
        code: &RoomCode,
        user: &UserId,
    ) -> Result<Option<ParticipantState>, RcError> {
        let start = Instant::now();
        let result = sqlx::query(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE room_code = $1 AND user_id = $2"
        ))
        .bind(code.as_str())
        .bind(user.as_str())
        .fetch_optional(&self.pool)
        .await;

        finish("participant", start, result)?
            .as_ref()
            .map(map_row_to_participant)
            .transpose()
    }

    async fn count_joined(&self, code: &RoomCode) -> Result<i64, RcError> {
        let start = Instant::now();
        let result = sqlx::query(
            "SELECT COUNT(*) AS joined FROM participants WHERE room_code = $1 AND status = 'joined'",
        )
        .bind(code.as_str())
        .fetch_one(&self.pool)
        .await;

        let row = finish("count_joined", start, result)?;
        Ok(row.try_get("joined")?)
    }

    async fn update_media_state(
        &self,
        code: &RoomCode,
        user: &UserId,
        flags: MediaFlags,
    ) -> Result<bool, RcError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE participants
            SET video_enabled = $3, audio_enabled = $4, screen_share = $5, last_active_at = now()
            WHERE room_code = $1 AND user_id = $2
            "#,
        )
        .bind(code.as_str())
        .bind(user.as_str())
        .bind(flags.video)
        .bind(flags.audio)
        .bind(flags.screen_share)
        .execute(&self.pool)
        .await;

        Ok(finish("update_media_state", start, result)?.rows_affected() == 1)
    }

    async fn set_host_muted(
        &self,
        code: &RoomCode,
        user: &UserId,
        muted: bool,
    ) -> Result<bool, RcError> {
        let start = Instant::now();
        let result = sqlx::query(
            "UPDATE participants SET muted_by_host = $3 WHERE room_code = $1 AND user_id = $2",
        )
        .bind(code.as_str())
        .bind(user.as_str())
        .bind(muted)
        .execute(&self.pool)
        .await;

        Ok(finish("set_host_muted", start, result)?.rows_affected() == 1)
    }
}
