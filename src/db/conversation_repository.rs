use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::error;

use crate::errors::AppError;
use crate::models::{merge_feedback, ConversationRecord, FeedbackMap, Message, OverallFeedback};

#[derive(Clone)]
pub struct ConversationRepository {
    pool: PgPool,
}

impl ConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_session_id(
        &self,
        session_id: &str,
    ) -> Result<Option<ConversationRecord>, AppError> {
        sqlx::query_as::<_, ConversationRecord>(
            "SELECT session_id, username, messages, feedback, overall_feedback,
                    completed, completed_at, created_at, updated_at
             FROM conversations WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to find conversation {session_id}: {e}");
            AppError::db_query(format!("Failed to find conversation {session_id}"), e)
        })
    }

    /// Inserts or replaces the transcript for `session_id`. `feedback` is
    /// merged into the stored feedback field by field, never dropped.
    pub async fn upsert(
        &self,
        session_id: &str,
        username: &str,
        messages: &[Message],
        feedback: FeedbackMap,
    ) -> Result<ConversationRecord, AppError> {
        let mut tx = self.begin(session_id).await?;
        let mut stored = lock_feedback(&mut *tx, session_id).await?;
        merge_feedback(&mut stored, feedback);

        let record = sqlx::query_as::<_, ConversationRecord>(
            "UPDATE conversations SET
                 username   = $2,
                 messages   = $3,
                 feedback   = $4,
                 updated_at = NOW()
             WHERE session_id = $1
             RETURNING session_id, username, messages, feedback, overall_feedback,
                       completed, completed_at, created_at, updated_at",
        )
        .bind(session_id)
        .bind(username)
        .bind(Json(messages))
        .bind(Json(&stored))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to save conversation {session_id}: {e}");
            AppError::db_query("Failed to save conversation", e)
        })?;

        commit(tx, session_id).await?;
        Ok(record)
    }

    /// Field-level merge of `update` into the stored feedback. Creates an
    /// empty conversation when the session has not been saved yet.
    pub async fn merge_feedback(
        &self,
        session_id: &str,
        update: FeedbackMap,
    ) -> Result<ConversationRecord, AppError> {
        let mut tx = self.begin(session_id).await?;
        let mut feedback = lock_feedback(&mut *tx, session_id).await?;
        merge_feedback(&mut feedback, update);

        let record = sqlx::query_as::<_, ConversationRecord>(
            "UPDATE conversations SET
                 feedback   = $2,
                 updated_at = NOW()
             WHERE session_id = $1
             RETURNING session_id, username, messages, feedback, overall_feedback,
                       completed, completed_at, created_at, updated_at",
        )
        .bind(session_id)
        .bind(Json(&feedback))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to store feedback for {session_id}: {e}");
            AppError::db_query("Failed to store feedback", e)
        })?;

        commit(tx, session_id).await?;
        Ok(record)
    }

    async fn begin(&self, session_id: &str) -> Result<Transaction<'static, Postgres>, AppError> {
        self.pool.begin().await.map_err(|e| {
            error!("Failed to begin transaction for {session_id}: {e}");
            AppError::db_query("Failed to begin transaction", e)
        })
    }

    /// Marks the session completed. Returns `None` for an unknown session.
    pub async fn complete(
        &self,
        session_id: &str,
        overall: &OverallFeedback,
    ) -> Result<Option<ConversationRecord>, AppError> {
        sqlx::query_as::<_, ConversationRecord>(
            "UPDATE conversations SET
                 overall_feedback = $2,
                 completed        = TRUE,
                 completed_at     = NOW(),
                 updated_at       = NOW()
             WHERE session_id = $1
             RETURNING session_id, username, messages, feedback, overall_feedback,
                       completed, completed_at, created_at, updated_at",
        )
        .bind(session_id)
        .bind(Json(overall))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to complete session {session_id}: {e}");
            AppError::db_query("Failed to complete session", e)
        })
    }
}

/// Makes sure the row exists, then locks it and returns its feedback.
/// Concurrent writers for the same session queue on the row lock, so each
/// one merges into what the previous one committed.
async fn lock_feedback(conn: &mut PgConnection, session_id: &str) -> Result<FeedbackMap, AppError> {
    sqlx::query("INSERT INTO conversations (session_id) VALUES ($1) ON CONFLICT (session_id) DO NOTHING")
        .bind(session_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            error!("Failed to create conversation {session_id}: {e}");
            AppError::db_query("Failed to create conversation", e)
        })?;

    let (Json(feedback),): (Json<FeedbackMap>,) =
        sqlx::query_as("SELECT feedback FROM conversations WHERE session_id = $1 FOR UPDATE")
            .bind(session_id)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| {
                error!("Failed to lock feedback for {session_id}: {e}");
                AppError::db_query("Failed to load feedback", e)
            })?;
    Ok(feedback)
}

async fn commit(tx: Transaction<'_, Postgres>, session_id: &str) -> Result<(), AppError> {
    tx.commit().await.map_err(|e| {
        error!("Failed to commit transaction for {session_id}: {e}");
        AppError::db_query("Failed to commit transaction", e)
    })
}
