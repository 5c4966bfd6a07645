use tracing::info;

use crate::db::conversation_repository::ConversationRepository;
use crate::errors::AppError;
use crate::models::{
    ConversationRecord, FeedbackMap, OverallFeedback, Role, SaveConversationRequest,
};

const MIN_RATING: u8 = 1;
const MAX_RATING: u8 = 5;

/// Conversation, feedback and session-completion store.
#[derive(Clone)]
pub struct ConversationService {
    repo: ConversationRepository,
}

impl ConversationService {
    pub fn new(repo: ConversationRepository) -> Self {
        Self { repo }
    }

    pub async fn save(&self, request: SaveConversationRequest) -> Result<ConversationRecord, AppError> {
        validate_session_id(&request.session_id)?;
        validate_feedback(&request.feedback)?;

        let messages: Vec<_> = request
            .messages
            .into_iter()
            .filter(|m| m.role != Role::System)
            .collect();
        self.repo
            .upsert(&request.session_id, &request.username, &messages, request.feedback)
            .await
    }

    pub async fn get(&self, session_id: &str) -> Result<ConversationRecord, AppError> {
        validate_session_id(session_id)?;
        self.repo
            .find_by_session_id(session_id)
            .await?
            .ok_or_else(|| AppError::SessionNotFound { session_id: session_id.to_string() })
    }

    pub async fn merge_feedback(
        &self,
        session_id: &str,
        update: FeedbackMap,
    ) -> Result<ConversationRecord, AppError> {
        validate_session_id(session_id)?;
        validate_feedback(&update)?;
        self.repo.merge_feedback(session_id, update).await
    }

    pub async fn complete(
        &self,
        session_id: &str,
        overall: OverallFeedback,
    ) -> Result<ConversationRecord, AppError> {
        validate_session_id(session_id)?;
        validate_rating(overall.rating)?;

        let record = self
            .repo
            .complete(session_id, &overall)
            .await?
            .ok_or_else(|| AppError::SessionNotFound { session_id: session_id.to_string() })?;
        info!(session_id, rating = overall.rating, "Session completed");
        Ok(record)
    }
}

fn validate_session_id(session_id: &str) -> Result<(), AppError> {
    if session_id.trim().is_empty() {
        return Err(AppError::EmptyField { field_name: "sessionId".to_string() });
    }
    Ok(())
}

fn validate_rating(rating: u8) -> Result<(), AppError> {
    if !(MIN_RATING..=MAX_RATING).contains(&rating) {
        return Err(AppError::InvalidRating { actual: rating });
    }
    Ok(())
}

fn validate_feedback(feedback: &FeedbackMap) -> Result<(), AppError> {
    feedback
        .values()
        .filter_map(|entry| entry.rating)
        .try_for_each(validate_rating)
}
