//! Review capture

use super::orchestrator::IncomingMessage;
use super::traits::ReviewStore;
use crate::db::Review;
use chrono::Utc;

/// Persist the triggering message as a new review
///
/// Each call generates a fresh review ID. Store failures are returned to the
/// caller unchanged; there is no retry here.
pub async fn capture_review<R: ReviewStore + ?Sized>(
    store: &R,
    input: &IncomingMessage,
) -> Result<Review, String> {
    let review = Review {
        id: uuid::Uuid::new_v4().to_string(),
        customer_id: input.user_id,
        chat_id: input.chat_id,
        text: input.text.clone(),
        received_at: Utc::now(),
    };

    store.save_review(&review).await?;
    tracing::info!(
        chat_id = input.chat_id,
        customer_id = input.user_id,
        review_id = %review.id,
        "Captured review"
    );
    Ok(review)
}
