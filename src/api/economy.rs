//! Economy API Endpoints
//!
//! Reward events, loans, wallet and credit reads, and the comment board.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::cascade::{Comment, LikeOutcome};
use crate::engine::{CreditView, CurrencyReconciliation, EconomyEngine, RewardEventRequest, WalletView};
use crate::error::EconomyError;
use crate::loans::Loan;
use crate::rewards::RewardOutcome;

/// API state for economy endpoints
#[derive(Clone)]
pub struct EconomyApiState {
    pub engine: Arc<EconomyEngine>,
}

// Request types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanRequest {
    pub user_id: String,
    pub amount: i64,
    pub term_days: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepayRequest {
    pub user_id: String,
    pub loan_id: Uuid,
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRequest {
    pub comment_id: String,
    pub author_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeRequest {
    pub user_id: String,
}

// Error body

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// Engine errors on the wire: `{error: code, message}` with a status per kind.
#[derive(Debug)]
pub struct ApiError(pub EconomyError);

impl From<EconomyError> for ApiError {
    fn from(err: EconomyError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            EconomyError::InvalidEvent(_)
            | EconomyError::InvalidAmount(_)
            | EconomyError::InvalidTerm(_)
            | EconomyError::UnknownEventType(_) => StatusCode::BAD_REQUEST,
            EconomyError::LoanNotFound(_) | EconomyError::CommentNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            EconomyError::InsufficientFunds { .. } | EconomyError::CreditLimitExceeded { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            EconomyError::LoanAlreadyActive { .. }
            | EconomyError::LoanNotActive { .. }
            | EconomyError::WalletArchived(_) => StatusCode::CONFLICT,
            EconomyError::ConcurrentModification(_) => StatusCode::SERVICE_UNAVAILABLE,
            EconomyError::Storage(_) | EconomyError::DuplicateApplication(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if self.0.is_internal() {
            error!(code = self.0.code(), error = %self.0, "Internal fault");
            "internal error".to_string()
        } else {
            self.0.to_string()
        };

        let body = ErrorBody {
            error: self.0.code().to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// Endpoints

/// POST /reward-event - Apply a reward event
pub async fn post_reward_event(
    State(state): State<EconomyApiState>,
    Json(payload): Json<RewardEventRequest>,
) -> ApiResult<RewardOutcome> {
    Ok(Json(state.engine.record_event(payload).await?))
}

/// POST /loan/request - Issue a loan
pub async fn request_loan(
    State(state): State<EconomyApiState>,
    Json(payload): Json<LoanRequest>,
) -> ApiResult<Loan> {
    let loan = state
        .engine
        .request_loan(&payload.user_id, payload.amount, payload.term_days)
        .await?;
    Ok(Json(loan))
}

/// POST /loan/repay - Repay part or all of a loan
pub async fn repay_loan(
    State(state): State<EconomyApiState>,
    Json(payload): Json<RepayRequest>,
) -> ApiResult<Loan> {
    let loan = state
        .engine
        .repay_loan(payload.loan_id, &payload.user_id, payload.amount)
        .await?;
    Ok(Json(loan))
}

/// GET /wallet/{user_id} - Balances and cash value
pub async fn get_wallet(
    State(state): State<EconomyApiState>,
    Path(user_id): Path<String>,
) -> ApiResult<WalletView> {
    Ok(Json(state.engine.wallet_view(&user_id).await?))
}

/// DELETE /wallet/{user_id} - Soft-archive a wallet on account deletion
pub async fn archive_wallet(
    State(state): State<EconomyApiState>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.archive_wallet(&user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /wallet/{user_id}/reconcile - Stored balances against the entry log
pub async fn reconcile_wallet(
    State(state): State<EconomyApiState>,
    Path(user_id): Path<String>,
) -> ApiResult<Vec<CurrencyReconciliation>> {
    Ok(Json(state.engine.reconcile(&user_id).await?))
}

/// GET /credit/{user_id} - Credit score with active and past loans
pub async fn get_credit(
    State(state): State<EconomyApiState>,
    Path(user_id): Path<String>,
) -> ApiResult<CreditView> {
    Ok(Json(state.engine.credit_view(&user_id).await?))
}

/// POST /comments/{post_id} - Register a comment
pub async fn add_comment(
    State(state): State<EconomyApiState>,
    Path(post_id): Path<String>,
    Json(payload): Json<CommentRequest>,
) -> Result<(StatusCode, Json<Comment>), ApiError> {
    let comment = state
        .engine
        .add_comment(&post_id, &payload.comment_id, &payload.author_id)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// GET /comments/{post_id} - Comments on a post
pub async fn list_comments(
    State(state): State<EconomyApiState>,
    Path(post_id): Path<String>,
) -> Json<Vec<Comment>> {
    Json(state.engine.comments().comments(&post_id).await)
}

/// POST /comments/{post_id}/{comment_id}/like - Like a comment
pub async fn like_comment(
    State(state): State<EconomyApiState>,
    Path((post_id, comment_id)): Path<(String, String)>,
    Json(payload): Json<LikeRequest>,
) -> ApiResult<LikeOutcome> {
    let outcome = state
        .engine
        .like_comment(&post_id, &comment_id, &payload.user_id)
        .await?;
    Ok(Json(outcome))
}

pub fn create_router(state: EconomyApiState) -> Router {
    Router::new()
        .route("/reward-event", post(post_reward_event))
        .route("/loan/request", post(request_loan))
        .route("/loan/repay", post(repay_loan))
        .route("/wallet/{user_id}", get(get_wallet).delete(archive_wallet))
        .route("/wallet/{user_id}/reconcile", get(reconcile_wallet))
        .route("/credit/{user_id}", get(get_credit))
        .route("/comments/{post_id}", get(list_comments).post(add_comment))
        .route("/comments/{post_id}/{comment_id}/like", post(like_comment))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EconomyConfig;
    use crate::ledger::Currency;
    use serde_json::json;

    fn state() -> EconomyApiState {
        EconomyApiState {
            engine: Arc::new(EconomyEngine::in_memory(&EconomyConfig::default())),
        }
    }

    fn event(user: &str, event_type: &str, reference: &str) -> RewardEventRequest {
        RewardEventRequest {
            user_id: user.to_string(),
            event_type: event_type.to_string(),
            reference_id: reference.to_string(),
            metadata: json!({}),
        }
    }

    #[tokio::test]
    async fn test_reward_event_endpoint() {
        let state = state();
        let Json(outcome) = post_reward_event(State(state.clone()), Json(event("user_1", "post", "p1")))
            .await
            .unwrap();

        assert_eq!(outcome.points_delta, 5);
        assert_eq!(outcome.new_balances.points_balance, 5);

        let Json(wallet) = get_wallet(State(state), Path("user_1".to_string())).await.unwrap();
        assert_eq!(wallet.points_balance, 5);
    }

    #[tokio::test]
    async fn test_unknown_event_is_bad_request() {
        let err = post_reward_event(State(state()), Json(event("user_1", "dance", "d1")))
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.0.code(), "UnknownEventType");
    }

    #[tokio::test]
    async fn test_loan_error_statuses() {
        let state = state();
        let over_limit = request_loan(
            State(state.clone()),
            Json(LoanRequest {
                user_id: "user_1".to_string(),
                amount: 10_000,
                term_days: 7,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(over_limit.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let Json(loan) = request_loan(
            State(state.clone()),
            Json(LoanRequest {
                user_id: "user_1".to_string(),
                amount: 100,
                term_days: 7,
            }),
        )
        .await
        .unwrap();

        let second = request_loan(
            State(state.clone()),
            Json(LoanRequest {
                user_id: "user_1".to_string(),
                amount: 10,
                term_days: 7,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        assert_eq!(second.0.code(), "LoanAlreadyActive");

        let short = repay_loan(
            State(state.clone()),
            Json(RepayRequest {
                user_id: "user_1".to_string(),
                loan_id: loan.id,
                amount: 115,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(short.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(short.0.code(), "InsufficientFunds");

        let balance = state
            .engine
            .store()
            .balance("user_1", Currency::Coins)
            .await
            .unwrap();
        assert_eq!(balance, 100);
    }

    #[tokio::test]
    async fn test_comment_endpoints() {
        let state = state();
        let (status, _) = add_comment(
            State(state.clone()),
            Path("post_1".to_string()),
            Json(CommentRequest {
                comment_id: "c1".to_string(),
                author_id: "alice".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);

        for liker in ["bob", "carol", "dave"] {
            like_comment(
                State(state.clone()),
                Path(("post_1".to_string(), "c1".to_string())),
                Json(LikeRequest {
                    user_id: liker.to_string(),
                }),
            )
            .await
            .unwrap();
        }

        let Json(comments) = list_comments(State(state.clone()), Path("post_1".to_string())).await;
        assert!(comments[0].is_top);

        let missing = like_comment(
            State(state),
            Path(("post_1".to_string(), "nope".to_string())),
            Json(LikeRequest {
                user_id: "bob".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_internal_errors_are_opaque() {
        let response = ApiError(EconomyError::Storage("connection reset".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let conflict = ApiError(EconomyError::ConcurrentModification("w".into()));
        assert_eq!(conflict.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
