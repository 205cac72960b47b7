//! Reward Cascade Orchestrator
//!
//! Sequences the multi-step effects of one event. The top-comment cascade
//! runs on every new like:
//!
//! ```text
//! like ──▶ re-rank post ──▶ leader ≥ threshold and not top?
//!                                  │ yes
//!                                  ▼
//!                     reward author (coins + points)
//!                                  │ ok
//!                                  ▼
//!                     demote previous top, promote leader
//! ```
//!
//! The whole sequence runs inside the post's critical section.

mod top_comment;

pub use top_comment::{Comment, CommentBoard, LikeOutcome, Promotion};
