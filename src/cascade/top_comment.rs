//! Top-comment tracking per post

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{EconomyError, Result};
use crate::rewards::{EventEnvelope, RewardEngine, RewardEvent, RewardOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub likes: u32,
    pub is_top: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    likers: HashSet<String>,
}

impl Comment {
    fn new(post_id: &str, id: String, author_id: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            post_id: post_id.to_string(),
            author_id,
            likes: 0,
            is_top: false,
            created_at,
            likers: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Promotion {
    pub comment_id: String,
    pub author_id: String,
    pub demoted: Option<String>,
    /// None when the author's wallet is archived
    pub reward: Option<RewardOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeOutcome {
    pub post_id: String,
    pub comment_id: String,
    pub likes: u32,
    /// The liker had already liked this comment
    pub duplicate: bool,
    pub promotion: Option<Promotion>,
}

#[derive(Debug, Default)]
struct PostThread {
    comments: Vec<Comment>,
}

impl PostThread {
    /// Most likes first, earliest comment on ties.
    fn leader(&self) -> Option<usize> {
        self.comments
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                b.likes
                    .cmp(&a.likes)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.id.cmp(&b.id))
            })
            .map(|(index, _)| index)
    }

    fn position(&self, comment_id: &str) -> Option<usize> {
        self.comments.iter().position(|comment| comment.id == comment_id)
    }
}

/// Comments per post, each post behind its own lock. Threads are kept for
/// the life of the board.
pub struct CommentBoard {
    threads: DashMap<String, Arc<Mutex<PostThread>>>,
    rewards: Arc<RewardEngine>,
}

impl CommentBoard {
    pub fn new(rewards: Arc<RewardEngine>) -> Self {
        Self {
            threads: DashMap::new(),
            rewards,
        }
    }

    fn thread(&self, post_id: &str) -> Arc<Mutex<PostThread>> {
        self.threads
            .entry(post_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    fn existing_thread(&self, post_id: &str) -> Option<Arc<Mutex<PostThread>>> {
        self.threads.get(post_id).map(|thread| thread.value().clone())
    }

    pub async fn add_comment(
        &self,
        post_id: &str,
        comment_id: &str,
        author_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Comment> {
        if post_id.is_empty() || comment_id.is_empty() || author_id.is_empty() {
            return Err(EconomyError::InvalidEvent(
                "postId, commentId and authorId are required".to_string(),
            ));
        }

        let handle = self.thread(post_id);
        let mut thread = handle.lock().await;
        if thread.position(comment_id).is_some() {
            return Err(EconomyError::InvalidEvent(format!(
                "comment {comment_id} already exists on post {post_id}"
            )));
        }

        let comment = Comment::new(post_id, comment_id.to_string(), author_id.to_string(), created_at);
        thread.comments.push(comment.clone());
        debug!(post_id = %post_id, comment_id = %comment_id, "Comment added");
        Ok(comment)
    }

    pub async fn comments(&self, post_id: &str) -> Vec<Comment> {
        match self.existing_thread(post_id) {
            Some(handle) => handle.lock().await.comments.clone(),
            None => Vec::new(),
        }
    }

    pub async fn top_comment(&self, post_id: &str) -> Option<Comment> {
        self.comments(post_id)
            .await
            .into_iter()
            .find(|comment| comment.is_top)
    }

    /// Records a like and runs the top-comment cascade for the post.
    ///
    /// A repeated like from the same user is a no-op. An archived author is
    /// promoted without a reward. Any other reward failure rolls the like back
    /// and returns the error, so the caller can retry the like as a whole.
    pub async fn like_comment(
        &self,
        post_id: &str,
        comment_id: &str,
        liker_id: &str,
    ) -> Result<LikeOutcome> {
        let not_found = || EconomyError::CommentNotFound {
            post_id: post_id.to_string(),
            comment_id: comment_id.to_string(),
        };
        if liker_id.is_empty() {
            return Err(EconomyError::InvalidEvent("userId is required".to_string()));
        }

        let handle = self.existing_thread(post_id).ok_or_else(not_found)?;
        let mut thread = handle.lock().await;
        let index = thread.position(comment_id).ok_or_else(not_found)?;

        let comment = &mut thread.comments[index];
        if !comment.likers.insert(liker_id.to_string()) {
            return Ok(LikeOutcome {
                post_id: post_id.to_string(),
                comment_id: comment_id.to_string(),
                likes: comment.likes,
                duplicate: true,
                promotion: None,
            });
        }
        comment.likes += 1;

        match self.cascade(&mut thread).await {
            Ok(promotion) => Ok(LikeOutcome {
                post_id: post_id.to_string(),
                comment_id: comment_id.to_string(),
                likes: thread.comments[index].likes,
                duplicate: false,
                promotion,
            }),
            Err(e) => {
                let comment = &mut thread.comments[index];
                comment.likers.remove(liker_id);
                comment.likes -= 1;
                warn!(
                    post_id = %post_id,
                    comment_id = %comment_id,
                    error = %e,
                    "Top-comment reward failed, like rolled back"
                );
                Err(e)
            }
        }
    }

    async fn cascade(&self, thread: &mut PostThread) -> Result<Option<Promotion>> {
        let Some(leader) = thread.leader() else {
            return Ok(None);
        };

        let threshold = self.rewards.rules().top_comment_like_threshold;
        let candidate = &thread.comments[leader];
        if candidate.is_top || candidate.likes < threshold {
            return Ok(None);
        }

        let envelope = EventEnvelope::new(
            candidate.author_id.clone(),
            candidate.id.clone(),
            RewardEvent::TopComment,
        );
        let reward = match self.rewards.process(envelope).await {
            Ok(reward) => Some(reward),
            Err(EconomyError::WalletArchived(author_id)) => {
                warn!(
                    comment_id = %candidate.id,
                    author_id = %author_id,
                    "Author wallet archived, promoting without reward"
                );
                None
            }
            Err(e) => return Err(e),
        };

        let mut demoted = None;
        for comment in thread.comments.iter_mut().filter(|comment| comment.is_top) {
            comment.is_top = false;
            demoted = Some(comment.id.clone());
        }
        let promoted = &mut thread.comments[leader];
        promoted.is_top = true;

        info!(
            post_id = %promoted.post_id,
            comment_id = %promoted.id,
            author_id = %promoted.author_id,
            likes = promoted.likes,
            demoted = ?demoted,
            rewarded = reward.is_some(),
            "Top comment promoted"
        );

        Ok(Some(Promotion {
            comment_id: promoted.id.clone(),
            author_id: promoted.author_id.clone(),
            demoted,
            reward,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Currency, InMemoryLedger, LedgerStore, RetryPolicy};
    use crate::notify::LogNotifier;
    use crate::rewards::{BadgeCatalog, RewardRules};
    use chrono::Duration;

    fn board() -> (CommentBoard, Arc<InMemoryLedger>) {
        board_with(RewardRules::default())
    }

    fn board_with(rules: RewardRules) -> (CommentBoard, Arc<InMemoryLedger>) {
        let ledger = Arc::new(InMemoryLedger::new());
        let rewards = RewardEngine::new(
            ledger.clone(),
            rules,
            BadgeCatalog::standard(),
            Arc::new(LogNotifier),
            RetryPolicy::default(),
        );
        (CommentBoard::new(Arc::new(rewards)), ledger)
    }

    async fn like_n(board: &CommentBoard, post: &str, comment: &str, n: usize) -> LikeOutcome {
        let mut last = None;
        for i in 0..n {
            last = Some(
                board
                    .like_comment(post, comment, &format!("{comment}_fan_{i}"))
                    .await
                    .unwrap(),
            );
        }
        last.unwrap()
    }

    #[tokio::test]
    async fn test_threshold_promotes_once() {
        let (board, ledger) = board();
        let now = Utc::now();
        board.add_comment("post_1", "a", "alice", now).await.unwrap();
        board
            .add_comment("post_1", "b", "bob", now + Duration::seconds(1))
            .await
            .unwrap();

        let a = like_n(&board, "post_1", "a", 2).await;
        assert!(a.promotion.is_none());

        let b = like_n(&board, "post_1", "b", 3).await;
        let promotion = b.promotion.unwrap();
        assert_eq!(promotion.comment_id, "b");
        let reward = promotion.reward.unwrap();
        assert_eq!(reward.coins_delta, 5);
        assert_eq!(reward.points_delta, 50);

        let fourth = board.like_comment("post_1", "b", "carol").await.unwrap();
        assert_eq!(fourth.likes, 4);
        assert!(fourth.promotion.is_none());

        assert_eq!(ledger.balance("bob", Currency::Coins).await.unwrap(), 5);
        assert_eq!(ledger.balance("bob", Currency::Points).await.unwrap(), 50);
        assert_eq!(board.top_comment("post_1").await.unwrap().id, "b");
    }

    #[tokio::test]
    async fn test_overtake_demotes_previous() {
        let (board, ledger) = board();
        let now = Utc::now();
        board.add_comment("post_1", "a", "alice", now).await.unwrap();
        board
            .add_comment("post_1", "b", "bob", now + Duration::seconds(1))
            .await
            .unwrap();

        like_n(&board, "post_1", "a", 3).await;
        let b = like_n(&board, "post_1", "b", 4).await;

        let promotion = b.promotion.unwrap();
        assert_eq!(promotion.demoted.as_deref(), Some("a"));

        let tops: Vec<_> = board
            .comments("post_1")
            .await
            .into_iter()
            .filter(|c| c.is_top)
            .collect();
        assert_eq!(tops.len(), 1);
        assert_eq!(tops[0].id, "b");
        // Demotion keeps the reward already paid
        assert_eq!(ledger.balance("alice", Currency::Coins).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_tie_goes_to_earliest() {
        let (board, _ledger) = board();
        let now = Utc::now();
        board
            .add_comment("post_1", "late", "bob", now + Duration::seconds(5))
            .await
            .unwrap();
        board.add_comment("post_1", "early", "alice", now).await.unwrap();

        like_n(&board, "post_1", "late", 2).await;
        like_n(&board, "post_1", "early", 2).await;
        let late = board.like_comment("post_1", "late", "x").await.unwrap();
        assert_eq!(late.promotion.unwrap().comment_id, "late");

        let early = board.like_comment("post_1", "early", "y").await.unwrap();
        let promotion = early.promotion.unwrap();
        assert_eq!(promotion.comment_id, "early");
        assert_eq!(promotion.demoted.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_duplicate_like_is_noop() {
        let (board, _ledger) = board();
        board.add_comment("post_1", "a", "alice", Utc::now()).await.unwrap();

        board.like_comment("post_1", "a", "bob").await.unwrap();
        let again = board.like_comment("post_1", "a", "bob").await.unwrap();

        assert!(again.duplicate);
        assert_eq!(again.likes, 1);
    }

    #[tokio::test]
    async fn test_reward_failure_rolls_back_like() {
        // A debiting top-comment reward cannot be paid from an empty wallet
        let (board, ledger) = board_with(RewardRules {
            top_comment_coins: -5,
            ..RewardRules::default()
        });
        board.add_comment("post_1", "a", "alice", Utc::now()).await.unwrap();
        like_n(&board, "post_1", "a", 2).await;

        let err = board.like_comment("post_1", "a", "carol").await.unwrap_err();
        assert_eq!(err.code(), "InsufficientFunds");

        let comment = &board.comments("post_1").await[0];
        assert_eq!(comment.likes, 2);
        assert!(!comment.is_top);
        assert_eq!(ledger.balance("alice", Currency::Points).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_archived_author_promoted_without_reward() {
        let (board, ledger) = board();
        board.add_comment("post_1", "a", "alice", Utc::now()).await.unwrap();
        ledger.archive_wallet("alice").await.unwrap();

        let outcome = like_n(&board, "post_1", "a", 3).await;
        assert_eq!(outcome.likes, 3);
        let promotion = outcome.promotion.unwrap();
        assert_eq!(promotion.comment_id, "a");
        assert!(promotion.reward.is_none());

        assert_eq!(board.top_comment("post_1").await.unwrap().id, "a");
        assert_eq!(ledger.balance("alice", Currency::Coins).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_comment() {
        let (board, _ledger) = board();
        assert!(matches!(
            board.like_comment("post_1", "a", "bob").await,
            Err(EconomyError::CommentNotFound { .. })
        ));
    }
}
