//! Badge catalog

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BadgeCriterion {
    /// Lifetime points earned
    PointsEarned(i64),
    /// Length of the streak just rewarded
    StreakDays(u32),
    /// Comments promoted to top
    TopComments(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeDefinition {
    pub id: String,
    pub name: String,
    pub criterion: BadgeCriterion,
    pub coins: i64,
}

impl BadgeDefinition {
    pub fn new(id: &str, name: &str, criterion: BadgeCriterion, coins: i64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            criterion,
            coins,
        }
    }
}

/// What a user has achieved, as seen right after a reward event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BadgeProgress {
    pub total_earned: i64,
    pub streak_days: Option<u32>,
    pub top_comments: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BadgeCatalog {
    badges: Vec<BadgeDefinition>,
}

impl BadgeCatalog {
    pub fn new(badges: Vec<BadgeDefinition>) -> Self {
        Self { badges }
    }

    pub fn standard() -> Self {
        Self::new(vec![
            BadgeDefinition::new("rising_star", "Rising Star", BadgeCriterion::PointsEarned(1_000), 10),
            BadgeDefinition::new("centurion", "Centurion", BadgeCriterion::PointsEarned(5_000), 50),
            BadgeDefinition::new("week_warrior", "Week Warrior", BadgeCriterion::StreakDays(7), 5),
            BadgeDefinition::new("month_master", "Month Master", BadgeCriterion::StreakDays(30), 25),
            BadgeDefinition::new("top_voice", "Top Voice", BadgeCriterion::TopComments(5), 10),
        ])
    }

    pub fn get(&self, id: &str) -> Option<&BadgeDefinition> {
        self.badges.iter().find(|badge| badge.id == id)
    }

    /// Badges whose criterion `progress` satisfies. Already-awarded badges are
    /// included; the ledger's idempotency key filters them out.
    pub fn earned<'a>(&'a self, progress: &'a BadgeProgress) -> impl Iterator<Item = &'a BadgeDefinition> + 'a {
        self.badges.iter().filter(move |badge| match badge.criterion {
            BadgeCriterion::PointsEarned(points) => progress.total_earned >= points,
            BadgeCriterion::StreakDays(days) => progress.streak_days.is_some_and(|d| d >= days),
            BadgeCriterion::TopComments(count) => progress.top_comments >= count,
        })
    }

    pub fn len(&self) -> usize {
        self.badges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.badges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streak_badges() {
        let catalog = BadgeCatalog::standard();
        let progress = BadgeProgress {
            streak_days: Some(7),
            ..Default::default()
        };

        let ids: Vec<&str> = catalog.earned(&progress).map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["week_warrior"]);
    }

    #[test]
    fn test_points_badges_accumulate() {
        let catalog = BadgeCatalog::standard();
        let progress = BadgeProgress {
            total_earned: 5_000,
            ..Default::default()
        };

        assert_eq!(catalog.earned(&progress).count(), 2);
    }

    #[test]
    fn test_nothing_earned_by_default() {
        let catalog = BadgeCatalog::standard();
        assert_eq!(catalog.earned(&BadgeProgress::default()).count(), 0);
        assert!(catalog.get("top_voice").is_some());
    }
}
