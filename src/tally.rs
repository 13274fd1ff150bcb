//! Vote tally: per-type counts and the consensus decision.
//!
//! A tally is pure. It is rebuilt from every current vote on a report each
//! time a vote changes, inside the same transaction that wrote the vote.
//!
//! A report moves on the crowd's word only when the leading vote type is
//! clearly ahead:
//!
//! ```text
//! margin_pct = (top - second) / total * 100
//! eligible   = margin_pct >= 20 && top >= 2
//! ```
//!
//! Equal counts rank by [`VoteType::PRIORITY`], so the same votes always
//! produce the same decision.

use serde::Serialize;

use crate::model::{Vote, VoteType};

/// Smallest lead over the runner-up, as a percentage of all votes.
pub const MIN_MARGIN_PCT: u64 = 20;

/// Fewest votes the leading type needs before anything moves.
pub const MIN_TOP_COUNT: u64 = 2;

/// Vote counts for one report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tally {
    pub resolved: u64,
    pub on_progress: u64,
    pub not_resolved: u64,
}

impl Tally {
    pub fn from_votes<'a>(votes: impl IntoIterator<Item = &'a Vote>) -> Self {
        let mut tally = Self::default();
        for vote in votes {
            *tally.count_mut(vote.vote_type) += 1;
        }
        tally
    }

    pub fn count(&self, vote_type: VoteType) -> u64 {
        match vote_type {
            VoteType::Resolved => self.resolved,
            VoteType::OnProgress => self.on_progress,
            VoteType::NotResolved => self.not_resolved,
        }
    }

    fn count_mut(&mut self, vote_type: VoteType) -> &mut u64 {
        match vote_type {
            VoteType::Resolved => &mut self.resolved,
            VoteType::OnProgress => &mut self.on_progress,
            VoteType::NotResolved => &mut self.not_resolved,
        }
    }

    pub fn total(&self) -> u64 {
        self.resolved + self.on_progress + self.not_resolved
    }

    /// Every vote type with its count, highest first, ties in priority order.
    pub fn ranked(&self) -> [(VoteType, u64); 3] {
        let mut ranked = VoteType::PRIORITY.map(|vote_type| (vote_type, self.count(vote_type)));
        // Stable: equal counts keep their priority order.
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
    }

    pub fn top(&self) -> (VoteType, u64) {
        self.ranked()[0]
    }

    pub fn second(&self) -> (VoteType, u64) {
        self.ranked()[1]
    }

    /// The leader's lead over the runner-up as a percentage of all votes.
    ///
    /// `None` when nobody has voted. For display only; [`Tally::decision`]
    /// compares in integers.
    #[allow(clippy::cast_precision_loss)]
    pub fn margin_pct(&self) -> Option<f64> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        let (_, top) = self.top();
        let (_, second) = self.second();
        Some((top - second) as f64 / total as f64 * 100.0)
    }

    /// The vote type the crowd has settled on, if the lead is wide enough.
    pub fn decision(&self) -> Option<VoteType> {
        let total = self.total();
        let (leader, top) = self.top();
        let (_, second) = self.second();

        if total == 0 || top < MIN_TOP_COUNT {
            return None;
        }
        // margin_pct >= MIN_MARGIN_PCT without leaving integers.
        ((top - second) * 100 >= MIN_MARGIN_PCT * total).then_some(leader)
    }

    /// The leading vote type, whether or not it is decisive.
    pub fn majority(&self) -> Option<VoteType> {
        (self.total() > 0).then(|| self.top().0)
    }
}
