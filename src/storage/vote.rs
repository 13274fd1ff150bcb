//! Vote storage: one row per (report, user), created, overwritten, or withdrawn.

use rusqlite::{OptionalExtension, Row, params};
use uuid::Uuid;

use crate::model::{Vote, VoteType};

use super::{Result, StorageError, Tx, parse_timestamp, parse_uuid};

impl Tx<'_> {
    /// Loads `user`'s current vote on a report, if any.
    pub fn load_vote(&self, report_id: Uuid, user: &str) -> Result<Option<Vote>> {
        let raw = self
            .inner
            .query_row(
                "SELECT report_id, user_id, vote_type, created_at, updated_at
                 FROM vote WHERE report_id = ?1 AND user_id = ?2",
                params![report_id.to_string(), user],
                RawVote::from_row,
            )
            .optional()?;
        raw.map(RawVote::into_vote).transpose()
    }

    /// Records a vote, replacing the user's earlier vote on the same report.
    ///
    /// The original `created_at` survives an overwrite.
    pub fn put_vote(&self, vote: &Vote) -> Result<()> {
        self.inner.execute(
            "INSERT INTO vote (report_id, user_id, vote_type, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (report_id, user_id) DO UPDATE
             SET vote_type = excluded.vote_type, updated_at = excluded.updated_at",
            params![
                vote.report_id.to_string(),
                &vote.user,
                vote.vote_type.as_str(),
                vote.created_at.to_string(),
                vote.updated_at.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Withdraws `user`'s vote. Returns whether there was one to withdraw.
    pub fn delete_vote(&self, report_id: Uuid, user: &str) -> Result<bool> {
        let rows = self.inner.execute(
            "DELETE FROM vote WHERE report_id = ?1 AND user_id = ?2",
            params![report_id.to_string(), user],
        )?;
        Ok(rows > 0)
    }

    /// Loads every current vote on a report, in the order they were first cast.
    pub fn votes_for(&self, report_id: Uuid) -> Result<Vec<Vote>> {
        let mut stmt = self.inner.prepare(
            "SELECT report_id, user_id, vote_type, created_at, updated_at
             FROM vote WHERE report_id = ?1 ORDER BY created_at, user_id",
        )?;
        let rows = stmt.query_map([report_id.to_string()], RawVote::from_row)?;
        let votes = rows
            .map(|raw| raw?.into_vote())
            .collect::<Result<Vec<_>>>()?;
        Ok(votes)
    }
}

struct RawVote {
    report_id: String,
    user: String,
    vote_type: String,
    created_at: String,
    updated_at: String,
}

impl RawVote {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            report_id: row.get(0)?,
            user: row.get(1)?,
            vote_type: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    fn into_vote(self) -> Result<Vote> {
        Ok(Vote {
            report_id: parse_uuid("vote report_id", &self.report_id)?,
            user: self.user,
            vote_type: self
                .vote_type
                .parse::<VoteType>()
                .map_err(|e| StorageError::Corrupt(e.to_string()))?,
            created_at: parse_timestamp("vote created_at", &self.created_at)?,
            updated_at: parse_timestamp("vote updated_at", &self.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use jiff::Timestamp;

    use crate::model::{NewReport, Report, VoteType};
    use crate::storage::{Storage, testing::test_storage};

    use super::*;

    fn stored_report(storage: &Storage) -> Uuid {
        let report = Report::file(
            NewReport {
                owner: "alice".into(),
                title: "Flooded underpass".into(),
                contact: None,
                has_progress: true,
            },
            Timestamp::now(),
        );
        storage.write(|tx| tx.insert_report(&report)).unwrap();
        report.id
    }

    #[test]
    fn put_and_load_vote() {
        let (_dir, storage) = test_storage();
        let report_id = stored_report(&storage);
        let vote = Vote::new(report_id, "bob", VoteType::Resolved, Timestamp::now());

        storage.write(|tx| tx.put_vote(&vote)).unwrap();
        let loaded = storage.read(|tx| tx.load_vote(report_id, "bob")).unwrap();

        assert_eq!(loaded, Some(vote));
    }

    #[test]
    fn load_missing_vote_is_none() {
        let (_dir, storage) = test_storage();
        let report_id = stored_report(&storage);

        let loaded = storage.read(|tx| tx.load_vote(report_id, "bob")).unwrap();

        assert!(loaded.is_none());
    }

    #[test]
    fn put_vote_overwrites_in_place() {
        let (_dir, storage) = test_storage();
        let report_id = stored_report(&storage);
        let first = Vote::new(report_id, "bob", VoteType::Resolved, Timestamp::now());
        storage.write(|tx| tx.put_vote(&first)).unwrap();

        let mut changed = first.clone();
        changed.vote_type = VoteType::NotResolved;
        changed.updated_at = Timestamp::now();
        storage.write(|tx| tx.put_vote(&changed)).unwrap();

        let votes = storage.read(|tx| tx.votes_for(report_id)).unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].vote_type, VoteType::NotResolved);
        assert_eq!(votes[0].created_at, first.created_at);
    }

    #[test]
    fn delete_vote_reports_whether_it_existed() {
        let (_dir, storage) = test_storage();
        let report_id = stored_report(&storage);
        let vote = Vote::new(report_id, "bob", VoteType::OnProgress, Timestamp::now());
        storage.write(|tx| tx.put_vote(&vote)).unwrap();

        assert!(storage.write(|tx| tx.delete_vote(report_id, "bob")).unwrap());
        assert!(!storage.write(|tx| tx.delete_vote(report_id, "bob")).unwrap());
        assert!(storage.read(|tx| tx.votes_for(report_id)).unwrap().is_empty());
    }

    #[test]
    fn votes_for_only_returns_that_report() {
        let (_dir, storage) = test_storage();
        let first = stored_report(&storage);
        let second = stored_report(&storage);
        let now = Timestamp::now();

        storage
            .write(|tx| {
                tx.put_vote(&Vote::new(first, "bob", VoteType::Resolved, now))?;
                tx.put_vote(&Vote::new(first, "carol", VoteType::Resolved, now))?;
                tx.put_vote(&Vote::new(second, "bob", VoteType::NotResolved, now))
            })
            .unwrap();

        assert_eq!(storage.read(|tx| tx.votes_for(first)).unwrap().len(), 2);
        assert_eq!(storage.read(|tx| tx.votes_for(second)).unwrap().len(), 1);
    }
}
