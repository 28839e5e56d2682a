use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;

use crate::model::Activity;

const ACTIVITIES: &[u8] = b"activities";

/// Records older than this are expired: invisible to every reader and
/// physically removed on the next write.
pub const RETENTION_DAYS: i64 = 90;

// created_at millis (BE) ‖ id (BE), so the tree is ordered oldest to newest
// and expiry is a prefix removal.
fn activity_key(at: DateTime<Utc>, id: u64) -> Vec<u8> {
    let mut key = (at.timestamp_millis() as u64).to_be_bytes().to_vec();
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::days(RETENTION_DAYS)
}

pub trait ActivityStore {
    fn record_activity(&self, activity: &Activity) -> sled::Result<u64>;
    /// Public activities authored by anyone in `following`, newest first.
    fn feed(
        &self,
        following: &BTreeSet<u64>,
        page: usize,
        limit: usize,
    ) -> sled::Result<Vec<(u64, Activity)>>;
    /// One user's public activities, newest first.
    fn user_activities(&self, user_id: u64, limit: usize) -> sled::Result<Vec<(u64, Activity)>>;
    /// Removes everything past the retention window. Returns how many records
    /// went away.
    fn prune_expired(&self) -> sled::Result<usize>;
}

impl ActivityStore for sled::Db {
    fn record_activity(&self, activity: &Activity) -> sled::Result<u64> {
        let activities = self.open_tree(ACTIVITIES)?;
        let id = self.generate_id()?;
        activities.insert(
            activity_key(activity.created_at, id),
            bincode::serialize(activity).unwrap(),
        )?;
        // Amortized expiry; readers filter as well, so nothing depends on
        // this running at any particular moment.
        self.prune_expired()?;
        Ok(id)
    }

    fn feed(
        &self,
        following: &BTreeSet<u64>,
        page: usize,
        limit: usize,
    ) -> sled::Result<Vec<(u64, Activity)>> {
        let activities = self.open_tree(ACTIVITIES)?;
        let oldest_visible = cutoff(Utc::now());
        let page = page.max(1);
        let mut found = Vec::new();
        let mut skip = (page - 1) * limit;
        for entry in activities.iter().rev() {
            let (key, raw) = entry?;
            let activity: Activity = bincode::deserialize(&raw).unwrap();
            if activity.created_at < oldest_visible {
                break;
            }
            if !activity.is_public || !following.contains(&activity.user) {
                continue;
            }
            if skip > 0 {
                skip -= 1;
                continue;
            }
            let id = u64::from_be_bytes(key[8..16].try_into().unwrap());
            found.push((id, activity));
            if found.len() >= limit {
                break;
            }
        }
        Ok(found)
    }

    fn user_activities(&self, user_id: u64, limit: usize) -> sled::Result<Vec<(u64, Activity)>> {
        let activities = self.open_tree(ACTIVITIES)?;
        let oldest_visible = cutoff(Utc::now());
        let mut found = Vec::new();
        for entry in activities.iter().rev() {
            let (key, raw) = entry?;
            let activity: Activity = bincode::deserialize(&raw).unwrap();
            if activity.created_at < oldest_visible {
                break;
            }
            if !activity.is_public || activity.user != user_id {
                continue;
            }
            let id = u64::from_be_bytes(key[8..16].try_into().unwrap());
            found.push((id, activity));
            if found.len() >= limit {
                break;
            }
        }
        Ok(found)
    }

    fn prune_expired(&self) -> sled::Result<usize> {
        let activities = self.open_tree(ACTIVITIES)?;
        let boundary = (cutoff(Utc::now()).timestamp_millis() as u64)
            .to_be_bytes()
            .to_vec();
        let mut expired = Vec::new();
        for entry in activities.range(..boundary) {
            let (key, _) = entry?;
            expired.push(key);
        }
        for key in &expired {
            activities.remove(key)?;
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActivityKind, ActivityTarget};

    fn test_db() -> sled::Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    fn activity(user: u64) -> Activity {
        Activity::new(user, ActivityKind::ReviewCreated, ActivityTarget::Review(1))
    }

    fn aged(user: u64, days_ago: i64) -> Activity {
        let mut a = activity(user);
        a.created_at = Utc::now() - Duration::days(days_ago);
        a
    }

    #[test]
    fn feed_is_newest_first_and_follows_only() {
        let db = test_db();
        db.record_activity(&aged(1, 3)).unwrap();
        db.record_activity(&aged(2, 2)).unwrap();
        db.record_activity(&aged(1, 1)).unwrap();
        db.record_activity(&aged(9, 0)).unwrap();

        let following: BTreeSet<u64> = [1, 2].into_iter().collect();
        let feed = db.feed(&following, 1, 10).unwrap();
        let authors: Vec<u64> = feed.iter().map(|(_, a)| a.user).collect();
        assert_eq!(authors, vec![1, 2, 1]);
        let times: Vec<_> = feed.iter().map(|(_, a)| a.created_at).collect();
        assert!(times.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn feed_skips_private_activities() {
        let db = test_db();
        let mut hidden = activity(1);
        hidden.is_public = false;
        db.record_activity(&hidden).unwrap();
        db.record_activity(&activity(1)).unwrap();

        let following: BTreeSet<u64> = [1].into_iter().collect();
        assert_eq!(db.feed(&following, 1, 10).unwrap().len(), 1);
    }

    #[test]
    fn feed_paginates() {
        let db = test_db();
        for day in 0..5 {
            db.record_activity(&aged(1, day)).unwrap();
        }
        let following: BTreeSet<u64> = [1].into_iter().collect();
        assert_eq!(db.feed(&following, 1, 2).unwrap().len(), 2);
        assert_eq!(db.feed(&following, 3, 2).unwrap().len(), 1);
        assert_eq!(db.feed(&following, 4, 2).unwrap().len(), 0);
    }

    #[test]
    fn expired_records_disappear() {
        let db = test_db();
        // Insert directly so the record is still on disk when we read.
        let tree = db.open_tree(ACTIVITIES).unwrap();
        let old = aged(1, RETENTION_DAYS + 1);
        tree.insert(
            activity_key(old.created_at, 1),
            bincode::serialize(&old).unwrap(),
        )
        .unwrap();

        let following: BTreeSet<u64> = [1].into_iter().collect();
        // Never served, even before any prune has run.
        assert!(db.feed(&following, 1, 10).unwrap().is_empty());
        assert!(db.user_activities(1, 10).unwrap().is_empty());

        assert_eq!(db.prune_expired().unwrap(), 1);
        assert_eq!(db.prune_expired().unwrap(), 0);
    }

    #[test]
    fn prune_removes_only_the_expired_prefix() {
        let db = test_db();
        let tree = db.open_tree(ACTIVITIES).unwrap();
        for (id, days) in [(1u64, RETENTION_DAYS + 5), (2, RETENTION_DAYS - 5)] {
            let a = aged(1, days);
            tree.insert(activity_key(a.created_at, id), bincode::serialize(&a).unwrap())
                .unwrap();
        }
        assert_eq!(db.prune_expired().unwrap(), 1);
        let following: BTreeSet<u64> = [1].into_iter().collect();
        assert_eq!(db.feed(&following, 1, 10).unwrap().len(), 1);
    }
}
