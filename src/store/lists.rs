use chrono::Utc;
use sled::transaction::TransactionError;

use super::{composite_key, deserialize_id, prefix_key, serialize_id};
use crate::model::{ListMovie, MovieList};

const LISTS: &[u8] = b"lists";
// creator(BE) ‖ list id(BE) → list id.
const LISTS_CREATOR: &[u8] = b"lists_creator";

/// Outcome of an entry edit on an existing list.
#[derive(Debug)]
pub enum ListEdit {
    Updated(MovieList),
    DuplicateMovie,
}

pub trait ListStore {
    fn add_list(&self, list: &MovieList) -> sled::Result<u64>;
    fn get_list(&self, id: u64) -> sled::Result<Option<MovieList>>;
    fn put_list(&self, id: u64, list: &MovieList) -> sled::Result<()>;
    fn delete_list(&self, id: u64) -> sled::Result<bool>;
    /// A creator's lists, newest first. Private lists only when asked for
    /// (callers gate that on the viewer being the creator).
    fn user_lists(&self, creator: u64, include_private: bool)
        -> sled::Result<Vec<(u64, MovieList)>>;
    /// Public lists, newest first.
    fn public_lists(&self) -> sled::Result<Vec<(u64, MovieList)>>;
    /// Public lists ranked by like count, ties broken newest first.
    fn popular_lists(&self, limit: usize) -> sled::Result<Vec<(u64, MovieList)>>;
    /// Appends a movie entry. The rank defaults to the append position.
    /// `Ok(None)` when the list is missing.
    fn add_list_movie(&self, id: u64, entry: ListMovie) -> sled::Result<Option<ListEdit>>;
    fn remove_list_movie(&self, id: u64, movie_id: u64) -> sled::Result<Option<MovieList>>;
    fn toggle_list_like(&self, id: u64, user_id: u64) -> sled::Result<Option<(bool, usize)>>;
    fn toggle_list_follow(&self, id: u64, user_id: u64) -> sled::Result<Option<(bool, usize)>>;
}

impl ListStore for sled::Db {
    fn add_list(&self, list: &MovieList) -> sled::Result<u64> {
        use sled::transaction::Transactional;
        let lists = self.open_tree(LISTS)?;
        let by_creator = self.open_tree(LISTS_CREATOR)?;
        let id = self.generate_id()?;
        let result: Result<(), TransactionError<()>> =
            (&lists, &by_creator).transaction(|(lists, by_creator)| {
                lists.insert(&serialize_id(id), bincode::serialize(list).unwrap())?;
                by_creator.insert(composite_key(list.creator, id), &serialize_id(id))?;
                Ok(())
            });
        match result {
            Ok(()) => Ok(id),
            Err(TransactionError::Storage(e)) => Err(e),
            Err(TransactionError::Abort(())) => unreachable!(),
        }
    }

    fn get_list(&self, id: u64) -> sled::Result<Option<MovieList>> {
        let lists = self.open_tree(LISTS)?;
        Ok(lists
            .get(serialize_id(id))?
            .map(|raw| bincode::deserialize(&raw).unwrap()))
    }

    fn put_list(&self, id: u64, list: &MovieList) -> sled::Result<()> {
        let lists = self.open_tree(LISTS)?;
        lists.insert(&serialize_id(id), bincode::serialize(list).unwrap())?;
        Ok(())
    }

    fn delete_list(&self, id: u64) -> sled::Result<bool> {
        use sled::transaction::Transactional;
        let lists = self.open_tree(LISTS)?;
        let by_creator = self.open_tree(LISTS_CREATOR)?;
        let result = (&lists, &by_creator).transaction(|(lists, by_creator)| {
            let raw = match lists.remove(&serialize_id(id))? {
                Some(raw) => raw,
                None => return sled::transaction::abort(()),
            };
            let list: MovieList = bincode::deserialize(&raw).unwrap();
            by_creator.remove(composite_key(list.creator, id))?;
            Ok(())
        });
        match result {
            Ok(()) => Ok(true),
            Err(TransactionError::Abort(())) => Ok(false),
            Err(TransactionError::Storage(e)) => Err(e),
        }
    }

    fn user_lists(
        &self,
        creator: u64,
        include_private: bool,
    ) -> sled::Result<Vec<(u64, MovieList)>> {
        let by_creator = self.open_tree(LISTS_CREATOR)?;
        let mut found = Vec::new();
        for entry in by_creator.scan_prefix(prefix_key(creator)) {
            let (_, raw_id) = entry?;
            let id = deserialize_id(raw_id);
            if let Some(list) = self.get_list(id)? {
                if list.is_public || include_private {
                    found.push((id, list));
                }
            }
        }
        found.sort_by(|(_, a), (_, b)| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    fn public_lists(&self) -> sled::Result<Vec<(u64, MovieList)>> {
        let lists = self.open_tree(LISTS)?;
        let mut found = Vec::new();
        for entry in lists.iter() {
            let (key, raw) = entry?;
            let list: MovieList = bincode::deserialize(&raw).unwrap();
            if list.is_public {
                found.push((deserialize_id(key), list));
            }
        }
        found.sort_by(|(_, a), (_, b)| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    fn popular_lists(&self, limit: usize) -> sled::Result<Vec<(u64, MovieList)>> {
        let mut found = self.public_lists()?;
        found.sort_by(|(_, a), (_, b)| {
            b.likes
                .len()
                .cmp(&a.likes.len())
                .then(b.created_at.cmp(&a.created_at))
        });
        found.truncate(limit);
        Ok(found)
    }

    fn add_list_movie(&self, id: u64, entry: ListMovie) -> sled::Result<Option<ListEdit>> {
        let lists = self.open_tree(LISTS)?;
        let result = lists.transaction(|tx| {
            let raw = match tx.get(&serialize_id(id))? {
                Some(raw) => raw,
                None => return sled::transaction::abort(()),
            };
            let mut list: MovieList = bincode::deserialize(&raw).unwrap();
            if list.movies.iter().any(|m| m.movie_id == entry.movie_id) {
                return Ok(None);
            }
            let mut entry = entry.clone();
            if entry.rank.is_none() {
                entry.rank = Some(list.movies.len() as u32 + 1);
            }
            list.movies.push(entry);
            list.updated_at = Utc::now();
            tx.insert(&serialize_id(id), bincode::serialize(&list).unwrap())?;
            Ok(Some(list))
        });
        match result {
            Ok(Some(list)) => Ok(Some(ListEdit::Updated(list))),
            Ok(None) => Ok(Some(ListEdit::DuplicateMovie)),
            Err(TransactionError::Abort(())) => Ok(None),
            Err(TransactionError::Storage(e)) => Err(e),
        }
    }

    fn remove_list_movie(&self, id: u64, movie_id: u64) -> sled::Result<Option<MovieList>> {
        let lists = self.open_tree(LISTS)?;
        let result = lists.transaction(|tx| {
            let raw = match tx.get(&serialize_id(id))? {
                Some(raw) => raw,
                None => return sled::transaction::abort(()),
            };
            let mut list: MovieList = bincode::deserialize(&raw).unwrap();
            list.movies.retain(|m| m.movie_id != movie_id);
            list.updated_at = Utc::now();
            tx.insert(&serialize_id(id), bincode::serialize(&list).unwrap())?;
            Ok(list)
        });
        match result {
            Ok(list) => Ok(Some(list)),
            Err(TransactionError::Abort(())) => Ok(None),
            Err(TransactionError::Storage(e)) => Err(e),
        }
    }

    fn toggle_list_like(&self, id: u64, user_id: u64) -> sled::Result<Option<(bool, usize)>> {
        toggle_engagement(self, id, user_id, |list| &mut list.likes)
    }

    fn toggle_list_follow(&self, id: u64, user_id: u64) -> sled::Result<Option<(bool, usize)>> {
        toggle_engagement(self, id, user_id, |list| &mut list.followers)
    }
}

fn toggle_engagement(
    db: &sled::Db,
    id: u64,
    user_id: u64,
    select: impl Fn(&mut MovieList) -> &mut std::collections::BTreeSet<u64>,
) -> sled::Result<Option<(bool, usize)>> {
    let lists = db.open_tree(LISTS)?;
    let result = lists.transaction(|tx| {
        let raw = match tx.get(&serialize_id(id))? {
            Some(raw) => raw,
            None => return sled::transaction::abort(()),
        };
        let mut list: MovieList = bincode::deserialize(&raw).unwrap();
        let set = select(&mut list);
        let now_member = if set.contains(&user_id) {
            set.remove(&user_id);
            false
        } else {
            set.insert(user_id);
            true
        };
        let count = select(&mut list).len();
        tx.insert(&serialize_id(id), bincode::serialize(&list).unwrap())?;
        Ok((now_member, count))
    });
    match result {
        Ok(state) => Ok(Some(state)),
        Err(TransactionError::Abort(())) => Ok(None),
        Err(TransactionError::Storage(e)) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ListCategory;
    use chrono::Duration;
    use std::collections::BTreeSet;

    fn test_db() -> sled::Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    fn list(creator: u64, title: &str) -> MovieList {
        let now = Utc::now();
        MovieList {
            creator,
            title: title.to_owned(),
            description: String::new(),
            movies: Vec::new(),
            category: ListCategory::Custom,
            is_public: true,
            likes: BTreeSet::new(),
            followers: BTreeSet::new(),
            tags: Vec::new(),
            cover_image: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn entry(movie_id: u64) -> ListMovie {
        ListMovie {
            movie_id,
            movie_title: "Heat".to_owned(),
            movie_poster: String::new(),
            movie_year: Some(1995),
            note: String::new(),
            rank: None,
            added_at: Utc::now(),
        }
    }

    #[test]
    fn duplicate_movie_is_rejected() {
        let db = test_db();
        let id = db.add_list(&list(1, "noir")).unwrap();
        assert!(matches!(
            db.add_list_movie(id, entry(949)).unwrap(),
            Some(ListEdit::Updated(_))
        ));
        assert!(matches!(
            db.add_list_movie(id, entry(949)).unwrap(),
            Some(ListEdit::DuplicateMovie)
        ));
        assert!(db.add_list_movie(9999, entry(949)).unwrap().is_none());
    }

    #[test]
    fn rank_defaults_to_append_position() {
        let db = test_db();
        let id = db.add_list(&list(1, "noir")).unwrap();
        db.add_list_movie(id, entry(949)).unwrap();
        db.add_list_movie(id, entry(680)).unwrap();
        let mut ranked = entry(550);
        ranked.rank = Some(1);
        db.add_list_movie(id, ranked).unwrap();

        let stored = db.get_list(id).unwrap().unwrap();
        let ranks: Vec<Option<u32>> = stored.movies.iter().map(|m| m.rank).collect();
        assert_eq!(ranks, vec![Some(1), Some(2), Some(1)]);
    }

    #[test]
    fn remove_movie_filters_by_id() {
        let db = test_db();
        let id = db.add_list(&list(1, "noir")).unwrap();
        db.add_list_movie(id, entry(949)).unwrap();
        db.add_list_movie(id, entry(680)).unwrap();
        let updated = db.remove_list_movie(id, 949).unwrap().unwrap();
        assert_eq!(updated.movies.len(), 1);
        assert_eq!(updated.movies[0].movie_id, 680);
    }

    #[test]
    fn user_lists_hide_private_by_default() {
        let db = test_db();
        let mut secret = list(1, "guilty pleasures");
        secret.is_public = false;
        db.add_list(&secret).unwrap();
        db.add_list(&list(1, "noir")).unwrap();
        db.add_list(&list(2, "other user")).unwrap();

        assert_eq!(db.user_lists(1, false).unwrap().len(), 1);
        assert_eq!(db.user_lists(1, true).unwrap().len(), 2);
    }

    #[test]
    fn popular_lists_rank_by_likes_then_recency() {
        let db = test_db();
        let base = Utc::now();
        let with_likes = |title: &str, likes: &[u64], age_days: i64| {
            let mut l = list(1, title);
            l.likes = likes.iter().copied().collect();
            l.created_at = base - Duration::days(age_days);
            db.add_list(&l).unwrap()
        };
        let top = with_likes("five", &[1, 2, 3, 4, 5], 10);
        let _older_three = with_likes("three old", &[1, 2, 3], 9);
        let newer_three = with_likes("three new", &[4, 5, 6], 2);
        let _one = with_likes("one", &[9], 1);

        let popular: Vec<u64> = db
            .popular_lists(2)
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(popular, vec![top, newer_three]);
    }

    #[test]
    fn private_lists_never_rank_as_popular() {
        let db = test_db();
        let mut secret = list(1, "secret");
        secret.is_public = false;
        secret.likes = [1, 2, 3, 4, 5].into_iter().collect();
        db.add_list(&secret).unwrap();
        let public = db.add_list(&list(1, "public")).unwrap();

        let popular: Vec<u64> = db
            .popular_lists(10)
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(popular, vec![public]);
    }

    #[test]
    fn engagement_toggles() {
        let db = test_db();
        let id = db.add_list(&list(1, "noir")).unwrap();
        assert_eq!(db.toggle_list_like(id, 7).unwrap(), Some((true, 1)));
        assert_eq!(db.toggle_list_like(id, 7).unwrap(), Some((false, 0)));
        assert_eq!(db.toggle_list_follow(id, 7).unwrap(), Some((true, 1)));
        assert_eq!(db.toggle_list_follow(9999, 7).unwrap(), None);
    }

    #[test]
    fn delete_list_cleans_the_creator_index() {
        let db = test_db();
        let id = db.add_list(&list(1, "noir")).unwrap();
        assert!(db.delete_list(id).unwrap());
        assert!(!db.delete_list(id).unwrap());
        assert!(db.user_lists(1, true).unwrap().is_empty());
    }
}
