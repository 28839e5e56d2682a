use serde::Serialize;
use sled::transaction::TransactionError;

use super::{composite_key, deserialize_id, prefix_key, serialize_id};
use crate::model::{Comment, Review};

const REVIEWS: &[u8] = b"reviews";
// author(BE) ‖ movie(BE) → review id. Doubles as the one-review-per-movie
// uniqueness constraint and the per-author listing index.
const REVIEWS_AUTHOR_MOVIE: &[u8] = b"reviews_author_movie";
// movie(BE) ‖ review id(BE) → review id.
const REVIEWS_MOVIE: &[u8] = b"reviews_movie";

/// Aggregate rating statistics for one movie, over published reviews.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MovieStats {
    pub average_rating: f64,
    pub total_reviews: u64,
    pub critic_average: Option<f64>,
}

impl MovieStats {
    fn empty() -> MovieStats {
        MovieStats {
            average_rating: 0.0,
            total_reviews: 0,
            critic_average: None,
        }
    }
}

pub trait ReviewStore {
    /// Inserts a review, enforcing at most one review per (author, movie)
    /// pair. Returns `Ok(None)` when the pair already exists.
    fn add_review(&self, review: &Review) -> sled::Result<Option<u64>>;
    fn get_review(&self, id: u64) -> sled::Result<Option<Review>>;
    fn put_review(&self, id: u64, review: &Review) -> sled::Result<()>;
    fn delete_review(&self, id: u64) -> sled::Result<bool>;
    fn review_for(&self, author: u64, movie_id: u64) -> sled::Result<Option<(u64, Review)>>;
    /// Toggles a user's membership in the like set. Returns the new membership
    /// state and like count, or `Ok(None)` when the review is missing.
    fn toggle_review_like(&self, id: u64, user_id: u64) -> sled::Result<Option<(bool, usize)>>;
    fn add_comment(&self, id: u64, comment: Comment) -> sled::Result<Option<Review>>;
    /// Removes a comment. `Ok(None)` when the review is missing; the inner
    /// bool reports whether the comment existed.
    fn remove_comment(&self, id: u64, comment_id: u64) -> sled::Result<Option<bool>>;
    /// Published reviews for a movie, featured first, then newest first.
    fn movie_reviews(&self, movie_id: u64) -> sled::Result<Vec<(u64, Review)>>;
    /// Published reviews by an author, newest first.
    fn user_reviews(&self, author: u64) -> sled::Result<Vec<(u64, Review)>>;
    /// All published reviews, newest first.
    fn recent_reviews(&self, featured_only: bool) -> sled::Result<Vec<(u64, Review)>>;
    fn movie_stats(&self, movie_id: u64) -> sled::Result<MovieStats>;
}

impl ReviewStore for sled::Db {
    fn add_review(&self, review: &Review) -> sled::Result<Option<u64>> {
        use sled::transaction::Transactional;
        let reviews = self.open_tree(REVIEWS)?;
        let by_author_movie = self.open_tree(REVIEWS_AUTHOR_MOVIE)?;
        let by_movie = self.open_tree(REVIEWS_MOVIE)?;
        let id = self.generate_id()?;
        if let Err(err) = (&reviews, &by_author_movie, &by_movie).transaction(
            |(reviews, by_author_movie, by_movie)| {
                let pair_key = composite_key(review.author, review.movie_id);
                if by_author_movie.insert(pair_key, &serialize_id(id))?.is_some() {
                    sled::transaction::abort(())?;
                }
                by_movie.insert(composite_key(review.movie_id, id), &serialize_id(id))?;
                reviews.insert(&serialize_id(id), bincode::serialize(review).unwrap())?;
                Ok(())
            },
        ) {
            match err {
                TransactionError::Storage(e) => return Err(e),
                TransactionError::Abort(()) => return Ok(None),
            }
        }
        Ok(Some(id))
    }

    fn get_review(&self, id: u64) -> sled::Result<Option<Review>> {
        let reviews = self.open_tree(REVIEWS)?;
        Ok(reviews
            .get(serialize_id(id))?
            .map(|raw| bincode::deserialize(&raw).unwrap()))
    }

    fn put_review(&self, id: u64, review: &Review) -> sled::Result<()> {
        let reviews = self.open_tree(REVIEWS)?;
        reviews.insert(&serialize_id(id), bincode::serialize(review).unwrap())?;
        Ok(())
    }

    fn delete_review(&self, id: u64) -> sled::Result<bool> {
        use sled::transaction::Transactional;
        let reviews = self.open_tree(REVIEWS)?;
        let by_author_movie = self.open_tree(REVIEWS_AUTHOR_MOVIE)?;
        let by_movie = self.open_tree(REVIEWS_MOVIE)?;
        let result = (&reviews, &by_author_movie, &by_movie).transaction(
            |(reviews, by_author_movie, by_movie)| {
                let raw = match reviews.remove(&serialize_id(id))? {
                    Some(raw) => raw,
                    None => return sled::transaction::abort(()),
                };
                let review: Review = bincode::deserialize(&raw).unwrap();
                by_author_movie.remove(composite_key(review.author, review.movie_id))?;
                by_movie.remove(composite_key(review.movie_id, id))?;
                Ok(())
            },
        );
        match result {
            Ok(()) => Ok(true),
            Err(TransactionError::Abort(())) => Ok(false),
            Err(TransactionError::Storage(e)) => Err(e),
        }
    }

    fn review_for(&self, author: u64, movie_id: u64) -> sled::Result<Option<(u64, Review)>> {
        let by_author_movie = self.open_tree(REVIEWS_AUTHOR_MOVIE)?;
        if let Some(raw_id) = by_author_movie.get(composite_key(author, movie_id))? {
            let id = deserialize_id(raw_id);
            Ok(self.get_review(id)?.map(|review| (id, review)))
        } else {
            Ok(None)
        }
    }

    fn toggle_review_like(&self, id: u64, user_id: u64) -> sled::Result<Option<(bool, usize)>> {
        let reviews = self.open_tree(REVIEWS)?;
        let result = reviews.transaction(|tx| {
            let raw = match tx.get(&serialize_id(id))? {
                Some(raw) => raw,
                None => return sled::transaction::abort(()),
            };
            let mut review: Review = bincode::deserialize(&raw).unwrap();
            let is_liked = if review.likes.contains(&user_id) {
                review.likes.remove(&user_id);
                false
            } else {
                review.likes.insert(user_id);
                true
            };
            let count = review.likes.len();
            tx.insert(&serialize_id(id), bincode::serialize(&review).unwrap())?;
            Ok((is_liked, count))
        });
        match result {
            Ok(state) => Ok(Some(state)),
            Err(TransactionError::Abort(())) => Ok(None),
            Err(TransactionError::Storage(e)) => Err(e),
        }
    }

    fn add_comment(&self, id: u64, comment: Comment) -> sled::Result<Option<Review>> {
        let reviews = self.open_tree(REVIEWS)?;
        let result = reviews.transaction(|tx| {
            let raw = match tx.get(&serialize_id(id))? {
                Some(raw) => raw,
                None => return sled::transaction::abort(()),
            };
            let mut review: Review = bincode::deserialize(&raw).unwrap();
            review.comments.push(comment.clone());
            tx.insert(&serialize_id(id), bincode::serialize(&review).unwrap())?;
            Ok(review)
        });
        match result {
            Ok(review) => Ok(Some(review)),
            Err(TransactionError::Abort(())) => Ok(None),
            Err(TransactionError::Storage(e)) => Err(e),
        }
    }

    fn remove_comment(&self, id: u64, comment_id: u64) -> sled::Result<Option<bool>> {
        let reviews = self.open_tree(REVIEWS)?;
        let result = reviews.transaction(|tx| {
            let raw = match tx.get(&serialize_id(id))? {
                Some(raw) => raw,
                None => return sled::transaction::abort(()),
            };
            let mut review: Review = bincode::deserialize(&raw).unwrap();
            let before = review.comments.len();
            review.comments.retain(|c| c.id != comment_id);
            let removed = review.comments.len() < before;
            if removed {
                tx.insert(&serialize_id(id), bincode::serialize(&review).unwrap())?;
            }
            Ok(removed)
        });
        match result {
            Ok(removed) => Ok(Some(removed)),
            Err(TransactionError::Abort(())) => Ok(None),
            Err(TransactionError::Storage(e)) => Err(e),
        }
    }

    fn movie_reviews(&self, movie_id: u64) -> sled::Result<Vec<(u64, Review)>> {
        let by_movie = self.open_tree(REVIEWS_MOVIE)?;
        let mut found = Vec::new();
        for entry in by_movie.scan_prefix(prefix_key(movie_id)) {
            let (_, raw_id) = entry?;
            let id = deserialize_id(raw_id);
            if let Some(review) = self.get_review(id)? {
                if review.is_published {
                    found.push((id, review));
                }
            }
        }
        found.sort_by(|(_, a), (_, b)| {
            b.is_featured
                .cmp(&a.is_featured)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(found)
    }

    fn user_reviews(&self, author: u64) -> sled::Result<Vec<(u64, Review)>> {
        let by_author_movie = self.open_tree(REVIEWS_AUTHOR_MOVIE)?;
        let mut found = Vec::new();
        for entry in by_author_movie.scan_prefix(prefix_key(author)) {
            let (_, raw_id) = entry?;
            let id = deserialize_id(raw_id);
            if let Some(review) = self.get_review(id)? {
                if review.is_published {
                    found.push((id, review));
                }
            }
        }
        found.sort_by(|(_, a), (_, b)| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    fn recent_reviews(&self, featured_only: bool) -> sled::Result<Vec<(u64, Review)>> {
        let reviews = self.open_tree(REVIEWS)?;
        let mut found = Vec::new();
        for entry in reviews.iter() {
            let (key, raw) = entry?;
            let review: Review = bincode::deserialize(&raw).unwrap();
            if review.is_published && (!featured_only || review.is_featured) {
                found.push((deserialize_id(key), review));
            }
        }
        found.sort_by(|(_, a), (_, b)| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    fn movie_stats(&self, movie_id: u64) -> sled::Result<MovieStats> {
        let reviews = self.movie_reviews(movie_id)?;
        if reviews.is_empty() {
            return Ok(MovieStats::empty());
        }
        let total = reviews.len() as u64;
        let sum: u64 = reviews.iter().map(|(_, r)| r.rating as u64).sum();
        let critic: Vec<u64> = reviews
            .iter()
            .filter(|(_, r)| r.is_critic_review)
            .map(|(_, r)| r.rating as u64)
            .collect();
        let critic_average = if critic.is_empty() {
            None
        } else {
            Some(critic.iter().sum::<u64>() as f64 / critic.len() as f64)
        };
        Ok(MovieStats {
            average_rating: sum as f64 / total as f64,
            total_reviews: total,
            critic_average,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::critic_score_for;
    use chrono::{Duration, Utc};
    use std::collections::BTreeSet;

    fn test_db() -> sled::Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    fn review(author: u64, movie_id: u64, rating: u8) -> Review {
        let now = Utc::now();
        Review {
            author,
            movie_id,
            movie_title: "Pulp Fiction".to_owned(),
            movie_poster: String::new(),
            movie_year: Some(1994),
            title: "A classic".to_owned(),
            content: "x".repeat(60),
            rating,
            contains_spoilers: false,
            likes: BTreeSet::new(),
            comments: Vec::new(),
            tags: Vec::new(),
            is_published: true,
            is_featured: false,
            is_critic_review: false,
            critic_score: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn one_review_per_author_and_movie() {
        let db = test_db();
        assert!(db.add_review(&review(1, 550, 8)).unwrap().is_some());
        assert_eq!(db.add_review(&review(1, 550, 9)).unwrap(), None);
        // Same author, different movie; same movie, different author.
        assert!(db.add_review(&review(1, 680, 9)).unwrap().is_some());
        assert!(db.add_review(&review(2, 550, 6)).unwrap().is_some());
    }

    #[test]
    fn deleting_frees_the_pair_for_a_new_review() {
        let db = test_db();
        let id = db.add_review(&review(1, 550, 8)).unwrap().unwrap();
        assert!(db.delete_review(id).unwrap());
        assert!(!db.delete_review(id).unwrap());
        assert!(db.add_review(&review(1, 550, 7)).unwrap().is_some());
    }

    #[test]
    fn stats_on_zero_reviews_are_zeroed() {
        let db = test_db();
        let stats = db.movie_stats(550).unwrap();
        assert_eq!(stats.total_reviews, 0);
        assert_eq!(stats.average_rating, 0.0);
        assert_eq!(stats.critic_average, None);
    }

    #[test]
    fn stats_average_and_critic_average() {
        let db = test_db();
        db.add_review(&review(1, 550, 4)).unwrap().unwrap();
        db.add_review(&review(2, 550, 8)).unwrap().unwrap();
        let mut critic = review(3, 550, 9);
        critic.is_critic_review = true;
        critic.critic_score = Some(critic_score_for(9));
        db.add_review(&critic).unwrap().unwrap();

        let stats = db.movie_stats(550).unwrap();
        assert_eq!(stats.total_reviews, 3);
        assert_eq!(stats.average_rating, 7.0);
        assert_eq!(stats.critic_average, Some(9.0));

        // No critics on this movie.
        db.add_review(&review(1, 680, 6)).unwrap().unwrap();
        let stats = db.movie_stats(680).unwrap();
        assert_eq!(stats.critic_average, None);
    }

    #[test]
    fn unpublished_reviews_do_not_count() {
        let db = test_db();
        let mut draft = review(1, 550, 2);
        draft.is_published = false;
        db.add_review(&draft).unwrap().unwrap();
        db.add_review(&review(2, 550, 8)).unwrap().unwrap();

        let stats = db.movie_stats(550).unwrap();
        assert_eq!(stats.total_reviews, 1);
        assert_eq!(stats.average_rating, 8.0);
        assert_eq!(db.movie_reviews(550).unwrap().len(), 1);
    }

    #[test]
    fn like_toggle_tracks_set_cardinality() {
        let db = test_db();
        let id = db.add_review(&review(1, 550, 8)).unwrap().unwrap();
        assert_eq!(db.toggle_review_like(id, 7).unwrap(), Some((true, 1)));
        assert_eq!(db.toggle_review_like(id, 8).unwrap(), Some((true, 2)));
        assert_eq!(db.toggle_review_like(id, 7).unwrap(), Some((false, 1)));
        let stored = db.get_review(id).unwrap().unwrap();
        assert_eq!(stored.likes.len(), 1);
        assert_eq!(db.toggle_review_like(9999, 7).unwrap(), None);
    }

    #[test]
    fn comments_append_and_remove() {
        let db = test_db();
        let id = db.add_review(&review(1, 550, 8)).unwrap().unwrap();
        let comment = Comment {
            id: 41,
            author: 2,
            content: "agreed".to_owned(),
            created_at: Utc::now(),
        };
        let updated = db.add_comment(id, comment).unwrap().unwrap();
        assert_eq!(updated.comments.len(), 1);
        assert_eq!(db.remove_comment(id, 41).unwrap(), Some(true));
        assert_eq!(db.remove_comment(id, 41).unwrap(), Some(false));
        assert_eq!(db.remove_comment(9999, 41).unwrap(), None);
    }

    #[test]
    fn movie_reviews_order_featured_first_then_newest() {
        let db = test_db();
        let base = Utc::now();
        let mut old = review(1, 550, 8);
        old.created_at = base - Duration::days(3);
        let mut newer = review(2, 550, 7);
        newer.created_at = base - Duration::days(1);
        let mut featured_old = review(3, 550, 9);
        featured_old.is_featured = true;
        featured_old.created_at = base - Duration::days(5);

        let old_id = db.add_review(&old).unwrap().unwrap();
        let newer_id = db.add_review(&newer).unwrap().unwrap();
        let featured_id = db.add_review(&featured_old).unwrap().unwrap();

        let ordered: Vec<u64> = db
            .movie_reviews(550)
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ordered, vec![featured_id, newer_id, old_id]);
    }
}
