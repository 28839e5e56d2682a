use chrono::Utc;
use sled::transaction::TransactionError;

use super::{deserialize_id, serialize_id};
use crate::model::{MovieRef, User};

const USERS: &[u8] = b"users";
const USERS_USERNAME: &[u8] = b"users_username";
const USERS_EMAIL: &[u8] = b"users_email";

pub trait UserStore {
    /// Inserts a user, enforcing username and email uniqueness. Returns
    /// `Ok(None)` when either is already taken.
    fn add_user(&self, user: &User) -> sled::Result<Option<u64>>;
    fn get_user(&self, id: u64) -> sled::Result<Option<User>>;
    fn get_user_by_username(&self, username: &str) -> sled::Result<Option<(u64, User)>>;
    fn get_user_by_email(&self, email: &str) -> sled::Result<Option<(u64, User)>>;
    /// Overwrites a user record. Username and email are immutable, so the
    /// lookup indexes never need rewriting here.
    fn put_user(&self, id: u64, user: &User) -> sled::Result<()>;
    fn all_users(&self) -> sled::Result<Vec<(u64, User)>>;
    /// Toggles the follow edge between two users. Both records are updated in
    /// one transaction, so the graph can never end up asymmetric. Returns
    /// `Ok(None)` when the target is missing or deactivated, otherwise the new
    /// following state.
    fn toggle_follow(&self, actor_id: u64, target_id: u64) -> sled::Result<Option<bool>>;
    /// Idempotent add-or-remove keyed by movie id. Returns `Ok(None)` when the
    /// user is missing, otherwise whether the movie is now present.
    fn toggle_watchlist(&self, user_id: u64, movie_id: u64) -> sled::Result<Option<bool>>;
    fn toggle_favorite(&self, user_id: u64, movie_id: u64) -> sled::Result<Option<bool>>;
}

fn toggle_movie_ref(entries: &mut Vec<MovieRef>, movie_id: u64) -> bool {
    if let Some(pos) = entries.iter().position(|m| m.movie_id == movie_id) {
        entries.remove(pos);
        false
    } else {
        entries.push(MovieRef {
            movie_id,
            added_at: Utc::now(),
        });
        true
    }
}

impl UserStore for sled::Db {
    fn add_user(&self, user: &User) -> sled::Result<Option<u64>> {
        use sled::transaction::Transactional;
        let users = self.open_tree(USERS)?;
        let by_username = self.open_tree(USERS_USERNAME)?;
        let by_email = self.open_tree(USERS_EMAIL)?;
        let id = self.generate_id()?;
        if let Err(err) = (&users, &by_username, &by_email).transaction(
            |(users, by_username, by_email)| {
                if by_username
                    .insert(user.username.as_bytes(), &serialize_id(id))?
                    .is_some()
                {
                    sled::transaction::abort(())?;
                }
                if by_email
                    .insert(user.email.as_bytes(), &serialize_id(id))?
                    .is_some()
                {
                    sled::transaction::abort(())?;
                }
                users.insert(&serialize_id(id), bincode::serialize(user).unwrap())?;
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

    fn get_user(&self, id: u64) -> sled::Result<Option<User>> {
        let users = self.open_tree(USERS)?;
        Ok(users
            .get(serialize_id(id))?
            .map(|raw| bincode::deserialize(&raw).unwrap()))
    }

    fn get_user_by_username(&self, username: &str) -> sled::Result<Option<(u64, User)>> {
        let by_username = self.open_tree(USERS_USERNAME)?;
        let users = self.open_tree(USERS)?;
        if let Some(id) = by_username.get(username)? {
            let user = bincode::deserialize(&users.get(&id)?.expect("bad index users_username"))
                .unwrap();
            Ok(Some((deserialize_id(id), user)))
        } else {
            Ok(None)
        }
    }

    fn get_user_by_email(&self, email: &str) -> sled::Result<Option<(u64, User)>> {
        let by_email = self.open_tree(USERS_EMAIL)?;
        let users = self.open_tree(USERS)?;
        if let Some(id) = by_email.get(email)? {
            let user =
                bincode::deserialize(&users.get(&id)?.expect("bad index users_email")).unwrap();
            Ok(Some((deserialize_id(id), user)))
        } else {
            Ok(None)
        }
    }

    fn put_user(&self, id: u64, user: &User) -> sled::Result<()> {
        let users = self.open_tree(USERS)?;
        users.insert(&serialize_id(id), bincode::serialize(user).unwrap())?;
        Ok(())
    }

    fn all_users(&self) -> sled::Result<Vec<(u64, User)>> {
        let users = self.open_tree(USERS)?;
        users
            .iter()
            .map(|entry| {
                let (key, raw) = entry?;
                Ok((deserialize_id(key), bincode::deserialize(&raw).unwrap()))
            })
            .collect()
    }

    fn toggle_follow(&self, actor_id: u64, target_id: u64) -> sled::Result<Option<bool>> {
        let users = self.open_tree(USERS)?;
        let result = users.transaction(|tx| {
            let actor_raw = match tx.get(&serialize_id(actor_id))? {
                Some(raw) => raw,
                None => return sled::transaction::abort(()),
            };
            let target_raw = match tx.get(&serialize_id(target_id))? {
                Some(raw) => raw,
                None => return sled::transaction::abort(()),
            };
            let mut actor: User = bincode::deserialize(&actor_raw).unwrap();
            let mut target: User = bincode::deserialize(&target_raw).unwrap();
            if !target.is_active {
                return sled::transaction::abort(());
            }
            let now_following = if actor.following.contains(&target_id) {
                actor.following.remove(&target_id);
                target.followers.remove(&actor_id);
                false
            } else {
                actor.following.insert(target_id);
                target.followers.insert(actor_id);
                true
            };
            let now = Utc::now();
            actor.updated_at = now;
            target.updated_at = now;
            tx.insert(&serialize_id(actor_id), bincode::serialize(&actor).unwrap())?;
            tx.insert(&serialize_id(target_id), bincode::serialize(&target).unwrap())?;
            Ok(now_following)
        });
        match result {
            Ok(now_following) => Ok(Some(now_following)),
            Err(TransactionError::Abort(())) => Ok(None),
            Err(TransactionError::Storage(e)) => Err(e),
        }
    }

    fn toggle_watchlist(&self, user_id: u64, movie_id: u64) -> sled::Result<Option<bool>> {
        toggle_saved(self, user_id, movie_id, |user| &mut user.watchlist)
    }

    fn toggle_favorite(&self, user_id: u64, movie_id: u64) -> sled::Result<Option<bool>> {
        toggle_saved(self, user_id, movie_id, |user| &mut user.favorites)
    }
}

fn toggle_saved(
    db: &sled::Db,
    user_id: u64,
    movie_id: u64,
    select: impl Fn(&mut User) -> &mut Vec<MovieRef>,
) -> sled::Result<Option<bool>> {
    let users = db.open_tree(USERS)?;
    let result = users.transaction(|tx| {
        let raw = match tx.get(&serialize_id(user_id))? {
            Some(raw) => raw,
            None => return sled::transaction::abort(()),
        };
        let mut user: User = bincode::deserialize(&raw).unwrap();
        let added = toggle_movie_ref(select(&mut user), movie_id);
        user.updated_at = Utc::now();
        tx.insert(&serialize_id(user_id), bincode::serialize(&user).unwrap())?;
        Ok(added)
    });
    match result {
        Ok(added) => Ok(Some(added)),
        Err(TransactionError::Abort(())) => Ok(None),
        Err(TransactionError::Storage(e)) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;

    fn test_db() -> sled::Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    fn user(name: &str) -> User {
        User::new(
            name.to_owned(),
            format!("{}@example.com", name),
            "hash".to_owned(),
            Role::Viewer,
        )
    }

    #[test]
    fn username_and_email_are_unique() {
        let db = test_db();
        assert!(db.add_user(&user("alice")).unwrap().is_some());

        let mut same_name = user("alice");
        same_name.email = "other@example.com".to_owned();
        assert_eq!(db.add_user(&same_name).unwrap(), None);

        let mut same_email = user("bob");
        same_email.email = "alice@example.com".to_owned();
        assert_eq!(db.add_user(&same_email).unwrap(), None);

        assert!(db.add_user(&user("bob")).unwrap().is_some());
    }

    #[test]
    fn lookup_by_username_and_email() {
        let db = test_db();
        let id = db.add_user(&user("alice")).unwrap().unwrap();
        let (found, _) = db.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(found, id);
        let (found, _) = db.get_user_by_email("alice@example.com").unwrap().unwrap();
        assert_eq!(found, id);
        assert!(db.get_user_by_username("carol").unwrap().is_none());
    }

    #[test]
    fn follow_updates_both_sides() {
        let db = test_db();
        let a = db.add_user(&user("alice")).unwrap().unwrap();
        let b = db.add_user(&user("bob")).unwrap().unwrap();

        assert_eq!(db.toggle_follow(a, b).unwrap(), Some(true));
        let alice = db.get_user(a).unwrap().unwrap();
        let bob = db.get_user(b).unwrap().unwrap();
        assert!(alice.following.contains(&b));
        assert!(bob.followers.contains(&a));
        assert!(!alice.followers.contains(&a));
        assert!(!bob.following.contains(&b));
    }

    #[test]
    fn follow_twice_restores_original_state() {
        let db = test_db();
        let a = db.add_user(&user("alice")).unwrap().unwrap();
        let b = db.add_user(&user("bob")).unwrap().unwrap();

        assert_eq!(db.toggle_follow(a, b).unwrap(), Some(true));
        assert_eq!(db.toggle_follow(a, b).unwrap(), Some(false));
        let alice = db.get_user(a).unwrap().unwrap();
        let bob = db.get_user(b).unwrap().unwrap();
        assert!(alice.following.is_empty());
        assert!(bob.followers.is_empty());
    }

    #[test]
    fn follow_missing_or_inactive_target() {
        let db = test_db();
        let a = db.add_user(&user("alice")).unwrap().unwrap();
        assert_eq!(db.toggle_follow(a, 9999).unwrap(), None);

        let b = db.add_user(&user("bob")).unwrap().unwrap();
        let mut bob = db.get_user(b).unwrap().unwrap();
        bob.is_active = false;
        db.put_user(b, &bob).unwrap();
        assert_eq!(db.toggle_follow(a, b).unwrap(), None);
    }

    #[test]
    fn watchlist_toggle_is_idempotent_pairwise() {
        let db = test_db();
        let a = db.add_user(&user("alice")).unwrap().unwrap();
        assert_eq!(db.toggle_watchlist(a, 550).unwrap(), Some(true));
        assert_eq!(db.toggle_watchlist(a, 550).unwrap(), Some(false));
        let alice = db.get_user(a).unwrap().unwrap();
        assert!(alice.watchlist.is_empty());

        assert_eq!(db.toggle_favorite(a, 550).unwrap(), Some(true));
        assert_eq!(db.toggle_favorite(a, 680).unwrap(), Some(true));
        let alice = db.get_user(a).unwrap().unwrap();
        assert_eq!(alice.favorites.len(), 2);
        assert_eq!(db.toggle_watchlist(9999, 550).unwrap(), None);
    }
}
