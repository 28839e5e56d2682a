use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Critic,
    Admin,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PrivacySettings {
    pub show_email: bool,
    pub show_phone: bool,
    pub show_date_of_birth: bool,
    pub show_watchlist: bool,
    pub show_favorites: bool,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        PrivacySettings {
            show_email: false,
            show_phone: false,
            show_date_of_birth: false,
            show_watchlist: true,
            show_favorites: true,
        }
    }
}

/// A saved movie reference (watchlist or favorites entry). Membership is
/// keyed by `movie_id` equality within the owning list.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MovieRef {
    pub movie_id: u64,
    pub added_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
    pub bio: String,
    pub avatar: String,
    pub location: String,
    pub website: String,
    pub phone: String,
    pub date_of_birth: Option<DateTime<Utc>>,
    pub critic_badge: bool,
    pub critic_since: Option<DateTime<Utc>>,
    pub specialization: Vec<String>,
    pub followers: BTreeSet<u64>,
    pub following: BTreeSet<u64>,
    pub watchlist: Vec<MovieRef>,
    pub favorites: Vec<MovieRef>,
    pub privacy: PrivacySettings,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(username: String, email: String, password_hash: String, role: Role) -> User {
        let now = Utc::now();
        User {
            username,
            email,
            password_hash,
            role,
            first_name: String::new(),
            last_name: String::new(),
            bio: String::new(),
            avatar: String::new(),
            location: String::new(),
            website: String::new(),
            phone: String::new(),
            date_of_birth: None,
            critic_badge: role == Role::Critic,
            critic_since: if role == Role::Critic { Some(now) } else { None },
            specialization: Vec::new(),
            followers: BTreeSet::new(),
            following: BTreeSet::new(),
            watchlist: Vec::new(),
            favorites: Vec::new(),
            privacy: PrivacySettings::default(),
            is_active: true,
            created_at: now,
            updated_at: now,
            last_login: None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: u64,
    pub author: u64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub author: u64,
    pub movie_id: u64,
    // Catalog snapshot captured at creation time. Allowed to go stale.
    pub movie_title: String,
    pub movie_poster: String,
    pub movie_year: Option<u32>,
    pub title: String,
    pub content: String,
    pub rating: u8,
    pub contains_spoilers: bool,
    pub likes: BTreeSet<u64>,
    pub comments: Vec<Comment>,
    pub tags: Vec<String>,
    pub is_published: bool,
    pub is_featured: bool,
    pub is_critic_review: bool,
    pub critic_score: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn critic_score_for(rating: u8) -> u32 {
    rating as u32 * 10
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ListCategory {
    Favorites,
    Watchlist,
    Custom,
    Ranked,
    Genre,
    Year,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ListMovie {
    pub movie_id: u64,
    pub movie_title: String,
    pub movie_poster: String,
    pub movie_year: Option<u32>,
    pub note: String,
    pub rank: Option<u32>,
    pub added_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MovieList {
    pub creator: u64,
    pub title: String,
    pub description: String,
    pub movies: Vec<ListMovie>,
    pub category: ListCategory,
    pub is_public: bool,
    pub likes: BTreeSet<u64>,
    pub followers: BTreeSet<u64>,
    pub tags: Vec<String>,
    pub cover_image: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    ReviewCreated,
    ReviewLiked,
    MovieFavorited,
    MovieWatchlisted,
    ListCreated,
    ListUpdated,
    UserFollowed,
    CommentAdded,
}

/// What an activity points at. One variant per referencable entity kind, so a
/// target can never pair a kind with the wrong id space.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "targetType", content = "targetId")]
pub enum ActivityTarget {
    Review(u64),
    #[serde(rename = "MovieList")]
    List(u64),
    User(u64),
    Movie(u64),
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ActivityMeta {
    pub movie_title: Option<String>,
    pub movie_poster: Option<String>,
    pub review_title: Option<String>,
    pub list_title: Option<String>,
    pub target_username: Option<String>,
}

/// Immutable feed record. Display metadata is snapshotted at creation time so
/// the feed never re-joins against the other stores.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub user: u64,
    pub kind: ActivityKind,
    pub target: ActivityTarget,
    pub movie_id: Option<u64>,
    pub metadata: ActivityMeta,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}

impl Activity {
    pub fn new(user: u64, kind: ActivityKind, target: ActivityTarget) -> Activity {
        Activity {
            user,
            kind,
            target,
            movie_id: None,
            metadata: ActivityMeta::default(),
            is_public: true,
            created_at: Utc::now(),
        }
    }

    pub fn movie(mut self, movie_id: u64) -> Activity {
        self.movie_id = Some(movie_id);
        self
    }

    pub fn meta(mut self, metadata: ActivityMeta) -> Activity {
        self.metadata = metadata;
        self
    }
}
