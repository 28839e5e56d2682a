use actix_identity::Identity;
use actix_web::{web, HttpResponse, Scope};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{
    author_card, current_user, log_activity, paginate, require_admin, require_user, AuthorCard,
    Db, PageQuery,
};
use crate::api::lists::list_dto;
use crate::api::reviews::review_dto;
use crate::error::{ApiError, ApiResult};
use crate::model::{
    Activity, ActivityKind, ActivityMeta, ActivityTarget, MovieRef, PrivacySettings, Role, User,
};
use crate::store::activity::ActivityStore;
use crate::store::lists::ListStore;
use crate::store::reviews::ReviewStore;
use crate::store::users::UserStore;

pub fn scope() -> Scope {
    web::scope("/users")
        .route("", web::get().to(list_users))
        .route("/critics", web::get().to(critics))
        .route("/recent", web::get().to(recent))
        .route("/feed", web::get().to(feed))
        .route("/profile", web::put().to(update_profile))
        .route("/watchlist/{movie_id}", web::post().to(toggle_watchlist))
        .route("/favorites/{movie_id}", web::post().to(toggle_favorite))
        .route("/{id}", web::get().to(get_user))
        .route("/{id}", web::delete().to(deactivate_user))
        .route("/{id}/follow", web::post().to(follow))
        .route("/{id}/followers", web::get().to(followers))
        .route("/{id}/following", web::get().to(following))
        .route("/{id}/reviews", web::get().to(user_reviews))
}

/// Profile projection. Private fields are present only for the owner or when
/// the matching privacy flag allows them.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: u64,
    pub username: String,
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
    pub bio: String,
    pub avatar: String,
    pub location: String,
    pub website: String,
    pub critic_badge: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critic_since: Option<DateTime<Utc>>,
    pub specialization: Vec<String>,
    pub followers_count: usize,
    pub following_count: usize,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watchlist: Option<Vec<MovieRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favorites: Option<Vec<MovieRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub followers: Option<Vec<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub following: Option<Vec<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy_settings: Option<PrivacySettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
}

pub fn profile(id: u64, user: &User, is_owner: bool) -> Profile {
    Profile {
        id,
        username: user.username.clone(),
        role: user.role,
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        bio: user.bio.clone(),
        avatar: user.avatar.clone(),
        location: user.location.clone(),
        website: user.website.clone(),
        critic_badge: user.critic_badge,
        critic_since: user.critic_since,
        specialization: user.specialization.clone(),
        followers_count: user.followers.len(),
        following_count: user.following.len(),
        created_at: user.created_at,
        email: (is_owner || user.privacy.show_email).then(|| user.email.clone()),
        phone: (is_owner || user.privacy.show_phone).then(|| user.phone.clone()),
        date_of_birth: if is_owner || user.privacy.show_date_of_birth {
            user.date_of_birth
        } else {
            None
        },
        watchlist: (is_owner || user.privacy.show_watchlist).then(|| user.watchlist.clone()),
        favorites: (is_owner || user.privacy.show_favorites).then(|| user.favorites.clone()),
        followers: is_owner.then(|| user.followers.iter().copied().collect()),
        following: is_owner.then(|| user.following.iter().copied().collect()),
        privacy_settings: is_owner.then(|| user.privacy.clone()),
        last_login: if is_owner { user.last_login } else { None },
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserCard {
    id: u64,
    username: String,
    first_name: String,
    last_name: String,
    avatar: String,
    role: Role,
    critic_badge: bool,
    bio: String,
    created_at: DateTime<Utc>,
}

impl UserCard {
    fn of(id: u64, user: &User) -> UserCard {
        UserCard {
            id,
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            avatar: user.avatar.clone(),
            role: user.role,
            critic_badge: user.critic_badge,
            bio: user.bio.clone(),
            created_at: user.created_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDto {
    pub id: u64,
    pub user: Option<AuthorCard>,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub target: ActivityTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub movie_id: Option<u64>,
    pub metadata: ActivityMeta,
    pub created_at: DateTime<Utc>,
}

pub fn activity_dto(db: &sled::Db, id: u64, activity: Activity) -> ApiResult<ActivityDto> {
    Ok(ActivityDto {
        id,
        user: author_card(db, activity.user)?,
        kind: activity.kind,
        target: activity.target,
        movie_id: activity.movie_id,
        metadata: activity.metadata,
        created_at: activity.created_at,
    })
}

#[derive(Deserialize)]
struct UserSearchQuery {
    search: Option<String>,
    role: Option<String>,
    page: Option<usize>,
    limit: Option<usize>,
}

async fn list_users(db: Db, query: web::Query<UserSearchQuery>) -> ApiResult<HttpResponse> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).max(1);
    let role_filter = query.role.as_deref().and_then(|r| match r {
        "viewer" => Some(Role::Viewer),
        "critic" => Some(Role::Critic),
        "admin" => Some(Role::Admin),
        _ => None,
    });
    let needle = query.search.as_deref().map(str::to_lowercase);

    let mut users: Vec<(u64, User)> = db
        .all_users()?
        .into_iter()
        .filter(|(_, user)| user.is_active)
        .filter(|(_, user)| role_filter.map_or(true, |role| user.role == role))
        .filter(|(_, user)| {
            needle.as_deref().map_or(true, |needle| {
                user.username.to_lowercase().contains(needle)
                    || user.first_name.to_lowercase().contains(needle)
                    || user.last_name.to_lowercase().contains(needle)
            })
        })
        .collect();
    users.sort_by(|(_, a), (_, b)| b.created_at.cmp(&a.created_at));

    let (page_users, pagination) = paginate(users, page, limit);
    let cards: Vec<UserCard> = page_users
        .iter()
        .map(|(id, user)| UserCard::of(*id, user))
        .collect();
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "users": cards,
        "pagination": pagination,
    })))
}

async fn critics(db: Db) -> ApiResult<HttpResponse> {
    let mut critics: Vec<(u64, User)> = db
        .all_users()?
        .into_iter()
        .filter(|(_, user)| user.role == Role::Critic && user.is_active && user.critic_badge)
        .collect();
    critics.sort_by(|(_, a), (_, b)| b.followers.len().cmp(&a.followers.len()));
    critics.truncate(10);
    let cards: Vec<UserCard> = critics
        .iter()
        .map(|(id, user)| UserCard::of(*id, user))
        .collect();
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "critics": cards,
    })))
}

async fn recent(db: Db) -> ApiResult<HttpResponse> {
    let mut users: Vec<(u64, User)> = db
        .all_users()?
        .into_iter()
        .filter(|(_, user)| user.is_active)
        .collect();
    users.sort_by(|(_, a), (_, b)| b.created_at.cmp(&a.created_at));
    users.truncate(10);
    let cards: Vec<UserCard> = users
        .iter()
        .map(|(id, user)| UserCard::of(*id, user))
        .collect();
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "users": cards,
    })))
}

async fn feed(id: Option<Identity>, db: Db, query: web::Query<PageQuery>) -> ApiResult<HttpResponse> {
    let (_, user) = require_user(&db, &id)?;
    let (page, limit) = query.resolve(20);
    let activities = db.feed(&user.following, page, limit)?;
    let items: Vec<ActivityDto> = activities
        .into_iter()
        .map(|(activity_id, activity)| activity_dto(&db, activity_id, activity))
        .collect::<ApiResult<_>>()?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "activities": items,
        "page": page,
        "limit": limit,
    })))
}

async fn get_user(
    id: Option<Identity>,
    db: Db,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let target_id = path.into_inner();
    let viewer = current_user(&db, &id)?;
    let user = match db.get_user(target_id)? {
        Some(user) if user.is_active => user,
        _ => return Err(ApiError::not_found("User not found.")),
    };
    let is_own_profile = viewer
        .as_ref()
        .map_or(false, |(viewer_id, _)| *viewer_id == target_id);

    let reviews: Vec<_> = db
        .user_reviews(target_id)?
        .into_iter()
        .take(5)
        .map(|(review_id, review)| review_dto(&db, review_id, &review))
        .collect::<ApiResult<_>>()?;
    let lists: Vec<_> = db
        .user_lists(target_id, is_own_profile)?
        .into_iter()
        .take(5)
        .map(|(list_id, list)| list_dto(&db, list_id, &list))
        .collect::<ApiResult<_>>()?;
    let activities: Vec<ActivityDto> = db
        .user_activities(target_id, 10)?
        .into_iter()
        .map(|(activity_id, activity)| activity_dto(&db, activity_id, activity))
        .collect::<ApiResult<_>>()?;

    let is_following = viewer
        .as_ref()
        .map_or(false, |(viewer_id, _)| user.followers.contains(viewer_id));

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "profile": profile(target_id, &user, is_own_profile),
        "reviews": reviews,
        "lists": lists,
        "activities": activities,
        "isOwnProfile": is_own_profile,
        "isFollowing": is_following,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileUpdate {
    username: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    bio: Option<String>,
    avatar: Option<String>,
    location: Option<String>,
    website: Option<String>,
    phone: Option<String>,
    date_of_birth: Option<DateTime<Utc>>,
    specialization: Option<Vec<String>>,
    privacy_settings: Option<PrivacySettings>,
}

async fn update_profile(
    id: Option<Identity>,
    db: Db,
    payload: web::Json<ProfileUpdate>,
) -> ApiResult<HttpResponse> {
    let (user_id, mut user) = require_user(&db, &id)?;
    let payload = payload.into_inner();

    if payload.username.is_some() {
        return Err(ApiError::validation("Username cannot be changed."));
    }
    if let Some(bio) = &payload.bio {
        if bio.chars().count() > 500 {
            return Err(ApiError::validation("Bio cannot exceed 500 characters"));
        }
    }

    if let Some(first_name) = payload.first_name {
        user.first_name = first_name;
    }
    if let Some(last_name) = payload.last_name {
        user.last_name = last_name;
    }
    if let Some(bio) = payload.bio {
        user.bio = bio;
    }
    if let Some(avatar) = payload.avatar {
        user.avatar = avatar;
    }
    if let Some(location) = payload.location {
        user.location = location;
    }
    if let Some(website) = payload.website {
        user.website = website;
    }
    if let Some(phone) = payload.phone {
        user.phone = phone;
    }
    if let Some(date_of_birth) = payload.date_of_birth {
        user.date_of_birth = Some(date_of_birth);
    }
    if let Some(specialization) = payload.specialization {
        user.specialization = specialization;
    }
    if let Some(privacy) = payload.privacy_settings {
        user.privacy = privacy;
    }
    user.updated_at = Utc::now();
    db.put_user(user_id, &user)?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Profile updated successfully.",
        "user": profile(user_id, &user, true),
    })))
}

async fn follow(id: Option<Identity>, db: Db, path: web::Path<u64>) -> ApiResult<HttpResponse> {
    let (actor_id, _) = require_user(&db, &id)?;
    let target_id = path.into_inner();
    if target_id == actor_id {
        return Err(ApiError::validation("You cannot follow yourself."));
    }
    let target = match db.get_user(target_id)? {
        Some(target) if target.is_active => target,
        _ => return Err(ApiError::not_found("User not found.")),
    };

    let is_following = match db.toggle_follow(actor_id, target_id)? {
        Some(state) => state,
        None => return Err(ApiError::not_found("User not found.")),
    };

    if is_following {
        log_activity(
            &db,
            Activity::new(
                actor_id,
                ActivityKind::UserFollowed,
                ActivityTarget::User(target_id),
            )
            .meta(ActivityMeta {
                target_username: Some(target.username),
                ..ActivityMeta::default()
            }),
        );
    }

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "isFollowing": is_following,
        "message": if is_following { "Following successfully." } else { "Unfollowed successfully." },
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SavedMoviePayload {
    movie_title: Option<String>,
    movie_poster: Option<String>,
}

async fn toggle_watchlist(
    id: Option<Identity>,
    db: Db,
    path: web::Path<u64>,
    payload: Option<web::Json<SavedMoviePayload>>,
) -> ApiResult<HttpResponse> {
    let (user_id, _) = require_user(&db, &id)?;
    let movie_id = path.into_inner();
    let added = db
        .toggle_watchlist(user_id, movie_id)?
        .ok_or_else(|| ApiError::not_found("User not found."))?;

    if added {
        let meta = payload.map(web::Json::into_inner).unwrap_or(SavedMoviePayload {
            movie_title: None,
            movie_poster: None,
        });
        log_activity(
            &db,
            Activity::new(
                user_id,
                ActivityKind::MovieWatchlisted,
                ActivityTarget::Movie(movie_id),
            )
            .movie(movie_id)
            .meta(ActivityMeta {
                movie_title: meta.movie_title,
                movie_poster: meta.movie_poster,
                ..ActivityMeta::default()
            }),
        );
    }

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "inWatchlist": added,
        "message": if added { "Added to watchlist." } else { "Removed from watchlist." },
    })))
}

async fn toggle_favorite(
    id: Option<Identity>,
    db: Db,
    path: web::Path<u64>,
    payload: Option<web::Json<SavedMoviePayload>>,
) -> ApiResult<HttpResponse> {
    let (user_id, _) = require_user(&db, &id)?;
    let movie_id = path.into_inner();
    let added = db
        .toggle_favorite(user_id, movie_id)?
        .ok_or_else(|| ApiError::not_found("User not found."))?;

    if added {
        let meta = payload.map(web::Json::into_inner).unwrap_or(SavedMoviePayload {
            movie_title: None,
            movie_poster: None,
        });
        log_activity(
            &db,
            Activity::new(
                user_id,
                ActivityKind::MovieFavorited,
                ActivityTarget::Movie(movie_id),
            )
            .movie(movie_id)
            .meta(ActivityMeta {
                movie_title: meta.movie_title,
                movie_poster: meta.movie_poster,
                ..ActivityMeta::default()
            }),
        );
    }

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "isFavorite": added,
        "message": if added { "Added to favorites." } else { "Removed from favorites." },
    })))
}

async fn followers(db: Db, path: web::Path<u64>) -> ApiResult<HttpResponse> {
    let user = db
        .get_user(path.into_inner())?
        .ok_or_else(|| ApiError::not_found("User not found."))?;
    let cards: Vec<AuthorCard> = user
        .followers
        .iter()
        .filter_map(|follower_id| author_card(&db, *follower_id).transpose())
        .collect::<ApiResult<_>>()?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "followers": cards,
    })))
}

async fn following(db: Db, path: web::Path<u64>) -> ApiResult<HttpResponse> {
    let user = db
        .get_user(path.into_inner())?
        .ok_or_else(|| ApiError::not_found("User not found."))?;
    let cards: Vec<AuthorCard> = user
        .following
        .iter()
        .filter_map(|followed_id| author_card(&db, *followed_id).transpose())
        .collect::<ApiResult<_>>()?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "following": cards,
    })))
}

async fn user_reviews(
    db: Db,
    path: web::Path<u64>,
    query: web::Query<PageQuery>,
) -> ApiResult<HttpResponse> {
    let (page, limit) = query.resolve(10);
    let reviews = db.user_reviews(path.into_inner())?;
    let (page_reviews, pagination) = paginate(reviews, page, limit);
    let dtos: Vec<_> = page_reviews
        .iter()
        .map(|(review_id, review)| review_dto(&db, *review_id, review))
        .collect::<ApiResult<_>>()?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "reviews": dtos,
        "pagination": pagination,
    })))
}

async fn deactivate_user(
    id: Option<Identity>,
    db: Db,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    require_admin(&db, &id)?;
    let target_id = path.into_inner();
    let mut user = db
        .get_user(target_id)?
        .ok_or_else(|| ApiError::not_found("User not found."))?;
    user.is_active = false;
    user.updated_at = Utc::now();
    db.put_user(target_id, &user)?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "User deactivated successfully.",
    })))
}
