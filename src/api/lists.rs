use actix_identity::Identity;
use actix_web::{web, HttpResponse, Scope};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;

use super::{
    author_card, can_modify, current_user, log_activity, paginate, require_user, AuthorCard, Db,
};
use crate::error::{ApiError, ApiResult};
use crate::model::{
    Activity, ActivityKind, ActivityMeta, ActivityTarget, ListCategory, ListMovie, MovieList,
};
use crate::store::lists::{ListEdit, ListStore};

pub fn scope() -> Scope {
    web::scope("/lists")
        .route("", web::get().to(list_lists))
        .route("", web::post().to(create_list))
        .route("/popular", web::get().to(popular_lists))
        .route("/user/{user_id}", web::get().to(user_lists))
        .route("/{id}", web::get().to(get_list))
        .route("/{id}", web::put().to(update_list))
        .route("/{id}", web::delete().to(delete_list))
        .route("/{id}/movies", web::post().to(add_movie))
        .route("/{id}/movies/{movie_id}", web::delete().to(remove_movie))
        .route("/{id}/like", web::post().to(like_list))
        .route("/{id}/follow", web::post().to(follow_list))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDto {
    pub id: u64,
    pub creator: Option<AuthorCard>,
    pub title: String,
    pub description: String,
    pub movies: Vec<ListMovie>,
    pub movie_count: usize,
    pub category: ListCategory,
    pub is_public: bool,
    pub likes_count: usize,
    pub followers_count: usize,
    pub tags: Vec<String>,
    pub cover_image: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn list_dto(db: &sled::Db, id: u64, list: &MovieList) -> ApiResult<ListDto> {
    Ok(ListDto {
        id,
        creator: author_card(db, list.creator)?,
        title: list.title.clone(),
        description: list.description.clone(),
        movies: list.movies.clone(),
        movie_count: list.movies.len(),
        category: list.category,
        is_public: list.is_public,
        likes_count: list.likes.len(),
        followers_count: list.followers.len(),
        tags: list.tags.clone(),
        cover_image: list.cover_image.clone(),
        created_at: list.created_at,
        updated_at: list.updated_at,
    })
}

fn parse_category(raw: &str) -> Option<ListCategory> {
    match raw {
        "favorites" => Some(ListCategory::Favorites),
        "watchlist" => Some(ListCategory::Watchlist),
        "custom" => Some(ListCategory::Custom),
        "ranked" => Some(ListCategory::Ranked),
        "genre" => Some(ListCategory::Genre),
        "year" => Some(ListCategory::Year),
        _ => None,
    }
}

fn validate_list_title(title: &str) -> ApiResult<()> {
    if title.chars().count() > 100 {
        return Err(ApiError::validation("Title cannot exceed 100 characters"));
    }
    Ok(())
}

fn validate_description(description: &str) -> ApiResult<()> {
    if description.chars().count() > 500 {
        return Err(ApiError::validation(
            "Description cannot exceed 500 characters",
        ));
    }
    Ok(())
}

#[derive(Deserialize)]
struct ListsQuery {
    page: Option<usize>,
    limit: Option<usize>,
    category: Option<String>,
}

async fn list_lists(db: Db, query: web::Query<ListsQuery>) -> ApiResult<HttpResponse> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(10).max(1);
    let category = query.category.as_deref().and_then(parse_category);

    let lists: Vec<(u64, MovieList)> = db
        .public_lists()?
        .into_iter()
        .filter(|(_, list)| category.map_or(true, |c| list.category == c))
        .collect();
    let (page_lists, pagination) = paginate(lists, page, limit);
    let dtos: Vec<ListDto> = page_lists
        .iter()
        .map(|(id, list)| list_dto(&db, *id, list))
        .collect::<ApiResult<_>>()?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "lists": dtos,
        "pagination": pagination,
    })))
}

#[derive(Deserialize)]
struct PopularQuery {
    limit: Option<usize>,
}

async fn popular_lists(db: Db, query: web::Query<PopularQuery>) -> ApiResult<HttpResponse> {
    let limit = query.limit.unwrap_or(10).max(1);
    let dtos: Vec<ListDto> = db
        .popular_lists(limit)?
        .iter()
        .map(|(id, list)| list_dto(&db, *id, list))
        .collect::<ApiResult<_>>()?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "lists": dtos,
    })))
}

async fn user_lists(
    id: Option<Identity>,
    db: Db,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let creator_id = path.into_inner();
    let viewer = current_user(&db, &id)?;
    let is_own = viewer.map_or(false, |(viewer_id, _)| viewer_id == creator_id);
    let dtos: Vec<ListDto> = db
        .user_lists(creator_id, is_own)?
        .iter()
        .map(|(list_id, list)| list_dto(&db, *list_id, list))
        .collect::<ApiResult<_>>()?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "lists": dtos,
    })))
}

async fn get_list(id: Option<Identity>, db: Db, path: web::Path<u64>) -> ApiResult<HttpResponse> {
    let list_id = path.into_inner();
    let list = db
        .get_list(list_id)?
        .ok_or_else(|| ApiError::not_found("List not found."))?;
    let viewer = current_user(&db, &id)?;
    let is_owner = viewer
        .as_ref()
        .map_or(false, |(viewer_id, viewer)| {
            can_modify(list.creator, *viewer_id, viewer)
        });
    if !list.is_public && !is_owner {
        return Err(ApiError::Forbidden("This list is private.".to_owned()));
    }
    let has_liked = viewer
        .as_ref()
        .map_or(false, |(viewer_id, _)| list.likes.contains(viewer_id));

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "list": list_dto(&db, list_id, &list)?,
        "isOwner": is_owner,
        "hasLiked": has_liked,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MovieEntryPayload {
    movie_id: Option<u64>,
    movie_title: Option<String>,
    movie_poster: Option<String>,
    movie_year: Option<u32>,
    note: Option<String>,
    rank: Option<u32>,
}

impl MovieEntryPayload {
    fn into_entry(self) -> ApiResult<ListMovie> {
        let (movie_id, movie_title) = match (self.movie_id, self.movie_title) {
            (Some(movie_id), Some(movie_title)) if !movie_title.is_empty() => {
                (movie_id, movie_title)
            }
            _ => {
                return Err(ApiError::validation("Movie ID and title are required."));
            }
        };
        let note = self.note.unwrap_or_default();
        if note.chars().count() > 200 {
            return Err(ApiError::validation("Note cannot exceed 200 characters"));
        }
        Ok(ListMovie {
            movie_id,
            movie_title,
            movie_poster: self.movie_poster.unwrap_or_default(),
            movie_year: self.movie_year,
            note,
            rank: self.rank,
            added_at: Utc::now(),
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateListPayload {
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
    is_public: Option<bool>,
    tags: Option<Vec<String>>,
    movies: Option<Vec<MovieEntryPayload>>,
}

async fn create_list(
    id: Option<Identity>,
    db: Db,
    payload: web::Json<CreateListPayload>,
) -> ApiResult<HttpResponse> {
    let (creator_id, _) = require_user(&db, &id)?;
    let payload = payload.into_inner();
    let title = payload
        .title
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::validation("List title is required."))?;
    validate_list_title(&title)?;
    let description = payload.description.unwrap_or_default();
    validate_description(&description)?;

    let mut movies = Vec::new();
    for entry in payload.movies.unwrap_or_default() {
        let entry = entry.into_entry()?;
        if movies.iter().any(|m: &ListMovie| m.movie_id == entry.movie_id) {
            continue;
        }
        movies.push(entry);
    }

    let now = Utc::now();
    let list = MovieList {
        creator: creator_id,
        title: title.clone(),
        description,
        movies,
        category: payload
            .category
            .as_deref()
            .and_then(parse_category)
            .unwrap_or(ListCategory::Custom),
        is_public: payload.is_public.unwrap_or(true),
        likes: BTreeSet::new(),
        followers: BTreeSet::new(),
        tags: payload.tags.unwrap_or_default(),
        cover_image: String::new(),
        created_at: now,
        updated_at: now,
    };
    let list_id = db.add_list(&list)?;

    log_activity(
        &db,
        Activity::new(
            creator_id,
            ActivityKind::ListCreated,
            ActivityTarget::List(list_id),
        )
        .meta(ActivityMeta {
            list_title: Some(title),
            ..ActivityMeta::default()
        }),
    );

    Ok(HttpResponse::Created().json(json!({
        "success": true,
        "message": "List created successfully!",
        "list": list_dto(&db, list_id, &list)?,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateListPayload {
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
    is_public: Option<bool>,
    tags: Option<Vec<String>>,
    cover_image: Option<String>,
}

async fn update_list(
    id: Option<Identity>,
    db: Db,
    path: web::Path<u64>,
    payload: web::Json<UpdateListPayload>,
) -> ApiResult<HttpResponse> {
    let (actor_id, actor) = require_user(&db, &id)?;
    let list_id = path.into_inner();
    let mut list = db
        .get_list(list_id)?
        .ok_or_else(|| ApiError::not_found("List not found."))?;
    if !can_modify(list.creator, actor_id, &actor) {
        return Err(ApiError::Forbidden(
            "You can only edit your own lists.".to_owned(),
        ));
    }

    let payload = payload.into_inner();
    if let Some(title) = payload.title.filter(|t| !t.is_empty()) {
        validate_list_title(&title)?;
        list.title = title;
    }
    if let Some(description) = payload.description {
        validate_description(&description)?;
        list.description = description;
    }
    if let Some(category) = payload.category.as_deref().and_then(parse_category) {
        list.category = category;
    }
    if let Some(is_public) = payload.is_public {
        list.is_public = is_public;
    }
    if let Some(tags) = payload.tags {
        list.tags = tags;
    }
    if let Some(cover_image) = payload.cover_image {
        list.cover_image = cover_image;
    }
    list.updated_at = Utc::now();
    db.put_list(list_id, &list)?;

    log_activity(
        &db,
        Activity::new(
            actor_id,
            ActivityKind::ListUpdated,
            ActivityTarget::List(list_id),
        )
        .meta(ActivityMeta {
            list_title: Some(list.title.clone()),
            ..ActivityMeta::default()
        }),
    );

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "List updated successfully.",
        "list": list_dto(&db, list_id, &list)?,
    })))
}

async fn delete_list(
    id: Option<Identity>,
    db: Db,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let (actor_id, actor) = require_user(&db, &id)?;
    let list_id = path.into_inner();
    let list = db
        .get_list(list_id)?
        .ok_or_else(|| ApiError::not_found("List not found."))?;
    if !can_modify(list.creator, actor_id, &actor) {
        return Err(ApiError::Forbidden(
            "You can only delete your own lists.".to_owned(),
        ));
    }
    db.delete_list(list_id)?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "List deleted successfully.",
    })))
}

async fn add_movie(
    id: Option<Identity>,
    db: Db,
    path: web::Path<u64>,
    payload: web::Json<MovieEntryPayload>,
) -> ApiResult<HttpResponse> {
    let (actor_id, _) = require_user(&db, &id)?;
    let list_id = path.into_inner();
    let entry = payload.into_inner().into_entry()?;
    let list = db
        .get_list(list_id)?
        .ok_or_else(|| ApiError::not_found("List not found."))?;
    if list.creator != actor_id {
        return Err(ApiError::Forbidden(
            "You can only add movies to your own lists.".to_owned(),
        ));
    }

    match db.add_list_movie(list_id, entry)? {
        Some(ListEdit::Updated(updated)) => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "message": "Movie added to list.",
            "list": list_dto(&db, list_id, &updated)?,
        }))),
        Some(ListEdit::DuplicateMovie) => {
            Err(ApiError::Conflict("Movie already in list.".to_owned()))
        }
        None => Err(ApiError::not_found("List not found.")),
    }
}

async fn remove_movie(
    id: Option<Identity>,
    db: Db,
    path: web::Path<(u64, u64)>,
) -> ApiResult<HttpResponse> {
    let (actor_id, _) = require_user(&db, &id)?;
    let (list_id, movie_id) = path.into_inner();
    let list = db
        .get_list(list_id)?
        .ok_or_else(|| ApiError::not_found("List not found."))?;
    if list.creator != actor_id {
        return Err(ApiError::Forbidden(
            "You can only remove movies from your own lists.".to_owned(),
        ));
    }
    let updated = db
        .remove_list_movie(list_id, movie_id)?
        .ok_or_else(|| ApiError::not_found("List not found."))?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Movie removed from list.",
        "list": list_dto(&db, list_id, &updated)?,
    })))
}

async fn like_list(id: Option<Identity>, db: Db, path: web::Path<u64>) -> ApiResult<HttpResponse> {
    let (user_id, _) = require_user(&db, &id)?;
    let list_id = path.into_inner();
    let (has_liked, likes_count) = db
        .toggle_list_like(list_id, user_id)?
        .ok_or_else(|| ApiError::not_found("List not found."))?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "hasLiked": has_liked,
        "likesCount": likes_count,
    })))
}

async fn follow_list(
    id: Option<Identity>,
    db: Db,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let (user_id, _) = require_user(&db, &id)?;
    let list_id = path.into_inner();
    let (is_following, followers_count) = db
        .toggle_list_follow(list_id, user_id)?
        .ok_or_else(|| ApiError::not_found("List not found."))?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "isFollowing": is_following,
        "followersCount": followers_count,
    })))
}
