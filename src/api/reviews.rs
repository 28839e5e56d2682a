use actix_identity::Identity;
use actix_web::{web, HttpResponse, Scope};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;

use super::{
    author_card, can_modify, log_activity, paginate, require_user, AuthorCard, Db, PageQuery,
};
use crate::error::{ApiError, ApiResult};
use crate::model::{
    critic_score_for, Activity, ActivityKind, ActivityMeta, ActivityTarget, Comment, Review, Role,
};
use crate::store::reviews::ReviewStore;

pub fn scope() -> Scope {
    web::scope("/reviews")
        .route("", web::get().to(list_reviews))
        .route("", web::post().to(create_review))
        .route("/movie/{movie_id}", web::get().to(movie_reviews))
        .route("/{id}", web::get().to(get_review))
        .route("/{id}", web::put().to(update_review))
        .route("/{id}", web::delete().to(delete_review))
        .route("/{id}/like", web::post().to(like_review))
        .route("/{id}/comment", web::post().to(add_comment))
        .route("/{id}/comment/{comment_id}", web::delete().to(delete_comment))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewDto {
    pub id: u64,
    pub author: Option<AuthorCard>,
    pub movie_id: u64,
    pub movie_title: String,
    pub movie_poster: String,
    pub movie_year: Option<u32>,
    pub title: String,
    pub content: String,
    pub rating: u8,
    pub contains_spoilers: bool,
    pub likes_count: usize,
    pub comments_count: usize,
    pub tags: Vec<String>,
    pub is_featured: bool,
    pub is_critic_review: bool,
    pub critic_score: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn review_dto(db: &sled::Db, id: u64, review: &Review) -> ApiResult<ReviewDto> {
    Ok(ReviewDto {
        id,
        author: author_card(db, review.author)?,
        movie_id: review.movie_id,
        movie_title: review.movie_title.clone(),
        movie_poster: review.movie_poster.clone(),
        movie_year: review.movie_year,
        title: review.title.clone(),
        content: review.content.clone(),
        rating: review.rating,
        contains_spoilers: review.contains_spoilers,
        likes_count: review.likes.len(),
        comments_count: review.comments.len(),
        tags: review.tags.clone(),
        is_featured: review.is_featured,
        is_critic_review: review.is_critic_review,
        critic_score: review.critic_score,
        created_at: review.created_at,
        updated_at: review.updated_at,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentDto {
    pub id: u64,
    pub author: Option<AuthorCard>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

fn comment_dtos(db: &sled::Db, comments: &[Comment]) -> ApiResult<Vec<CommentDto>> {
    comments
        .iter()
        .map(|comment| {
            Ok(CommentDto {
                id: comment.id,
                author: author_card(db, comment.author)?,
                content: comment.content.clone(),
                created_at: comment.created_at,
            })
        })
        .collect()
}

fn validate_title(title: &str) -> ApiResult<()> {
    if title.chars().count() > 200 {
        return Err(ApiError::validation("Title cannot exceed 200 characters"));
    }
    Ok(())
}

fn validate_content(content: &str) -> ApiResult<()> {
    let len = content.chars().count();
    if len < 50 {
        return Err(ApiError::validation("Review must be at least 50 characters"));
    }
    if len > 5000 {
        return Err(ApiError::validation("Review cannot exceed 5000 characters"));
    }
    Ok(())
}

fn validate_rating(rating: u8) -> ApiResult<()> {
    if rating < 1 {
        return Err(ApiError::validation("Rating must be at least 1"));
    }
    if rating > 10 {
        return Err(ApiError::validation("Rating cannot exceed 10"));
    }
    Ok(())
}

#[derive(Deserialize)]
struct ListQuery {
    page: Option<usize>,
    limit: Option<usize>,
    featured: Option<String>,
}

async fn list_reviews(db: Db, query: web::Query<ListQuery>) -> ApiResult<HttpResponse> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(10).max(1);
    let featured_only = query.featured.as_deref() == Some("true");
    let reviews = db.recent_reviews(featured_only)?;
    let (page_reviews, pagination) = paginate(reviews, page, limit);
    let dtos: Vec<ReviewDto> = page_reviews
        .iter()
        .map(|(id, review)| review_dto(&db, *id, review))
        .collect::<ApiResult<_>>()?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "reviews": dtos,
        "pagination": pagination,
    })))
}

async fn movie_reviews(
    db: Db,
    path: web::Path<u64>,
    query: web::Query<PageQuery>,
) -> ApiResult<HttpResponse> {
    let movie_id = path.into_inner();
    let (page, limit) = query.resolve(10);
    let reviews = db.movie_reviews(movie_id)?;
    let stats = db.movie_stats(movie_id)?;
    let (page_reviews, pagination) = paginate(reviews, page, limit);
    let dtos: Vec<ReviewDto> = page_reviews
        .iter()
        .map(|(id, review)| review_dto(&db, *id, review))
        .collect::<ApiResult<_>>()?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "reviews": dtos,
        "pagination": pagination,
        "stats": stats,
    })))
}

#[derive(Serialize)]
struct ReviewDetail {
    #[serde(flatten)]
    review: ReviewDto,
    comments: Vec<CommentDto>,
}

async fn get_review(db: Db, path: web::Path<u64>) -> ApiResult<HttpResponse> {
    let id = path.into_inner();
    let review = db
        .get_review(id)?
        .ok_or_else(|| ApiError::not_found("Review not found."))?;
    let detail = ReviewDetail {
        review: review_dto(&db, id, &review)?,
        comments: comment_dtos(&db, &review.comments)?,
    };
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "review": detail,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateReviewPayload {
    movie_id: Option<u64>,
    movie_title: Option<String>,
    movie_poster: Option<String>,
    movie_year: Option<u32>,
    title: Option<String>,
    content: Option<String>,
    rating: Option<u8>,
    contains_spoilers: Option<bool>,
    tags: Option<Vec<String>>,
}

async fn create_review(
    id: Option<Identity>,
    db: Db,
    payload: web::Json<CreateReviewPayload>,
) -> ApiResult<HttpResponse> {
    let (author_id, author) = require_user(&db, &id)?;
    let payload = payload.into_inner();
    let (movie_id, movie_title, title, content, rating) = match (
        payload.movie_id,
        payload.movie_title,
        payload.title,
        payload.content,
        payload.rating,
    ) {
        (Some(movie_id), Some(movie_title), Some(title), Some(content), Some(rating))
            if !movie_title.is_empty() && !title.is_empty() && !content.is_empty() =>
        {
            (movie_id, movie_title, title, content, rating)
        }
        _ => {
            return Err(ApiError::validation(
                "Movie ID, title, content, and rating are required.",
            ))
        }
    };
    validate_title(&title)?;
    validate_content(&content)?;
    validate_rating(rating)?;

    if db.review_for(author_id, movie_id)?.is_some() {
        return Err(ApiError::Conflict(
            "You have already reviewed this movie. You can edit your existing review.".to_owned(),
        ));
    }

    let is_critic = author.role == Role::Critic;
    let now = Utc::now();
    let review = Review {
        author: author_id,
        movie_id,
        movie_title: movie_title.clone(),
        movie_poster: payload.movie_poster.unwrap_or_default(),
        movie_year: payload.movie_year,
        title: title.clone(),
        content,
        rating,
        contains_spoilers: payload.contains_spoilers.unwrap_or(false),
        likes: BTreeSet::new(),
        comments: Vec::new(),
        tags: payload.tags.unwrap_or_default(),
        is_published: true,
        is_featured: false,
        is_critic_review: is_critic,
        critic_score: is_critic.then(|| critic_score_for(rating)),
        created_at: now,
        updated_at: now,
    };

    let review_id = match db.add_review(&review)? {
        Some(review_id) => review_id,
        None => {
            return Err(ApiError::Conflict(
                "You have already reviewed this movie.".to_owned(),
            ))
        }
    };

    log_activity(
        &db,
        Activity::new(
            author_id,
            ActivityKind::ReviewCreated,
            ActivityTarget::Review(review_id),
        )
        .movie(movie_id)
        .meta(ActivityMeta {
            movie_title: Some(movie_title),
            movie_poster: Some(review.movie_poster.clone()),
            review_title: Some(title),
            ..ActivityMeta::default()
        }),
    );

    Ok(HttpResponse::Created().json(json!({
        "success": true,
        "message": "Review created successfully!",
        "review": review_dto(&db, review_id, &review)?,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateReviewPayload {
    title: Option<String>,
    content: Option<String>,
    rating: Option<u8>,
    contains_spoilers: Option<bool>,
    tags: Option<Vec<String>>,
}

async fn update_review(
    id: Option<Identity>,
    db: Db,
    path: web::Path<u64>,
    payload: web::Json<UpdateReviewPayload>,
) -> ApiResult<HttpResponse> {
    let (actor_id, actor) = require_user(&db, &id)?;
    let review_id = path.into_inner();
    let mut review = db
        .get_review(review_id)?
        .ok_or_else(|| ApiError::not_found("Review not found."))?;
    if !can_modify(review.author, actor_id, &actor) {
        return Err(ApiError::Forbidden(
            "You can only edit your own reviews.".to_owned(),
        ));
    }

    let payload = payload.into_inner();
    if let Some(title) = &payload.title {
        validate_title(title)?;
    }
    if let Some(content) = &payload.content {
        validate_content(content)?;
    }
    if let Some(rating) = payload.rating {
        validate_rating(rating)?;
    }

    if let Some(title) = payload.title {
        review.title = title;
    }
    if let Some(content) = payload.content {
        review.content = content;
    }
    if let Some(rating) = payload.rating {
        review.rating = rating;
        if review.is_critic_review {
            review.critic_score = Some(critic_score_for(rating));
        }
    }
    if let Some(contains_spoilers) = payload.contains_spoilers {
        review.contains_spoilers = contains_spoilers;
    }
    if let Some(tags) = payload.tags {
        review.tags = tags;
    }
    review.updated_at = Utc::now();
    db.put_review(review_id, &review)?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Review updated successfully.",
        "review": review_dto(&db, review_id, &review)?,
    })))
}

async fn delete_review(
    id: Option<Identity>,
    db: Db,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let (actor_id, actor) = require_user(&db, &id)?;
    let review_id = path.into_inner();
    let review = db
        .get_review(review_id)?
        .ok_or_else(|| ApiError::not_found("Review not found."))?;
    if !can_modify(review.author, actor_id, &actor) {
        return Err(ApiError::Forbidden(
            "You can only delete your own reviews.".to_owned(),
        ));
    }
    db.delete_review(review_id)?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Review deleted successfully.",
    })))
}

async fn like_review(
    id: Option<Identity>,
    db: Db,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let (user_id, _) = require_user(&db, &id)?;
    let review_id = path.into_inner();
    let review = db
        .get_review(review_id)?
        .ok_or_else(|| ApiError::not_found("Review not found."))?;

    let (is_liked, likes_count) = db
        .toggle_review_like(review_id, user_id)?
        .ok_or_else(|| ApiError::not_found("Review not found."))?;

    if is_liked {
        log_activity(
            &db,
            Activity::new(
                user_id,
                ActivityKind::ReviewLiked,
                ActivityTarget::Review(review_id),
            )
            .movie(review.movie_id)
            .meta(ActivityMeta {
                movie_title: Some(review.movie_title),
                review_title: Some(review.title),
                ..ActivityMeta::default()
            }),
        );
    }

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "isLiked": is_liked,
        "likesCount": likes_count,
    })))
}

#[derive(Deserialize)]
struct CommentPayload {
    content: Option<String>,
}

async fn add_comment(
    id: Option<Identity>,
    db: Db,
    path: web::Path<u64>,
    payload: web::Json<CommentPayload>,
) -> ApiResult<HttpResponse> {
    let (user_id, _) = require_user(&db, &id)?;
    let review_id = path.into_inner();
    let content = payload
        .into_inner()
        .content
        .map(|c| c.trim().to_owned())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::validation("Comment content is required."))?;
    if content.chars().count() > 1000 {
        return Err(ApiError::validation("Comment cannot exceed 1000 characters"));
    }

    let comment = Comment {
        id: db.generate_id()?,
        author: user_id,
        content,
        created_at: Utc::now(),
    };
    let review = db
        .add_comment(review_id, comment)?
        .ok_or_else(|| ApiError::not_found("Review not found."))?;

    log_activity(
        &db,
        Activity::new(
            user_id,
            ActivityKind::CommentAdded,
            ActivityTarget::Review(review_id),
        )
        .meta(ActivityMeta {
            review_title: Some(review.title.clone()),
            ..ActivityMeta::default()
        }),
    );

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Comment added successfully.",
        "comments": comment_dtos(&db, &review.comments)?,
    })))
}

async fn delete_comment(
    id: Option<Identity>,
    db: Db,
    path: web::Path<(u64, u64)>,
) -> ApiResult<HttpResponse> {
    let (actor_id, actor) = require_user(&db, &id)?;
    let (review_id, comment_id) = path.into_inner();
    let review = db
        .get_review(review_id)?
        .ok_or_else(|| ApiError::not_found("Review not found."))?;
    let comment = review
        .comments
        .iter()
        .find(|c| c.id == comment_id)
        .ok_or_else(|| ApiError::not_found("Comment not found."))?;
    if !can_modify(comment.author, actor_id, &actor) {
        return Err(ApiError::Forbidden(
            "You can only delete your own comments.".to_owned(),
        ));
    }
    db.remove_comment(review_id, comment_id)?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Comment deleted successfully.",
    })))
}
