use actix_identity::Identity;
use actix_web::{web, HttpResponse, Scope};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{current_user, Db};
use crate::api::reviews::review_dto;
use crate::catalog::Catalog;
use crate::error::{ApiError, ApiResult};
use crate::store::reviews::ReviewStore;

type CatalogData = web::Data<Catalog>;

pub fn scope() -> Scope {
    web::scope("/movies")
        .route("/trending", web::get().to(trending))
        .route("/popular", web::get().to(popular))
        .route("/top-rated", web::get().to(top_rated))
        .route("/now-playing", web::get().to(now_playing))
        .route("/upcoming", web::get().to(upcoming))
        .route("/search", web::get().to(search))
        .route("/genres", web::get().to(genres))
        .route("/discover", web::get().to(discover))
        .route("/config/images", web::get().to(image_config))
        .route("/{id}", web::get().to(details))
        .route("/{id}/credits", web::get().to(credits))
        .route("/{id}/videos", web::get().to(videos))
        .route("/{id}/recommendations", web::get().to(recommendations))
}

fn page_response(data: Value) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "success": true,
        "movies": data.get("results").cloned().unwrap_or(Value::Null),
        "page": data.get("page").cloned().unwrap_or(Value::Null),
        "totalPages": data.get("total_pages").cloned().unwrap_or(Value::Null),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrendingQuery {
    time_window: Option<String>,
}

async fn trending(catalog: CatalogData, query: web::Query<TrendingQuery>) -> ApiResult<HttpResponse> {
    let window = query.time_window.as_deref().unwrap_or("week");
    Ok(page_response(catalog.trending(window).await?))
}

#[derive(Deserialize)]
struct CatalogPageQuery {
    page: Option<u32>,
}

async fn popular(catalog: CatalogData, query: web::Query<CatalogPageQuery>) -> ApiResult<HttpResponse> {
    Ok(page_response(catalog.popular(query.page.unwrap_or(1)).await?))
}

async fn top_rated(
    catalog: CatalogData,
    query: web::Query<CatalogPageQuery>,
) -> ApiResult<HttpResponse> {
    Ok(page_response(catalog.top_rated(query.page.unwrap_or(1)).await?))
}

async fn now_playing(
    catalog: CatalogData,
    query: web::Query<CatalogPageQuery>,
) -> ApiResult<HttpResponse> {
    Ok(page_response(catalog.now_playing(query.page.unwrap_or(1)).await?))
}

async fn upcoming(
    catalog: CatalogData,
    query: web::Query<CatalogPageQuery>,
) -> ApiResult<HttpResponse> {
    Ok(page_response(catalog.upcoming(query.page.unwrap_or(1)).await?))
}

#[derive(Deserialize)]
struct SearchQuery {
    query: Option<String>,
    page: Option<u32>,
    year: Option<u32>,
}

async fn search(catalog: CatalogData, query: web::Query<SearchQuery>) -> ApiResult<HttpResponse> {
    let term = query
        .query
        .as_deref()
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::validation("Search query is required."))?;
    let data = catalog
        .search(term, query.page.unwrap_or(1), query.year)
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "movies": data.get("results").cloned().unwrap_or(Value::Null),
        "page": data.get("page").cloned().unwrap_or(Value::Null),
        "totalPages": data.get("total_pages").cloned().unwrap_or(Value::Null),
        "totalResults": data.get("total_results").cloned().unwrap_or(Value::Null),
    })))
}

async fn genres(catalog: CatalogData) -> ApiResult<HttpResponse> {
    let data = catalog.genres().await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "genres": data.get("genres").cloned().unwrap_or(Value::Null),
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiscoverQuery {
    page: Option<u32>,
    genre: Option<String>,
    year: Option<u32>,
    sort_by: Option<String>,
    min_rating: Option<f64>,
    max_rating: Option<f64>,
}

async fn discover(catalog: CatalogData, query: web::Query<DiscoverQuery>) -> ApiResult<HttpResponse> {
    let mut params = vec![
        ("page", query.page.unwrap_or(1).to_string()),
        (
            "sort_by",
            query
                .sort_by
                .clone()
                .unwrap_or_else(|| "popularity.desc".to_owned()),
        ),
        ("include_adult", "false".to_owned()),
    ];
    if let Some(genre) = &query.genre {
        params.push(("with_genres", genre.clone()));
    }
    if let Some(year) = query.year {
        params.push(("primary_release_year", year.to_string()));
    }
    if let Some(min) = query.min_rating {
        params.push(("vote_average.gte", min.to_string()));
    }
    if let Some(max) = query.max_rating {
        params.push(("vote_average.lte", max.to_string()));
    }
    Ok(page_response(catalog.discover(&params).await?))
}

async fn image_config(catalog: CatalogData) -> ApiResult<HttpResponse> {
    let data = catalog.image_config().await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "images": data.get("images").cloned().unwrap_or(Value::Null),
    })))
}

const FEATURED_CREW_JOBS: [&str; 4] = ["Director", "Writer", "Screenplay", "Producer"];

async fn details(
    id: Option<Identity>,
    db: Db,
    catalog: CatalogData,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let movie_id = path.into_inner();

    let mut movie = catalog.details(movie_id).await?;
    let credits = catalog.credits(movie_id).await?;
    let videos = catalog.videos(movie_id).await?;
    let similar = catalog.similar(movie_id).await?;

    let cast: Vec<Value> = credits
        .get("cast")
        .and_then(Value::as_array)
        .map(|cast| cast.iter().take(15).cloned().collect())
        .unwrap_or_default();
    let crew: Vec<Value> = credits
        .get("crew")
        .and_then(Value::as_array)
        .map(|crew| {
            crew.iter()
                .filter(|member| {
                    member
                        .get("job")
                        .and_then(Value::as_str)
                        .map_or(false, |job| FEATURED_CREW_JOBS.contains(&job))
                })
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    let trailers: Vec<Value> = videos
        .get("results")
        .and_then(Value::as_array)
        .map(|videos| {
            videos
                .iter()
                .filter(|video| {
                    video.get("site").and_then(Value::as_str) == Some("YouTube")
                        && matches!(
                            video.get("type").and_then(Value::as_str),
                            Some("Trailer") | Some("Teaser")
                        )
                })
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    let similar: Vec<Value> = similar
        .get("results")
        .and_then(Value::as_array)
        .map(|results| results.iter().take(6).cloned().collect())
        .unwrap_or_default();

    if let Some(movie) = movie.as_object_mut() {
        movie.insert("credits".to_owned(), json!({ "cast": cast, "crew": crew }));
        movie.insert("videos".to_owned(), Value::Array(trailers));
        movie.insert("similar".to_owned(), Value::Array(similar));
    }

    let local_reviews: Vec<_> = db
        .movie_reviews(movie_id)?
        .into_iter()
        .take(5)
        .map(|(review_id, review)| review_dto(&db, review_id, &review))
        .collect::<ApiResult<_>>()?;
    let local_stats = db.movie_stats(movie_id)?;

    let user_status = match current_user(&db, &id)? {
        Some((viewer_id, viewer)) => json!({
            "inWatchlist": viewer.watchlist.iter().any(|m| m.movie_id == movie_id),
            "isFavorite": viewer.favorites.iter().any(|m| m.movie_id == movie_id),
            "hasReviewed": db.review_for(viewer_id, movie_id)?.is_some(),
        }),
        None => Value::Null,
    };

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "movie": movie,
        "localReviews": local_reviews,
        "localStats": local_stats,
        "userStatus": user_status,
    })))
}

async fn credits(catalog: CatalogData, path: web::Path<u64>) -> ApiResult<HttpResponse> {
    let data = catalog.credits(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "cast": data.get("cast").cloned().unwrap_or(Value::Null),
        "crew": data.get("crew").cloned().unwrap_or(Value::Null),
    })))
}

async fn videos(catalog: CatalogData, path: web::Path<u64>) -> ApiResult<HttpResponse> {
    let data = catalog.videos(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "videos": data.get("results").cloned().unwrap_or(Value::Null),
    })))
}

async fn recommendations(
    catalog: CatalogData,
    path: web::Path<u64>,
    query: web::Query<CatalogPageQuery>,
) -> ApiResult<HttpResponse> {
    let data = catalog
        .recommendations(path.into_inner(), query.page.unwrap_or(1))
        .await?;
    Ok(page_response(data))
}
