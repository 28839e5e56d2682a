use actix_identity::Identity;
use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub mod auth;
pub mod lists;
pub mod movies;
pub mod reviews;
pub mod users;

use crate::error::{ApiError, ApiResult};
use crate::model::{Activity, Role, User};
use crate::store::activity::ActivityStore;
use crate::store::users::UserStore;

pub type Db = web::Data<sled::Db>;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(auth::scope())
            .service(users::scope())
            .service(reviews::scope())
            .service(movies::scope())
            .service(lists::scope())
            .route("/health", web::get().to(health)),
    );
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "timestamp": Utc::now(),
    }))
}

/// Resolves the identity cookie to a live user record. Anonymous requests and
/// stale identities (deleted or deactivated accounts) resolve to `None`.
pub fn current_user(db: &sled::Db, id: &Option<Identity>) -> ApiResult<Option<(u64, User)>> {
    let identity = match id {
        Some(identity) => identity,
        None => return Ok(None),
    };
    let raw = match identity.id() {
        Ok(raw) => raw,
        Err(_) => return Ok(None),
    };
    let user_id: u64 = match raw.parse() {
        Ok(user_id) => user_id,
        Err(_) => return Ok(None),
    };
    match db.get_user(user_id)? {
        Some(user) if user.is_active => Ok(Some((user_id, user))),
        _ => Ok(None),
    }
}

pub fn require_user(db: &sled::Db, id: &Option<Identity>) -> ApiResult<(u64, User)> {
    current_user(db, id)?.ok_or_else(|| {
        ApiError::Unauthorized("Authentication required. Please log in.".to_owned())
    })
}

pub fn require_admin(db: &sled::Db, id: &Option<Identity>) -> ApiResult<(u64, User)> {
    let (user_id, user) = require_user(db, id)?;
    if !user.is_admin() {
        return Err(ApiError::Forbidden(
            "Access denied. Insufficient permissions.".to_owned(),
        ));
    }
    Ok((user_id, user))
}

/// Ownership check with admin override.
pub fn can_modify(owner: u64, actor_id: u64, actor: &User) -> bool {
    owner == actor_id || actor.is_admin()
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

impl PageQuery {
    pub fn resolve(&self, default_limit: usize) -> (usize, usize) {
        (self.page.unwrap_or(1).max(1), self.limit.unwrap_or(default_limit).max(1))
    }
}

#[derive(Serialize)]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub pages: usize,
}

/// Applies page/limit to an already-ordered result set.
pub fn paginate<T>(items: Vec<T>, page: usize, limit: usize) -> (Vec<T>, Pagination) {
    let total = items.len();
    let pages = total.div_ceil(limit);
    let slice = items
        .into_iter()
        .skip((page - 1) * limit)
        .take(limit)
        .collect();
    (
        slice,
        Pagination {
            page,
            limit,
            total,
            pages,
        },
    )
}

/// Compact user projection embedded in reviews, lists and social listings.
#[derive(Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AuthorCard {
    pub id: u64,
    pub username: String,
    pub avatar: String,
    pub role: Role,
    pub critic_badge: bool,
}

impl AuthorCard {
    pub fn of(id: u64, user: &User) -> AuthorCard {
        AuthorCard {
            id,
            username: user.username.clone(),
            avatar: user.avatar.clone(),
            role: user.role,
            critic_badge: user.critic_badge,
        }
    }
}

pub fn author_card(db: &sled::Db, id: u64) -> ApiResult<Option<AuthorCard>> {
    Ok(db.get_user(id)?.map(|user| AuthorCard::of(id, &user)))
}

/// Fire-and-forget activity recording. The triggering request never fails
/// because the log write did.
pub fn log_activity(db: &sled::Db, activity: Activity) {
    if let Err(err) = db.record_activity(&activity) {
        log::warn!("failed to record activity: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::config::Config;
    use actix_identity::IdentityMiddleware;
    use actix_session::{storage::CookieSessionStore, SessionMiddleware};
    use actix_web::body::MessageBody;
    use actix_web::cookie::{Cookie, Key};
    use actix_web::dev::ServiceResponse;
    use actix_web::{test, App};
    use serde_json::Value;

    fn test_db() -> web::Data<sled::Db> {
        web::Data::new(sled::Config::new().temporary(true).open().unwrap())
    }

    fn test_catalog() -> web::Data<Catalog> {
        web::Data::new(Catalog::new(&Config {
            port: 0,
            db_path: String::new(),
            session_secret: String::new(),
            tmdb_api_key: String::new(),
            tmdb_base_url: "http://localhost:9".to_owned(),
            client_origin: String::new(),
        }))
    }

    macro_rules! test_app {
        ($db:expr) => {{
            let key = Key::derive_from(&[7u8; 64]);
            test::init_service(
                App::new()
                    .wrap(IdentityMiddleware::default())
                    .wrap(
                        SessionMiddleware::builder(CookieSessionStore::default(), key)
                            .cookie_name("auth-cookie".to_owned())
                            .cookie_secure(false)
                            .build(),
                    )
                    .app_data($db.clone())
                    .app_data(test_catalog())
                    .configure(configure),
            )
            .await
        }};
    }

    fn session_cookie<B: MessageBody>(resp: &ServiceResponse<B>) -> Cookie<'static> {
        resp.response()
            .cookies()
            .find(|cookie| cookie.name() == "auth-cookie")
            .expect("no session cookie issued")
            .into_owned()
    }

    macro_rules! register {
        ($app:expr, $username:expr) => {{
            let req = test::TestRequest::post()
                .uri("/api/auth/register")
                .set_json(json!({
                    "username": $username,
                    "email": format!("{}@example.com", $username),
                    "password": "secret1",
                }))
                .to_request();
            let resp = test::call_service(&$app, req).await;
            assert_eq!(resp.status(), 201, "registration failed");
            session_cookie(&resp)
        }};
    }

    #[actix_web::test]
    async fn register_login_me_flow() {
        let db = test_db();
        let app = test_app!(db);

        let cookie = register!(app, "alice");

        let req = test::TestRequest::get()
            .uri("/api/auth/me")
            .cookie(cookie)
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["user"]["username"], "alice");
        assert_eq!(body["user"]["email"], "alice@example.com");

        // Anonymous requests resolve to no user, not an error.
        let req = test::TestRequest::get().uri("/api/auth/me").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["user"], Value::Null);

        let req = test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({"email": "alice@example.com", "password": "wrong!"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);

        let req = test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({"email": "alice@example.com", "password": "secret1"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
    }

    #[actix_web::test]
    async fn duplicate_username_is_rejected() {
        let db = test_db();
        let app = test_app!(db);
        register!(app, "alice");

        let req = test::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(json!({
                "username": "alice",
                "email": "second@example.com",
                "password": "secret1",
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], "Username already taken.");
    }

    #[actix_web::test]
    async fn review_content_length_boundary() {
        let db = test_db();
        let app = test_app!(db);
        let cookie = register!(app, "alice");

        let payload = |content: String| {
            json!({
                "movieId": 550,
                "movieTitle": "Fight Club",
                "title": "Soap",
                "content": content,
                "rating": 9,
            })
        };

        let req = test::TestRequest::post()
            .uri("/api/reviews")
            .cookie(cookie.clone())
            .set_json(payload("x".repeat(40)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], "Review must be at least 50 characters");

        let req = test::TestRequest::post()
            .uri("/api/reviews")
            .cookie(cookie.clone())
            .set_json(payload("x".repeat(50)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 201);

        // One review per (author, movie).
        let req = test::TestRequest::post()
            .uri("/api/reviews")
            .cookie(cookie)
            .set_json(payload("y".repeat(60)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn creating_a_review_requires_a_session() {
        let db = test_db();
        let app = test_app!(db);
        let req = test::TestRequest::post()
            .uri("/api/reviews")
            .set_json(json!({
                "movieId": 550,
                "movieTitle": "Fight Club",
                "title": "Soap",
                "content": "z".repeat(60),
                "rating": 9,
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401);
    }

    #[actix_web::test]
    async fn private_list_is_invisible_to_strangers() {
        let db = test_db();
        let app = test_app!(db);
        let alice = register!(app, "alice");
        let bob = register!(app, "bob");

        let req = test::TestRequest::post()
            .uri("/api/lists")
            .cookie(alice.clone())
            .set_json(json!({"title": "guilty pleasures", "isPublic": false}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let list_id = body["list"]["id"].as_u64().unwrap();

        let uri = format!("/api/lists/{}", list_id);
        let req = test::TestRequest::get()
            .uri(&uri)
            .cookie(bob)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 403);

        let req = test::TestRequest::get().uri(&uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 403);

        let req = test::TestRequest::get()
            .uri(&uri)
            .cookie(alice)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
    }

    #[actix_web::test]
    async fn following_yourself_is_rejected() {
        let db = test_db();
        let app = test_app!(db);
        let cookie = register!(app, "alice");

        let req = test::TestRequest::get()
            .uri("/api/auth/me")
            .cookie(cookie.clone())
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let my_id = body["user"]["id"].as_u64().unwrap();

        let req = test::TestRequest::post()
            .uri(&format!("/api/users/{}/follow", my_id))
            .cookie(cookie)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], "You cannot follow yourself.");
    }

    #[actix_web::test]
    async fn follow_toggle_round_trip_over_http() {
        let db = test_db();
        let app = test_app!(db);
        let alice = register!(app, "alice");
        let bob = register!(app, "bob");

        let req = test::TestRequest::get()
            .uri("/api/auth/me")
            .cookie(bob)
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let bob_id = body["user"]["id"].as_u64().unwrap();

        let uri = format!("/api/users/{}/follow", bob_id);
        let req = test::TestRequest::post()
            .uri(&uri)
            .cookie(alice.clone())
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["isFollowing"], true);

        let req = test::TestRequest::post().uri(&uri).cookie(alice).to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["isFollowing"], false);
    }

    #[actix_web::test]
    async fn profile_hides_private_fields_from_other_viewers() {
        let db = test_db();
        let app = test_app!(db);
        let alice = register!(app, "alice");
        register!(app, "bob");

        let req = test::TestRequest::get()
            .uri("/api/auth/me")
            .cookie(alice.clone())
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let alice_id = body["user"]["id"].as_u64().unwrap();

        // Owner sees the email; an anonymous viewer does not (show_email
        // defaults to off).
        let uri = format!("/api/users/{}", alice_id);
        let req = test::TestRequest::get()
            .uri(&uri)
            .cookie(alice)
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["profile"]["email"], "alice@example.com");
        assert_eq!(body["isOwnProfile"], true);

        let req = test::TestRequest::get().uri(&uri).to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert!(body["profile"].get("email").is_none());
        // Watchlist defaults to visible.
        assert!(body["profile"].get("watchlist").is_some());
    }
}
