use actix_identity::Identity;
use actix_web::{web, HttpMessage, HttpRequest, HttpResponse, Scope};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use super::{current_user, require_user, Db};
use crate::api::users::profile;
use crate::error::{ApiError, ApiResult};
use crate::model::{Role, User};
use crate::store::users::UserStore;

pub fn scope() -> Scope {
    web::scope("/auth")
        .route("/register", web::post().to(register))
        .route("/login", web::post().to(login))
        .route("/logout", web::post().to(logout))
        .route("/me", web::get().to(me))
        .route("/password", web::put().to(change_password))
        .route("/validate", web::get().to(validate))
}

// Loose check: something@domain.tld, no whitespace.
fn valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.'),
        None => false,
    }
}

fn validate_username(username: &str) -> ApiResult<()> {
    let len = username.chars().count();
    if len < 3 {
        return Err(ApiError::validation("Username must be at least 3 characters"));
    }
    if len > 20 {
        return Err(ApiError::validation("Username cannot exceed 20 characters"));
    }
    Ok(())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterPayload {
    username: Option<String>,
    email: Option<String>,
    password: Option<String>,
    role: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
}

async fn register(
    req: HttpRequest,
    db: Db,
    payload: web::Json<RegisterPayload>,
) -> ApiResult<HttpResponse> {
    let payload = payload.into_inner();
    let (username, email, password) = match (payload.username, payload.email, payload.password) {
        (Some(u), Some(e), Some(p)) if !u.is_empty() && !e.is_empty() && !p.is_empty() => {
            (u.trim().to_lowercase(), e.trim().to_lowercase(), p)
        }
        _ => {
            return Err(ApiError::validation(
                "Username, email, and password are required.",
            ))
        }
    };
    validate_username(&username)?;
    if !valid_email(&email) {
        return Err(ApiError::validation("Please enter a valid email"));
    }
    if password.chars().count() < 6 {
        return Err(ApiError::validation("Password must be at least 6 characters"));
    }

    if db.get_user_by_username(&username)?.is_some() {
        return Err(ApiError::Conflict("Username already taken.".to_owned()));
    }
    if db.get_user_by_email(&email)?.is_some() {
        return Err(ApiError::Conflict("Email already registered.".to_owned()));
    }

    // Only viewer and critic are self-assignable.
    let role = match payload.role.as_deref() {
        Some("critic") => Role::Critic,
        _ => Role::Viewer,
    };

    let password_hash = bcrypt::hash(&password, bcrypt::DEFAULT_COST)?;
    let mut user = User::new(username, email, password_hash, role);
    user.first_name = payload.first_name.unwrap_or_default();
    user.last_name = payload.last_name.unwrap_or_default();

    let id = match db.add_user(&user)? {
        Some(id) => id,
        None => {
            return Err(ApiError::Conflict(
                "Username or email already in use.".to_owned(),
            ))
        }
    };

    Identity::login(&req.extensions(), id.to_string()).map_err(|_| ApiError::Session)?;

    Ok(HttpResponse::Created().json(json!({
        "success": true,
        "message": "Registration successful!",
        "user": profile(id, &user, true),
    })))
}

#[derive(Deserialize)]
struct LoginPayload {
    email: Option<String>,
    password: Option<String>,
}

async fn login(
    req: HttpRequest,
    db: Db,
    payload: web::Json<LoginPayload>,
) -> ApiResult<HttpResponse> {
    let payload = payload.into_inner();
    let (email, password) = match (payload.email, payload.password) {
        (Some(e), Some(p)) if !e.is_empty() && !p.is_empty() => (e.trim().to_lowercase(), p),
        _ => return Err(ApiError::validation("Email and password are required.")),
    };

    let (id, mut user) = match db.get_user_by_email(&email)? {
        Some(found) => found,
        None => {
            return Err(ApiError::Unauthorized(
                "Invalid email or password.".to_owned(),
            ))
        }
    };
    if !bcrypt::verify(&password, &user.password_hash)? {
        return Err(ApiError::Unauthorized(
            "Invalid email or password.".to_owned(),
        ));
    }
    if !user.is_active {
        return Err(ApiError::Forbidden(
            "Account is deactivated. Please contact support.".to_owned(),
        ));
    }

    user.last_login = Some(Utc::now());
    db.put_user(id, &user)?;

    Identity::login(&req.extensions(), id.to_string()).map_err(|_| ApiError::Session)?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Login successful!",
        "user": profile(id, &user, true),
    })))
}

async fn logout(id: Option<Identity>) -> HttpResponse {
    if let Some(id) = id {
        id.logout();
    }
    HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Logged out successfully.",
    }))
}

async fn me(id: Option<Identity>, db: Db) -> ApiResult<HttpResponse> {
    match current_user(&db, &id)? {
        Some((user_id, user)) => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "user": profile(user_id, &user, true),
        }))),
        None => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "user": null,
        }))),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordPayload {
    current_password: Option<String>,
    new_password: Option<String>,
}

async fn change_password(
    id: Option<Identity>,
    db: Db,
    payload: web::Json<PasswordPayload>,
) -> ApiResult<HttpResponse> {
    let (user_id, mut user) = require_user(&db, &id)?;
    let payload = payload.into_inner();
    let (current, new) = match (payload.current_password, payload.new_password) {
        (Some(c), Some(n)) if !c.is_empty() && !n.is_empty() => (c, n),
        _ => {
            return Err(ApiError::validation(
                "Current password and new password are required.",
            ))
        }
    };
    if new.chars().count() < 6 {
        return Err(ApiError::validation(
            "New password must be at least 6 characters.",
        ));
    }
    if !bcrypt::verify(&current, &user.password_hash)? {
        return Err(ApiError::Unauthorized(
            "Current password is incorrect.".to_owned(),
        ));
    }

    user.password_hash = bcrypt::hash(&new, bcrypt::DEFAULT_COST)?;
    user.updated_at = Utc::now();
    db.put_user(user_id, &user)?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Password changed successfully.",
    })))
}

async fn validate(id: Option<Identity>, db: Db) -> ApiResult<HttpResponse> {
    match current_user(&db, &id)? {
        Some((user_id, user)) => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "valid": true,
            "user": profile(user_id, &user, false),
        }))),
        None => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "valid": false,
            "user": null,
        }))),
    }
}
