mod api;
mod catalog;
mod config;
mod error;
mod model;
mod store;

use actix_cors::Cors;
use actix_identity::IdentityMiddleware;
use actix_session::{storage::CookieSessionStore, SessionMiddleware};
use actix_web::cookie::Key;
use actix_web::{http, middleware::Logger, web, App, HttpResponse, HttpServer};
use log::info;
use serde_json::json;

use catalog::Catalog;
use config::Config;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().default_filter_or("cineverse=debug,actix_web=info"),
    );

    let config = Config::load();
    let db = sled::open(&config.db_path)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;
    let db = web::Data::new(db);
    let catalog = web::Data::new(Catalog::new(&config));
    let session_key = Key::derive_from(config.session_secret.as_bytes());
    let client_origin = config.client_origin.clone();
    let address = ("0.0.0.0", config.port);

    info!("listening on port {}", config.port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&client_origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![http::header::CONTENT_TYPE, http::header::ACCEPT])
            .supports_credentials();
        App::new()
            .wrap(Logger::default())
            .wrap(IdentityMiddleware::default())
            .wrap(
                SessionMiddleware::builder(CookieSessionStore::default(), session_key.clone())
                    .cookie_name("auth-cookie".to_owned())
                    .cookie_secure(false)
                    .build(),
            )
            .wrap(cors)
            .app_data(db.clone())
            .app_data(catalog.clone())
            .app_data(web::JsonConfig::default().error_handler(|err, _| {
                actix_web::error::InternalError::from_response(
                    err,
                    HttpResponse::BadRequest().json(json!({
                        "success": false,
                        "message": "Malformed JSON payload.",
                    })),
                )
                .into()
            }))
            .configure(api::configure)
    })
    .bind(address)?
    .run()
    .await
}
