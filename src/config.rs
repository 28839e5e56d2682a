use log::info;
use std::env;
use std::fmt::Display;
use std::str::FromStr;

const DEFAULT_SESSION_SECRET: &str =
    "cineverse-dev-session-secret-change-me-0123456789abcdefghijklmnopqrstuvwxyz";

pub struct Config {
    pub port: u16,
    pub db_path: String,
    pub session_secret: String,
    pub tmdb_api_key: String,
    pub tmdb_base_url: String,
    pub client_origin: String,
}

impl Config {
    pub fn load() -> Config {
        Config {
            port: try_load("CINEVERSE_PORT", "4000"),
            db_path: try_load("CINEVERSE_DB", "cineverse.sled"),
            session_secret: try_load("CINEVERSE_SESSION_SECRET", DEFAULT_SESSION_SECRET),
            tmdb_api_key: try_load("TMDB_API_KEY", ""),
            tmdb_base_url: try_load("TMDB_BASE_URL", "https://api.themoviedb.org/3"),
            client_origin: try_load("CINEVERSE_CLIENT_ORIGIN", "http://localhost:3000"),
        }
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{} not set, using default: {}", key, default);
        default.to_owned()
    });
    match raw.parse() {
        Ok(value) => value,
        Err(err) => panic!("invalid value for {}: {}", key, err),
    }
}
