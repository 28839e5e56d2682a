//! Read-only proxy to the TMDB catalog. Responses are passed through as
//! untyped JSON; the provider owns the schema.

use actix_web::http::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::config::Config;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("catalog returned status {0}")]
    Status(StatusCode),

    #[error("catalog request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

pub struct Catalog {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl Catalog {
    pub fn new(config: &Config) -> Catalog {
        Catalog {
            client: reqwest::Client::new(),
            base_url: config.tmdb_base_url.trim_end_matches('/').to_owned(),
            api_key: config.tmdb_api_key.clone(),
        }
    }

    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Value, CatalogError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .query(params)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status(
                StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY),
            ));
        }
        Ok(response.json().await?)
    }

    pub async fn trending(&self, time_window: &str) -> Result<Value, CatalogError> {
        self.get(&format!("/trending/movie/{}", time_window), &[])
            .await
    }

    pub async fn popular(&self, page: u32) -> Result<Value, CatalogError> {
        self.get("/movie/popular", &[("page", page.to_string())])
            .await
    }

    pub async fn top_rated(&self, page: u32) -> Result<Value, CatalogError> {
        self.get("/movie/top_rated", &[("page", page.to_string())])
            .await
    }

    pub async fn now_playing(&self, page: u32) -> Result<Value, CatalogError> {
        self.get("/movie/now_playing", &[("page", page.to_string())])
            .await
    }

    pub async fn upcoming(&self, page: u32) -> Result<Value, CatalogError> {
        self.get("/movie/upcoming", &[("page", page.to_string())])
            .await
    }

    pub async fn search(
        &self,
        query: &str,
        page: u32,
        year: Option<u32>,
    ) -> Result<Value, CatalogError> {
        let mut params = vec![
            ("query", query.to_owned()),
            ("page", page.to_string()),
        ];
        if let Some(year) = year {
            params.push(("year", year.to_string()));
        }
        self.get("/search/movie", &params).await
    }

    pub async fn genres(&self) -> Result<Value, CatalogError> {
        self.get("/genre/movie/list", &[]).await
    }

    pub async fn discover(&self, params: &[(&str, String)]) -> Result<Value, CatalogError> {
        self.get("/discover/movie", params).await
    }

    pub async fn details(&self, movie_id: u64) -> Result<Value, CatalogError> {
        self.get(
            &format!("/movie/{}", movie_id),
            &[("append_to_response", "release_dates".to_owned())],
        )
        .await
    }

    pub async fn credits(&self, movie_id: u64) -> Result<Value, CatalogError> {
        self.get(&format!("/movie/{}/credits", movie_id), &[]).await
    }

    pub async fn videos(&self, movie_id: u64) -> Result<Value, CatalogError> {
        self.get(&format!("/movie/{}/videos", movie_id), &[]).await
    }

    pub async fn similar(&self, movie_id: u64) -> Result<Value, CatalogError> {
        self.get(&format!("/movie/{}/similar", movie_id), &[]).await
    }

    pub async fn recommendations(&self, movie_id: u64, page: u32) -> Result<Value, CatalogError> {
        self.get(
            &format!("/movie/{}/recommendations", movie_id),
            &[("page", page.to_string())],
        )
        .await
    }

    pub async fn image_config(&self) -> Result<Value, CatalogError> {
        self.get("/configuration", &[]).await
    }
}
