//! Shared HTTP request helpers for CLI commands.

use anyhow::{Context, Result};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

pub fn base_url(port: u16) -> String {
    format!("http://127.0.0.1:{}/api", port)
}

async fn send(req: reqwest::RequestBuilder, url: &str) -> Result<Response> {
    req.send()
        .await
        .with_context(|| format!("cannot reach sluiced at {url} (is it running?)"))
}

async fn parse<T: DeserializeOwned>(resp: Response) -> Result<T> {
    resp.error_for_status()?
        .json::<T>()
        .await
        .context("failed to parse response")
}

pub async fn get_json<T: DeserializeOwned>(url: &str) -> Result<T> {
    parse(send(reqwest::Client::new().get(url), url).await?).await
}

/// GET that maps 404 to `None`.
pub async fn get_json_optional<T: DeserializeOwned>(url: &str) -> Result<Option<T>> {
    let resp = send(reqwest::Client::new().get(url), url).await?;
    if resp.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    parse(resp).await.map(Some)
}

pub async fn post_json<T: DeserializeOwned>(url: &str) -> Result<T> {
    parse(send(reqwest::Client::new().post(url), url).await?).await
}

pub async fn delete_json<T: DeserializeOwned>(url: &str) -> Result<T> {
    parse(send(reqwest::Client::new().delete(url), url).await?).await
}
