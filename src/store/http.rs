use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use super::{Filter, StoreClient, StoreType};
use crate::error::StoreError;
use crate::record::Record;

/// Default timeout for a single request to the remote store.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Deserialize)]
struct CountResponse {
    count: u64,
}

#[derive(Deserialize)]
struct DeleteResponse {
    deleted: bool,
}

/// Client for the remote store served by `pharmasync-server`.
#[derive(Debug, Clone)]
pub struct HttpStore {
    server_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpStore {
    pub fn new(server_url: impl Into<String>, api_key: Option<String>) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            server_url: server_url.into(),
            api_key,
            client,
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn build_url(&self, path: &str) -> String {
        // Bare host:port defaults to http
        let base_url = if !self.server_url.starts_with("http://")
            && !self.server_url.starts_with("https://")
        {
            format!("http://{}", self.server_url)
        } else {
            self.server_url.clone()
        };

        format!("{}{}", base_url.trim_end_matches('/'), path)
    }

    fn records_url(&self, table: &str) -> String {
        self.build_url(&format!("/tables/{}/records", urlencoding::encode(table)))
    }

    fn record_url(&self, table: &str, id: &str) -> String {
        format!("{}/{}", self.records_url(table), urlencoding::encode(id))
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }

    fn map_send_error(e: reqwest::Error) -> StoreError {
        if e.is_connect() || e.is_timeout() {
            StoreError::Unreachable(e.to_string())
        } else {
            StoreError::Http(e)
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl StoreClient for HttpStore {
    fn store_type(&self) -> StoreType {
        StoreType::Remote
    }

    async fn find(&self, table: &str, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        let url = match filter {
            Filter::ById(id) => {
                return Ok(self.get(table, id).await?.into_iter().collect());
            }
            Filter::All => self.records_url(table),
            Filter::UpdatedSince(since) => format!(
                "{}?since={}",
                self.records_url(table),
                urlencoding::encode(&since.to_rfc3339_opts(SecondsFormat::Micros, true))
            ),
        };

        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let records: Vec<Record> = Self::check_status(response).await?.json().await?;

        Ok(records.into_iter().filter(|r| filter.matches(r)).collect())
    }

    async fn get(&self, table: &str, id: &str) -> Result<Option<Record>, StoreError> {
        let response = self
            .request(reqwest::Method::GET, &self.record_url(table, id))
            .send()
            .await
            .map_err(Self::map_send_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let record: Record = Self::check_status(response).await?.json().await?;
        Ok(Some(record))
    }

    async fn upsert(&self, table: &str, record: &Record) -> Result<(), StoreError> {
        let id = record.id()?;
        let response = self
            .request(reqwest::Method::PUT, &self.record_url(table, &id))
            .json(record)
            .send()
            .await
            .map_err(Self::map_send_error)?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<bool, StoreError> {
        let response = self
            .request(reqwest::Method::DELETE, &self.record_url(table, id))
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let body: DeleteResponse = Self::check_status(response).await?.json().await?;
        Ok(body.deleted)
    }

    async fn count(&self, table: &str) -> Result<u64, StoreError> {
        let url = self.build_url(&format!("/tables/{}/count", urlencoding::encode(table)));
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .map_err(Self::map_send_error)?;
        let body: CountResponse = Self::check_status(response).await?.json().await?;
        Ok(body.count)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let response = self
            .request(reqwest::Method::GET, &self.build_url("/health"))
            .send()
            .await
            .map_err(Self::map_send_error)?;
        Self::check_status(response).await?;
        Ok(())
    }
}
