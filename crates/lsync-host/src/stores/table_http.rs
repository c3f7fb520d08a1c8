use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use super::transport::{check_status, from_reqwest};
use super::{StoreError, TableStore};
use crate::config::{CollectionKind, TableSource, TableStoreConfig};
use crate::error::SyncError;
use crate::record::Record;

/// Table store backed by a spreadsheet REST API with offset pagination.
///
/// `GET {api_url}/{base_id}/{table}?view=...&offset=...` returns
/// `{"records": [{"id", "fields"}], "offset"?}`; pages are followed until no
/// offset is returned.
pub struct RestTableStore {
    client: Client,
    api_url: Url,
    base_id: String,
    access_token: String,
    sources: BTreeMap<CollectionKind, TableSource>,
}

#[derive(Debug, Deserialize)]
struct TablePage {
    #[serde(default)]
    records: Vec<TableRow>,
    #[serde(default)]
    offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    fields: Record,
}

impl RestTableStore {
    pub fn new(config: &TableStoreConfig) -> Result<Self, SyncError> {
        let access_token = config
            .access_token
            .clone()
            .ok_or_else(|| SyncError::config("TABLE_ACCESS_TOKEN is not set"))?;
        let base_id = config
            .base_id
            .clone()
            .ok_or_else(|| SyncError::config("TABLE_BASE_ID is not set"))?;
        let api_url = Url::parse(&config.api_url)
            .map_err(|e| SyncError::config(format!("TABLE_API_URL '{}': {e}", config.api_url)))?;
        if api_url.cannot_be_a_base() {
            return Err(SyncError::config(format!(
                "TABLE_API_URL '{}' cannot be used as a base URL",
                config.api_url
            )));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SyncError::config(format!("build table http client: {e}")))?;
        Ok(Self {
            client,
            api_url,
            base_id,
            access_token,
            sources: config.sources.clone(),
        })
    }

    fn table_url(&self, source: &TableSource) -> Url {
        let mut url = self.api_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&self.base_id).push(&source.table);
        }
        url
    }
}

#[async_trait]
impl TableStore for RestTableStore {
    async fn fetch_records(&self, collection: CollectionKind) -> Result<Vec<Record>, StoreError> {
        let source = self
            .sources
            .get(&collection)
            .ok_or(StoreError::Unmapped(collection))?;
        let url = self.table_url(source);

        let mut records = Vec::new();
        let mut offset: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let mut request = self
                .client
                .get(url.clone())
                .bearer_auth(&self.access_token)
                .query(&[("view", source.view.as_str())]);
            if let Some(offset) = offset.as_deref() {
                request = request.query(&[("offset", offset)]);
            }

            let response = request.send().await.map_err(from_reqwest)?;
            let response = check_status(response).await?;
            let page: TablePage = response.json().await.map_err(from_reqwest)?;
            pages += 1;
            records.extend(page.records.into_iter().map(|row| row.fields));

            match page.offset {
                Some(next) if !next.is_empty() => offset = Some(next),
                _ => break,
            }
        }

        tracing::debug!(
            collection = %collection,
            table = %source.table,
            pages,
            records = records.len(),
            "fetched table records"
        );
        Ok(records)
    }
}
