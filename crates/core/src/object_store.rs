use crate::credentials::{CredentialProvider, STORAGE_RESOURCE};
use crate::http::backend_error;
use crate::models::ObjectInfo;
use crate::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use url::Url;

const BACKEND: &str = "azure-blob";
const STORAGE_API_VERSION: &str = "2021-08-06";

#[async_trait]
pub trait ObjectStore {
    fn container(&self) -> &str;

    /// Creates the container when missing. Returns `true` if it was created.
    async fn ensure_container(&self) -> Result<bool, StoreError>;

    async fn list_objects(&self, suffix: Option<&str>) -> Result<Vec<ObjectInfo>, StoreError>;

    async fn fetch(&self, name: &str) -> Result<Vec<u8>, StoreError>;

    async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<(), StoreError>;
}

pub struct AzureBlobStore {
    client: Client,
    account_url: Url,
    container: String,
    credential: Arc<dyn CredentialProvider + Send + Sync>,
}

impl AzureBlobStore {
    pub fn new(
        client: Client,
        account_url: &str,
        container: impl Into<String>,
        credential: Arc<dyn CredentialProvider + Send + Sync>,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            client,
            account_url: Url::parse(account_url)?,
            container: container.into(),
            credential,
        })
    }

    fn container_url(&self) -> Result<Url, StoreError> {
        self.url_for(None)
    }

    fn blob_url(&self, name: &str) -> Result<Url, StoreError> {
        self.url_for(Some(name))
    }

    fn url_for(&self, blob: Option<&str>) -> Result<Url, StoreError> {
        let mut url = self.account_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                StoreError::Request(format!("account url {} cannot be a base", self.account_url))
            })?;
            segments.pop_if_empty().push(&self.container);
            if let Some(blob) = blob {
                segments.extend(blob.split('/'));
            }
        }
        Ok(url)
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, StoreError> {
        let token = self.credential.token(STORAGE_RESOURCE).await?;
        Ok(request
            .bearer_auth(token.token)
            .header("x-ms-version", STORAGE_API_VERSION)
            .header(
                "x-ms-date",
                Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
            ))
    }
}

#[derive(Debug, Deserialize)]
struct EnumerationResults {
    #[serde(rename = "Blobs", default)]
    blobs: BlobList,
    #[serde(rename = "NextMarker", default)]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BlobList {
    #[serde(rename = "Blob", default)]
    items: Vec<BlobItem>,
}

#[derive(Debug, Deserialize)]
struct BlobItem {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Properties", default)]
    properties: Option<BlobProperties>,
}

#[derive(Debug, Deserialize)]
struct BlobProperties {
    #[serde(rename = "Content-Length", default)]
    content_length: Option<u64>,
}

/// Parses one page of a List Blobs response into objects and the next marker.
fn parse_blob_listing(xml: &str) -> Result<(Vec<ObjectInfo>, Option<String>), StoreError> {
    let parsed: EnumerationResults = quick_xml::de::from_str(xml)?;
    let objects = parsed
        .blobs
        .items
        .into_iter()
        .map(|item| ObjectInfo {
            name: item.name,
            size: item.properties.and_then(|props| props.content_length),
        })
        .collect();
    let marker = parsed
        .next_marker
        .map(|marker| marker.trim().to_string())
        .filter(|marker| !marker.is_empty());
    Ok((objects, marker))
}

fn has_suffix(name: &str, suffix: &str) -> bool {
    name.to_ascii_lowercase()
        .ends_with(&suffix.to_ascii_lowercase())
}

#[async_trait]
impl ObjectStore for AzureBlobStore {
    fn container(&self) -> &str {
        &self.container
    }

    async fn ensure_container(&self) -> Result<bool, StoreError> {
        let mut url = self.container_url()?;
        url.query_pairs_mut().append_pair("restype", "container");

        let response = self
            .authorized(self.client.put(url))
            .await?
            .header("content-length", "0")
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED => Ok(true),
            StatusCode::CONFLICT => Ok(false),
            _ => Err(backend_error(BACKEND, response).await),
        }
    }

    async fn list_objects(&self, suffix: Option<&str>) -> Result<Vec<ObjectInfo>, StoreError> {
        let mut objects = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut url = self.container_url()?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("restype", "container");
                query.append_pair("comp", "list");
                if let Some(marker) = &marker {
                    query.append_pair("marker", marker);
                }
            }

            let response = self.authorized(self.client.get(url)).await?.send().await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Err(StoreError::NotFound {
                    backend: BACKEND.to_string(),
                    name: self.container.clone(),
                });
            }
            if !response.status().is_success() {
                return Err(backend_error(BACKEND, response).await);
            }

            let body = response.text().await?;
            let (page, next) = parse_blob_listing(&body)?;
            objects.extend(
                page.into_iter()
                    .filter(|object| suffix.map_or(true, |suffix| has_suffix(&object.name, suffix))),
            );

            match next {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        Ok(objects)
    }

    async fn fetch(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        let response = self
            .authorized(self.client.get(self.blob_url(name)?))
            .await?
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound {
                backend: BACKEND.to_string(),
                name: name.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(backend_error(BACKEND, response).await);
        }

        Ok(response.bytes().await?.to_vec())
    }

    async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let response = self
            .authorized(self.client.put(self.blob_url(name)?))
            .await?
            .header("x-ms-blob-type", "BlockBlob")
            .header("content-type", "application/pdf")
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(BACKEND, response).await);
        }
        Ok(())
    }
}
