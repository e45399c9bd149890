use crate::credentials::{CredentialProvider, SEARCH_RESOURCE};
use crate::http::{backend_error, is_batch_rejection, response_details};
use crate::models::{
    FailedRecord, FieldKind, IndexField, IndexRecord, IndexSchema, IndexStatus, UploadResult,
};
use crate::traits::IndexStore;
use crate::StoreError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use url::Url;

const BACKEND: &str = "azure-search";
pub const SEARCH_API_VERSION: &str = "2023-11-01";
const VECTOR_PROFILE: &str = "default-vector-profile";
const VECTOR_ALGORITHM: &str = "default-hnsw";

#[derive(Clone)]
pub enum SearchAuth {
    ApiKey(String),
    Credential(Arc<dyn CredentialProvider + Send + Sync>),
}

pub struct AzureSearchStore {
    client: Client,
    endpoint: Url,
    auth: SearchAuth,
}

#[derive(Debug, Deserialize)]
struct IndexingResponse {
    #[serde(default)]
    value: Vec<IndexingResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexingResult {
    key: String,
    status: bool,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    status_code: Option<u16>,
}

impl AzureSearchStore {
    pub fn new(client: Client, endpoint: &str, auth: SearchAuth) -> Result<Self, StoreError> {
        Ok(Self {
            client,
            endpoint: Url::parse(endpoint)?,
            auth,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.endpoint.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                StoreError::Request(format!("search endpoint {} cannot be a base", self.endpoint))
            })?;
            path.pop_if_empty().extend(segments);
        }
        url.query_pairs_mut()
            .append_pair("api-version", SEARCH_API_VERSION);
        Ok(url)
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, StoreError> {
        Ok(match &self.auth {
            SearchAuth::ApiKey(key) => request.header("api-key", key),
            SearchAuth::Credential(credential) => {
                request.bearer_auth(credential.token(SEARCH_RESOURCE).await?.token)
            }
        })
    }
}

fn field_definition(field: &IndexField) -> Value {
    match field.kind {
        FieldKind::Key => json!({
            "name": field.name,
            "type": "Edm.String",
            "key": true,
            "filterable": true,
        }),
        FieldKind::Searchable => json!({
            "name": field.name,
            "type": "Edm.String",
            "searchable": true,
        }),
        FieldKind::Vector { dimensions } => json!({
            "name": field.name,
            "type": "Collection(Edm.Single)",
            "searchable": true,
            "dimensions": dimensions,
            "vectorSearchProfile": VECTOR_PROFILE,
        }),
    }
}

pub(crate) fn index_definition(schema: &IndexSchema) -> Value {
    json!({
        "name": schema.name,
        "fields": schema.fields.iter().map(field_definition).collect::<Vec<_>>(),
        "vectorSearch": {
            "algorithms": [ { "name": VECTOR_ALGORITHM, "kind": "hnsw" } ],
            "profiles": [ { "name": VECTOR_PROFILE, "algorithm": VECTOR_ALGORITHM } ],
        },
    })
}

fn existing_kind(field: &Value) -> Option<FieldKind> {
    let field_type = field.get("type").and_then(Value::as_str)?;
    let is_key = field.get("key").and_then(Value::as_bool).unwrap_or(false);
    match field_type {
        "Edm.String" if is_key => Some(FieldKind::Key),
        "Edm.String" => Some(FieldKind::Searchable),
        "Collection(Edm.Single)" => {
            let dimensions = field.get("dimensions").and_then(Value::as_u64)? as usize;
            Some(FieldKind::Vector { dimensions })
        }
        _ => None,
    }
}

/// Compares an existing index definition with the requested schema. Extra
/// fields on the existing index are allowed.
pub(crate) fn check_compatible(schema: &IndexSchema, existing: &Value) -> Result<(), StoreError> {
    let fields = existing
        .get("fields")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for wanted in &schema.fields {
        let found = fields
            .iter()
            .find(|field| field.get("name").and_then(Value::as_str) == Some(wanted.name.as_str()));

        let details = match found.map(existing_kind) {
            None => format!("field `{}` is missing", wanted.name),
            Some(kind) if kind == Some(wanted.kind) => continue,
            Some(kind) => format!(
                "field `{}` is {:?}, expected {:?}",
                wanted.name, kind, wanted.kind
            ),
        };

        return Err(StoreError::Schema {
            index: schema.name.clone(),
            details,
        });
    }

    Ok(())
}

#[async_trait]
impl IndexStore for AzureSearchStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn ensure_index(&self, schema: &IndexSchema) -> Result<IndexStatus, StoreError> {
        let response = self
            .authorized(self.client.get(self.url(&["indexes", schema.name.as_str()])?))
            .await?
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let existing: Value = response.json().await?;
                check_compatible(schema, &existing)?;
                return Ok(IndexStatus::AlreadyPresent);
            }
            StatusCode::NOT_FOUND => {}
            _ => return Err(backend_error(BACKEND, response).await),
        }

        tracing::info!(index = %schema.name, "creating search index");
        let response = self
            .authorized(self.client.put(self.url(&["indexes", schema.name.as_str()])?))
            .await?
            .json(&index_definition(schema))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(BACKEND, response).await);
        }

        Ok(IndexStatus::Created)
    }

    async fn upsert(
        &self,
        index_name: &str,
        records: &[IndexRecord],
    ) -> Result<UploadResult, StoreError> {
        if records.is_empty() {
            return Ok(UploadResult::default());
        }

        let value: Vec<Value> = records
            .iter()
            .map(|record| {
                json!({
                    "@search.action": "mergeOrUpload",
                    "id": record.id,
                    "name": record.name,
                    "description": record.description,
                    "embedding": record.embedding,
                })
            })
            .collect();

        let response = self
            .authorized(
                self.client
                    .post(self.url(&["indexes", index_name, "docs", "index"])?),
            )
            .await?
            .json(&json!({ "value": value }))
            .send()
            .await?;

        let status = response.status();
        if is_batch_rejection(status) {
            let details = response_details(response).await;
            return Ok(UploadResult::rejected_batch(records, status.as_u16(), &details));
        }
        if status != StatusCode::OK && status != StatusCode::MULTI_STATUS {
            return Err(backend_error(BACKEND, response).await);
        }

        let parsed: IndexingResponse = response.json().await?;
        let mut result = UploadResult::default();
        for item in parsed.value {
            if item.status {
                result.succeeded += 1;
            } else {
                result.failed.push(FailedRecord {
                    id: item.key,
                    status_code: item.status_code,
                    message: item.error_message.unwrap_or_default(),
                });
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticTokenCredential;
    use crate::http::{build_client, DEFAULT_REQUEST_TIMEOUT};
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> AzureSearchStore {
        AzureSearchStore::new(
            build_client(DEFAULT_REQUEST_TIMEOUT).unwrap(),
            &server.uri(),
            SearchAuth::ApiKey("admin-key".to_string()),
        )
        .unwrap()
    }

    fn record(id: &str) -> IndexRecord {
        IndexRecord {
            id: id.to_string(),
            name: "manual.pdf".to_string(),
            description: "pressure relief".to_string(),
            embedding: vec![0.1, 0.2],
        }
    }

    #[test]
    fn definition_declares_vector_profile() {
        let definition = index_definition(&IndexSchema::for_records("docs", 3));
        assert_eq!(definition["fields"][0]["key"], json!(true));
        assert_eq!(definition["fields"][3]["dimensions"], json!(3));
        assert_eq!(
            definition["fields"][3]["vectorSearchProfile"],
            definition["vectorSearch"]["profiles"][0]["name"]
        );
    }

    #[test]
    fn incompatible_vector_size_is_a_schema_error() {
        let schema = IndexSchema::for_records("docs", 1536);
        let existing = index_definition(&IndexSchema::for_records("docs", 768));
        assert!(matches!(
            check_compatible(&schema, &existing),
            Err(StoreError::Schema { .. })
        ));
        assert!(check_compatible(&schema, &index_definition(&schema)).is_ok());
    }

    #[tokio::test]
    async fn ensure_index_creates_once_then_is_a_no_op() {
        let server = MockServer::start().await;
        let schema = IndexSchema::for_records("docs", 2);

        Mock::given(method("GET"))
            .and(path("/indexes/docs"))
            .and(query_param("api-version", SEARCH_API_VERSION))
            .and(header("api-key", "admin-key"))
            .respond_with(ResponseTemplate::new(404))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/indexes/docs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(index_definition(&schema)))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/indexes/docs"))
            .and(body_partial_json(json!({ "name": "docs" })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let store = store(&server);
        assert_eq!(store.ensure_index(&schema).await.unwrap(), IndexStatus::Created);
        assert_eq!(
            store.ensure_index(&schema).await.unwrap(),
            IndexStatus::AlreadyPresent
        );
    }

    #[tokio::test]
    async fn ensure_index_fails_on_permission_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let result = store(&server)
            .ensure_index(&IndexSchema::for_records("docs", 2))
            .await;
        assert!(matches!(result, Err(StoreError::BackendResponse { .. })));
    }

    #[tokio::test]
    async fn bearer_credential_is_used_without_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer search-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(index_definition(&IndexSchema::for_records("docs", 2))),
            )
            .expect(1)
            .mount(&server)
            .await;

        let store = AzureSearchStore::new(
            build_client(DEFAULT_REQUEST_TIMEOUT).unwrap(),
            &server.uri(),
            SearchAuth::Credential(Arc::new(StaticTokenCredential::new("search-token"))),
        )
        .unwrap();
        let status = store
            .ensure_index(&IndexSchema::for_records("docs", 2))
            .await
            .unwrap();
        assert_eq!(status, IndexStatus::AlreadyPresent);
    }

    #[tokio::test]
    async fn partial_upload_reports_rejected_records() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/indexes/docs/docs/index"))
            .and(body_partial_json(json!({
                "value": [ { "@search.action": "mergeOrUpload", "id": "0" }, { "id": "1" } ]
            })))
            .respond_with(ResponseTemplate::new(207).set_body_json(json!({
                "value": [
                    { "key": "0", "status": true, "errorMessage": null, "statusCode": 201 },
                    { "key": "1", "status": false, "errorMessage": "vector too long", "statusCode": 400 }
                ]
            })))
            .mount(&server)
            .await;

        let result = store(&server)
            .upsert("docs", &[record("0"), record("1")])
            .await
            .unwrap();
        assert_eq!(result.succeeded, 1);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].id, "1");
        assert_eq!(result.failed[0].status_code, Some(400));
    }

    #[tokio::test]
    async fn oversized_batch_becomes_rejected_records() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/indexes/docs/docs/index"))
            .respond_with(ResponseTemplate::new(413).set_body_string("request entity too large"))
            .mount(&server)
            .await;

        let result = store(&server)
            .upsert("docs", &[record("0"), record("1")])
            .await
            .unwrap();
        assert_eq!(result.succeeded, 0);
        assert_eq!(result.failed.len(), 2);
        assert_eq!(result.failed[1].id, "1");
        assert_eq!(result.failed[0].status_code, Some(413));
        assert!(result.failed[0].message.contains("too large"));
    }

    #[tokio::test]
    async fn unavailable_service_is_still_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = store(&server).upsert("docs", &[record("0")]).await;
        assert!(matches!(result, Err(StoreError::BackendResponse { .. })));
    }

    #[tokio::test]
    async fn empty_upsert_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let result = store(&server).upsert("docs", &[]).await.unwrap();
        assert_eq!(result, UploadResult::default());
    }
}
