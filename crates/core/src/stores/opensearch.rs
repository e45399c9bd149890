use crate::http::{backend_error, is_batch_rejection, response_details};
use crate::models::{FailedRecord, IndexRecord, IndexSchema, IndexStatus, UploadResult};
use crate::traits::IndexStore;
use crate::StoreError;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::StatusCode;
use serde_json::{json, Value};

const BACKEND: &str = "opensearch";

pub struct OpenSearchStore {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl OpenSearchStore {
    pub fn new(client: Client, endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("ApiKey {key}")),
            None => request,
        }
    }

    async fn existing_dimension(&self, index_name: &str) -> Result<Option<u64>, StoreError> {
        let response = self
            .with_auth(
                self.client
                    .get(format!("{}/{}/_mapping", self.endpoint, index_name)),
            )
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(BACKEND, response).await);
        }

        let mapping: Value = response.json().await?;
        Ok(mapping
            .pointer(&format!(
                "/{index_name}/mappings/properties/embedding/dimension"
            ))
            .and_then(Value::as_u64))
    }
}

fn mapping_for(schema: &IndexSchema) -> Value {
    let mut properties = serde_json::Map::new();
    for field in &schema.fields {
        let mapping = match field.kind {
            crate::models::FieldKind::Key => json!({"type": "keyword"}),
            crate::models::FieldKind::Searchable => json!({"type": "text"}),
            crate::models::FieldKind::Vector { dimensions } => {
                json!({"type": "knn_vector", "dimension": dimensions})
            }
        };
        properties.insert(field.name.clone(), mapping);
    }

    json!({
        "settings": {
            "number_of_shards": 1,
            "number_of_replicas": 0,
            "index": { "knn": true }
        },
        "mappings": { "properties": properties }
    })
}

/// Per-item failures from a `_bulk` response.
fn bulk_failures(response: &Value) -> Vec<FailedRecord> {
    if !response.get("errors").and_then(Value::as_bool).unwrap_or(false) {
        return Vec::new();
    }

    response
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("index"))
                .filter(|action| action.get("error").is_some())
                .map(|action| FailedRecord {
                    id: action
                        .get("_id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    status_code: action
                        .get("status")
                        .and_then(Value::as_u64)
                        .map(|status| status as u16),
                    message: action
                        .pointer("/error/reason")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown bulk error")
                        .to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl IndexStore for OpenSearchStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn ensure_index(&self, schema: &IndexSchema) -> Result<IndexStatus, StoreError> {
        let response = self
            .with_auth(self.client.head(format!("{}/{}", self.endpoint, schema.name)))
            .send()
            .await?;

        if response.status() == StatusCode::OK {
            let wanted = schema.vector_dimensions().map(|dims| dims as u64);
            let existing = self.existing_dimension(&schema.name).await?;
            if wanted.is_some() && existing != wanted {
                return Err(StoreError::Schema {
                    index: schema.name.clone(),
                    details: format!(
                        "embedding dimension is {existing:?}, expected {wanted:?}"
                    ),
                });
            }
            return Ok(IndexStatus::AlreadyPresent);
        }

        if response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(BACKEND, response).await);
        }

        let response = self
            .with_auth(self.client.put(format!("{}/{}", self.endpoint, schema.name)))
            .json(&mapping_for(schema))
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
        let mut operations = Vec::new();

        for record in records {
            operations.push(json!({
                "index": {
                    "_index": index_name,
                    "_id": record.id,
                }
            }));
            operations.push(json!({
                "id": record.id,
                "name": record.name,
                "description": record.description,
                "embedding": record.embedding,
            }));
        }

        if operations.is_empty() {
            return Ok(UploadResult::default());
        }

        let payload: String = operations
            .into_iter()
            .map(|value| serde_json::to_string(&value))
            .collect::<Result<Vec<_>, serde_json::Error>>()?
            .join("\n")
            + "\n";

        let response = self
            .with_auth(self.client.post(format!("{}/_bulk", self.endpoint)))
            .header("Content-Type", "application/x-ndjson")
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        if is_batch_rejection(status) {
            let details = response_details(response).await;
            return Ok(UploadResult::rejected_batch(records, status.as_u16(), &details));
        }
        if !status.is_success() {
            return Err(backend_error(BACKEND, response).await);
        }

        let body: Value = response.json().await?;
        let failed = bulk_failures(&body);
        Ok(UploadResult {
            succeeded: records.len().saturating_sub(failed.len()),
            failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{build_client, DEFAULT_REQUEST_TIMEOUT};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> OpenSearchStore {
        OpenSearchStore::new(build_client(DEFAULT_REQUEST_TIMEOUT).unwrap(), server.uri(), None)
    }

    #[test]
    fn mapping_uses_knn_vector_for_embeddings() {
        let mapping = mapping_for(&IndexSchema::for_records("docs", 8));
        assert_eq!(
            mapping.pointer("/mappings/properties/embedding/type"),
            Some(&json!("knn_vector"))
        );
        assert_eq!(
            mapping.pointer("/mappings/properties/embedding/dimension"),
            Some(&json!(8))
        );
        assert_eq!(
            mapping.pointer("/mappings/properties/id/type"),
            Some(&json!("keyword"))
        );
    }

    #[tokio::test]
    async fn missing_index_is_created() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/docs"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/docs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"acknowledged": true})))
            .expect(1)
            .mount(&server)
            .await;

        let status = store(&server)
            .ensure_index(&IndexSchema::for_records("docs", 4))
            .await
            .unwrap();
        assert_eq!(status, IndexStatus::Created);
    }

    #[tokio::test]
    async fn existing_index_with_other_dimension_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/docs"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/docs/_mapping"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "docs": { "mappings": { "properties": {
                    "embedding": { "type": "knn_vector", "dimension": 16 }
                } } }
            })))
            .mount(&server)
            .await;

        let result = store(&server)
            .ensure_index(&IndexSchema::for_records("docs", 4))
            .await;
        assert!(matches!(result, Err(StoreError::Schema { .. })));
    }

    #[tokio::test]
    async fn bulk_item_errors_become_failed_records() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("Content-Type", "application/x-ndjson"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": true,
                "items": [
                    { "index": { "_id": "a", "status": 201 } },
                    { "index": { "_id": "b", "status": 400,
                                 "error": { "type": "mapper_parsing_exception", "reason": "bad vector" } } }
                ]
            })))
            .mount(&server)
            .await;

        let records = ["a", "b"]
            .iter()
            .map(|id| IndexRecord {
                id: id.to_string(),
                name: "manual.pdf".to_string(),
                description: "text".to_string(),
                embedding: vec![0.0; 4],
            })
            .collect::<Vec<_>>();

        let result = store(&server).upsert("docs", &records).await.unwrap();
        assert_eq!(result.succeeded, 1);
        assert_eq!(result.failed[0].id, "b");
        assert_eq!(result.failed[0].message, "bad vector");
    }

    #[tokio::test]
    async fn refused_bulk_request_rejects_every_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "type": "illegal_argument_exception" }
            })))
            .mount(&server)
            .await;

        let record = IndexRecord {
            id: "a".to_string(),
            name: "manual.pdf".to_string(),
            description: "text".to_string(),
            embedding: vec![0.0; 4],
        };

        let result = store(&server).upsert("docs", &[record]).await.unwrap();
        assert_eq!(result.succeeded, 0);
        assert_eq!(result.failed[0].id, "a");
        assert_eq!(result.failed[0].status_code, Some(400));
    }
}
