use crate::models::{IndexRecord, IndexSchema, IndexStatus, UploadResult};
use crate::StoreError;
use async_trait::async_trait;

pub use crate::object_store::ObjectStore;

#[async_trait]
pub trait IndexStore {
    fn backend(&self) -> &str;

    /// Creates the index when absent; an existing compatible index is a no-op.
    async fn ensure_index(&self, schema: &IndexSchema) -> Result<IndexStatus, StoreError>;

    /// Writes every record, overwriting by id. Rejected records are reported in
    /// the result, accepted ones stay written.
    async fn upsert(
        &self,
        index_name: &str,
        records: &[IndexRecord],
    ) -> Result<UploadResult, StoreError>;
}
