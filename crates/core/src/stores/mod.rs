pub mod azure_search;
pub mod opensearch;

pub use azure_search::{AzureSearchStore, SearchAuth, SEARCH_API_VERSION};
pub use opensearch::OpenSearchStore;
