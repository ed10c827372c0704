pub mod browse_api;

pub use browse_api::{BrowseApiClient, BrowseApiConfig, BrowseApiError};
