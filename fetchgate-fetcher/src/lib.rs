pub mod client;
pub mod error;
pub mod fetcher;
pub mod remote;
pub mod request;
pub mod result;

pub use client::HttpFetcher;
pub use error::FetchError;
pub use fetcher::{Fetcher, IntegrationMode};
pub use remote::RemoteFetcher;
pub use request::{BulkFetchRequest, FetchRequest, HttpMethod};
pub use result::{FailureKind, FetchResult};
