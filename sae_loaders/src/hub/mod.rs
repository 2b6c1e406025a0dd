mod fetcher;
pub use fetcher::{ArtifactFetcher, FetchError};

mod hub_fetcher;
pub use hub_fetcher::{HubFetcher, HubFetcherBuilder};

mod local_fetcher;
pub use local_fetcher::LocalFetcher;
