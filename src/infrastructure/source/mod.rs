pub mod fetcher;

pub use fetcher::{normalize_remote_url, HttpSourceFetcher};
