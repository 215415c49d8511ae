//! Feed fetching plus filesystem-backed repository, publisher and notifier
//! adapters for the LMS importer.

mod fetch;
mod notify;
mod repository;

pub use fetch::{
    classify_reqwest_error, classify_status, BackoffPolicy, FeedFetcher, FetchError, FetchedFeed,
    HttpClientConfig, RetryDisposition,
};
pub use notify::WebhookNotifier;
pub use repository::{FsContentRepository, FsPublisher, FsSession, ReplicationRecord};

pub const CRATE_NAME: &str = "lms-storage";
