mod backoff;
mod client;
mod listing;
mod session;

pub use backoff::{Backoff, RetryPolicy};
pub use client::{
    ClientConfig, CreateFolder, Existence, HfsClient, HfsError, PutResponse, RemoteDetails,
    UploadMode, UploadPayload,
};
pub use listing::{DirectoryListing, Permissions, RemoteEntry};
pub use session::Session;
