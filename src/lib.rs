//! [Azure Blob Storage](https://learn.microsoft.com/azure/storage/blobs/) keeps the
//! photos of an app in named containers.
//!
//! This crate supplies a rust client for listing and uploading those blobs, and a
//! small facade, [`BlobAccess`], that an app talks to instead of the storage account.
//!
//! [`BlobAccess`]: crate::facade::BlobAccess
//!
//! The facade is built once from a connection string and shared:
//!
//! ```ignore
//! use blob_photos::facade::{BlobAccess, ListBlobsOptions};
//!
//! let access = BlobAccess::from_connection_string(
//!     "DefaultEndpointsProtocol=https;AccountName=photostore;AccountKey=<key>;EndpointSuffix=core.windows.net",
//! )?;
//!
//! access
//!     .save_blob("photos", std::fs::read("beach.png")?, "beach.png", Default::default())
//!     .await?;
//!
//! for blob in access.list_blobs("photos", Default::default()).await? {
//!     println!("{} -> {}", blob.name, blob.locator);
//! }
//! ```
//!
//! Listings follow continuation tokens until the container is exhausted.  A listing
//! that fails part way reports the failure and keeps what it had already gathered:
//!
//! ```ignore
//! match access.list_blobs("photos", Default::default()).await {
//!     Ok(blobs) => show(blobs),
//!     Err(BlobError::ListingFailed { partial, source }) => {
//!         show_with_banner(partial, source)
//!     }
//!     Err(other) => return Err(other),
//! }
//! ```
//!
//! A view that only needs one picture can ask for it directly:
//!
//! ```ignore
//! if let Some(photo) = access.first_photo("photos", Default::default()).await? {
//!     render(&photo.title, &photo.locator);
//! }
//! ```
//!
//! Tests can swap the Azure client for an in-process store:
//!
//! ```ignore
//! let store = Arc::new(MemoryBlobStore::new());
//! store.create_container("photos");
//! let access = BlobAccess::new(store);
//! ```

pub mod auth;
pub mod client;
pub mod error;
pub mod facade;
pub mod memory;
pub mod model;
