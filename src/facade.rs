//! The two-operation facade an app uses to read and write its photos
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    client::{BlobServiceClient, BlobStoreApi},
    error::{BlobError, Result},
    model::{BlobKind, BlobReference, ListInclude, ListPageRequest, PhotoMetadata, PutBlobOptions},
};

/// The most entries the Azure list API returns in one page
pub const MAX_PAGE_SIZE: u32 = 5000;

/// Options for [`BlobAccess::list_blobs`]
#[derive(Clone, Debug, Default)]
pub struct ListBlobsOptions {
    /// Only blobs whose names start with this prefix are listed
    pub prefix: Option<String>,
    /// How many entries to ask for per round-trip.  The store may return fewer.
    pub page_size_hint: Option<u32>,
    /// Extra details to request from the store
    pub include: Vec<ListInclude>,
    /// Keep only entries of this kind
    pub kind: Option<BlobKind>,
    /// Group names sharing a prefix up to this delimiter into directories
    pub delimiter: Option<String>,
    pub cancellation: Option<CancellationToken>,
}

/// Options for [`BlobAccess::save_blob`]
#[derive(Clone, Debug, Default)]
pub struct SaveBlobOptions {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub cancellation: Option<CancellationToken>,
}

/// Lists and saves blobs through a single shared store handle
///
/// The handle is injected once and never exposed.  Cloning a `BlobAccess`
/// shares the handle.
///
/// ```ignore
/// let access = BlobAccess::from_env()?;
/// let photos = access.list_blobs("photos", Default::default()).await?;
/// ```
#[derive(Clone)]
pub struct BlobAccess {
    store: Arc<dyn BlobStoreApi>,
}

impl BlobAccess {
    pub fn new(store: Arc<dyn BlobStoreApi>) -> Self {
        Self { store }
    }

    /// Builds a facade over Azure using the AZURE_STORAGE_CONNECTION_STRING variable
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(Arc::new(BlobServiceClient::from_env()?)))
    }

    pub fn from_connection_string(conn: &str) -> Result<Self> {
        Ok(Self::new(Arc::new(BlobServiceClient::from_connection_string(
            conn,
        )?)))
    }

    /// Lists every blob in a container, following continuation tokens until
    /// the store reports no more pages
    ///
    /// Pages are fetched one after another and accumulated in store order.
    /// If a page request fails the error is [`BlobError::ListingFailed`]
    /// and carries the blobs gathered so far.
    pub async fn list_blobs(
        &self,
        container: &str,
        options: ListBlobsOptions,
    ) -> Result<Vec<BlobReference>> {
        validate_container(container)?;
        let max_results = match options.page_size_hint {
            Some(0) => {
                return Err(BlobError::InvalidInput(
                    "page size hint must be greater than zero".to_string(),
                ))
            }
            Some(hint) => Some(hint.min(MAX_PAGE_SIZE)),
            None => None,
        };

        let mut blobs = Vec::new();
        let mut marker = None;
        loop {
            let request = ListPageRequest {
                prefix: options.prefix.clone(),
                delimiter: options.delimiter.clone(),
                max_results,
                include: options.include.clone(),
                marker: marker.take(),
            };
            let page = match cancellable(
                options.cancellation.as_ref(),
                self.store.list_page(container, request),
            )
            .await
            {
                Ok(page) => page,
                Err(BlobError::Cancelled()) => return Err(BlobError::Cancelled()),
                Err(err) => {
                    warn!(
                        "listing container {} failed after {} blobs: {}",
                        container,
                        blobs.len(),
                        err
                    );
                    return Err(BlobError::ListingFailed {
                        partial: blobs,
                        source: Box::new(err),
                    });
                }
            };

            blobs.extend(
                page.blobs
                    .into_iter()
                    .filter(|blob| options.kind.as_ref().map_or(true, |k| *k == blob.kind)),
            );

            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        debug!("listed {} blobs in container {}", blobs.len(), container);
        Ok(blobs)
    }

    /// Uploads `bytes` as `name` in a single request
    ///
    /// An existing blob with the same name is replaced.
    pub async fn save_blob(
        &self,
        container: &str,
        bytes: impl Into<Bytes>,
        name: &str,
        options: SaveBlobOptions,
    ) -> Result<BlobReference> {
        validate_container(container)?;
        if name.is_empty() {
            return Err(BlobError::required("name"));
        }
        let put_options = PutBlobOptions {
            content_type: options.content_type,
            cache_control: options.cache_control,
        };

        match cancellable(
            options.cancellation.as_ref(),
            self.store.put(container, name, bytes.into(), put_options),
        )
        .await
        {
            Ok(blob) => Ok(blob),
            Err(BlobError::Cancelled()) => Err(BlobError::Cancelled()),
            Err(err) => {
                warn!("upload of {} to container {} failed: {}", name, container, err);
                Err(BlobError::UploadFailed {
                    source: Box::new(err),
                })
            }
        }
    }

    /// Downloads the current contents of a blob
    pub async fn fetch_blob(&self, container: &str, name: &str) -> Result<Bytes> {
        validate_container(container)?;
        self.store.download(container, name).await
    }

    pub async fn delete_blob(&self, container: &str, name: &str) -> Result<()> {
        validate_container(container)?;
        self.store.del(container, name).await
    }

    /// Lists the container and projects its first block blob for display
    ///
    /// Only block blobs are photos, so any `kind` in `options` is replaced
    /// with [`BlobKind::Block`].  The other options apply as given.
    pub async fn first_photo(
        &self,
        container: &str,
        options: ListBlobsOptions,
    ) -> Result<Option<PhotoMetadata>> {
        let blobs = self
            .list_blobs(
                container,
                ListBlobsOptions {
                    kind: Some(BlobKind::Block),
                    ..options
                },
            )
            .await?;
        Ok(blobs.first().map(PhotoMetadata::from))
    }
}

async fn cancellable<T>(
    cancellation: Option<&CancellationToken>,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    match cancellation {
        Some(token) => {
            if token.is_cancelled() {
                return Err(BlobError::Cancelled());
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(BlobError::Cancelled()),
                result = operation => result,
            }
        }
        None => operation.await,
    }
}

/// Checks a container name against the Azure naming rules
pub fn validate_container(container: &str) -> Result<()> {
    if container.is_empty() {
        return Err(BlobError::required("container"));
    }
    if matches!(container, "$root" | "$web" | "$logs") {
        return Ok(());
    }
    let valid = (3..=63).contains(&container.len())
        && container
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !container.starts_with('-')
        && !container.ends_with('-')
        && !container.contains("--");
    if valid {
        Ok(())
    } else {
        Err(BlobError::InvalidInput(format!(
            "{container} is not a valid container name"
        )))
    }
}
