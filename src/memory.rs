//! An in-process blob store
//!
//! Blobs are kept in memory and listed in name order, the same way Azure
//! orders a listing.  Markers handed out between pages are the name of the
//! next blob to return.  The store counts list round-trips and can be told
//! to fail, which makes it a convenient stand-in for [`BlobServiceClient`]
//! in tests.
//!
//! [`BlobServiceClient`]: crate::client::BlobServiceClient
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;

use crate::{
    client::BlobStoreApi,
    error::{BlobError, Result},
    model::{
        BlobKind, BlobProperties, BlobReference, ContinuationToken, ListPage, ListPageRequest,
        PutBlobOptions,
    },
};

/// Page size used when a listing does not ask for one
const DEFAULT_PAGE_SIZE: usize = 5000;

#[derive(Debug, Clone)]
struct StoredBlob {
    body: Bytes,
    kind: BlobKind,
    properties: BlobProperties,
}

#[derive(Debug, Default)]
struct State {
    containers: HashMap<String, BTreeMap<String, StoredBlob>>,
    /// Fail every list request once this many pages have been served
    fail_list_after: Option<usize>,
    fail_uploads: bool,
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    state: Mutex<State>,
    list_calls: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_container(&self, container: &str) {
        self.lock()
            .containers
            .entry(container.to_string())
            .or_default();
    }

    /// Stores a blob of the given kind directly, bypassing `put`
    pub fn insert(&self, container: &str, name: &str, body: impl Into<Bytes>, kind: BlobKind) {
        let body = body.into();
        let properties = BlobProperties {
            content_length: body.len() as u64,
            last_modified: Some(Utc::now()),
            ..Default::default()
        };
        self.lock()
            .containers
            .entry(container.to_string())
            .or_default()
            .insert(
                name.to_string(),
                StoredBlob {
                    body,
                    kind,
                    properties,
                },
            );
    }

    /// Number of list requests served or refused so far
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Makes list requests fail once `pages` pages have been served
    pub fn fail_list_after(&self, pages: usize) {
        self.lock().fail_list_after = Some(pages);
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.lock().fail_uploads = fail;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock only means another test thread panicked mid-update
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn locator(container: &str, name: &str) -> String {
        format!("memory://{container}/{name}")
    }
}

#[async_trait]
impl BlobStoreApi for MemoryBlobStore {
    async fn list_page(&self, container: &str, request: ListPageRequest) -> Result<ListPage> {
        let served = self.list_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.lock();
        if state.fail_list_after.is_some_and(|limit| served >= limit) {
            return Err(BlobError::UnknownError(
                503,
                "Service Unavailable".to_string(),
            ));
        }
        let blobs = state
            .containers
            .get(container)
            .ok_or(BlobError::ContainerNotFound())?;

        let page_size = request
            .max_results
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .max(1);
        let prefix = request.prefix.unwrap_or_default();
        let delimiter = request.delimiter.filter(|d| !d.is_empty());
        let start = request
            .marker
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        let mut page = Vec::new();
        let mut next_marker = None;
        let mut last_directory: Option<String> = None;
        for (name, blob) in blobs.range(start..) {
            if !name.starts_with(&prefix) {
                continue;
            }
            let directory = delimiter.as_ref().and_then(|d| {
                name[prefix.len()..]
                    .find(d.as_str())
                    .map(|idx| name[..prefix.len() + idx + d.len()].to_string())
            });
            if let Some(dir) = &directory {
                if last_directory.as_ref() == Some(dir) {
                    continue;
                }
            }
            if page.len() == page_size {
                next_marker = Some(name.clone());
                break;
            }
            match directory {
                Some(dir) => {
                    page.push(BlobReference::new(
                        dir.clone(),
                        Self::locator(container, &dir),
                        BlobKind::Directory,
                    ));
                    last_directory = Some(dir);
                }
                None => page.push(
                    BlobReference::new(
                        name.clone(),
                        Self::locator(container, name),
                        blob.kind.clone(),
                    )
                    .with_properties(blob.properties.clone()),
                ),
            }
        }

        Ok(ListPage {
            blobs: page,
            next_marker: ContinuationToken::from_marker(next_marker),
        })
    }

    async fn put(
        &self,
        container: &str,
        name: &str,
        body: Bytes,
        options: PutBlobOptions,
    ) -> Result<BlobReference> {
        if name.is_empty() {
            return Err(BlobError::required("name"));
        }
        let mut state = self.lock();
        if state.fail_uploads {
            return Err(BlobError::UnknownError(
                503,
                "Service Unavailable".to_string(),
            ));
        }
        let blobs = state
            .containers
            .get_mut(container)
            .ok_or(BlobError::ContainerNotFound())?;
        let properties = BlobProperties {
            content_length: body.len() as u64,
            content_type: Some(
                options
                    .content_type
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
            ),
            last_modified: Some(Utc::now()),
            ..Default::default()
        };
        blobs.insert(
            name.to_string(),
            StoredBlob {
                body,
                kind: BlobKind::Block,
                properties: properties.clone(),
            },
        );
        Ok(
            BlobReference::new(name, Self::locator(container, name), BlobKind::Block)
                .with_properties(properties),
        )
    }

    async fn download(&self, container: &str, name: &str) -> Result<Bytes> {
        let state = self.lock();
        let blobs = state
            .containers
            .get(container)
            .ok_or(BlobError::ContainerNotFound())?;
        blobs
            .get(name)
            .map(|b| b.body.clone())
            .ok_or(BlobError::BlobNotFound())
    }

    async fn del(&self, container: &str, name: &str) -> Result<()> {
        let mut state = self.lock();
        let blobs = state
            .containers
            .get_mut(container)
            .ok_or(BlobError::ContainerNotFound())?;
        blobs
            .remove(name)
            .map(|_| ())
            .ok_or(BlobError::BlobNotFound())
    }
}
