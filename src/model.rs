//! Values returned by the blob store and the projections built from them
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of object a listing entry refers to
///
/// Azure reports the blob type of each entry.  Virtual directories only
/// show up when a listing is made with a delimiter.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum BlobKind {
    Block,
    Page,
    Append,
    Directory,
    Unknown(String),
}

impl BlobKind {
    pub(crate) fn from_blob_type(blob_type: &str) -> Self {
        match blob_type {
            "BlockBlob" | "" => BlobKind::Block,
            "PageBlob" => BlobKind::Page,
            "AppendBlob" => BlobKind::Append,
            other => BlobKind::Unknown(other.to_string()),
        }
    }
}

/// Extended details about a blob, present when the store reports them
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct BlobProperties {
    /// The size of the blob in bytes
    pub content_length: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    /// The time the blob was last written
    pub last_modified: Option<DateTime<Utc>>,
    /// Set when the entry is a snapshot rather than the base blob
    pub snapshot: Option<String>,
}

/// A reference to one object in a container
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct BlobReference {
    /// The name of the blob, unique within its container
    pub name: String,
    /// The URL that addresses the blob's contents
    pub locator: String,
    pub kind: BlobKind,
    pub properties: Option<BlobProperties>,
}

impl BlobReference {
    pub fn new(name: impl Into<String>, locator: impl Into<String>, kind: BlobKind) -> Self {
        Self {
            name: name.into(),
            locator: locator.into(),
            kind,
            properties: None,
        }
    }

    pub fn with_properties(mut self, properties: BlobProperties) -> Self {
        self.properties = Some(properties);
        self
    }
}

/// An opaque cursor handed out by the store when a listing has more pages
///
/// It must be passed back unchanged to fetch the next page.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    /// Wraps a server marker.  Empty markers mean the listing is done and
    /// produce no token.
    pub fn from_marker(marker: Option<String>) -> Option<Self> {
        marker.filter(|m| !m.is_empty()).map(ContinuationToken)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Flags asking the store to return extra details in a listing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ListInclude {
    Snapshots,
    Metadata,
    Uncommitted,
    Copy,
    Deleted,
}

impl ListInclude {
    pub fn as_query_value(&self) -> &'static str {
        match self {
            ListInclude::Snapshots => "snapshots",
            ListInclude::Metadata => "metadata",
            ListInclude::Uncommitted => "uncommittedblobs",
            ListInclude::Copy => "copy",
            ListInclude::Deleted => "deleted",
        }
    }
}

/// A request for a single page of a listing
#[derive(Clone, Debug, Default)]
pub struct ListPageRequest {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    /// Upper bound on entries in the page.  The store may return fewer.
    pub max_results: Option<u32>,
    pub include: Vec<ListInclude>,
    /// Absent for the first page
    pub marker: Option<ContinuationToken>,
}

/// A single page of a listing
#[derive(Clone, Debug, Default)]
pub struct ListPage {
    /// Entries in the order the store returned them
    pub blobs: Vec<BlobReference>,
    /// Present when more entries exist beyond this page
    pub next_marker: Option<ContinuationToken>,
}

/// Options for a single upload
#[derive(Clone, Debug, Default)]
pub struct PutBlobOptions {
    /// Defaults to application/octet-stream
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
}

/// What a photo view needs to render one blob
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct PhotoMetadata {
    pub title: String,
    pub locator: String,
}

impl From<&BlobReference> for PhotoMetadata {
    fn from(blob: &BlobReference) -> Self {
        Self {
            title: title_from_name(&blob.name),
            locator: blob.locator.clone(),
        }
    }
}

fn title_from_name(name: &str) -> String {
    let file_name = name.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    let stem = match file_name.rfind('.') {
        Some(idx) if idx > 0 => &file_name[..idx],
        _ => file_name,
    };
    if stem.is_empty() {
        name.to_string()
    } else {
        stem.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo(name: &str) -> PhotoMetadata {
        PhotoMetadata::from(&BlobReference::new(
            name,
            format!("https://acct.blob.core.windows.net/photos/{name}"),
            BlobKind::Block,
        ))
    }

    #[test]
    fn photo_title_drops_directories_and_extension() {
        assert_eq!(photo("a.png").title, "a");
        assert_eq!(photo("2023/summer/beach.final.jpg").title, "beach.final");
        assert_eq!(photo("README").title, "README");
        assert_eq!(photo(".hidden").title, ".hidden");
        assert_eq!(photo("dir/").title, "dir");
    }

    #[test]
    fn photo_keeps_locator() {
        assert_eq!(
            photo("a.png").locator,
            "https://acct.blob.core.windows.net/photos/a.png"
        );
    }

    #[test]
    fn empty_marker_ends_listing() {
        assert_eq!(ContinuationToken::from_marker(None), None);
        assert_eq!(ContinuationToken::from_marker(Some(String::new())), None);
        assert_eq!(
            ContinuationToken::from_marker(Some("2!64!abc".to_string()))
                .unwrap()
                .as_str(),
            "2!64!abc"
        );
    }

    #[test]
    fn blob_type_maps_to_kind() {
        assert_eq!(BlobKind::from_blob_type("BlockBlob"), BlobKind::Block);
        assert_eq!(BlobKind::from_blob_type("PageBlob"), BlobKind::Page);
        assert_eq!(BlobKind::from_blob_type("AppendBlob"), BlobKind::Append);
        assert_eq!(
            BlobKind::from_blob_type("Mystery"),
            BlobKind::Unknown("Mystery".to_string())
        );
    }
}
