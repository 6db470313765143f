//! A Rust definition of the blob store API and an HTTP client for Azure Blob Storage
use std::env;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::debug;
use once_cell::sync::Lazy;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, Method, Request, Response, StatusCode, Url};
use serde::Deserialize;

use crate::{
    auth::{ConnectionString, StorageCredential},
    error::{BlobError, Result},
    model::{
        BlobKind, BlobProperties, BlobReference, ContinuationToken, ListPage, ListPageRequest,
        PutBlobOptions,
    },
};

const BLOB_API_VERSION: &str = "2021-08-06";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
static GLOBAL_CLIENT: Lazy<Client> = Lazy::new(Client::new);

/// Everything except unreserved characters and '/' is encoded in blob paths
const BLOB_NAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Functions a backing blob store must provide
///
/// [`BlobServiceClient`] talks to Azure.  [`MemoryBlobStore`] keeps blobs in
/// process and is handy in tests.
///
/// [`MemoryBlobStore`]: crate::memory::MemoryBlobStore
#[async_trait]
pub trait BlobStoreApi: Send + Sync {
    /// Lists one page of blobs in a container
    ///
    /// # Arguments
    ///
    /// * `container` - The container to list
    /// * `request` - Filters, page size and the marker from the previous page
    ///
    /// # Returns
    ///
    /// The blobs in the page, in store order, and a marker if more pages exist
    async fn list_page(&self, container: &str, request: ListPageRequest) -> Result<ListPage>;

    /// Uploads a blob in a single request, replacing any blob with the same name
    ///
    /// # Arguments
    ///
    /// * `container` - The destination container
    /// * `name` - The destination blob name
    /// * `body` - The full contents of the blob
    /// * `options` - Options for the put operation
    ///
    /// # Returns
    ///
    /// A reference to the written blob
    async fn put(
        &self,
        container: &str,
        name: &str,
        body: Bytes,
        options: PutBlobOptions,
    ) -> Result<BlobReference>;

    /// Downloads the full contents of a blob
    async fn download(&self, container: &str, name: &str) -> Result<Bytes>;

    /// Deletes a blob
    async fn del(&self, container: &str, name: &str) -> Result<()>;
}

/// A client for the Azure Blob Storage REST API
///
/// One client is built per connection string and can be shared freely.  The
/// underlying HTTP connection pool is process wide.
#[derive(Debug)]
pub struct BlobServiceClient {
    /// How requests are authorized
    credential: StorageCredential,
    /// The blob service endpoint, e.g. https://account.blob.core.windows.net
    base_url: String,
    /// The value sent in the x-ms-version header
    api_version: String,
}

#[derive(Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct BlobApiError {
    code: String,
    message: String,
}

impl BlobServiceClient {
    pub fn new(connection: ConnectionString) -> Self {
        Self {
            credential: connection.credential,
            base_url: connection.blob_endpoint,
            api_version: Self::get_api_version(),
        }
    }

    pub fn from_connection_string(conn: &str) -> Result<Self> {
        Ok(Self::new(ConnectionString::parse(conn)?))
    }

    /// Creates a client from the AZURE_STORAGE_CONNECTION_STRING environment variable
    pub fn from_env() -> Result<Self> {
        let conn = env::var("AZURE_STORAGE_CONNECTION_STRING")
            .map_err(|_| BlobError::NotAuthenticated())?;
        Self::from_connection_string(&conn)
    }

    fn get_api_version() -> String {
        env::var("AZURE_STORAGE_API_VERSION_OVERRIDE")
            .unwrap_or_else(|_| BLOB_API_VERSION.to_string())
    }

    fn container_url(&self, container: &str) -> Result<Url> {
        let url = format!("{}/{}", self.base_url, container);
        Url::parse(&url).map_err(|e| BlobError::ConfigInvalid(format!("bad url {url}: {e}")))
    }

    fn blob_url(&self, container: &str, name: &str) -> Result<Url> {
        let url = format!(
            "{}/{}/{}",
            self.base_url,
            container,
            utf8_percent_encode(name, BLOB_NAME_ENCODE_SET)
        );
        Url::parse(&url).map_err(|e| BlobError::ConfigInvalid(format!("bad url {url}: {e}")))
    }

    fn build_request(
        &self,
        method: Method,
        url: Url,
        headers: &[(&'static str, String)],
        body: Option<Bytes>,
    ) -> Result<Request> {
        let mut request = GLOBAL_CLIENT
            .request(method, url)
            .header("x-ms-date", http_date(Utc::now()))
            .header("x-ms-version", self.api_version.clone());
        for (name, value) in headers {
            request = request.header(*name, value);
        }
        if let Some(body) = body {
            request = request.header(CONTENT_LENGTH, body.len()).body(body);
        }
        let mut request = request.build()?;
        self.credential.authorize(&mut request)?;
        Ok(request)
    }

    async fn send(&self, request: Request) -> Result<Response> {
        Ok(GLOBAL_CLIENT.execute(request).await?)
    }

    async fn handle_error(response: Response) -> BlobError {
        let status = response.status();
        if status.as_u16() >= 500 {
            return BlobError::unknown_error(status);
        }
        let header_code = response
            .headers()
            .get("x-ms-error-code")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let error = match response.bytes().await {
            Ok(body) => quick_xml::de::from_reader::<_, BlobApiError>(body.as_ref())
                .unwrap_or_default(),
            Err(_) => BlobApiError::default(),
        };
        let code = header_code.unwrap_or(error.code);
        match (status, code.as_str()) {
            (_, "ContainerNotFound") => BlobError::ContainerNotFound(),
            (_, "BlobNotFound") => BlobError::BlobNotFound(),
            (StatusCode::FORBIDDEN, _) => BlobError::Forbidden(code.clone()),
            (StatusCode::BAD_REQUEST, _) => BlobError::BadRequest(if error.message.is_empty() {
                code.clone()
            } else {
                error.message.replace('\n', " ")
            }),
            _ => BlobError::unknown_error(status),
        }
    }

    fn reference_from_xml(&self, container: &str, blob: BlobXml) -> Result<BlobReference> {
        let mut locator = self.blob_url(container, &blob.name)?;
        let snapshot = blob.snapshot.filter(|s| !s.is_empty());
        if let Some(snapshot) = &snapshot {
            locator.query_pairs_mut().append_pair("snapshot", snapshot);
        }
        let props = blob.properties;
        let properties = BlobProperties {
            content_length: props.content_length,
            content_type: props.content_type.filter(|v| !v.is_empty()),
            etag: Some(props.etag).filter(|v| !v.is_empty()),
            last_modified: DateTime::parse_from_rfc2822(&props.last_modified)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            snapshot,
        };
        Ok(BlobReference::new(
            blob.name,
            locator.to_string(),
            BlobKind::from_blob_type(&props.blob_type),
        )
        .with_properties(properties))
    }
}

/// Formats a timestamp the way the x-ms-date header expects (RFC 1123)
fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct EnumerationResults {
    blobs: BlobsXml,
    next_marker: Option<String>,
}

#[derive(Default, Debug, Deserialize)]
#[serde(default)]
struct BlobsXml {
    // Blobs and prefixes are interleaved in name order
    #[serde(rename = "$value")]
    entries: Vec<BlobEntryXml>,
}

#[derive(Debug, Deserialize)]
enum BlobEntryXml {
    Blob(BlobXml),
    BlobPrefix(BlobPrefixXml),
}

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct BlobPrefixXml {
    name: String,
}

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct BlobXml {
    name: String,
    snapshot: Option<String>,
    properties: PropertiesXml,
}

#[derive(Default, Debug, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct PropertiesXml {
    #[serde(rename = "Content-Length")]
    content_length: u64,
    #[serde(rename = "Content-Type")]
    content_type: Option<String>,
    #[serde(rename = "Last-Modified")]
    last_modified: String,
    etag: String,
    blob_type: String,
}

#[async_trait]
impl BlobStoreApi for BlobServiceClient {
    async fn list_page(&self, container: &str, request: ListPageRequest) -> Result<ListPage> {
        let mut url = self.container_url(container)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("restype", "container")
                .append_pair("comp", "list");
            if let Some(prefix) = request.prefix.as_deref().filter(|p| !p.is_empty()) {
                query.append_pair("prefix", prefix);
            }
            if let Some(delimiter) = request.delimiter.as_deref().filter(|d| !d.is_empty()) {
                query.append_pair("delimiter", delimiter);
            }
            if let Some(max_results) = request.max_results {
                query.append_pair("maxresults", &max_results.to_string());
            }
            if !request.include.is_empty() {
                let include = request
                    .include
                    .iter()
                    .map(|i| i.as_query_value())
                    .collect::<Vec<_>>()
                    .join(",");
                query.append_pair("include", &include);
            }
            if let Some(marker) = &request.marker {
                query.append_pair("marker", marker.as_str());
            }
        }

        debug!(
            "listing container {} marker {:?} page size {:?}",
            container, request.marker, request.max_results
        );
        let http_request = self.build_request(Method::GET, url, &[], None)?;
        let rsp = self.send(http_request).await?;

        if rsp.status() != StatusCode::OK {
            return Err(Self::handle_error(rsp).await);
        }

        let body = rsp.bytes().await?;
        let output: EnumerationResults = quick_xml::de::from_reader(body.as_ref())
            .map_err(|e| BlobError::Deserialize(e.to_string()))?;

        let mut blobs = Vec::with_capacity(output.blobs.entries.len());
        for entry in output.blobs.entries {
            match entry {
                BlobEntryXml::Blob(blob) => blobs.push(self.reference_from_xml(container, blob)?),
                BlobEntryXml::BlobPrefix(prefix) => {
                    let locator = self.blob_url(container, &prefix.name)?;
                    blobs.push(BlobReference::new(
                        prefix.name,
                        locator.to_string(),
                        BlobKind::Directory,
                    ))
                }
            }
        }

        Ok(ListPage {
            blobs,
            next_marker: ContinuationToken::from_marker(output.next_marker),
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

        let url = self.blob_url(container, name)?;
        let locator = url.to_string();

        let mut headers = vec![
            ("x-ms-blob-type", "BlockBlob".to_string()),
            (
                "content-type",
                options
                    .content_type
                    .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            ),
        ];
        if let Some(cache_control) = options.cache_control {
            headers.push(("x-ms-blob-cache-control", cache_control));
        }

        debug!(
            "uploading {} bytes to container {} as {}",
            body.len(),
            container,
            name
        );
        let request = self.build_request(Method::PUT, url, &headers, Some(body))?;
        let response = self.send(request).await?;

        if !response.status().is_success() {
            Err(Self::handle_error(response).await)
        } else {
            let etag = response
                .headers()
                .get("etag")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let reference = BlobReference::new(name, locator, BlobKind::Block);
            Ok(match etag {
                Some(etag) => reference.with_properties(BlobProperties {
                    etag: Some(etag),
                    ..Default::default()
                }),
                None => reference,
            })
        }
    }

    async fn download(&self, container: &str, name: &str) -> Result<Bytes> {
        let url = self.blob_url(container, name)?;
        let request = self.build_request(Method::GET, url, &[], None)?;
        let response = self.send(request).await?;

        if response.status() != StatusCode::OK {
            Err(Self::handle_error(response).await)
        } else {
            Ok(response.bytes().await?)
        }
    }

    async fn del(&self, container: &str, name: &str) -> Result<()> {
        let url = self.blob_url(container, name)?;
        let request = self.build_request(Method::DELETE, url, &[], None)?;
        let response = self.send(request).await?;

        if !response.status().is_success() {
            Err(Self::handle_error(response).await)
        } else {
            Ok(())
        }
    }
}
