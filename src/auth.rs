//! Connection strings and request signing for the Azure Blob Storage API
use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Request, Url};
use sha2::Sha256;

use crate::error::{BlobError, Result};

const DEVELOPMENT_ACCOUNT: &str = "devstoreaccount1";
const DEVELOPMENT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";
const DEVELOPMENT_ENDPOINT: &str = "http://127.0.0.1:10000/devstoreaccount1";
const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

/// How requests to the storage account are authorized
#[derive(Clone)]
pub enum StorageCredential {
    /// Requests are signed with the account's shared key
    SharedKey { account: String, key: Vec<u8> },
    /// A shared access signature is appended to every request URL
    SasToken(String),
}

// Custom implementation of Debug to avoid printing secrets
impl std::fmt::Debug for StorageCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageCredential::SharedKey { account, .. } => f
                .debug_struct("SharedKey")
                .field("account", account)
                .field("key", &"**********")
                .finish(),
            StorageCredential::SasToken(_) => f.debug_tuple("SasToken").field(&"**********").finish(),
        }
    }
}

/// The parts of a storage connection string this crate understands
///
/// A connection string looks like:
///
/// ```txt
/// DefaultEndpointsProtocol=https;AccountName=photostore;
/// AccountKey=<account-key>;EndpointSuffix=core.windows.net
/// ```
///
/// `UseDevelopmentStorage=true` points at a local Azurite emulator.
#[derive(Clone, Debug)]
pub struct ConnectionString {
    /// The blob service endpoint, without a trailing slash
    pub blob_endpoint: String,
    pub credential: StorageCredential,
}

impl ConnectionString {
    pub fn parse(conn: &str) -> Result<Self> {
        let conn = conn.trim().replace(['\n', '\r'], "");

        let mut conn_map: HashMap<&str, &str> = HashMap::new();
        for entry in conn.split(';') {
            // Entries without '=' are ignored
            if let Some((key, value)) = entry.split_once('=') {
                conn_map.insert(key.trim(), value.trim());
            }
        }

        if conn_map
            .get("UseDevelopmentStorage")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        {
            return Ok(Self::development());
        }

        let account_name = conn_map.get("AccountName").copied();

        let credential = if let Some(sas) = conn_map.get("SharedAccessSignature") {
            StorageCredential::SasToken(sas.trim_start_matches('?').to_string())
        } else {
            let account = account_name.ok_or_else(|| missing("AccountName"))?;
            let key = conn_map.get("AccountKey").ok_or_else(|| missing("AccountKey"))?;
            let key = BASE64_STANDARD
                .decode(key)
                .map_err(|e| BlobError::ConfigInvalid(format!("AccountKey is not base64: {e}")))?;
            StorageCredential::SharedKey {
                account: account.to_string(),
                key,
            }
        };

        let blob_endpoint = if let Some(endpoint) = conn_map.get("BlobEndpoint") {
            endpoint.to_string()
        } else {
            let account = account_name.ok_or_else(|| missing("AccountName"))?;
            let protocol = conn_map
                .get("DefaultEndpointsProtocol")
                .copied()
                .unwrap_or("https");
            let suffix = conn_map
                .get("EndpointSuffix")
                .copied()
                .unwrap_or(DEFAULT_ENDPOINT_SUFFIX);
            format!("{protocol}://{account}.blob.{suffix}")
        };

        Ok(Self {
            blob_endpoint: blob_endpoint.trim_end_matches('/').to_string(),
            credential,
        })
    }

    /// The well known account served by the Azurite emulator
    pub fn development() -> Self {
        Self {
            blob_endpoint: DEVELOPMENT_ENDPOINT.to_string(),
            credential: StorageCredential::SharedKey {
                account: DEVELOPMENT_ACCOUNT.to_string(),
                // The constant is valid base64
                key: BASE64_STANDARD.decode(DEVELOPMENT_KEY).unwrap_or_default(),
            },
        }
    }
}

fn missing(key: &str) -> BlobError {
    BlobError::ConfigInvalid(format!("connection string must have {key}"))
}

impl StorageCredential {
    /// Authorizes a fully built request.  `x-ms-date` and `x-ms-version` must
    /// already be set.
    pub(crate) fn authorize(&self, request: &mut Request) -> Result<()> {
        match self {
            StorageCredential::SasToken(token) => {
                let url = request.url_mut();
                let query = match url.query() {
                    Some(q) if !q.is_empty() => format!("{q}&{token}"),
                    _ => token.clone(),
                };
                url.set_query(Some(&query));
            }
            StorageCredential::SharedKey { account, key } => {
                let content_length = request
                    .body()
                    .and_then(|b| b.as_bytes())
                    .map(|b| b.len())
                    .unwrap_or(0);
                let to_sign = string_to_sign(
                    request.method().as_str(),
                    request.url(),
                    request.headers(),
                    content_length,
                    account,
                );
                let signature = sign(key, &to_sign)?;
                let value = HeaderValue::from_str(&format!("SharedKey {account}:{signature}"))
                    .map_err(|e| BlobError::ConfigInvalid(e.to_string()))?;
                request.headers_mut().insert(AUTHORIZATION, value);
            }
        }
        Ok(())
    }
}

fn sign(key: &[u8], to_sign: &str) -> Result<String> {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| BlobError::ConfigInvalid(format!("invalid account key: {e}")))?;
    mac.update(to_sign.as_bytes());
    Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
}

/// Builds the Shared Key string-to-sign.
///
/// ```txt
/// VERB\nContent-Encoding\nContent-Language\nContent-Length\nContent-MD5\n
/// Content-Type\nDate\nIf-Modified-Since\nIf-Match\nIf-None-Match\n
/// If-Unmodified-Since\nRange\nCanonicalizedHeaders\nCanonicalizedResource
/// ```
///
/// Content-Length is left empty when zero.
pub(crate) fn string_to_sign(
    method: &str,
    url: &Url,
    headers: &HeaderMap,
    content_length: usize,
    account: &str,
) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    };
    let content_length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };

    let mut ms_headers: Vec<(String, String)> = headers
        .iter()
        .filter(|(name, _)| name.as_str().starts_with("x-ms-"))
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or("").trim().to_string(),
            )
        })
        .collect();
    ms_headers.sort_by(|a, b| a.0.cmp(&b.0));
    let canonicalized_headers = ms_headers
        .iter()
        .map(|(k, v)| format!("{k}:{v}\n"))
        .collect::<String>();

    let mut canonicalized_resource = format!("/{}{}", account, url.path());
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.to_lowercase(), v.into_owned()))
        .collect();
    params.sort();
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for (k, v) in params {
        match grouped.last_mut() {
            Some((last, values)) if *last == k => values.push(v),
            _ => grouped.push((k, vec![v])),
        }
    }
    for (k, values) in grouped {
        canonicalized_resource.push_str(&format!("\n{}:{}", k, values.join(",")));
    }

    format!(
        "{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}\n{}{}",
        method,
        header("content-encoding"),
        header("content-language"),
        content_length,
        header("content-md5"),
        header("content-type"),
        header("date"),
        header("if-modified-since"),
        header("if-match"),
        header("if-none-match"),
        header("if-unmodified-since"),
        header("range"),
        canonicalized_headers,
        canonicalized_resource,
    )
}
