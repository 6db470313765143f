use std::sync::Arc;

use all_asserts::assert_true;
use bytes::Bytes;
use futures::stream;
use futures::stream::StreamExt;
use futures::stream::TryStreamExt;

use blob_photos::auth::{ConnectionString, StorageCredential};
use blob_photos::client::BlobServiceClient;
use blob_photos::client::BlobStoreApi;
use blob_photos::error::BlobError;
use blob_photos::facade::BlobAccess;
use blob_photos::facade::ListBlobsOptions;
use blob_photos::facade::SaveBlobOptions;
use once_cell::sync::Lazy;
use serial_test::serial;

/// These integration tests run against a real Azure storage account.  As a result they
/// are ignored by default.  To run them, set the environment variable
/// AZURE_STORAGE_TEST_CONNECTION_STRING to a connection string with read/write access,
/// and create a container named `blob-photos-test`.  An Azurite emulator works too
/// (`UseDevelopmentStorage=true`).
///
/// Note that these tests will delete blobs (hopefully only blobs starting with
/// `blob_photos_unittest` but be careful).

const CONTAINER: &str = "blob-photos-test";

static CLIENT: Lazy<Arc<BlobServiceClient>> = Lazy::new(|| {
    let conn = std::env::var("AZURE_STORAGE_TEST_CONNECTION_STRING").unwrap();
    Arc::new(BlobServiceClient::from_connection_string(&conn).unwrap())
});

fn access() -> BlobAccess {
    BlobAccess::new(CLIENT.clone())
}

fn unittest_prefix() -> ListBlobsOptions {
    ListBlobsOptions {
        prefix: Some("blob_photos_unittest".to_string()),
        ..Default::default()
    }
}

async fn delete_all_files(access: &BlobAccess) {
    let all_files = access.list_blobs(CONTAINER, unittest_prefix()).await.unwrap();

    stream::iter(
        all_files
            .iter()
            .map(|blob| access.delete_blob(CONTAINER, &blob.name)),
    )
    .buffer_unordered(10)
    .try_for_each(|_| async { Ok(()) })
    .await
    .unwrap();
}

async fn count_files(access: &BlobAccess) -> usize {
    access
        .list_blobs(CONTAINER, unittest_prefix())
        .await
        .unwrap()
        .len()
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_delete_and_list() {
    let access = access();

    delete_all_files(&access).await;

    assert_eq!(count_files(&access).await, 0);

    access
        .save_blob(
            CONTAINER,
            "some content",
            "blob_photos_unittest/a.txt",
            SaveBlobOptions {
                content_type: Some("text/plain".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(count_files(&access).await, 1);

    delete_all_files(&access).await;

    assert_eq!(count_files(&access).await, 0);
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_paging() {
    let access = access();

    delete_all_files(&access).await;

    for idx in 0..10 {
        access
            .save_blob(
                CONTAINER,
                "some content",
                &format!("blob_photos_unittest/a{}.txt", idx),
                Default::default(),
            )
            .await
            .unwrap();
    }

    let first_page = CLIENT
        .list_page(
            CONTAINER,
            blob_photos::model::ListPageRequest {
                prefix: Some("blob_photos_unittest/".to_string()),
                max_results: Some(6),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(first_page.blobs.len(), 6);
    assert_true!(first_page.next_marker.is_some());

    let all_files = access
        .list_blobs(
            CONTAINER,
            ListBlobsOptions {
                prefix: Some("blob_photos_unittest/".to_string()),
                page_size_hint: Some(6),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let names = all_files.iter().map(|b| b.name.clone()).collect::<Vec<_>>();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names.len(), 10);
    assert_eq!(names, sorted);
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_save_is_visible_to_list() {
    let access = access();

    delete_all_files(&access).await;

    let saved = access
        .save_blob(
            CONTAINER,
            vec![7_u8; 17],
            "blob_photos_unittest/new.png",
            SaveBlobOptions {
                content_type: Some("image/png".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(saved.name, "blob_photos_unittest/new.png");

    let found = access
        .list_blobs(
            CONTAINER,
            ListBlobsOptions {
                prefix: Some("blob_photos_unittest/new".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "blob_photos_unittest/new.png");
    assert_eq!(found[0].properties.as_ref().unwrap().content_length, 17);
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_save_overwrites() {
    let access = access();

    delete_all_files(&access).await;

    for contents in ["some content", "different content"] {
        access
            .save_blob(
                CONTAINER,
                contents,
                "blob_photos_unittest/a.txt",
                Default::default(),
            )
            .await
            .unwrap();
    }

    assert_eq!(count_files(&access).await, 1);
    let contents = access
        .fetch_blob(CONTAINER, "blob_photos_unittest/a.txt")
        .await
        .unwrap();
    assert_eq!(contents, Bytes::from_static(b"different content"));
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_missing_container() {
    let access = access();

    let err = access
        .list_blobs("blob-photos-missing", Default::default())
        .await
        .unwrap_err();

    assert_true!(err.is_invalid_container());
    assert_true!(err.partial_result().unwrap().is_empty());
}

#[tokio::test]
#[serial]
#[ignore]
async fn test_invalid_key() {
    // Same endpoint as the test account (so Azurite stays local) with a wrong key
    let conn = std::env::var("AZURE_STORAGE_TEST_CONNECTION_STRING").unwrap();
    let mut connection = ConnectionString::parse(&conn).unwrap();
    let account = match &connection.credential {
        StorageCredential::SharedKey { account, .. } => account.clone(),
        StorageCredential::SasToken(_) => "devstoreaccount1".to_string(),
    };
    connection.credential = StorageCredential::SharedKey {
        account,
        key: b"foo".to_vec(),
    };
    let bad = BlobAccess::new(Arc::new(BlobServiceClient::new(connection)));

    let err = bad
        .list_blobs(CONTAINER, Default::default())
        .await
        .unwrap_err();
    match err {
        BlobError::ListingFailed { source, .. } => match *source {
            BlobError::Forbidden(_) => {}
            other => panic!("Expected Forbidden error when passed a bad key, got {other:?}"),
        },
        _ => panic!("Expected a listing failure when passed a bad key"),
    }
}
