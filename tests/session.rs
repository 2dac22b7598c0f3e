use std::sync::Arc;
use std::time::Duration;

use aes::Aes128;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockEncryptMut, KeyIvInit};
use httpmock::prelude::*;
use tempfile::tempdir;

use ts_downloader::{download_video, DownloadClient, DownloadError, DownloadTarget, Options, RetryPolicy, SessionOutcome};

const KEY: [u8; 16] = *b"k3y-for-lesson-1";
const IV: [u8; 16] = *b"iv-for-lesson-01";

fn options() -> Options {
    Options {
        segment_count: 4,
        max_parallel_downloads: None,
        retry: RetryPolicy::immediate().with_max_attempts(3),
        timeout: Duration::from_secs(10),
        show_progress: false,
    }
}

fn plaintext() -> Vec<u8> {
    (0..84).map(|i| b'A' + (i % 26) as u8).collect()
}

/// IV followed by the AES-128-CBC ciphertext of the zero-padded plaintext.
fn encrypted(plaintext: &[u8]) -> Vec<u8> {
    let mut padded = plaintext.to_vec();
    padded.resize(padded.len().div_ceil(16) * 16, 0);

    let ciphertext = cbc::Encryptor::<Aes128>::new_from_slices(&KEY, &IV)
        .unwrap()
        .encrypt_padded_vec_mut::<NoPadding>(&padded);

    let mut payload = IV.to_vec();
    payload.extend_from_slice(&ciphertext);
    payload
}

#[tokio::test]
async fn downloads_merges_and_decrypts() {
    let server = MockServer::start_async().await;
    let payload = encrypted(&plaintext());
    assert_eq!(payload.len(), 112);

    let probe = server
        .mock_async(|when, then| {
            when.method(GET).path("/lesson.ts").header_missing("range");
            then.status(200).body(&payload);
        })
        .await;

    let mut ranges = Vec::new();
    for (header, body) in [
        ("bytes=0-27", &payload[0..28]),
        ("bytes=28-55", &payload[28..56]),
        ("bytes=56-83", &payload[56..84]),
        ("bytes=84-", &payload[84..]),
    ] {
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/lesson.ts").header("range", header);
                then.status(206).body(body);
            })
            .await;
        ranges.push(mock);
    }

    let key = server
        .mock_async(|when, then| {
            when.method(GET).path("/key");
            then.status(200).body(KEY);
        })
        .await;

    let dir = tempdir().unwrap();
    let destination = dir.path().join("course").join("chapter 1").join("lesson.ts");
    let target = DownloadTarget::parse(&server.url("/lesson.ts"), &server.url("/key"), &destination).unwrap();

    let options = options();
    let client = Arc::new(DownloadClient::new(&options).unwrap());
    let outcome = download_video(client, &target, &options).await.unwrap();

    assert_eq!(outcome, SessionOutcome::Completed { bytes: 84 });
    assert_eq!(std::fs::read(&destination).unwrap(), plaintext());

    probe.assert_hits_async(1).await;
    key.assert_hits_async(1).await;
    for mock in &ranges {
        mock.assert_hits_async(1).await;
    }

    // only the plaintext is left behind
    let leftovers = std::fs::read_dir(destination.parent().unwrap()).unwrap().count();
    assert_eq!(leftovers, 1);
}

#[tokio::test]
async fn existing_destination_makes_no_requests() {
    let server = MockServer::start_async().await;
    let any = server
        .mock_async(|when, then| {
            when.method(GET);
            then.status(200).body("unexpected");
        })
        .await;

    let dir = tempdir().unwrap();
    let destination = dir.path().join("lesson.ts");
    std::fs::write(&destination, b"already here").unwrap();

    let target = DownloadTarget::parse(&server.url("/lesson.ts"), &server.url("/key"), &destination).unwrap();
    let options = options();
    let client = Arc::new(DownloadClient::new(&options).unwrap());

    let outcome = download_video(client, &target, &options).await.unwrap();

    assert_eq!(outcome, SessionOutcome::Skipped);
    assert_eq!(any.hits_async().await, 0);
    assert_eq!(std::fs::read(&destination).unwrap(), b"already here");
}

#[tokio::test]
async fn json_key_response_is_rejected() {
    let server = MockServer::start_async().await;
    let payload = encrypted(&plaintext());

    server
        .mock_async(|when, then| {
            when.method(GET).path("/lesson.ts").header_missing("range");
            then.status(200).body(&payload);
        })
        .await;
    let ranged = server
        .mock_async(|when, then| {
            when.method(GET).path("/lesson.ts").header_exists("range");
            then.status(206).body(&payload[..28]);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/key");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"retcode": 100101, "msg": "token expired"}"#);
        })
        .await;

    let dir = tempdir().unwrap();
    let destination = dir.path().join("lesson.ts");
    let target = DownloadTarget::parse(&server.url("/lesson.ts"), &server.url("/key"), &destination).unwrap();
    let options = options();
    let client = Arc::new(DownloadClient::new(&options).unwrap());

    let err = download_video(client, &target, &options).await.unwrap_err();

    assert!(matches!(err, DownloadError::InvalidKeyUrl { .. }), "{err}");
    assert_eq!(ranged.hits_async().await, 0);
    assert!(!destination.exists());
}

#[tokio::test]
async fn failed_probe_is_size_unavailable() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/lesson.ts");
            then.status(404);
        })
        .await;

    let dir = tempdir().unwrap();
    let destination = dir.path().join("sub").join("lesson.ts");
    let target = DownloadTarget::parse(&server.url("/lesson.ts"), &server.url("/key"), &destination).unwrap();
    let options = options();
    let client = Arc::new(DownloadClient::new(&options).unwrap());

    let err = download_video(client, &target, &options).await.unwrap_err();

    assert!(matches!(err, DownloadError::SizeUnavailable { .. }), "{err}");
    // nothing touched the disk
    assert!(!destination.parent().unwrap().exists());
}

#[tokio::test]
async fn short_body_is_resumed_from_where_it_stopped() {
    let server = MockServer::start_async().await;
    let payload = encrypted(&plaintext());

    server
        .mock_async(|when, then| {
            when.method(GET).path("/lesson.ts").header_missing("range");
            then.status(200).body(&payload);
        })
        .await;

    // the first range is cut after 10 bytes, the follow-up asks for the rest
    let mut ranges = Vec::new();
    for (header, body) in [
        ("bytes=0-27", &payload[0..10]),
        ("bytes=10-27", &payload[10..28]),
        ("bytes=28-55", &payload[28..56]),
        ("bytes=56-83", &payload[56..84]),
        ("bytes=84-", &payload[84..]),
    ] {
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/lesson.ts").header("range", header);
                then.status(206).body(body);
            })
            .await;
        ranges.push(mock);
    }
    server
        .mock_async(|when, then| {
            when.method(GET).path("/key");
            then.status(200).body(KEY);
        })
        .await;

    let dir = tempdir().unwrap();
    let destination = dir.path().join("lesson.ts");
    let target = DownloadTarget::parse(&server.url("/lesson.ts"), &server.url("/key"), &destination).unwrap();
    let options = options();
    let client = Arc::new(DownloadClient::new(&options).unwrap());

    let outcome = download_video(client, &target, &options).await.unwrap();

    assert_eq!(outcome, SessionOutcome::Completed { bytes: 84 });
    assert_eq!(std::fs::read(&destination).unwrap(), plaintext());
    for mock in &ranges {
        mock.assert_hits_async(1).await;
    }
}

#[tokio::test]
async fn unavailable_range_is_retried_until_served() {
    let server = MockServer::start_async().await;
    let payload = encrypted(&plaintext());

    server
        .mock_async(|when, then| {
            when.method(GET).path("/lesson.ts").header_missing("range");
            then.status(200).body(&payload);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/lesson.ts").header("range", "bytes=0-55");
            then.status(206).body(&payload[..56]);
        })
        .await;
    let mut unavailable = server
        .mock_async(|when, then| {
            when.method(GET).path("/lesson.ts").header("range", "bytes=56-");
            then.status(503);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/key");
            then.status(200).body(KEY);
        })
        .await;

    let dir = tempdir().unwrap();
    let destination = dir.path().join("lesson.ts");
    let target = DownloadTarget::parse(&server.url("/lesson.ts"), &server.url("/key"), &destination).unwrap();
    let options = Options {
        segment_count: 2,
        retry: RetryPolicy {
            max_attempts: None,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(50),
        },
        ..options()
    };
    let client = Arc::new(DownloadClient::new(&options).unwrap());

    // once the server has refused the range, it starts serving it
    let recover = async {
        while unavailable.hits_async().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let served = server
            .mock_async(|when, then| {
                when.method(GET).path("/lesson.ts").header("range", "bytes=56-");
                then.status(206).body(&payload[56..]);
            })
            .await;
        unavailable.delete_async().await;
        served
    };

    let (outcome, served) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(download_video(client, &target, &options), recover)
    })
    .await
    .expect("session should finish once the range is served");

    assert_eq!(outcome.unwrap(), SessionOutcome::Completed { bytes: 84 });
    assert_eq!(std::fs::read(&destination).unwrap(), plaintext());
    served.assert_hits_async(1).await;
}
