use buck_cli::{routes, AppState, GatewayConfig};
use reqwest::{Client, StatusCode};
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

// Helper to spawn a server on a random port
async fn spawn_server() -> String {
    let config = GatewayConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        use_memory_store: true,
        ..Default::default()
    };
    spawn_with(config).await
}

async fn spawn_with(config: GatewayConfig) -> String {
    let state = Arc::new(AppState::new(config).await.unwrap());
    let app = routes::create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

fn persistent_config(dir: &Path) -> GatewayConfig {
    GatewayConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        data_dir: dir.to_path_buf(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_bucket_lifecycle() {
    let base_url = spawn_server().await;
    let client = Client::new();
    let bucket_name = "lifecycle-bucket";

    // 1. List buckets (should be empty)
    let res = client.get(format!("{}/", base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.text().await.unwrap();
    assert!(body.contains("<ListAllMyBucketsResult"));
    assert!(!body.contains(bucket_name));

    // 2. Create bucket
    let res = client
        .put(format!("{}/{}", base_url, bucket_name))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["Location"], "/lifecycle-bucket");

    // 3. Verify bucket exists (Head)
    let res = client
        .head(format!("{}/{}", base_url, bucket_name))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // 4. List buckets (should contain it)
    let res = client.get(format!("{}/", base_url)).send().await.unwrap();
    let body = res.text().await.unwrap();
    assert!(body.contains(bucket_name));
    assert!(body.contains("<DisplayName>anonymous</DisplayName>"));

    // 5. Delete bucket
    let res = client
        .delete(format!("{}/{}", base_url, bucket_name))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    // 6. Verify bucket gone
    let res = client
        .head(format!("{}/{}", base_url, bucket_name))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_object_lifecycle() {
    let base_url = spawn_server().await;
    let client = Client::new();
    let bucket_name = "object-bucket";
    let object_key = "test-file.txt";
    let content = "Hello, Buck!";

    // Create bucket
    client
        .put(format!("{}/{}", base_url, bucket_name))
        .send()
        .await
        .unwrap();

    // 1. Put Object
    let res = client
        .put(format!("{}/{}/{}", base_url, bucket_name, object_key))
        .body(content)
        .header("Content-Type", "text/plain")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // Check ETag
    let etag = res.headers().get("ETag").unwrap().to_str().unwrap().to_string();
    assert!(etag.starts_with('"') && etag.ends_with('"'));

    // 2. Get Object
    let res = client
        .get(format!("{}/{}/{}", base_url, bucket_name, object_key))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["Content-Type"], "text/plain");
    assert_eq!(res.headers()["ETag"], etag.as_str());
    assert_eq!(res.text().await.unwrap(), content);

    // 3. Conditional get
    let res = client
        .get(format!("{}/{}/{}", base_url, bucket_name, object_key))
        .header("If-None-Match", &etag)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_MODIFIED);

    // 4. List Objects
    let res = client
        .get(format!("{}/{}", base_url, bucket_name))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = res.text().await.unwrap();
    assert!(body.contains(object_key));
    assert!(body.contains("<KeyCount>1</KeyCount>"));

    // 5. Delete Object
    let res = client
        .delete(format!("{}/{}/{}", base_url, bucket_name, object_key))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert_eq!(res.headers()["x-amz-delete-marker"], "true");

    // 6. Get Object (should be 404)
    let res = client
        .get(format!("{}/{}/{}", base_url, bucket_name, object_key))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body = res.text().await.unwrap();
    assert!(body.contains("<Code>NoSuchKey</Code>"));
}

#[tokio::test]
async fn test_ranged_downloads() {
    let base_url = spawn_server().await;
    let client = Client::new();
    let url = format!("{}/ranges/data.bin", base_url);

    client.put(format!("{}/ranges", base_url)).send().await.unwrap();
    let content: Vec<u8> = (0..=255u8).cycle().take(40_000).collect();
    client.put(&url).body(content.clone()).send().await.unwrap();

    let res = client
        .get(&url)
        .header("Range", "bytes=100-20099")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(res.headers()["Content-Range"], "bytes 100-20099/40000");
    assert_eq!(res.headers()["Content-Length"], "20000");
    assert_eq!(res.bytes().await.unwrap().as_ref(), &content[100..20100]);

    let res = client
        .get(&url)
        .header("Range", "bytes=39990-")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(res.bytes().await.unwrap().as_ref(), &content[39990..]);

    let res = client
        .get(&url)
        .header("Range", "bytes=40000-40010")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(res.headers()["Content-Range"], "bytes */40000");
}

#[tokio::test]
async fn test_version_history() {
    let base_url = spawn_server().await;
    let client = Client::new();
    let url = format!("{}/history/doc.txt", base_url);

    client.put(format!("{}/history", base_url)).send().await.unwrap();

    let first = client.put(&url).body("v1").send().await.unwrap();
    let first_id = first.headers()["x-amz-version-id"].to_str().unwrap().to_string();
    let second = client.put(&url).body("v2").send().await.unwrap();
    let second_id = second.headers()["x-amz-version-id"].to_str().unwrap().to_string();
    assert_ne!(first_id, second_id);

    let res = client.get(&url).send().await.unwrap();
    assert_eq!(res.headers()["x-amz-version-id"], second_id.as_str());
    assert_eq!(res.text().await.unwrap(), "v2");

    let res = client
        .get(format!("{}?versionId={}", url, first_id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "v1");

    let res = client
        .get(format!("{}?versionId=zzz", url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_edge_cases() {
    let base_url = spawn_server().await;
    let client = Client::new();
    let bucket_name = "edge-bucket";

    // 1. Create duplicate bucket (should fail with 409)
    client.put(format!("{}/{}", base_url, bucket_name)).send().await.unwrap();
    let res = client.put(format!("{}/{}", base_url, bucket_name)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT); // BucketAlreadyExists

    // 2. Delete non-empty bucket
    client
        .put(format!("{}/{}/file.txt", base_url, bucket_name))
        .body("data")
        .send()
        .await
        .unwrap();
    let res = client
        .delete(format!("{}/{}", base_url, bucket_name))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT); // BucketNotEmpty

    // 3. Get non-existent bucket
    let res = client.get(format!("{}/non-existent", base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // 4. Invalid bucket name
    let res = client.put(format!("{}/ab", base_url)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(res.headers()["x-amz-error-code"], "InvalidBucketName");

    // 5. Overlong key
    let long_key = "k".repeat(1025);
    let res = client
        .put(format!("{}/{}/{}", base_url, bucket_name, long_key))
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let client = Client::new();

    {
        let (stop, stopped) = oneshot::channel::<()>();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(buck_cli::serve(
            listener,
            persistent_config(dir.path()),
            async {
                stopped.await.ok();
            },
        ));

        // The engine opens inside `serve`; wait until the port answers
        let mut ready = false;
        for _ in 0..50 {
            if client.head(format!("{}/", base_url)).send().await.is_ok() {
                ready = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(ready);

        client.put(format!("{}/durable", base_url)).send().await.unwrap();
        client
            .put(format!("{}/durable/kept.txt", base_url))
            .body("still here")
            .send()
            .await
            .unwrap();

        stop.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    let base_url = spawn_with(persistent_config(dir.path())).await;
    let res = client
        .get(format!("{}/durable/kept.txt", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "still here");
}
