//! Static file serving over HTTP, including byte ranges.

use std::net::SocketAddr;

use scoped_server::http::ServerBuilder;

mod common;

fn hundred_bytes() -> Vec<u8> {
    (0u8..100).collect()
}

fn public_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("data.bin"), hundred_bytes()).unwrap();
    std::fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
    std::fs::create_dir(dir.path().join("docs")).unwrap();
    std::fs::write(dir.path().join("docs").join("guide.txt"), "read me").unwrap();
    dir
}

async fn start(addr: &str, dir: &tempfile::TempDir) -> common::TestServer {
    let addr: SocketAddr = addr.parse().unwrap();
    let mut config = common::test_config(addr);
    config.static_files.enabled = true;
    config.static_files.root = dir.path().to_path_buf();
    config.static_files.chunk_size = 16;
    common::start_server(ServerBuilder::new(config)).await
}

#[tokio::test]
async fn range_request_returns_partial_content() {
    let dir = public_dir();
    let server = start("127.0.0.1:38301", &dir).await;
    let client = common::client();

    let res = client
        .get(server.url("/data.bin"))
        .header("range", "bytes=10-19")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 206);
    assert_eq!(res.headers()["content-range"], "bytes 10-19/100");
    assert_eq!(res.headers()["accept-ranges"], "bytes");
    let body = res.bytes().await.unwrap();
    assert_eq!(body.as_ref(), &hundred_bytes()[10..20]);

    server.stop().await;
}

#[tokio::test]
async fn plain_request_streams_the_whole_file() {
    let dir = public_dir();
    let server = start("127.0.0.1:38302", &dir).await;
    let client = common::client();

    let res = client.get(server.url("/data.bin")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["content-length"], "100");
    assert_eq!(res.headers()["content-type"], "application/octet-stream");
    assert!(res.headers().contains_key("last-modified"));
    assert_eq!(res.bytes().await.unwrap().as_ref(), hundred_bytes().as_slice());

    server.stop().await;
}

#[tokio::test]
async fn open_ended_and_oversized_ranges_are_clamped() {
    let dir = public_dir();
    let server = start("127.0.0.1:38303", &dir).await;
    let client = common::client();

    let res = client
        .get(server.url("/data.bin"))
        .header("range", "bytes=90-")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 206);
    assert_eq!(res.headers()["content-range"], "bytes 90-99/100");
    assert_eq!(res.bytes().await.unwrap().len(), 10);

    let res = client
        .get(server.url("/data.bin"))
        .header("range", "bytes=95-500")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 206);
    assert_eq!(res.headers()["content-range"], "bytes 95-99/100");

    let res = client
        .get(server.url("/data.bin"))
        .header("range", "bytes=200-300")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.bytes().await.unwrap().len(), 100);

    server.stop().await;
}

#[tokio::test]
async fn directories_serve_index_and_traversal_is_refused() {
    let dir = public_dir();
    let server = start("127.0.0.1:38304", &dir).await;
    let client = common::client();

    let res = client.get(server.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert!(res.headers()["content-type"].to_str().unwrap().starts_with("text/html"));
    assert_eq!(res.text().await.unwrap(), "<h1>home</h1>");

    let res = client.get(server.url("/docs/guide.txt")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "read me");

    let res = client.get(server.url("/docs/..%2Fdata.bin")).send().await.unwrap();
    assert_eq!(res.status(), 404);

    let res = client.get(server.url("/missing.txt")).send().await.unwrap();
    assert_eq!(res.status(), 404);

    server.stop().await;
}

#[tokio::test]
async fn head_sends_headers_without_body() {
    let dir = public_dir();
    let server = start("127.0.0.1:38305", &dir).await;
    let client = common::client();

    let res = client.head(server.url("/data.bin")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["accept-ranges"], "bytes");
    assert!(res.bytes().await.unwrap().is_empty());

    server.stop().await;
}
