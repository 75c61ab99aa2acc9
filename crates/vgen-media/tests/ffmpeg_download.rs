//! Download validation against a real ffprobe. Run with
//! `cargo test -p vgen-media -- --ignored`.

use std::process::Command;

use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vgen_media::MaterialDownloader;

#[tokio::test]
#[ignore = "requires ffmpeg"]
async fn test_concurrent_downloads_share_one_cache_entry() {
    let source = TempDir::new().unwrap();
    let clip = source.path().join("clip.mp4");
    let status = Command::new("ffmpeg")
        .args(["-y", "-v", "error", "-f", "lavfi", "-i", "testsrc=duration=3:size=320x240:rate=25"])
        .args(["-pix_fmt", "yuv420p"])
        .arg(&clip)
        .status()
        .unwrap();
    assert!(status.success());

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/clip.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(std::fs::read(&clip).unwrap()))
        .mount(&server)
        .await;

    let cache = TempDir::new().unwrap();
    let downloader = MaterialDownloader::new(cache.path()).unwrap();
    let url = format!("{}/clip.mp4?sig=1", server.uri());

    let (first, second) = tokio::join!(downloader.download(&url), downloader.download(&url));
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first.path, second.path);
    let duration = first.duration.unwrap();
    assert!((duration - 3.0).abs() < 0.2, "unexpected duration {}", duration);
    assert_eq!(std::fs::read_dir(cache.path()).unwrap().count(), 1);
}
