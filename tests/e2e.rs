//! End-to-end tests for the media proxy.
//!
//! Starts a real Axum server on a random port with `base_url` pointing at
//! itself, then plays through the proxy the way an HLS player would:
//! master playlist, variant playlist, then segments, all via rewritten URLs.

use m3u8_rs::Playlist;
use std::net::SocketAddr;
use streamgate::config::Config;
use streamgate::server::build_router;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MPEGURL: &str = "application/vnd.apple.mpegurl";

/// Spin up a media proxy whose rewritten URLs point back at itself.
async fn start_server() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().unwrap();

    let config = Config {
        port: addr.port(),
        tunnel_port: 0,
        bind_addr: "127.0.0.1".to_string(),
        base_url: format!("http://{}", addr),
        is_dev: true,
        allow_private_targets: true,
        rate_limit_rpm: 0,
        upstream_connect_timeout_secs: 2,
        upstream_idle_timeout_secs: 5,
        tunnel_idle_timeout_secs: 5,
        metrics_enabled: false,
    };

    let app = build_router(config).unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    addr
}

/// Origin with a two-variant master playlist and three TS segments.
async fn start_origin() -> MockServer {
    let origin = MockServer::start().await;

    let master = "#EXTM3U\n\
                  #EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360\n\
                  low/index.m3u8\n\
                  #EXT-X-STREAM-INF:BANDWIDTH=2400000,RESOLUTION=1280x720\n\
                  high/index.m3u8\n";
    Mock::given(method("GET"))
        .and(path("/show/master.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(master, MPEGURL))
        .mount(&origin)
        .await;

    let media = "#EXTM3U\r\n\
                 #EXT-X-VERSION:3\r\n\
                 #EXT-X-TARGETDURATION:4\r\n\
                 #EXT-X-MEDIA-SEQUENCE:0\r\n\
                 #EXTINF:4.0,\r\n\
                 seg0.ts\r\n\
                 #EXTINF:4.0,\r\n\
                 seg1.ts\r\n\
                 #EXTINF:4.0,\r\n\
                 /show/low/seg2.ts\r\n\
                 #EXT-X-ENDLIST\r\n";
    Mock::given(method("GET"))
        .and(path("/show/low/index.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(media, MPEGURL))
        .mount(&origin)
        .await;

    for i in 0..3u8 {
        Mock::given(method("GET"))
            .and(path(format!("/show/low/seg{i}.ts")))
            .respond_with(ResponseTemplate::new(200).set_body_raw(segment_bytes(i), "video/mp2t"))
            .mount(&origin)
            .await;
    }

    origin
}

/// Fake TS payload: sync byte packets tagged with the segment index.
fn segment_bytes(index: u8) -> Vec<u8> {
    (0..188 * 8)
        .map(|i| if i % 188 == 0 { 0x47 } else { index })
        .collect()
}

fn proxy_url(addr: SocketAddr, target: &str) -> String {
    format!(
        "http://{}/proxy/m3u8?url={}",
        addr,
        urlencoding::encode(target)
    )
}

// ── Full playback flow ────────────────────────────────────────────────────────

#[tokio::test]
async fn player_follows_rewritten_urls_to_segments() {
    let origin = start_origin().await;
    let addr = start_server().await;
    let client = reqwest::Client::new();

    // Master playlist: every variant goes back through the proxy
    let master_url = proxy_url(addr, &format!("{}/show/master.m3u8", origin.uri()));
    let resp = client.get(&master_url).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], MPEGURL);
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    let body = resp.bytes().await.unwrap();

    let variant_url = match m3u8_rs::parse_playlist_res(&body).expect("valid master playlist") {
        Playlist::MasterPlaylist(master) => {
            assert_eq!(master.variants.len(), 2);
            for variant in &master.variants {
                assert!(
                    variant.uri.starts_with(&format!("http://{}/proxy/m3u8?url=", addr)),
                    "variant not proxied: {}",
                    variant.uri
                );
            }
            master.variants[0].uri.clone()
        }
        Playlist::MediaPlaylist(_) => panic!("expected master playlist"),
    };

    // Variant playlist: CRLF line endings survive, segments are proxied
    let resp = client.get(&variant_url).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let text = resp.text().await.unwrap();
    assert!(text.starts_with("#EXTM3U\r\n#EXT-X-VERSION:3\r\n"));
    assert!(text.ends_with("#EXT-X-ENDLIST\r\n"));

    let segments: Vec<&str> = text
        .lines()
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect();
    assert_eq!(segments.len(), 3);

    // Segments: bytes arrive exactly as the origin sent them
    for (i, segment) in segments.iter().enumerate() {
        assert!(segment.starts_with(&format!("http://{}/proxy/m3u8?url=", addr)));

        let resp = client.get(*segment).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["content-type"], "video/mp2t");
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");
        let bytes = resp.bytes().await.unwrap();
        assert_eq!(bytes.as_ref(), segment_bytes(i as u8).as_slice());
    }
}

#[tokio::test]
async fn rewriting_a_rewritten_playlist_is_stable() {
    let origin = start_origin().await;
    let addr = start_server().await;
    let client = reqwest::Client::new();

    let variant_target = format!("{}/show/low/index.m3u8", origin.uri());
    let first = client
        .get(proxy_url(addr, &variant_target))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    // Serve the proxied output from the origin and run it through again
    Mock::given(method("GET"))
        .and(path("/again/index.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(first.clone(), MPEGURL))
        .mount(&origin)
        .await;

    let second = client
        .get(proxy_url(addr, &format!("{}/again/index.m3u8", origin.uri())))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn head_request_returns_headers_only() {
    let origin = start_origin().await;
    let addr = start_server().await;

    let target = format!("{}/show/low/seg0.ts", origin.uri());
    let resp = reqwest::Client::new()
        .head(proxy_url(addr, &target))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "video/mp2t");
    assert!(resp.bytes().await.unwrap().is_empty());
}
