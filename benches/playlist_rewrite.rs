use criterion::{Criterion, black_box, criterion_group, criterion_main};
use streamgate::hls::{PlaylistKind, rewrite_playlist};
use url::Url;

const BASE_URL: &str = "https://relay.example";

fn media_playlist(segments: usize) -> String {
    let mut body = String::from(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:0\n",
    );
    for i in 0..segments {
        body.push_str("#EXTINF:6.006,\n");
        body.push_str(&format!("segment_{i:05}.ts?token=abcdef0123456789\n"));
    }
    body.push_str("#EXT-X-ENDLIST\n");
    body
}

fn master_playlist() -> String {
    let mut body = String::from("#EXTM3U\n#EXT-X-INDEPENDENT-SEGMENTS\n");
    for (bandwidth, height) in [(800_000, 360), (1_400_000, 540), (2_800_000, 720), (5_000_000, 1080)] {
        body.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={bandwidth},RESOLUTION={}x{height},CODECS=\"avc1.64001f,mp4a.40.2\"\n",
            height * 16 / 9
        ));
        body.push_str(&format!("{height}p/index.m3u8\n"));
    }
    body
}

fn bench_rewrite(c: &mut Criterion) {
    let manifest = Url::parse("https://cdn.example/live/channel1/index.m3u8").unwrap();

    for segments in [10, 1_000] {
        let body = media_playlist(segments);
        c.bench_function(&format!("rewrite_media_{segments}"), |b| {
            b.iter(|| rewrite_playlist(black_box(body.as_bytes()), black_box(&manifest), BASE_URL))
        });
    }

    let master = master_playlist();
    c.bench_function("rewrite_master", |b| {
        b.iter(|| rewrite_playlist(black_box(master.as_bytes()), black_box(&manifest), BASE_URL))
    });

    let body = media_playlist(1_000);
    c.bench_function("detect_kind_media_1000", |b| {
        b.iter(|| PlaylistKind::detect(black_box(body.as_bytes())))
    });
}

criterion_group!(benches, bench_rewrite);
criterion_main!(benches);
