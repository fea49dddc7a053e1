//! HLS playlist handling for the media proxy.

pub mod rewrite;

pub use rewrite::{
    PLAYLIST_CONTENT_TYPE, PROXY_PATH, PlaylistKind, RewrittenPlaylist, is_playlist, proxy_url,
    rewrite_playlist,
};
