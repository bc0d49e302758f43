//! Playlist formats
//!
//! Two formats are understood:
//!
//! - a JSON manifest
//!
//! ```json
//! {
//!   "title": "Late night",
//!   "tracks": [
//!     {"id": "42", "title": "Intro", "artist": "Someone",
//!      "permalink_url": "https://music.example/tracks/42",
//!      "resolve_url": "https://music.example/tracks/42/stream",
//!      "duration_ms": 183000}
//!   ]
//! }
//! ```
//!
//! - an M3U / extended M3U playlist (`#EXTINF:<secs>,<artist> - <title>`)
//!
//! Relative locations are resolved against the playlist URL. Entries of a
//! remote playlist must point to `http(s)` locations; `file` locations are
//! only honoured in a playlist that is itself a local file.

use crate::error::{Error, Result};
use percent_encoding::percent_decode_str;
use pmorelay::TrackDescriptor;
use serde::{Deserialize, Serialize};
use url::Url;

/// JSON playlist manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistManifest {
    #[serde(default)]
    pub title: Option<String>,
    pub tracks: Vec<ManifestTrack>,
}

/// One manifest entry. Only a location is mandatory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestTrack {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub permalink_url: Option<String>,
    #[serde(default)]
    pub stream_url: Option<String>,
    #[serde(default)]
    pub resolve_url: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

/// Answer of a resolve endpoint: a short-lived direct location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub url: String,
}

impl PlaylistManifest {
    /// Convert the entries to descriptors, resolving relative URLs on `base`.
    ///
    /// Entries without any location, or with a location the playlist may
    /// not point to, are skipped with a warning.
    pub fn into_descriptors(self, base: &Url) -> Result<Vec<TrackDescriptor>> {
        let mut tracks = Vec::with_capacity(self.tracks.len());
        for (index, entry) in self.tracks.into_iter().enumerate() {
            let declared = [&entry.permalink_url, &entry.stream_url, &entry.resolve_url];
            let forbidden = declared
                .into_iter()
                .flatten()
                .find(|u| !base.join(u).is_ok_and(|url| is_allowed(base, &url)));
            if let Some(location) = forbidden {
                tracing::warn!(
                    "Skipping manifest entry #{}: {} is not allowed from {}",
                    index,
                    location,
                    base
                );
                continue;
            }

            let stream_url = entry
                .stream_url
                .as_deref()
                .map(|u| base.join(u))
                .transpose()?;
            let resolve_url = entry
                .resolve_url
                .as_deref()
                .map(|u| base.join(u))
                .transpose()?;
            let permalink = match (&entry.permalink_url, &stream_url, &resolve_url) {
                (Some(p), _, _) => base.join(p)?,
                (None, Some(s), _) => s.clone(),
                (None, None, Some(r)) => r.clone(),
                (None, None, None) => {
                    tracing::warn!("Skipping manifest entry #{} without location", index);
                    continue;
                }
            };

            let id = entry.id.unwrap_or_else(|| permalink.to_string());
            let title = entry
                .title
                .unwrap_or_else(|| title_from_url(&permalink));

            let mut track = TrackDescriptor::new(id, title, permalink.to_string());
            track.artist = entry.artist;
            track.stream_url = stream_url.map(String::from);
            track.resolve_url = resolve_url.map(String::from);
            track.duration_ms = entry.duration_ms;
            tracks.push(track);
        }
        Ok(tracks)
    }
}

/// Parse an M3U or extended M3U playlist.
pub fn parse_m3u(body: &str, base: &Url) -> Result<Vec<TrackDescriptor>> {
    let mut tracks = Vec::new();
    let mut pending: Option<(Option<u64>, Option<String>, Option<String>)> = None;

    for line in body.lines() {
        let line = line.trim().trim_start_matches('\u{feff}');
        if line.is_empty() {
            continue;
        }
        if let Some(info) = line.strip_prefix("#EXTINF:") {
            pending = Some(parse_extinf(info));
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let location = base.join(line)?;
        let (duration_ms, artist, title) = pending.take().unwrap_or_default();
        if !is_allowed(base, &location) {
            tracing::warn!("Skipping entry {}: not allowed from {}", location, base);
            continue;
        }
        let title = title.unwrap_or_else(|| title_from_url(&location));

        let mut track = TrackDescriptor::new(location.to_string(), title, location.to_string())
            .with_stream_url(location.to_string());
        track.artist = artist;
        track.duration_ms = duration_ms;
        tracks.push(track);
    }

    Ok(tracks)
}

/// Whether a playlist loaded from `base` may point to `location`.
///
/// `http(s)` is always fine; `file` only from a local playlist.
pub fn is_allowed(base: &Url, location: &Url) -> bool {
    match location.scheme() {
        "http" | "https" => true,
        "file" => base.scheme() == "file",
        _ => false,
    }
}

/// `<secs>[ attrs],<artist> - <title>`
fn parse_extinf(info: &str) -> (Option<u64>, Option<String>, Option<String>) {
    let (head, name) = info.split_once(',').unwrap_or((info, ""));
    let secs = head
        .split_whitespace()
        .next()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|s| *s > 0.0);
    let duration_ms = secs.map(|s| (s * 1000.0) as u64);

    let name = name.trim();
    let (artist, title) = match name.split_once(" - ") {
        Some((artist, title)) => (Some(artist.trim().to_string()), Some(title.trim().to_string())),
        None if !name.is_empty() => (None, Some(name.to_string())),
        None => (None, None),
    };
    (duration_ms, artist, title)
}

/// Last path segment without its extension
fn title_from_url(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|mut s| s.next_back())
        .filter(|s| !s.is_empty())
        .unwrap_or(url.as_str());
    let decoded = percent_decode_str(segment).decode_utf8_lossy().into_owned();
    match decoded.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => decoded,
    }
}

/// Whether `body` looks like a JSON document rather than an M3U list
pub fn looks_like_json(body: &str) -> bool {
    body.trim_start_matches('\u{feff}').trim_start().starts_with('{')
}

/// Reject bodies that are neither JSON nor M3U
pub fn parse_playlist(body: &str, base: &Url) -> Result<Vec<TrackDescriptor>> {
    if looks_like_json(body) {
        let manifest: PlaylistManifest = serde_json::from_str(body)?;
        return manifest.into_descriptors(base);
    }
    if body.trim_start().starts_with('<') {
        return Err(Error::invalid_playlist(format!(
            "{} returned markup, not a playlist",
            base
        )));
    }
    parse_m3u(body, base)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://music.example/lists/night.m3u").unwrap()
    }

    #[test]
    fn test_parse_extended_m3u() {
        let body = "#EXTM3U\n\
                    #EXTINF:183,Nils Frahm - Says\n\
                    says.mp3\n\
                    \n\
                    #EXTINF:-1,Untitled jingle\n\
                    https://cdn.example/jingle.ogg\n";
        let tracks = parse_m3u(body, &base()).unwrap();
        assert_eq!(tracks.len(), 2);

        assert_eq!(tracks[0].artist.as_deref(), Some("Nils Frahm"));
        assert_eq!(tracks[0].title, "Says");
        assert_eq!(tracks[0].duration_ms, Some(183_000));
        assert_eq!(
            tracks[0].stream_url.as_deref(),
            Some("https://music.example/lists/says.mp3")
        );

        assert_eq!(tracks[1].artist, None);
        assert_eq!(tracks[1].title, "Untitled jingle");
        assert_eq!(tracks[1].duration_ms, None);
        assert_eq!(tracks[1].id, "https://cdn.example/jingle.ogg");
    }

    #[test]
    fn test_parse_plain_m3u_uses_file_name() {
        let body = "# my list\nA%20Song.flac\nother/b.mp3\n";
        let tracks = parse_m3u(body, &base()).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].title, "A Song");
        assert_eq!(tracks[1].title, "b");
        assert_eq!(
            tracks[1].permalink_url,
            "https://music.example/lists/other/b.mp3"
        );
    }

    #[test]
    fn test_manifest_into_descriptors() {
        let json = r#"{
            "title": "Night",
            "tracks": [
                {"id": "42", "title": "Intro", "artist": "X",
                 "permalink_url": "/tracks/42", "resolve_url": "/tracks/42/stream",
                 "duration_ms": 1000},
                {"stream_url": "https://cdn.example/b.mp3"},
                {"title": "no location"}
            ]
        }"#;
        let tracks = parse_playlist(json, &base()).unwrap();
        assert_eq!(tracks.len(), 2);

        assert_eq!(tracks[0].id, "42");
        assert_eq!(tracks[0].permalink_url, "https://music.example/tracks/42");
        assert_eq!(
            tracks[0].resolve_url.as_deref(),
            Some("https://music.example/tracks/42/stream")
        );
        assert!(tracks[0].stream_url.is_none());

        assert_eq!(tracks[1].id, "https://cdn.example/b.mp3");
        assert_eq!(tracks[1].title, "b");
        assert_eq!(tracks[1].permalink_url, "https://cdn.example/b.mp3");
    }

    #[test]
    fn test_markup_is_rejected() {
        let result = parse_playlist("<html><body>nope</body></html>", &base());
        assert!(matches!(result, Err(Error::InvalidPlaylist(_))));
    }

    #[test]
    fn test_remote_playlist_cannot_point_to_local_files() {
        let body = "#EXTM3U\n#EXTINF:1,Secret\nfile:///etc/passwd\nok.mp3\n";
        let tracks = parse_m3u(body, &base()).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].title, "ok");

        let json = r#"{"tracks": [
            {"permalink_url": "/tracks/1", "stream_url": "file:///etc/passwd"},
            {"stream_url": "ftp://cdn.example/b.mp3"},
            {"stream_url": "https://cdn.example/c.mp3"}
        ]}"#;
        let tracks = parse_playlist(json, &base()).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].title, "c");
    }

    #[test]
    fn test_local_playlist_may_point_to_local_files() {
        let local = Url::parse("file:///srv/music/list.m3u").unwrap();
        let tracks = parse_m3u("a.mp3\nfile:///srv/other/b.mp3\nhttps://cdn.example/c.mp3\n", &local).unwrap();
        assert_eq!(tracks.len(), 3);
        assert_eq!(tracks[0].permalink_url, "file:///srv/music/a.mp3");
    }

    #[test]
    fn test_extinf_without_name() {
        assert_eq!(parse_extinf("12.5,"), (Some(12_500), None, None));
        assert_eq!(
            parse_extinf("0 tvg-id=\"x\",A - B - C"),
            (None, Some("A".to_string()), Some("B - C".to_string()))
        );
    }
}
