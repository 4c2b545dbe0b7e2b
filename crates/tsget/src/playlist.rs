// HLS playlist model: typed master/media playlists, variant selection and
// encryption probing over the lenient line-based format real-world hosts serve.

use url::Url;

use crate::error::DownloadError;
use crate::fetcher::SegmentSource;
use tracing::debug;

const STREAM_INF_TAG: &str = "#EXT-X-STREAM-INF";
const KEY_TAG: &str = "#EXT-X-KEY";

/// One selectable quality rendition of a master playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub bandwidth: u64,
    pub height: Option<u32>,
    pub uri: Url,
}

/// One media segment reference. `index` is assigned in manifest order and is
/// the sole sort key for final assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRef {
    pub index: usize,
    pub uri: Url,
}

/// A resolved media playlist. `base` is the URL the playlist was fetched
/// from; segment URIs are already absolute.
#[derive(Debug, Clone)]
pub struct MediaPlaylist {
    pub base: Url,
    pub segments: Vec<SegmentRef>,
    /// Key method from an `#EXT-X-KEY` directive, recorded only when it is
    /// not `NONE`.
    pub encryption_method: Option<String>,
}

impl MediaPlaylist {
    /// True iff the playlist carries a key directive with a real method.
    pub fn is_encrypted(&self) -> bool {
        self.encryption_method.is_some()
    }
}

#[derive(Debug, Clone)]
pub enum Playlist {
    Master { variants: Vec<Variant> },
    Media(MediaPlaylist),
}

/// Parse raw playlist text fetched from `base`.
///
/// A playlist is classified as master when any line carries a stream-info
/// directive; otherwise every non-comment line is a segment URI in encounter
/// order. Fails with `MalformedPlaylist` when no non-comment content line
/// exists.
pub fn parse(text: &str, base: &Url) -> Result<Playlist, DownloadError> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if !lines.iter().any(|line| !line.starts_with('#')) {
        return Err(DownloadError::malformed_playlist(
            "no non-comment content lines",
        ));
    }

    if lines.iter().any(|line| line.starts_with(STREAM_INF_TAG)) {
        parse_master(&lines, base)
    } else {
        parse_media(&lines, base)
    }
}

fn parse_master(lines: &[&str], base: &Url) -> Result<Playlist, DownloadError> {
    let mut variants = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if line.starts_with(STREAM_INF_TAG) {
            let bandwidth = attribute(line, "BANDWIDTH=")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0);
            let height = attribute(line, "RESOLUTION=")
                .and_then(|v| v.split('x').nth(1))
                .and_then(|h| h.parse::<u32>().ok());

            // The variant URI is the next non-comment line.
            let mut j = i + 1;
            while j < lines.len() && lines[j].starts_with('#') {
                j += 1;
            }
            if j < lines.len() {
                let uri = base.join(lines[j]).map_err(|e| {
                    DownloadError::malformed_playlist(format!(
                        "unresolvable variant URI `{}`: {e}",
                        lines[j]
                    ))
                })?;
                variants.push(Variant {
                    bandwidth,
                    height,
                    uri,
                });
            }
            i = j.max(i + 1);
        } else {
            i += 1;
        }
    }
    Ok(Playlist::Master { variants })
}

fn parse_media(lines: &[&str], base: &Url) -> Result<Playlist, DownloadError> {
    let mut segments = Vec::new();
    let mut encryption_method = None;
    for line in lines {
        if line.starts_with(KEY_TAG) {
            if let Some(method) = attribute(line, "METHOD=") {
                if !method.eq_ignore_ascii_case("NONE") {
                    encryption_method = Some(method.to_string());
                }
            }
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        let uri = base.join(line).map_err(|e| {
            DownloadError::malformed_playlist(format!("unresolvable segment URI `{line}`: {e}"))
        })?;
        segments.push(SegmentRef {
            index: segments.len(),
            uri,
        });
    }
    Ok(Playlist::Media(MediaPlaylist {
        base: base.clone(),
        segments,
        encryption_method,
    }))
}

/// Value of `key` inside an attribute-list directive line, quotes stripped.
fn attribute<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let start = line.find(key)? + key.len();
    let rest = &line[start..];
    let end = rest.find(',').unwrap_or(rest.len());
    Some(rest[..end].trim_matches('"'))
}

/// Pick the best-quality variant: lexicographic max on
/// `(bandwidth, height-or-zero)`, first occurrence winning ties.
pub fn select_best(variants: &[Variant]) -> Result<&Variant, DownloadError> {
    let mut best: Option<&Variant> = None;
    for variant in variants {
        let better = match best {
            None => true,
            Some(current) => {
                (variant.bandwidth, variant.height.unwrap_or(0))
                    > (current.bandwidth, current.height.unwrap_or(0))
            }
        };
        if better {
            best = Some(variant);
        }
    }
    best.ok_or(DownloadError::NoVariants)
}

/// Resolve the manifest chain starting at `url` down to a media playlist.
///
/// A master playlist is followed through its best variant exactly once;
/// a variant that itself resolves to another master fails with
/// `AmbiguousManifest`. The returned playlist's `base` is the URL it was
/// actually fetched from, which is what relative segment URIs were joined
/// against.
pub async fn resolve_chain(
    source: &dyn SegmentSource,
    url: &Url,
) -> Result<MediaPlaylist, DownloadError> {
    let text = fetch_text(source, url).await?;
    match parse(&text, url)? {
        Playlist::Media(media) => Ok(media),
        Playlist::Master { variants } => {
            let best = select_best(&variants)?;
            debug!(bandwidth = best.bandwidth, height = ?best.height, uri = %best.uri, "selected variant");
            let text = fetch_text(source, &best.uri).await?;
            match parse(&text, &best.uri)? {
                Playlist::Media(media) => Ok(media),
                Playlist::Master { .. } => Err(DownloadError::AmbiguousManifest {
                    url: best.uri.to_string(),
                }),
            }
        }
    }
}

async fn fetch_text(source: &dyn SegmentSource, url: &Url) -> Result<String, DownloadError> {
    let bytes = source.fetch(url).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
