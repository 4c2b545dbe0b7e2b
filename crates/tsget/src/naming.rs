// Friendly output naming derived from the manifest URL shape
// `…/<slug>/<episode>/<quality>/index.m3u8`.

use url::Url;

/// Derive `"Ep <episode> <Title From Slug> <quality>p"` from a manifest URL,
/// or `None` when the path doesn't match the expected shape. The caller
/// falls back to its own default name.
pub fn derive_basename(manifest_url: &Url) -> Option<String> {
    let segments: Vec<&str> = manifest_url
        .path_segments()?
        .filter(|s| !s.is_empty())
        .collect();
    if segments.len() < 4 {
        return None;
    }
    let &[slug, episode, quality, last] = &segments[segments.len() - 4..] else {
        return None;
    };
    if !last.ends_with(".m3u8") {
        return None;
    }
    if episode.is_empty() || !episode.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if quality.is_empty() || !quality.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let title = beautify_slug(slug);
    if title.is_empty() {
        return None;
    }
    Some(format!("Ep {episode} {title} {quality}p"))
}

/// Dashes to spaces, release markers (`dub`, `sub`, `dual audio`) stripped,
/// remaining words Title Cased.
fn beautify_slug(slug: &str) -> String {
    let spaced = slug.replace('-', " ");
    let words: Vec<&str> = spaced.split_whitespace().collect();

    let mut kept = Vec::with_capacity(words.len());
    let mut i = 0;
    while i < words.len() {
        let lower = words[i].to_ascii_lowercase();
        if lower == "dub" || lower == "sub" {
            i += 1;
            continue;
        }
        if lower == "dual"
            && words
                .get(i + 1)
                .is_some_and(|next| next.eq_ignore_ascii_case("audio"))
        {
            i += 2;
            continue;
        }
        kept.push(words[i]);
        i += 1;
    }

    kept.iter()
        .map(|word| capitalize(word))
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn derives_from_expected_shape() {
        let name = derive_basename(&url(
            "https://cdn.example.com/my-hero-story/12/1080/index.m3u8",
        ));
        assert_eq!(name.as_deref(), Some("Ep 12 My Hero Story 1080p"));
    }

    #[test]
    fn strips_release_markers() {
        let name = derive_basename(&url(
            "https://cdn.example.com/some-show-dub/3/720/index.m3u8",
        ));
        assert_eq!(name.as_deref(), Some("Ep 3 Some Show 720p"));

        let name = derive_basename(&url(
            "https://cdn.example.com/some-show-dual-audio/3/720/index.m3u8",
        ));
        assert_eq!(name.as_deref(), Some("Ep 3 Some Show 720p"));
    }

    #[test]
    fn rejects_unexpected_shapes() {
        assert!(derive_basename(&url("https://cdn.example.com/index.m3u8")).is_none());
        assert!(
            derive_basename(&url("https://cdn.example.com/show/abc/720/index.m3u8")).is_none()
        );
        assert!(
            derive_basename(&url("https://cdn.example.com/show/1/720/video.ts")).is_none()
        );
        assert!(derive_basename(&url("https://cdn.example.com/show/1/hd/index.m3u8")).is_none());
    }
}
