use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use url::Url;

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").expect("url regex"));
static MARKDOWN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[*_~`#]").expect("markdown regex"));

/// Explode a URL into host parts and path segments. Query strings and
/// fragments are dropped so links differing only in tracking parameters
/// still match.
fn url_tokens(url: &str) -> Vec<String> {
    match Url::parse(url) {
        Ok(parsed) => {
            let mut tokens = Vec::new();
            if let Some(host) = parsed.host_str() {
                tokens.extend(host.split('.').map(str::to_owned));
            }
            if let Some(segments) = parsed.path_segments() {
                tokens.extend(segments.filter(|s| !s.is_empty()).map(str::to_owned));
            }
            tokens
        }
        // Better one opaque token than none.
        Err(_) => vec![url.replace("://", "_").replace('/', "_")],
    }
}

/// Normalize text into comparison tokens: lowercase, URLs exploded,
/// markdown formatting and punctuation stripped.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut text = text.to_lowercase();

    let urls: Vec<String> = URL_RE.find_iter(&text).map(|m| m.as_str().to_owned()).collect();
    for url in urls {
        let replacement = url_tokens(&url).join(" ");
        text = text.replace(&url, &replacement);
    }

    let text = MARKDOWN_RE.replace_all(&text, "");
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Dice coefficient on token sets: `2·|A ∩ B| / (|A| + |B|)`.
pub fn dice(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    (2.0 * intersection as f64) / (a.len() + b.len()) as f64
}

/// Token similarity of two titles, with a raw-equality rescue for inputs
/// that normalize to nothing (URL-only tasks, single-character tasks).
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let tokens_a: HashSet<String> = tokenize(a).into_iter().collect();
    let tokens_b: HashSet<String> = tokenize(b).into_iter().collect();

    if tokens_a.is_empty() && tokens_b.is_empty() {
        if a.trim().to_lowercase() == b.trim().to_lowercase() {
            return 1.0;
        }
        return 0.0;
    }

    dice(&tokens_a, &tokens_b)
}
