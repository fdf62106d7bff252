//! Outbound link extraction from post bodies.
use lol_html::errors::RewritingError;
use lol_html::{element, HtmlRewriter, Settings};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::model::{host_key, CandidateLink, Post};

/// Path extensions that point at media rather than a site.
const MEDIA_EXTENSIONS: [&str; 4] = [".png", ".jpg", ".gif", ".mp4"];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("could not parse post url {url}: {source}")]
    PostUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("html tokenizer failed: {0}")]
    Html(#[from] RewritingError),
}

/// Collect every outbound link of `post` that could lead to a new site.
///
/// Links that do not parse, point at media, use a non-http(s) scheme or stay
/// on the post's own host are dropped. A post whose own URL does not parse
/// fails as a whole since there is nothing to compare hosts against.
pub fn candidates_from_post(post: &Post) -> Result<Vec<CandidateLink>, ExtractError> {
    let hrefs = anchor_hrefs(&post.body)?;
    if hrefs.is_empty() {
        return Ok(Vec::new());
    }

    let post_url = Url::parse(&post.url).map_err(|source| ExtractError::PostUrl {
        url: post.url.clone(),
        source,
    })?;
    let post_host = host_key(&post.url, &post_url);

    let mut candidates = Vec::new();
    for href in hrefs {
        let url = match Url::parse(&href) {
            Ok(url) => url,
            Err(err) => {
                debug!(post_id = post.id, link = %href, %err, "could not parse url");
                continue;
            }
        };

        if is_media_path(url.path()) {
            continue;
        }
        if url.scheme() != "http" && url.scheme() != "https" {
            continue;
        }
        if host_key(&href, &url) == post_host {
            continue;
        }

        candidates.push(CandidateLink {
            link: href,
            url,
            post_id: post.id,
        });
    }
    Ok(candidates)
}

/// `href` values of every anchor in document order.
fn anchor_hrefs(body: &str) -> Result<Vec<String>, RewritingError> {
    let mut hrefs = Vec::new();
    if body.is_empty() {
        return Ok(hrefs);
    }

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![element!("a[href]", |el| {
                if let Some(href) = el.get_attribute("href") {
                    hrefs.push(href);
                }
                Ok(())
            })],
            ..Settings::default()
        },
        |_: &[u8]| {},
    );
    rewriter.write(body.as_bytes())?;
    rewriter.end()?;

    Ok(hrefs)
}

/// Extension of the last path segment, lower-cased, including the dot.
/// Percent escapes are decoded first, so `a%2Epng` is `.png`.
fn path_extension(path: &str) -> Option<String> {
    let decoded = urlencoding::decode_binary(path.as_bytes());
    let path = String::from_utf8_lossy(&decoded);
    let segment = path.rsplit('/').next().unwrap_or(&path);
    segment.rfind('.').map(|i| segment[i..].to_ascii_lowercase())
}

fn is_media_path(path: &str) -> bool {
    path_extension(path).is_some_and(|ext| MEDIA_EXTENSIONS.contains(&ext.as_str()))
}
