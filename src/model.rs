use url::Url;

/// A post recently ingested by the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub body: String,
}

/// An outbound link found in a post's body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateLink {
    /// The `href` value exactly as written in the post.
    pub link: String,
    pub url: Url,
    pub post_id: i64,
}

impl CandidateLink {
    /// Host used for blacklist, dedup and queue keys, see [`host_key`].
    pub fn host(&self) -> String {
        host_key(&self.link, &self.url)
    }
}

/// A candidate whose page was retrieved successfully.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub candidate: CandidateLink,
    pub html: Vec<u8>,
}

impl FetchedPage {
    pub fn host(&self) -> String {
        self.candidate.host()
    }
}

/// Result of scoring a fetched page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evaluation {
    pub score: i64,
    /// Empty when the page advertises no RSS feed.
    pub feed_url: String,
}

/// A row of the review queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub fqdn: String,
    pub score: i64,
    pub encountered: i64,
    pub feed_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOutcome {
    Inserted,
    Updated,
}

impl QueueOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueOutcome::Inserted => "inserted",
            QueueOutcome::Updated => "updated",
        }
    }
}

/// The host exactly as written in the link's authority: case is kept, and
/// so is any port, default or not. Userinfo is dropped. `https://MySite.com`
/// and `https://mysite.com:443` are therefore different hosts.
///
/// Falls back to the parsed host when the raw text has no `//` authority
/// (the parser accepts `http:example.com`).
pub fn host_key(raw: &str, url: &Url) -> String {
    match authority_host(raw) {
        Some(host) => host.to_string(),
        None => url.host_str().unwrap_or_default().to_string(),
    }
}

fn authority_host(raw: &str) -> Option<&str> {
    let (_, rest) = raw.trim().split_once("://")?;
    let end = rest
        .find(|c| matches!(c, '/' | '?' | '#'))
        .unwrap_or(rest.len());
    let authority = &rest[..end];
    let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    (!host.is_empty()).then_some(host)
}
