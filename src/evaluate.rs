//! Relevancy scoring and RSS feed discovery for fetched pages.
use lol_html::errors::RewritingError;
use lol_html::{element, HtmlRewriter, Settings};
use std::collections::HashMap;

use crate::model::{Evaluation, FetchedPage};

const RSS_CONTENT_TYPE: &str = "application/rss+xml";

/// Counts keyword occurrences in a page's whitespace-separated tokens.
#[derive(Debug, Clone)]
pub struct RelevancyScorer {
    keywords: Vec<String>,
}

impl RelevancyScorer {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keywords: Vec<String> = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .collect();
        keywords.sort();
        keywords.dedup();
        Self { keywords }
    }

    /// Sum of per-keyword counts. Tokens are compared lower-cased and whole;
    /// markup glued to a word makes it a different token.
    pub fn score(&self, html: &[u8]) -> i64 {
        let mut counts: HashMap<&str, i64> =
            self.keywords.iter().map(|k| (k.as_str(), 0)).collect();
        let text = String::from_utf8_lossy(html);
        for token in text.split_whitespace() {
            if let Some(count) = counts.get_mut(token.to_lowercase().as_str()) {
                *count += 1;
            }
        }
        counts.values().sum()
    }
}

/// `href` of the first `<link type="application/rss+xml">` in document
/// order, or an empty string.
pub fn discover_feed_url(html: &[u8]) -> Result<String, RewritingError> {
    let mut feed_url: Option<String> = None;

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![element!("link", |el| {
                if feed_url.is_none()
                    && el.get_attribute("type").as_deref() == Some(RSS_CONTENT_TYPE)
                {
                    feed_url = Some(el.get_attribute("href").unwrap_or_default());
                }
                Ok(())
            })],
            ..Settings::default()
        },
        |_: &[u8]| {},
    );
    rewriter.write(html)?;
    rewriter.end()?;

    Ok(feed_url.unwrap_or_default())
}

/// Runs both analyses over one page.
pub fn evaluate(scorer: &RelevancyScorer, page: &FetchedPage) -> Result<Evaluation, RewritingError> {
    Ok(Evaluation {
        score: scorer.score(&page.html),
        feed_url: discover_feed_url(&page.html)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CandidateLink;
    use url::Url;

    fn scorer() -> RelevancyScorer {
        RelevancyScorer::new(["anime", "manga"])
    }

    #[test]
    fn counts_keywords_case_insensitively() {
        let s = scorer();
        assert_eq!(s.score(b"Anime ANIME manga\tmanga\nnovel"), 4);
        assert_eq!(s.score(b"nothing relevant here"), 0);
        assert_eq!(s.score(b""), 0);
    }

    #[test]
    fn tokens_must_match_whole() {
        let s = scorer();
        assert_eq!(s.score(b"<p>anime</p> animes manga, manga"), 1);
    }

    #[test]
    fn score_ignores_token_order() {
        let s = scorer();
        let a = s.score(b"anime is great manga too anime");
        let b = s.score(b"too anime manga great is anime");
        assert_eq!(a, 3);
        assert_eq!(a, b);
    }

    #[test]
    fn duplicate_keywords_count_once() {
        let s = RelevancyScorer::new(["Anime", "anime ", "manga"]);
        assert_eq!(s.score(b"anime"), 1);
    }

    #[test]
    fn no_feed_is_empty_string() {
        let html = br#"<html><head><link rel="stylesheet" href="/s.css"></head></html>"#;
        assert_eq!(discover_feed_url(html).unwrap(), "");
    }

    #[test]
    fn first_feed_wins() {
        let html = br#"<head>
            <link rel="alternate" type="application/atom+xml" href="/atom.xml">
            <link href="/feed.xml" rel="alternate" type="application/rss+xml">
            <link rel="alternate" type="application/rss+xml" href="/comments.xml">
        </head>"#;
        assert_eq!(discover_feed_url(html).unwrap(), "/feed.xml");
    }

    #[test]
    fn feed_without_href_is_empty() {
        let html = br#"<link type="application/rss+xml"><link type="application/rss+xml" href="/late.xml">"#;
        assert_eq!(discover_feed_url(html).unwrap(), "");
    }

    #[test]
    fn evaluates_page() {
        let page = FetchedPage {
            candidate: CandidateLink {
                link: "https://other.example.com/page".into(),
                url: Url::parse("https://other.example.com/page").unwrap(),
                post_id: 1,
            },
            html: br#"anime anime manga <link type="application/rss+xml" href="/feed.xml">"#.to_vec(),
        };
        let eval = evaluate(&scorer(), &page).unwrap();
        assert_eq!(eval.score, 3);
        assert_eq!(eval.feed_url, "/feed.xml");
    }
}
