use crate::model::{Post, QueueEntry, QueueOutcome};
use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {}", normalized))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Posts published within the last `window_minutes` that have a body,
/// newest first.
#[instrument(skip_all)]
pub async fn recent_posts(pool: &Pool, window_minutes: u64) -> Result<Vec<Post>> {
    let rows = sqlx::query(
        "SELECT id, title, url, content FROM posts \
         WHERE datetime(pub_date) >= datetime('now', ?) \
           AND content IS NOT NULL AND content <> '' \
         ORDER BY datetime(pub_date) DESC, id DESC",
    )
    .bind(format!("-{} minutes", window_minutes))
    .fetch_all(pool)
    .await
    .context("failed to query recent posts")?;

    let posts = rows
        .into_iter()
        .map(|row| Post {
            id: row.get("id"),
            title: row.get("title"),
            url: row.get("url"),
            body: row.get("content"),
        })
        .collect();
    Ok(posts)
}

#[instrument(skip_all)]
pub async fn is_blacklisted(pool: &Pool, host: &str) -> Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM discovered_sites_blacklist WHERE host = ?")
            .bind(host)
            .fetch_one(pool)
            .await?;
    Ok(count > 0)
}

#[instrument(skip_all)]
pub async fn add_to_blacklist(pool: &Pool, host: &str) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO discovered_sites_blacklist (host) VALUES (?)")
        .bind(host)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record one discovery of `fqdn`.
///
/// New hosts start with `encountered = 1`. Known hosts accumulate the score,
/// bump `encountered` and take `feed_url` as given, even when it is empty.
/// Done in a single statement so concurrent writers cannot lose an update.
#[instrument(skip_all, fields(fqdn = %fqdn))]
pub async fn upsert_queue_entry(
    pool: &Pool,
    fqdn: &str,
    score: i64,
    feed_url: &str,
) -> Result<QueueOutcome> {
    let encountered: i64 = sqlx::query_scalar(
        "INSERT INTO discovered_sites_queue (fqdn, score, encountered, feed_url) VALUES (?, ?, 1, ?) \
         ON CONFLICT(fqdn) DO UPDATE SET \
             score = score + excluded.score, \
             encountered = encountered + 1, \
             feed_url = excluded.feed_url, \
             updated_at = CURRENT_TIMESTAMP \
         RETURNING encountered",
    )
    .bind(fqdn)
    .bind(score)
    .bind(feed_url)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to queue {}", fqdn))?;

    if encountered > 1 {
        Ok(QueueOutcome::Updated)
    } else {
        Ok(QueueOutcome::Inserted)
    }
}

#[instrument(skip_all)]
pub async fn get_queue_entry(pool: &Pool, fqdn: &str) -> Result<Option<QueueEntry>> {
    let row = sqlx::query(
        "SELECT fqdn, score, encountered, feed_url FROM discovered_sites_queue WHERE fqdn = ?",
    )
    .bind(fqdn)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| QueueEntry {
        fqdn: row.get("fqdn"),
        score: row.get("score"),
        encountered: row.get("encountered"),
        feed_url: row.get("feed_url"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> Pool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    async fn insert_post(pool: &Pool, url: &str, content: Option<&str>, age_minutes: i64) -> i64 {
        sqlx::query_scalar(
            "INSERT INTO posts (title, url, content, pub_date) \
             VALUES ('t', ?, ?, datetime('now', ?)) RETURNING id",
        )
        .bind(url)
        .bind(content)
        .bind(format!("-{} minutes", age_minutes))
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn recent_posts_window_order_and_body_filter() {
        let pool = setup_pool().await;
        let older = insert_post(&pool, "https://a.com/1", Some("<p>old</p>"), 90).await;
        let newer = insert_post(&pool, "https://a.com/2", Some("<p>new</p>"), 5).await;
        insert_post(&pool, "https://a.com/3", Some(""), 5).await;
        insert_post(&pool, "https://a.com/4", None, 5).await;
        insert_post(&pool, "https://a.com/5", Some("<p>stale</p>"), 300).await;

        let posts = recent_posts(&pool, 120).await.unwrap();
        let ids: Vec<i64> = posts.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![newer, older]);
        assert_eq!(posts[0].body, "<p>new</p>");
        assert_eq!(posts[0].url, "https://a.com/2");
    }

    #[tokio::test]
    async fn blacklist_membership() {
        let pool = setup_pool().await;
        assert!(!is_blacklisted(&pool, "spam.example.com").await.unwrap());
        add_to_blacklist(&pool, "spam.example.com").await.unwrap();
        add_to_blacklist(&pool, "spam.example.com").await.unwrap();
        assert!(is_blacklisted(&pool, "spam.example.com").await.unwrap());
        assert!(!is_blacklisted(&pool, "example.com").await.unwrap());
    }

    #[tokio::test]
    async fn upsert_accumulates_and_overwrites_feed() {
        let pool = setup_pool().await;
        let host = "blog.example.com";

        let first = upsert_queue_entry(&pool, host, 3, "/feed.xml").await.unwrap();
        assert_eq!(first, QueueOutcome::Inserted);

        let second = upsert_queue_entry(&pool, host, 4, "/rss").await.unwrap();
        assert_eq!(second, QueueOutcome::Updated);
        let row = get_queue_entry(&pool, host).await.unwrap().unwrap();
        assert_eq!(row.score, 7);
        assert_eq!(row.encountered, 2);
        assert_eq!(row.feed_url, "/rss");

        upsert_queue_entry(&pool, host, 0, "").await.unwrap();
        let row = get_queue_entry(&pool, host).await.unwrap().unwrap();
        assert_eq!(row.score, 7);
        assert_eq!(row.encountered, 3);
        assert_eq!(row.feed_url, "");
    }

    #[tokio::test]
    async fn missing_queue_entry_is_none() {
        let pool = setup_pool().await;
        assert!(get_queue_entry(&pool, "nowhere.example.com")
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn memory_urls_pass_through() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            prepare_sqlite_url("postgres://localhost/db"),
            "postgres://localhost/db"
        );
    }

    #[test]
    fn file_urls_create_parent_dir() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("nested").join("q.db");
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let prepared = prepare_sqlite_url(&url);
        assert_eq!(prepared, url);
        assert!(td.path().join("nested").exists());
    }
}
