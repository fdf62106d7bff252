//! One discovery run: posts -> candidates -> schedule -> pages -> queue.
//!
//! Every per-item failure is logged and skipped; a run never aborts half way.
//! Runs are serialised by a lock so two runs never touch the same queue rows
//! at once.
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, instrument, warn};

use crate::config::Config;
use crate::db::{self, Pool};
use crate::evaluate::{self, RelevancyScorer};
use crate::extract;
use crate::fetcher::{self, PageFetcher};
use crate::filter::{self, BlacklistPolicy};
use crate::model::{CandidateLink, Post, QueueOutcome};

/// Counters describing one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub posts: usize,
    pub candidates: usize,
    pub scheduled: usize,
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
}

impl RunReport {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            posts: 0,
            candidates: 0,
            scheduled: 0,
            fetched: 0,
            inserted: 0,
            updated: 0,
            failed: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub post_window_minutes: u64,
    pub blacklist_policy: BlacklistPolicy,
    pub workers: usize,
}

impl PipelineSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            post_window_minutes: cfg.discovery.post_window_minutes,
            blacklist_policy: cfg.discovery.blacklist_errors,
            workers: cfg.fetch.workers,
        }
    }
}

pub struct Pipeline {
    pool: Pool,
    fetcher: Arc<dyn PageFetcher>,
    scorer: RelevancyScorer,
    settings: PipelineSettings,
    run_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        pool: Pool,
        fetcher: Arc<dyn PageFetcher>,
        scorer: RelevancyScorer,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            pool,
            fetcher,
            scorer,
            settings,
            run_lock: Mutex::new(()),
        }
    }

    /// Execute one run. Returns `None` without doing anything when another
    /// run is still in progress.
    #[instrument(skip_all)]
    pub async fn run(&self) -> Option<RunReport> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            warn!("previous discovery run still in progress; skipping");
            return None;
        };

        info!("starting auto discovery run");
        let mut report = RunReport::new();

        let posts = match db::recent_posts(&self.pool, self.settings.post_window_minutes).await {
            Ok(posts) => posts,
            Err(err) => {
                error!(?err, "error getting posts");
                Vec::new()
            }
        };
        report.posts = posts.len();

        let candidates = collect_candidates(&posts, &mut report);
        report.candidates = candidates.len();

        let schedule =
            filter::schedule(&self.pool, self.settings.blacklist_policy, candidates).await;
        report.scheduled = schedule.len();

        let pages =
            fetcher::fetch_all(Arc::clone(&self.fetcher), schedule, self.settings.workers).await;
        report.fetched = pages.len();

        for page in &pages {
            let evaluation = match evaluate::evaluate(&self.scorer, page) {
                Ok(evaluation) => evaluation,
                Err(err) => {
                    warn!(link = %page.candidate.link, %err, "could not evaluate page");
                    report.failed += 1;
                    continue;
                }
            };

            let host = page.host();
            match db::upsert_queue_entry(&self.pool, &host, evaluation.score, &evaluation.feed_url)
                .await
            {
                Ok(outcome) => {
                    info!(
                        %host,
                        score = evaluation.score,
                        feed_url = %evaluation.feed_url,
                        outcome = outcome.as_str(),
                        "queued"
                    );
                    match outcome {
                        QueueOutcome::Inserted => report.inserted += 1,
                        QueueOutcome::Updated => report.updated += 1,
                    }
                }
                Err(err) => {
                    error!(?err, link = %page.candidate.link, "there was an error adding site to queue");
                    report.failed += 1;
                }
            }
        }

        info!(
            started_at = %report.started_at,
            posts = report.posts,
            candidates = report.candidates,
            scheduled = report.scheduled,
            fetched = report.fetched,
            inserted = report.inserted,
            updated = report.updated,
            failed = report.failed,
            "finished auto discovery run"
        );
        Some(report)
    }

    /// Run now and then once per `every` until `shutdown` resolves. A run in
    /// progress when `shutdown` fires is abandoned. Returns the number of
    /// runs started.
    pub async fn run_every<F>(&self, every: Duration, shutdown: F) -> usize
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut runs = 0;
        loop {
            tokio::select! {
                // The first tick fires immediately.
                _ = ticker.tick() => {
                    runs += 1;
                    tokio::select! {
                        _ = self.run() => {}
                        _ = &mut shutdown => {
                            warn!("shutdown requested during a run; abandoning it");
                            break;
                        }
                    }
                }
                _ = &mut shutdown => break,
            }
        }
        info!(runs, "shutting down");
        runs
    }
}

fn collect_candidates(posts: &[Post], report: &mut RunReport) -> Vec<CandidateLink> {
    let mut candidates = Vec::new();
    for post in posts {
        match extract::candidates_from_post(post) {
            Ok(found) => candidates.extend(found),
            Err(err) => {
                warn!(post_id = post.id, %err, "error getting urls from post");
                report.failed += 1;
            }
        }
    }
    candidates
}
