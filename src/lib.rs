//! Discovers new sites linked from recently ingested posts and queues them
//! for human review.

pub mod config;
pub mod db;
pub mod evaluate;
pub mod extract;
pub mod fetcher;
pub mod filter;
pub mod model;
pub mod pipeline;
