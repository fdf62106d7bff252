//! Database module: SQL access to the post source, the blacklist and the
//! review queue.
//!
//! All statements live in `repo`; they are re-exported here so callers can
//! write `db::recent_posts(..)`.

pub mod repo;

pub use repo::*;
