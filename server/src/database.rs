//! # Redis
//!
//! RAM database doubling as the document store.
//!
//! Everything is either a JSON document in a hash or a plain counter, so the
//! whole dataset for a profile stays small and every write is a single atomic
//! command (or one `MULTI` pipeline for analytics, see [`crate::analytics`]).
//!
//! ## Key layout
//!
//! - `profiles` hash: slug → [`Profile`](crate::models::Profile) JSON
//! - `messages:{slug}` list: contact message JSON, newest first, capped
//! - `stats:{slug}` hash: `views` / `clicks` lifetime totals
//! - `stats:{slug}:links` hash: link id → click count
//! - `stats:{slug}:sources` hash: referrer source → view count
//! - `stats:{slug}:views:{day}` / `stats:{slug}:clicks:{day}`: per-day
//!   counters, TTL ~100 days
//! - `stats:{slug}:uniques:{day}`: HyperLogLog of daily ip hashes, same TTL
//! - `ratelimit:{scope}:{ip_hash}`: fixed-window counters, 60 s TTL
use std::time::Duration;

use chrono::NaiveDate;
use redis::{
    AsyncCommands, Client,
    aio::{ConnectionManager, ConnectionManagerConfig},
};

use crate::{
    error::AppError,
    models::{ContactMessage, Profile},
};

pub const PROFILES_KEY: &str = "profiles";

/// Newest messages win; anything past the cap falls off the tail.
pub const MESSAGE_CAP: isize = 500;

/// Day-bucketed counters outlive the maximum 90 day reporting window by a margin.
pub const DAY_KEY_TTL_SECS: i64 = 100 * 24 * 60 * 60;

const RATE_WINDOW_SECS: i64 = 60;

pub async fn init_redis(redis_url: &str) -> ConnectionManager {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(100));

    let client = Client::open(redis_url).unwrap();

    client
        .get_connection_manager_with_config(config)
        .await
        .unwrap()
}

pub fn messages_key(slug: &str) -> String {
    format!("messages:{slug}")
}

pub fn stats_key(slug: &str) -> String {
    format!("stats:{slug}")
}

pub fn link_stats_key(slug: &str) -> String {
    format!("stats:{slug}:links")
}

pub fn source_stats_key(slug: &str) -> String {
    format!("stats:{slug}:sources")
}

pub fn day_views_key(slug: &str, day: NaiveDate) -> String {
    format!("stats:{slug}:views:{}", day.format("%Y-%m-%d"))
}

pub fn day_clicks_key(slug: &str, day: NaiveDate) -> String {
    format!("stats:{slug}:clicks:{}", day.format("%Y-%m-%d"))
}

pub fn uniques_key(slug: &str, day: NaiveDate) -> String {
    format!("stats:{slug}:uniques:{}", day.format("%Y-%m-%d"))
}

pub async fn get_profile(
    conn: &mut ConnectionManager,
    slug: &str,
) -> Result<Option<Profile>, AppError> {
    let raw: Option<String> = conn.hget(PROFILES_KEY, slug).await?;

    match raw {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

pub async fn put_profile(conn: &mut ConnectionManager, profile: &Profile) -> Result<(), AppError> {
    let json = serde_json::to_string(profile)?;
    let _: () = conn.hset(PROFILES_KEY, &profile.slug, json).await?;

    Ok(())
}

pub async fn profile_exists(conn: &mut ConnectionManager, slug: &str) -> Result<bool, AppError> {
    Ok(conn.hexists(PROFILES_KEY, slug).await?)
}

pub async fn list_profiles(conn: &mut ConnectionManager) -> Result<Vec<Profile>, AppError> {
    let raw: Vec<String> = conn.hvals(PROFILES_KEY).await?;

    let mut profiles = raw
        .iter()
        .map(|json| serde_json::from_str(json))
        .collect::<Result<Vec<Profile>, _>>()?;

    profiles.sort_by(|a, b| a.slug.cmp(&b.slug));

    Ok(profiles)
}

/// Removes the document plus every key derived from the slug. Returns false
/// when the profile never existed.
pub async fn delete_profile(conn: &mut ConnectionManager, slug: &str) -> Result<bool, AppError> {
    let removed: i64 = conn.hdel(PROFILES_KEY, slug).await?;

    if removed == 0 {
        return Ok(false);
    }

    let mut doomed = vec![messages_key(slug), stats_key(slug)];

    {
        let mut iter = conn
            .scan_match::<_, String>(format!("stats:{slug}:*"))
            .await?;

        while let Some(key) = iter.next_item().await {
            doomed.push(key);
        }
    }

    let _: () = conn.del(doomed).await?;

    Ok(true)
}

pub async fn push_message(
    conn: &mut ConnectionManager,
    slug: &str,
    message: &ContactMessage,
) -> Result<(), AppError> {
    let key = messages_key(slug);
    let json = serde_json::to_string(message)?;

    let _: () = redis::pipe()
        .atomic()
        .lpush(&key, json)
        .ignore()
        .ltrim(&key, 0, MESSAGE_CAP - 1)
        .ignore()
        .query_async(conn)
        .await?;

    Ok(())
}

pub async fn get_messages(
    conn: &mut ConnectionManager,
    slug: &str,
    limit: isize,
) -> Result<Vec<ContactMessage>, AppError> {
    let raw: Vec<String> = conn.lrange(messages_key(slug), 0, limit - 1).await?;

    raw.iter()
        .map(|json| serde_json::from_str(json).map_err(AppError::from))
        .collect()
}

pub async fn clear_messages(conn: &mut ConnectionManager, slug: &str) -> Result<(), AppError> {
    let _: () = conn.del(messages_key(slug)).await?;

    Ok(())
}

pub fn rate_limit_key(scope: &str, ip_hash: &str) -> String {
    format!("ratelimit:{scope}:{ip_hash}")
}

/// Fixed-window counter per ip hash. `EXPIRE NX` pins the window to the first
/// hit, and the single `MULTI` means the counter can never exist without its TTL.
pub async fn rate_limit_exceeded(
    conn: &mut ConnectionManager,
    scope: &str,
    ip_hash: &str,
    limit: u32,
) -> Result<bool, AppError> {
    let key = rate_limit_key(scope, ip_hash);

    let (count,): (u32,) = redis::pipe()
        .atomic()
        .incr(&key, 1)
        .cmd("EXPIRE")
        .arg(&key)
        .arg(RATE_WINDOW_SECS)
        .arg("NX")
        .ignore()
        .query_async(conn)
        .await?;

    Ok(count > limit)
}
