//! # Analytics
//!
//! ## Recording
//!
//! One event (a page view or a link click) fans out into a handful of Redis
//! counters, all issued as a single `MULTI` pipeline so a half-recorded event
//! cannot exist:
//!
//! - lifetime `views`/`clicks` in the `stats:{slug}` hash
//! - a per-day counter with a bounded TTL
//! - the clicked link's counter (clicks) or the referrer source's counter (views)
//! - `PFADD` of the visitor hash into the day's HyperLogLog
//!
//! ## IP hashing
//!
//! Raw client addresses are never stored. Each event carries
//! `hex(sha256(daily_salt || ip))` where `daily_salt = sha256(secret || day)`.
//! Rotating the salt daily means the same visitor produces unrelated hashes on
//! different days, so the stored data cannot reconstruct cross-day behavior.
//!
//! ## Reporting
//!
//! The aggregator reads raw counter maps back and shapes them in process:
//! gap-filled day series, click-through rate, per-link joins against the
//! current profile, and a descending referrer breakdown. The shaping is a pure
//! function over the fetched maps, so it is tested without a database.
use std::collections::HashMap;

use chrono::{Duration, NaiveDate, Utc};
use redis::{AsyncCommands, aio::ConnectionManager};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    database::{
        DAY_KEY_TTL_SECS, day_clicks_key, day_views_key, link_stats_key, source_stats_key,
        stats_key, uniques_key,
    },
    error::AppError,
    models::Profile,
    referrer::Source,
};

pub const MAX_REPORT_DAYS: u32 = 90;

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    View,
    Click,
}

pub fn sha256_hex(input: &[u8]) -> String {
    Sha256::digest(input)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Daily-salted visitor hash; never store the address itself.
pub fn ip_hash(secret: &str, ip: &str, day: NaiveDate) -> String {
    let salt = Sha256::digest(format!("{secret}{}", day.format("%Y-%m-%d")).as_bytes());

    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(ip.as_bytes());

    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

pub async fn record_event(
    conn: &mut ConnectionManager,
    slug: &str,
    kind: EventKind,
    link_id: Option<Uuid>,
    source: Source,
    visitor_hash: &str,
    day: NaiveDate,
) -> Result<(), AppError> {
    let total_field = match kind {
        EventKind::View => "views",
        EventKind::Click => "clicks",
    };
    let day_key = match kind {
        EventKind::View => day_views_key(slug, day),
        EventKind::Click => day_clicks_key(slug, day),
    };
    let uniques = uniques_key(slug, day);

    let mut pipe = redis::pipe();
    pipe.atomic()
        .hincr(stats_key(slug), total_field, 1)
        .ignore()
        .incr(&day_key, 1)
        .ignore()
        .expire(&day_key, DAY_KEY_TTL_SECS)
        .ignore();

    match kind {
        EventKind::Click => {
            if let Some(id) = link_id {
                pipe.hincr(link_stats_key(slug), id.to_string(), 1).ignore();
            }
        }
        EventKind::View => {
            pipe.hincr(source_stats_key(slug), source.as_str(), 1)
                .ignore();
        }
    }

    pipe.cmd("PFADD")
        .arg(&uniques)
        .arg(visitor_hash)
        .ignore()
        .expire(&uniques, DAY_KEY_TTL_SECS)
        .ignore();

    let _: () = pipe.query_async(conn).await?;

    #[cfg(feature = "verbose")]
    println!("Recorded {kind:?} for {slug} as {}", source.as_str());

    Ok(())
}

#[derive(Serialize, Debug)]
pub struct StatsReport {
    pub views: u64,
    pub clicks: u64,
    pub click_rate: f64,
    pub links: Vec<LinkStats>,
    pub sources: Vec<SourceStats>,
    pub days: Vec<DayStats>,
}

#[derive(Serialize, Debug)]
pub struct LinkStats {
    pub id: Uuid,
    /// None for links since removed from the profile; their counters survive.
    pub label: Option<String>,
    pub url: Option<String>,
    pub clicks: u64,
}

#[derive(Serialize, Debug)]
pub struct SourceStats {
    pub source: &'static str,
    pub views: u64,
}

#[derive(Serialize, Debug)]
pub struct DayStats {
    pub day: NaiveDate,
    pub views: u64,
    pub clicks: u64,
    pub uniques: u64,
}

pub async fn stats(
    conn: &mut ConnectionManager,
    profile: &Profile,
    days: u32,
) -> Result<StatsReport, AppError> {
    let slug = &profile.slug;
    let window = window_ending(Utc::now().date_naive(), days);

    let totals: HashMap<String, u64> = conn.hgetall(stats_key(slug)).await?;
    let link_clicks: HashMap<String, u64> = conn.hgetall(link_stats_key(slug)).await?;
    let source_views: HashMap<String, u64> = conn.hgetall(source_stats_key(slug)).await?;

    let view_keys: Vec<String> = window.iter().map(|d| day_views_key(slug, *d)).collect();
    let click_keys: Vec<String> = window.iter().map(|d| day_clicks_key(slug, *d)).collect();

    let day_views: Vec<Option<u64>> = conn.mget(view_keys).await?;
    let day_clicks: Vec<Option<u64>> = conn.mget(click_keys).await?;

    let mut pfcounts = redis::pipe();
    for day in &window {
        pfcounts.cmd("PFCOUNT").arg(uniques_key(slug, *day));
    }
    let day_uniques: Vec<u64> = pfcounts.query_async(conn).await?;

    Ok(shape_report(
        profile,
        &totals,
        &link_clicks,
        &source_views,
        &window,
        &day_views,
        &day_clicks,
        &day_uniques,
    ))
}

pub fn window_ending(end: NaiveDate, days: u32) -> Vec<NaiveDate> {
    (0..days as i64)
        .rev()
        .map(|offset| end - Duration::days(offset))
        .collect()
}

#[allow(clippy::too_many_arguments)]
pub fn shape_report(
    profile: &Profile,
    totals: &HashMap<String, u64>,
    link_clicks: &HashMap<String, u64>,
    source_views: &HashMap<String, u64>,
    window: &[NaiveDate],
    day_views: &[Option<u64>],
    day_clicks: &[Option<u64>],
    day_uniques: &[u64],
) -> StatsReport {
    let views = totals.get("views").copied().unwrap_or(0);
    let clicks = totals.get("clicks").copied().unwrap_or(0);

    let click_rate = if views == 0 {
        0.0
    } else {
        clicks as f64 / views as f64
    };

    // Current links in profile order, then orphaned counters by clicks.
    let mut links: Vec<LinkStats> = profile
        .links
        .iter()
        .map(|link| LinkStats {
            id: link.id,
            label: Some(link.label.clone()),
            url: Some(link.url.clone()),
            clicks: link_clicks.get(&link.id.to_string()).copied().unwrap_or(0),
        })
        .collect();

    let mut orphans: Vec<LinkStats> = link_clicks
        .iter()
        .filter_map(|(raw_id, count)| {
            let id = Uuid::parse_str(raw_id).ok()?;
            profile.link(id).is_none().then_some(LinkStats {
                id,
                label: None,
                url: None,
                clicks: *count,
            })
        })
        .collect();
    orphans.sort_by(|a, b| b.clicks.cmp(&a.clicks).then(a.id.cmp(&b.id)));
    links.extend(orphans);

    let mut sources: Vec<SourceStats> = source_views
        .iter()
        .map(|(field, count)| SourceStats {
            source: Source::from_field(field).as_str(),
            views: *count,
        })
        .collect();
    sources.sort_by(|a, b| b.views.cmp(&a.views).then(a.source.cmp(b.source)));

    let days = window
        .iter()
        .enumerate()
        .map(|(i, day)| DayStats {
            day: *day,
            views: day_views.get(i).copied().flatten().unwrap_or(0),
            clicks: day_clicks.get(i).copied().flatten().unwrap_or(0),
            uniques: day_uniques.get(i).copied().unwrap_or(0),
        })
        .collect();

    StatsReport {
        views,
        clicks,
        click_rate,
        links,
        sources,
        days,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::NaiveDate;
    use uuid::Uuid;

    use super::{ip_hash, shape_report, window_ending};
    use crate::models::{Link, Profile};

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn profile_with_link(id: Uuid) -> Profile {
        let mut profile = Profile::new("p".to_string(), "P".to_string());
        profile.links.push(Link {
            id,
            label: "Blog".to_string(),
            url: "https://example.com".to_string(),
            enabled: true,
        });

        profile
    }

    #[test]
    fn test_ip_hash_stable_within_day() {
        let d = day("2026-03-07");

        assert_eq!(ip_hash("s", "203.0.113.9", d), ip_hash("s", "203.0.113.9", d));
        assert_eq!(ip_hash("s", "203.0.113.9", d).len(), 64);
    }

    #[test]
    fn test_ip_hash_rotates_daily() {
        let a = ip_hash("s", "203.0.113.9", day("2026-03-07"));
        let b = ip_hash("s", "203.0.113.9", day("2026-03-08"));

        assert_ne!(a, b);
    }

    #[test]
    fn test_ip_hash_distinguishes_inputs() {
        let d = day("2026-03-07");

        assert_ne!(ip_hash("s", "203.0.113.9", d), ip_hash("s", "203.0.113.10", d));
        assert_ne!(ip_hash("s1", "203.0.113.9", d), ip_hash("s2", "203.0.113.9", d));
    }

    #[test]
    fn test_window_ascending_and_inclusive() {
        let window = window_ending(day("2026-03-07"), 3);

        assert_eq!(window, vec![day("2026-03-05"), day("2026-03-06"), day("2026-03-07")]);
    }

    #[test]
    fn test_report_gap_filling_and_ctr() {
        let id = Uuid::new_v4();
        let profile = profile_with_link(id);

        let totals = HashMap::from([("views".to_string(), 10), ("clicks".to_string(), 4)]);
        let link_clicks = HashMap::from([(id.to_string(), 4)]);
        let sources = HashMap::new();

        let window = window_ending(day("2026-03-07"), 3);
        let day_views = vec![Some(7), None, Some(3)];
        let day_clicks = vec![None, Some(4), None];
        let uniques = vec![5, 0, 2];

        let report = shape_report(
            &profile, &totals, &link_clicks, &sources, &window, &day_views, &day_clicks, &uniques,
        );

        assert_eq!(report.views, 10);
        assert_eq!(report.clicks, 4);
        assert!((report.click_rate - 0.4).abs() < 1e-9);

        assert_eq!(report.days.len(), 3);
        assert_eq!(report.days[1].views, 0);
        assert_eq!(report.days[1].clicks, 4);
        assert_eq!(report.days[2].uniques, 2);

        assert_eq!(report.links.len(), 1);
        assert_eq!(report.links[0].clicks, 4);
        assert_eq!(report.links[0].label.as_deref(), Some("Blog"));
    }

    #[test]
    fn test_report_zero_views_zero_rate() {
        let profile = Profile::new("p".to_string(), "P".to_string());
        let empty = HashMap::new();

        let report = shape_report(&profile, &empty, &empty, &empty, &[], &[], &[], &[]);

        assert_eq!(report.click_rate, 0.0);
        assert!(report.days.is_empty());
    }

    #[test]
    fn test_report_keeps_orphaned_link_counters() {
        let kept = Uuid::new_v4();
        let removed = Uuid::new_v4();
        let profile = profile_with_link(kept);

        let link_clicks =
            HashMap::from([(kept.to_string(), 2), (removed.to_string(), 9)]);
        let empty = HashMap::new();

        let report = shape_report(&profile, &empty, &link_clicks, &empty, &[], &[], &[], &[]);

        assert_eq!(report.links.len(), 2);
        assert_eq!(report.links[0].id, kept);
        assert_eq!(report.links[1].id, removed);
        assert_eq!(report.links[1].label, None);
        assert_eq!(report.links[1].clicks, 9);
    }

    #[test]
    fn test_report_sources_sorted_descending() {
        let profile = Profile::new("p".to_string(), "P".to_string());
        let sources = HashMap::from([
            ("twitter".to_string(), 3),
            ("direct".to_string(), 8),
            ("google".to_string(), 3),
        ]);
        let empty = HashMap::new();

        let report = shape_report(&profile, &empty, &empty, &sources, &[], &[], &[], &[]);

        assert_eq!(report.sources[0].source, "direct");
        assert_eq!(report.sources[1].source, "google");
        assert_eq!(report.sources[2].source, "twitter");
    }
}
