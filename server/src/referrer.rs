//! # Referrer Classification
//!
//! Raw `Referer` values never hit Redis. Each incoming value is collapsed into
//! one bucket of a closed set before it is counted, so the stored breakdown
//! stays small and free of user-identifying URLs.
//!
//! Classification is by host suffix after URL parsing. Shorteners and mobile
//! hosts that belong to a known network map to that network (`t.co` and
//! `x.com` to Twitter, `youtu.be` to YouTube, `fb.com` to Facebook).
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Direct,
    Google,
    Bing,
    DuckDuckGo,
    Twitter,
    Instagram,
    Facebook,
    TikTok,
    YouTube,
    LinkedIn,
    Reddit,
    GitHub,
    Other,
}

const SUFFIX_TABLE: &[(&str, Source)] = &[
    ("google.com", Source::Google),
    ("bing.com", Source::Bing),
    ("duckduckgo.com", Source::DuckDuckGo),
    ("twitter.com", Source::Twitter),
    ("x.com", Source::Twitter),
    ("t.co", Source::Twitter),
    ("instagram.com", Source::Instagram),
    ("facebook.com", Source::Facebook),
    ("fb.com", Source::Facebook),
    ("tiktok.com", Source::TikTok),
    ("youtube.com", Source::YouTube),
    ("youtu.be", Source::YouTube),
    ("linkedin.com", Source::LinkedIn),
    ("lnkd.in", Source::LinkedIn),
    ("reddit.com", Source::Reddit),
    ("redd.it", Source::Reddit),
    ("github.com", Source::GitHub),
];

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Direct => "direct",
            Source::Google => "google",
            Source::Bing => "bing",
            Source::DuckDuckGo => "duckduckgo",
            Source::Twitter => "twitter",
            Source::Instagram => "instagram",
            Source::Facebook => "facebook",
            Source::TikTok => "tiktok",
            Source::YouTube => "youtube",
            Source::LinkedIn => "linkedin",
            Source::Reddit => "reddit",
            Source::GitHub => "github",
            Source::Other => "other",
        }
    }

    pub fn from_field(field: &str) -> Source {
        match field {
            "direct" => Source::Direct,
            "google" => Source::Google,
            "bing" => Source::Bing,
            "duckduckgo" => Source::DuckDuckGo,
            "twitter" => Source::Twitter,
            "instagram" => Source::Instagram,
            "facebook" => Source::Facebook,
            "tiktok" => Source::TikTok,
            "youtube" => Source::YouTube,
            "linkedin" => Source::LinkedIn,
            "reddit" => Source::Reddit,
            "github" => Source::GitHub,
            _ => Source::Other,
        }
    }
}

pub fn classify(referrer: Option<&str>) -> Source {
    let raw = match referrer.map(str::trim) {
        None | Some("") => return Source::Direct,
        Some(raw) => raw,
    };

    let Some(host) = host_of(raw) else {
        return Source::Other;
    };

    for (suffix, source) in SUFFIX_TABLE {
        if host == *suffix || host.ends_with(&format!(".{suffix}")) {
            return *source;
        }
    }

    Source::Other
}

fn host_of(raw: &str) -> Option<String> {
    // Browsers send full URLs, but be lenient about bare hosts.
    let parsed = Url::parse(raw)
        .or_else(|_| Url::parse(&format!("https://{raw}")))
        .ok()?;

    let mut host = parsed.host_str()?.to_lowercase();

    for prefix in ["www.", "m.", "l.", "lm."] {
        if let Some(stripped) = host.strip_prefix(prefix) {
            host = stripped.to_string();
            break;
        }
    }

    if host.is_empty() { None } else { Some(host) }
}

#[cfg(test)]
mod tests {
    use super::{Source, classify};

    #[test]
    fn test_missing_is_direct() {
        assert_eq!(classify(None), Source::Direct);
        assert_eq!(classify(Some("")), Source::Direct);
        assert_eq!(classify(Some("   ")), Source::Direct);
    }

    #[test]
    fn test_search_engines() {
        assert_eq!(classify(Some("https://www.google.com/search?q=x")), Source::Google);
        assert_eq!(classify(Some("https://google.co")), Source::Other);
        assert_eq!(classify(Some("https://duckduckgo.com/")), Source::DuckDuckGo);
    }

    #[test]
    fn test_social_networks() {
        assert_eq!(classify(Some("https://t.co/abc123")), Source::Twitter);
        assert_eq!(classify(Some("https://x.com/someone/status/1")), Source::Twitter);
        assert_eq!(classify(Some("https://m.facebook.com/page")), Source::Facebook);
        assert_eq!(classify(Some("https://l.instagram.com/?u=x")), Source::Instagram);
        assert_eq!(classify(Some("https://youtu.be/dQw4w9WgXcQ")), Source::YouTube);
    }

    #[test]
    fn test_subdomains_match_suffix() {
        assert_eq!(classify(Some("https://news.google.com/home")), Source::Google);
        assert_eq!(classify(Some("https://old.reddit.com/r/rust")), Source::Reddit);
    }

    #[test]
    fn test_no_suffix_spoofing() {
        // evilgoogle.com must not count as google.com
        assert_eq!(classify(Some("https://evilgoogle.com")), Source::Other);
        assert_eq!(classify(Some("https://google.com.evil.net")), Source::Other);
    }

    #[test]
    fn test_bare_host_and_garbage() {
        assert_eq!(classify(Some("github.com")), Source::GitHub);
        assert_eq!(classify(Some("::not a url::")), Source::Other);
    }

    #[test]
    fn test_field_round_trip() {
        for source in [Source::Direct, Source::Twitter, Source::Other, Source::GitHub] {
            assert_eq!(Source::from_field(source.as_str()), source);
        }
        assert_eq!(Source::from_field("myspace"), Source::Other);
    }
}
