//! Smoke/load tool: seeds a demo profile (when admin credentials are given),
//! fires synthetic view/click events with randomized referrers and addresses,
//! then reads the stats report back.
use anyhow::{Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rand::{Rng, seq::SliceRandom};
use reqwest::Client;
use serde_json::{Value, json};

const REFERRERS: &[Option<&str>] = &[
    None,
    None,
    Some("https://www.google.com/search?q=demo"),
    Some("https://t.co/abc123"),
    Some("https://l.instagram.com/?u=demo"),
    Some("https://old.reddit.com/r/rust"),
    Some("https://some-newsletter.example.net/issue/4"),
];

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Server base url
    #[arg(long, default_value = "http://localhost:1111")]
    base_url: String,

    /// Target profile slug
    #[arg(long, default_value = "demo")]
    slug: String,

    /// Number of synthetic events to fire
    #[arg(long, default_value_t = 200)]
    events: u32,

    /// Admin username; together with the password enables seeding and stats readback
    #[arg(long)]
    admin_user: Option<String>,

    /// Admin password
    #[arg(long)]
    admin_password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let client = Client::builder().cookie_store(true).build()?;

    let admin = match (&args.admin_user, &args.admin_password) {
        (Some(user), Some(password)) => {
            login(&client, &args.base_url, user, password).await?;
            true
        }
        _ => false,
    };

    let link_ids = if admin {
        seed_profile(&client, &args.base_url, &args.slug).await?
    } else {
        fetch_link_ids(&client, &args.base_url, &args.slug).await?
    };

    fire_events(&client, &args, &link_ids).await?;

    if admin {
        let stats = client
            .get(format!(
                "{}/admin/profiles/{}/stats?days=7",
                args.base_url, args.slug
            ))
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        println!("{}", serde_json::to_string_pretty(&stats)?);
    }

    Ok(())
}

async fn login(client: &Client, base_url: &str, user: &str, password: &str) -> Result<()> {
    let response = client
        .post(format!("{base_url}/admin/login"))
        .json(&json!({ "username": user, "password": password }))
        .send()
        .await?;

    if !response.status().is_success() {
        bail!("Login failed: {}", response.status());
    }

    Ok(())
}

async fn seed_profile(client: &Client, base_url: &str, slug: &str) -> Result<Vec<String>> {
    // 409 just means a previous run already created it.
    let created = client
        .post(format!("{base_url}/admin/profiles"))
        .json(&json!({ "slug": slug, "display_name": "Demo Page" }))
        .send()
        .await?;

    if !created.status().is_success() && created.status().as_u16() != 409 {
        bail!("Profile creation failed: {}", created.status());
    }

    let updated = client
        .put(format!("{base_url}/admin/profiles/{slug}"))
        .json(&json!({
            "display_name": "Demo Page",
            "bio": "Synthetic traffic target",
            "published": true,
            "links": [
                { "label": "Blog", "url": "https://example.com/blog" },
                { "label": "Shop", "url": "https://example.com/shop" },
                { "label": "Contact", "url": "https://example.com/contact" }
            ],
            "blocks": [
                { "kind": "heading", "body": "Hello" },
                { "kind": "divider" }
            ]
        }))
        .send()
        .await?
        .error_for_status()?
        .json::<Value>()
        .await?;

    Ok(extract_link_ids(&updated))
}

async fn fetch_link_ids(client: &Client, base_url: &str, slug: &str) -> Result<Vec<String>> {
    let profile = client
        .get(format!("{base_url}/p/{slug}"))
        .send()
        .await?
        .error_for_status()?
        .json::<Value>()
        .await?;

    Ok(extract_link_ids(&profile))
}

fn extract_link_ids(profile: &Value) -> Vec<String> {
    profile["links"]
        .as_array()
        .map(|links| {
            links
                .iter()
                .filter_map(|link| link["id"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

async fn fire_events(client: &Client, args: &Args, link_ids: &[String]) -> Result<()> {
    let pb = ProgressBar::new(args.events as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )
        .unwrap()
        .progress_chars("=> "),
    );

    let mut rejected = 0;

    for _ in 0..args.events {
        let (payload, visitor) = {
            let mut rng = rand::thread_rng();

            // Roughly 30% clicks when any link exists; ~80 distinct "visitors".
            let click = !link_ids.is_empty() && rng.gen_bool(0.3);
            let referrer = REFERRERS.choose(&mut rng).copied().flatten();
            let visitor = format!("203.0.113.{}", rng.gen_range(1..=80));

            let mut payload = json!({
                "slug": args.slug,
                "kind": if click { "click" } else { "view" },
                "referrer": referrer,
            });

            if click {
                payload["link_id"] = json!(link_ids.choose(&mut rng).unwrap());
            }

            (payload, visitor)
        };

        let response = client
            .post(format!("{}/api/events", args.base_url))
            .header("x-forwarded-for", visitor)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            rejected += 1;
        }

        pb.inc(1);
    }

    pb.finish_with_message("Done");

    if rejected > 0 {
        println!("Rejected events: {rejected}/{}", args.events);
    }

    Ok(())
}
