use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::info;

static POST_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://[a-z0-9-]+\.substack\.com/p/[A-Za-z0-9][A-Za-z0-9_-]*$").unwrap()
});

/// Fetch a publication's sitemap and return its post URLs, sorted. This is
/// the no-browser alternative to scrolling the archive page.
pub async fn fetch_post_urls(publication: &str) -> Result<Vec<String>> {
    let sitemap_url = format!("https://{}.substack.com/sitemap.xml", publication);
    info!("Fetching sitemap: {}", sitemap_url);

    let client = reqwest::Client::new();
    let xml = client
        .get(&sitemap_url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await
        .context("Failed to fetch publication sitemap")?;

    let all_urls = parse_urlset(&xml)?;
    info!("Total URLs in sitemap: {}", all_urls.len());

    // Post pages only; drop /about, /archive, tag pages and the like.
    let mut posts: Vec<String> = all_urls
        .into_iter()
        .filter(|url| POST_URL_RE.is_match(url))
        .collect();
    posts.sort();
    posts.dedup();
    info!("Post pages after filtering: {}", posts.len());
    Ok(posts)
}

/// Parse a urlset XML and return all <loc> URLs.
fn parse_urlset(xml: &str) -> Result<Vec<String>> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut urls = Vec::new();
    let mut in_url = false;
    let mut in_loc = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.name().as_ref() {
                b"url" => in_url = true,
                b"loc" if in_url => in_loc = true,
                _ => {}
            },
            Ok(quick_xml::events::Event::Text(e)) if in_loc => {
                urls.push(e.unescape()?.to_string());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.name().as_ref() {
                b"loc" => in_loc = false,
                b"url" => in_url = false,
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
        buf.clear();
    }
    Ok(urls)
}

// ── Tests ──
