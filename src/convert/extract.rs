use chrono::{DateTime, NaiveDate, Utc};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use thiserror::Error;

use super::{clean_url, publication_from_url, slugify, NoteMeta};

/// Candidate article containers, tried in priority order. A tier is only
/// consulted when every earlier tier produced no viable subtree.
const CANDIDATE_SELECTORS: &[&str] = &[
    "article",
    "div.available-content",
    "div.post",
    "main",
    "body",
];

/// Below this much collapsed text a candidate is not a plausible article.
const MIN_CANDIDATE_CHARS: usize = 140;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("document is empty or unparseable")]
    EmptyDocument,
    #[error("no plausible article region found")]
    NoArticle,
    #[error("article has no title")]
    MissingTitle,
}

/// Isolate the article body and harvest metadata from a rendered page.
///
/// Pure function over the input HTML; returns the metadata record (link
/// counters still zero) and the article subtree as an HTML fragment.
pub fn extract_article(
    html: &str,
    url: &str,
    retrieved: DateTime<Utc>,
) -> Result<(NoteMeta, String), ExtractError> {
    if html.trim().is_empty() {
        return Err(ExtractError::EmptyDocument);
    }
    let doc = Html::parse_document(html);

    let body = select_article(&doc).ok_or(ExtractError::NoArticle)?;
    let fragment = body.html();

    let ld = parse_ld_json(&doc);

    let title = ld
        .as_ref()
        .and_then(|v| ld_str(v, "headline"))
        .or_else(|| first_text(&doc, "h1"))
        .or_else(|| meta_content(&doc, "meta[property='og:title']"))
        .or_else(|| first_text(&doc, "title"))
        .unwrap_or_default();
    if title.is_empty() {
        return Err(ExtractError::MissingTitle);
    }

    let subtitle = first_text(&doc, "h3.subtitle").filter(|s| !s.is_empty());

    let cleaned_url = clean_url(url);
    let publication = publication_from_url(&cleaned_url);
    let canonical = meta_content(&doc, "link[rel='canonical']")
        .map(|href| clean_url(&href))
        .unwrap_or_else(|| cleaned_url.clone());

    let author = ld
        .as_ref()
        .and_then(ld_author)
        .or_else(|| meta_content(&doc, "meta[name='author']"))
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| publication.clone());

    let published = ld
        .as_ref()
        .and_then(|v| ld_str(v, "datePublished"))
        .as_deref()
        .and_then(parse_date)
        .or_else(|| time_element_date(&doc))
        .unwrap_or_else(|| retrieved.date_naive());
    let updated = ld
        .as_ref()
        .and_then(|v| ld_str(v, "dateModified"))
        .as_deref()
        .and_then(parse_date);

    let image = ld
        .as_ref()
        .and_then(ld_image)
        .or_else(|| meta_content(&doc, "meta[property='og:image']"))
        .filter(|i| !i.is_empty());

    let slug = url::Url::parse(&cleaned_url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segs| segs.filter(|s| !s.is_empty()).last().map(str::to_string))
        })
        .map(|seg| slugify(&seg))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| slugify(&title));

    let tags = collect_tags(&doc, ld.as_ref());

    let meta = NoteMeta {
        title,
        subtitle,
        author,
        publication,
        published,
        updated,
        retrieved,
        url: cleaned_url,
        canonical,
        slug,
        tags,
        image,
        links_internal: 0,
        links_external: 0,
    };
    Ok((meta, fragment))
}

/// Rank subtrees within each candidate tier by text mass discounted for link
/// density; the first tier with a viable subtree wins.
fn select_article(doc: &Html) -> Option<ElementRef<'_>> {
    let link_sel = Selector::parse("a").unwrap();
    let para_sel = Selector::parse("p").unwrap();

    for tier in CANDIDATE_SELECTORS {
        let sel = Selector::parse(tier).unwrap();
        let mut best: Option<(i64, ElementRef)> = None;
        for el in doc.select(&sel) {
            let text_len = collapsed_len(el.text());
            if text_len < MIN_CANDIDATE_CHARS {
                continue;
            }
            let link_len: usize = el.select(&link_sel).map(|a| collapsed_len(a.text())).sum();
            let paras = el.select(&para_sel).count();
            let score =
                text_len as i64 - 2 * link_len.min(text_len) as i64 + 30 * paras as i64;
            // Strict comparison keeps the earliest subtree on ties.
            if best.map_or(true, |(s, _)| score > s) {
                best = Some((score, el));
            }
        }
        if let Some((_, el)) = best {
            return Some(el);
        }
    }
    None
}

fn collapsed_len<'a>(text: impl Iterator<Item = &'a str>) -> usize {
    text.flat_map(|t| t.split_whitespace())
        .map(|w| w.chars().count() + 1)
        .sum::<usize>()
        .saturating_sub(1)
}

/// First JSON-LD object on the page describing an article.
fn parse_ld_json(doc: &Html) -> Option<Value> {
    let sel = Selector::parse("script[type='application/ld+json']").unwrap();
    for script in doc.select(&sel) {
        let raw: String = script.text().collect();
        let Ok(parsed) = serde_json::from_str::<Value>(&raw) else {
            continue;
        };
        let items: Vec<&Value> = match &parsed {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        for item in items {
            let is_article = match &item["@type"] {
                Value::String(t) => matches!(t.as_str(), "Article" | "NewsArticle" | "BlogPosting"),
                Value::Array(ts) => ts.iter().any(|t| {
                    matches!(t.as_str(), Some("Article" | "NewsArticle" | "BlogPosting"))
                }),
                _ => false,
            };
            if is_article {
                return Some(item.clone());
            }
        }
    }
    None
}

fn ld_str(ld: &Value, key: &str) -> Option<String> {
    ld.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn ld_author(ld: &Value) -> Option<String> {
    let author = ld.get("author")?;
    let name = match author {
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => author.get("name").and_then(Value::as_str).map(str::to_string),
        Value::Array(items) => items.first().and_then(|a| match a {
            Value::String(s) => Some(s.clone()),
            other => other.get("name").and_then(Value::as_str).map(str::to_string),
        }),
        _ => None,
    };
    name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

fn ld_image(ld: &Value) -> Option<String> {
    let image = ld.get("image")?;
    let url = match image {
        Value::String(s) => Some(s.clone()),
        Value::Object(_) => image.get("url").and_then(Value::as_str).map(str::to_string),
        Value::Array(items) => items.first().and_then(|i| match i {
            Value::String(s) => Some(s.clone()),
            other => other.get("url").and_then(Value::as_str).map(str::to_string),
        }),
        _ => None,
    };
    url.filter(|u| !u.is_empty())
}

fn first_text(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).unwrap();
    doc.select(&sel).next().map(|el| {
        el.text()
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    })
}

fn meta_content(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).unwrap();
    let el = doc.select(&sel).next()?;
    let attr = if selector.starts_with("link") { "href" } else { "content" };
    el.value()
        .attr(attr)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn time_element_date(doc: &Html) -> Option<NaiveDate> {
    let sel = Selector::parse("time[datetime]").unwrap();
    doc.select(&sel)
        .next()
        .and_then(|el| el.value().attr("datetime"))
        .and_then(parse_date)
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    s.get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
}

/// Keywords from JSON-LD, meta tags, and tag-page anchors: case-normalized,
/// first-seen order, deduplicated, with the platform tag up front.
fn collect_tags(doc: &Html, ld: Option<&Value>) -> Vec<String> {
    let mut raw: Vec<String> = Vec::new();

    if let Some(ld) = ld {
        match ld.get("keywords") {
            Some(Value::String(s)) => raw.extend(s.split(',').map(str::to_string)),
            Some(Value::Array(items)) => {
                raw.extend(items.iter().filter_map(Value::as_str).map(str::to_string))
            }
            _ => {}
        }
    }
    if let Some(kw) = meta_content(doc, "meta[name='keywords']") {
        raw.extend(kw.split(',').map(str::to_string));
    }
    let tag_sel = Selector::parse("a[href*='/t/']").unwrap();
    for anchor in doc.select(&tag_sel) {
        raw.push(anchor.text().collect::<String>());
    }

    let mut tags: Vec<String> = Vec::new();
    for tag in raw {
        let normalized = tag
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-");
        if !normalized.is_empty() && !tags.contains(&normalized) {
            tags.push(normalized);
        }
    }
    if !tags.iter().any(|t| t == "substack") {
        tags.insert(0, "substack".to_string());
    }
    tags
}

// ── Tests ──
