pub mod assemble;
pub mod extract;
pub mod nodes;
pub mod resolve;
pub mod transcript;
pub mod transform;

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;

pub use extract::ExtractError;

use crate::vault::ReferenceIndex;

static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#\s+(.+)$").unwrap());
static BLANKS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());
static ORDERED_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+\.\s").unwrap());

/// Metadata record carried through the pipeline and serialized as the
/// note's frontmatter. Link counters are finalized after resolution.
#[derive(Debug, Clone)]
pub struct NoteMeta {
    pub title: String,
    pub subtitle: Option<String>,
    pub author: String,
    pub publication: String,
    pub published: NaiveDate,
    pub updated: Option<NaiveDate>,
    pub retrieved: DateTime<Utc>,
    pub url: String,
    pub canonical: String,
    pub slug: String,
    pub tags: Vec<String>,
    pub image: Option<String>,
    pub links_internal: usize,
    pub links_external: usize,
}

pub struct ConvertedNote {
    pub meta: NoteMeta,
    pub markdown: String,
    pub warnings: Vec<String>,
}

/// Full conversion pipeline for one fetched page:
/// extract → transform → resolve references → assemble.
pub fn convert_post(
    html: &str,
    url: &str,
    index: &ReferenceIndex,
    retrieved: DateTime<Utc>,
) -> Result<ConvertedNote, ExtractError> {
    let (mut meta, fragment) = extract::extract_article(html, url, retrieved)?;
    let mut transformed = transform::transform_fragment(&fragment);
    let counts = resolve::resolve_links(&mut transformed.root, index);
    meta.links_internal = counts.internal;
    meta.links_external = counts.external;
    let body = nodes::render(&transformed.root);
    let markdown = assemble::assemble(&meta, &body);
    Ok(ConvertedNote {
        meta,
        markdown,
        warnings: transformed.warnings,
    })
}

/// Cleanup-only reprocessing of an already-exported Markdown file: scrub
/// transcript markers, tidy spacing, and re-wrap with fresh frontmatter.
/// No fetching and no reference resolution happens here.
pub fn reprocess_markdown(raw: &str, url: &str, retrieved: DateTime<Utc>) -> ConvertedNote {
    let cleaned_url = clean_url(url);
    let slug = url::Url::parse(&cleaned_url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segs| segs.filter(|s| !s.is_empty()).last().map(str::to_string))
        })
        .map(|seg| slugify(&seg))
        .filter(|s| !s.is_empty());
    let title = TITLE_RE
        .captures(raw)
        .map(|c| c[1].trim().to_string())
        .or_else(|| slug.clone())
        .unwrap_or_else(|| "untitled".to_string());
    let slug = slug.unwrap_or_else(|| slugify(&title));

    let body = tidy_markdown(&transcript::scrub_lines(raw));
    let publication = publication_from_url(&cleaned_url);

    let meta = NoteMeta {
        title,
        subtitle: None,
        author: publication.clone(),
        publication,
        published: retrieved.date_naive(),
        updated: None,
        retrieved,
        url: cleaned_url.clone(),
        canonical: cleaned_url,
        slug,
        tags: vec!["substack".to_string()],
        image: None,
        links_internal: 0,
        links_external: 0,
    };
    let markdown = assemble::assemble(&meta, &body);
    ConvertedNote {
        meta,
        markdown,
        warnings: Vec::new(),
    }
}

/// Canonical form of an address: query string and fragment removed.
pub fn clean_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.to_string(),
    }
}

pub fn slugify(text: &str) -> String {
    let mut out = String::new();
    let mut pending_dash = false;
    for ch in text.trim().to_lowercase().chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch);
        } else if ch.is_whitespace() || ch == '-' || ch == '_' {
            pending_dash = true;
        }
        // remaining punctuation is dropped outright
    }
    out
}

pub(crate) fn publication_from_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .and_then(|host| host.split('.').next().map(str::to_string))
        .filter(|label| !label.is_empty())
        .unwrap_or_else(|| "substack".to_string())
}

/// Markdown spacing fixes for reprocessed exports: no blank line directly
/// after a heading, no blank lines between list items, at most one blank
/// line anywhere else.
pub fn tidy_markdown(md: &str) -> String {
    let lines: Vec<&str> = md.lines().collect();
    let mut kept: Vec<&str> = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            let prev = kept.last().copied().unwrap_or("");
            if prev.trim_start().starts_with('#') {
                continue;
            }
            if let Some(next) = lines.get(i + 1) {
                if is_list_item(next)
                    && (is_list_item(prev)
                        || prev.trim_end().ends_with(':')
                        || prev.trim_start().starts_with('#'))
                {
                    continue;
                }
            }
        }
        kept.push(line);
    }
    let joined = kept.join("\n");
    let collapsed = BLANKS_RE.replace_all(&joined, "\n\n");
    format!("{}\n", collapsed.trim_end())
}

fn is_list_item(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("- ") || t.starts_with("* ") || ORDERED_ITEM_RE.is_match(t)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn retrieved() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 2, 9, 30, 0).unwrap()
    }

    #[test]
    fn clean_url_strips_query_and_fragment() {
        assert_eq!(
            clean_url("https://pubA.substack.com/p/the-trust-gap?utm_source=share#fn1"),
            "https://puba.substack.com/p/the-trust-gap"
        );
        assert_eq!(clean_url("not a url"), "not a url");
    }

    #[test]
    fn slugify_matches_address_style() {
        assert_eq!(slugify("The Merits of Doing Things"), "the-merits-of-doing-things");
        assert_eq!(slugify("it's fine_really -- ok"), "its-fine-really-ok");
        assert_eq!(slugify("  trimmed  "), "trimmed");
    }

    #[test]
    fn tidy_removes_blank_after_heading_and_in_lists() {
        let input = "# Title\n\nIntro:\n\n- one\n\n- two\n\n\n\nEnd.";
        assert_eq!(tidy_markdown(input), "# Title\nIntro:\n- one\n- two\n\nEnd.\n");
    }

    #[test]
    fn full_pipeline_is_deterministic() {
        let html = std::fs::read_to_string("tests/fixtures/post.html").unwrap();
        let url = "https://daveshap.substack.com/p/the-merits-of-doing-things-the-hard";
        let mut index = crate::vault::ReferenceIndex::default();
        index.insert(
            "https://daveshap.substack.com/p/the-trust-gap",
            "2025-09-29-the-trust-gap",
        );

        let a = convert_post(&html, url, &index, retrieved()).unwrap();
        let b = convert_post(&html, url, &index, retrieved()).unwrap();
        assert_eq!(a.markdown, b.markdown);
    }

    #[test]
    fn full_pipeline_resolves_known_links_and_counts() {
        let html = std::fs::read_to_string("tests/fixtures/post.html").unwrap();
        let url = "https://daveshap.substack.com/p/the-merits-of-doing-things-the-hard";
        let mut index = crate::vault::ReferenceIndex::default();
        index.insert(
            "https://daveshap.substack.com/p/the-trust-gap",
            "2025-09-29-the-trust-gap",
        );

        let note = convert_post(&html, url, &index, retrieved()).unwrap();
        assert!(note.markdown.contains("[[2025-09-29-the-trust-gap]]"));
        // The unknown post link and the figure image stay external.
        assert!(note
            .markdown
            .contains("(https://daveshap.substack.com/p/some-future-post)"));
        assert_eq!(note.meta.links_internal, 1);
        assert!(note.meta.links_external >= 2);
        // Images are referenced, never embedded.
        assert!(!note.markdown.contains("base64"));
    }

    #[test]
    fn full_pipeline_appends_footnotes_last() {
        let html = std::fs::read_to_string("tests/fixtures/post.html").unwrap();
        let url = "https://daveshap.substack.com/p/the-merits-of-doing-things-the-hard";
        let note =
            convert_post(&html, url, &crate::vault::ReferenceIndex::default(), retrieved())
                .unwrap();
        let body = note.markdown;
        let def = body.find("[^1]: ").expect("footnote definition present");
        let last_para = body.rfind("friction").unwrap_or(0);
        assert!(def > last_para, "footnote definitions must come last");
    }

    #[test]
    fn reprocess_scrubs_and_wraps() {
        let raw = "# Exported Episode\n\n0:42 Alice: Hello there.\n\nplain prose";
        let note = reprocess_markdown(
            raw,
            "https://pod.substack.com/p/exported-episode?utm_source=x",
            retrieved(),
        );
        assert_eq!(note.meta.title, "Exported Episode");
        assert_eq!(note.meta.publication, "pod");
        assert_eq!(note.meta.slug, "exported-episode");
        assert_eq!(note.meta.published, retrieved().date_naive());
        assert!(note.markdown.contains("Hello there."));
        assert!(!note.markdown.contains("0:42"));
        assert!(note.markdown.starts_with("---\ntitle: Exported Episode\n"));
    }
}
