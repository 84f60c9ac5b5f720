use chrono::SecondsFormat;
use serde::Serialize;

use super::NoteMeta;

const SOURCE_TAG: &str = concat!("stackdown v", env!("CARGO_PKG_VERSION"));

// Field order here is the field order in the output file.
#[derive(Serialize)]
struct Frontmatter<'a> {
    title: &'a str,
    subtitle: &'a str,
    author: &'a str,
    publication: &'a str,
    published: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated: Option<String>,
    retrieved: String,
    url: &'a str,
    canonical: &'a str,
    slug: &'a str,
    tags: &'a [String],
    image: &'a str,
    links_internal: usize,
    links_external: usize,
    source: &'a str,
}

/// Merge metadata and rendered body into the final note text. Output is
/// byte-deterministic for identical inputs; only `retrieved` varies between
/// runs over the same page.
pub fn assemble(meta: &NoteMeta, body: &str) -> String {
    let fm = Frontmatter {
        title: &meta.title,
        subtitle: meta.subtitle.as_deref().unwrap_or(""),
        author: &meta.author,
        publication: &meta.publication,
        published: meta.published.to_string(),
        updated: meta.updated.map(|d| d.to_string()),
        retrieved: meta.retrieved.to_rfc3339_opts(SecondsFormat::Secs, true),
        url: &meta.url,
        canonical: &meta.canonical,
        slug: &meta.slug,
        tags: &meta.tags,
        image: meta.image.as_deref().unwrap_or(""),
        links_internal: meta.links_internal,
        links_external: meta.links_external,
        source: SOURCE_TAG,
    };
    let yaml = serde_yaml::to_string(&fm).unwrap_or_default();
    format!("---\n{}---\n\n{}\n", yaml, body.trim_end())
}

/// Filename stem shared by the note and the wikilinks pointing at it.
pub fn note_stem(meta: &NoteMeta) -> String {
    format!("{}-{}", meta.published, meta.slug)
}

pub fn note_filename(meta: &NoteMeta) -> String {
    sanitize_filename(&format!("{}.md", note_stem(meta)))
}

fn sanitize_filename(name: &str) -> String {
    name.replace(['/', '\\'], "-")
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn meta() -> NoteMeta {
        NoteMeta {
            title: "The Merits of Doing Things the Hard Way".to_string(),
            subtitle: Some("Why friction teaches".to_string()),
            author: "David Shapiro".to_string(),
            publication: "daveshap".to_string(),
            published: NaiveDate::from_ymd_opt(2025, 10, 18).unwrap(),
            updated: None,
            retrieved: Utc.with_ymd_and_hms(2025, 11, 2, 9, 30, 0).unwrap(),
            url: "https://daveshap.substack.com/p/the-merits-of-doing-things-the-hard"
                .to_string(),
            canonical: "https://daveshap.substack.com/p/the-merits-of-doing-things-the-hard"
                .to_string(),
            slug: "the-merits-of-doing-things-the-hard".to_string(),
            tags: vec!["substack".to_string(), "ai".to_string()],
            image: None,
            links_internal: 1,
            links_external: 2,
        }
    }

    #[test]
    fn frontmatter_keys_stay_in_fixed_order() {
        let note = assemble(&meta(), "Body.");
        let fm_end = note.find("\n---\n\n").unwrap();
        let fm = &note[..fm_end];
        let keys = [
            "title:",
            "subtitle:",
            "author:",
            "publication:",
            "published:",
            "retrieved:",
            "url:",
            "canonical:",
            "slug:",
            "tags:",
            "image:",
            "links_internal:",
            "links_external:",
            "source:",
        ];
        let mut last = 0;
        for key in keys {
            let pos = fm.find(key).unwrap_or_else(|| panic!("missing {}", key));
            assert!(pos >= last, "{} out of order", key);
            last = pos;
        }
    }

    #[test]
    fn updated_is_omitted_when_unknown() {
        let note = assemble(&meta(), "Body.");
        assert!(!note.contains("updated:"));
        let mut m = meta();
        m.updated = Some(NaiveDate::from_ymd_opt(2025, 10, 20).unwrap());
        let note = assemble(&m, "Body.");
        assert!(note.contains("updated: 2025-10-20"));
    }

    #[test]
    fn output_is_idempotent() {
        let a = assemble(&meta(), "Body text.\n");
        let b = assemble(&meta(), "Body text.\n");
        assert_eq!(a, b);
    }

    #[test]
    fn body_follows_blank_line_after_fence() {
        let note = assemble(&meta(), "First paragraph.\n");
        assert!(note.ends_with("---\n\nFirst paragraph.\n"));
    }

    #[test]
    fn filename_derives_from_published_date_and_slug() {
        assert_eq!(
            note_filename(&meta()),
            "2025-10-18-the-merits-of-doing-things-the-hard.md"
        );
    }

    #[test]
    fn filename_separators_are_sanitized() {
        let mut m = meta();
        m.slug = "a/b".to_string();
        assert!(!note_filename(&m).contains('/'));
    }
}
