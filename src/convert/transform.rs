use std::sync::LazyLock;

use regex::Regex;
use scraper::node::Node as DomNode;
use scraper::{ElementRef, Html, Selector};

use super::nodes::{clamp_level, Node};
use super::transcript;

static FOOTNOTE_NUM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"footnote(?:-anchor)?-(\d+)").unwrap());
static FOOTNOTE_DEF_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^footnote-(\d+)$").unwrap());

pub struct Transformed {
    pub root: Node,
    /// Unsupported constructs that degraded to their text content.
    pub warnings: Vec<String>,
}

/// Walk a cleaned HTML fragment and normalize every node. Never fails:
/// unknown tags degrade to their text wrapped in a paragraph, so content is
/// not dropped silently. Footnote definitions are collected wherever they
/// appear and re-emitted at the end in numeric order.
pub fn transform_fragment(fragment_html: &str) -> Transformed {
    let doc = Html::parse_fragment(fragment_html);
    let mut walker = Walker::default();
    let mut blocks = Vec::new();
    walker.walk_children(doc.root_element(), &mut blocks);

    walker.footnotes.sort_by_key(|(id, _)| *id);
    walker.footnotes.dedup_by_key(|(id, _)| *id);
    for (id, text) in std::mem::take(&mut walker.footnotes) {
        blocks.push(Node::FootnoteDef { id, text });
    }

    Transformed {
        root: Node::Document(blocks),
        warnings: walker.warnings,
    }
}

#[derive(Default)]
struct Walker {
    footnotes: Vec<(u32, String)>,
    warnings: Vec<String>,
}

const SKIP_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "form", "button", "noscript", "svg",
    "template", "select", "input",
];

fn is_skippable(el: ElementRef) -> bool {
    if SKIP_TAGS.contains(&el.value().name()) {
        return true;
    }
    el.value()
        .classes()
        .any(|c| c.starts_with("subscri") || c.starts_with("share-") || c == "paywall")
}

fn is_inline_tag(name: &str) -> bool {
    matches!(
        name,
        "a" | "em"
            | "i"
            | "strong"
            | "b"
            | "code"
            | "span"
            | "u"
            | "s"
            | "sub"
            | "sup"
            | "br"
            | "img"
            | "small"
            | "mark"
            | "abbr"
            | "time"
            | "cite"
    )
}

impl Walker {
    /// Walk mixed content: consecutive inline nodes pool into a paragraph,
    /// block elements flush the pool and emit their own constructs.
    fn walk_children(&mut self, el: ElementRef, out: &mut Vec<Node>) {
        let mut inline: Vec<Node> = Vec::new();
        for child in el.children() {
            match child.value() {
                DomNode::Text(t) => inline.push(Node::Text(t.to_string())),
                DomNode::Element(_) => {
                    let Some(child_el) = ElementRef::wrap(child) else {
                        continue;
                    };
                    if is_skippable(child_el) {
                        continue;
                    }
                    if is_inline_tag(child_el.value().name()) {
                        self.inline_node(child_el, &mut inline);
                    } else {
                        flush_paragraph(&mut inline, out);
                        self.block_node(child_el, out);
                    }
                }
                _ => {}
            }
        }
        flush_paragraph(&mut inline, out);
    }

    fn block_node(&mut self, el: ElementRef, out: &mut Vec<Node>) {
        let name = el.value().name().to_string();
        match name.as_str() {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level: u8 = name[1..].parse().unwrap_or(6);
                let children = self.inline_children(el);
                out.push(Node::Heading {
                    level: clamp_level(level),
                    children,
                });
            }
            "p" => {
                let mut children = self.inline_children(el);
                flush_paragraph(&mut children, out);
            }
            "ul" => {
                if let Some(list) = self.list(el, false) {
                    out.push(list);
                }
            }
            "ol" => {
                if let Some(list) = self.list(el, true) {
                    out.push(list);
                }
            }
            "table" => {
                if let Some(table) = self.table(el) {
                    out.push(table);
                }
            }
            "pre" => {
                let code: String = el.text().collect();
                if !code.trim().is_empty() {
                    out.push(Node::CodeBlock(code));
                }
            }
            "blockquote" => {
                let mut inner = Vec::new();
                self.walk_children(el, &mut inner);
                if !inner.is_empty() {
                    out.push(Node::BlockQuote(inner));
                }
            }
            "figure" => self.figure(el, out),
            "img" | "iframe" | "embed" | "video" | "audio" => match media_node(el) {
                Some(media) => out.push(Node::Paragraph(vec![media])),
                None => self
                    .warnings
                    .push(format!("<{}> without a source address", name)),
            },
            "hr" => out.push(Node::Paragraph(vec![Node::Text("---".to_string())])),
            "figcaption" => {}
            "div" | "section" | "main" | "article" | "picture" => {
                if let Some(def) = self.footnote_def(el) {
                    self.footnotes.push(def);
                    return;
                }
                if is_transcript(el) {
                    let raw: String = el.text().collect();
                    for paragraph in transcript::clean_transcript(&raw) {
                        out.push(Node::Paragraph(vec![Node::Text(paragraph)]));
                    }
                    return;
                }
                self.walk_children(el, out);
            }
            // Lossy-but-safe fallback: keep the text, record the loss.
            other => {
                let text: String = el.text().collect();
                if !text.trim().is_empty() {
                    out.push(Node::Paragraph(vec![Node::Text(text)]));
                }
                self.warnings
                    .push(format!("unsupported <{}> degraded to text", other));
            }
        }
    }

    fn inline_node(&mut self, el: ElementRef, out: &mut Vec<Node>) {
        let name = el.value().name().to_string();
        match name.as_str() {
            "a" => {
                if let Some(id) = footnote_ref_id(el) {
                    out.push(Node::FootnoteRef(id));
                    return;
                }
                let text: String = el.text().collect();
                match el.value().attr("href").map(str::trim).filter(|h| !h.is_empty()) {
                    Some(href) => out.push(Node::Link {
                        address: href.to_string(),
                        text,
                    }),
                    None => out.push(Node::Text(text)),
                }
            }
            "em" | "i" => {
                let children = self.inline_children(el);
                out.push(Node::Emphasis(children));
            }
            "strong" | "b" => {
                let children = self.inline_children(el);
                out.push(Node::Strong(children));
            }
            "code" => {
                let code: String = el.text().collect();
                let code = code.trim();
                if !code.is_empty() {
                    out.push(Node::Text(format!("`{}`", code)));
                }
            }
            "br" => out.push(Node::Text(" ".to_string())),
            "img" | "iframe" | "embed" | "video" | "audio" => match media_node(el) {
                Some(media) => out.push(media),
                None => self
                    .warnings
                    .push(format!("<{}> without a source address", name)),
            },
            "sup" => {
                let has_anchor = el.children().any(|c| {
                    ElementRef::wrap(c).is_some_and(|ce| ce.value().name() == "a")
                });
                if has_anchor {
                    out.extend(self.inline_children(el));
                    return;
                }
                let text: String = el.text().collect();
                match text.trim().parse::<u32>() {
                    Ok(id) => out.push(Node::FootnoteRef(id)),
                    Err(_) => out.push(Node::Text(text)),
                }
            }
            "span" | "u" | "s" | "sub" | "small" | "mark" | "abbr" | "time" | "cite" => {
                out.extend(self.inline_children(el));
            }
            // Block content in inline position collapses to its inline parts.
            "p" | "div" | "section" | "figure" | "picture" | "li" => {
                out.extend(self.inline_children(el));
            }
            other => {
                self.warnings
                    .push(format!("unsupported inline <{}> kept as text", other));
                let text: String = el.text().collect();
                if !text.trim().is_empty() {
                    out.push(Node::Text(text));
                }
            }
        }
    }

    fn inline_children(&mut self, el: ElementRef) -> Vec<Node> {
        let mut out = Vec::new();
        for child in el.children() {
            match child.value() {
                DomNode::Text(t) => out.push(Node::Text(t.to_string())),
                DomNode::Element(_) => {
                    let Some(child_el) = ElementRef::wrap(child) else {
                        continue;
                    };
                    if is_skippable(child_el) {
                        continue;
                    }
                    self.inline_node(child_el, &mut out);
                }
                _ => {}
            }
        }
        out
    }

    fn list(&mut self, el: ElementRef, ordered: bool) -> Option<Node> {
        let mut items = Vec::new();
        for child in el.children() {
            let Some(child_el) = ElementRef::wrap(child) else {
                continue;
            };
            if child_el.value().name() != "li" {
                continue;
            }
            let children = self.list_item_children(child_el);
            if !children.is_empty() {
                items.push(Node::ListItem(children));
            }
        }
        if items.is_empty() {
            None
        } else {
            Some(Node::List { ordered, items })
        }
    }

    fn list_item_children(&mut self, li: ElementRef) -> Vec<Node> {
        let mut out = Vec::new();
        for child in li.children() {
            match child.value() {
                DomNode::Text(t) => out.push(Node::Text(t.to_string())),
                DomNode::Element(_) => {
                    let Some(child_el) = ElementRef::wrap(child) else {
                        continue;
                    };
                    if is_skippable(child_el) {
                        continue;
                    }
                    match child_el.value().name() {
                        "ul" => {
                            if let Some(list) = self.list(child_el, false) {
                                out.push(list);
                            }
                        }
                        "ol" => {
                            if let Some(list) = self.list(child_el, true) {
                                out.push(list);
                            }
                        }
                        _ => self.inline_node(child_el, &mut out),
                    }
                }
                _ => {}
            }
        }
        out
    }

    /// Rows and cells stay structured; cell content is inline-only, so any
    /// block content inside a cell collapses to its text.
    fn table(&mut self, el: ElementRef) -> Option<Node> {
        let row_sel = Selector::parse("tr").unwrap();
        let cell_sel = Selector::parse("th, td").unwrap();
        let mut rows = Vec::new();
        for row in el.select(&row_sel) {
            let mut cells = Vec::new();
            for cell in row.select(&cell_sel) {
                cells.push(self.inline_children(cell));
            }
            if !cells.is_empty() {
                rows.push(cells);
            }
        }
        if rows.is_empty() {
            None
        } else {
            Some(Node::Table { rows })
        }
    }

    /// Figures become a media placeholder carrying the adjacent caption.
    /// The resource is referenced by address only, never inlined.
    fn figure(&mut self, el: ElementRef, out: &mut Vec<Node>) {
        let caption_sel = Selector::parse("figcaption").unwrap();
        let media_sel = Selector::parse("img, iframe, embed, video, audio").unwrap();

        let caption: Option<String> = el
            .select(&caption_sel)
            .next()
            .map(|c| c.text().collect::<String>())
            .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|t| !t.is_empty());

        if let Some(media_el) = el.select(&media_sel).next() {
            if let Some(Node::Media { address, label, .. }) = media_node(media_el) {
                out.push(Node::Paragraph(vec![Node::Media {
                    address,
                    label,
                    caption,
                }]));
                return;
            }
        }
        if let Some(cap) = caption {
            out.push(Node::Paragraph(vec![Node::Text(cap)]));
        }
        self.warnings.push("figure without media source".to_string());
    }

    fn footnote_def(&mut self, el: ElementRef) -> Option<(u32, String)> {
        let id_attr = el.value().attr("id")?;
        let caps = FOOTNOTE_DEF_ID_RE.captures(id_attr)?;
        let id: u32 = caps[1].parse().ok()?;

        let content_sel = Selector::parse(".footnote-content").unwrap();
        let text: String = match el.select(&content_sel).next() {
            Some(content) => content.text().collect(),
            None => {
                let full: String = el.text().collect();
                // Strip the leading marker number when no content wrapper exists.
                full.trim_start()
                    .strip_prefix(&id.to_string())
                    .map(str::to_string)
                    .unwrap_or(full)
            }
        };
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        Some((id, text))
    }
}

fn flush_paragraph(inline: &mut Vec<Node>, out: &mut Vec<Node>) {
    if inline.is_empty() {
        return;
    }
    let nodes = std::mem::take(inline);
    let has_content = nodes.iter().any(|n| match n {
        Node::Text(t) => !t.trim().is_empty(),
        _ => true,
    });
    if has_content {
        out.push(Node::Paragraph(nodes));
    }
}

fn is_transcript(el: ElementRef) -> bool {
    el.value().classes().any(|c| c.contains("transcript"))
}

fn footnote_ref_id(el: ElementRef) -> Option<u32> {
    let is_anchor = el.value().classes().any(|c| c.contains("footnote-anchor"))
        || el
            .value()
            .attr("href")
            .is_some_and(|h| h.contains("#footnote-"));
    if !is_anchor {
        return None;
    }
    let from_attr = |s: &str| {
        FOOTNOTE_NUM_RE
            .captures(s)
            .and_then(|c| c[1].parse::<u32>().ok())
    };
    el.value()
        .attr("href")
        .and_then(from_attr)
        .or_else(|| el.value().attr("id").and_then(from_attr))
        .or_else(|| {
            let text: String = el.text().collect();
            text.trim().parse().ok()
        })
}

fn media_node(el: ElementRef) -> Option<Node> {
    let name = el.value().name();
    let own_src = el
        .value()
        .attr("src")
        .or_else(|| el.value().attr("data-src"))
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let src = match name {
        "video" | "audio" => own_src.map(str::to_string).or_else(|| {
            let source_sel = Selector::parse("source[src]").unwrap();
            el.select(&source_sel)
                .next()
                .and_then(|s| s.value().attr("src"))
                .map(str::to_string)
        }),
        _ => own_src.map(str::to_string),
    }?;

    let label = el
        .value()
        .attr("alt")
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .unwrap_or(match name {
            "img" => "image",
            "video" => "video",
            "audio" => "audio",
            _ => "embed",
        })
        .to_string();

    Some(Node::Media {
        address: src,
        label,
        caption: None,
    })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::nodes::render;

    fn to_markdown(html: &str) -> String {
        render(&transform_fragment(html).root)
    }

    #[test]
    fn unknown_embed_degrades_to_paragraph() {
        let out = transform_fragment("<social-embed>see attached</social-embed>");
        let Node::Document(blocks) = &out.root else {
            panic!("expected document root");
        };
        assert_eq!(
            blocks[0],
            Node::Paragraph(vec![Node::Text("see attached".to_string())])
        );
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn image_becomes_link_reference() {
        let md = to_markdown(
            r#"<p><img src="https://cdn.example.com/a.png" alt="chart"></p>"#,
        );
        assert_eq!(md, "[chart](https://cdn.example.com/a.png)\n");
        assert!(!md.contains("base64"));
    }

    #[test]
    fn figure_caption_travels_with_media() {
        let md = to_markdown(
            r#"<figure><img src="https://cdn.example.com/a.png" alt="chart">
               <figcaption>Results  over time</figcaption></figure>"#,
        );
        assert_eq!(
            md,
            "[chart](https://cdn.example.com/a.png) *Results over time*\n"
        );
    }

    #[test]
    fn iframe_becomes_embed_link() {
        let md = to_markdown(r#"<iframe src="https://www.youtube.com/embed/xyz"></iframe>"#);
        assert_eq!(md, "[embed](https://www.youtube.com/embed/xyz)\n");
    }

    #[test]
    fn sourceless_image_warns_instead_of_emitting() {
        let out = transform_fragment("<p>text</p><img alt=\"nothing\">");
        assert_eq!(out.warnings.len(), 1);
        let md = render(&out.root);
        assert_eq!(md, "text\n");
    }

    #[test]
    fn footnote_refs_and_defs() {
        let html = r##"
            <p>Claim<a class="footnote-anchor" href="#footnote-2">2</a>
               and another<a class="footnote-anchor" href="#footnote-1">1</a>.</p>
            <div class="footnote" id="footnote-2"><a href="#footnote-anchor-2">2</a>
                <div class="footnote-content"><p>second note</p></div></div>
            <div class="footnote" id="footnote-1"><a href="#footnote-anchor-1">1</a>
                <div class="footnote-content"><p>first note</p></div></div>
        "##;
        let md = to_markdown(html);
        assert_eq!(
            md,
            "Claim[^2] and another[^1].\n\n[^1]: first note\n[^2]: second note\n"
        );
    }

    #[test]
    fn numeric_superscript_is_a_footnote_marker() {
        let md = to_markdown("<p>Fact<sup>3</sup> stated.</p>");
        assert_eq!(md, "Fact[^3] stated.\n");
    }

    #[test]
    fn nested_lists_keep_depth_and_kind() {
        let md = to_markdown(
            "<ul><li>alpha<ol><li>one</li><li>two</li></ol></li><li>beta</li></ul>",
        );
        assert_eq!(md, "- alpha\n    1. one\n    2. two\n- beta\n");
    }

    #[test]
    fn table_structure_survives() {
        let md = to_markdown(
            "<table><tr><th>k</th><th>v</th></tr><tr><td>a</td><td><p>block</p></td></tr></table>",
        );
        assert_eq!(md, "| k | v |\n| --- | --- |\n| a | block |\n");
    }

    #[test]
    fn transcript_container_is_cleaned() {
        let md = to_markdown(
            r#"<div class="transcript"><p>0:42 Alice: Hello there. 0:45 Bob: Hi!</p></div>"#,
        );
        assert_eq!(md, "Hello there. Hi!\n");
    }

    #[test]
    fn chrome_containers_are_dropped() {
        let md = to_markdown(
            r#"<nav><a href="/">home</a></nav><p>kept</p><div class="subscription-widget-wrap">subscribe!</div>"#,
        );
        assert_eq!(md, "kept\n");
    }

    #[test]
    fn blockquote_and_code() {
        let md = to_markdown(
            "<blockquote><p>wise words</p></blockquote><pre>let x = 1;</pre>",
        );
        assert_eq!(md, "> wise words\n\n```\nlet x = 1;\n```\n");
    }
}
