use std::sync::LazyLock;

use regex::Regex;

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Deepest heading level Markdown can express; deeper levels clamp here.
pub const MAX_HEADING_LEVEL: u8 = 6;

pub fn clamp_level(level: u8) -> u8 {
    level.clamp(1, MAX_HEADING_LEVEL)
}

/// One normalized unit of document structure. The tree is rooted at a
/// synthetic `Document` node; children stay in document order.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Document(Vec<Node>),
    Heading { level: u8, children: Vec<Node> },
    Paragraph(Vec<Node>),
    Text(String),
    Emphasis(Vec<Node>),
    Strong(Vec<Node>),
    Link { address: String, text: String },
    /// Resolved cross-document reference, rendered as `[[stem]]`.
    WikiRef(String),
    /// Embedded image/iframe/video/audio, carried by reference only.
    Media {
        address: String,
        label: String,
        caption: Option<String>,
    },
    List { ordered: bool, items: Vec<Node> },
    ListItem(Vec<Node>),
    /// Rows of cells; each cell is inline content only.
    Table { rows: Vec<Vec<Vec<Node>>> },
    CodeBlock(String),
    BlockQuote(Vec<Node>),
    FootnoteRef(u32),
    FootnoteDef { id: u32, text: String },
}

/// Render a node tree to Markdown. Footnote definitions are pulled to the
/// end regardless of where they sit among the blocks, and headings are not
/// followed by a blank line.
pub fn render(root: &Node) -> String {
    let blocks: &[Node] = match root {
        Node::Document(blocks) => blocks,
        other => std::slice::from_ref(other),
    };

    let mut out = String::new();
    let mut defs: Vec<(u32, &str)> = Vec::new();
    let mut after_heading = false;

    for block in blocks {
        if let Node::FootnoteDef { id, text } = block {
            defs.push((*id, text));
            continue;
        }
        let Some(rendered) = render_block(block, 0) else {
            continue;
        };
        if !out.is_empty() {
            out.push_str(if after_heading { "\n" } else { "\n\n" });
        }
        out.push_str(&rendered);
        after_heading = matches!(block, Node::Heading { .. });
    }

    if !defs.is_empty() {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        let lines: Vec<String> = defs
            .iter()
            .map(|(id, text)| format!("[^{}]: {}", id, collapse_ws(text)))
            .collect();
        out.push_str(&lines.join("\n"));
    }

    out.push('\n');
    out
}

fn render_block(node: &Node, depth: usize) -> Option<String> {
    match node {
        Node::Heading { level, children } => {
            let text = render_inline(children);
            if text.is_empty() {
                return None;
            }
            Some(format!("{} {}", "#".repeat(clamp_level(*level) as usize), text))
        }
        Node::Paragraph(children) => {
            let text = render_inline(children);
            if text.is_empty() {
                None
            } else {
                Some(text)
            }
        }
        Node::List { ordered, items } => render_list(*ordered, items, depth),
        Node::Table { rows } => render_table(rows),
        Node::CodeBlock(code) => {
            let code = code.trim_matches('\n').trim_end();
            if code.is_empty() {
                return None;
            }
            Some(format!("```\n{}\n```", code))
        }
        Node::BlockQuote(children) => {
            let mut parts = Vec::new();
            for child in children {
                if let Some(rendered) = render_block(child, depth) {
                    parts.push(rendered);
                }
            }
            if parts.is_empty() {
                return None;
            }
            let quoted: Vec<String> = parts
                .join("\n\n")
                .lines()
                .map(|l| {
                    if l.is_empty() {
                        ">".to_string()
                    } else {
                        format!("> {}", l)
                    }
                })
                .collect();
            Some(quoted.join("\n"))
        }
        Node::FootnoteDef { id, text } => Some(format!("[^{}]: {}", id, collapse_ws(text))),
        Node::Document(children) => {
            let doc = render(&Node::Document(children.clone()));
            let trimmed = doc.trim_end();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        // Inline content sitting at block level becomes its own paragraph.
        inline => {
            let text = render_inline(std::slice::from_ref(inline));
            if text.is_empty() {
                None
            } else {
                Some(text)
            }
        }
    }
}

fn render_list(ordered: bool, items: &[Node], depth: usize) -> Option<String> {
    let indent = "    ".repeat(depth);
    let mut lines = Vec::new();
    let mut ordinal = 0usize;

    for item in items {
        let Node::ListItem(children) = item else {
            continue;
        };
        let (inline, nested): (Vec<&Node>, Vec<&Node>) = children
            .iter()
            .partition(|c| !matches!(c, Node::List { .. }));
        let inline_owned: Vec<Node> = inline.into_iter().cloned().collect();
        let text = render_inline(&inline_owned);
        ordinal += 1;
        let marker = if ordered {
            format!("{}. ", ordinal)
        } else {
            "- ".to_string()
        };
        if !text.is_empty() || !nested.is_empty() {
            lines.push(format!("{}{}{}", indent, marker, text));
        }
        for sub in nested {
            if let Node::List { ordered, items } = sub {
                if let Some(rendered) = render_list(*ordered, items, depth + 1) {
                    lines.push(rendered);
                }
            }
        }
    }

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn render_table(rows: &[Vec<Vec<Node>>]) -> Option<String> {
    if rows.is_empty() {
        return None;
    }
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|cell| render_inline(cell).replace('|', "\\|"))
                .collect()
        })
        .collect();
    let width = cells.iter().map(Vec::len).max().unwrap_or(0);
    if width == 0 {
        return None;
    }

    let row_line = |row: &[String]| {
        let mut padded: Vec<&str> = row.iter().map(String::as_str).collect();
        padded.resize(width, "");
        format!("| {} |", padded.join(" | "))
    };

    let mut lines = vec![row_line(&cells[0])];
    lines.push(format!("| {} |", vec!["---"; width].join(" | ")));
    for row in &cells[1..] {
        lines.push(row_line(row));
    }
    Some(lines.join("\n"))
}

/// Render inline content to a single whitespace-normalized line.
pub fn render_inline(nodes: &[Node]) -> String {
    let mut raw = String::new();
    for node in nodes {
        raw.push_str(&render_inline_part(node));
    }
    collapse_ws(&raw)
}

fn render_inline_part(node: &Node) -> String {
    match node {
        Node::Text(t) => t.clone(),
        Node::Emphasis(children) => wrap_span("*", children),
        Node::Strong(children) => wrap_span("**", children),
        Node::Link { address, text } => {
            let text = collapse_ws(text);
            if text.is_empty() {
                format!("[{}]({})", address, address)
            } else {
                format!("[{}]({})", text, address)
            }
        }
        Node::WikiRef(stem) => format!("[[{}]]", stem),
        Node::Media {
            address,
            label,
            caption,
        } => {
            let label = collapse_ws(label);
            let label = if label.is_empty() { "image".to_string() } else { label };
            let mut s = format!("[{}]({})", label, address);
            if let Some(cap) = caption {
                let cap = collapse_ws(cap);
                if !cap.is_empty() {
                    s.push_str(&format!(" *{}*", cap));
                }
            }
            s
        }
        Node::FootnoteRef(id) => format!("[^{}]", id),
        // A block node in inline position collapses to its text.
        other => render_block(other, 0).unwrap_or_default(),
    }
}

fn wrap_span(mark: &str, children: &[Node]) -> String {
    let mut inner = String::new();
    for child in children {
        inner.push_str(&render_inline_part(child));
    }
    let trimmed = inner.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let lead = if inner.starts_with(char::is_whitespace) { " " } else { "" };
    let trail = if inner.ends_with(char::is_whitespace) { " " } else { "" };
    format!("{}{}{}{}{}", lead, mark, trimmed, mark, trail)
}

fn collapse_ws(s: &str) -> String {
    WS_RE.replace_all(s, " ").trim().to_string()
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Node {
        Node::Text(s.to_string())
    }

    #[test]
    fn heading_has_no_trailing_blank_line() {
        let doc = Node::Document(vec![
            Node::Heading { level: 2, children: vec![text("Section")] },
            Node::Paragraph(vec![text("Body text.")]),
        ]);
        assert_eq!(render(&doc), "## Section\nBody text.\n");
    }

    #[test]
    fn heading_level_clamps_to_six() {
        let doc = Node::Document(vec![Node::Heading {
            level: 9,
            children: vec![text("Deep")],
        }]);
        assert_eq!(render(&doc), "###### Deep\n");
    }

    #[test]
    fn paragraph_whitespace_collapses() {
        let doc = Node::Document(vec![Node::Paragraph(vec![text("a\n  b   c ")])]);
        assert_eq!(render(&doc), "a b c\n");
    }

    #[test]
    fn emphasis_keeps_boundary_spacing() {
        let doc = Node::Document(vec![Node::Paragraph(vec![
            text("before"),
            Node::Emphasis(vec![text(" middle ")]),
            text("after"),
        ])]);
        assert_eq!(render(&doc), "before *middle* after\n");
    }

    #[test]
    fn media_renders_as_link_with_caption() {
        let doc = Node::Document(vec![Node::Paragraph(vec![Node::Media {
            address: "https://cdn.example.com/pic.png".into(),
            label: "diagram".into(),
            caption: Some("The big picture".into()),
        }])]);
        assert_eq!(
            render(&doc),
            "[diagram](https://cdn.example.com/pic.png) *The big picture*\n"
        );
    }

    #[test]
    fn nested_list_indents() {
        let doc = Node::Document(vec![Node::List {
            ordered: false,
            items: vec![
                Node::ListItem(vec![
                    text("top"),
                    Node::List {
                        ordered: true,
                        items: vec![Node::ListItem(vec![text("inner")])],
                    },
                ]),
                Node::ListItem(vec![text("second")]),
            ],
        }]);
        assert_eq!(render(&doc), "- top\n    1. inner\n- second\n");
    }

    #[test]
    fn footnote_defs_sort_last() {
        let doc = Node::Document(vec![
            Node::FootnoteDef { id: 1, text: "first note".into() },
            Node::Paragraph(vec![text("Body"), Node::FootnoteRef(1)]),
        ]);
        assert_eq!(render(&doc), "Body[^1]\n\n[^1]: first note\n");
    }

    #[test]
    fn table_renders_pipes() {
        let doc = Node::Document(vec![Node::Table {
            rows: vec![
                vec![vec![text("a")], vec![text("b")]],
                vec![vec![text("1")], vec![text("2")]],
            ],
        }]);
        assert_eq!(
            render(&doc),
            "| a | b |\n| --- | --- |\n| 1 | 2 |\n"
        );
    }

    #[test]
    fn blockquote_prefixes_lines() {
        let doc = Node::Document(vec![Node::BlockQuote(vec![
            Node::Paragraph(vec![text("quoted")]),
            Node::Paragraph(vec![text("again")]),
        ])]);
        assert_eq!(render(&doc), "> quoted\n>\n> again\n");
    }

    #[test]
    fn empty_paragraphs_are_dropped() {
        let doc = Node::Document(vec![
            Node::Paragraph(vec![text("  ")]),
            Node::Paragraph(vec![text("kept")]),
        ]);
        assert_eq!(render(&doc), "kept\n");
    }
}
