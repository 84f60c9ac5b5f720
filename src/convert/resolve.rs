use super::clean_url;
use super::nodes::Node;
use crate::vault::ReferenceIndex;

/// Link counters finalized into the metadata record after resolution.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct LinkCounts {
    pub internal: usize,
    pub external: usize,
}

/// Rewrite links that resolve against the index of already-converted notes
/// into `[[stem]]` references; everything else passes through as an external
/// link with its tracking parameters stripped. Resolution is purely local —
/// an unresolved link is not an error, it just stays external.
pub fn resolve_links(root: &mut Node, index: &ReferenceIndex) -> LinkCounts {
    let mut counts = LinkCounts::default();
    visit(root, index, &mut counts);
    counts
}

fn visit(node: &mut Node, index: &ReferenceIndex, counts: &mut LinkCounts) {
    match node {
        Node::Link { address, .. } => {
            if !address.starts_with("http://") && !address.starts_with("https://") {
                return;
            }
            let cleaned = clean_url(address);
            match index.resolve(&cleaned) {
                Some(stem) => {
                    counts.internal += 1;
                    *node = Node::WikiRef(stem.to_string());
                }
                None => {
                    counts.external += 1;
                    *address = cleaned;
                }
            }
        }
        // Media placeholders render as links too; they keep their original
        // address but count toward the external tally.
        Node::Media { .. } => counts.external += 1,
        Node::Document(children)
        | Node::Paragraph(children)
        | Node::Emphasis(children)
        | Node::Strong(children)
        | Node::BlockQuote(children)
        | Node::ListItem(children)
        | Node::Heading { children, .. } => {
            for child in children {
                visit(child, index, counts);
            }
        }
        Node::List { items, .. } => {
            for item in items {
                visit(item, index, counts);
            }
        }
        Node::Table { rows } => {
            for row in rows {
                for cell in row {
                    for child in cell {
                        visit(child, index, counts);
                    }
                }
            }
        }
        Node::Text(_)
        | Node::WikiRef(_)
        | Node::CodeBlock(_)
        | Node::FootnoteRef(_)
        | Node::FootnoteDef { .. } => {}
    }
}

// ── Tests ──
