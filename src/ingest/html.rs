use std::path::Path;

use anyhow::{Context, Result};
use scraper::{Html, Node};

use super::{clean_text, LoadedPage};

const SKIPPED_ELEMENTS: [&str; 4] = ["script", "style", "noscript", "template"];

pub fn load_html(path: &Path) -> Result<Vec<LoadedPage>> {
    let raw = std::fs::read(path)
        .with_context(|| format!("failed to read HTML: {}", path.display()))?;
    let html = String::from_utf8_lossy(&raw);
    Ok(vec![LoadedPage {
        text: visible_text(&html),
        page: None,
    }])
}

fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);

    let mut lines = Vec::new();
    for node in document.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };

        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .map(|element| SKIPPED_ELEMENTS.contains(&element.name()))
                .unwrap_or(false)
        });
        if hidden {
            continue;
        }

        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() {
            lines.push(collapsed);
        }
    }

    clean_text(&lines.join("\n"))
}
