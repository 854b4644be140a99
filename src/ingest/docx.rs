use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use roxmltree::Document;
use zip::ZipArchive;

use super::{clean_text, LoadedPage};

pub fn load_docx(path: &Path) -> Result<Vec<LoadedPage>> {
    let file =
        File::open(path).with_context(|| format!("failed to open DOCX: {}", path.display()))?;
    let mut archive = ZipArchive::new(file).context("DOCX is not a valid ZIP archive")?;

    let mut document_xml = String::new();
    archive
        .by_name("word/document.xml")
        .context("DOCX missing word/document.xml")?
        .read_to_string(&mut document_xml)
        .context("failed to read word/document.xml")?;

    let text = paragraphs_from_xml(&document_xml)?.join("\n\n");
    Ok(vec![LoadedPage { text, page: None }])
}

fn paragraphs_from_xml(document_xml: &str) -> Result<Vec<String>> {
    let doc = Document::parse(document_xml).context("failed to parse DOCX XML")?;

    let mut paragraphs = Vec::new();
    for paragraph in doc
        .descendants()
        .filter(|node| node.is_element() && node.tag_name().name() == "p")
    {
        let mut text = String::new();
        for node in paragraph.descendants().filter(|node| node.is_element()) {
            match node.tag_name().name() {
                "t" => text.push_str(node.text().unwrap_or_default()),
                "tab" => text.push('\t'),
                "br" | "cr" => text.push('\n'),
                _ => {}
            }
        }

        let cleaned = clean_text(&text);
        if !cleaned.trim().is_empty() {
            paragraphs.push(cleaned);
        }
    }

    Ok(paragraphs)
}
