use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use tokio::process::Command;

use super::{clean_text, LoadedPage};

pub async fn load_pdf(pdf_path: &Path) -> Result<Vec<LoadedPage>> {
    if has_command("pdftotext").await {
        let page_count = get_pdf_page_count(pdf_path).await.unwrap_or(0);
        let pages = pdftotext_pages("pdftotext", pdf_path, page_count).await;
        if !pages.is_empty() {
            return Ok(pages);
        }
    }

    let path = pdf_path.to_path_buf();
    let extracted = tokio::task::spawn_blocking(move || pdf_extract::extract_text(&path))
        .await
        .context("PDF extraction task panicked")?
        .context("failed to extract text from PDF")?;

    Ok(split_form_feed_pages(&extracted))
}

// Empty when the tool cannot be run at all, so the caller falls back to `pdf-extract`.
async fn pdftotext_pages(program: &str, pdf_path: &Path, page_count: usize) -> Vec<LoadedPage> {
    let mut pages = Vec::with_capacity(page_count);

    for page in 1..=page_count {
        let output = match Command::new(program)
            .arg("-f")
            .arg(page.to_string())
            .arg("-l")
            .arg(page.to_string())
            .arg("-layout")
            .arg("-nopgbrk")
            .arg(pdf_path)
            .arg("-")
            .output()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                tracing::warn!("could not run {} for {}: {}", program, pdf_path.display(), err);
                return Vec::new();
            }
        };

        if !output.status.success() {
            tracing::warn!("pdftotext failed on page {} of {}", page, pdf_path.display());
            continue;
        }

        let text = clean_text(&String::from_utf8_lossy(&output.stdout));
        if text.is_empty() {
            continue;
        }

        pages.push(LoadedPage {
            text,
            page: Some(page as i64 - 1),
        });
    }

    pages
}

fn split_form_feed_pages(extracted: &str) -> Vec<LoadedPage> {
    extracted
        .split('\u{000C}')
        .enumerate()
        .filter_map(|(index, raw)| {
            let text = clean_text(raw);
            if text.is_empty() {
                None
            } else {
                Some(LoadedPage {
                    text,
                    page: Some(index as i64),
                })
            }
        })
        .collect()
}

async fn get_pdf_page_count(pdf_path: &Path) -> Result<usize> {
    let output = Command::new("pdfinfo")
        .arg(pdf_path)
        .output()
        .await
        .context("failed to run pdfinfo")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("pdfinfo exited with non-zero status"));
    }

    parse_page_count(&String::from_utf8_lossy(&output.stdout))
}

fn parse_page_count(pdfinfo_stdout: &str) -> Result<usize> {
    let regex = Regex::new(r"(?m)^Pages:\s+(\d+)\s*$")?;
    regex
        .captures(pdfinfo_stdout)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<usize>().ok())
        .ok_or_else(|| anyhow::anyhow!("unable to parse page count from pdfinfo"))
}

async fn has_command(binary: &str) -> bool {
    // poppler tools exit non-zero for --version, so check PATH presence via `which`.
    Command::new("which")
        .arg(binary)
        .output()
        .await
        .map(|out| out.status.success() && !out.stdout.is_empty())
        .unwrap_or(false)
}
