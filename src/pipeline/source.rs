//! Page and unit discovery on disk.
//!
//! A unit is one directory of page images. Pages are ordered by the number
//! in `page_<N>`; names without one sort after all numbered pages.

use crate::models::{JobConfig, PageImage};
use crate::pipeline::BatchUnit;
use regex::Regex;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use tracing::debug;

static PAGE_INDEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"page_(\d+)").expect("page index pattern is valid"));

/// MIME type for a supported image file name, by extension.
pub fn image_mime_type(name: &str) -> Option<&'static str> {
    let (_, ext) = name.rsplit_once('.')?;
    match ext.to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        _ => None,
    }
}

/// Page number embedded in a file name.
pub fn page_index(name: &str) -> Option<u64> {
    PAGE_INDEX.captures(name)?.get(1)?.as_str().parse().ok()
}

/// List the page images in `dir`, in page order.
pub fn discover_pages(dir: &Path) -> std::io::Result<Vec<PageImage>> {
    let mut pages = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(mime_type) = image_mime_type(&name) else {
            continue;
        };
        pages.push(PageImage {
            index: page_index(&name),
            name,
            path: entry.path(),
            mime_type,
        });
    }

    pages.sort_by(|a, b| {
        (a.index.unwrap_or(u64::MAX), &a.name).cmp(&(b.index.unwrap_or(u64::MAX), &b.name))
    });

    debug!(dir = ?dir, count = pages.len(), "Discovered pages");
    Ok(pages)
}

/// One unit per subdirectory of `base_dir`, sorted by name. Each writes
/// `output_name` inside its own directory.
pub fn discover_units(
    base_dir: &Path,
    output_name: &str,
    config: Arc<JobConfig>,
) -> std::io::Result<Vec<BatchUnit>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(base_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();

    Ok(dirs
        .into_iter()
        .map(|dir| {
            let output_path = dir.join(output_name);
            BatchUnit::new(dir, output_path, Arc::clone(&config))
        })
        .collect())
}
