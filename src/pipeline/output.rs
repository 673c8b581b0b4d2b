//! Unit output stream.
//!
//! Blocks are written in page order and separated by a blank line:
//!
//! ```text
//! Image: page_1.png
//! <text>
//!
//! Image: page_2.png
//! Error processing page_2.png: <cause>
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct OutputWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    blocks: usize,
}

impl OutputWriter {
    /// Create (or truncate) the output file.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            path: path.to_owned(),
            writer: BufWriter::new(file),
            blocks: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a page's final text.
    pub fn write_page(&mut self, image: &str, text: &str) -> std::io::Result<()> {
        self.write_block(&format!("Image: {image}\n{text}"))
    }

    /// Append the error marker for a failed page.
    pub fn write_error(&mut self, image: &str, cause: &str) -> std::io::Result<()> {
        self.write_block(&format!("Image: {image}\nError processing {image}: {cause}"))
    }

    /// Append the error marker for a unit that could not be processed at all.
    pub fn write_unit_error(&mut self, unit: &str, cause: &str) -> std::io::Result<()> {
        self.write_block(&format!("Error processing {unit}: {cause}"))
    }

    fn write_block(&mut self, block: &str) -> std::io::Result<()> {
        if self.blocks > 0 {
            self.writer.write_all(b"\n\n")?;
        }
        self.writer.write_all(block.as_bytes())?;
        self.blocks += 1;
        self.writer.flush()
    }
}
