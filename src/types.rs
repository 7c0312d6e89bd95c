//src/types.rs

use std::path::{Path, PathBuf};

/// Record layout of a read file: quality-annotated or sequence only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    Fastq,
    Fasta,
}

impl RecordFormat {
    /// File extension used for chunk artifacts of this format.
    pub fn extension(&self) -> &'static str {
        match self {
            RecordFormat::Fastq => "fastq",
            RecordFormat::Fasta => "fasta",
        }
    }
}

/// A minimal representation of a read.
///
/// `id` is the first whitespace-delimited token of the header, `header` is the
/// full header line without its leading `@`/`>`. After demultiplexing the id
/// embeds the sample label as `<sample><sep><n>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqRecord {
    pub id: String,
    pub header: String,
    pub seq: String,
    pub qual: Option<String>,
}

impl SeqRecord {
    pub fn new(id: impl Into<String>, seq: impl Into<String>, qual: Option<String>) -> Self {
        let id = id.into();
        Self {
            header: id.clone(),
            id,
            seq: seq.into(),
            qual,
        }
    }

    /// Replace the id; the header is reset to the new id.
    pub fn relabel(&mut self, id: String) {
        self.header = id.clone();
        self.id = id;
    }

    /// Keep only the first `len` bases (and qualities).
    pub fn truncate(&mut self, len: usize) {
        self.seq.truncate(len);
        if let Some(q) = self.qual.as_mut() {
            q.truncate(len);
        }
    }

    /// Drop the first `len` bases (and qualities).
    pub fn strip_prefix(&mut self, len: usize) {
        self.seq.drain(..len.min(self.seq.len()));
        if let Some(q) = self.qual.as_mut() {
            q.drain(..len.min(q.len()));
        }
    }
}

/// Split `<sample><sep><n>` into the sample label.
///
/// The split happens at the *last* separator, so sample labels may themselves
/// contain the separator character.
pub fn sample_label<'a>(read_id: &'a str, separator: char) -> &'a str {
    match read_id.rsplit_once(separator) {
        Some((sample, _)) => sample,
        None => read_id,
    }
}

/// One intermediate read file, owned by the worker processing it.
///
/// `index` is the chunk's identity across the whole stage chain; the path
/// changes at every stage while the index does not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub path: PathBuf,
    pub format: RecordFormat,
    /// Declared sample label (multi-file mode only).
    pub sample: Option<String>,
    /// Reads in the artifact, when known.
    pub reads: Option<usize>,
}

impl Chunk {
    pub fn new(index: usize, path: impl AsRef<Path>, format: RecordFormat) -> Self {
        Self {
            index,
            path: path.as_ref().to_path_buf(),
            format,
            sample: None,
            reads: None,
        }
    }
}
