//src/partition.rs

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::context::PipelineContext;
use crate::error::{PipelineError, Result};
use crate::fastq::{open_reader, write_record, RecordReader};
use crate::types::{Chunk, RecordFormat};

/// Raw files smaller than this are split into small chunks.
pub const SMALL_FILE_THRESHOLD_BYTES: u64 = 200_000_000;
pub const SMALL_CHUNK_RECORDS: usize = 100_000;
pub const LARGE_CHUNK_RECORDS: usize = 1_000_000;

/// Records per chunk for a raw file of `size_bytes`.
pub fn records_per_chunk(size_bytes: u64) -> usize {
    if size_bytes < SMALL_FILE_THRESHOLD_BYTES {
        SMALL_CHUNK_RECORDS
    } else {
        LARGE_CHUNK_RECORDS
    }
}

/// One line of a multi-file manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub file: PathBuf,
    pub sample: String,
}

/// Splits one raw read file into chunk artifacts of at most
/// `records_per_chunk(size)` records each. Record boundaries are respected.
pub fn split_raw_file<P: AsRef<Path>>(
    ctx: &PipelineContext,
    raw_path: P,
    format: RecordFormat,
) -> Result<Vec<Chunk>> {
    let raw_path = raw_path.as_ref();
    let size = std::fs::metadata(raw_path)
        .map_err(|e| PipelineError::io(raw_path, e))?
        .len();
    let per_chunk = records_per_chunk(size);
    log::info!(
        "Splitting {} ({} bytes) into chunks of {} records",
        raw_path.display(),
        size,
        per_chunk
    );
    split_records(ctx, raw_path, format, per_chunk)
}

/// Splitting with an explicit record bound.
pub fn split_records(
    ctx: &PipelineContext,
    raw_path: &Path,
    format: RecordFormat,
    per_chunk: usize,
) -> Result<Vec<Chunk>> {
    if per_chunk == 0 {
        return Err(PipelineError::config("records per chunk must be positive"));
    }
    let reader = open_reader(raw_path).map_err(|e| PipelineError::io(raw_path, e))?;
    let mut chunks = Vec::new();
    let mut current: Option<(Chunk, BufWriter<File>)> = None;

    for (n, rec) in RecordReader::new(reader).enumerate() {
        let rec = rec.map_err(|e| PipelineError::io(raw_path, e))?;
        if format == RecordFormat::Fastq && rec.qual.is_none() {
            return Err(PipelineError::config(format!(
                "{} was declared FASTQ but holds FASTA records",
                raw_path.display()
            )));
        }

        if n % per_chunk == 0 {
            if let Some(done) = current.take() {
                chunks.push(finish_chunk(done)?);
            }
            let index = chunks.len();
            let path = ctx.chunk_path(index, "raw", format);
            let out = File::create(&path).map_err(|e| PipelineError::io(&path, e))?;
            let mut chunk = Chunk::new(index, &path, format);
            chunk.reads = Some(0);
            current = Some((chunk, BufWriter::new(out)));
        }

        if let Some((chunk, out)) = current.as_mut() {
            write_record(out, &rec, format).map_err(|e| PipelineError::io(&chunk.path, e))?;
            chunk.reads = chunk.reads.map(|r| r + 1);
        }
    }

    if let Some(done) = current.take() {
        chunks.push(finish_chunk(done)?);
    }
    if chunks.is_empty() {
        return Err(PipelineError::config(format!(
            "raw file {} holds no reads",
            raw_path.display()
        )));
    }
    log::info!("Partitioned {} into {} chunk(s)", raw_path.display(), chunks.len());
    Ok(chunks)
}

fn finish_chunk((chunk, mut out): (Chunk, BufWriter<File>)) -> Result<Chunk> {
    out.flush().map_err(|e| PipelineError::io(&chunk.path, e))?;
    Ok(chunk)
}

/// Parses a multi-file manifest.
///
/// The file must be tab-delimited with a filename and a sample label per line:
/// no blank lines, no space characters, exactly one tab per line.
pub fn parse_manifest<P: AsRef<Path>>(path: P) -> Result<Vec<ManifestEntry>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let reader = BufReader::new(file);

    let mut entries = Vec::new();
    for (n, line_result) in reader.lines().enumerate() {
        let line = line_result.map_err(|e| PipelineError::io(path, e))?;
        let line = line.trim_end_matches('\r');
        let lineno = n + 1;

        if line.contains(' ') {
            return Err(manifest_error(path, lineno, "space characters found; make it tab-delimited"));
        }
        if line.is_empty() {
            return Err(manifest_error(path, lineno, "empty line found; remove it before proceeding"));
        }
        let fields: Vec<&str> = line.split('\t').collect();
        match fields.len() {
            1 => return Err(manifest_error(path, lineno, "no tab character found; make it tab-delimited")),
            2 => {}
            _ => return Err(manifest_error(path, lineno, "expected exactly two tab-delimited fields")),
        }
        if fields[0].is_empty() || fields[1].is_empty() {
            return Err(manifest_error(path, lineno, "empty filename or sample label"));
        }
        entries.push(ManifestEntry {
            file: PathBuf::from(fields[0]),
            sample: fields[1].to_string(),
        });
    }

    if entries.is_empty() {
        return Err(PipelineError::config(format!(
            "manifest {} appears to be empty",
            path.display()
        )));
    }
    Ok(entries)
}

fn manifest_error(path: &Path, line: usize, what: &str) -> PipelineError {
    PipelineError::config(format!("manifest {} line {line}: {what}", path.display()))
}

/// Multi-file mode: each listed file becomes one chunk, copied into the working
/// area and tagged with its declared sample label. No splitting occurs.
pub fn chunks_from_manifest<P: AsRef<Path>, Q: AsRef<Path>>(
    ctx: &PipelineContext,
    manifest_path: P,
    input_dir: Q,
    format: RecordFormat,
) -> Result<Vec<Chunk>> {
    let entries = parse_manifest(manifest_path.as_ref())?;
    let mut chunks = Vec::with_capacity(entries.len());

    for (index, entry) in entries.into_iter().enumerate() {
        let src = input_dir.as_ref().join(&entry.file);
        if !src.is_file() {
            return Err(PipelineError::config(format!(
                "manifest lists {} which does not exist",
                src.display()
            )));
        }
        let mut dst = ctx.chunk_path(index, "raw", format);
        if src.extension().map(|e| e == "gz").unwrap_or(false) {
            dst.as_mut_os_string().push(".gz");
        }
        std::fs::copy(&src, &dst).map_err(|e| PipelineError::io(&dst, e))?;

        let mut chunk = Chunk::new(index, dst, format);
        chunk.sample = Some(entry.sample);
        chunks.push(chunk);
    }
    log::info!("Loaded {} pre-demultiplexed file(s) from manifest", chunks.len());
    Ok(chunks)
}
