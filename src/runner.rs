//src/runner.rs

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::context::PipelineContext;
use crate::error::{PipelineError, Result};
use crate::fastq::{open_reader, write_records_to, RecordReader};
use crate::prune::prune_empty;
use crate::report::StageSummary;
use crate::stages::ChunkStage;
use crate::types::{Chunk, SeqRecord};

/// Chunks that survived a stage, plus its summary.
#[derive(Debug)]
pub struct StageOutcome {
    pub chunks: Vec<Chunk>,
    pub summary: StageSummary,
}

/// Fans a stage out over chunks on a bounded pool and joins before returning.
pub struct StageRunner {
    pool: ThreadPool,
}

impl StageRunner {
    /// `threads = None` sizes the pool to the available CPUs.
    pub fn new(threads: Option<usize>) -> Result<Self> {
        let mut builder = ThreadPoolBuilder::new().thread_name(|i| format!("raw2otu-worker-{i}"));
        if let Some(n) = threads {
            builder = builder.num_threads(n);
        }
        let pool = builder
            .build()
            .map_err(|e| PipelineError::config(format!("cannot build worker pool: {e}")))?;
        log::info!("Stage runner using {} worker thread(s)", pool.current_num_threads());
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `stage` on every chunk, one task per chunk, then prunes empty
    /// outputs. Chunk order is preserved. Fails if any chunk fails, or with
    /// `StageData` when no chunk has reads left.
    pub fn run(
        &self,
        ctx: &PipelineContext,
        stage: &dyn ChunkStage,
        chunks: Vec<Chunk>,
    ) -> Result<StageOutcome> {
        let chunks_in = chunks.len();
        log::info!("Running '{}' on {} chunk(s)", stage.name(), chunks_in);

        let results: Vec<(Chunk, u64)> = self.pool.install(|| {
            chunks
                .par_iter()
                .map(|chunk| run_one(ctx, stage, chunk))
                .collect::<Result<Vec<_>>>()
        })?;

        let reads_in: u64 = results.iter().map(|(_, n)| *n).sum();
        let reads_out: u64 = results
            .iter()
            .map(|(c, _)| c.reads.unwrap_or(0) as u64)
            .sum();
        let outputs = results.into_iter().map(|(c, _)| c).collect();

        let (kept, pruned) = prune_empty(outputs, stage.name())?;
        let summary = StageSummary {
            stage: stage.name().to_string(),
            chunks_in,
            chunks_pruned: pruned.len(),
            reads_in,
            reads_out,
        };
        log::info!(
            "'{}': {} -> {} reads, {} chunk(s) pruned",
            summary.stage,
            summary.reads_in,
            summary.reads_out,
            summary.chunks_pruned
        );

        if kept.is_empty() {
            return Err(PipelineError::StageData {
                stage: stage.name().to_string(),
            });
        }
        Ok(StageOutcome {
            chunks: kept,
            summary,
        })
    }
}

/// Reads one chunk, applies the stage, writes the new artifact.
fn run_one(ctx: &PipelineContext, stage: &dyn ChunkStage, chunk: &Chunk) -> Result<(Chunk, u64)> {
    let reader = open_reader(&chunk.path).map_err(|e| PipelineError::io(&chunk.path, e))?;
    let reads: Vec<SeqRecord> = RecordReader::new(reader)
        .collect::<std::io::Result<_>>()
        .map_err(|e| PipelineError::io(&chunk.path, e))?;
    let reads_in = reads.len() as u64;

    let output = stage.apply(ctx, chunk, reads)?;

    let format = stage.output_format(chunk.format);
    let path = ctx.chunk_path(chunk.index, stage.tag(), format);
    write_records_to(&path, &output, format).map_err(|e| PipelineError::io(&path, e))?;

    let next = Chunk {
        index: chunk.index,
        path,
        format,
        sample: chunk.sample.clone(),
        reads: Some(output.len()),
    };
    Ok((next, reads_in))
}
