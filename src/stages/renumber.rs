use ahash::AHashMap;

use super::ChunkStage;
use crate::context::PipelineContext;
use crate::error::{PipelineError, Result};
use crate::fastq::{open_reader, RecordReader};
use crate::types::{sample_label, Chunk, SeqRecord};

/// Rewrites read ids to `<sample><sep><global n>`.
///
/// Each chunk gets an offset equal to the number of reads in the chunks before
/// it, so ids are unique across the whole run while chunks stay independent.
pub struct Renumberer {
    pub separator: char,
    offsets: AHashMap<usize, u64>,
}

impl Renumberer {
    /// Computes per-chunk offsets in chunk order. Chunks with an unknown read
    /// count are counted from their artifact.
    pub fn for_chunks(chunks: &[Chunk], separator: char) -> Result<Self> {
        let mut offsets = AHashMap::with_capacity(chunks.len());
        let mut next = 0u64;
        for chunk in chunks {
            offsets.insert(chunk.index, next);
            let reads = match chunk.reads {
                Some(n) => n,
                None => {
                    let reader =
                        open_reader(&chunk.path).map_err(|e| PipelineError::io(&chunk.path, e))?;
                    RecordReader::new(reader).count()
                }
            };
            next += reads as u64;
        }
        Ok(Self { separator, offsets })
    }

    pub fn offset(&self, chunk_index: usize) -> Option<u64> {
        self.offsets.get(&chunk_index).copied()
    }
}

impl ChunkStage for Renumberer {
    fn name(&self) -> &str {
        "renumber read ids"
    }

    fn tag(&self) -> &str {
        "rn"
    }

    fn apply(
        &self,
        _ctx: &PipelineContext,
        chunk: &Chunk,
        reads: Vec<SeqRecord>,
    ) -> Result<Vec<SeqRecord>> {
        let offset = self.offset(chunk.index).ok_or_else(|| {
            PipelineError::config(format!("chunk {} was not planned for renumbering", chunk.index))
        })?;
        Ok(reads
            .into_iter()
            .enumerate()
            .map(|(i, mut read)| {
                let sample = sample_label(&read.id, self.separator).to_string();
                read.relabel(format!("{}{}{}", sample, self.separator, offset + i as u64));
                read
            })
            .collect())
    }
}
