use super::ChunkStage;
use crate::context::PipelineContext;
use crate::error::Result;
use crate::types::{Chunk, RecordFormat, SeqRecord};

/// FASTQ -> FASTA.
pub struct FormatConverter;

impl ChunkStage for FormatConverter {
    fn name(&self) -> &str {
        "convert to fasta"
    }

    fn tag(&self) -> &str {
        "fa"
    }

    fn output_format(&self, _input: RecordFormat) -> RecordFormat {
        RecordFormat::Fasta
    }

    fn apply(
        &self,
        _ctx: &PipelineContext,
        _chunk: &Chunk,
        reads: Vec<SeqRecord>,
    ) -> Result<Vec<SeqRecord>> {
        Ok(reads
            .into_iter()
            .map(|mut r| {
                r.qual = None;
                r
            })
            .collect())
    }
}
