use super::ChunkStage;
use crate::context::PipelineContext;
use crate::error::Result;
use crate::types::{Chunk, SeqRecord};

/// Truncates reads to a fixed length. Shorter reads are dropped, never padded.
pub struct LengthNormalizer {
    pub length: usize,
}

impl ChunkStage for LengthNormalizer {
    fn name(&self) -> &str {
        "length trim"
    }

    fn tag(&self) -> &str {
        "lt"
    }

    fn apply(
        &self,
        _ctx: &PipelineContext,
        _chunk: &Chunk,
        reads: Vec<SeqRecord>,
    ) -> Result<Vec<SeqRecord>> {
        Ok(reads
            .into_iter()
            .filter(|r| r.seq.len() >= self.length)
            .map(|mut r| {
                r.truncate(self.length);
                r
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RecordFormat;

    #[test]
    fn short_reads_are_dropped_and_long_reads_cut() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = PipelineContext::new(dir.path(), "d", 97).unwrap();
        let reads = vec![
            SeqRecord::new("a", "ACGTA", Some("IIIII".into())),
            SeqRecord::new("b", "ACG", Some("III".into())),
            SeqRecord::new("c", "ACGT", Some("IIII".into())),
        ];
        let out = LengthNormalizer { length: 4 }
            .apply(&ctx, &Chunk::new(0, "x", RecordFormat::Fastq), reads)
            .unwrap();
        let seqs: Vec<_> = out.iter().map(|r| r.seq.as_str()).collect();
        assert_eq!(seqs, vec!["ACGT", "ACGT"]);
        assert_eq!(out[0].qual.as_deref(), Some("IIII"));
    }
}
