use super::{phred, ChunkStage};
use crate::context::PipelineContext;
use crate::error::{PipelineError, Result};
use crate::types::{Chunk, SeqRecord};

fn qualities<'a>(chunk: &Chunk, read: &'a SeqRecord) -> Result<&'a [u8]> {
    read.qual.as_deref().map(str::as_bytes).ok_or_else(|| {
        PipelineError::config(format!(
            "quality trimming needs FASTQ input; read {} in chunk {} has no qualities",
            read.id, chunk.index
        ))
    })
}

/// Truncates each read before the first base whose quality is below
/// `min_quality`. Reads truncated to nothing are dropped.
pub struct QualityTruncator {
    pub min_quality: u8,
    pub ascii_offset: u8,
}

impl QualityTruncator {
    pub fn keep_len(&self, ctx: &PipelineContext, qual: &[u8]) -> usize {
        qual.iter()
            .position(|&q| phred(ctx, q, self.ascii_offset) < self.min_quality)
            .unwrap_or(qual.len())
    }
}

impl ChunkStage for QualityTruncator {
    fn name(&self) -> &str {
        "quality trim by truncation"
    }

    fn tag(&self) -> &str {
        "qt"
    }

    fn apply(
        &self,
        ctx: &PipelineContext,
        chunk: &Chunk,
        reads: Vec<SeqRecord>,
    ) -> Result<Vec<SeqRecord>> {
        let mut out = Vec::with_capacity(reads.len());
        for mut read in reads {
            let keep = self.keep_len(ctx, qualities(chunk, &read)?);
            if keep == 0 {
                continue;
            }
            read.truncate(keep);
            out.push(read);
        }
        Ok(out)
    }
}

/// Discards reads whose expected number of errors, summed over the read's
/// current length, exceeds `max_errors`.
///
/// Runs after length normalisation, so the sum covers the fixed window.
pub struct ExpectedErrorFilter {
    pub max_errors: f64,
    pub ascii_offset: u8,
}

impl ExpectedErrorFilter {
    pub fn expected_errors(&self, ctx: &PipelineContext, qual: &[u8]) -> f64 {
        qual.iter()
            .map(|&q| 10f64.powf(-(phred(ctx, q, self.ascii_offset) as f64) / 10.0))
            .sum()
    }
}

impl ChunkStage for ExpectedErrorFilter {
    fn name(&self) -> &str {
        "quality filtering by expected errors"
    }

    fn tag(&self) -> &str {
        "ee"
    }

    fn apply(
        &self,
        ctx: &PipelineContext,
        chunk: &Chunk,
        reads: Vec<SeqRecord>,
    ) -> Result<Vec<SeqRecord>> {
        let mut out = Vec::with_capacity(reads.len());
        for read in reads {
            if self.expected_errors(ctx, qualities(chunk, &read)?) <= self.max_errors {
                out.push(read);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::LengthNormalizer;
    use crate::types::RecordFormat;

    fn ctx() -> (tempfile::TempDir, PipelineContext) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = PipelineContext::new(dir.path(), "d", 97).unwrap();
        (dir, ctx)
    }

    #[test]
    fn truncates_at_first_low_quality_base() {
        let (_d, ctx) = ctx();
        let stage = QualityTruncator { min_quality: 25, ascii_offset: 33 };
        // 'I' = 40, '5' = 20
        let reads = vec![
            SeqRecord::new("a", "ACGTACGT", Some("IIII5III".into())),
            SeqRecord::new("b", "ACGT", Some("5III".into())),
            SeqRecord::new("c", "ACGT", Some("IIII".into())),
        ];
        let out = stage
            .apply(&ctx, &Chunk::new(0, "x", RecordFormat::Fastq), reads)
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].seq, "ACGT");
        assert_eq!(out[0].qual.as_deref(), Some("IIII"));
        assert_eq!(out[1].id, "c");
    }

    #[test]
    fn offset_64_decodes_differently() {
        let (_d, ctx) = ctx();
        // 'I' is 40 at offset 33 but 9 at offset 64
        let stage = QualityTruncator { min_quality: 25, ascii_offset: 64 };
        assert_eq!(stage.keep_len(&ctx, b"hhhI"), 3);
        assert!(ctx.warnings().is_empty());
        // below the offset decodes as 0 and is reported once
        assert_eq!(stage.keep_len(&ctx, b"#h"), 0);
        assert_eq!(stage.keep_len(&ctx, b"#h"), 0);
        assert_eq!(ctx.warnings().len(), 1);
    }

    #[test]
    fn expected_errors_sum_over_read() {
        let (_d, ctx) = ctx();
        let f = ExpectedErrorFilter { max_errors: 1.0, ascii_offset: 33 };
        // Q20 => 0.01 per base; Q10 => 0.1; Q0 => 1.0
        let ee = f.expected_errors(&ctx, b"555");
        assert!((ee - 0.03).abs() < 1e-9);
        assert!((f.expected_errors(&ctx, b"+!") - 1.1).abs() < 1e-9);
    }

    #[test]
    fn expected_errors_are_computed_after_length_trim() {
        let (_d, ctx) = ctx();
        let chunk = Chunk::new(0, "x", RecordFormat::Fastq);
        // good first four bases, a terrible tail beyond the trim window
        let read = SeqRecord::new("a", "ACGTACGT", Some("IIII!!!!".into()));
        let filter = ExpectedErrorFilter { max_errors: 0.5, ascii_offset: 33 };

        // over the whole read it would be discarded
        assert!(filter.apply(&ctx, &chunk, vec![read.clone()]).unwrap().is_empty());

        // the pipeline order trims to the fixed length first, then filters
        let trimmed = LengthNormalizer { length: 4 }
            .apply(&ctx, &chunk, vec![read])
            .unwrap();
        let kept = filter.apply(&ctx, &chunk, trimmed).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].seq, "ACGT");
    }

    #[test]
    fn fasta_reads_are_rejected() {
        let (_d, ctx) = ctx();
        let stage = QualityTruncator { min_quality: 25, ascii_offset: 33 };
        let res = stage.apply(
            &ctx,
            &Chunk::new(0, "x", RecordFormat::Fasta),
            vec![SeqRecord::new("a", "AC", None)],
        );
        assert!(res.is_err());
    }
}
