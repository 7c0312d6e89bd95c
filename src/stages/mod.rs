pub mod convert;
pub mod demux;
pub mod length;
pub mod primers;
pub mod quality;
pub mod renumber;

use crate::context::PipelineContext;
use crate::error::Result;
use crate::types::{Chunk, RecordFormat, SeqRecord};

pub use convert::FormatConverter;
pub use demux::{BarcodeMap, Demultiplexer, SampleRelabeler};
pub use length::LengthNormalizer;
pub use primers::PrimerTrimmer;
pub use quality::{ExpectedErrorFilter, QualityTruncator};
pub use renumber::Renumberer;

/// A pure chunk-to-chunk transform.
///
/// The runner reads the chunk's artifact, hands the reads to `apply`, and
/// writes whatever comes back as a new artifact; the input is never touched.
pub trait ChunkStage: Sync {
    /// Name used in logs and the processing summary.
    fn name(&self) -> &str;

    /// Short tag appended to chunk artifact names (`sb`, `pt`, `qt`...).
    fn tag(&self) -> &str;

    fn output_format(&self, input: RecordFormat) -> RecordFormat {
        input
    }

    fn apply(
        &self,
        ctx: &PipelineContext,
        chunk: &Chunk,
        reads: Vec<SeqRecord>,
    ) -> Result<Vec<SeqRecord>>;
}

/// Decoded Phred score of one quality character.
///
/// Characters below the offset decode to 0 and are reported once per run.
#[inline]
pub(crate) fn phred(ctx: &PipelineContext, q: u8, offset: u8) -> u8 {
    match q.checked_sub(offset) {
        Some(v) => v,
        None => {
            ctx.warn_once(format!(
                "quality character '{}' is below ASCII offset {offset}; check ASCII_ENCODING",
                q as char
            ));
            0
        }
    }
}
