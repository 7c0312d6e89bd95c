use crate::error::{PipelineError, Result};
use crate::types::Chunk;

/// Drops chunks whose artifact is empty (zero bytes) so they never reach a
/// stage that expects input. Returns `(kept, pruned)` in their original order.
///
/// `step` only names the invocation in the log. Calling this twice on the
/// same list prunes nothing the second time.
pub fn prune_empty(chunks: Vec<Chunk>, step: &str) -> Result<(Vec<Chunk>, Vec<Chunk>)> {
    let mut kept = Vec::with_capacity(chunks.len());
    let mut pruned = Vec::new();

    for chunk in chunks {
        let size = std::fs::metadata(&chunk.path)
            .map_err(|e| PipelineError::io(&chunk.path, e))?
            .len();
        if size == 0 {
            log::info!(
                "Removing empty output of chunk {} after step '{}': {}",
                chunk.index,
                step,
                chunk.path.display()
            );
            pruned.push(chunk);
        } else {
            kept.push(chunk);
        }
    }
    Ok((kept, pruned))
}
