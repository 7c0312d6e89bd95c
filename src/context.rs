//src/context.rs

use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{PipelineError, Result};
use crate::types::RecordFormat;

/// Everything a stage needs to know about where it runs.
///
/// Passed explicitly to every stage; nothing in the crate changes the process
/// working directory.
#[derive(Debug)]
pub struct PipelineContext {
    working_dir: PathBuf,
    dataset_id: String,
    similarity_tag: u32,
    /// Diagnostics raised by workers, copied into the run report.
    warnings: Mutex<Vec<String>>,
}

impl PipelineContext {
    /// Creates the working directory (and its `quality_control/` folder) if needed.
    pub fn new<P: AsRef<Path>>(working_dir: P, dataset_id: &str, similarity_tag: u32) -> Result<Self> {
        let working_dir = working_dir.as_ref().to_path_buf();
        let qc = working_dir.join("quality_control");
        std::fs::create_dir_all(&qc).map_err(|e| PipelineError::io(&qc, e))?;
        Ok(Self {
            working_dir,
            dataset_id: dataset_id.to_string(),
            similarity_tag,
            warnings: Mutex::new(Vec::new()),
        })
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    pub fn qc_dir(&self) -> PathBuf {
        self.working_dir.join("quality_control")
    }

    /// Path of chunk `index` after `stage`, e.g. `gut.chunk0003.pt.fastq`.
    pub fn chunk_path(&self, index: usize, stage: &str, format: RecordFormat) -> PathBuf {
        self.working_dir.join(format!(
            "{}.chunk{:04}.{}.{}",
            self.dataset_id,
            index,
            stage,
            format.extension()
        ))
    }

    /// `<dataset>.<suffix>` inside the working directory.
    pub fn artifact(&self, suffix: &str) -> PathBuf {
        self.working_dir.join(format!("{}.{}", self.dataset_id, suffix))
    }

    pub fn trimmed_fasta(&self) -> PathBuf {
        self.artifact("raw_trimmed.fasta")
    }

    pub fn dereplicated_fasta(&self) -> PathBuf {
        self.artifact("raw_dereplicated.fasta")
    }

    pub fn dereplication_map(&self) -> PathBuf {
        self.artifact("dereplication_map.denovo")
    }

    pub fn otu_sequences_fasta(&self) -> PathBuf {
        self.artifact(&format!("otu_seqs.{}.fasta", self.similarity_tag))
    }

    pub fn clustering_results(&self) -> PathBuf {
        self.artifact(&format!("otu_clustering.{}.uc", self.similarity_tag))
    }

    /// Base name of every OTU table, e.g. `gut.otu_table.97`.
    pub fn otu_table(&self, suffix: &str) -> PathBuf {
        self.artifact(&format!("otu_table.{}.{}", self.similarity_tag, suffix))
    }

    /// Records a warning: logged now, reported at the end of the run.
    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{message}");
        self.warnings.lock().push(message);
    }

    /// Records a warning only once per distinct message.
    pub fn warn_once(&self, message: impl Into<String>) {
        let message = message.into();
        let mut warnings = self.warnings.lock();
        if !warnings.contains(&message) {
            log::warn!("{message}");
            warnings.push(message);
        }
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_embed_dataset_and_similarity() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = PipelineContext::new(dir.path(), "gut", 97).unwrap();
        assert!(ctx.qc_dir().is_dir());
        assert_eq!(
            ctx.chunk_path(3, "pt", RecordFormat::Fastq).file_name().unwrap(),
            "gut.chunk0003.pt.fastq"
        );
        assert_eq!(
            ctx.otu_table("denovo").file_name().unwrap(),
            "gut.otu_table.97.denovo"
        );
    }

    #[test]
    fn warn_once_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = PipelineContext::new(dir.path(), "d", 97).unwrap();
        ctx.warn_once("same");
        ctx.warn_once("same");
        ctx.warn("other");
        assert_eq!(ctx.warnings(), vec!["same".to_string(), "other".to_string()]);
    }
}
