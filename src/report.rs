//src/report.rs

use std::fmt::Write as FmtWrite;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

/// Reads retained and discarded by one parallel stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageSummary {
    pub stage: String,
    pub chunks_in: usize,
    pub chunks_pruned: usize,
    pub reads_in: u64,
    pub reads_out: u64,
}

impl StageSummary {
    pub fn reads_discarded(&self) -> u64 {
        self.reads_in.saturating_sub(self.reads_out)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DereplicationSummary {
    pub reads_in: u64,
    pub unique_sequences: usize,
    pub representatives_kept: usize,
    pub reads_discarded: u64,
    pub min_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducedTable {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTable {
    pub name: String,
    pub reason: String,
}

/// Processing summary of one run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub dataset_id: String,
    pub raw_reads: u64,
    pub stages: Vec<StageSummary>,
    pub dereplication: Option<DereplicationSummary>,
    pub produced: Vec<ProducedTable>,
    pub skipped: Vec<SkippedTable>,
    pub warnings: Vec<String>,
}

impl RunReport {
    pub fn new(dataset_id: &str) -> Self {
        Self {
            dataset_id: dataset_id.to_string(),
            ..Default::default()
        }
    }

    pub fn produced(&mut self, name: impl Into<String>, path: impl AsRef<Path>) {
        self.produced.push(ProducedTable {
            name: name.into(),
            path: path.as_ref().to_path_buf(),
        });
    }

    pub fn skipped(&mut self, name: impl Into<String>, reason: impl Into<String>) {
        let (name, reason) = (name.into(), reason.into());
        log::warn!("Skipping {name}: {reason}");
        self.skipped.push(SkippedTable { name, reason });
    }

    pub fn was_produced(&self, name: &str) -> bool {
        self.produced.iter().any(|t| t.name == name)
    }

    /// Generate the processing summary text.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        writeln!(out, "Dataset\t{}", self.dataset_id).unwrap();
        writeln!(out, "Raw reads\t{}", self.raw_reads).unwrap();
        out.push('\n');

        out.push_str("step\tchunks\tchunks_pruned\treads_in\treads_out\treads_discarded\n");
        for s in &self.stages {
            writeln!(
                out,
                "{}\t{}\t{}\t{}\t{}\t{}",
                s.stage,
                s.chunks_in,
                s.chunks_pruned,
                s.reads_in,
                s.reads_out,
                s.reads_discarded()
            )
            .unwrap();
        }

        if let Some(d) = &self.dereplication {
            writeln!(
                out,
                "dereplication (min count {})\t-\t-\t{}\t{}\t{}",
                d.min_count,
                d.reads_in,
                d.reads_in - d.reads_discarded,
                d.reads_discarded
            )
            .unwrap();
            writeln!(
                out,
                "Unique sequences\t{}\nRepresentatives kept\t{}",
                d.unique_sequences, d.representatives_kept
            )
            .unwrap();
        }

        out.push_str("\nProduced tables\n");
        for t in &self.produced {
            writeln!(out, "{}\t{}", t.name, t.path.display()).unwrap();
        }
        out.push_str("\nSkipped tables\n");
        for t in &self.skipped {
            writeln!(out, "{}\t{}", t.name, t.reason).unwrap();
        }
        if !self.warnings.is_empty() {
            out.push_str("\nWarnings\n");
            for w in &self.warnings {
                writeln!(out, "{w}").unwrap();
            }
        }
        out
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_text()).map_err(|e| PipelineError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_lists_produced_and_skipped_tables() {
        let mut report = RunReport::new("gut");
        report.raw_reads = 10;
        report.stages.push(StageSummary {
            stage: "length trim".into(),
            chunks_in: 2,
            chunks_pruned: 1,
            reads_in: 10,
            reads_out: 7,
        });
        report.produced("denovo", "/w/gut.otu_table.97.denovo");
        report.skipped("closed reference (consensus 1)", "usearch exited with 1");

        let text = report.to_text();
        assert!(text.contains("length trim\t2\t1\t10\t7\t3"));
        assert!(text.contains("denovo\t/w/gut.otu_table.97.denovo"));
        assert!(text.contains("closed reference (consensus 1)\tusearch exited with 1"));
        assert!(report.was_produced("denovo"));
        assert!(!report.was_produced("open reference"));
    }
}
