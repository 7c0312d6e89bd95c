// src/lib.rs
pub mod classifier;
pub mod clusters;
pub mod config;
pub mod context;
pub mod derep;
pub mod error;
pub mod external;
pub mod fastq;
pub mod partition;
pub mod pipeline;
pub mod prune;
pub mod qc;
pub mod reference;
pub mod report;
pub mod runner;
pub mod stages;
pub mod tables;
pub mod types;

use std::path::{Path, PathBuf};

pub use crate::config::RunConfig;
pub use crate::context::PipelineContext;
pub use crate::error::{EnrichmentError, ExternalToolError, PipelineError, Result};
pub use crate::external::{RdpClassifier, Usearch};
pub use crate::pipeline::{ExternalTools, Pipeline};
pub use crate::report::RunReport;

/// Name of the dataset description inside an input directory.
pub const SUMMARY_FILE_NAME: &str = "summary_file.txt";

/// Run flags that come from the command line rather than the summary file.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub primers_removed: bool,
    pub already_demultiplexed: bool,
    pub threads: Option<usize>,
    /// usearch binary; `usearch` on the `PATH` when unset.
    pub usearch: Option<PathBuf>,
    /// RDP classifier jar; classification is skipped when unset.
    pub rdp_jar: Option<PathBuf>,
}

/// Loads `<input_dir>/summary_file.txt` and applies the run flags.
pub fn load_config<P: AsRef<Path>>(input_dir: P, options: &RunOptions) -> Result<RunConfig> {
    let input_dir = input_dir.as_ref();
    let mut config = RunConfig::from_summary_file(input_dir.join(SUMMARY_FILE_NAME), input_dir)?;
    config.primers_removed = options.primers_removed;
    config.already_demultiplexed = options.already_demultiplexed;
    config.threads = options.threads;
    config.validate()?;
    Ok(config)
}

/// Processes one dataset directory end to end with usearch and, when
/// configured, the RDP classifier. Artifacts land in
/// `<output_dir>/<dataset id>/`.
pub fn process_dataset<P: AsRef<Path>, Q: AsRef<Path>>(
    input_dir: P,
    output_dir: Q,
    options: &RunOptions,
    on_phase: impl Fn(&str),
) -> Result<RunReport> {
    let input_dir = input_dir.as_ref();
    let config = load_config(input_dir, options)?;
    let working_dir = output_dir.as_ref().join(&config.dataset_id);
    let ctx = PipelineContext::new(&working_dir, &config.dataset_id, config.similarity_tag())?;

    let program = options
        .usearch
        .clone()
        .unwrap_or_else(|| PathBuf::from("usearch"));
    let clusterer = Usearch::new(&program);
    let aligner = config
        .reference_db
        .as_ref()
        .map(|db| Usearch::new(&program).with_database(db));
    let classifier = options.rdp_jar.as_ref().map(RdpClassifier::new);

    let tools = ExternalTools {
        clusterer: &clusterer,
        aligner: aligner.as_ref().map(|a| a as &dyn external::ReferenceAligner),
        classifier: classifier
            .as_ref()
            .map(|c| c as &dyn external::TaxonomicClassifier),
    };
    let report = Pipeline::new(config, input_dir, tools)
        .on_phase(on_phase)
        .run(&ctx);
    report
}
