//src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors of a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Missing or malformed required input, malformed manifest, bad option.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Every chunk lost all of its reads at this stage.
    #[error("stage '{stage}' left no usable reads in any chunk")]
    StageData { stage: String },

    /// External tool failure on the mandatory (de-novo) path.
    #[error(transparent)]
    ExternalTool(#[from] ExternalToolError),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error in {} at line {line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }
}

/// Failures invoking or reading back an external aligner, clusterer or classifier.
#[derive(Error, Debug)]
pub enum ExternalToolError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("expected output {} was not produced", path.display())]
    MissingOutput { path: PathBuf },

    #[error("unparseable tool output {} at line {line}: {message}", path.display())]
    Unparseable {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("reference database {} not found", path.display())]
    MissingDatabase { path: PathBuf },

    #[error("I/O error reading tool output {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Error of an optional enrichment stage.
///
/// `Tool` failures degrade the run (the stage's tables are skipped);
/// `Fatal` wraps anything else and aborts it.
#[derive(Error, Debug)]
pub enum EnrichmentError {
    #[error(transparent)]
    Tool(#[from] ExternalToolError),

    #[error(transparent)]
    Fatal(#[from] PipelineError),
}
