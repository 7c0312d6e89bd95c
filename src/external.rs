//src/external.rs

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::AmpliconType;
use crate::context::PipelineContext;
use crate::error::ExternalToolError;

/// Program plus an explicit argument list. Never goes through a shell.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ToolInvocation {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Runs to completion and returns stdout. A non-zero exit is `Failed`
    /// with the captured stderr.
    pub fn run(&self) -> Result<String, ExternalToolError> {
        let program = self.program_name();
        log::info!(
            "Running {} {}",
            program,
            self.args
                .iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|e| ExternalToolError::Spawn {
                program: program.clone(),
                source: e,
            })?;
        if !output.status.success() {
            return Err(ExternalToolError::Failed {
                program,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Fails with `MissingOutput` unless a tool left `path` behind.
pub fn require_output(path: &Path) -> Result<(), ExternalToolError> {
    if path.exists() {
        Ok(())
    } else {
        Err(ExternalToolError::MissingOutput {
            path: path.to_path_buf(),
        })
    }
}

/// De-novo clustering of size-annotated representatives into a `-uc` file
/// (`S`/`H` records, column 1 cluster number, column 8 member label).
pub trait Clusterer: Sync {
    fn cluster(
        &self,
        ctx: &PipelineContext,
        input_fasta: &Path,
        similarity: f64,
        output_uc: &Path,
    ) -> Result<(), ExternalToolError>;
}

/// Multi-hit search against a reference database into a `-uc` file
/// (`H` records in rank order, `N` records for queries without a hit).
pub trait ReferenceAligner: Sync {
    fn align(
        &self,
        ctx: &PipelineContext,
        query_fasta: &Path,
        similarity: f64,
        max_hits: usize,
        output_uc: &Path,
    ) -> Result<(), ExternalToolError>;
}

/// Taxonomic classification into RDP `fixrank` rows.
pub trait TaxonomicClassifier: Sync {
    fn classify(
        &self,
        ctx: &PipelineContext,
        query_fasta: &Path,
        amplicon: AmpliconType,
        output: &Path,
    ) -> Result<(), ExternalToolError>;
}

/// usearch, used for both clustering and reference search.
#[derive(Debug, Clone)]
pub struct Usearch {
    pub program: PathBuf,
    /// Reference database for `usearch_global`; `None` disables alignment.
    pub database: Option<PathBuf>,
}

impl Usearch {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            database: None,
        }
    }

    pub fn with_database(mut self, database: impl AsRef<Path>) -> Self {
        self.database = Some(database.as_ref().to_path_buf());
        self
    }
}

fn identity(similarity: f64) -> String {
    format!("{:.2}", similarity / 100.0)
}

impl Clusterer for Usearch {
    fn cluster(
        &self,
        _ctx: &PipelineContext,
        input_fasta: &Path,
        similarity: f64,
        output_uc: &Path,
    ) -> Result<(), ExternalToolError> {
        ToolInvocation::new(&self.program)
            .arg("-cluster_fast")
            .arg(input_fasta)
            .arg("-id")
            .arg(identity(similarity))
            .arg("-sort")
            .arg("size")
            .arg("-uc")
            .arg(output_uc)
            .run()?;
        require_output(output_uc)
    }
}

impl ReferenceAligner for Usearch {
    fn align(
        &self,
        _ctx: &PipelineContext,
        query_fasta: &Path,
        similarity: f64,
        max_hits: usize,
        output_uc: &Path,
    ) -> Result<(), ExternalToolError> {
        let database = self.database.as_ref().ok_or_else(|| ExternalToolError::MissingDatabase {
            path: PathBuf::from("<unset>"),
        })?;
        if !database.exists() {
            return Err(ExternalToolError::MissingDatabase {
                path: database.clone(),
            });
        }
        ToolInvocation::new(&self.program)
            .arg("-usearch_global")
            .arg(query_fasta)
            .arg("-db")
            .arg(database)
            .arg("-id")
            .arg(identity(similarity))
            .arg("-strand")
            .arg("both")
            .arg("-maxaccepts")
            .arg(max_hits.to_string())
            .arg("-maxrejects")
            .arg("0")
            .arg("-output_no_hits")
            .arg("-uc")
            .arg(output_uc)
            .run()?;
        require_output(output_uc)
    }
}

/// RDP classifier jar, run through `java`.
#[derive(Debug, Clone)]
pub struct RdpClassifier {
    pub java: PathBuf,
    pub jar: PathBuf,
}

impl RdpClassifier {
    pub fn new(jar: impl AsRef<Path>) -> Self {
        Self {
            java: PathBuf::from("java"),
            jar: jar.as_ref().to_path_buf(),
        }
    }

    fn gene(amplicon: AmpliconType) -> &'static str {
        match amplicon {
            AmpliconType::Bacterial16S => "16srrna",
            AmpliconType::FungalIts => "fungalits_unite",
        }
    }
}

impl TaxonomicClassifier for RdpClassifier {
    fn classify(
        &self,
        _ctx: &PipelineContext,
        query_fasta: &Path,
        amplicon: AmpliconType,
        output: &Path,
    ) -> Result<(), ExternalToolError> {
        if !self.jar.exists() {
            return Err(ExternalToolError::MissingDatabase {
                path: self.jar.clone(),
            });
        }
        ToolInvocation::new(&self.java)
            .arg("-Xmx1g")
            .arg("-jar")
            .arg(&self.jar)
            .arg("classify")
            .arg("-g")
            .arg(Self::gene(amplicon))
            .arg("-f")
            .arg("fixrank")
            .arg("-o")
            .arg(output)
            .arg(query_fasta)
            .run()?;
        require_output(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_are_kept_in_order() {
        let inv = ToolInvocation::new("usearch").arg("-id").arg(identity(97.0));
        assert_eq!(inv.args(), &[OsString::from("-id"), OsString::from("0.97")]);
        assert_eq!(inv.program_name(), "usearch");
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let err = ToolInvocation::new("/nonexistent/raw2otu-tool").run().unwrap_err();
        assert!(matches!(err, ExternalToolError::Spawn { .. }));
    }

    #[test]
    fn alignment_without_database_fails_before_running() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = PipelineContext::new(dir.path(), "d", 97).unwrap();
        let usearch = Usearch::new("/nonexistent/usearch").with_database(dir.path().join("gg.udb"));
        let err = usearch
            .align(&ctx, &dir.path().join("q.fasta"), 97.0, 10, &dir.path().join("o.uc"))
            .unwrap_err();
        assert!(matches!(err, ExternalToolError::MissingDatabase { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_a_failure_with_stderr() {
        let err = ToolInvocation::new("sh")
            .arg("-c")
            .arg("echo broken >&2; exit 3")
            .run()
            .unwrap_err();
        match err {
            ExternalToolError::Failed { program, stderr, .. } => {
                assert_eq!(program, "sh");
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
