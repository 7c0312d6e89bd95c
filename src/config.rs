//src/config.rs

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use ahash::AHashMap;

use crate::error::{PipelineError, Result};
use crate::types::RecordFormat;

/// Default quality-score ASCII offset when the summary file does not name one.
pub const DEFAULT_ASCII_OFFSET: u8 = 33;
pub const DEFAULT_TRIM_LENGTH: usize = 101;
pub const DEFAULT_MIN_COUNT: u64 = 10;
pub const DEFAULT_SIMILARITY: f64 = 97.0;
pub const DEFAULT_MAX_HITS: usize = 10;
pub const DEFAULT_TRUNCATION_QUALITY: u8 = 25;
pub const DEFAULT_CLASSIFIER_CUTOFF: f64 = 0.5;
pub const CONSENSUS_LEVELS: [usize; 4] = [1, 3, 5, 10];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmpliconType {
    Bacterial16S,
    FungalIts,
}

impl AmpliconType {
    pub fn label(&self) -> &'static str {
        match self {
            AmpliconType::Bacterial16S => "16S",
            AmpliconType::FungalIts => "ITS",
        }
    }

    /// Short name of the reference database family, used in table names.
    pub fn reference_tag(&self) -> &'static str {
        match self {
            AmpliconType::Bacterial16S => "gg",
            AmpliconType::FungalIts => "UNITE",
        }
    }
}

/// Quality policies are mutually exclusive and run at different positions:
/// truncation before length normalisation, expected errors after it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QualityPolicy {
    Truncate { min_quality: u8 },
    MaxExpectedErrors { max_errors: f64 },
    Disabled,
}

/// Where the barcode of a read is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarcodeLocation {
    /// Prefix of the read sequence; stripped on a match.
    InSequence,
    /// Last `:`-delimited field of the header (Illumina `1:N:0:BARCODE`).
    InHeader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarcodeMatching {
    Exact,
    /// Hamming distance up to `max_mismatches` to a unique closest barcode.
    Tolerant { max_mismatches: usize },
}

/// What the primer trimmer does with reads that carry no detectable primer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimerStrictness {
    Drop,
    PassThrough,
}

/// Where the raw reads come from.
#[derive(Debug, Clone, PartialEq)]
pub enum RawInput {
    /// One multiplexed file, split into chunks.
    Single { path: PathBuf, format: RecordFormat },
    /// A manifest of per-sample files (`filename<TAB>sample`), one chunk each.
    Manifest { path: PathBuf, format: RecordFormat },
}

impl RawInput {
    pub fn format(&self) -> RecordFormat {
        match self {
            RawInput::Single { format, .. } | RawInput::Manifest { format, .. } => *format,
        }
    }
}

/// Every option the pipeline recognises.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub dataset_id: String,
    pub amplicon: AmpliconType,
    /// OTU / reference similarity in percent.
    pub similarity: f64,
    pub min_count: u64,
    /// `None` means not given; the default offset is used with a warning.
    pub ascii_offset: Option<u8>,
    pub quality: QualityPolicy,
    pub trim_length: usize,
    pub barcode_location: BarcodeLocation,
    pub barcode_matching: BarcodeMatching,
    pub separator: char,
    pub reference_align: bool,
    pub classifier_cutoff: f64,
    pub max_hits: usize,
    pub consensus_levels: Vec<usize>,
    /// Fewer than `i` hits never assign at level `i > 1` when set.
    pub require_full_depth: bool,
    pub primer_mismatches: usize,
    pub primer_strictness: PrimerStrictness,
    pub primers_removed: bool,
    pub already_demultiplexed: bool,
    pub threads: Option<usize>,

    pub raw_input: Option<RawInput>,
    pub primers_file: Option<PathBuf>,
    pub barcodes_map: Option<PathBuf>,
    pub reference_db: Option<PathBuf>,
    pub reference_taxonomy: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dataset_id: "dataset".to_string(),
            amplicon: AmpliconType::Bacterial16S,
            similarity: DEFAULT_SIMILARITY,
            min_count: DEFAULT_MIN_COUNT,
            ascii_offset: None,
            quality: QualityPolicy::Truncate {
                min_quality: DEFAULT_TRUNCATION_QUALITY,
            },
            trim_length: DEFAULT_TRIM_LENGTH,
            barcode_location: BarcodeLocation::InSequence,
            barcode_matching: BarcodeMatching::Exact,
            separator: '_',
            reference_align: true,
            classifier_cutoff: DEFAULT_CLASSIFIER_CUTOFF,
            max_hits: DEFAULT_MAX_HITS,
            consensus_levels: CONSENSUS_LEVELS.to_vec(),
            require_full_depth: true,
            primer_mismatches: 0,
            primer_strictness: PrimerStrictness::Drop,
            primers_removed: false,
            already_demultiplexed: false,
            threads: None,
            raw_input: None,
            primers_file: None,
            barcodes_map: None,
            reference_db: None,
            reference_taxonomy: None,
        }
    }
}

impl RunConfig {
    /// ASCII offset in effect, plus whether it was defaulted.
    pub fn effective_ascii_offset(&self) -> (u8, bool) {
        match self.ascii_offset {
            Some(o) => (o, false),
            None => (DEFAULT_ASCII_OFFSET, true),
        }
    }

    /// Integer similarity used in artifact names (`97.0` -> `97`).
    pub fn similarity_tag(&self) -> u32 {
        self.similarity as u32
    }

    /// Parses a summary file of `KEY<TAB>VALUE` lines. Relative file paths are
    /// resolved against `input_dir`.
    pub fn from_summary_file<P: AsRef<Path>, Q: AsRef<Path>>(
        summary_path: P,
        input_dir: Q,
    ) -> Result<Self> {
        let summary_path = summary_path.as_ref();
        let file = File::open(summary_path).map_err(|e| PipelineError::io(summary_path, e))?;
        let reader = BufReader::new(file);

        let mut attrs: AHashMap<String, String> = AHashMap::new();
        for (n, line_result) in reader.lines().enumerate() {
            let line = line_result.map_err(|e| PipelineError::io(summary_path, e))?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('\t') else {
                return Err(PipelineError::parse(
                    summary_path,
                    n + 1,
                    "expected KEY<TAB>VALUE",
                ));
            };
            attrs.insert(key.trim().to_uppercase(), value.trim().to_string());
        }

        Self::from_attributes(&attrs, input_dir.as_ref())
    }

    pub fn from_attributes(attrs: &AHashMap<String, String>, input_dir: &Path) -> Result<Self> {
        let mut cfg = RunConfig::default();
        let get = |k: &str| attrs.get(k).map(String::as_str);

        if let Some(id) = get("DATASET_ID") {
            cfg.dataset_id = id.to_string();
        }
        if let Some(a) = get("AMPLICON_TYPE") {
            cfg.amplicon = match a.to_uppercase().as_str() {
                "16S" => AmpliconType::Bacterial16S,
                "ITS" => AmpliconType::FungalIts,
                other => {
                    return Err(PipelineError::config(format!(
                        "unknown AMPLICON_TYPE '{other}' (expected 16S or ITS)"
                    )))
                }
            };
        }
        if let Some(v) = get("OTU_SIMILARITY") {
            cfg.similarity = parse_num(v, "OTU_SIMILARITY")?;
            if !(0.0..=100.0).contains(&cfg.similarity) || cfg.similarity == 0.0 {
                return Err(PipelineError::config(format!(
                    "OTU_SIMILARITY must be in (0, 100], got {v}"
                )));
            }
        }
        if let Some(v) = get("MIN_COUNT") {
            cfg.min_count = parse_num(v, "MIN_COUNT")?;
        }
        if let Some(v) = get("ASCII_ENCODING") {
            cfg.ascii_offset = Some(match v {
                "ASCII_BASE_33" | "33" => 33,
                "ASCII_BASE_64" | "64" => 64,
                other => {
                    return Err(PipelineError::config(format!(
                        "unknown ASCII_ENCODING '{other}'"
                    )))
                }
            });
        }

        // a present QUALITY_TRIM takes precedence; its value None disables filtering
        cfg.quality = match (get("QUALITY_TRIM"), get("MAX_ERRORS")) {
            (Some("None"), _) => QualityPolicy::Disabled,
            (Some(_), Some(e)) if e != "None" => {
                return Err(PipelineError::config(
                    "QUALITY_TRIM and MAX_ERRORS are mutually exclusive",
                ))
            }
            (Some(q), _) => QualityPolicy::Truncate {
                min_quality: parse_num(q, "QUALITY_TRIM")?,
            },
            (None, Some("None")) => QualityPolicy::Disabled,
            (None, Some(e)) => QualityPolicy::MaxExpectedErrors {
                max_errors: parse_num(e, "MAX_ERRORS")?,
            },
            (None, None) => cfg.quality,
        };

        if let Some(v) = get("TRIM_LENGTH") {
            cfg.trim_length = parse_num(v, "TRIM_LENGTH")?;
        }
        if let Some(v) = get("BARCODES_MODE") {
            cfg.barcode_location = match v {
                "1" | "sequence" | "SEQUENCE" => BarcodeLocation::InSequence,
                "2" | "header" | "HEADER" => BarcodeLocation::InHeader,
                other => {
                    return Err(PipelineError::config(format!(
                        "unknown BARCODES_MODE '{other}'"
                    )))
                }
            };
        }
        if let Some(v) = get("BARCODES_MATCHING") {
            cfg.barcode_matching = match v {
                "exact" | "EXACT" => BarcodeMatching::Exact,
                "tolerant" | "TOLERANT" => BarcodeMatching::Tolerant { max_mismatches: 1 },
                n => BarcodeMatching::Tolerant {
                    max_mismatches: parse_num(n, "BARCODES_MATCHING")?,
                },
            };
        }
        if let Some(v) = get("BARCODES_SEPARATOR") {
            let mut chars = v.chars();
            cfg.separator = match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => {
                    return Err(PipelineError::config(format!(
                        "BARCODES_SEPARATOR must be a single character, got '{v}'"
                    )))
                }
            };
        }
        if let Some(v) = get("REFERENCE_ALIGN")
            .or_else(|| get("GG_ALIGN"))
            .or_else(|| get("UNITE_ALIGN"))
        {
            cfg.reference_align = parse_bool(v, "REFERENCE_ALIGN")?;
        }
        if let Some(v) = get("RDP_CUTOFF") {
            cfg.classifier_cutoff = parse_num(v, "RDP_CUTOFF")?;
        }
        if let Some(v) = get("MAX_HITS") {
            cfg.max_hits = parse_num(v, "MAX_HITS")?;
            if cfg.max_hits == 0 {
                return Err(PipelineError::config("MAX_HITS must be at least 1"));
            }
        }

        let path = |k: &str| get(k).map(|v| input_dir.join(v));
        cfg.primers_file = path("PRIMERS_FILE");
        cfg.barcodes_map = path("BARCODES_MAP");
        cfg.reference_db = path("REFERENCE_DB");
        cfg.reference_taxonomy = path("REFERENCE_TAXONOMY");

        // Lookup order: single FASTQ, single FASTA, FASTQ manifest, FASTA manifest.
        cfg.raw_input = if let Some(p) = path("RAW_FASTQ_FILE") {
            Some(RawInput::Single { path: p, format: RecordFormat::Fastq })
        } else if let Some(p) = path("RAW_FASTA_FILE") {
            Some(RawInput::Single { path: p, format: RecordFormat::Fasta })
        } else if let Some(p) = path("RAW_FASTQ_FILES") {
            Some(RawInput::Manifest { path: p, format: RecordFormat::Fastq })
        } else if let Some(p) = path("RAW_FASTA_FILES") {
            Some(RawInput::Manifest { path: p, format: RecordFormat::Fasta })
        } else {
            return Err(PipelineError::config(
                "unable to retrieve raw sequencing files: none of RAW_FASTQ_FILE, \
                 RAW_FASTA_FILE, RAW_FASTQ_FILES, RAW_FASTA_FILES is set",
            ));
        };

        for key in attrs.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                log::debug!("Ignoring unknown summary attribute {key}");
            }
        }

        Ok(cfg)
    }

    /// Checks the cross-option requirements that depend on run flags.
    pub fn validate(&self) -> Result<()> {
        let raw = self
            .raw_input
            .as_ref()
            .ok_or_else(|| PipelineError::config("no raw input configured"))?;
        let multi = matches!(raw, RawInput::Manifest { .. });
        if !self.primers_removed && self.primers_file.is_none() {
            return Err(PipelineError::config(
                "PRIMERS_FILE is required unless primers were already removed",
            ));
        }
        if !multi && !self.already_demultiplexed && self.barcodes_map.is_none() {
            return Err(PipelineError::config(
                "BARCODES_MAP is required to demultiplex a single raw file",
            ));
        }
        if self.trim_length == 0 {
            return Err(PipelineError::config("TRIM_LENGTH must be positive"));
        }
        if self.consensus_levels.iter().any(|&l| l == 0) {
            return Err(PipelineError::config("consensus levels start at 1"));
        }
        Ok(())
    }
}

const KNOWN_KEYS: &[&str] = &[
    "DATASET_ID",
    "AMPLICON_TYPE",
    "OTU_SIMILARITY",
    "MIN_COUNT",
    "ASCII_ENCODING",
    "QUALITY_TRIM",
    "MAX_ERRORS",
    "TRIM_LENGTH",
    "BARCODES_MODE",
    "BARCODES_MATCHING",
    "BARCODES_SEPARATOR",
    "REFERENCE_ALIGN",
    "GG_ALIGN",
    "UNITE_ALIGN",
    "RDP_CUTOFF",
    "MAX_HITS",
    "PRIMERS_FILE",
    "BARCODES_MAP",
    "REFERENCE_DB",
    "REFERENCE_TAXONOMY",
    "RAW_FASTQ_FILE",
    "RAW_FASTA_FILE",
    "RAW_FASTQ_FILES",
    "RAW_FASTA_FILES",
];

fn parse_num<T: std::str::FromStr>(v: &str, key: &str) -> Result<T> {
    v.trim()
        .parse()
        .map_err(|_| PipelineError::config(format!("{key}: cannot parse '{v}'")))
}

fn parse_bool(v: &str, key: &str) -> Result<bool> {
    match v.to_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(PipelineError::config(format!("{key}: expected True/False, got '{v}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> AHashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_when_keys_are_missing() {
        let a = attrs(&[("RAW_FASTQ_FILE", "raw.fastq")]);
        let cfg = RunConfig::from_attributes(&a, Path::new("/in")).unwrap();
        assert_eq!(cfg.trim_length, 101);
        assert_eq!(cfg.min_count, 10);
        assert_eq!(cfg.effective_ascii_offset(), (33, true));
        assert_eq!(
            cfg.quality,
            QualityPolicy::Truncate { min_quality: 25 }
        );
        assert_eq!(
            cfg.raw_input,
            Some(RawInput::Single {
                path: PathBuf::from("/in/raw.fastq"),
                format: RecordFormat::Fastq
            })
        );
    }

    #[test]
    fn quality_and_max_errors_are_exclusive() {
        let a = attrs(&[
            ("RAW_FASTQ_FILE", "raw.fastq"),
            ("QUALITY_TRIM", "20"),
            ("MAX_ERRORS", "1.0"),
        ]);
        let err = RunConfig::from_attributes(&a, Path::new(".")).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration { .. }));
    }

    #[test]
    fn max_errors_selects_expected_error_policy() {
        let a = attrs(&[
            ("RAW_FASTQ_FILE", "raw.fastq"),
            ("MAX_ERRORS", "0.5"),
            ("ASCII_ENCODING", "ASCII_BASE_64"),
        ]);
        let cfg = RunConfig::from_attributes(&a, Path::new(".")).unwrap();
        assert_eq!(cfg.quality, QualityPolicy::MaxExpectedErrors { max_errors: 0.5 });
        assert_eq!(cfg.effective_ascii_offset(), (64, false));
    }

    #[test]
    fn quality_trim_none_disables_filtering_even_with_max_errors() {
        let a = attrs(&[
            ("RAW_FASTQ_FILE", "raw.fastq"),
            ("QUALITY_TRIM", "None"),
            ("MAX_ERRORS", "0.5"),
        ]);
        let cfg = RunConfig::from_attributes(&a, Path::new(".")).unwrap();
        assert_eq!(cfg.quality, QualityPolicy::Disabled);

        let a = attrs(&[("RAW_FASTQ_FILE", "raw.fastq"), ("MAX_ERRORS", "None")]);
        let cfg = RunConfig::from_attributes(&a, Path::new(".")).unwrap();
        assert_eq!(cfg.quality, QualityPolicy::Disabled);
    }

    #[test]
    fn manifest_input_is_found_after_single_files() {
        let a = attrs(&[("RAW_FASTA_FILES", "manifest.txt")]);
        let cfg = RunConfig::from_attributes(&a, Path::new("in")).unwrap();
        assert!(matches!(
            cfg.raw_input,
            Some(RawInput::Manifest { format: RecordFormat::Fasta, .. })
        ));
    }

    #[test]
    fn missing_raw_input_is_a_configuration_error() {
        let a = attrs(&[("DATASET_ID", "x")]);
        assert!(RunConfig::from_attributes(&a, Path::new(".")).is_err());
    }

    #[test]
    fn summary_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("summary_file.txt");
        std::fs::write(
            &p,
            "# comment\nDATASET_ID\tgut\nRAW_FASTA_FILE\tr.fa\nBARCODES_SEPARATOR\t.\nGG_ALIGN\tFalse\n",
        )
        .unwrap();
        let cfg = RunConfig::from_summary_file(&p, dir.path()).unwrap();
        assert_eq!(cfg.dataset_id, "gut");
        assert_eq!(cfg.separator, '.');
        assert!(!cfg.reference_align);
    }
}
