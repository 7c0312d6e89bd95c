//src/pipeline.rs

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use ahash::AHashMap;

use crate::classifier::parse_fixrank;
use crate::clusters::ClusterMembership;
use crate::config::{QualityPolicy, RawInput, RunConfig};
use crate::context::PipelineContext;
use crate::derep::{dereplicate_file, DereplicationMap};
use crate::error::{EnrichmentError, ExternalToolError, PipelineError, Result};
use crate::external::{Clusterer, ReferenceAligner, TaxonomicClassifier};
use crate::fastq::write_records_to;
use crate::partition::{chunks_from_manifest, split_raw_file};
use crate::prune::prune_empty;
use crate::qc::{write_length_histogram, write_sample_read_counts};
use crate::reference::{ConsensusAssignment, ConsensusRule, MultiHitAlignments, ReferenceTaxonomy};
use crate::report::{DereplicationSummary, RunReport};
use crate::runner::StageRunner;
use crate::stages::{
    BarcodeMap, ChunkStage, Demultiplexer, ExpectedErrorFilter, FormatConverter, LengthNormalizer,
    PrimerTrimmer, QualityTruncator, Renumberer, SampleRelabeler,
};
use crate::tables::{
    closed_reference_table, oligotype_table, otu_table, relabel_by_lineage, AbundanceTable,
};
use crate::types::{Chunk, RecordFormat, SeqRecord};

/// External collaborators of a run. Clustering is mandatory; the aligner and
/// the classifier feed optional tables.
pub struct ExternalTools<'a> {
    pub clusterer: &'a dyn Clusterer,
    pub aligner: Option<&'a dyn ReferenceAligner>,
    pub classifier: Option<&'a dyn TaxonomicClassifier>,
}

/// Sequences one run: per-chunk stages in parallel, then the serial
/// dereplication, clustering and table phases.
pub struct Pipeline<'a> {
    config: RunConfig,
    input_dir: PathBuf,
    tools: ExternalTools<'a>,
    on_phase: Option<Box<dyn Fn(&str) + 'a>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: RunConfig, input_dir: impl AsRef<Path>, tools: ExternalTools<'a>) -> Self {
        Self {
            config,
            input_dir: input_dir.as_ref().to_path_buf(),
            tools,
            on_phase: None,
        }
    }

    /// Called with a short description whenever a new phase starts.
    pub fn on_phase(mut self, f: impl Fn(&str) + 'a) -> Self {
        self.on_phase = Some(Box::new(f));
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    fn phase(&self, name: &str) {
        log::info!("=== {name} ===");
        if let Some(f) = &self.on_phase {
            f(name);
        }
    }

    /// Runs every phase and writes the processing summary. Fatal errors abort
    /// the run; failures of optional stages are recorded as skipped tables.
    pub fn run(&self, ctx: &PipelineContext) -> Result<RunReport> {
        let cfg = &self.config;
        cfg.validate()?;
        let raw = cfg
            .raw_input
            .as_ref()
            .ok_or_else(|| PipelineError::config("no raw input configured"))?;
        let mut report = RunReport::new(ctx.dataset_id());
        let runner = StageRunner::new(cfg.threads)?;

        // 1) partition
        self.phase("partitioning raw reads");
        let chunks = match raw {
            RawInput::Single { path, format } => split_raw_file(ctx, path, *format)?,
            RawInput::Manifest { path, format } => {
                chunks_from_manifest(ctx, path, &self.input_dir, *format)?
            }
        };
        let (chunks, _) = prune_empty(chunks, "partition")?;
        if chunks.is_empty() {
            return Err(PipelineError::StageData {
                stage: "partition".to_string(),
            });
        }
        write_length_histogram(
            &chunks[0].path,
            ctx.qc_dir().join("read_length_histogram.txt"),
        )?;

        // 2) per-chunk stages
        let mut chunks = chunks;
        for stage in self.chunk_stages(ctx, raw)? {
            chunks = self.run_stage(ctx, &runner, stage.as_ref(), chunks, &mut report)?;
        }
        let renumber = Renumberer::for_chunks(&chunks, cfg.separator)?;
        chunks = self.run_stage(ctx, &runner, &renumber, chunks, &mut report)?;
        report.raw_reads = report.stages.first().map(|s| s.reads_in).unwrap_or(0);

        // 3) merge and dereplicate
        self.phase("merging and dereplicating reads");
        merge_chunks(&chunks, &ctx.trimmed_fasta())?;
        let derep = dereplicate_file(ctx.trimmed_fasta(), cfg.separator, cfg.min_count)?;
        report.dereplication = Some(DereplicationSummary {
            reads_in: derep.reads_in,
            unique_sequences: derep.unique_sequences,
            representatives_kept: derep.map.len(),
            reads_discarded: derep.reads_discarded,
            min_count: cfg.min_count,
        });
        if derep.map.is_empty() {
            return Err(PipelineError::StageData {
                stage: "dereplication".to_string(),
            });
        }
        let map = derep.map;
        map.write_fasta(ctx.dereplicated_fasta())?;
        map.write_map(ctx.dereplication_map())?;

        // 4) mandatory de-novo clustering
        self.phase("clustering OTUs de novo");
        let clusters =
            self.cluster(ctx, &ctx.dereplicated_fasta(), &ctx.clustering_results())?;
        write_centroids(&map, &clusters, &ctx.otu_sequences_fasta())?;

        let oligotypes = oligotype_table(&map, &clusters);
        self.write_table(&mut report, "oligotype", &oligotypes, ctx.otu_table("denovo_oligotypes"))?;
        let denovo = otu_table(&oligotypes);
        self.write_table(&mut report, "denovo", &denovo, ctx.otu_table("denovo"))?;
        self.write_table(
            &mut report,
            "denovo relative",
            &denovo.relative_abundance(),
            ctx.otu_table("denovo.relative"),
        )?;

        // 5) optional reference matching
        if !cfg.reference_align {
            report.skipped("reference tables", "reference alignment disabled");
        } else if let Some(aligner) = self.tools.aligner {
            self.phase("matching reads against the reference database");
            match self.reference_tables(ctx, aligner, &map, &mut report) {
                Ok(()) => {}
                Err(EnrichmentError::Tool(e)) => {
                    report.skipped("reference tables", e.to_string());
                }
                Err(EnrichmentError::Fatal(e)) => return Err(e),
            }
        } else {
            report.skipped("reference tables", "no reference aligner configured");
        }

        // 6) optional taxonomic classification
        if let Some(classifier) = self.tools.classifier {
            self.phase("classifying OTUs");
            match self.classifier_table(ctx, classifier, &denovo, &mut report) {
                Ok(()) => {}
                Err(EnrichmentError::Tool(e)) => {
                    report.skipped("classifier assigned", e.to_string());
                }
                Err(EnrichmentError::Fatal(e)) => return Err(e),
            }
        } else {
            report.skipped("classifier assigned", "no classifier configured");
        }

        // 7) quality control and summary
        self.phase("writing quality control summary");
        write_sample_read_counts(&denovo, ctx.qc_dir().join("sample_read_counts.txt"))?;
        report.warnings = ctx.warnings();
        report.write(ctx.qc_dir().join("processing_summary.txt"))?;
        log::info!(
            "Run finished: {} table(s) produced, {} skipped",
            report.produced.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Per-chunk stages in execution order, renumbering excluded.
    fn chunk_stages(
        &self,
        ctx: &PipelineContext,
        raw: &RawInput,
    ) -> Result<Vec<Box<dyn ChunkStage>>> {
        let cfg = &self.config;
        let format = raw.format();
        let mut stages: Vec<Box<dyn ChunkStage>> = Vec::new();

        match raw {
            RawInput::Manifest { .. } => stages.push(Box::new(SampleRelabeler {
                separator: cfg.separator,
            })),
            RawInput::Single { .. } if !cfg.already_demultiplexed => {
                let path = cfg.barcodes_map.as_ref().ok_or_else(|| {
                    PipelineError::config("BARCODES_MAP is required to demultiplex")
                })?;
                stages.push(Box::new(Demultiplexer {
                    barcodes: BarcodeMap::from_file(path)?,
                    location: cfg.barcode_location,
                    matching: cfg.barcode_matching,
                    separator: cfg.separator,
                }));
            }
            RawInput::Single { .. } => {
                log::info!("Reads already demultiplexed; keeping sample labels from read ids")
            }
        }

        if !cfg.primers_removed {
            let path = cfg.primers_file.as_ref().ok_or_else(|| {
                PipelineError::config("PRIMERS_FILE is required unless primers were removed")
            })?;
            stages.push(Box::new(PrimerTrimmer {
                primers: PrimerTrimmer::load_primers(path)?,
                max_mismatches: cfg.primer_mismatches,
                strictness: cfg.primer_strictness,
            }));
        }

        if format == RecordFormat::Fastq {
            let (ascii_offset, defaulted) = cfg.effective_ascii_offset();
            if defaulted {
                ctx.warn(format!(
                    "ASCII_ENCODING not given; assuming quality offset {ascii_offset}"
                ));
            }
            if let QualityPolicy::Truncate { min_quality } = cfg.quality {
                stages.push(Box::new(QualityTruncator {
                    min_quality,
                    ascii_offset,
                }));
            }
            stages.push(Box::new(LengthNormalizer {
                length: cfg.trim_length,
            }));
            if let QualityPolicy::MaxExpectedErrors { max_errors } = cfg.quality {
                stages.push(Box::new(ExpectedErrorFilter {
                    max_errors,
                    ascii_offset,
                }));
            }
            stages.push(Box::new(FormatConverter));
        } else {
            stages.push(Box::new(LengthNormalizer {
                length: cfg.trim_length,
            }));
        }
        Ok(stages)
    }

    fn run_stage(
        &self,
        ctx: &PipelineContext,
        runner: &StageRunner,
        stage: &dyn ChunkStage,
        chunks: Vec<Chunk>,
        report: &mut RunReport,
    ) -> Result<Vec<Chunk>> {
        self.phase(stage.name());
        let outcome = runner.run(ctx, stage, chunks)?;
        report.stages.push(outcome.summary);
        Ok(outcome.chunks)
    }

    fn cluster(
        &self,
        ctx: &PipelineContext,
        input: &Path,
        output_uc: &Path,
    ) -> std::result::Result<ClusterMembership, ExternalToolError> {
        self.tools
            .clusterer
            .cluster(ctx, input, self.config.similarity, output_uc)?;
        ClusterMembership::parse_uc(output_uc)
    }

    fn write_table(
        &self,
        report: &mut RunReport,
        name: &str,
        table: &AbundanceTable,
        path: PathBuf,
    ) -> Result<()> {
        table.write_classic(&path)?;
        report.produced(name, path);
        Ok(())
    }

    /// Closed-reference tables per consensus level, their relative variants,
    /// and open-reference tables when some representatives found no hit.
    fn reference_tables(
        &self,
        ctx: &PipelineContext,
        aligner: &dyn ReferenceAligner,
        map: &DereplicationMap,
        report: &mut RunReport,
    ) -> std::result::Result<(), EnrichmentError> {
        let cfg = &self.config;
        let tag = cfg.amplicon.reference_tag();

        let uc = ctx.working_dir().join(format!("{tag}_alignments.uc"));
        aligner.align(ctx, &ctx.dereplicated_fasta(), cfg.similarity, cfg.max_hits, &uc)?;
        let mut alignments = MultiHitAlignments::parse_uc(&uc, cfg.max_hits)?;
        if let Some(path) = &cfg.reference_taxonomy {
            alignments.relabel(&ReferenceTaxonomy::from_file(path)?);
        }

        let matched_fasta = ctx.working_dir().join("ref_matched.fasta");
        let unmatched_fasta = ctx.working_dir().join("denovo_reads.fasta");
        let unmatched = separate_matched(map, &alignments, &matched_fasta, &unmatched_fasta)?;

        // de-novo-only table from the representatives without any hit
        let denovo_only = if unmatched == 0 {
            report.skipped("open reference tables", "every representative matched the reference");
            None
        } else {
            let uc = ctx.artifact("denovo_clustering.uc");
            match self.cluster(ctx, &unmatched_fasta, &uc) {
                Ok(clusters) => {
                    write_centroids(
                        map,
                        &clusters,
                        &ctx.artifact(&format!(
                            "otu_seqs.{}.open_ref_unmatched_otus",
                            cfg.similarity_tag()
                        )),
                    )?;
                    let table = otu_table(&oligotype_table(map, &clusters));
                    self.write_table(
                        report,
                        "denovo-only",
                        &table,
                        ctx.artifact("denovo_only_otu_table.classic"),
                    )?;
                    Some(table)
                }
                Err(e) => {
                    report.skipped("open reference tables", e.to_string());
                    None
                }
            }
        };

        for &level in &cfg.consensus_levels {
            let rule = ConsensusRule {
                level,
                require_full_depth: cfg.require_full_depth,
            };
            let assignment = ConsensusAssignment::compute(&alignments, rule);
            let closed = closed_reference_table(map, &assignment);
            let suffix = format!("{tag}.consensus{level}");

            self.write_table(
                report,
                &format!("closed reference consensus {level}"),
                &closed,
                ctx.otu_table(&suffix),
            )?;
            self.write_table(
                report,
                &format!("closed reference consensus {level} relative"),
                &closed.relative_abundance(),
                ctx.otu_table(&format!("{suffix}.relative")),
            )?;

            if let Some(denovo_only) = &denovo_only {
                let (open, renamed) = AbundanceTable::merge_open_reference(&closed, denovo_only);
                for (old, new) in renamed {
                    ctx.warn(format!(
                        "consensus {level}: de-novo feature {old} collides with a reference label, renamed {new}"
                    ));
                }
                self.write_table(
                    report,
                    &format!("open reference consensus {level}"),
                    &open,
                    ctx.otu_table(&format!("{suffix}.open_ref")),
                )?;
            }
        }
        Ok(())
    }

    /// De-novo OTU table relabelled by classifier lineage.
    fn classifier_table(
        &self,
        ctx: &PipelineContext,
        classifier: &dyn TaxonomicClassifier,
        denovo: &AbundanceTable,
        report: &mut RunReport,
    ) -> std::result::Result<(), EnrichmentError> {
        let cfg = &self.config;
        let output = ctx.artifact("rdp_assigned_taxonomy.txt");
        classifier.classify(ctx, &ctx.otu_sequences_fasta(), cfg.amplicon, &output)?;
        let lineages: AHashMap<String, String> = parse_fixrank(&output, cfg.classifier_cutoff)?
            .into_iter()
            .map(|(otu, lineage)| (otu, lineage.label()))
            .collect();
        let table = relabel_by_lineage(denovo, &lineages);
        self.write_table(report, "classifier assigned", &table, ctx.otu_table("denovo.rdp_assigned"))?;
        Ok(())
    }
}

/// Concatenates chunk artifacts, in chunk order, into one file.
pub fn merge_chunks(chunks: &[Chunk], output: &Path) -> Result<()> {
    let file = File::create(output).map_err(|e| PipelineError::io(output, e))?;
    let mut out = BufWriter::new(file);
    for chunk in chunks {
        let mut input = File::open(&chunk.path).map_err(|e| PipelineError::io(&chunk.path, e))?;
        std::io::copy(&mut input, &mut out).map_err(|e| PipelineError::io(output, e))?;
    }
    out.flush().map_err(|e| PipelineError::io(output, e))?;
    log::info!("Merged {} chunk(s) into {}", chunks.len(), output.display());
    Ok(())
}

/// Writes one `>OTU_n` record per cluster, carrying its centroid's sequence.
fn write_centroids(map: &DereplicationMap, clusters: &ClusterMembership, path: &Path) -> Result<()> {
    let records: Vec<SeqRecord> = clusters
        .otus()
        .filter_map(|(otu, centroid)| {
            map.get(centroid)
                .map(|rep| SeqRecord::new(otu, rep.sequence.clone(), None))
        })
        .collect();
    write_records_to(path, &records, RecordFormat::Fasta).map_err(|e| PipelineError::io(path, e))
}

/// Splits representatives by whether they have a reference hit. Returns the
/// number of unmatched representatives.
fn separate_matched(
    map: &DereplicationMap,
    alignments: &MultiHitAlignments,
    matched_path: &Path,
    unmatched_path: &Path,
) -> Result<usize> {
    let mut matched = Vec::new();
    let mut unmatched = Vec::new();
    for rep in map.representatives() {
        let record = SeqRecord::new(format!("{};size={};", rep.id, rep.total), rep.sequence.clone(), None);
        if alignments.is_matched(&rep.id) {
            matched.push(record);
        } else {
            unmatched.push(record);
        }
    }
    write_records_to(matched_path, &matched, RecordFormat::Fasta)
        .map_err(|e| PipelineError::io(matched_path, e))?;
    write_records_to(unmatched_path, &unmatched, RecordFormat::Fasta)
        .map_err(|e| PipelineError::io(unmatched_path, e))?;
    log::info!(
        "{} representatives matched the reference, {} left for de-novo clustering",
        matched.len(),
        unmatched.len()
    );
    Ok(unmatched.len())
}
