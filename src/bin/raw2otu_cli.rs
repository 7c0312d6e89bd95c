use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use raw2otu_rs::{process_dataset, RunOptions};

/// Amplicon raw reads to OTU and oligotype tables.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Options {
    /// Input directory holding summary_file.txt and the raw reads
    #[clap(short = 'i', long, value_parser)]
    input_dir: PathBuf,

    /// Output directory; artifacts go to <OUTPUT_DIR>/<DATASET_ID>
    #[clap(short = 'o', long, value_parser)]
    output_dir: PathBuf,

    /// Primers were already removed from the reads
    #[clap(long, action)]
    primers_removed: bool,

    /// Reads were already split by barcodes; sample labels are in the read ids
    #[clap(long, action)]
    split_by_barcodes: bool,

    /// Worker threads (defaults to the number of CPUs)
    #[clap(short = 'p', long, value_parser)]
    threads: Option<usize>,

    /// usearch binary
    #[clap(long, value_parser)]
    usearch: Option<PathBuf>,

    /// RDP classifier jar; taxonomic classification is skipped without it
    #[clap(long, value_parser)]
    rdp_jar: Option<PathBuf>,
}

fn spinner(color: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
            .template(&format!("{{spinner:.{color}}} {{msg}}"))
            .expect("Invalid spinner template"),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

fn main() -> ExitCode {
    env_logger::init();
    let opts = Options::parse();

    let options = RunOptions {
        primers_removed: opts.primers_removed,
        already_demultiplexed: opts.split_by_barcodes,
        threads: opts.threads,
        usearch: opts.usearch,
        rdp_jar: opts.rdp_jar,
    };

    // 1. One spinner message per pipeline phase
    let progress = spinner("blue");
    progress.set_message(format!("Reading {}...", opts.input_dir.display()));

    let result = process_dataset(&opts.input_dir, &opts.output_dir, &options, |phase| {
        progress.set_message(format!("{phase}..."));
    });

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            progress.abandon_with_message(format!("Run failed: {e}"));
            return ExitCode::FAILURE;
        }
    };
    progress.finish_with_message(format!(
        "Processed {} raw reads of dataset {}.",
        report.raw_reads, report.dataset_id
    ));

    // 2. Summary of produced and skipped tables
    let summary = spinner("green");
    for table in &report.produced {
        summary.println(format!("  {}\t{}", table.name, table.path.display()));
    }
    for table in &report.skipped {
        summary.println(format!("  skipped {}: {}", table.name, table.reason));
    }
    summary.finish_with_message(format!(
        "{} table(s) written, {} skipped, {} warning(s).",
        report.produced.len(),
        report.skipped.len(),
        report.warnings.len()
    ));
    ExitCode::SUCCESS
}
