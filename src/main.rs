// ========================================================================================
//
//                           THE COMMAND LINE: VCFMERGE
//
// ========================================================================================
//
// Parses arguments, layers CLI flags over the TOML configuration, opens the outputs
// and drives the merge engine to completion. Any fatal error is printed to stderr and
// ends the process with status 1.

use clap::Parser;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;
use thiserror::Error;
use vcfmerge::config::{ConfigError, MergeConfig};
use vcfmerge::engine::{MergeEngine, MergeError, MergeSummary};
use vcfmerge::output::{MergeOutputs, TsvMatrixWriter, VcfWriter};
use vcfmerge::progress::{MergeProgressObserver, MergeProgressStage};
use vcfmerge::shared::files::{OutputStream, SourceError, create_output_stream};

// ========================================================================================
//                         COMMAND-LINE INTERFACE DEFINITION
// ========================================================================================

#[derive(Parser, Debug)]
#[clap(
    name = "vcfmerge",
    version,
    about = "Merge position-sorted VCF files over the chromosomes they all declare."
)]
struct Args {
    /// Input VCF files, plain or gzip-compressed, each sorted by chromosome then position.
    #[clap(required = true)]
    inputs: Vec<PathBuf>,

    /// TOML file with run settings. Flags below override its values.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Merged VCF destination. Standard output when omitted; gzip when ending in .gz.
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// Do not decode or write genotype likelihoods (GL).
    #[clap(long)]
    no_geno_probs: bool,

    /// Do not decode or write haplotypes (GT). Unphased input calls (a/b) are written as a|b.
    #[clap(long)]
    no_haplotypes: bool,

    /// Truncate REF/ALT alleles longer than this many bytes. 0 disables truncation.
    #[clap(long)]
    max_allele_len: Option<usize>,

    /// Also write genotype probabilities as a row-indexed TSV matrix.
    #[clap(long)]
    geno_probs_matrix: Option<PathBuf>,

    /// Also write haplotypes as a row-indexed TSV matrix.
    #[clap(long)]
    haplotypes_matrix: Option<PathBuf>,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Output(#[from] SourceError),
    #[error("failed to finish output: {0}")]
    Io(#[from] io::Error),
}

// ========================================================================================
//                                  PROGRESS SPINNER
// ========================================================================================

struct SpinnerProgress {
    pb: ProgressBar,
}

impl SpinnerProgress {
    fn new() -> Self {
        let draw_target = if io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(10)
        } else {
            ProgressDrawTarget::hidden()
        };
        let pb = ProgressBar::with_draw_target(None, draw_target);
        if let Ok(style) =
            ProgressStyle::with_template("> [{elapsed_precise}] {spinner} {pos} rows {msg}")
        {
            pb.set_style(style);
        }
        Self { pb }
    }
}

impl MergeProgressObserver for SpinnerProgress {
    fn on_stage_start(&mut self, stage: MergeProgressStage, n_inputs: usize) {
        self.pb.set_message(format!("{stage} over {n_inputs} inputs"));
    }

    fn on_stage_advance(&mut self, stage: MergeProgressStage, processed: u64) {
        if stage == MergeProgressStage::Records {
            self.pb.set_position(processed);
        }
    }

    fn on_stage_finish(&mut self, stage: MergeProgressStage, processed: u64) {
        match stage {
            MergeProgressStage::Headers => {
                self.pb.set_message(format!("{processed} headers read"));
            }
            MergeProgressStage::Records => {
                self.pb.set_position(processed);
                self.pb.finish_with_message(format!("{stage} complete"));
            }
        }
    }
}

// ========================================================================================
//                           THE MAIN ORCHESTRATION LOGIC
// ========================================================================================

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let start_time = Instant::now();
    let args = Args::parse();

    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Fatal: {e}");
            process::exit(1);
        }
    };

    eprintln!("> Merging {} input files", args.inputs.len());
    match run(&args, &config) {
        Ok(summary) => report(&args, &summary),
        Err(e) => {
            eprintln!("Fatal: {e}");
            process::exit(1);
        }
    }
    eprintln!("> Finished in {:.2?}", start_time.elapsed());
}

fn resolve_config(args: &Args) -> Result<MergeConfig, CliError> {
    let mut config = match &args.config {
        Some(path) => {
            eprintln!("> Loading configuration from {}", path.display());
            MergeConfig::from_toml_file(path)?
        }
        None => MergeConfig::default(),
    };
    if args.no_geno_probs {
        config.geno_probs = false;
    }
    if args.no_haplotypes {
        config.haplotypes = false;
    }
    if let Some(max_len) = args.max_allele_len {
        config.max_allele_len = max_len;
    }
    Ok(config)
}

fn open_matrix(path: Option<&Path>) -> Result<Option<TsvMatrixWriter<OutputStream>>, CliError> {
    match path {
        Some(path) => Ok(Some(TsvMatrixWriter::new(create_output_stream(Some(path))?))),
        None => Ok(None),
    }
}

fn run(args: &Args, config: &MergeConfig) -> Result<MergeSummary, CliError> {
    let mut progress = SpinnerProgress::new();
    let engine = MergeEngine::open_with_progress(&args.inputs, config, &mut progress)?;
    let features = engine.features();
    eprintln!(
        "> {} shared chromosomes, {} samples, FORMAT {}",
        engine.chromosomes().len(),
        engine.samples().len(),
        features.format_label().unwrap_or("(none)")
    );

    let mut vcf = VcfWriter::new(create_output_stream(args.output.as_deref())?);
    let mut prob_matrix = open_matrix(args.geno_probs_matrix.as_deref())?;
    let mut hap_matrix = open_matrix(args.haplotypes_matrix.as_deref())?;

    let mut outputs = MergeOutputs::new().with_records(&mut vcf);
    if let Some(matrix) = prob_matrix.as_mut() {
        outputs = outputs.with_geno_probs(matrix);
    }
    if let Some(matrix) = hap_matrix.as_mut() {
        outputs = outputs.with_haplotypes(matrix);
    }

    let summary = engine.run(&mut outputs, &mut progress)?;
    drop(outputs);

    vcf.into_inner().finish()?;
    if let Some(matrix) = prob_matrix {
        matrix.into_inner().finish()?;
    }
    if let Some(matrix) = hap_matrix {
        matrix.into_inner().finish()?;
    }
    Ok(summary)
}

fn report(args: &Args, summary: &MergeSummary) {
    eprintln!("> Wrote {} merged records", summary.rows_written);
    for (path, records) in args.inputs.iter().zip(&summary.records_read) {
        eprintln!(">   {}: {records} records read", path.display());
    }
    let diag = &summary.diagnostics;
    if diag.dropped_records > 0 {
        eprintln!(
            "> {} records on chromosomes not shared by every input were skipped",
            diag.dropped_records
        );
    }
    if diag.allele_mismatches > 0 {
        eprintln!(
            "> {} merged records had differing alleles across inputs",
            diag.allele_mismatches
        );
    }
    let recovered = diag.unparsable_genotypes + diag.non_binary_genotypes + diag.unparsable_likelihoods;
    if recovered > 0 {
        eprintln!("> {recovered} genotype tokens were set to missing or uniform");
    }
}
