// ========================================================================================
//
//                               THE MERGE ENGINE
//
// ========================================================================================
//
// A K-way merge over sorted VCF inputs. Every cursor exposes a (rank, position) key;
// each step emits one merged row for the minimum key and advances every cursor tied
// on it. Inputs are expected to be sorted by the chromosome order of the first input
// and then by position.

use crate::catalog::{CatalogError, ChromosomeCatalog, Intersection, intersect};
use crate::config::MergeConfig;
use crate::context::{Diagnostics, RunContext};
use crate::cursor::FileCursor;
use crate::decode::DecodeError;
use crate::header::HeaderError;
use crate::output::{
    InputCall, MergeHeader, MergeOutputs, MergedRecord, rename_duplicate_samples,
};
use crate::progress::{MergeProgressObserver, MergeProgressStage, NoopMergeProgress};
use crate::shared::files::{SourceError, TextSource, open_text_source};
use crate::types::{Chromosome, FeatureSet, VariantKey};
use log::{info, warn};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("{origin}:{line_number}: {source}")]
    Decode {
        origin: String,
        line_number: u64,
        #[source]
        source: DecodeError,
    },
    #[error(
        "{origin}:{line_number}: position {position} is outside chromosome '{chromosome}'{}",
        length_suffix(.length)
    )]
    PositionOutOfRange {
        origin: String,
        line_number: u64,
        chromosome: String,
        position: u64,
        length: Option<u64>,
    },
    #[error("failed to write merged output: {0}")]
    Output(#[from] io::Error),
}

fn length_suffix(length: &Option<u64>) -> String {
    match length {
        Some(len) => format!(" (length {len})"),
        None => String::new(),
    }
}

/// Totals reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub rows_written: u64,
    /// Data lines consumed per input, in input order.
    pub records_read: Vec<u64>,
    pub diagnostics: Diagnostics,
}

/// Decides which payloads are decoded and written for the whole run.
///
/// A feature stays enabled only if it is requested and every input with at least one
/// data record declares its label in that first record. Inputs without records do
/// not veto. Each disabled feature is reported once.
pub fn decide_features(
    requested: FeatureSet,
    first_records: &[(&str, Option<FeatureSet>)],
) -> FeatureSet {
    let mut features = requested;
    if requested.haplotypes {
        let refusing = inputs_lacking(first_records, |f| f.haplotypes);
        if !refusing.is_empty() {
            warn!(
                "GT output disabled: no GT field in the first record of {}",
                refusing.join(", ")
            );
            features.haplotypes = false;
        }
    }
    if requested.geno_probs {
        let refusing = inputs_lacking(first_records, |f| f.geno_probs);
        if !refusing.is_empty() {
            warn!(
                "GL output disabled: no GL field in the first record of {}",
                refusing.join(", ")
            );
            features.geno_probs = false;
        }
    }
    features
}

fn inputs_lacking<'a>(
    first_records: &[(&'a str, Option<FeatureSet>)],
    present: fn(&FeatureSet) -> bool,
) -> Vec<&'a str> {
    first_records
        .iter()
        .filter_map(|(origin, declared)| match declared {
            Some(declared) if !present(declared) => Some(*origin),
            _ => None,
        })
        .collect()
}

pub struct MergeEngine {
    cursors: Vec<FileCursor>,
    shared: Intersection,
    features: FeatureSet,
    samples: Vec<String>,
    ctx: RunContext,
    progress_interval: u64,
    rows_written: u64,
    /// Indices of the cursors tied on the current minimum key.
    tie_group: Vec<usize>,
}

impl MergeEngine {
    /// Opens every path as a text source and builds the engine over them.
    pub fn open(paths: &[PathBuf], config: &MergeConfig) -> Result<Self, MergeError> {
        Self::open_with_progress(paths, config, &mut NoopMergeProgress)
    }

    pub fn open_with_progress(
        paths: &[PathBuf],
        config: &MergeConfig,
        progress: &mut dyn MergeProgressObserver,
    ) -> Result<Self, MergeError> {
        let sources = paths
            .iter()
            .map(|path| open_text_source(path))
            .collect::<Result<Vec<_>, _>>()?;
        Self::with_progress(sources, config, progress)
    }

    /// Reads every header, intersects the chromosome catalogs, decides the run-wide
    /// features and positions each cursor on its first intersected record.
    pub fn new(sources: Vec<Box<dyn TextSource>>, config: &MergeConfig) -> Result<Self, MergeError> {
        Self::with_progress(sources, config, &mut NoopMergeProgress)
    }

    /// Like [`MergeEngine::new`], reporting each header read as a `Headers` stage advance.
    pub fn with_progress(
        sources: Vec<Box<dyn TextSource>>,
        config: &MergeConfig,
        progress: &mut dyn MergeProgressObserver,
    ) -> Result<Self, MergeError> {
        if sources.is_empty() {
            return Err(CatalogError::NoInputs.into());
        }

        let mut ctx = RunContext::new();
        progress.on_stage_start(MergeProgressStage::Headers, sources.len());
        let mut cursors = Vec::with_capacity(sources.len());
        for (index, source) in sources.into_iter().enumerate() {
            cursors.push(FileCursor::open(
                index,
                source,
                config.allele_truncation(),
                &mut ctx,
            )?);
            progress.on_stage_advance(MergeProgressStage::Headers, cursors.len() as u64);
        }
        progress.on_stage_finish(MergeProgressStage::Headers, cursors.len() as u64);

        let catalogs: Vec<&ChromosomeCatalog> =
            cursors.iter().map(|c| &c.header().catalog).collect();
        let shared = intersect(&catalogs)?;
        info!(
            "{} of {} declared chromosomes are shared by all {} inputs",
            shared.len(),
            shared.len() + shared.excluded().len(),
            cursors.len()
        );

        let mut first_records = Vec::with_capacity(cursors.len());
        for cursor in cursors.iter_mut() {
            first_records.push(cursor.prime()?);
        }
        let labelled: Vec<(&str, Option<FeatureSet>)> = cursors
            .iter()
            .map(|c| c.origin())
            .zip(first_records)
            .collect();
        let features = decide_features(config.requested_features(), &labelled);

        for cursor in cursors.iter_mut() {
            cursor.advance(&shared, features, &mut ctx)?;
        }

        let samples: Vec<String> = cursors
            .iter()
            .flat_map(|c| c.header().samples.iter().cloned())
            .collect();
        let samples = if config.rename_duplicate_samples {
            rename_duplicate_samples(samples)
        } else {
            samples
        };

        Ok(Self {
            cursors,
            shared,
            features,
            samples,
            ctx,
            progress_interval: config.progress_interval,
            rows_written: 0,
            tie_group: Vec::new(),
        })
    }

    pub fn features(&self) -> FeatureSet {
        self.features
    }

    /// Sample names of every input in input order, after duplicate renaming.
    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn chromosomes(&self) -> &[Chromosome] {
        self.shared.chromosomes()
    }

    pub fn n_inputs(&self) -> usize {
        self.cursors.len()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        self.ctx.diagnostics()
    }

    pub fn header(&self) -> MergeHeader<'_> {
        MergeHeader {
            chromosomes: self.shared.chromosomes(),
            samples: &self.samples,
            features: self.features,
        }
    }

    /// The smallest key over all active cursors.
    fn min_key(&self) -> Option<VariantKey> {
        self.cursors.iter().filter_map(FileCursor::key).min()
    }

    /// Emits one merged row for the minimum key and advances the tied cursors.
    /// Returns false once every cursor is exhausted.
    pub fn step(&mut self, outputs: &mut MergeOutputs<'_>) -> Result<bool, MergeError> {
        let Some(min_key) = self.min_key() else {
            return Ok(false);
        };

        self.tie_group.clear();
        self.tie_group.extend(
            self.cursors
                .iter()
                .filter(|c| c.key() == Some(min_key))
                .map(FileCursor::index),
        );

        // The lowest-index tied input supplies the fixed columns.
        let leader = self.tie_group[0];
        for &other in &self.tie_group[1..] {
            let (lead, current) = (self.cursors[leader].current(), self.cursors[other].current());
            if !lead.alleles_match(current) {
                warn!(
                    "allele mismatch at {}:{}: {} has {}>{} but {} has {}>{}, keeping the first",
                    lead.chromosome,
                    lead.position,
                    self.cursors[leader].origin(),
                    lead.ref_allele,
                    lead.alt_allele,
                    self.cursors[other].origin(),
                    current.ref_allele,
                    current.alt_allele
                );
                self.ctx.note_allele_mismatch();
            }
        }

        let record = MergedRecord {
            row: self.rows_written,
            leader: self.cursors[leader].current(),
            features: self.features,
            inputs: self
                .cursors
                .iter()
                .map(|c| InputCall {
                    n_samples: c.n_samples(),
                    variant: (c.key() == Some(min_key)).then(|| c.current()),
                })
                .collect(),
        };
        outputs.write(&record)?;
        self.rows_written += 1;

        for &index in &self.tie_group {
            self.cursors[index].advance(&self.shared, self.features, &mut self.ctx)?;
        }
        Ok(true)
    }

    /// Writes the header, merges every record and finalises the outputs.
    pub fn run(
        mut self,
        outputs: &mut MergeOutputs<'_>,
        progress: &mut dyn MergeProgressObserver,
    ) -> Result<MergeSummary, MergeError> {
        outputs.write_header(&self.header())?;

        progress.on_stage_start(MergeProgressStage::Records, self.cursors.len());
        let interval = self.progress_interval.max(1);
        while self.step(outputs)? {
            if self.rows_written % interval == 0 {
                progress.on_stage_advance(MergeProgressStage::Records, self.rows_written);
            }
        }
        outputs.finish()?;
        progress.on_stage_finish(MergeProgressStage::Records, self.rows_written);

        let diagnostics = self.ctx.diagnostics().clone();
        info!(
            "merged {} rows ({} records on non-shared chromosomes skipped, {} allele mismatches)",
            self.rows_written, diagnostics.dropped_records, diagnostics.allele_mismatches
        );
        Ok(MergeSummary {
            rows_written: self.rows_written,
            records_read: self.cursors.iter().map(FileCursor::records_read).collect(),
            diagnostics,
        })
    }
}
