//! Run-scoped diagnostic state.
//!
//! Everything that has to be remembered across records (warn-once flags and the
//! counters reported at the end of a run) lives here and is passed explicitly to
//! the decoders, so two runs in one process never share state.

use log::{debug, warn};

/// Counters accumulated over one merge run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Number of "genotypes are unphased" notices emitted. At most one per run.
    pub unphased_notices: usize,
    pub unparsable_genotypes: u64,
    pub non_binary_genotypes: u64,
    pub unparsable_likelihoods: u64,
    pub truncated_alleles: u64,
    pub schema_mismatches: u64,
    pub allele_mismatches: u64,
    /// Records skipped because their chromosome is not shared by every input.
    pub dropped_records: u64,
}

#[derive(Debug, Default)]
pub struct RunContext {
    diagnostics: Diagnostics,
    unphased_seen: bool,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn note_unphased(&mut self, token: &str) {
        if self.unphased_seen {
            return;
        }
        self.unphased_seen = true;
        self.diagnostics.unphased_notices += 1;
        warn!("some genotypes are unphased (delimited with '/' instead of '|'), first seen: '{token}'");
    }

    pub fn note_unparsable_genotype(&mut self, token: &str) {
        self.diagnostics.unparsable_genotypes += 1;
        warn!("could not parse genotype string '{token}', setting it to missing");
    }

    /// Copy-number and multi-allelic calls cannot be represented as binary
    /// haplotypes and are degraded to missing.
    pub fn note_non_binary_genotype(&mut self, token: &str) {
        self.diagnostics.non_binary_genotypes += 1;
        debug!("non-binary genotype '{token}' set to missing");
    }

    pub fn note_unparsable_likelihood(&mut self, token: &str) {
        self.diagnostics.unparsable_likelihoods += 1;
        warn!("failed to parse genotype likelihoods from '{token}', using a uniform triple");
    }

    pub fn note_truncated_allele(&mut self, true_len: usize, kept_len: usize) {
        self.diagnostics.truncated_alleles += 1;
        warn!("truncating long allele ({true_len} bp) to {kept_len} bp");
    }

    pub fn note_schema_mismatch(&mut self, origin: &str, column: usize, expected: &str, found: &str) {
        self.diagnostics.schema_mismatches += 1;
        warn!("{origin}: expected header column {column} to be {expected} but got '{found}'");
    }

    pub fn note_allele_mismatch(&mut self) {
        self.diagnostics.allele_mismatches += 1;
    }

    pub fn note_dropped_record(&mut self) {
        self.diagnostics.dropped_records += 1;
    }
}
