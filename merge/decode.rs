// ========================================================================================
//
//                              THE RECORD DECODER
//
// ========================================================================================
//
// Turns one tab-delimited data line into a `Variant`. The nine fixed columns are
// always decoded; per-sample haplotypes (GT) and genotype probabilities (GL) are
// decoded on request. Both sample decoders walk the same borrowed slice of the line,
// so asking for both never copies or mutates the sample text.

use crate::context::RunContext;
use crate::format::{FormatSpec, GL_LABEL, GT_LABEL, resolve_index, sub_token};
use crate::types::{HAPLOTYPE_MISSING, Variant};
use thiserror::Error;

/// CHROM, POS, ID, REF, ALT, QUAL, FILTER, INFO, FORMAT.
pub const FIXED_COLUMN_COUNT: usize = 9;

/// log10(1/3): the likelihood assigned to each genotype class of a missing (`.`) GL token.
const MISSING_LOG10_LIKELIHOOD: f64 = -0.477_121_254_719_662_4;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("expected at least {expected} tab-delimited fields per line, found {found}")]
    TooFewFields { expected: usize, found: usize },
    #[error("invalid position '{0}'")]
    InvalidPosition(String),
    #[error(
        "FORMAT '{layout}' does not specify the {label} field, which is required for this run"
    )]
    MissingFormatLabel { label: &'static str, layout: String },
    #[error("expected {expected} genotype values per line, but got {found}")]
    HaplotypeCount { expected: usize, found: usize },
    #[error("expected {expected} genotype likelihoods per line, but got {found}")]
    ProbabilityCount { expected: usize, found: usize },
}

/// What to do with REF/ALT literals longer than a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlleleTruncation {
    Keep,
    MaxLen(usize),
}

impl AlleleTruncation {
    /// A maximum of zero disables truncation.
    pub fn from_max_len(max_len: usize) -> Self {
        if max_len == 0 {
            Self::Keep
        } else {
            Self::MaxLen(max_len)
        }
    }
}

/// A borrowed, read-only view of the per-sample columns of one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleFields<'a> {
    text: &'a str,
}

impl<'a> SampleFields<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { text }
    }

    pub fn len(&self) -> usize {
        if self.text.is_empty() {
            0
        } else {
            memchr::memchr_iter(b'\t', self.text.as_bytes()).count() + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a str> + use<'a> {
        let text = self.text;
        let mut fields = text.split('\t');
        if text.is_empty() {
            fields.next();
        }
        fields
    }
}

/// The nine fixed columns of a data line plus the remaining sample columns.
#[derive(Debug, Clone, Copy)]
pub struct FixedFields<'a> {
    pub chromosome: &'a str,
    pub position: u64,
    pub id: &'a str,
    pub ref_allele: &'a str,
    pub alt_allele: &'a str,
    pub qual: &'a str,
    pub filter: &'a str,
    pub info: &'a str,
    pub format: &'a str,
    pub samples: SampleFields<'a>,
}

/// Splits a data line into its fixed columns. Fails when fewer than nine columns exist.
pub fn decode_fixed_fields(line: &str) -> Result<FixedFields<'_>, DecodeError> {
    let mut columns = line.splitn(FIXED_COLUMN_COUNT + 1, '\t');
    let mut fixed = [""; FIXED_COLUMN_COUNT];
    for (found, slot) in fixed.iter_mut().enumerate() {
        *slot = columns.next().ok_or(DecodeError::TooFewFields {
            expected: FIXED_COLUMN_COUNT,
            found,
        })?;
    }
    let samples = SampleFields::new(columns.next().unwrap_or(""));

    let [chromosome, pos, id, ref_allele, alt_allele, qual, filter, info, format] = fixed;
    let position = pos
        .trim()
        .parse::<u64>()
        .map_err(|_| DecodeError::InvalidPosition(pos.to_string()))?;

    Ok(FixedFields {
        chromosome,
        position,
        id,
        ref_allele,
        alt_allele,
        qual,
        filter,
        info,
        format,
        samples,
    })
}

/// Returns the chromosome column of a data line without decoding anything else.
#[inline]
pub fn chromosome_of(line: &str) -> &str {
    match memchr::memchr(b'\t', line.as_bytes()) {
        Some(end) => &line[..end],
        None => line,
    }
}

/// Decodes one GT sub-token into a haplotype pair.
///
/// `a|b` is the expected phased form; `a/b` is accepted with a one-time notice.
/// Anything unparseable, or any allele index other than 0 or 1, yields a missing pair.
pub fn decode_genotype_token(token: &str, ctx: &mut RunContext) -> (i8, i8) {
    let parsed = match parse_allele_pair(token, '|') {
        Some(pair) => Some(pair),
        None => {
            let unphased = parse_allele_pair(token, '/');
            if unphased.is_some() {
                ctx.note_unphased(token);
            }
            unphased
        }
    };

    match parsed {
        None => {
            ctx.note_unparsable_genotype(token);
            (HAPLOTYPE_MISSING, HAPLOTYPE_MISSING)
        }
        Some((hap1 @ 0..=1, hap2 @ 0..=1)) => (hap1 as i8, hap2 as i8),
        Some(_) => {
            ctx.note_non_binary_genotype(token);
            (HAPLOTYPE_MISSING, HAPLOTYPE_MISSING)
        }
    }
}

fn parse_allele_pair(token: &str, separator: char) -> Option<(i32, i32)> {
    let (first, second) = token.split_once(separator)?;
    Some((first.parse().ok()?, second.parse().ok()?))
}

/// Decodes one GL sub-token into probabilities of (hom-ref, het, hom-alt).
///
/// The three log10 likelihoods are exponentiated and renormalised to sum to one, which
/// is the posterior under a uniform genotype prior. A `.` token gives the uniform triple.
pub fn decode_likelihood_token(token: &str, ctx: &mut RunContext) -> [f32; 3] {
    let log10_likelihoods = if token == "." {
        [MISSING_LOG10_LIKELIHOOD; 3]
    } else {
        match parse_likelihood_triple(token) {
            Some(values) => values,
            None => {
                ctx.note_unparsable_likelihood(token);
                [MISSING_LOG10_LIKELIHOOD; 3]
            }
        }
    };
    likelihoods_to_probabilities(log10_likelihoods)
}

fn parse_likelihood_triple(token: &str) -> Option<[f64; 3]> {
    let mut parts = token.split(',');
    let mut values = [0.0f64; 3];
    for value in values.iter_mut() {
        *value = parts.next()?.trim().parse().ok()?;
    }
    if parts.next().is_some() || values.iter().any(|v| v.is_nan() || *v == f64::INFINITY) {
        return None;
    }
    // At least one class must have non-zero likelihood.
    if values.iter().all(|v| v.is_infinite()) {
        return None;
    }
    Some(values)
}

/// Converts log10 likelihoods to probabilities summing to one.
pub fn likelihoods_to_probabilities(log10_likelihoods: [f64; 3]) -> [f32; 3] {
    // Shifting by the maximum leaves the ratios unchanged and keeps 10^x away from underflow.
    let max = log10_likelihoods
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    let linear = log10_likelihoods.map(|l| 10f64.powf(l - max));
    let sum: f64 = linear.iter().sum();
    linear.map(|p| (p / sum) as f32)
}

/// Decodes data lines for one input, whose header declared `n_samples` sample columns.
#[derive(Debug, Clone)]
pub struct LineDecoder {
    n_samples: usize,
    truncation: AlleleTruncation,
}

impl LineDecoder {
    pub fn new(n_samples: usize, truncation: AlleleTruncation) -> Self {
        Self {
            n_samples,
            truncation,
        }
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Decodes the GT sub-field of every sample into `2 * n_samples` haplotype values.
    pub fn decode_haplotypes(
        &self,
        samples: SampleFields<'_>,
        layout: &str,
        ctx: &mut RunContext,
    ) -> Result<Vec<i8>, DecodeError> {
        let gt_idx = resolve_index(layout, GT_LABEL).ok_or_else(|| missing_label(GT_LABEL, layout))?;
        let mut haplotypes = Vec::with_capacity(self.n_samples * 2);
        self.haplotypes_into(samples, gt_idx, &mut haplotypes, ctx)?;
        Ok(haplotypes)
    }

    /// Decodes the GL sub-field of every sample into `3 * n_samples` probabilities.
    pub fn decode_genotype_probabilities(
        &self,
        samples: SampleFields<'_>,
        layout: &str,
        ctx: &mut RunContext,
    ) -> Result<Vec<f32>, DecodeError> {
        let gl_idx = resolve_index(layout, GL_LABEL).ok_or_else(|| missing_label(GL_LABEL, layout))?;
        let mut probs = Vec::with_capacity(self.n_samples * 3);
        self.probabilities_into(samples, gl_idx, &mut probs, ctx)?;
        Ok(probs)
    }

    /// Decodes a line into a freshly allocated `Variant`.
    pub fn decode_record(
        &self,
        line: &str,
        want_haplotypes: bool,
        want_probs: bool,
        ctx: &mut RunContext,
    ) -> Result<Variant, DecodeError> {
        let mut variant = Variant::default();
        self.decode_into(line, want_haplotypes, want_probs, &mut variant, ctx)?;
        Ok(variant)
    }

    /// Decodes a line into `variant`, reusing its allocations.
    ///
    /// Requesting haplotypes or probabilities for a record whose FORMAT lacks the
    /// corresponding label is an error: writing it as missing would misalign columns.
    pub fn decode_into(
        &self,
        line: &str,
        want_haplotypes: bool,
        want_probs: bool,
        variant: &mut Variant,
        ctx: &mut RunContext,
    ) -> Result<(), DecodeError> {
        let fields = decode_fixed_fields(line)?;

        variant.chromosome.clear();
        variant.chromosome.push_str(fields.chromosome);
        variant.position = fields.position;
        variant.id.clear();
        variant.id.push_str(fields.id);
        variant.ref_len = self.copy_allele(&mut variant.ref_allele, fields.ref_allele, ctx);
        variant.alt_len = self.copy_allele(&mut variant.alt_allele, fields.alt_allele, ctx);
        variant.qual.clear();
        variant.qual.push_str(fields.qual);
        variant.filter.clear();
        variant.filter.push_str(fields.filter);
        variant.info.clear();
        variant.info.push_str(fields.info);
        variant.format.clear();
        variant.format.push_str(fields.format);

        let spec = FormatSpec::parse(fields.format);
        let gt_idx = spec.index_of(GT_LABEL);
        let gl_idx = spec.index_of(GL_LABEL);
        variant.has_haplotypes = gt_idx.is_some();
        variant.has_geno_probs = gl_idx.is_some();
        variant.haplotypes.clear();
        variant.geno_probs.clear();

        if want_haplotypes {
            let gt_idx = gt_idx.ok_or_else(|| missing_label(GT_LABEL, fields.format))?;
            self.haplotypes_into(fields.samples, gt_idx, &mut variant.haplotypes, ctx)?;
        }
        if want_probs {
            let gl_idx = gl_idx.ok_or_else(|| missing_label(GL_LABEL, fields.format))?;
            self.probabilities_into(fields.samples, gl_idx, &mut variant.geno_probs, ctx)?;
        }
        Ok(())
    }

    fn haplotypes_into(
        &self,
        samples: SampleFields<'_>,
        gt_idx: usize,
        out: &mut Vec<i8>,
        ctx: &mut RunContext,
    ) -> Result<(), DecodeError> {
        out.clear();
        for field in samples.iter() {
            // A sample without a GT sub-field contributes nothing and fails the count check.
            if let Some(token) = sub_token(field, gt_idx) {
                let (hap1, hap2) = decode_genotype_token(token, ctx);
                out.push(hap1);
                out.push(hap2);
            }
        }

        let expected = self.n_samples * 2;
        if out.len() != expected {
            return Err(DecodeError::HaplotypeCount {
                expected,
                found: out.len(),
            });
        }
        Ok(())
    }

    fn probabilities_into(
        &self,
        samples: SampleFields<'_>,
        gl_idx: usize,
        out: &mut Vec<f32>,
        ctx: &mut RunContext,
    ) -> Result<(), DecodeError> {
        out.clear();
        for field in samples.iter() {
            if let Some(token) = sub_token(field, gl_idx) {
                out.extend_from_slice(&decode_likelihood_token(token, ctx));
            }
        }

        let expected = self.n_samples * 3;
        if out.len() != expected {
            return Err(DecodeError::ProbabilityCount {
                expected,
                found: out.len(),
            });
        }
        Ok(())
    }

    /// Copies an allele literal into `dest`, applying the truncation policy.
    /// Returns the untruncated byte length.
    fn copy_allele(&self, dest: &mut String, literal: &str, ctx: &mut RunContext) -> usize {
        dest.clear();
        match self.truncation {
            AlleleTruncation::MaxLen(max_len) if literal.len() > max_len => {
                let mut cut = max_len;
                while !literal.is_char_boundary(cut) {
                    cut -= 1;
                }
                dest.push_str(&literal[..cut]);
                ctx.note_truncated_allele(literal.len(), cut);
            }
            _ => dest.push_str(literal),
        }
        literal.len()
    }
}

fn missing_label(label: &'static str, layout: &str) -> DecodeError {
    DecodeError::MissingFormatLabel {
        label,
        layout: layout.to_string(),
    }
}
