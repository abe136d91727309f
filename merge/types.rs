// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used in one file.

use std::fmt;

/// Sentinel for an unresolved haplotype value.
pub const HAPLOTYPE_MISSING: i8 = -1;

/// The primitive, sortable key used by the merge: (chromosome rank, position).
pub type VariantKey = (usize, u64);

/// A declared chromosome. Inside a per-input catalog `rank` is the declaration
/// order; inside the intersection it is the merge ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chromosome {
    pub rank: usize,
    pub name: String,
    pub assembly: Option<String>,
    pub length: Option<u64>,
}

impl Chromosome {
    /// Positions are 1-based; without a declared length only the lower bound applies.
    #[inline]
    pub fn contains(&self, position: u64) -> bool {
        position >= 1 && self.length.is_none_or(|len| position <= len)
    }
}

impl fmt::Display for Chromosome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chromosome: {}", self.name)?;
        if let Some(assembly) = &self.assembly {
            write!(f, " {assembly}")?;
        }
        if let Some(length) = self.length {
            write!(f, " {length}")?;
        }
        Ok(())
    }
}

/// One decoded data line. A cursor owns a single `Variant` and decodes every
/// record into it, so the vectors keep their capacity across records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variant {
    pub chromosome: String,
    pub position: u64,
    pub id: String,
    pub ref_allele: String,
    pub alt_allele: String,
    /// Byte length of the alleles as they appeared in the input, before truncation.
    pub ref_len: usize,
    pub alt_len: usize,
    pub qual: String,
    pub filter: String,
    pub info: String,
    pub format: String,
    /// Label presence in this record's FORMAT column.
    pub has_haplotypes: bool,
    pub has_geno_probs: bool,
    /// `2 * n_samples` values in {0, 1, HAPLOTYPE_MISSING} when decoded, else empty.
    pub haplotypes: Vec<i8>,
    /// `3 * n_samples` probabilities (hom-ref, het, hom-alt) when decoded, else empty.
    pub geno_probs: Vec<f32>,
}

impl Variant {
    /// True when both allele literals and their untruncated lengths agree.
    pub fn alleles_match(&self, other: &Variant) -> bool {
        self.ref_allele == other.ref_allele
            && self.alt_allele == other.alt_allele
            && self.ref_len == other.ref_len
            && self.alt_len == other.alt_len
    }
}

/// Which per-sample payloads are decoded and written. Also used to describe which
/// labels a single record's FORMAT declares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureSet {
    pub haplotypes: bool,
    pub geno_probs: bool,
}

impl FeatureSet {
    pub const ALL: FeatureSet = FeatureSet {
        haplotypes: true,
        geno_probs: true,
    };

    pub const NONE: FeatureSet = FeatureSet {
        haplotypes: false,
        geno_probs: false,
    };

    pub fn any(&self) -> bool {
        self.haplotypes || self.geno_probs
    }

    /// FORMAT column text for merged output, or `None` when no sample data is written.
    pub fn format_label(&self) -> Option<&'static str> {
        match (self.haplotypes, self.geno_probs) {
            (true, true) => Some("GT:GL"),
            (true, false) => Some("GT"),
            (false, true) => Some("GL"),
            (false, false) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chromosome_range_is_one_based_and_inclusive() {
        let chrom = Chromosome {
            rank: 0,
            name: "8".to_string(),
            assembly: Some("b37".to_string()),
            length: Some(1000),
        };
        assert!(!chrom.contains(0));
        assert!(chrom.contains(1));
        assert!(chrom.contains(1000));
        assert!(!chrom.contains(1001));
        assert_eq!(chrom.to_string(), "chromosome: 8 b37 1000");

        let open_ended = Chromosome {
            length: None,
            ..chrom
        };
        assert!(open_ended.contains(u64::MAX));
        assert!(!open_ended.contains(0));
    }

    #[test]
    fn format_label_follows_enabled_features() {
        assert_eq!(FeatureSet::ALL.format_label(), Some("GT:GL"));
        assert_eq!(FeatureSet::NONE.format_label(), None);
        let gl_only = FeatureSet {
            haplotypes: false,
            geno_probs: true,
        };
        assert_eq!(gl_only.format_label(), Some("GL"));
        assert!(gl_only.any());
    }

    #[test]
    fn allele_comparison_uses_true_lengths() {
        let a = Variant {
            ref_allele: "ACGT".to_string(),
            alt_allele: "A".to_string(),
            ref_len: 4,
            alt_len: 1,
            ..Variant::default()
        };
        let mut b = a.clone();
        assert!(a.alleles_match(&b));
        b.ref_len = 9;
        assert!(!a.alleles_match(&b));
    }
}
