//! Chromosome declarations and the cross-input intersection that fixes merge order.

use crate::types::Chromosome;
use ahash::AHashMap;
use itertools::Itertools;
use log::{info, warn};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("no input files were given")]
    NoInputs,
    #[error("no chromosome is declared by every input, nothing can be merged")]
    EmptyIntersection,
    #[error("malformed contig line '{line}': {reason}")]
    MalformedContig { line: String, reason: String },
}

const CONTIG_PREFIX: &str = "##contig=";

/// True when a meta line declares a contig.
#[inline]
pub fn is_contig_header(line: &str) -> bool {
    line.starts_with(CONTIG_PREFIX)
}

/// Parses `##contig=<ID=..,assembly=..,length=..>`.
///
/// Keys other than ID, assembly and length are ignored. The returned rank is zero;
/// the catalog assigns the declaration rank on insertion.
pub fn parse_contig_header(line: &str) -> Result<Chromosome, CatalogError> {
    let malformed = |reason: &str| CatalogError::MalformedContig {
        line: line.to_string(),
        reason: reason.to_string(),
    };

    let body = line
        .strip_prefix(CONTIG_PREFIX)
        .ok_or_else(|| malformed("missing ##contig= prefix"))?;
    let body = body.trim_start_matches('<').trim_end_matches('>');

    let mut name = None;
    let mut assembly = None;
    let mut length = None;
    for field in body.split(',').filter(|f| !f.is_empty()) {
        let Some((key, value)) = field.split_once('=') else {
            continue;
        };
        match key.trim() {
            "ID" => name = Some(value.trim().to_string()),
            "assembly" => assembly = Some(value.trim().to_string()),
            "length" => {
                let parsed = value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| malformed(&format!("invalid length '{value}'")))?;
                length = Some(parsed);
            }
            _ => {}
        }
    }

    let name = name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| malformed("no ID"))?;
    Ok(Chromosome {
        rank: 0,
        name,
        assembly,
        length,
    })
}

/// The chromosomes one input declares, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct ChromosomeCatalog {
    chromosomes: Vec<Chromosome>,
    index: AHashMap<String, usize>,
}

impl ChromosomeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a declaration. A repeated name keeps the first declaration.
    pub fn push(&mut self, mut chromosome: Chromosome) {
        if self.index.contains_key(&chromosome.name) {
            warn!(
                "chromosome '{}' is declared more than once, keeping the first declaration",
                chromosome.name
            );
            return;
        }
        chromosome.rank = self.chromosomes.len();
        self.index.insert(chromosome.name.clone(), chromosome.rank);
        self.chromosomes.push(chromosome);
    }

    pub fn get(&self, name: &str) -> Option<&Chromosome> {
        self.index.get(name).map(|&i| &self.chromosomes[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chromosome> {
        self.chromosomes.iter()
    }

    pub fn len(&self) -> usize {
        self.chromosomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chromosomes.is_empty()
    }
}

/// A chromosome left out of the merge, with the number of inputs that declared it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludedChromosome {
    pub name: String,
    pub files: usize,
}

/// Chromosomes declared by every input. Ranks follow the first input's declaration
/// order, and every data-line comparison goes through these ranks.
#[derive(Debug, Clone)]
pub struct Intersection {
    chromosomes: Vec<Chromosome>,
    rank_by_name: AHashMap<String, usize>,
    excluded: Vec<ExcludedChromosome>,
}

impl Intersection {
    #[inline]
    pub fn rank_of(&self, name: &str) -> Option<usize> {
        self.rank_by_name.get(name).copied()
    }

    pub fn chromosomes(&self) -> &[Chromosome] {
        &self.chromosomes
    }

    pub fn excluded(&self) -> &[ExcludedChromosome] {
        &self.excluded
    }

    pub fn len(&self) -> usize {
        self.chromosomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chromosomes.is_empty()
    }
}

/// Computes the chromosomes shared by all catalogs.
///
/// Order, assembly and length come from the first catalog. Chromosomes that some
/// input lacks are reported once and excluded; an empty result is an error.
pub fn intersect(catalogs: &[&ChromosomeCatalog]) -> Result<Intersection, CatalogError> {
    let (first, rest) = catalogs.split_first().ok_or(CatalogError::NoInputs)?;

    let mut chromosomes = Vec::with_capacity(first.len());
    let mut rank_by_name = AHashMap::with_capacity(first.len());
    for chromosome in first.iter() {
        if rest.iter().all(|catalog| catalog.contains(&chromosome.name)) {
            let rank = chromosomes.len();
            rank_by_name.insert(chromosome.name.clone(), rank);
            chromosomes.push(Chromosome {
                rank,
                ..chromosome.clone()
            });
        }
    }

    // Names seen in any catalog but not shared, in first-seen order.
    let excluded: Vec<ExcludedChromosome> = catalogs
        .iter()
        .flat_map(|catalog| catalog.iter().map(|c| c.name.as_str()))
        .unique()
        .filter(|name| !rank_by_name.contains_key(*name))
        .map(|name| ExcludedChromosome {
            name: name.to_string(),
            files: catalogs.iter().filter(|c| c.contains(name)).count(),
        })
        .collect();

    for dropped in &excluded {
        info!(
            "chromosome '{}' is declared in only {} of {} inputs and will be skipped",
            dropped.name,
            dropped.files,
            catalogs.len()
        );
    }

    if chromosomes.is_empty() {
        return Err(CatalogError::EmptyIntersection);
    }

    Ok(Intersection {
        chromosomes,
        rank_by_name,
        excluded,
    })
}
