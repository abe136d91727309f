use crate::catalog::{CatalogError, ChromosomeCatalog, is_contig_header, parse_contig_header};
use crate::context::RunContext;
use crate::decode::FIXED_COLUMN_COUNT;
use crate::shared::files::{SourceError, TextSource, line_as_str};
use log::debug;
use thiserror::Error;

/// Expected names of the nine fixed columns on the `#CHROM` line.
pub const FIXED_HEADER_COLUMNS: [&str; FIXED_COLUMN_COUNT] = [
    "#CHROM", "POS", "ID", "REF", "ALT", "QUAL", "FILTER", "INFO", "FORMAT",
];

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("{origin}: expected a header line but found '{line}'")]
    UnexpectedLine { origin: String, line: String },
    #[error("{origin}: reached end of input before the #CHROM column header")]
    MissingColumnHeader { origin: String },
    #[error("{origin}:{line_number}: {source}")]
    Contig {
        origin: String,
        line_number: u64,
        #[source]
        source: CatalogError,
    },
}

/// Everything read from one input before its first data line.
#[derive(Debug, Clone, Default)]
pub struct VcfHeader {
    /// `##` lines, verbatim.
    pub meta_lines: Vec<String>,
    pub catalog: ChromosomeCatalog,
    pub samples: Vec<String>,
}

impl VcfHeader {
    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    /// Meta lines plus the `#CHROM` line.
    pub fn n_header_lines(&self) -> u64 {
        self.meta_lines.len() as u64 + 1
    }
}

/// Reads the header of `source`, leaving it positioned at the first data line.
///
/// Column-name mismatches on the `#CHROM` line are warnings; anything other than a
/// `##` meta line before it is an error.
pub fn read_header(
    source: &mut dyn TextSource,
    ctx: &mut RunContext,
) -> Result<VcfHeader, HeaderError> {
    let origin = source.describe().to_string();
    let mut header = VcfHeader::default();
    let mut line_number = 0u64;

    loop {
        let Some(bytes) = source.next_line()? else {
            return Err(HeaderError::MissingColumnHeader { origin });
        };
        line_number += 1;
        let line = line_as_str(bytes, &origin, line_number)?;

        if line.starts_with("##") {
            if is_contig_header(line) {
                let chromosome =
                    parse_contig_header(line).map_err(|source| HeaderError::Contig {
                        origin: origin.clone(),
                        line_number,
                        source,
                    })?;
                debug!("{origin}: found {chromosome}");
                header.catalog.push(chromosome);
            }
            header.meta_lines.push(line.to_string());
            continue;
        }

        if line.starts_with("#CHROM") {
            let columns: Vec<&str> = line.split('\t').collect();
            for (column, (found, expected)) in
                columns.iter().zip(FIXED_HEADER_COLUMNS).enumerate()
            {
                if *found != expected {
                    ctx.note_schema_mismatch(&origin, column + 1, expected, found);
                }
            }
            header.samples = columns
                .iter()
                .skip(FIXED_COLUMN_COUNT)
                .map(|s| s.to_string())
                .collect();
            debug!(
                "{origin}: {} header lines, {} chromosomes, {} samples",
                header.n_header_lines(),
                header.catalog.len(),
                header.n_samples()
            );
            return Ok(header);
        }

        return Err(HeaderError::UnexpectedLine {
            origin,
            line: line.to_string(),
        });
    }
}
