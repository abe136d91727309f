// ========================================================================================
//
//                               THE INPUT CURSOR
//
// ========================================================================================
//
// One cursor per input. A cursor owns its text source, a single line buffer and a
// single `Variant`; every advance overwrites both in place. The cursor is positioned
// on a record whose chromosome belongs to the intersection, or it is exhausted.

use crate::catalog::Intersection;
use crate::context::RunContext;
use crate::decode::{AlleleTruncation, LineDecoder, chromosome_of, decode_fixed_fields};
use crate::engine::MergeError;
use crate::format::{FormatSpec, GL_LABEL, GT_LABEL};
use crate::header::{VcfHeader, read_header};
use crate::shared::files::{TextSource, line_as_str};
use crate::types::{FeatureSet, Variant, VariantKey};
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Active,
    Exhausted,
}

pub struct FileCursor {
    index: usize,
    origin: String,
    source: Box<dyn TextSource>,
    header: VcfHeader,
    decoder: LineDecoder,
    line: String,
    line_number: u64,
    /// A data line has been read into `line` but not yet decoded.
    pending: bool,
    variant: Variant,
    rank: usize,
    state: CursorState,
    records_read: u64,
}

impl FileCursor {
    /// Reads the header of `source` and returns a cursor positioned before the first
    /// data line.
    pub fn open(
        index: usize,
        mut source: Box<dyn TextSource>,
        truncation: AlleleTruncation,
        ctx: &mut RunContext,
    ) -> Result<Self, MergeError> {
        let origin = source.describe().to_string();
        let header = read_header(source.as_mut(), ctx)?;
        let decoder = LineDecoder::new(header.n_samples(), truncation);
        Ok(Self {
            index,
            origin,
            line_number: header.n_header_lines(),
            source,
            header,
            decoder,
            line: String::with_capacity(1024),
            pending: false,
            variant: Variant::default(),
            rank: 0,
            state: CursorState::Active,
            records_read: 0,
        })
    }

    /// Reads the first data line and reports which labels its FORMAT declares.
    /// Returns `None` for an input without data records.
    pub fn prime(&mut self) -> Result<Option<FeatureSet>, MergeError> {
        if !self.read_data_line()? {
            self.state = CursorState::Exhausted;
            return Ok(None);
        }
        self.pending = true;

        let fields = decode_fixed_fields(&self.line).map_err(|source| MergeError::Decode {
            origin: self.origin.clone(),
            line_number: self.line_number,
            source,
        })?;
        let spec = FormatSpec::parse(fields.format);
        Ok(Some(FeatureSet {
            haplotypes: spec.index_of(GT_LABEL).is_some(),
            geno_probs: spec.index_of(GL_LABEL).is_some(),
        }))
    }

    /// Moves to the next record on an intersected chromosome, decoding the payloads
    /// enabled in `features`. Records on other chromosomes are skipped undecoded.
    pub fn advance(
        &mut self,
        shared: &Intersection,
        features: FeatureSet,
        ctx: &mut RunContext,
    ) -> Result<(), MergeError> {
        if self.state == CursorState::Exhausted {
            return Ok(());
        }

        loop {
            if self.pending {
                self.pending = false;
            } else if !self.read_data_line()? {
                debug!("{}: exhausted after {} records", self.origin, self.records_read);
                self.state = CursorState::Exhausted;
                return Ok(());
            }
            self.records_read += 1;

            let Some(rank) = shared.rank_of(chromosome_of(&self.line)) else {
                ctx.note_dropped_record();
                continue;
            };

            self.decoder
                .decode_into(
                    &self.line,
                    features.haplotypes,
                    features.geno_probs,
                    &mut self.variant,
                    ctx,
                )
                .map_err(|source| MergeError::Decode {
                    origin: self.origin.clone(),
                    line_number: self.line_number,
                    source,
                })?;

            // `rank` came from `rank_of`, so it indexes the intersection.
            let chromosome = &shared.chromosomes()[rank];
            if !chromosome.contains(self.variant.position) {
                return Err(MergeError::PositionOutOfRange {
                    origin: self.origin.clone(),
                    line_number: self.line_number,
                    chromosome: chromosome.name.clone(),
                    position: self.variant.position,
                    length: chromosome.length,
                });
            }

            self.rank = rank;
            return Ok(());
        }
    }

    /// Reads the next non-blank line into the buffer. Returns false at end of stream.
    fn read_data_line(&mut self) -> Result<bool, MergeError> {
        loop {
            let Some(bytes) = self.source.next_line()? else {
                return Ok(false);
            };
            self.line_number += 1;
            let text = line_as_str(bytes, &self.origin, self.line_number)?;
            if text.trim().is_empty() {
                continue;
            }
            self.line.clear();
            self.line.push_str(text);
            return Ok(true);
        }
    }

    /// Sort key of the current record, or `None` once exhausted.
    #[inline]
    pub fn key(&self) -> Option<VariantKey> {
        match self.state {
            CursorState::Active => Some((self.rank, self.variant.position)),
            CursorState::Exhausted => None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn header(&self) -> &VcfHeader {
        &self.header
    }

    pub fn n_samples(&self) -> usize {
        self.header.n_samples()
    }

    pub fn current(&self) -> &Variant {
        &self.variant
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Data lines consumed so far, including skipped ones.
    pub fn records_read(&self) -> u64 {
        self.records_read
    }
}
