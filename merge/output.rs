// ========================================================================================
//
//                               MERGED OUTPUT
//
// ========================================================================================
//
// The engine hands each merged row to a `RecordSink` (the merged VCF text) and,
// optionally, to per-payload `MatrixStore`s keyed by row index.

use crate::types::{Chromosome, FeatureSet, HAPLOTYPE_MISSING, Variant};
use ahash::{AHashMap, AHashSet};
use log::warn;
use std::fmt::Write as _;
use std::io::{self, Write};

/// Run-wide information needed to write the merged header.
#[derive(Debug, Clone, Copy)]
pub struct MergeHeader<'a> {
    pub chromosomes: &'a [Chromosome],
    /// Every sample of every input, in input order.
    pub samples: &'a [String],
    pub features: FeatureSet,
}

/// One input's contribution to a merged row. `variant` is `None` when the input has
/// no record at this key.
#[derive(Debug, Clone, Copy)]
pub struct InputCall<'a> {
    pub n_samples: usize,
    pub variant: Option<&'a Variant>,
}

/// One merged row: the fixed columns of `leader` and a call per input.
#[derive(Debug, Clone)]
pub struct MergedRecord<'a> {
    pub row: u64,
    pub leader: &'a Variant,
    pub features: FeatureSet,
    pub inputs: Vec<InputCall<'a>>,
}

impl MergedRecord<'_> {
    pub fn total_samples(&self) -> usize {
        self.inputs.iter().map(|call| call.n_samples).sum()
    }

    /// Fills `row` with `3 * total_samples` probabilities. Inputs without a call
    /// contribute NaN.
    pub fn probability_row(&self, row: &mut Vec<f32>) {
        row.clear();
        for call in &self.inputs {
            let width = call.n_samples * 3;
            match call.variant {
                Some(v) if v.geno_probs.len() == width => row.extend_from_slice(&v.geno_probs),
                _ => row.extend(std::iter::repeat_n(f32::NAN, width)),
            }
        }
    }

    /// Fills `row` with `2 * total_samples` haplotypes. Inputs without a call
    /// contribute `HAPLOTYPE_MISSING`.
    pub fn haplotype_row(&self, row: &mut Vec<i8>) {
        row.clear();
        for call in &self.inputs {
            let width = call.n_samples * 2;
            match call.variant {
                Some(v) if v.haplotypes.len() == width => row.extend_from_slice(&v.haplotypes),
                _ => row.extend(std::iter::repeat_n(HAPLOTYPE_MISSING, width)),
            }
        }
    }
}

/// Destination for merged records.
pub trait RecordSink {
    fn write_header(&mut self, header: &MergeHeader<'_>) -> io::Result<()>;
    fn write_record(&mut self, record: &MergedRecord<'_>) -> io::Result<()>;
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Row-addressed numeric output. `row` is the merged record index.
pub trait MatrixStore<T> {
    fn write_row(&mut self, row: u64, values: &[T]) -> io::Result<()>;
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The set of outputs a run writes to. Any of them may be absent.
#[derive(Default)]
pub struct MergeOutputs<'a> {
    records: Option<&'a mut dyn RecordSink>,
    geno_probs: Option<&'a mut dyn MatrixStore<f32>>,
    haplotypes: Option<&'a mut dyn MatrixStore<i8>>,
    prob_row: Vec<f32>,
    hap_row: Vec<i8>,
}

impl<'a> MergeOutputs<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(mut self, sink: &'a mut dyn RecordSink) -> Self {
        self.records = Some(sink);
        self
    }

    pub fn with_geno_probs(mut self, store: &'a mut dyn MatrixStore<f32>) -> Self {
        self.geno_probs = Some(store);
        self
    }

    pub fn with_haplotypes(mut self, store: &'a mut dyn MatrixStore<i8>) -> Self {
        self.haplotypes = Some(store);
        self
    }

    pub fn write_header(&mut self, header: &MergeHeader<'_>) -> io::Result<()> {
        if let Some(sink) = &mut self.records {
            sink.write_header(header)?;
        }
        if self.geno_probs.is_some() && !header.features.geno_probs {
            warn!("GL is disabled for this run, the probability matrix will be empty");
        }
        if self.haplotypes.is_some() && !header.features.haplotypes {
            warn!("GT is disabled for this run, the haplotype matrix will be empty");
        }
        Ok(())
    }

    /// Writes one merged row to every output.
    pub fn write(&mut self, record: &MergedRecord<'_>) -> io::Result<()> {
        if let Some(sink) = &mut self.records {
            sink.write_record(record)?;
        }
        if let Some(store) = &mut self.geno_probs {
            if record.features.geno_probs {
                record.probability_row(&mut self.prob_row);
                store.write_row(record.row, &self.prob_row)?;
            }
        }
        if let Some(store) = &mut self.haplotypes {
            if record.features.haplotypes {
                record.haplotype_row(&mut self.hap_row);
                store.write_row(record.row, &self.hap_row)?;
            }
        }
        Ok(())
    }

    pub fn finish(&mut self) -> io::Result<()> {
        if let Some(sink) = &mut self.records {
            sink.finish()?;
        }
        if let Some(store) = &mut self.geno_probs {
            store.finish()?;
        }
        if let Some(store) = &mut self.haplotypes {
            store.finish()?;
        }
        Ok(())
    }
}

// ========================================================================================
//                                    VCF text
// ========================================================================================

/// Unphased `a/b` input calls are written with the `|` separator, so the description
/// does not promise phasing.
const GT_FORMAT_LINE: &str = "##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype, written with '|' whether or not the input call was phased\">";
const GL_FORMAT_LINE: &str = "##FORMAT=<ID=GL,Number=G,Type=Float,Description=\"Genotype likelihoods (log10, normalised)\">";

/// Writes merged records as VCF text.
pub struct VcfWriter<W: Write> {
    out: W,
    line: String,
    ryu: ryu::Buffer,
}

impl<W: Write> VcfWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            line: String::with_capacity(4096),
            ryu: ryu::Buffer::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RecordSink for VcfWriter<W> {
    fn write_header(&mut self, header: &MergeHeader<'_>) -> io::Result<()> {
        writeln!(self.out, "##fileformat=VCFv4.2")?;
        writeln!(self.out, "##source=vcfmerge")?;
        for chromosome in header.chromosomes {
            write!(self.out, "##contig=<ID={}", chromosome.name)?;
            if let Some(assembly) = &chromosome.assembly {
                write!(self.out, ",assembly={assembly}")?;
            }
            if let Some(length) = chromosome.length {
                write!(self.out, ",length={length}")?;
            }
            writeln!(self.out, ">")?;
        }
        if header.features.haplotypes {
            writeln!(self.out, "{GT_FORMAT_LINE}")?;
        }
        if header.features.geno_probs {
            writeln!(self.out, "{GL_FORMAT_LINE}")?;
        }

        write!(self.out, "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO")?;
        if header.features.any() {
            write!(self.out, "\tFORMAT")?;
            for sample in header.samples {
                write!(self.out, "\t{sample}")?;
            }
        }
        writeln!(self.out)
    }

    fn write_record(&mut self, record: &MergedRecord<'_>) -> io::Result<()> {
        let line = &mut self.line;
        let leader = record.leader;
        line.clear();
        // Writing to a String cannot fail.
        let _ = write!(
            line,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            leader.chromosome,
            leader.position,
            leader.id,
            leader.ref_allele,
            leader.alt_allele,
            leader.qual,
            leader.filter,
            leader.info
        );

        if let Some(label) = record.features.format_label() {
            line.push('\t');
            line.push_str(label);
            for call in &record.inputs {
                for sample in 0..call.n_samples {
                    line.push('\t');
                    push_sample(line, &mut self.ryu, record.features, call.variant, sample);
                }
            }
        }
        line.push('\n');
        self.out.write_all(line.as_bytes())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

fn push_sample(
    line: &mut String,
    ryu: &mut ryu::Buffer,
    features: FeatureSet,
    variant: Option<&Variant>,
    sample: usize,
) {
    if features.haplotypes {
        match variant {
            Some(v) => {
                line.push(haplotype_char(v.haplotypes.get(sample * 2)));
                line.push('|');
                line.push(haplotype_char(v.haplotypes.get(sample * 2 + 1)));
            }
            None => line.push_str("./."),
        }
    }
    if features.geno_probs {
        if features.haplotypes {
            line.push(':');
        }
        match variant.and_then(|v| v.geno_probs.get(sample * 3..sample * 3 + 3)) {
            Some(probs) => {
                for (i, &p) in probs.iter().enumerate() {
                    if i > 0 {
                        line.push(',');
                    }
                    line.push_str(ryu.format(p.max(f32::MIN_POSITIVE).log10()));
                }
            }
            None => line.push('.'),
        }
    }
}

#[inline]
fn haplotype_char(value: Option<&i8>) -> char {
    match value {
        Some(0) => '0',
        Some(1) => '1',
        _ => '.',
    }
}

/// Gives later occurrences of a repeated sample name a `-1`, `-2`, ... suffix.
pub fn rename_duplicate_samples(samples: Vec<String>) -> Vec<String> {
    let mut used: AHashSet<String> = AHashSet::with_capacity(samples.len());
    let mut repeats: AHashMap<String, usize> = AHashMap::new();
    let mut renamed = Vec::with_capacity(samples.len());

    for name in samples {
        if used.insert(name.clone()) {
            renamed.push(name);
            continue;
        }
        let counter = repeats.entry(name.clone()).or_insert(0);
        let candidate = loop {
            *counter += 1;
            let candidate = format!("{name}-{counter}");
            if !used.contains(&candidate) {
                break candidate;
            }
        };
        warn!("duplicate sample name '{name}' renamed to '{candidate}'");
        used.insert(candidate.clone());
        renamed.push(candidate);
    }
    renamed
}

// ========================================================================================
//                                 Matrix stores
// ========================================================================================

/// Writes matrix rows as `row<TAB>v1<TAB>v2...` lines.
pub struct TsvMatrixWriter<W: Write> {
    out: W,
    line: String,
    ryu: ryu::Buffer,
}

impl<W: Write> TsvMatrixWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            line: String::with_capacity(4096),
            ryu: ryu::Buffer::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> MatrixStore<f32> for TsvMatrixWriter<W> {
    fn write_row(&mut self, row: u64, values: &[f32]) -> io::Result<()> {
        self.line.clear();
        let _ = write!(self.line, "{row}");
        for &value in values {
            self.line.push('\t');
            self.line.push_str(self.ryu.format(value));
        }
        self.line.push('\n');
        self.out.write_all(self.line.as_bytes())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

impl<W: Write> MatrixStore<i8> for TsvMatrixWriter<W> {
    fn write_row(&mut self, row: u64, values: &[i8]) -> io::Result<()> {
        self.line.clear();
        let _ = write!(self.line, "{row}");
        for value in values {
            let _ = write!(self.line, "\t{value}");
        }
        self.line.push('\n');
        self.out.write_all(self.line.as_bytes())
    }

    fn finish(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Keeps every row in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryMatrix<T> {
    pub rows: Vec<(u64, Vec<T>)>,
}

impl<T: Clone> MatrixStore<T> for MemoryMatrix<T> {
    fn write_row(&mut self, row: u64, values: &[T]) -> io::Result<()> {
        self.rows.push((row, values.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(position: u64, haplotypes: Vec<i8>, geno_probs: Vec<f32>) -> Variant {
        Variant {
            chromosome: "1".to_string(),
            position,
            id: "rs1".to_string(),
            ref_allele: "A".to_string(),
            alt_allele: "G".to_string(),
            ref_len: 1,
            alt_len: 1,
            qual: "50".to_string(),
            filter: "PASS".to_string(),
            info: ".".to_string(),
            format: "GT:GL".to_string(),
            has_haplotypes: true,
            has_geno_probs: true,
            haplotypes,
            geno_probs,
        }
    }

    fn chromosomes() -> Vec<Chromosome> {
        vec![Chromosome {
            rank: 0,
            name: "1".to_string(),
            assembly: Some("b37".to_string()),
            length: Some(1000),
        }]
    }

    fn header_text(features: FeatureSet) -> String {
        let chromosomes = chromosomes();
        let samples = vec!["S1".to_string(), "S2".to_string()];
        let mut writer = VcfWriter::new(Vec::new());
        writer
            .write_header(&MergeHeader {
                chromosomes: &chromosomes,
                samples: &samples,
                features,
            })
            .expect("header");
        String::from_utf8(writer.into_inner()).expect("utf8")
    }

    #[test]
    fn header_lists_contigs_formats_and_samples() {
        let text = header_text(FeatureSet::ALL);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "##fileformat=VCFv4.2");
        assert_eq!(lines[2], "##contig=<ID=1,assembly=b37,length=1000>");
        assert!(lines[3].starts_with("##FORMAT=<ID=GT"));
        assert!(!lines[3].contains("Phased genotype"));
        assert!(lines[3].contains("whether or not the input call was phased"));
        assert!(lines[4].starts_with("##FORMAT=<ID=GL"));
        assert_eq!(
            lines[5],
            "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\tS2"
        );
    }

    #[test]
    fn header_without_features_has_eight_columns() {
        let text = header_text(FeatureSet::NONE);
        let last = text.lines().last().expect("column line");
        assert_eq!(last, "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO");
        assert!(!text.contains("##FORMAT"));
    }

    #[test]
    fn records_write_calls_and_placeholders() {
        let tied = variant(100, vec![0, HAPLOTYPE_MISSING], vec![1.0, 0.0, 0.0]);
        let record = MergedRecord {
            row: 0,
            leader: &tied,
            features: FeatureSet::ALL,
            inputs: vec![
                InputCall {
                    n_samples: 1,
                    variant: Some(&tied),
                },
                InputCall {
                    n_samples: 1,
                    variant: None,
                },
            ],
        };
        let mut writer = VcfWriter::new(Vec::new());
        writer.write_record(&record).expect("record");
        let text = String::from_utf8(writer.into_inner()).expect("utf8");
        let expected_gl = format!(
            "0.0,{},{}",
            ryu::Buffer::new().format(f32::MIN_POSITIVE.log10()),
            ryu::Buffer::new().format(f32::MIN_POSITIVE.log10())
        );
        assert_eq!(
            text,
            format!("1\t100\trs1\tA\tG\t50\tPASS\t.\tGT:GL\t0|.:{expected_gl}\t./.:.\n")
        );
    }

    #[test]
    fn records_without_features_have_fixed_columns_only() {
        let leader = variant(7, Vec::new(), Vec::new());
        let record = MergedRecord {
            row: 0,
            leader: &leader,
            features: FeatureSet::NONE,
            inputs: vec![InputCall {
                n_samples: 2,
                variant: Some(&leader),
            }],
        };
        let mut writer = VcfWriter::new(Vec::new());
        writer.write_record(&record).expect("record");
        let text = String::from_utf8(writer.into_inner()).expect("utf8");
        assert_eq!(text, "1\t7\trs1\tA\tG\t50\tPASS\t.\n");
    }

    #[test]
    fn matrix_rows_fill_no_calls() {
        let tied = variant(5, vec![1, 0], vec![0.2, 0.3, 0.5]);
        let record = MergedRecord {
            row: 4,
            leader: &tied,
            features: FeatureSet::ALL,
            inputs: vec![
                InputCall {
                    n_samples: 1,
                    variant: None,
                },
                InputCall {
                    n_samples: 1,
                    variant: Some(&tied),
                },
            ],
        };
        assert_eq!(record.total_samples(), 2);

        let mut probs = MemoryMatrix::<f32>::default();
        let mut haps = MemoryMatrix::<i8>::default();
        let mut outputs = MergeOutputs::new()
            .with_geno_probs(&mut probs)
            .with_haplotypes(&mut haps);
        outputs.write(&record).expect("write");
        outputs.finish().expect("finish");
        drop(outputs);

        assert_eq!(haps.rows, vec![(4, vec![HAPLOTYPE_MISSING, HAPLOTYPE_MISSING, 1, 0])]);
        let (row, values) = &probs.rows[0];
        assert_eq!(*row, 4);
        assert!(values[..3].iter().all(|p| p.is_nan()));
        assert_eq!(&values[3..], &[0.2, 0.3, 0.5]);
    }

    #[test]
    fn tsv_matrix_rows_start_with_the_row_index() {
        let mut writer = TsvMatrixWriter::new(Vec::new());
        MatrixStore::<i8>::write_row(&mut writer, 3, &[0, 1, -1]).expect("row");
        MatrixStore::<f32>::write_row(&mut writer, 4, &[0.5, f32::NAN]).expect("row");
        let text = String::from_utf8(writer.into_inner()).expect("utf8");
        assert_eq!(text, "3\t0\t1\t-1\n4\t0.5\tNaN\n");
    }

    #[test]
    fn duplicate_samples_get_numbered_suffixes() {
        let names = ["A", "B", "A", "A", "B-1", "B"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(
            rename_duplicate_samples(names),
            vec!["A", "B", "A-1", "A-2", "B-1", "B-2"]
        );
    }
}
