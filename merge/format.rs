//! Lookup of sub-field offsets inside a colon-delimited FORMAT layout.

/// Genotype label in the FORMAT column.
pub const GT_LABEL: &str = "GT";
/// Genotype-likelihood label in the FORMAT column.
pub const GL_LABEL: &str = "GL";

/// Returns the position of the first label in `layout` that equals `label` exactly.
#[inline]
pub fn resolve_index(layout: &str, label: &str) -> Option<usize> {
    layout.split(':').position(|field| field == label)
}

/// The ordered labels of one record's FORMAT column, borrowed from the line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatSpec<'a> {
    labels: Vec<&'a str>,
}

impl<'a> FormatSpec<'a> {
    pub fn parse(layout: &'a str) -> Self {
        Self {
            labels: layout.split(':').collect(),
        }
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|&field| field == label)
    }

    pub fn labels(&self) -> &[&'a str] {
        &self.labels
    }
}

/// Returns sub-field `index` of one colon-delimited sample column.
#[inline]
pub fn sub_token(sample_field: &str, index: usize) -> Option<&str> {
    sample_field.split(':').nth(index)
}
