use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use log::debug;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("opening {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("error reading {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("creating {path}: {source}")]
    Create {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("{path}:{line}: line is not valid UTF-8: {source}")]
    Utf8 {
        path: String,
        line: u64,
        #[source]
        source: std::str::Utf8Error,
    },
}

/// A trait that abstracts sequential, line-oriented access to text data such as
/// VCF files, regardless of compression or where the bytes come from.
pub trait TextSource: Send {
    fn len(&self) -> Option<u64> {
        None
    }

    /// Name of the underlying stream, used to label diagnostics.
    fn describe(&self) -> &str;

    /// Returns the next line without its terminator, or `None` at end of stream.
    /// The returned slice is only valid until the next call.
    fn next_line<'a>(&'a mut self) -> Result<Option<&'a [u8]>, SourceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextCompression {
    Plain,
    Gzip,
}

/// Line reader over any buffered byte stream. Files, gzip members and in-memory
/// buffers all end up here.
pub struct BufferedTextSource {
    reader: Box<dyn BufRead + Send>,
    line: Vec<u8>,
    line_active: bool,
    len: Option<u64>,
    compression: TextCompression,
    path_display: String,
}

impl BufferedTextSource {
    pub fn new(path_display: impl Into<String>, reader: Box<dyn BufRead + Send>) -> Self {
        Self {
            reader,
            line: Vec::with_capacity(1024),
            line_active: false,
            len: None,
            compression: TextCompression::Plain,
            path_display: path_display.into(),
        }
    }

    /// Wraps an in-memory buffer, decompressing it first if it carries the gzip magic.
    pub fn from_bytes(path_display: impl Into<String>, bytes: Vec<u8>) -> Self {
        let len = bytes.len() as u64;
        let compression = if bytes.len() >= 2 && is_gzip_magic(&[bytes[0], bytes[1]]) {
            TextCompression::Gzip
        } else {
            TextCompression::Plain
        };
        let reader = wrap_reader(Box::new(Cursor::new(bytes)), compression);
        let mut source = Self::new(path_display, reader);
        source.len = Some(len);
        source.compression = compression;
        source
    }

    pub fn compression(&self) -> TextCompression {
        self.compression
    }
}

impl TextSource for BufferedTextSource {
    fn len(&self) -> Option<u64> {
        self.len
    }

    fn describe(&self) -> &str {
        &self.path_display
    }

    fn next_line<'a>(&'a mut self) -> Result<Option<&'a [u8]>, SourceError> {
        if self.line_active {
            self.line.clear();
            self.line_active = false;
        }

        let bytes_read =
            self.reader
                .read_until(b'\n', &mut self.line)
                .map_err(|e| SourceError::Read {
                    path: self.path_display.clone(),
                    source: e,
                })?;

        if bytes_read == 0 {
            return Ok(None);
        }

        if self.line.last() == Some(&b'\n') {
            self.line.pop();
        }
        if self.line.last() == Some(&b'\r') {
            self.line.pop();
        }

        self.line_active = true;
        Ok(Some(&self.line))
    }
}

/// Opens a local file for line-oriented reading. Gzip and BGZF inputs are detected
/// from their magic bytes, not from the file extension.
pub fn open_text_source(path: &Path) -> Result<Box<dyn TextSource>, SourceError> {
    let open_err = |e: io::Error| SourceError::Open {
        path: path.display().to_string(),
        source: e,
    };

    let mut file = File::open(path).map_err(open_err)?;
    let len = file.metadata().map_err(open_err)?.len();

    let mut magic = [0u8; 2];
    let bytes_read = read_magic(&mut file, &mut magic).map_err(open_err)?;
    file.seek(SeekFrom::Start(0)).map_err(open_err)?;

    let compression = if bytes_read == 2 && is_gzip_magic(&magic) {
        TextCompression::Gzip
    } else {
        TextCompression::Plain
    };
    debug!("opened {} ({compression:?}, {len} bytes)", path.display());

    let reader = wrap_reader(Box::new(file), compression);
    let mut source = BufferedTextSource::new(path.display().to_string(), reader);
    source.len = Some(len);
    source.compression = compression;
    Ok(Box::new(source))
}

/// Borrows a raw line as UTF-8 text, reporting the stream and line number on failure.
pub fn line_as_str<'a>(bytes: &'a [u8], path: &str, line: u64) -> Result<&'a str, SourceError> {
    std::str::from_utf8(bytes).map_err(|e| SourceError::Utf8 {
        path: path.to_string(),
        line,
        source: e,
    })
}

fn read_magic(file: &mut File, magic: &mut [u8; 2]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < magic.len() {
        match file.read(&mut magic[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn wrap_reader(
    reader: Box<dyn Read + Send>,
    compression: TextCompression,
) -> Box<dyn BufRead + Send> {
    match compression {
        TextCompression::Plain => Box::new(BufReader::new(reader)),
        // MultiGzDecoder keeps going across BGZF blocks, which are separate gzip members.
        TextCompression::Gzip => Box::new(BufReader::new(MultiGzDecoder::new(reader))),
    }
}

fn is_gzip_magic(magic: &[u8; 2]) -> bool {
    magic[0] == 0x1F && magic[1] == 0x8B
}

// ========================================================================================
//                                   Output streams
// ========================================================================================

/// Destination for merged text output. A path ending in `.gz` is gzip-compressed.
pub enum OutputStream {
    Stdout(BufWriter<io::Stdout>),
    File(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl OutputStream {
    /// Flushes buffered data and writes the gzip trailer where one is needed.
    pub fn finish(self) -> io::Result<()> {
        match self {
            Self::Stdout(mut writer) => writer.flush(),
            Self::File(mut writer) => writer.flush(),
            Self::Gzip(encoder) => {
                let mut inner = encoder.finish()?;
                inner.flush()
            }
        }
    }
}

impl Write for OutputStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Stdout(writer) => writer.write(buf),
            Self::File(writer) => writer.write(buf),
            Self::Gzip(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Stdout(writer) => writer.flush(),
            Self::File(writer) => writer.flush(),
            Self::Gzip(writer) => writer.flush(),
        }
    }
}

/// Creates the output stream for `path`, or standard output when no path is given.
pub fn create_output_stream(path: Option<&Path>) -> Result<OutputStream, SourceError> {
    let Some(path) = path else {
        return Ok(OutputStream::Stdout(BufWriter::new(io::stdout())));
    };

    let file = File::create(path).map_err(|e| SourceError::Create {
        path: path.display().to_string(),
        source: e,
    })?;
    let writer = BufWriter::new(file);

    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(OutputStream::Gzip(GzEncoder::new(writer, Compression::default())))
    } else {
        Ok(OutputStream::File(writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_lines(source: &mut dyn TextSource) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = source.next_line().expect("line") {
            lines.push(String::from_utf8(line.to_vec()).expect("utf8"));
        }
        lines
    }

    fn gzip(text: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text.as_bytes()).expect("compress");
        encoder.finish().expect("finish")
    }

    #[test]
    fn strips_line_terminators() {
        let mut source = BufferedTextSource::from_bytes("mem", b"a\tb\r\nc\n\nd".to_vec());
        assert_eq!(collect_lines(&mut source), vec!["a\tb", "c", "", "d"]);
    }

    #[test]
    fn detects_gzip_buffers() {
        let mut source = BufferedTextSource::from_bytes("mem.gz", gzip("x\ny\n"));
        assert_eq!(source.compression(), TextCompression::Gzip);
        assert_eq!(collect_lines(&mut source), vec!["x", "y"]);
    }

    #[test]
    fn opens_plain_and_gzip_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let plain = dir.path().join("plain.vcf");
        let packed = dir.path().join("packed.vcf.gz");
        std::fs::write(&plain, "one\ntwo\n").expect("write plain");
        std::fs::write(&packed, gzip("one\ntwo\n")).expect("write gzip");

        let mut plain_source = open_text_source(&plain).expect("open plain");
        let mut packed_source = open_text_source(&packed).expect("open gzip");
        assert_eq!(collect_lines(plain_source.as_mut()), vec!["one", "two"]);
        assert_eq!(collect_lines(packed_source.as_mut()), vec!["one", "two"]);
        assert_eq!(plain_source.len(), Some(8));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = match open_text_source(Path::new("/definitely/not/here.vcf")) {
            Ok(_) => panic!("expected an open error"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("/definitely/not/here.vcf"));
    }

    #[test]
    fn invalid_utf8_is_reported_with_line_number() {
        let err = line_as_str(&[0xFF, 0xFE], "in.vcf", 7).unwrap_err();
        assert!(err.to_string().starts_with("in.vcf:7:"));
    }

    #[test]
    fn gzip_output_round_trips_through_reader() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.vcf.gz");
        let mut stream = create_output_stream(Some(&path)).expect("create");
        assert!(matches!(stream, OutputStream::Gzip(_)));
        stream.write_all(b"merged\n").expect("write");
        stream.finish().expect("finish");

        let mut source = open_text_source(&path).expect("reopen");
        assert_eq!(collect_lines(source.as_mut()), vec!["merged"]);
    }
}
