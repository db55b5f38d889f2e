use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use glob::Pattern;
use zstd::stream::read::Decoder as ZstdDecoder;

pub type PgnInput = Box<dyn Read + Send>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompressionMode {
    Plain,
    Zstd,
}

impl CompressionMode {
    /// Picked from the file extension: `.zst` is zstd, everything else is plain text.
    pub fn for_path(path: &Path) -> Self {
        match path.extension() {
            Some(ext) if ext.eq_ignore_ascii_case("zst") => Self::Zstd,
            _ => Self::Plain,
        }
    }
}

/// Opens a game file for line-oriented reading, decompressing when needed.
pub fn open_input_stream(path: &Path) -> io::Result<Box<dyn BufRead + Send>> {
    let file = File::open(path)?;

    let input: PgnInput = match CompressionMode::for_path(path) {
        CompressionMode::Plain => Box::new(file),
        CompressionMode::Zstd => Box::new(ZstdDecoder::new(file)?),
    };
    Ok(Box::new(BufReader::with_capacity(64 * 1024, input)))
}

/// `true` when no pattern is configured or the file name matches it.
pub fn is_included(path: &Path, include: Option<&Pattern>) -> bool {
    let Some(pattern) = include else {
        return true;
    };

    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| pattern.matches(name))
}
