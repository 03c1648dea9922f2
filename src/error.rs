use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures that prevent a view from showing its source.
///
/// Decoding problems never show up here: invalid bytes are displayed as
/// replacement glyphs and formatting carries on one byte at a time.
#[derive(Debug, Error)]
pub enum ViewError {
    #[error("cannot open \"{}\": {source}", path.display())]
    Open { path: PathBuf, source: io::Error },

    #[error("cannot stat \"{}\": {source}", path.display())]
    Stat { path: PathBuf, source: io::Error },

    #[error("cannot view \"{}\": not a regular file", path.display())]
    NotRegularFile { path: PathBuf },

    #[error("error reading data: {0}")]
    Read(#[from] io::Error),

    #[error("empty output from child filter")]
    NoOutput,

    #[error("invalid search pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file \"{}\": {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse config file \"{}\": {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

pub type Result<T, E = ViewError> = std::result::Result<T, E>;
