use std::path::PathBuf;

use thiserror::Error;

use crate::labels::Label;

/// Errors raised while building scorers, reading tries or decoding.
#[derive(Error, Debug)]
pub enum CtcError {
    #[error("symbol {symbol:?} is not part of the alphabet")]
    UnknownSymbol { symbol: char },

    #[error("beam width {beam_width} must be at least top paths {top_paths}")]
    InvalidBeamWidth { beam_width: usize, top_paths: usize },

    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("sequence length {length} exceeds time dimension {max_time}")]
    SequenceLengthExceeded { length: usize, max_time: usize },

    #[error("shape mismatch: {message}")]
    ShapeMismatch { message: String },

    #[error("invalid probability row at time {time}")]
    InvalidProbabilities { time: usize },

    #[error("word {word:?} is already in the trie")]
    DuplicateWord { word: Vec<Label> },

    #[error("malformed trie: {message}")]
    MalformedTrie { message: String },

    #[error("file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("unable to read {}: {source}", path.display())]
    FileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("language model: {0}")]
    LanguageModel(#[from] anyhow::Error),

    #[error("decoding failed for batch entries {failed:?}: {source}")]
    DecodeFailed {
        failed: Vec<usize>,
        #[source]
        source: Box<CtcError>,
    },

    #[error("{feature} support is not available in this build")]
    Unavailable { feature: &'static str },
}

impl CtcError {
    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub(crate) fn shape(message: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            message: message.into(),
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedTrie {
            message: message.into(),
        }
    }

    /// Classify an error from opening `path` for reading.
    pub(crate) fn open(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::FileNotFound { path }
        } else {
            Self::FileUnreadable { path, source }
        }
    }
}

pub type Result<T, E = CtcError> = std::result::Result<T, E>;
