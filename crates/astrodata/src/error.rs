use crate::fits::Value;

/// All errors that can occur while reading, manipulating or writing a container.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed FITS header block.
    #[error("invalid FITS header: {0}")]
    InvalidHeader(&'static str),
    /// Premature end of data while reading.
    #[error("unexpected end of file")]
    UnexpectedEof,
    /// Unrecognized BITPIX value.
    #[error("invalid BITPIX value: {0}")]
    InvalidBitpix(i64),
    /// Malformed keyword name in a header card.
    #[error("invalid keyword name: {0:?}")]
    InvalidKeyword(String),
    /// Unknown or unsupported XTENSION type.
    #[error("unsupported XTENSION type: {0}")]
    UnsupportedExtension(String),
    /// A header or column value could not be parsed or encoded.
    #[error("invalid value: {0}")]
    InvalidValue(&'static str),
    /// A structurally required keyword was not found in an extension header.
    #[error("missing required keyword: {0}")]
    MissingKeyword(&'static str),
    /// The extension layout cannot be turned into a consistent set of units.
    #[error("structural error: {0}")]
    Structural(String),
    /// A keyword was absent from one or more records of a header collection.
    #[error(transparent)]
    MissingKey(#[from] MissingKeyError),
    /// An object of the wrong kind was handed to an operation.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    /// No table or auxiliary object is known by this name.
    #[error("{0} not found in this object")]
    NotFound(String),
    /// The operation is not allowed on this kind of view.
    #[error("{0}")]
    InvalidView(&'static str),
    /// A selector pointed outside the addressed units.
    #[error("index {index} out of range for {len} units")]
    IndexOutOfRange { index: isize, len: usize },
    /// The transform document could not be built.
    #[error("transform document error: {0}")]
    Document(#[from] serde_json::Error),
    /// An I/O error from backing storage or the output target.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn structural(message: impl Into<String>) -> Self {
        Error::Structural(message.into())
    }

    pub(crate) fn type_mismatch(message: impl Into<String>) -> Self {
        Error::TypeMismatch(message.into())
    }
}

/// Raised when a keyword is missing from some records of a header collection.
///
/// The partial result is kept so callers can recover the values that were found.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("the keyword {keyword:?} couldn't be found at headers: {missing_at:?}")]
pub struct MissingKeyError {
    /// The keyword that was looked up.
    pub keyword: String,
    /// Indices of the records lacking the keyword.
    pub missing_at: Vec<usize>,
    /// One entry per record; `None` where the keyword was missing.
    pub values: Vec<Option<Value>>,
}

impl MissingKeyError {
    /// Fill the gaps with `default`, returning one value per record.
    pub fn fill(self, default: &Value) -> Vec<Value> {
        self.values
            .into_iter()
            .map(|v| v.unwrap_or_else(|| default.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_invalid_bitpix() {
        let e = Error::InvalidBitpix(-99);
        assert_eq!(e.to_string(), "invalid BITPIX value: -99");
    }

    #[test]
    fn display_missing_keyword() {
        let e = Error::MissingKeyword("NAXIS");
        assert_eq!(e.to_string(), "missing required keyword: NAXIS");
    }

    #[test]
    fn display_index_out_of_range() {
        let e = Error::IndexOutOfRange { index: -4, len: 3 };
        assert_eq!(e.to_string(), "index -4 out of range for 3 units");
    }

    #[test]
    fn io_error_from_conversion() {
        let io_err = std::io::Error::other("oops");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
    }

    #[test]
    fn missing_key_fill_substitutes_default() {
        let err = MissingKeyError {
            keyword: "GAIN".into(),
            missing_at: vec![1],
            values: vec![Some(Value::Float(2.5)), None],
        };
        assert_eq!(
            err.fill(&Value::Float(1.0)),
            vec![Value::Float(2.5), Value::Float(1.0)]
        );
    }

    #[test]
    fn missing_key_display_lists_indices() {
        let err = MissingKeyError {
            keyword: "GAIN".into(),
            missing_at: vec![0, 2],
            values: vec![None, Some(Value::Integer(1)), None],
        };
        let e: Error = err.into();
        assert!(e.to_string().contains("[0, 2]"));
    }
}
