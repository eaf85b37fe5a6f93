use thiserror::Error;

/// Reasons a UserOperation could not be normalized.
///
/// Any of these fails the whole normalization; no partial record is built.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("expected a JSON object with UserOperation fields")]
    NotAnObject,

    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("invalid integer value for {field}: {raw:?}")]
    InvalidInteger { field: &'static str, raw: String },

    #[error("invalid hex value for {field}: {raw:?}")]
    InvalidHex { field: &'static str, raw: String },

    #[error("invalid address for {field}: {raw:?}")]
    InvalidAddress { field: &'static str, raw: String },
}

impl ParseError {
    /// Name of the offending field, when the failure is attributable to one.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ParseError::MissingField(field)
            | ParseError::InvalidInteger { field, .. }
            | ParseError::InvalidHex { field, .. }
            | ParseError::InvalidAddress { field, .. } => Some(field),
            ParseError::InvalidJson(_) | ParseError::NotAnObject => None,
        }
    }
}
