//! Error types shared by the quarry crates.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while working with records and templates.
#[derive(Error, Debug)]
pub enum Error {
    /// A node required a field that the incoming record does not carry.
    #[error("record is missing required field '{field}'")]
    MissingField {
        /// The name of the missing field.
        field: String,
    },

    /// A field exists but does not hold a string value.
    #[error("field '{field}' is not a string (found {found})")]
    NotAString {
        /// The name of the offending field.
        field: String,
        /// Short description of the value that was found.
        found: &'static str,
    },

    /// A `%(field)s` template could not be expanded.
    #[error("invalid template '{template}': {reason}")]
    InvalidTemplate {
        /// The template text.
        template: String,
        /// Description of what's wrong.
        reason: String,
    },

    /// A rename rule string could not be parsed.
    #[error("invalid rename rule '{rule}': {reason}")]
    InvalidRenameRule {
        /// The rule as supplied.
        rule: String,
        /// Description of what's wrong.
        reason: String,
    },

    /// Regular expression compilation error.
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
