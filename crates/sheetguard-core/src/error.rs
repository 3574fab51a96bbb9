use thiserror::Error;

/// Recoverable per-formula failures. Neither is fatal to an audit run: each is
/// turned into a finding and analysis continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormulaError {
    /// The formula text could not be tokenized.
    #[error("malformed formula at position {position}: {reason} (near `{fragment}`)")]
    MalformedFormula {
        fragment: String,
        position: usize,
        reason: String,
    },

    /// A reference names a target that does not exist in the workbook.
    #[error("unresolvable reference `{reference}`: {reason}")]
    UnresolvableReference { reference: String, reason: String },
}

impl FormulaError {
    pub(crate) fn malformed(
        fragment: impl Into<String>,
        position: usize,
        reason: impl Into<String>,
    ) -> Self {
        FormulaError::MalformedFormula {
            fragment: fragment.into(),
            position,
            reason: reason.into(),
        }
    }

    pub(crate) fn unresolvable(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        FormulaError::UnresolvableReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }
}
