//! Error types for PC/SC transport

use simrelay_apdu_core::Error;

/// PC/SC-specific errors
#[derive(Debug, thiserror::Error)]
pub enum PcscError {
    /// PC/SC error
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),

    /// No readers available
    #[error("No readers available")]
    NoReadersAvailable,

    /// Reader not found
    #[error("Reader not found: {0}")]
    ReaderNotFound(String),

    /// No card present in reader
    #[error("No card present in reader: {0}")]
    NoCard(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl From<PcscError> for Error {
    fn from(error: PcscError) -> Self {
        match error {
            PcscError::Pcsc(pcsc::Error::Timeout) => Self::Timeout,
            PcscError::Pcsc(pcsc::Error::NoSmartcard | pcsc::Error::RemovedCard)
            | PcscError::NoCard(_) => Self::NoCard,
            PcscError::Pcsc(pcsc::Error::ResetCard) => {
                Self::message("Card was reset").with_context("PC/SC")
            }
            other => Self::message(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_into_core_error() {
        assert_eq!(Error::from(PcscError::Pcsc(pcsc::Error::Timeout)), Error::Timeout);
        assert_eq!(
            Error::from(PcscError::NoCard("Reader 0".to_string())),
            Error::NoCard
        );
        assert_eq!(
            Error::from(PcscError::ReaderNotFound("Reader 1".to_string())).to_string(),
            "Reader not found: Reader 1"
        );
    }
}
