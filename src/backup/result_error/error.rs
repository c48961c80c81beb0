use crate::backup::result_error::{AddDebugObjectAndFnName, AddFunctionName, AddMsg};
use itertools::Itertools;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    LiblzmaStream(#[from] liblzma::stream::Error),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    ThreadPoolBuildError(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    WalkDir(#[from] walkdir::Error),
    #[error(transparent)]
    AgeEncrypt(#[from] age::EncryptError),
    #[error("{path:?} not found")]
    NotFound { path: PathBuf },
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Corrupt data: {0}")]
    CorruptData(String),
    #[error("Authentication failed: {0}")]
    AuthFailure(String),
    #[error("Transport failure: {0}")]
    TransportFailure(String),
    #[error(
        "{} failed for {} of {} units: {}",
        operation,
        failed.len(),
        total,
        failed.iter().join(", ")
    )]
    PartialBatchFailure {
        operation: String,
        total: usize,
        failed: Vec<Arc<str>>,
    },
    #[error("Unit {unit} panicked: {message}")]
    UnitPanicked { unit: Arc<str>, message: String },
    #[error("No fragment matching {prefix:?}.partNNN in {dir:?}")]
    NoFragmentsFound { dir: PathBuf, prefix: String },
    #[error("Read fragment {fragment:?} failed: {source}")]
    FragmentReadFailed {
        fragment: PathBuf,
        source: std::io::Error,
    },
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{} failed:\n{}", fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithFnName { fn_name: String, error: Box<Error> },
    #[error("{:?} {} failed:\n{}", obj_debug, fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithDebugObjAndFnName {
        error: Box<Error>,
        obj_debug: Box<dyn Debug + Send>,
        fn_name: String,
    },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

/// Coarse classification of an [`Error`], independent of the context
/// wrappers stacked on top of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    CorruptData,
    AuthFailure,
    PartialBatchFailure,
    TransportFailure,
    Io,
    Other,
}

impl<S: Into<String>, O: Debug + Send + 'static> AddDebugObjectAndFnName<S, O> for Error {
    fn add_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self {
        Error::WithDebugObjAndFnName {
            error: Box::new(self),
            obj_debug: Box::new(obj),
            fn_name: fn_name.into(),
        }
    }
}

impl<S: Into<String>> AddMsg<S> for Error {
    fn add_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl<S: Into<String>> AddFunctionName<S> for Error {
    fn add_fn_name(self, fn_name: S) -> Self {
        Self::WithFnName {
            fn_name: fn_name.into(),
            error: Box::new(self),
        }
    }
}

impl From<age::DecryptError> for Error {
    fn from(value: age::DecryptError) -> Self {
        use age::DecryptError;
        match value {
            DecryptError::DecryptionFailed
            | DecryptError::NoMatchingKeys
            | DecryptError::KeyDecryptionFailed => {
                Error::AuthFailure(format!("wrong passphrase ({value})"))
            }
            DecryptError::Io(e) => Error::Io(e),
            e => Error::CorruptData(format!("age stream: {e}")),
        }
    }
}

impl From<Vec<Error>> for Error {
    fn from(errors: Vec<Error>) -> Self {
        if errors.is_empty() {
            panic!("Should not create lots of errors when error is empty")
        }
        Self::LotsOfError(errors.into_iter().flat_map(|e| e.into_iter()).collect_vec())
    }
}

impl Error {
    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(|e| e.into_iter())),
            e => Box::new(std::iter::once(e)),
        }
    }

    pub fn chain(self, other: Error) -> Error {
        Error::LotsOfError(self.into_iter().chain(other.into_iter()).collect_vec())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } | Error::NoFragmentsFound { .. } => ErrorKind::NotFound,
            Error::InvalidInput(_) | Error::ValidationError(_) => ErrorKind::InvalidInput,
            Error::CorruptData(_) | Error::FragmentReadFailed { .. } => ErrorKind::CorruptData,
            Error::AuthFailure(_) => ErrorKind::AuthFailure,
            Error::PartialBatchFailure { .. } => ErrorKind::PartialBatchFailure,
            Error::TransportFailure(_) => ErrorKind::TransportFailure,
            Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            Error::Io(_) | Error::WalkDir(_) => ErrorKind::Io,
            Error::WithMsg { error, .. }
            | Error::WithFnName { error, .. }
            | Error::WithDebugObjAndFnName { error, .. } => error.kind(),
            Error::LotsOfError(v) => v.first().map(Error::kind).unwrap_or(ErrorKind::Other),
            _ => ErrorKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error = Error::from(io_error);

        match error {
            Error::Io(_) => (),
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_error_add_msg() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error = Error::from(io_error).add_msg("Custom message");

        match error {
            Error::WithMsg { msg, .. } => assert_eq!(msg, "Custom message"),
            _ => panic!("Expected WithMsg error"),
        }
    }

    #[test]
    fn test_error_with_debug_display() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error = Error::from(io_error).add_debug_object_and_fn_name(42, "test_function");
        let error_str = error.to_string();

        assert!(error_str.contains("test_function"));
        assert!(error_str.contains("failed"));
        assert!(error_str.contains("file not found"));
    }

    #[test]
    fn test_error_from_vec() {
        let errors = vec![
            Error::InvalidInput("error1".into()),
            Error::Io(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "error2")),
        ];

        match Error::from(errors) {
            Error::LotsOfError(error_vec) => assert_eq!(error_vec.len(), 2),
            _ => panic!("Expected LotsOfError"),
        }
    }

    #[test]
    #[should_panic(expected = "Should not create lots of errors when error is empty")]
    fn test_error_from_empty_vec_panics() {
        let errors: Vec<Error> = vec![];
        let _error = Error::from(errors);
    }

    #[test]
    fn test_error_chain_flattens() {
        let error1 = Error::InvalidInput("a".into()).chain(Error::InvalidInput("b".into()));
        let chained = error1.chain(Error::CorruptData("c".into()));
        match chained {
            Error::LotsOfError(errors) => assert_eq!(errors.len(), 3),
            _ => panic!("Expected LotsOfError"),
        }
    }

    #[test]
    fn test_kind_looks_through_wrappers() {
        let error = Error::AuthFailure("nope".into())
            .add_msg("outer")
            .add_fn_name("restore_all");
        assert_eq!(error.kind(), ErrorKind::AuthFailure);

        let io = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "x"));
        assert_eq!(io.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_partial_batch_failure_display() {
        let error = Error::PartialBatchFailure {
            operation: "Fragment write".into(),
            total: 4,
            failed: vec!["a.part002".into(), "a.part004".into()],
        };
        let s = error.to_string();
        assert!(s.contains("2 of 4"));
        assert!(s.contains("a.part002, a.part004"));
        assert_eq!(error.kind(), ErrorKind::PartialBatchFailure);
    }

    #[test]
    fn test_decrypt_error_mapping() {
        let auth = Error::from(age::DecryptError::DecryptionFailed);
        assert_eq!(auth.kind(), ErrorKind::AuthFailure);

        let corrupt = Error::from(age::DecryptError::InvalidHeader);
        assert_eq!(corrupt.kind(), ErrorKind::CorruptData);
    }
}
