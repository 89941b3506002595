use quarry_budget_tracker::AllocationError;
use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

pub type StdErrorBoxed = Box<dyn std::error::Error + Send + Sync + 'static>;

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    /// Returns `true` when the failure leaves shared in-memory state in an unknown
    /// condition, so everything buffered since the last flush must be discarded.
    ///
    /// Allocation and I/O failures are aborting, as is `Aborted` itself. Argument,
    /// format and analysis failures, and `AlreadyClosed`, affect only the call that
    /// reported them.
    pub fn is_aborting(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::OutOfMemory { .. } | ErrorKind::Io { .. } | ErrorKind::Aborted
        )
    }

    pub fn invalid_format(name: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidFormat {
                element: name.into(),
                message: Default::default(),
            }
            .into(),
        )
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidArgument {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn invalid_operation(name: impl Into<String>) -> Error {
        Error(ErrorKind::InvalidOperation { name: name.into() }.into())
    }

    pub fn out_of_memory(context: impl Into<String>) -> Error {
        Error(
            ErrorKind::OutOfMemory {
                context: context.into(),
            }
            .into(),
        )
    }

    pub fn analysis(field: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::Analysis {
                field: field.into(),
                message: message.into(),
                source: None,
            }
            .into(),
        )
    }

    pub fn analysis_with_source<E>(field: impl Into<String>, source: E) -> Error
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error(
            ErrorKind::Analysis {
                field: field.into(),
                message: source.to_string(),
                source: Some(Box::new(source)),
            }
            .into(),
        )
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Error {
        Error(
            ErrorKind::Io {
                context: context.into(),
                source,
            }
            .into(),
        )
    }

    pub fn aborted() -> Error {
        Error(ErrorKind::Aborted.into())
    }

    pub fn already_closed() -> Error {
        Error(ErrorKind::AlreadyClosed.into())
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("invalid operation {name}")]
    InvalidOperation { name: String },

    #[error("invalid encoding for '{element}': {message}")]
    InvalidFormat { element: String, message: String },

    #[error("memory budget exhausted while allocating {context}")]
    OutOfMemory { context: String },

    #[error("analysis failed for field '{field}': {message}")]
    Analysis {
        field: String,
        message: String,
        #[source]
        source: Option<StdErrorBoxed>,
    },

    #[error("IO error for '{context}': {source}'")]
    Io {
        context: String,
        source: std::io::Error,
    },

    #[error("pending documents were discarded by an abort")]
    Aborted,

    #[error("the document writer is closed")]
    AlreadyClosed,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

impl From<AllocationError> for Error {
    fn from(_: AllocationError) -> Self {
        Error::out_of_memory("pool block")
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::OutOfMemory => Error::out_of_memory(e.to_string()),
            std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::InvalidData => Error(
                ErrorKind::InvalidFormat {
                    element: "stream".to_string(),
                    message: e.to_string(),
                }
                .into(),
            ),
            _ => Error::io("", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aborting_classification() {
        assert!(Error::out_of_memory("int block").is_aborting());
        assert!(Error::io("segment", std::io::Error::other("disk")).is_aborting());
        assert!(Error::aborted().is_aborting());
        assert!(!Error::analysis("body", "bad token").is_aborting());
        assert!(!Error::invalid_arg("doc", "empty").is_aborting());
        assert!(!Error::already_closed().is_aborting());
    }

    #[test]
    fn test_allocation_error_conversion() {
        let err: Error = AllocationError.into();
        assert!(matches!(err.kind(), ErrorKind::OutOfMemory { .. }));
        assert!(err.to_string().contains("memory budget"));
    }

    #[test]
    fn test_io_error_kinds_are_mapped() {
        let oom: Error = std::io::Error::from(AllocationError).into();
        assert!(matches!(oom.kind(), ErrorKind::OutOfMemory { .. }));
        let eof: Error = std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into();
        assert!(matches!(eof.kind(), ErrorKind::InvalidFormat { .. }));
        assert!(!eof.is_aborting());
        let other: Error = std::io::Error::other("disk").into();
        assert!(matches!(other.kind(), ErrorKind::Io { .. }));
    }

    #[test]
    fn test_analysis_source_is_kept() {
        let source = std::io::Error::other("tokenizer exploded");
        let err = Error::analysis_with_source("title", source);
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("title"));
    }
}
