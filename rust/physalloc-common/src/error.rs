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

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidArgument {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn invalid_allocator(message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidAllocator {
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn backend_unavailable(operation: &'static str) -> Error {
        Error(ErrorKind::BackendUnavailable { operation }.into())
    }

    pub fn reservation_failed(size: usize, source: impl Into<StdErrorBoxed>) -> Error {
        Error(
            ErrorKind::ReservationFailed {
                size,
                source: source.into(),
            }
            .into(),
        )
    }

    pub fn release_failed(source: impl Into<StdErrorBoxed>) -> Error {
        Error(
            ErrorKind::ReleaseFailed {
                source: source.into(),
            }
            .into(),
        )
    }

    pub fn copy_failed(size: usize, source: impl Into<StdErrorBoxed>) -> Error {
        Error(
            ErrorKind::CopyFailed {
                size,
                source: source.into(),
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

    /// Returns `true` if the error signals a missing backend implementation
    /// rather than a failure reported by the backend itself.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::BackendUnavailable { .. }
                | ErrorKind::CopyUnsupported
                | ErrorKind::ShareUnsupported
        )
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("memory does not belong to this allocator: {message}")]
    InvalidAllocator { message: String },

    #[error("no backend implementation registered for '{operation}'")]
    BackendUnavailable { operation: &'static str },

    #[error("failed to reserve {size} bytes of physical memory: {source}")]
    ReservationFailed { size: usize, source: StdErrorBoxed },

    #[error("failed to release physical memory: {source}")]
    ReleaseFailed { source: StdErrorBoxed },

    #[error("backend does not support copying physical memory")]
    CopyUnsupported,

    #[error("failed to copy {size} bytes of physical memory: {source}")]
    CopyFailed { size: usize, source: StdErrorBoxed },

    #[error("sharing physical memory is not supported")]
    ShareUnsupported,

    #[error("write access requested on read-only memory")]
    AccessDenied,

    #[error("IO error for '{context}': {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::io("", e)
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind};

    #[test]
    fn test_error_kinds() {
        let e = Error::backend_unavailable("reserve");
        assert!(e.is_unsupported());
        assert!(e.to_string().contains("reserve"));

        let e: Error = ErrorKind::AccessDenied.into();
        assert!(!e.is_unsupported());
        assert!(matches!(e.into_kind(), ErrorKind::AccessDenied));

        let e = Error::reservation_failed(
            4096,
            std::io::Error::new(std::io::ErrorKind::OutOfMemory, "exhausted"),
        );
        assert!(matches!(
            e.kind(),
            ErrorKind::ReservationFailed { size: 4096, .. }
        ));
        assert!(e.to_string().contains("exhausted"));
    }

    #[test]
    fn test_nested_source() {
        let inner = Error::io(
            "pagemap",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let e = Error::copy_failed(16, inner);
        assert!(matches!(e.kind(), ErrorKind::CopyFailed { size: 16, .. }));
        assert!(e.to_string().contains("pagemap"));
    }
}
