use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn out_of_range(index: usize, len: usize, size: usize) -> Error {
        Error(ErrorKind::OutOfRange { index, len, size }.into())
    }

    pub fn array_out_of_range(offset: usize, len: usize, array_len: usize) -> Error {
        Error(
            ErrorKind::ArrayOutOfRange {
                offset,
                len,
                array_len,
            }
            .into(),
        )
    }

    pub fn invalid_state(message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidState {
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn out_of_memory(requested: u64, available: u64) -> Error {
        Error(
            ErrorKind::OutOfMemory {
                requested,
                available,
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

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Error {
        Error(
            ErrorKind::Io {
                context: context.into(),
                source,
            }
            .into(),
        )
    }

    /// Returns `true` for both region bounds violations and undersized
    /// caller-supplied arrays.
    pub fn is_out_of_range(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::OutOfRange { .. } | ErrorKind::ArrayOutOfRange { .. }
        )
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self.kind(), ErrorKind::InvalidState { .. })
    }

    pub fn is_out_of_memory(&self) -> bool {
        matches!(self.kind(), ErrorKind::OutOfMemory { .. })
    }

    pub fn is_invalid_arg(&self) -> bool {
        matches!(self.kind(), ErrorKind::InvalidArgument { .. })
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("index out of range: index={index}, len={len}, size={size}")]
    OutOfRange { index: usize, len: usize, size: usize },

    #[error("array out of range: offset={offset}, len={len}, array length={array_len}")]
    ArrayOutOfRange {
        offset: usize,
        len: usize,
        array_len: usize,
    },

    #[error("invalid state: {message}")]
    InvalidState { message: String },

    #[error("out of native memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: u64, available: u64 },

    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

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

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        match e.into_kind() {
            ErrorKind::Io { source, .. } => source,
            kind @ ErrorKind::OutOfMemory { .. } => {
                std::io::Error::new(std::io::ErrorKind::OutOfMemory, kind.to_string())
            }
            kind => std::io::Error::other(kind.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_family() {
        assert!(Error::out_of_range(8, 4, 10).is_out_of_range());
        assert!(Error::array_out_of_range(0, 5, 4).is_out_of_range());
        assert!(!Error::invalid_state("x").is_out_of_range());
    }

    #[test]
    fn test_display() {
        let e = Error::out_of_range(8, 4, 10);
        assert_eq!(e.to_string(), "index out of range: index=8, len=4, size=10");
        let e = Error::out_of_memory(100, 10);
        assert!(e.to_string().contains("100"));
    }

    #[test]
    fn test_into_io_error() {
        let e: std::io::Error = Error::out_of_memory(1, 0).into();
        assert_eq!(e.kind(), std::io::ErrorKind::OutOfMemory);
        let e: std::io::Error = Error::invalid_state("uninitialized").into();
        assert_eq!(e.kind(), std::io::ErrorKind::Other);
    }
}
