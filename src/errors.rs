use std::{fmt, io, num::{ParseFloatError, ParseIntError, TryFromIntError}, str::Utf8Error};
use quick_xml::events::attributes::AttrError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Parse,
    Config,
    /// A feature's geometry could not be assembled. Local to the feature.
    MalformedGeometry,
    /// A way or relation points at something the first pass never saw. Local to the feature.
    ReferentialGap,
    /// Side tables grew past the configured ceiling.
    CapacityExceeded,
    /// A stage of a topology failed or panicked.
    PipelineFault,
    /// A stage stopped because another stage failed first.
    Aborted,
    /// Invalid arguments at an API boundary.
    ContractViolation,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
        }
    }

    pub fn contract_violation(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::ContractViolation, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::MalformedGeometry, message)
    }

    pub fn referential_gap(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::ReferentialGap, message)
    }

    pub fn pipeline_fault(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::PipelineFault, message)
    }

    pub fn aborted() -> Self {
        Error::new(ErrorKind::Aborted, "topology aborted")
    }

    /// Errors that only cost a single feature.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind, ErrorKind::MalformedGeometry | ErrorKind::ReferentialGap)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error {
            kind: ErrorKind::Io,
            message: value.to_string()
        }
    }
}

impl From<quick_xml::Error> for Error {
    fn from(value: quick_xml::Error) -> Self {
        Error {
            kind: ErrorKind::Parse,
            message: value.to_string()
        }
    }
}

impl From<AttrError> for Error {
    fn from(value: AttrError) -> Self {
        Error {
            kind: ErrorKind::Parse,
            message: value.to_string()
        }
    }
}

impl From<osmpbf::Error> for Error {
    fn from(value: osmpbf::Error) -> Self {
        Error {
            kind: ErrorKind::Parse,
            message: value.to_string()
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error {
            kind: ErrorKind::Parse,
            message: value.to_string()
        }
    }
}

impl From<geojson::Error> for Error {
    fn from(value: geojson::Error) -> Self {
        Error {
            kind: ErrorKind::Parse,
            message: value.to_string()
        }
    }
}

impl From<rayon::ThreadPoolBuildError> for Error {
    fn from(value: rayon::ThreadPoolBuildError) -> Self {
        Error {
            kind: ErrorKind::Io,
            message: value.to_string()
        }
    }
}

impl From<regex::Error> for Error {
    fn from(value: regex::Error) -> Self {
        Error {
            kind: ErrorKind::Config,
            message: value.to_string()
        }
    }
}

impl From<ParseFloatError> for Error {
    fn from(value: ParseFloatError) -> Self {
        Error {
            kind: ErrorKind::Parse,
            message: value.to_string()
        }
    }
}

impl From<ParseIntError> for Error {
    fn from(value: ParseIntError) -> Self {
        Error {
            kind: ErrorKind::Parse,
            message: value.to_string()
        }
    }
}

impl From<Utf8Error> for Error {
    fn from(value: Utf8Error) -> Self {
        Error {
            kind: ErrorKind::Parse,
            message: value.to_string()
        }
    }
}

impl From<TryFromIntError> for Error {
    fn from(value: TryFromIntError) -> Self {
        Error {
            kind: ErrorKind::ContractViolation,
            message: value.to_string()
        }
    }
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Error {
            kind: ErrorKind::PipelineFault,
            message: value.to_string()
        }
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error {
            kind: ErrorKind::PipelineFault,
            message: value
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
