use std::fmt;

/// Error type for expect-proto
#[derive(Debug, PartialEq, Eq)]
#[allow(missing_docs)]
#[non_exhaustive]
pub enum Error {
    InvalidRequest(String),
    Transport(String),
    HeaderListTooLarge,
    BodyLargerThanContentLength,
    TrailersRequireChunked,
    AbortedStream,
    Timeout,
    Cancelled,
    HttpParseFail(String),
    HttpParseTooManyHeaders,
}

impl Error {
    /// Tell if the error originated in the transport binding.
    ///
    /// `HeaderListTooLarge` is a distinguishable subkind of transport failure.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::HeaderListTooLarge
                | Error::BodyLargerThanContentLength
                | Error::TrailersRequireChunked
        )
    }
}

impl From<httparse::Error> for Error {
    fn from(value: httparse::Error) -> Self {
        Error::HttpParseFail(value.to_string())
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidRequest(v) => write!(f, "invalid request: {}", v),
            Error::Transport(v) => write!(f, "transport failure: {}", v),
            Error::HeaderListTooLarge => write!(f, "header list exceeds the transport limit"),
            Error::BodyLargerThanContentLength => {
                write!(f, "attempt to write larger body than content-length")
            }
            Error::TrailersRequireChunked => {
                write!(f, "trailers require transfer-encoding: chunked")
            }
            Error::AbortedStream => write!(f, "request stream aborted"),
            Error::Timeout => write!(f, "request timed out"),
            Error::Cancelled => write!(f, "request cancelled"),
            Error::HttpParseFail(v) => write!(f, "http parse fail: {}", v),
            Error::HttpParseTooManyHeaders => write!(f, "http parse resulted in too many headers"),
        }
    }
}
