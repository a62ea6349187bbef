use core::fmt;

pub type ServerResult<T> = Result<T, ServerError>;

pub type ServerError = ironkdc_error::Error<ServerErrorKind>;

#[non_exhaustive]
#[derive(Debug)]
pub enum ServerErrorKind {
    Io(std::io::Error),
    Config(toml::de::Error),
    InvalidPortSpec(String),
    NoSockets,
    ReplyTooLarge(usize),
}

impl fmt::Display for ServerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(_) => write!(f, "I/O error"),
            Self::Config(_) => write!(f, "configuration parse error"),
            Self::InvalidPortSpec(spec) => write!(f, "invalid port specification `{spec}`"),
            Self::NoSockets => write!(f, "no sockets could be bound"),
            Self::ReplyTooLarge(len) => write!(f, "reply of {len} bytes does not fit a length prefix"),
        }
    }
}

impl std::error::Error for ServerErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::InvalidPortSpec(_) | Self::NoSockets | Self::ReplyTooLarge(_) => None,
        }
    }
}

pub trait ServerErrorExt {
    fn io(context: &'static str, error: std::io::Error) -> Self;
    fn invalid_port(context: &'static str, spec: impl Into<String>) -> Self;
}

impl ServerErrorExt for ServerError {
    fn io(context: &'static str, error: std::io::Error) -> Self {
        Self::new(context, ServerErrorKind::Io(error))
    }

    fn invalid_port(context: &'static str, spec: impl Into<String>) -> Self {
        Self::new(context, ServerErrorKind::InvalidPortSpec(spec.into()))
    }
}
