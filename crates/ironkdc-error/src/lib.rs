#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

use core::fmt;

/// Anything that can sit underneath an [`Error`], such as an `io::Error` from the principal
/// database loader or a `picky_krb` crypto failure.
pub trait Source: std::error::Error + Sync + Send + 'static {}

impl<T> Source for T where T: std::error::Error + Sync + Send + 'static {}

/// Error shared by the KDC crates.
///
/// The `context` names the operation that failed (`"decode AS-REQ"`, `"load principals"`) and
/// `Kind` is the crate's own enum, e.g. `PduErrorKind` or `HdbErrorKind`. Each crate aliases
/// `Error<Kind>` as its own error type.
#[derive(Debug)]
#[non_exhaustive]
pub struct Error<Kind> {
    /// Operation that failed
    pub context: &'static str,
    /// Crate-specific kind
    pub kind: Kind,
    source: Option<Box<dyn std::error::Error + Sync + Send>>,
}

impl<Kind> Error<Kind> {
    /// Creates an error without a source.
    #[cold]
    #[must_use]
    pub fn new(context: &'static str, kind: Kind) -> Self {
        Self {
            context,
            kind,
            source: None,
        }
    }

    /// Attaches the lower-level error that caused this one.
    #[cold]
    #[must_use]
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: Source,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the crate-specific kind
    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    /// Formats the error with its whole source chain, for `error = %e.report()` log fields.
    pub fn report(&self) -> ErrorReport<'_, Kind> {
        ErrorReport(self)
    }
}

impl<Kind> fmt::Display for Error<Kind>
where
    Kind: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.context, self.kind)
    }
}

impl<Kind> std::error::Error for Error<Kind>
where
    Kind: std::error::Error,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let Some(source) = self.kind.source() {
            Some(source)
        } else {
            // NOTE: Option::as_ref does not coerce the trait object here
            if let Some(e) = &self.source {
                Some(e.as_ref())
            } else {
                None
            }
        }
    }
}

/// Display adapter returned by [`Error::report`].
pub struct ErrorReport<'a, Kind>(&'a Error<Kind>);

impl<Kind> fmt::Display for ErrorReport<'_, Kind>
where
    Kind: std::error::Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use std::error::Error;

        write!(f, "{}", self.0)?;

        let mut next_source = self.0.source();

        while let Some(e) = next_source {
            write!(f, ", caused by: {e}")?;
            next_source = e.source();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum TestKind {
        Broken,
    }

    impl fmt::Display for TestKind {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                TestKind::Broken => write!(f, "broken"),
            }
        }
    }

    impl std::error::Error for TestKind {}

    #[test]
    fn report_walks_the_source_chain() {
        let io = std::io::Error::other("disk on fire");
        let error = Error::new("loading principals", TestKind::Broken).with_source(io);

        assert_eq!(
            error.report().to_string(),
            "[loading principals] broken, caused by: disk on fire"
        );
    }

    #[test]
    fn display_without_source() {
        let error = Error::new("ctx", TestKind::Broken);
        assert_eq!(error.to_string(), "[ctx] broken");
        assert!(std::error::Error::source(&error).is_none());
    }
}
