use core::fmt;
use std::error::Error;

/// Returns a [`fmt::Display`] adapter that prints an error and all of its sources,
/// joined with `: `, so a single `tracing::error!` call captures the whole chain.
pub fn err_with_src(e: &(dyn Error + 'static)) -> ErrorWithSources<'_> {
    ErrorWithSources { e }
}

pub struct ErrorWithSources<'a> {
    e: &'a (dyn Error + 'static),
}

impl fmt::Display for ErrorWithSources<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.e)?;

        let mut source = self.e.source();
        while let Some(cause) = source {
            write!(f, ": {cause}")?;
            source = cause.source();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prints_errors_with_sources() {
        let error = Error3(Error2(Error1));

        let display = err_with_src(&error);

        assert_eq!(display.to_string(), "Argh: Failed to do the thing: oh no!");
    }

    #[derive(thiserror::Error, Debug)]
    #[error("oh no!")]
    struct Error1;

    #[derive(thiserror::Error, Debug)]
    #[error("Failed to do the thing")]
    struct Error2(#[source] Error1);

    #[derive(thiserror::Error, Debug)]
    #[error("Argh")]
    struct Error3(#[source] Error2);
}
