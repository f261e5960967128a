use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{self, Display, Formatter};

use crate::BoxedError;

/// Type erased, serializable error which retains the error chain information
///
/// Connection failures are observed by every caller that was waiting on the same
/// connection attempt, so the error has to be cloneable. It is also what ends up in the
/// JSON body handed to HTTP clients, where the original error types are meaningless.
///
/// When the Error from which this is created contains another BlackboxError in its
/// source chain, it will be consumed and integrated so that one flat list of causes
/// is available at the top-most level.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct BlackboxError {
    causes: Vec<String>,
}

impl BlackboxError {
    /// Creates a new instance from any error type
    ///
    /// Due to std providing default implementations for the `From<T> where T: T` trait,
    /// we can't both implement `Error` and `From<Error>` and have to decide on one.
    pub fn new<E: Error + 'static>(e: E) -> Self {
        (&e as &(dyn Error + 'static)).into()
    }

    /// Creates a new instance from a boxed error type
    pub fn from_boxed(e: BoxedError) -> Self {
        (e.as_ref() as &(dyn Error + 'static)).into()
    }

    /// Creates a new instance with a single cause
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            causes: vec![message.into()],
        }
    }

    /// List of causes, outermost first
    pub fn causes(&self) -> &[String] {
        &self.causes
    }

    /// Consumes the error and returns the underlying list of causes
    pub fn into_causes(self) -> Vec<String> {
        self.causes
    }
}

impl Error for BlackboxError {}

impl Display for BlackboxError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.causes.split_first() {
            None => write!(f, "unknown error"),
            Some((first, rest)) => {
                write!(f, "{}", first)?;
                for cause in rest {
                    write!(f, ": {}", cause)?;
                }
                Ok(())
            }
        }
    }
}

impl From<&(dyn Error + 'static)> for BlackboxError {
    fn from(e: &(dyn Error + 'static)) -> Self {
        let mut source: Option<&(dyn Error + 'static)> = Some(e);
        let mut causes: Vec<String> = Vec::new();

        while let Some(error) = source {
            // Integrate any child BlackboxErrors and use ToString for anything else
            if let Some(blackbox_error) = error.downcast_ref::<BlackboxError>() {
                causes.extend(blackbox_error.causes.iter().cloned());
            } else {
                causes.push(error.to_string());
            }

            source = error.source();
        }

        Self { causes }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;
    use thiserror::Error;

    #[derive(Error, Debug)]
    enum TestError {
        #[error("connection refused")]
        Refused(#[from] BlackboxError),
    }

    #[test]
    fn handle_no_cause() {
        let error = BlackboxError { causes: Vec::new() };
        assert_eq!(error.to_string(), "unknown error");
    }

    #[test]
    fn consume_nested() {
        let lower = BlackboxError {
            causes: vec![String::from("io error"), String::from("broken pipe")],
        };
        let middle = TestError::from(lower);
        let high = BlackboxError::new(middle);

        assert_eq!(
            high.into_causes(),
            vec!["connection refused", "io error", "broken pipe"]
        )
    }

    #[test]
    fn format_on_one_line() {
        let formatted = BlackboxError {
            causes: vec![
                String::from("unable to connect"),
                String::from("timed out"),
            ],
        }
        .to_string();

        assert_eq!(formatted, "unable to connect: timed out")
    }

    #[test]
    fn serialize_causes() {
        let error = BlackboxError::from_message("no reply");
        let serialized = serde_json::to_string(&error).unwrap();

        assert_eq!(serialized, r#"{"causes":["no reply"]}"#);
    }
}
