//! Settled result of one job.

/// Value-or-failure result of running exactly one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<T, E> {
    /// The job produced a value.
    Value(T),
    /// The job failed.
    Failure(E),
}

impl<T, E> Outcome<T, E> {
    /// Whether the job produced a value.
    #[must_use]
    pub fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    /// Whether the job failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Take the value, discarding a failure.
    pub fn value(self) -> Option<T> {
        match self {
            Self::Value(value) => Some(value),
            Self::Failure(_) => None,
        }
    }

    /// Take the failure, discarding a value.
    pub fn failure(self) -> Option<E> {
        match self {
            Self::Value(_) => None,
            Self::Failure(error) => Some(error),
        }
    }

    /// Borrow the payload.
    pub fn as_ref(&self) -> Outcome<&T, &E> {
        match self {
            Self::Value(value) => Outcome::Value(value),
            Self::Failure(error) => Outcome::Failure(error),
        }
    }

    /// Convert into a `Result`.
    ///
    /// # Errors
    ///
    /// Returns the failure when the job failed.
    pub fn into_result(self) -> Result<T, E> {
        self.into()
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Value(value),
            Err(error) => Self::Failure(error),
        }
    }
}

impl<T, E> From<Outcome<T, E>> for Result<T, E> {
    fn from(outcome: Outcome<T, E>) -> Self {
        match outcome {
            Outcome::Value(value) => Ok(value),
            Outcome::Failure(error) => Err(error),
        }
    }
}
