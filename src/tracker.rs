//! Aggregate many errors into one.

use std::error::Error as StdError;
use std::fmt;

/// Callback invoked for every recorded error.
type ErrorCallback = Box<dyn Fn(&anyhow::Error) + Send + Sync>;

/// Collects errors so a batch of fallible work can be handled as one
/// failure.
///
/// Zero collected errors is not an error: [`ErrorTracker::into_error`]
/// returns `None` for an empty tracker, the lone error for exactly one, and
/// the tracker itself (it implements [`std::error::Error`]) for several.
///
/// ```
/// use kitbag::ErrorTracker;
///
/// let mut tracker = ErrorTracker::new();
/// for path in ["a", "b", "c"] {
///     if let Err(err) = std::fs::remove_file(path) {
///         tracker.add(err.into());
///     }
/// }
/// if let Some(err) = tracker.into_error() {
///     println!("cleanup incomplete: {err}");
/// }
/// ```
#[derive(Default)]
pub struct ErrorTracker {
    errors: Vec<anyhow::Error>,
    callback: Option<ErrorCallback>,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracker pre-loaded with `errors`.
    pub fn from_errors<I>(errors: I) -> Self
    where
        I: IntoIterator<Item = anyhow::Error>,
    {
        let mut tracker = Self::new();
        tracker.extend(errors);
        tracker
    }

    /// Records an error, invoking the callback if one is set.
    pub fn add(&mut self, error: anyhow::Error) {
        if let Some(callback) = &self.callback {
            callback(&error);
        }
        self.errors.push(error);
    }

    /// Records every error in `errors`.
    pub fn extend<I>(&mut self, errors: I)
    where
        I: IntoIterator<Item = anyhow::Error>,
    {
        for error in errors {
            self.add(error);
        }
    }

    /// Merges another tracker's errors into this one, re-invoking this
    /// tracker's callback for each.
    pub fn absorb(&mut self, other: ErrorTracker) {
        self.extend(other.errors);
    }

    /// True if any error has been recorded.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &anyhow::Error> {
        self.errors.iter()
    }

    /// Calls `callback` for every error recorded from now on.
    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: Fn(&anyhow::Error) + Send + Sync + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    /// Collapses the tracker: `None` for zero errors, the error itself for
    /// one, the whole tracker for several.
    pub fn into_error(mut self) -> Option<anyhow::Error> {
        match self.errors.len() {
            0 => None,
            1 => self.errors.pop(),
            _ => Some(anyhow::Error::new(self)),
        }
    }
}

impl fmt::Display for ErrorTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return write!(f, "no errors recorded");
        }
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{i}: {error}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ErrorTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorTracker")
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}

impl StdError for ErrorTracker {}
