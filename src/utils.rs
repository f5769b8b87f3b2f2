use std::time::{Duration, Instant};

/// Error type for polling operations
#[derive(Debug)]
pub enum PollError<E> {
    /// Error occurred in the polled operation
    ConditionError(E),
}

impl<E> std::fmt::Display for PollError<E>
where
    E: std::fmt::Display,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollError::ConditionError(e) => write!(f, "Condition error: {}", e),
        }
    }
}

impl<E> std::error::Error for PollError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PollError::ConditionError(e) => Some(e),
        }
    }
}

/// Poll an operation until it yields a value or a monotonic deadline passes.
///
/// `operation` returns `Ok(Some(T))` when done and `Ok(None)` to keep
/// polling. Between unproductive calls the thread sleeps for `poll_interval`,
/// clipped so the deadline is never overshot by more than one call.
///
/// # Returns
/// * `Ok(Some(T))` when the operation completes
/// * `Ok(None)` when the deadline passes first
/// * `Err(PollError::ConditionError(e))` when the operation fails
///
/// # Example
/// ```
/// use std::time::{Duration, Instant};
/// use sxm_remote::utils::poll_until_deadline;
///
/// let mut attempts = 0;
/// let result = poll_until_deadline(
///     || {
///         attempts += 1;
///         Ok::<_, ()>((attempts >= 3).then_some(attempts))
///     },
///     Instant::now() + Duration::from_secs(1),
///     Duration::from_millis(1),
/// );
/// assert_eq!(result.unwrap(), Some(3));
/// ```
pub fn poll_until_deadline<F, T, E>(
    mut operation: F,
    deadline: Instant,
    poll_interval: Duration,
) -> Result<Option<T>, PollError<E>>
where
    F: FnMut() -> Result<Option<T>, E>,
{
    loop {
        match operation() {
            Ok(Some(result)) => return Ok(Some(result)),
            Ok(None) => {}
            Err(e) => return Err(PollError::ConditionError(e)),
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        std::thread::sleep(poll_interval.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_success() {
        let mut count = 0;
        let result = poll_until_deadline(
            || {
                count += 1;
                if count >= 3 {
                    Ok::<Option<i32>, &str>(Some(count))
                } else {
                    Ok(None)
                }
            },
            Instant::now() + Duration::from_millis(500),
            Duration::from_millis(1),
        );

        assert_eq!(result.unwrap(), Some(3));
    }

    #[test]
    fn test_poll_timeout() {
        let start = Instant::now();
        let result = poll_until_deadline(
            || Ok::<Option<()>, &str>(None),
            start + Duration::from_millis(30),
            Duration::from_millis(5),
        );

        assert_eq!(result.unwrap(), None);
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_poll_runs_once_even_past_deadline() {
        let mut calls = 0;
        let result = poll_until_deadline(
            || {
                calls += 1;
                Ok::<Option<u8>, &str>(Some(7))
            },
            Instant::now(),
            Duration::from_millis(1),
        );
        assert_eq!(result.unwrap(), Some(7));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_poll_error() {
        let result = poll_until_deadline(
            || Err::<Option<()>, &str>("test error"),
            Instant::now() + Duration::from_millis(100),
            Duration::from_millis(10),
        );

        assert!(matches!(result, Err(PollError::ConditionError("test error"))));
    }
}
