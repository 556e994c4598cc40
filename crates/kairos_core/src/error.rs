//! Test failure types.
//!
//! A coroutine ends either cleanly or with a [`TestError`] that the
//! scheduler stores in the task frame. The error surfaces at a structural
//! join point: the joining awaiter receives it on resume, or the test
//! runner records it as the test's failure.

use std::any::Any;

/// The outcome type of every test and task coroutine.
pub type TestResult = Result<(), TestError>;

/// Why a coroutine terminated abnormally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TestError {
    /// An assertion or explicit failure raised by test code.
    #[error("{0}")]
    Failure(String),

    /// A panic caught at the scheduler's poll boundary.
    #[error("coroutine panicked: {0}")]
    Panicked(String),
}

/// Builds a [`TestError::Failure`] from a message.
pub fn fail(message: impl Into<String>) -> TestError {
    TestError::Failure(message.into())
}

/// Fails the enclosing coroutine unless `cond` holds.
///
/// Expands to an early `return Err(..)`, so it is only usable inside a
/// function returning [`TestResult`].
#[macro_export]
macro_rules! tb_assert {
    ($cond:expr) => {
        if !$cond {
            return Err($crate::TestError::Failure(format!(
                "assertion failed: {}",
                stringify!($cond)
            )));
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::TestError::Failure(format!(
                "assertion failed: {}",
                format_args!($($arg)+)
            )));
        }
    };
}

/// Extracts a printable message from a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
