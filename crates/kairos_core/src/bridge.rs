//! Trigger-token contract for embedded-interpreter scripts.
//!
//! A script engine that wants to cooperate with the scheduler does not get
//! direct access to triggers. Instead it yields [`TriggerToken`] values and
//! receives a [`ResumeValue`] back for each one. [`run_script`] is the
//! native coroutine that drives a [`ScriptSource`]: it translates each
//! token into the corresponding native trigger, awaits it, and feeds the
//! result into the next resume. The interpreter binding itself stays out of
//! this crate; only the token seam is defined here.

use std::cell::Cell;
use std::rc::Rc;

use kairos_gpi::TimeUnit;

use crate::engine::Engine;
use crate::error::{fail, TestResult};
use crate::handle::Handle;
use crate::join::JoinHandle;
use crate::log::Logger;
use crate::trigger::{rising_edge, Timer};

const LOG: Logger = Logger::new("kairos.bridge");

/// Value handed back to the script when an awaited token completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResumeValue {
    /// The token produced no value.
    None,
    /// A 32-bit result from a native operation.
    U32(u32),
}

/// A native operation yielded by a script.
///
/// The script-side binding spawns the operation's coroutine and passes its
/// join handle along with a shared output slot the coroutine fills before
/// returning.
pub struct OpToken {
    join: JoinHandle,
    output: Rc<Cell<Option<u32>>>,
}

impl OpToken {
    /// Pairs a spawned operation with its output slot.
    pub fn new(join: JoinHandle, output: Rc<Cell<Option<u32>>>) -> Self {
        Self { join, output }
    }
}

/// A condition yielded by a script for the native core to await.
pub enum TriggerToken {
    /// Elapsed simulation time: `(delay, unit)`.
    Timer {
        /// Delay magnitude.
        delay: u64,
        /// Unit the delay is expressed in.
        unit: TimeUnit,
    },
    /// A rising edge of the signal at a hierarchical path.
    Edge {
        /// Dotted path below the design root.
        path: String,
    },
    /// A native operation to join.
    Op(OpToken),
}

/// One step of script progress.
pub enum ScriptStep {
    /// The script yielded a token to await.
    Yield(TriggerToken),
    /// The script ran to completion.
    Done,
}

/// The seam an interpreter binding implements.
pub trait ScriptSource {
    /// Resumes the script with the previous token's result and returns its
    /// next step. Script-side errors surface as `Err`.
    fn resume(&mut self, value: ResumeValue) -> Result<ScriptStep, crate::error::TestError>;
}

/// Drives a script to completion, translating tokens into native triggers.
///
/// Edge paths are resolved against `dut`; an unresolvable path fails the
/// script. Operation failures propagate exactly like a native join.
pub async fn run_script<S: ScriptSource>(dut: Handle, mut source: S) -> TestResult {
    let debug = Engine::current().map(|e| e.debug_enabled()).unwrap_or(false);
    let mut value = ResumeValue::None;
    loop {
        match source.resume(value)? {
            ScriptStep::Done => return Ok(()),
            ScriptStep::Yield(token) => {
                value = match token {
                    TriggerToken::Timer { delay, unit } => {
                        if debug {
                            LOG.info(format!("script yielded timer {delay} {unit}"));
                        }
                        Timer::new(delay, unit).await;
                        ResumeValue::None
                    }
                    TriggerToken::Edge { path } => {
                        if debug {
                            LOG.info(format!("script yielded edge on '{path}'"));
                        }
                        let signal = dut.path(&path);
                        if !signal.valid() {
                            return Err(fail(format!(
                                "failed to resolve signal path '{path}'"
                            )));
                        }
                        rising_edge(&signal).await;
                        ResumeValue::None
                    }
                    TriggerToken::Op(op) => {
                        if debug {
                            LOG.info("script yielded a native op");
                        }
                        op.join.await?;
                        match op.output.get() {
                            Some(result) => ResumeValue::U32(result),
                            None => ResumeValue::None,
                        }
                    }
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TestError;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::rc::Weak;
    use std::sync::Arc;
    use std::task::{Context, Poll, Wake, Waker};

    struct NoopWaker;

    impl Wake for NoopWaker {
        fn wake(self: Arc<Self>) {}
    }

    /// Polls a future that is expected to finish without suspending.
    fn poll_once<F: Future>(future: F) -> Poll<F::Output> {
        let waker = Waker::from(Arc::new(NoopWaker));
        let mut cx = Context::from_waker(&waker);
        let mut pinned = Box::pin(future);
        pinned.as_mut().poll(&mut cx)
    }

    struct ScriptedSource {
        steps: VecDeque<Result<ScriptStep, TestError>>,
        seen: Vec<ResumeValue>,
    }

    impl ScriptedSource {
        fn new(steps: Vec<Result<ScriptStep, TestError>>) -> Self {
            Self {
                steps: steps.into(),
                seen: Vec::new(),
            }
        }
    }

    impl ScriptSource for &mut ScriptedSource {
        fn resume(&mut self, value: ResumeValue) -> Result<ScriptStep, TestError> {
            self.seen.push(value);
            self.steps.pop_front().unwrap_or(Ok(ScriptStep::Done))
        }
    }

    fn invalid_dut() -> Handle {
        Handle::invalid(Weak::new())
    }

    #[test]
    fn empty_script_completes() {
        let mut source = ScriptedSource::new(vec![Ok(ScriptStep::Done)]);
        let result = poll_once(run_script(invalid_dut(), &mut source));
        assert!(matches!(result, Poll::Ready(Ok(()))));
        assert_eq!(source.seen, vec![ResumeValue::None]);
    }

    #[test]
    fn zero_delay_timer_tokens_resume_with_none() {
        let mut source = ScriptedSource::new(vec![
            Ok(ScriptStep::Yield(TriggerToken::Timer {
                delay: 0,
                unit: TimeUnit::Ns,
            })),
            Ok(ScriptStep::Yield(TriggerToken::Timer {
                delay: 0,
                unit: TimeUnit::Step,
            })),
            Ok(ScriptStep::Done),
        ]);
        let result = poll_once(run_script(invalid_dut(), &mut source));
        assert!(matches!(result, Poll::Ready(Ok(()))));
        assert_eq!(
            source.seen,
            vec![ResumeValue::None, ResumeValue::None, ResumeValue::None]
        );
    }

    #[test]
    fn script_error_propagates() {
        let mut source = ScriptedSource::new(vec![Err(fail("script raised"))]);
        let result = poll_once(run_script(invalid_dut(), &mut source));
        match result {
            Poll::Ready(Err(e)) => assert_eq!(e.to_string(), "script raised"),
            _ => panic!("expected the script error"),
        }
    }

    #[test]
    fn unresolvable_edge_path_fails_the_script() {
        let mut source = ScriptedSource::new(vec![Ok(ScriptStep::Yield(TriggerToken::Edge {
            path: "u_core.clk".into(),
        }))]);
        let result = poll_once(run_script(invalid_dut(), &mut source));
        match result {
            Poll::Ready(Err(e)) => {
                assert!(e.to_string().contains("u_core.clk"), "error: {e}");
            }
            _ => panic!("expected a path resolution failure"),
        }
    }
}
