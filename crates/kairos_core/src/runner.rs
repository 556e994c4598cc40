//! Sequential test execution and reporting.
//!
//! The runner owns the registry of named tests and the per-test records:
//! pass/fail, wall-clock seconds, final simulation time, and the failure
//! message when there is one. Tests run strictly one after another; a
//! failing test never prevents later tests from running.

use std::fs;
use std::io;
use std::path::Path;
use std::rc::Rc;
use std::time::Instant;

use serde::Serialize;

use crate::error::TestError;
use crate::handle::Handle;
use crate::log::Logger;
use crate::task::{Task, TestFuture};

/// Builds a test's top-level coroutine from the design root handle.
pub type TestFactory = Rc<dyn Fn(Handle) -> TestFuture>;

/// The recorded outcome of one test.
#[derive(Debug, Clone, Serialize)]
pub struct TestRecord {
    /// Registered test name.
    pub name: String,
    /// True when the test completed without a failure.
    pub passed: bool,
    /// Simulation time in native ticks when the test finished.
    pub sim_time_steps: u64,
    /// Wall-clock duration of the test in seconds.
    pub wall_secs: f64,
    /// The failure message for a failed test.
    pub error: Option<String>,
}

struct TestCase {
    name: String,
    factory: TestFactory,
}

struct CurrentTest {
    name: String,
    task: Rc<Task>,
    started: Instant,
}

pub(crate) struct TestRunner {
    tests: Vec<TestCase>,
    results: Vec<TestRecord>,
    next_index: usize,
    current: Option<CurrentTest>,
}

impl TestRunner {
    pub(crate) fn new() -> Self {
        Self {
            tests: Vec::new(),
            results: Vec::new(),
            next_index: 0,
            current: None,
        }
    }

    pub(crate) fn register(&mut self, name: &str, factory: TestFactory) {
        self.tests.push(TestCase {
            name: name.to_string(),
            factory,
        });
    }

    pub(crate) fn reset(&mut self) {
        self.results.clear();
        self.next_index = 0;
        self.current = None;
    }

    /// Takes the next test to run: `(name, factory, ordinal, total)`.
    pub(crate) fn take_next(&mut self) -> Option<(String, TestFactory, usize, usize)> {
        let case = self.tests.get(self.next_index)?;
        self.next_index += 1;
        Some((
            case.name.clone(),
            case.factory.clone(),
            self.next_index,
            self.tests.len(),
        ))
    }

    pub(crate) fn begin(&mut self, name: &str, task: Rc<Task>, started: Instant) {
        self.current = Some(CurrentTest {
            name: name.to_string(),
            task,
            started,
        });
    }

    pub(crate) fn current_task(&self) -> Option<Rc<Task>> {
        self.current.as_ref().map(|c| c.task.clone())
    }

    pub(crate) fn current_task_id(&self) -> Option<u64> {
        self.current.as_ref().map(|c| c.task.id())
    }

    pub(crate) fn is_current(&self, task_id: u64) -> bool {
        self.current_task_id() == Some(task_id)
    }

    /// Records the current test's outcome and logs its verdict line.
    pub(crate) fn finish_current(
        &mut self,
        failure: Option<TestError>,
        sim_time_steps: u64,
        log: &Logger,
    ) {
        let Some(current) = self.current.take() else {
            return;
        };
        let wall_secs = current.started.elapsed().as_secs_f64();
        match &failure {
            None => log.info(format!(
                "{} \x1b[32mpassed\x1b[0m  execution time: {wall_secs:.3} s",
                current.name
            )),
            Some(error) => {
                log.info(format!(
                    "{} \x1b[31mfailed\x1b[0m  execution time: {wall_secs:.3} s",
                    current.name
                ));
                log.error(format!("  {error}"));
            }
        }
        self.results.push(TestRecord {
            name: current.name,
            passed: failure.is_none(),
            sim_time_steps,
            wall_secs,
            error: failure.map(|e| e.to_string()),
        });
    }

    /// Records a test whose construction failed before it was scheduled.
    pub(crate) fn record_construction_failure(
        &mut self,
        name: &str,
        started: Instant,
        error: TestError,
        sim_time_steps: u64,
        log: &Logger,
    ) {
        let wall_secs = started.elapsed().as_secs_f64();
        log.info(format!(
            "{name} \x1b[31mfailed\x1b[0m  execution time: {wall_secs:.3} s"
        ));
        log.error(format!("  {error}"));
        self.results.push(TestRecord {
            name: name.to_string(),
            passed: false,
            sim_time_steps,
            wall_secs,
            error: Some(error.to_string()),
        });
    }

    pub(crate) fn results(&self) -> &[TestRecord] {
        &self.results
    }

    pub(crate) fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    /// Prints the summary table. Returns true when every test passed.
    pub(crate) fn report(&self, log: &Logger) -> bool {
        let separator = "*".repeat(78);
        log.info(&separator);
        log.info(format!(
            "** {:<32} {:<8} {:>14}               **",
            "TEST", "STATUS", "REAL TIME (s)"
        ));
        log.info(&separator);

        let mut passed = 0usize;
        let mut failed = 0usize;
        for record in &self.results {
            if record.passed {
                passed += 1;
            } else {
                failed += 1;
            }
            let status = if record.passed {
                "\x1b[32mPASS\x1b[0m"
            } else {
                "\x1b[31mFAIL\x1b[0m"
            };
            log.info(format!(
                "** {:<32} {:<17} {:>14.3}               **",
                record.name, status, record.wall_secs
            ));
            if let Some(error) = &record.error {
                log.error(format!("     {error}"));
            }
        }

        log.info(&separator);
        log.info(format!(
            "** TESTS={} PASS={} FAIL={}",
            passed + failed,
            passed,
            failed
        ));
        log.info(&separator);
        failed == 0
    }

    /// Writes the results as JSON for machine consumption.
    pub(crate) fn write_results(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(&self.results)?;
        fs::write(path, json)
    }
}
