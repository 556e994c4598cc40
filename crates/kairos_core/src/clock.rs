//! Periodic clock driver.

use kairos_gpi::TimeUnit;

use crate::error::TestResult;
use crate::handle::Handle;
use crate::trigger::Timer;

/// Drives `dut.clk` forever: low for half a period, then high for half.
///
/// Spawn it and discard the join handle when the test body finishes; the
/// inter-test sweep cancels the clock as part of teardown.
///
/// ```ignore
/// let clk = spawn(clock(dut.clone(), 10, TimeUnit::Us));
/// ```
pub async fn clock(dut: Handle, period: u64, unit: TimeUnit) -> TestResult {
    // Lookup once.
    let clk = dut.child("clk");
    let half = period / 2;
    loop {
        clk.set(0);
        Timer::new(half, unit).await;
        clk.set(1);
        Timer::new(half, unit).await;
    }
}
