//! Ordering and lifetime properties of the scheduler.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use kairos_conformance::Bench;
use kairos_core::{
    clock, fail, rising_edge, sim_time, spawn, tb_assert, Handle, JoinHandle, TestFuture,
    TestResult, TimeUnit, Timer,
};
use kairos_gpi::Simulator;

#[test]
fn write_before_resume_with_zero_delay() {
    let bench = Bench::new();
    bench.signal("h", 0);
    bench.test("p1_zero", |dut: Handle| -> TestFuture {
        Box::pin(async move {
            let h = dut.child("h");
            h.set(42);
            Timer::steps(0).await;
            tb_assert!(h.get() == 42, "read after zero delay saw {}", h.get());
            Ok(())
        })
    });
    let run = bench.run(1_000_000);
    assert!(run.all_passed(), "{:?}", run.records);
    bench.assert_phase_legality();
}

#[test]
fn write_before_resume_with_positive_delay() {
    let bench = Bench::new();
    let h = bench.signal("h", 0);
    bench.test("p1_positive", |dut: Handle| -> TestFuture {
        Box::pin(async move {
            let h = dut.child("h");
            h.set(7);
            Timer::new(10, TimeUnit::Ns).await;
            tb_assert!(h.get() == 7, "read after 10 ns saw {}", h.get());
            Ok(())
        })
    });
    let run = bench.run(1_000_000);
    assert!(run.all_passed(), "{:?}", run.records);
    // The deferred write reached the simulator itself, not just the queue.
    assert_eq!(bench.sim.signal_value(h), 7);
    bench.assert_phase_legality();
}

#[test]
fn fifo_resumption_on_a_shared_edge() {
    let bench = Bench::new();
    bench.signal("clk", 0);
    let order: Rc<RefCell<Vec<char>>> = Rc::new(RefCell::new(Vec::new()));
    let observed = order.clone();
    bench.test("p2_fifo", move |dut: Handle| -> TestFuture {
        let order = observed.clone();
        Box::pin(async move {
            let clk = dut.child("clk");
            let first = spawn({
                let order = order.clone();
                let clk = clk.clone();
                async move {
                    rising_edge(&clk).await;
                    order.borrow_mut().push('a');
                    Ok(())
                }
            });
            let second = spawn({
                let order = order.clone();
                let clk = clk.clone();
                async move {
                    rising_edge(&clk).await;
                    order.borrow_mut().push('b');
                    Ok(())
                }
            });
            let _clk = spawn(clock(dut.clone(), 10, TimeUnit::Ns));
            first.await?;
            second.await?;
            tb_assert!(
                *order.borrow() == vec!['a', 'b'],
                "resumption order was {:?}",
                order.borrow()
            );
            Ok(())
        })
    });
    let run = bench.run(1_000_000);
    assert!(run.all_passed(), "{:?}", run.records);
    assert_eq!(*order.borrow(), vec!['a', 'b']);
    bench.assert_phase_legality();
}

#[test]
fn join_observes_the_childs_writes() {
    let bench = Bench::new();
    let h = bench.signal("h", 0);
    bench.test("p3_join", |dut: Handle| -> TestFuture {
        Box::pin(async move {
            let h = dut.child("h");
            let child = spawn({
                let h = h.clone();
                async move {
                    Timer::new(1, TimeUnit::Ns).await;
                    h.set(7);
                    Ok(())
                }
            });
            child.await?;
            tb_assert!(h.get() == 7, "joiner read {} from h", h.get());
            Ok(())
        })
    });
    let run = bench.run(1_000_000);
    assert!(run.all_passed(), "{:?}", run.records);
    assert_eq!(bench.sim.signal_value(h), 7);
    bench.assert_phase_legality();
}

async fn count_forever(iterations: Rc<Cell<u32>>) -> kairos_core::TestResult {
    loop {
        Timer::new(1, TimeUnit::Ns).await;
        iterations.set(iterations.get() + 1);
    }
}

#[test]
fn dropping_a_join_handle_cancels_the_child() {
    let bench = Bench::new();
    let iterations = Rc::new(Cell::new(0u32));
    let observed = iterations.clone();
    bench.test("p4_cancel", move |_dut: Handle| -> TestFuture {
        let iterations = observed.clone();
        Box::pin(async move {
            let child = spawn(count_forever(iterations.clone()));
            Timer::new(5, TimeUnit::Ns).await;
            drop(child);
            let seen = iterations.get();
            Timer::new(20, TimeUnit::Ns).await;
            tb_assert!(
                iterations.get() == seen,
                "cancelled child kept running: {} -> {}",
                seen,
                iterations.get()
            );
            Ok(())
        })
    });
    let run = bench.run(1_000_000);
    assert!(run.all_passed(), "{:?}", run.records);
    bench.assert_phase_legality();
}

#[test]
fn timer_units_convert_to_precision_ticks() {
    let bench = Bench::new();
    bench.test("p6_units", |_dut: Handle| -> TestFuture {
        Box::pin(async move {
            let start = sim_time();
            Timer::new(1, TimeUnit::Ns).await;
            tb_assert!(
                sim_time() == start + 1_000,
                "1 ns advanced {} ticks",
                sim_time() - start
            );
            let mid = sim_time();
            Timer::new(10, TimeUnit::Us).await;
            tb_assert!(
                sim_time() == mid + 10_000_000,
                "10 us advanced {} ticks",
                sim_time() - mid
            );
            Ok(())
        })
    });
    let run = bench.run(1_000_000_000);
    assert!(run.all_passed(), "{:?}", run.records);
    assert_eq!(run.final_time, 10_001_000);
    bench.assert_phase_legality();
}

/// Issues exactly one poll to a shared join handle, reporting `None` when
/// the handle is still pending.
struct PollOnce {
    handle: Rc<RefCell<JoinHandle>>,
}

impl Future for PollOnce {
    type Output = Option<TestResult>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut handle = self.handle.borrow_mut();
        match Pin::new(&mut *handle).poll(cx) {
            Poll::Ready(result) => Poll::Ready(Some(result)),
            Poll::Pending => Poll::Ready(None),
        }
    }
}

#[test]
fn second_joiner_is_rejected_while_the_first_is_pending() {
    let bench = Bench::new();
    bench.test("p8_double_join", |_dut: Handle| -> TestFuture {
        Box::pin(async move {
            let child = spawn(async move {
                Timer::new(5, TimeUnit::Ns).await;
                Ok(())
            });
            let shared = Rc::new(RefCell::new(child));

            // First poll installs this test as the child's join waiter
            // without completing the join.
            let first = (PollOnce {
                handle: shared.clone(),
            })
            .await;
            tb_assert!(first.is_none(), "the child must still be running");

            // A sibling polling the same handle must be rejected, not
            // installed as a second waiter.
            let sibling = spawn({
                let shared = shared.clone();
                async move {
                    match (PollOnce { handle: shared }).await {
                        Some(Err(e)) => {
                            tb_assert!(
                                e.to_string().contains("already being joined"),
                                "unexpected rejection: {e}"
                            );
                            Ok(())
                        }
                        Some(Ok(())) => Err(fail("second join resolved instead of failing")),
                        None => Err(fail("second join was left pending")),
                    }
                }
            });
            sibling.await?;

            // The child's completion still resumes this test through the
            // recorded waiter; no frame is freed twice.
            Timer::new(20, TimeUnit::Ns).await;
            Ok(())
        })
    });
    let run = bench.run(1_000_000);
    assert!(run.all_passed(), "{:?}", run.records);
    bench.assert_phase_legality();
}

#[test]
fn joining_an_already_finished_task_uses_the_recorded_result() {
    let bench = Bench::new();
    bench.signal("h", 0);
    bench.test("p8_late_join", |dut: Handle| -> TestFuture {
        Box::pin(async move {
            let h = dut.child("h");
            let quick = spawn({
                let h = h.clone();
                async move {
                    h.set(3);
                    Ok(())
                }
            });
            let failing = spawn(async move { Err(fail("recorded failure")) });
            // Let both children finish long before anyone joins them.
            Timer::new(5, TimeUnit::Ns).await;
            quick.await?;
            tb_assert!(h.get() == 3, "late join lost the child's write");
            match failing.await {
                Err(e) => tb_assert!(e.to_string() == "recorded failure"),
                Ok(()) => return Err(fail("expected the recorded failure")),
            }
            Ok(())
        })
    });
    let run = bench.run(1_000_000);
    assert!(run.all_passed(), "{:?}", run.records);
    bench.assert_phase_legality();
}
