//! AXI-Lite scenarios driven purely through native triggers.

use std::cell::RefCell;
use std::rc::Rc;

use kairos_conformance::Bench;
use kairos_core::{
    rising_edge, spawn, tb_assert, Handle, TestError, TestFuture, TestResult, TimeUnit, Timer,
};
use kairos_gpi::Edge;
use kairos_gpi::Simulator;
use rand::Rng;

/// Write/read master for an AXI-Lite slave, ported to native triggers.
struct AxiLiteDriver {
    dut: Handle,
    clk: Handle,
}

impl AxiLiteDriver {
    fn new(dut: &Handle) -> Self {
        Self {
            dut: dut.clone(),
            clk: dut.child("ACLK"),
        }
    }

    async fn reset(&self) -> TestResult {
        self.dut.child("AWVALID").set(0);
        self.dut.child("WVALID").set(0);
        self.dut.child("BREADY").set(0);
        self.dut.child("ARVALID").set(0);
        self.dut.child("RREADY").set(0);
        rising_edge(&self.clk).await;
        Ok(())
    }

    async fn write(&self, addr: u32, data: u32, wstrb: u32) -> TestResult {
        self.dut.child("AWADDR").set(addr as i64);
        self.dut.child("AWVALID").set(1);
        self.dut.child("WDATA").set(data as i64);
        self.dut.child("WSTRB").set(wstrb as i64);
        self.dut.child("WVALID").set(1);
        loop {
            rising_edge(&self.clk).await;
            if self.dut.child("AWREADY").is_set() && self.dut.child("WREADY").is_set() {
                break;
            }
        }
        self.dut.child("AWVALID").set(0);
        self.dut.child("WVALID").set(0);

        self.dut.child("BREADY").set(1);
        loop {
            rising_edge(&self.clk).await;
            if self.dut.child("BVALID").is_set() {
                break;
            }
        }
        self.dut.child("BREADY").set(0);
        Ok(())
    }

    async fn read(&self, addr: u32) -> Result<u32, TestError> {
        self.dut.child("ARADDR").set(addr as i64);
        self.dut.child("ARVALID").set(1);
        loop {
            rising_edge(&self.clk).await;
            if self.dut.child("ARREADY").is_set() {
                break;
            }
        }
        self.dut.child("ARVALID").set(0);

        self.dut.child("RREADY").set(1);
        let data;
        loop {
            rising_edge(&self.clk).await;
            if self.dut.child("RVALID").is_set() {
                data = self.dut.child("RDATA").get() as u32;
                break;
            }
        }
        self.dut.child("RREADY").set(0);
        Ok(data)
    }
}

/// Free-running clock on `ACLK`.
async fn aclk_driver(dut: Handle) -> TestResult {
    let clk = dut.child("ACLK");
    loop {
        clk.set(0);
        Timer::new(5, TimeUnit::Ns).await;
        clk.set(1);
        Timer::new(5, TimeUnit::Ns).await;
    }
}

/// Builds a bench with a 1 KiB register-file AXI-Lite slave.
fn axil_bench() -> Bench {
    let bench = Bench::new();
    let aclk = bench.signal("ACLK", 0);
    let awaddr = bench.signal("AWADDR", 0);
    let awvalid = bench.signal("AWVALID", 0);
    bench.signal("AWREADY", 1);
    let wdata = bench.signal("WDATA", 0);
    bench.signal("WSTRB", 0);
    let wvalid = bench.signal("WVALID", 0);
    bench.signal("WREADY", 1);
    let bvalid = bench.signal("BVALID", 0);
    let bready = bench.signal("BREADY", 0);
    let araddr = bench.signal("ARADDR", 0);
    let arvalid = bench.signal("ARVALID", 0);
    bench.signal("ARREADY", 1);
    let rdata = bench.signal("RDATA", 0);
    let rvalid = bench.signal("RVALID", 0);
    let rready = bench.signal("RREADY", 0);

    let mem: Rc<RefCell<Vec<i64>>> = Rc::new(RefCell::new(vec![0; 256]));
    bench.process(aclk, Edge::Rising, move |view| {
        // Write channel: capture address and data when both are valid.
        if view.get(awvalid) != 0 && view.get(wvalid) != 0 && view.get(bvalid) == 0 {
            let index = (view.get(awaddr) as usize >> 2) % 256;
            mem.borrow_mut()[index] = view.get(wdata);
            view.set(bvalid, 1);
        } else if view.get(bvalid) != 0 && view.get(bready) != 0 {
            view.set(bvalid, 0);
        }
        // Read channel: present data the cycle after the address handshake.
        if view.get(arvalid) != 0 && view.get(rvalid) == 0 {
            let index = (view.get(araddr) as usize >> 2) % 256;
            let value = mem.borrow()[index];
            view.set(rdata, value);
            view.set(rvalid, 1);
        } else if view.get(rvalid) != 0 && view.get(rready) != 0 {
            view.set(rvalid, 0);
        }
    });
    bench
}

#[test]
fn write_then_read_back() {
    let bench = axil_bench();
    bench.test("axil_simple", |dut: Handle| -> TestFuture {
        Box::pin(async move {
            let _clk = spawn(aclk_driver(dut.clone()));
            let driver = AxiLiteDriver::new(&dut);
            driver.reset().await?;

            driver.write(0x100, 0xDEAD_BEEF, 0xF).await?;
            let read_back = driver.read(0x100).await?;
            tb_assert!(
                read_back == 0xDEAD_BEEF,
                "read back {read_back:#x} from address 0x100"
            );
            Ok(())
        })
    });
    let run = bench.run(100_000_000);
    assert!(run.all_passed(), "{:?}", run.records);
    bench.assert_phase_legality();
}

#[test]
fn randomized_writes_match_a_model() {
    let bench = axil_bench();
    bench.test("axil_random", |dut: Handle| -> TestFuture {
        Box::pin(async move {
            let _clk = spawn(aclk_driver(dut.clone()));
            let driver = AxiLiteDriver::new(&dut);
            driver.reset().await?;

            let mut rng = rand::thread_rng();
            let mut model = vec![0u32; 256];
            for _ in 0..16 {
                let index = rng.gen_range(0..256usize);
                let data: u32 = rng.gen();
                model[index] = data;
                driver.write((index as u32) * 4, data, 0xF).await?;

                let read_index = rng.gen_range(0..256usize);
                let read_back = driver.read((read_index as u32) * 4).await?;
                tb_assert!(
                    read_back == model[read_index],
                    "read back {read_back:#x} from address {:#x}",
                    read_index * 4
                );
            }
            Ok(())
        })
    });
    let run = bench.run(1_000_000_000);
    assert!(run.all_passed(), "{:?}", run.records);
    bench.assert_phase_legality();
}

#[test]
fn sibling_writers_are_both_visible_after_joining() {
    let bench = Bench::new();
    let a = bench.signal("a", 0);
    let b = bench.signal("b", 0);
    bench.test("sibling_writes", |dut: Handle| -> TestFuture {
        Box::pin(async move {
            let first = spawn({
                let sig = dut.child("a");
                async move {
                    sig.set(0xAA);
                    Ok(())
                }
            });
            let second = spawn({
                let sig = dut.child("b");
                async move {
                    sig.set(0x55);
                    Ok(())
                }
            });
            first.await?;
            second.await?;
            tb_assert!(dut.child("a").get() == 0xAA, "first sibling write lost");
            tb_assert!(dut.child("b").get() == 0x55, "second sibling write lost");
            Ok(())
        })
    });
    let run = bench.run(1_000_000);
    assert!(run.all_passed(), "{:?}", run.records);
    // The writes reached the simulator, not just the pending queue.
    assert_eq!(bench.sim.signal_value(a), 0xAA);
    assert_eq!(bench.sim.signal_value(b), 0x55);
    bench.assert_phase_legality();
}
