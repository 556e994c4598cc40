//! Simulator entry wiring.
//!
//! The simulator's dynamic loader calls a single C-ABI symbol during
//! library initialization, before any simulation object exists, so all this
//! module can do at that point is register two hooks: start-of-sim (resolve
//! the design root, build the engine, run the tests) and end-of-sim (log
//! and tear down). Use the [`testbench!`][crate::testbench] macro to emit
//! the entry symbol for a testbench library.

use std::rc::Rc;

use kairos_gpi::vpi::{self, VpiSimulator};
use kairos_gpi::Simulator;

use crate::config::EnvConfig;
use crate::engine::Engine;
use crate::log::Logger;
use crate::runner::TestFactory;

const LOG: Logger = Logger::new("kairos.entry");

/// Registers the start/end-of-sim hooks for the listed tests.
///
/// Called from the generated `kairos_entry_point` symbol.
pub fn entry_point(tests: Vec<(String, TestFactory)>) {
    if !VpiSimulator::has_registered_impl() {
        LOG.error("no GPI implementation registered");
        return;
    }
    if !vpi::register_start_of_sim(Box::new(move || start_of_sim(tests))) {
        LOG.error("failed to register start-of-sim callback");
        return;
    }
    vpi::register_end_of_sim(Box::new(|| {
        LOG.info("end of simulation");
        Engine::uninstall();
    }));
    LOG.info("entry point registered");
}

fn start_of_sim(tests: Vec<(String, TestFactory)>) {
    LOG.info("start of simulation");
    let config = EnvConfig::from_env();
    let sim: Rc<dyn Simulator> = Rc::new(VpiSimulator::new());
    let root = sim.root_handle(None).or_else(|| {
        config
            .toplevel
            .as_deref()
            .and_then(|name| sim.root_handle(Some(name)))
    });
    let Some(root) = root else {
        LOG.error("failed to resolve the design root");
        return;
    };
    let engine = Engine::new(sim, config);
    engine.set_exit_on_failure(true);
    engine.set_root(root);
    for (name, factory) in tests {
        engine.register_test_case(&name, factory);
    }
    engine.install();
    engine.start_all();
}

/// Emits the C entry point for a testbench library.
///
/// Lists the `async fn(Handle) -> TestResult` tests to run, in order:
///
/// ```ignore
/// kairos_core::testbench!(test_dff, test_dff_post);
/// ```
#[macro_export]
macro_rules! testbench {
    ($($test:ident),+ $(,)?) => {
        #[no_mangle]
        pub extern "C" fn kairos_entry_point() {
            $crate::entry::entry_point(::std::vec![
                $((
                    ::std::string::String::from(::std::stringify!($test)),
                    ::std::rc::Rc::new(|dut: $crate::Handle| -> $crate::TestFuture {
                        ::std::boxed::Box::pin($test(dut))
                    }) as $crate::TestFactory,
                )),+
            ]);
        }
    };
}
