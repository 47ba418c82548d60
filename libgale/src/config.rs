//! Options for an ingestion run. Argument parsing belongs to the driver that sits above this
//! crate; this is the already-decoded form.

use crate::error::Result;
use rayon::ThreadPoolBuilder;
use std::num::NonZeroUsize;
use std::path::PathBuf;

pub struct Config {
    /// Files to ingest, in command-line order. Priorities are assigned from this order.
    pub inputs: Vec<PathBuf>,

    pub num_threads: NonZeroUsize,

    /// Prepopulating maps generally slows things down, so is off by default, however it's useful
    /// when profiling, since page faults otherwise show up as slowness in whatever code touches
    /// the mapped bytes first.
    pub prepopulate_maps: bool,
}

impl Config {
    /// Builds the global rayon thread pool. Must be called at most once per process and before
    /// the first call to `ingest`.
    pub fn setup_thread_pool(&self) -> Result {
        ThreadPoolBuilder::new()
            .num_threads(self.num_threads.get())
            .build_global()?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            num_threads: std::thread::available_parallelism()
                .unwrap_or(NonZeroUsize::new(1).unwrap()),
            prepopulate_maps: false,
        }
    }
}
