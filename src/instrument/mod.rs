pub mod counter;
pub mod device;
pub mod pass;
pub mod report;

pub use counter::{CounterBuffer, CounterLayout};
pub use device::{Device, DevicePtr, EmulatedDevice};
pub use pass::{BasicBlockPass, ProfilingMode};
pub use report::{BlockCounters, Report};

use crate::{cfg::Module, config::Config};
use itertools::iproduct;
use trace_model::Dim;

/// Step of the counter buffer setup that failed.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum AllocationStage {
    Malloc,
    Memset,
    BindSymbol,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no basic block profiling mode configured")]
    MissingMode,

    #[error("no instrumentation pass created")]
    MissingPass,

    #[error("unknown kernel {name:?}")]
    UnknownKernel { name: String },

    #[error("failed to set up counter buffer ({stage})")]
    Allocation {
        stage: AllocationStage,
        source: device::Error,
    },

    #[error("counter buffer of {layout:?} exceeds the addressable size")]
    BufferTooLarge { layout: CounterLayout },

    #[error("counter buffer is not allocated")]
    NotInitialized,

    #[error("failed to read back counters")]
    Readback(#[source] device::Error),

    #[error("failed to release counter buffer")]
    Release(#[source] device::Error),

    #[error("failed to write report")]
    Report(#[source] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reduced counters of one profiled kernel.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KernelProfile {
    /// Executions per basic block.
    pub execution_counts: Vec<u64>,
    /// Memory operations per basic block, if recorded.
    pub memory_operations: Option<Vec<u64>>,
}

impl KernelProfile {
    /// Sums the counters of every basic block over all thread blocks and threads.
    ///
    /// The first slot of every thread holds executions, the second one
    /// memory operations if `memory_operations` is set.
    #[must_use]
    pub fn reduce(counters: &[u64], layout: &CounterLayout, memory_operations: bool) -> Self {
        let counter = |idx: usize| counters.get(idx).copied().unwrap_or(0);
        let mut execution_counts = vec![0; layout.basic_blocks];
        let mut memory = memory_operations.then(|| vec![0; layout.basic_blocks]);

        let indices = iproduct!(
            0..layout.thread_blocks,
            0..layout.basic_blocks,
            0..layout.threads
        );
        for (thread_block, block, thread) in indices {
            let idx = layout.index(thread_block, block, thread, 0);
            execution_counts[block] += counter(idx);
            if let Some(memory) = memory.as_mut() {
                memory[block] += counter(idx + 1);
            }
        }
        Self {
            execution_counts,
            memory_operations: memory,
        }
    }
}

/// Profiles the basic blocks of a kernel with device resident counters.
///
/// The instrumentor is driven through its phases in order:
/// [`check_conditions`](Self::check_conditions),
/// [`analyze`](Self::analyze), [`create_pass`](Self::create_pass),
/// [`initialize`](Self::initialize), running the instrumented kernel and
/// finally [`extract_results`](Self::extract_results).
#[derive(Debug)]
pub struct BasicBlockInstrumentor<D>
where
    D: Device,
{
    device: D,
    kernel_name: Option<String>,
    mode: Option<ProfilingMode>,
    pass: Option<BasicBlockPass>,
    conditions_met: bool,
    report_name: String,
    basic_blocks: usize,
    labels: Vec<String>,
    thread_blocks: u64,
    threads: u64,
    buffer: CounterBuffer,
    profile: KernelProfile,
}

impl<D> BasicBlockInstrumentor<D>
where
    D: Device,
{
    pub fn new(device: D, config: &Config) -> Self {
        Self {
            device,
            kernel_name: config.kernel_name.clone(),
            mode: config.mode,
            pass: None,
            conditions_met: false,
            report_name: String::new(),
            basic_blocks: 0,
            labels: Vec::new(),
            thread_blocks: 0,
            threads: 0,
            buffer: CounterBuffer::default(),
            profile: KernelProfile::default(),
        }
    }

    /// Sets the launch configuration of the profiled kernel.
    pub fn set_launch(&mut self, grid: &Dim, block: &Dim) {
        self.thread_blocks = grid.size();
        self.threads = block.size();
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn check_conditions(&mut self) -> bool {
        self.conditions_met = true;
        self.conditions_met
    }

    #[must_use]
    pub fn conditions_met(&self) -> bool {
        self.conditions_met
    }

    /// Counts the instrumentable basic blocks and records their labels.
    ///
    /// Only the configured kernel is analyzed, or every kernel of the module
    /// if none is configured. Labels are then prefixed by the kernel name.
    pub fn analyze(&mut self, module: &Module) -> Result<(), Error> {
        self.labels.clear();
        self.basic_blocks = 0;
        self.report_name.clear();
        match &self.kernel_name {
            Some(name) => {
                let kernel = module.kernel(name).ok_or_else(|| Error::UnknownKernel {
                    name: name.clone(),
                })?;
                self.basic_blocks = kernel.cfg.num_basic_blocks();
                self.labels.extend(kernel.cfg.labels().map(str::to_string));
                self.report_name = name.clone();
            }
            None => {
                self.basic_blocks = module
                    .kernels
                    .values()
                    .map(|kernel| kernel.cfg.num_basic_blocks())
                    .sum();
                for kernel in module.kernels.values() {
                    self.labels.extend(
                        kernel
                            .cfg
                            .labels()
                            .map(|label| format!("{}/{label}", kernel.name)),
                    );
                }
                self.report_name = module.path.clone();
            }
        }
        log::debug!(
            "found {} basic blocks in {}",
            self.basic_blocks,
            self.report_name
        );
        Ok(())
    }

    /// Selects the pass of the configured profiling mode.
    pub fn create_pass(&mut self) -> Result<BasicBlockPass, Error> {
        let mode = self.mode.ok_or(Error::MissingMode)?;
        let pass = BasicBlockPass::for_mode(mode);
        self.pass = Some(pass);
        Ok(pass)
    }

    #[must_use]
    pub fn pass(&self) -> Option<BasicBlockPass> {
        self.pass
    }

    #[must_use]
    pub fn description(&self) -> &'static str {
        self.pass
            .unwrap_or(BasicBlockPass::ExecutionCount)
            .description()
    }

    #[must_use]
    pub fn basic_blocks(&self) -> usize {
        self.basic_blocks
    }

    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    #[must_use]
    pub fn layout(&self) -> Option<CounterLayout> {
        let pass = self.pass?;
        Some(CounterLayout {
            entries: pass.entries(),
            basic_blocks: self.basic_blocks,
            thread_blocks: usize::try_from(self.thread_blocks).unwrap_or(usize::MAX),
            threads: usize::try_from(self.threads).unwrap_or(usize::MAX),
        })
    }

    /// Device address of the counter buffer while it is allocated.
    #[must_use]
    pub fn counters(&self) -> Option<DevicePtr> {
        self.buffer.ptr()
    }

    /// Allocates the zeroed counter buffer and binds it to the counter symbol of the pass.
    pub fn initialize(&mut self) -> Result<(), Error> {
        let pass = self.pass.ok_or(Error::MissingPass)?;
        let layout = self.layout().ok_or(Error::MissingPass)?;
        self.buffer
            .allocate(&self.device, layout, pass.counter_symbol())
    }

    /// Reads back and reduces the counters and writes the report to `out`.
    ///
    /// Returns the raw counters.
    pub fn extract_results(&mut self, out: impl std::io::Write) -> Result<Vec<u64>, Error> {
        let pass = self.pass.ok_or(Error::MissingPass)?;
        let layout = self.buffer.layout().ok_or(Error::NotInitialized)?;
        let counters = self.buffer.read_back(&self.device)?;

        self.profile =
            KernelProfile::reduce(&counters, &layout, pass.records_memory_operations());
        let report = self.report();
        report.write_json(out)?;
        log::info!(
            "profiled {} basic blocks of {}",
            report.counters.len(),
            report.kernel
        );
        Ok(counters)
    }

    #[must_use]
    pub fn profile(&self) -> &KernelProfile {
        &self.profile
    }

    /// Report of the most recently extracted results.
    #[must_use]
    pub fn report(&self) -> Report {
        let counters = self
            .labels
            .iter()
            .enumerate()
            .map(|(block, label)| {
                let counters = BlockCounters {
                    executions: self
                        .profile
                        .execution_counts
                        .get(block)
                        .copied()
                        .unwrap_or(0),
                    memory_operations: self
                        .profile
                        .memory_operations
                        .as_ref()
                        .map(|memory| memory.get(block).copied().unwrap_or(0)),
                };
                (label.clone(), counters)
            })
            .collect();
        Report {
            kernel: self.report_name.clone(),
            thread_blocks: self.thread_blocks,
            threads: self.threads,
            counters,
        }
    }

    /// Releases the counter buffer without reading it back.
    pub fn finalize(&mut self) -> Result<(), Error> {
        self.buffer.release(&self.device).map_err(Error::Release)
    }
}

impl<D> Drop for BasicBlockInstrumentor<D>
where
    D: Device,
{
    fn drop(&mut self) {
        if let Err(err) = self.finalize() {
            log::warn!("{err}");
        }
    }
}
