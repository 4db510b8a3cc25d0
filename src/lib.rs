#![allow(
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::module_name_repetitions
)]

pub mod allocation;
pub mod cfg;
pub mod coalesce;
pub mod config;
pub mod database;
pub mod event;
pub mod extent;
pub mod header;
pub mod instrument;
pub mod session;
pub mod stream;
pub mod tracegen;

pub use allocation::{Allocations, DeviceMemory};
pub use config::Config;
pub use database::{TraceDatabase, TraceEntry};
pub use event::{Access, Event};
pub use extent::extent;
pub use header::Header;
pub use instrument::{BasicBlockInstrumentor, ProfilingMode};
pub use session::TraceSessions;
pub use stream::{StreamReader, TraceStream};
pub use tracegen::{MemoryTraceGenerator, TraceGenerator, TraceGenerators};

pub use trace_model as model;

#[cfg(test)]
pub mod tests {
    static INIT: std::sync::Once = std::sync::Once::new();

    pub fn init_test() {
        INIT.call_once(|| {
            env_logger::builder().is_test(true).init();
            color_eyre::install().unwrap();
        });
    }
}
