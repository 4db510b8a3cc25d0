#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

use color_eyre::eyre;
use criterion::{black_box, Criterion};
use memtrace::{Config, DeviceMemory, MemoryTraceGenerator, TraceGenerator, TraceSessions};
use std::sync::Arc;
use trace_model::{ActiveMask, AddressSpace, Dim, ExecutableKernel, Opcode, TraceEvent};

fn vectoradd_events(num_blocks: u32) -> Vec<TraceEvent> {
    let mut events = Vec::new();
    for block in 0..num_blocks {
        let base = 0x1000_0000 + u64::from(block) * 256 * 4;
        for (opcode, offset) in [(Opcode::Ld, 0), (Opcode::Ld, 1 << 20), (Opcode::St, 2 << 20)] {
            let event = TraceEvent::new(
                0x40,
                opcode,
                AddressSpace::Global,
                Dim::new(block, 0, 0),
                ActiveMask::all_active(256),
            )
            .with_accesses((0..256).map(|tid| (base + offset + tid * 4, 4)));
            events.push(event);
        }
    }
    events
}

pub fn run(config: Config, events: &[TraceEvent]) -> eyre::Result<()> {
    let mut kernel = ExecutableKernel::new("vecAdd", "vectoradd.ptx");
    kernel.block_dim = Dim::new(256, 1, 1);
    let mut generator = MemoryTraceGenerator::with_sessions(config, Arc::new(TraceSessions::new()));
    generator.initialize(&kernel, &DeviceMemory::default())?;
    for event in events {
        generator.event(event)?;
    }
    generator.finish()?;
    Ok(())
}

pub fn tracegen_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("tracegen");
    group.sample_size(10);
    group.sampling_mode(criterion::SamplingMode::Flat);

    let dir = tempfile::tempdir().expect("create temp dir");
    let events = vectoradd_events(40);

    for header_only in [true, false] {
        let config = Config {
            header_only,
            database: dir.path().join("database.json"),
            ..Config::default()
        };
        let name = if header_only { "vectoradd/header" } else { "vectoradd/full" };
        group.bench_function(name, |b| {
            b.iter(|| run(config.clone(), black_box(&events)).unwrap());
        });
    }
}

criterion::criterion_group!(benches, tracegen_benchmark);
criterion::criterion_main!(benches);
