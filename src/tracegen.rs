use crate::{
    coalesce::SegmentEstimator,
    config::Config,
    database::{self, TraceEntry},
    event::{Access, Event, TEXTURE_COMPONENTS},
    extent,
    header::{self, Header},
    session::{SessionPaths, TraceSessions},
    stream::{self, TraceStream},
};
use std::path::PathBuf;
use std::sync::Arc;
use trace_model::{ActiveMask, AddressSpace, ExecutableKernel, MemoryContext, TraceEvent};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to open trace {path:?}")]
    OpenTrace {
        path: PathBuf,
        source: utils::fs::Error,
    },

    #[error("failed to open header {path:?}")]
    OpenHeader {
        path: PathBuf,
        source: utils::fs::Error,
    },

    #[error(transparent)]
    Encode(#[from] stream::Error),

    #[error(transparent)]
    Database(#[from] database::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("trace generator is not initialized")]
    NotInitialized,
}

/// Observer of the dynamic instructions of a kernel launch.
///
/// The emulator calls `initialize` once per launch, followed by `event` and
/// `post_event` for every dynamic instruction in a total order, and `finish`
/// once the kernel completed.
pub trait TraceGenerator {
    type Error;

    /// Prepares for a new launch of `kernel`.
    fn initialize(
        &mut self,
        kernel: &ExecutableKernel,
        memory: &dyn MemoryContext,
    ) -> Result<(), Self::Error>;

    /// Called before the instruction of `event` is committed.
    fn event(&mut self, event: &TraceEvent) -> Result<(), Self::Error>;

    /// Called after the instruction of `event` is committed.
    fn post_event(&mut self, _event: &TraceEvent) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Called once the kernel completed.
    fn finish(&mut self) -> Result<(), Self::Error>;
}

/// Generators attached to a kernel, called in registration order.
pub struct TraceGenerators<E> {
    generators: Vec<Box<dyn TraceGenerator<Error = E>>>,
}

impl<E> Default for TraceGenerators<E> {
    fn default() -> Self {
        Self {
            generators: Vec::new(),
        }
    }
}

impl<E> std::fmt::Debug for TraceGenerators<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceGenerators")
            .field("len", &self.generators.len())
            .finish()
    }
}

impl<E> TraceGenerators<E> {
    pub fn push(&mut self, generator: impl TraceGenerator<Error = E> + 'static) {
        self.generators.push(Box::new(generator));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.generators.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }
}

impl<E> TraceGenerator for TraceGenerators<E> {
    type Error = E;

    fn initialize(
        &mut self,
        kernel: &ExecutableKernel,
        memory: &dyn MemoryContext,
    ) -> Result<(), E> {
        self.generators
            .iter_mut()
            .try_for_each(|generator| generator.initialize(kernel, memory))
    }

    fn event(&mut self, event: &TraceEvent) -> Result<(), E> {
        self.generators
            .iter_mut()
            .try_for_each(|generator| generator.event(event))
    }

    fn post_event(&mut self, event: &TraceEvent) -> Result<(), E> {
        self.generators
            .iter_mut()
            .try_for_each(|generator| generator.post_event(event))
    }

    fn finish(&mut self) -> Result<(), E> {
        self.generators
            .iter_mut()
            .try_for_each(|generator| generator.finish())
    }
}

/// Thread ids of the compacted accesses of an instruction.
///
/// The i-th access belongs to the i-th active thread.
/// Inactive threads are skipped up to `thread_count`.
fn active_thread_ids(active: &ActiveMask, thread_count: u32) -> impl Iterator<Item = u32> + '_ {
    let mut thread_id = 0;
    std::iter::from_fn(move || {
        while thread_id < thread_count && !active.is_active(thread_id as usize) {
            thread_id += 1;
        }
        let current = thread_id;
        thread_id += 1;
        Some(current)
    })
}

#[derive(Debug)]
struct Session {
    entry: TraceEntry,
    database: PathBuf,
    trace: TraceStream,
    header: TraceStream,
}

/// Records the memory accesses of kernel launches.
///
/// Every launch produces a pair of files: a trace body with one [`Event`]
/// per load, store and texture instruction and a header with the
/// aggregated [`Header`].
#[derive(Debug)]
pub struct MemoryTraceGenerator {
    config: Config,
    sessions: Arc<TraceSessions>,
    session: Option<Session>,
    header: Header,
}

impl MemoryTraceGenerator {
    /// Generator sharing the process-wide launch counter.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_sessions(config, TraceSessions::global())
    }

    #[must_use]
    pub fn with_sessions(config: Config, sessions: Arc<TraceSessions>) -> Self {
        Self {
            config,
            sessions,
            session: None,
            header: Header::default(),
        }
    }

    /// Header of the current or most recent launch.
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Database entry of the open session.
    #[must_use]
    pub fn entry(&self) -> Option<&TraceEntry> {
        self.session.as_ref().map(|session| &session.entry)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    fn open_session(&self, kernel: &ExecutableKernel) -> Result<Session, Error> {
        let launch_id = self.sessions.next_launch_id();
        let trace_dir = utils::fs::absolute(self.config.trace_dir()).map_err(|source| {
            Error::OpenTrace {
                path: self.config.trace_dir().to_path_buf(),
                source,
            }
        })?;
        let database = trace_dir.join(self.config.database.file_name().unwrap_or_default());
        let paths = SessionPaths::new(&trace_dir, &kernel.name, header::FORMAT, launch_id);

        utils::fs::create_dirs(&trace_dir).map_err(|source| Error::OpenTrace {
            path: paths.trace.clone(),
            source,
        })?;
        let trace = TraceStream::create(&paths.trace).map_err(|source| Error::OpenTrace {
            path: paths.trace.clone(),
            source,
        })?;
        let header = TraceStream::create(&paths.header).map_err(|source| Error::OpenHeader {
            path: paths.header.clone(),
            source,
        })?;

        log::debug!(
            "opened trace session {launch_id} for kernel {}: {}",
            kernel.name,
            paths.trace.display()
        );
        Ok(Session {
            entry: TraceEntry {
                name: kernel.name.clone(),
                module: kernel.module_path.clone(),
                format: header::FORMAT.to_string(),
                path: paths.trace,
                header: paths.header,
            },
            database,
            trace,
            header,
        })
    }

    /// Walks the compacted accesses of `event`.
    ///
    /// Every access is accounted in the header and, unless only the header is
    /// recorded, replicated `replicas` times into a new event.
    fn record(
        &mut self,
        event: &TraceEvent,
        address_space: AddressSpace,
        replicas: usize,
    ) -> Result<(), Error> {
        let Self {
            config,
            session,
            header,
            ..
        } = self;
        let session = session.as_mut().ok_or(Error::NotInitialized)?;

        let mut recorded = (!config.header_only).then(|| Event::new(event, address_space));
        let mut estimator = SegmentEstimator::new(header.half_warp_size);
        let mut bytes = 0;

        let thread_ids = active_thread_ids(&event.active, header.thread_count);
        for ((address, size), thread_id) in event.accesses().zip(thread_ids) {
            if let Some(recorded) = recorded.as_mut() {
                let access = Access {
                    address,
                    size,
                    thread_id,
                };
                recorded.push(access, replicas);
            }
            header.address(address_space, address);
            bytes += u64::from(size);
            estimator.observe(thread_id, address, size);
        }

        header.global_segments += estimator.segments;
        header.halfwarps += estimator.half_warps;
        header.access(address_space, bytes);

        if let Some(recorded) = recorded {
            log::trace!("{recorded}");
            session.trace.write(&recorded)?;
        }
        Ok(())
    }
}

impl TraceGenerator for MemoryTraceGenerator {
    type Error = Error;

    fn initialize(
        &mut self,
        kernel: &ExecutableKernel,
        memory: &dyn MemoryContext,
    ) -> Result<(), Error> {
        if let Some(session) = self.session.take() {
            log::warn!(
                "discarding unfinished trace {}",
                session.entry.path.display()
            );
        }
        let session = self.open_session(kernel)?;

        self.header = Header {
            block_dim: kernel.block_dim.clone(),
            thread_count: kernel.max_threads_per_block,
            half_warp_size: self.config.half_warp_size,
            header_only: self.config.header_only,
            ..Header::default()
        };
        self.header.global_extent = extent::extent(kernel, memory);
        self.session = Some(session);
        Ok(())
    }

    fn event(&mut self, event: &TraceEvent) -> Result<(), Error> {
        if self.session.is_none() {
            return Err(Error::NotInitialized);
        }
        self.header.dynamic_instructions += 1;
        self.header.dynamic_operations += event.active.count() as u64;

        if event.opcode.is_load_store() {
            self.record(event, event.address_space, 1)
        } else if event.opcode.is_texture() {
            self.record(event, AddressSpace::Texture, TEXTURE_COMPONENTS)
        } else {
            Ok(())
        }
    }

    fn finish(&mut self) -> Result<(), Error> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        session.entry.update_database(&session.database)?;
        session.trace.close()?;
        session.header.write(&self.header)?;
        session.header.close()?;
        log::info!(
            "wrote {} events of kernel {} to {}",
            session.trace.num_values(),
            session.entry.name,
            session.entry.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, MemoryTraceGenerator, TraceGenerator, TraceGenerators};
    use crate::{
        allocation::DeviceMemory,
        config::Config,
        database::TraceDatabase,
        event::{Access, Event},
        header::Header,
        session::TraceSessions,
        stream::{self, StreamReader},
    };
    use color_eyre::eyre;
    use similar_asserts as diff;
    use std::path::Path;
    use std::sync::Arc;
    use trace_model::{
        ActiveMask, AddressSpace, Allocation, Dim, ExecutableKernel, Opcode, Parameter,
        TraceEvent,
    };

    fn config(dir: &Path, header_only: bool) -> Config {
        Config {
            header_only,
            database: dir.join("traces/database.json"),
            ..Config::default()
        }
    }

    fn generator(config: Config) -> MemoryTraceGenerator {
        MemoryTraceGenerator::with_sessions(config, Arc::new(TraceSessions::new()))
    }

    fn kernel() -> ExecutableKernel {
        let mut kernel = ExecutableKernel::new("vecAdd", "vectoradd.ptx");
        kernel.block_dim = Dim::new(32, 1, 1);
        kernel
    }

    fn global_load(
        active: ActiveMask,
        accesses: impl IntoIterator<Item = (u64, u32)>,
    ) -> TraceEvent {
        TraceEvent::new(
            0x40,
            Opcode::Ld,
            AddressSpace::Global,
            Dim::new(0, 0, 0),
            active,
        )
        .with_accesses(accesses)
    }

    fn contiguous_warp() -> TraceEvent {
        global_load(
            ActiveMask::all_active(32),
            (0..32).map(|tid| (0x1000 + tid * 4, 4)),
        )
    }

    fn read_events(path: &Path) -> eyre::Result<Vec<Event>> {
        Ok(StreamReader::<_, Event>::open(path)?.collect::<Result<_, _>>()?)
    }

    #[test]
    fn test_single_thread_global_access() -> eyre::Result<()> {
        crate::tests::init_test();
        let dir = tempfile::tempdir()?;
        let mut generator = generator(config(dir.path(), false));
        generator.initialize(&kernel(), &DeviceMemory::default())?;

        let active = ActiveMask::from_fn(32, |tid| tid == 5);
        generator.event(&global_load(active, [(0x2000, 8)]))?;
        let header = generator.header().clone();
        let trace = generator.entry().map(|entry| entry.path.clone());
        generator.finish()?;

        diff::assert_eq!(have: header.global_accesses, want: 1);
        diff::assert_eq!(have: header.global_bytes, want: 8);
        diff::assert_eq!(have: header.global_words, want: 1);
        diff::assert_eq!(have: header.dynamic_operations, want: 1);
        diff::assert_eq!(have: header.address_range(), want: Some(0x2000..=0x2000));

        let events = read_events(&trace.ok_or_else(|| eyre::eyre!("no trace"))?)?;
        diff::assert_eq!(
            have: events.iter().map(|e| e.accesses.clone()).collect::<Vec<_>>(),
            want: vec![vec![Access {
                address: 0x2000,
                size: 8,
                thread_id: 5,
            }]]
        );
        Ok(())
    }

    #[test]
    fn test_address_extrema() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut generator = generator(config(dir.path(), true));
        generator.initialize(&kernel(), &DeviceMemory::default())?;

        generator.event(&TraceEvent::new(
            0x0,
            Opcode::Add,
            AddressSpace::Generic,
            Dim::default(),
            ActiveMask::all_active(32),
        ))?;
        diff::assert_eq!(have: generator.header().address_range(), want: None);
        diff::assert_eq!(
            have: (generator.header().global_min_address, generator.header().global_max_address),
            want: (0, 0)
        );

        let active = ActiveMask::all_active(3);
        generator.event(&global_load(active.clone(), [(0x5000, 4), (0x300, 4), (0x9000, 4)]))?;
        let mut shared = global_load(active, [(0x10, 4), (0xffff_0000, 4), (0x20, 4)]);
        shared.address_space = AddressSpace::Shared;
        generator.event(&shared)?;
        let mut texture = global_load(ActiveMask::all_active(1), [(0x100, 4)]);
        texture.opcode = Opcode::Tex;
        generator.event(&texture)?;

        diff::assert_eq!(have: generator.header().address_range(), want: Some(0x100..=0x9000));
        diff::assert_eq!(have: generator.header().dynamic_instructions, want: 4);
        diff::assert_eq!(have: generator.header().shared_bytes, want: 12);
        generator.finish()?;
        Ok(())
    }

    #[test]
    fn test_contiguous_warp_coalescing() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut generator = generator(config(dir.path(), false));
        generator.initialize(&kernel(), &DeviceMemory::default())?;
        generator.event(&contiguous_warp())?;

        diff::assert_eq!(have: generator.header().global_segments, want: 2);
        diff::assert_eq!(have: generator.header().halfwarps, want: 1);
        diff::assert_eq!(have: generator.header().global_bytes, want: 128);
        diff::assert_eq!(have: generator.header().global_instructions, want: 1);
        generator.finish()?;
        Ok(())
    }

    #[test]
    fn test_texture_accesses_are_replicated() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut generator = generator(config(dir.path(), false));
        generator.initialize(&kernel(), &DeviceMemory::default())?;

        let active = ActiveMask::from_fn(32, |tid| tid % 4 == 0);
        let mut texture = global_load(active, (0..8).map(|i| (0x8000 + i * 16, 4)));
        texture.opcode = Opcode::Tex;
        generator.event(&texture)?;
        let trace = generator.entry().map(|entry| entry.path.clone());
        generator.finish()?;

        let header = generator.header();
        diff::assert_eq!(have: header.texture_accesses, want: 1);
        diff::assert_eq!(have: header.texture_words, want: 8);
        diff::assert_eq!(have: header.texture_bytes, want: 32);
        diff::assert_eq!(have: header.global_accesses, want: 0);

        let events = read_events(&trace.ok_or_else(|| eyre::eyre!("no trace"))?)?;
        diff::assert_eq!(have: events.len(), want: 1);
        diff::assert_eq!(have: events[0].address_space, want: AddressSpace::Texture);
        diff::assert_eq!(have: events[0].accesses.len(), want: 4 * 8);
        diff::assert_eq!(
            have: events[0].accesses[4..8].iter().map(|a| a.thread_id).collect::<Vec<_>>(),
            want: vec![4, 4, 4, 4]
        );
        Ok(())
    }

    #[test]
    fn test_finish_is_idempotent() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut generator = generator(config(dir.path(), false));
        generator.finish()?;

        generator.initialize(&kernel(), &DeviceMemory::default())?;
        generator.event(&contiguous_warp())?;
        let header_path = generator
            .entry()
            .map(|entry| entry.header.clone())
            .ok_or_else(|| eyre::eyre!("no session"))?;
        generator.finish()?;
        let written = std::fs::metadata(&header_path)?.modified()?;
        generator.finish()?;

        assert!(!generator.is_open());
        diff::assert_eq!(have: std::fs::metadata(&header_path)?.modified()?, want: written);
        let database = TraceDatabase::open(dir.path().join("traces/database.json"))?;
        diff::assert_eq!(have: database.len(), want: 1);
        Ok(())
    }

    #[test]
    fn test_header_only_writes_no_events() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut generator = generator(config(dir.path(), true));
        generator.initialize(&kernel(), &DeviceMemory::default())?;
        generator.event(&contiguous_warp())?;
        let entry = generator
            .entry()
            .cloned()
            .ok_or_else(|| eyre::eyre!("no session"))?;
        generator.finish()?;

        diff::assert_eq!(have: std::fs::metadata(&entry.path)?.len(), want: 0);
        let header: Header = stream::read_value(&entry.header)?;
        diff::assert_eq!(have: &header, want: generator.header());
        assert!(header.header_only);
        diff::assert_eq!(have: header.global_accesses, want: 1);
        diff::assert_eq!(have: header.global_segments, want: 2);
        Ok(())
    }

    #[test]
    fn test_back_to_back_launches() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut generator = generator(config(dir.path(), false));
        generator.initialize(&kernel(), &DeviceMemory::default())?;
        generator.event(&contiguous_warp())?;
        let first = generator.entry().cloned().ok_or_else(|| eyre::eyre!("no session"))?;

        generator.initialize(&kernel(), &DeviceMemory::default())?;
        let second = generator.entry().cloned().ok_or_else(|| eyre::eyre!("no session"))?;
        diff::assert_eq!(have: generator.header().global_accesses, want: 0);
        generator.finish()?;

        assert!(first.path.ends_with("vecAdd_memory_0.trace"));
        assert!(second.path.ends_with("vecAdd_memory_1.trace"));
        // the discarded session was flushed on release
        diff::assert_eq!(have: read_events(&first.path)?.len(), want: 1);
        diff::assert_eq!(have: read_events(&second.path)?.len(), want: 0);
        Ok(())
    }

    #[test]
    fn test_replay_is_deterministic() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut memory = DeviceMemory::default();
        memory.generic.insert(Allocation::new(0x1000, 0x1000))?;
        let mut kernel = kernel();
        kernel.parameters = vec![Parameter::pointer("a", 0x1000)];

        let events = vec![
            contiguous_warp(),
            global_load(
                ActiveMask::from_fn(32, |tid| tid > 10),
                (0..21).map(|i| (0x1000 + i * 64, 4)),
            ),
        ];
        let mut generator = generator(config(dir.path(), false));
        let mut headers = Vec::new();
        for _ in 0..2 {
            generator.initialize(&kernel, &memory)?;
            for event in &events {
                generator.event(event)?;
                generator.post_event(event)?;
            }
            generator.finish()?;
            headers.push(generator.header().clone());
        }
        diff::assert_eq!(have: &headers[0], want: &headers[1]);
        diff::assert_eq!(have: headers[0].global_extent, want: 0x1000);
        Ok(())
    }

    #[test]
    fn test_event_before_initialize() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut generator = generator(config(dir.path(), false));
        assert!(matches!(
            generator.event(&contiguous_warp()),
            Err(Error::NotInitialized)
        ));
        Ok(())
    }

    #[test]
    fn test_unwritable_trace_dir() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("not_a_dir");
        std::fs::write(&file, "")?;
        let mut generator = generator(Config {
            database: file.join("database.json"),
            ..Config::default()
        });
        assert!(matches!(
            generator.initialize(&kernel(), &DeviceMemory::default()),
            Err(Error::OpenTrace { .. })
        ));
        assert!(!generator.is_open());
        Ok(())
    }

    #[test]
    fn test_unwritable_header() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = config(dir.path(), false);
        let trace_dir = config.trace_dir().to_path_buf();
        // a directory in place of the header file
        std::fs::create_dir_all(trace_dir.join("vecAdd_memory_0.header"))?;

        let mut generator = generator(config);
        assert!(matches!(
            generator.initialize(&kernel(), &DeviceMemory::default()),
            Err(Error::OpenHeader { .. })
        ));
        assert!(!generator.is_open());
        assert!(matches!(
            generator.event(&contiguous_warp()),
            Err(Error::NotInitialized)
        ));
        generator.finish()?;
        Ok(())
    }

    #[test]
    fn test_fan_out() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        let sessions = Arc::new(TraceSessions::new());
        let mut generators = TraceGenerators::default();
        generators.push(MemoryTraceGenerator::with_sessions(
            config(dir.path(), true),
            Arc::clone(&sessions),
        ));
        generators.push(MemoryTraceGenerator::with_sessions(
            config(dir.path(), false),
            Arc::clone(&sessions),
        ));
        generators.initialize(&kernel(), &DeviceMemory::default())?;
        generators.event(&contiguous_warp())?;
        generators.finish()?;

        diff::assert_eq!(have: generators.len(), want: 2);
        diff::assert_eq!(have: sessions.num_launches(), want: 2);
        let database = TraceDatabase::open(dir.path().join("traces/database.json"))?;
        diff::assert_eq!(have: database.find("vecAdd").count(), want: 2);
        Ok(())
    }
}
