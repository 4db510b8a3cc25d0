use once_cell::sync::Lazy;
use std::path::{Path, PathBuf};
use std::sync::{atomic, Arc};

/// Maximum number of characters of the kernel name used in file names.
pub const MAX_KERNEL_NAME_LEN: usize = 20;

static GLOBAL: Lazy<Arc<TraceSessions>> = Lazy::new(|| Arc::new(TraceSessions::new()));

/// Hands out unique launch ids to trace sessions.
///
/// Ids start at zero and are unique even when sessions are created concurrently.
#[derive(Debug, Default)]
pub struct TraceSessions {
    launches: atomic::AtomicU64,
}

impl TraceSessions {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            launches: atomic::AtomicU64::new(0),
        }
    }

    /// Process-wide sessions shared by all generators that do not bring their own.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    pub fn next_launch_id(&self) -> u64 {
        self.launches.fetch_add(1, atomic::Ordering::Relaxed)
    }

    /// Number of launch ids handed out so far.
    #[must_use]
    pub fn num_launches(&self) -> u64 {
        self.launches.load(atomic::Ordering::Relaxed)
    }
}

/// Output files of one trace session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionPaths {
    pub trace: PathBuf,
    pub header: PathBuf,
}

impl SessionPaths {
    /// Paths of the trace files for launch `launch_id` of `kernel_name`.
    ///
    /// Files are named `<kernel>_<format>_<launch id>.{trace,header}`, where
    /// the kernel name is truncated to [`MAX_KERNEL_NAME_LEN`] characters.
    #[must_use]
    pub fn new(trace_dir: &Path, kernel_name: &str, format: &str, launch_id: u64) -> Self {
        let name = utils::truncate_chars(kernel_name, MAX_KERNEL_NAME_LEN);
        let stem = format!("{name}_{format}_{launch_id}");
        Self {
            trace: trace_dir.join(format!("{stem}.trace")),
            header: trace_dir.join(format!("{stem}.header")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{SessionPaths, TraceSessions};
    use similar_asserts as diff;
    use std::collections::HashSet;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    #[test]
    fn test_session_paths() {
        let paths = SessionPaths::new(
            Path::new("/traces"),
            "_Z6vecAddIfEvPT_S1_S1_i",
            "memory",
            3,
        );
        diff::assert_eq!(
            have: paths,
            want: SessionPaths {
                trace: PathBuf::from("/traces/_Z6vecAddIfEvPT_S1_S_memory_3.trace"),
                header: PathBuf::from("/traces/_Z6vecAddIfEvPT_S1_S_memory_3.header"),
            }
        );
    }

    #[test]
    fn test_concurrent_launch_ids_are_unique() {
        let sessions = Arc::new(TraceSessions::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sessions = Arc::clone(&sessions);
                std::thread::spawn(move || {
                    (0..100).map(|_| sessions.next_launch_id()).collect::<Vec<_>>()
                })
            })
            .collect();
        let ids: HashSet<u64> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        diff::assert_eq!(have: ids.len(), want: 400);
        diff::assert_eq!(have: sessions.num_launches(), want: 400);
        assert!(ids.iter().all(|id| *id < 400));
    }
}
