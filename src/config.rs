use std::num::NonZeroUsize;

pub const DELIMITER: u8 = b';';

// lower bound on the shard count, however few workers there are
pub const DEFAULT_SHARDS: usize = 32;

// more shards than workers keeps two workers merging the same shard at the same time unlikely.
pub const SHARDS_PER_WORKER: usize = 4;

/// How a worker gets at the bytes of its segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// Map the whole file once and hand out slices of it.
    #[default]
    Mmap,
    /// Every worker opens its own handle, seeks, and reads its range through a buffer.
    Buffered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub workers: usize,
    pub shards: usize,
    pub backend: Backend,
}

impl Config {
    /// One worker per available core, shards scaled from that.
    pub fn for_this_machine(backend: Backend) -> Self {
        let workers = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self::with_workers(workers, backend)
    }

    pub fn with_workers(workers: usize, backend: Backend) -> Self {
        Self {
            workers,
            shards: shards_for(workers),
            backend,
        }
    }
}

pub fn shards_for(workers: usize) -> usize {
    DEFAULT_SHARDS.max((workers * SHARDS_PER_WORKER).next_power_of_two())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_this_machine() {
        let config = Config::for_this_machine(Backend::Buffered);
        assert!(config.workers >= 1);
        assert_eq!(config.shards, shards_for(config.workers));
        assert_eq!(config.backend, Backend::Buffered);
    }

    #[test]
    fn test_shards_for() {
        assert_eq!(shards_for(1), 32);
        assert_eq!(shards_for(8), 32);
        assert_eq!(shards_for(9), 64);
        assert_eq!(shards_for(16), 64);
        assert_eq!(shards_for(100), 512);
    }
}
