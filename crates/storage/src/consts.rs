//! Constants shared across the store engine.

/// Every chunk and the file header are aligned to this many bytes.
pub const BLOCK_SIZE: u64 = 4096;

/// Current on-disk format version.
pub const FORMAT: u32 = 2;
pub const FORMAT_WRITE_MIN: u32 = 2;
pub const FORMAT_WRITE_MAX: u32 = 2;
pub const FORMAT_READ_MIN: u32 = 1;
pub const FORMAT_READ_MAX: u32 = 2;

/// Chunk ids wrap modulo this value.
pub const MAX_ID: u32 = u32::MAX;

/// The id of the layout map is fixed; every other map's id is allocated.
pub const LAYOUT_MAP_ID: u32 = 0;

/// The id of the meta map is fixed too; user maps start allocating from 2.
pub const META_MAP_ID: u32 = 1;

pub const INITIAL_VERSION: u64 = 0;

/// Default retention window (ms) before a physically unreferenced chunk may
/// be reclaimed; protects in-flight reads and crash recovery.
pub const DEFAULT_RETENTION_TIME_MS: u64 = 45_000;

/// Length (in bytes) of the sentinel/legacy clock-skew cutoff: any RTC
/// reading before this is treated as absent and replaced with
/// `now - default_retention_time`.
pub const CLOCK_2014_MS: u64 = 1_388_534_400_000;

/// Single-thread pipeline depth: the serializer can be one chunk ahead of
/// the buffer-saver.
pub const PIPE_LENGTH: usize = 1;

/// Pooled write buffers bigger than this are dropped instead of recycled.
pub const MAX_POOLED_BUFFER: usize = 4 * 1024 * 1024;

pub const FOOTER_LENGTH: usize = 128;
pub const MAX_HEADER_LENGTH: usize = 4096;
