//! Limited chunk buffer implementations.

use std::collections::TryReserveError;

use crate::record::Record;

/// Buffer builder.
pub trait ChunkBufferBuilder: Default + Send + Sync {
    type Buffer: ChunkBuffer;

    /// Creates a new buffer.
    fn build(&self) -> Result<Self::Buffer, TryReserveError>;

    /// Checks that the builder can ever produce a non-empty chunk.
    fn is_valid(&self) -> bool;
}

/// Base limited buffer interface. A buffer accumulates records of a single chunk.
pub trait ChunkBuffer: Send {
    /// Adds a new record to the buffer.
    fn push(&mut self, record: Record);

    /// Returns buffer length.
    fn len(&self) -> usize;

    /// Checks if the buffer reached the limit.
    fn is_full(&self) -> bool;

    /// Takes the accumulated records out of the buffer.
    fn into_records(self) -> Vec<Record>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct LimitedBufferBuilder {
    buffer_limit: usize,
    preallocate: bool,
}

impl LimitedBufferBuilder {
    /// Creates a builder of buffers holding at most `buffer_limit` records.
    /// If `preallocate` is set the whole chunk is reserved up front, so an
    /// unsatisfiable limit fails before any record is read.
    pub fn new(buffer_limit: usize, preallocate: bool) -> Self {
        LimitedBufferBuilder {
            buffer_limit,
            preallocate,
        }
    }
}

impl ChunkBufferBuilder for LimitedBufferBuilder {
    type Buffer = LimitedBuffer;

    fn build(&self) -> Result<Self::Buffer, TryReserveError> {
        if self.preallocate {
            LimitedBuffer::with_capacity(self.buffer_limit)
        } else {
            Ok(LimitedBuffer::new(self.buffer_limit))
        }
    }

    fn is_valid(&self) -> bool {
        self.buffer_limit > 0
    }
}

impl Default for LimitedBufferBuilder {
    fn default() -> Self {
        LimitedBufferBuilder {
            buffer_limit: 1_000_000,
            preallocate: false,
        }
    }
}

/// Buffer limited by records count.
pub struct LimitedBuffer {
    limit: usize,
    inner: Vec<Record>,
}

impl LimitedBuffer {
    pub fn new(limit: usize) -> Self {
        LimitedBuffer {
            limit,
            inner: Vec::new(),
        }
    }

    pub fn with_capacity(limit: usize) -> Result<Self, TryReserveError> {
        let mut inner = Vec::new();
        inner.try_reserve_exact(limit)?;

        return Ok(LimitedBuffer { limit, inner });
    }
}

impl ChunkBuffer for LimitedBuffer {
    fn push(&mut self, record: Record) {
        self.inner.push(record);
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn is_full(&self) -> bool {
        self.inner.len() >= self.limit
    }

    fn into_records(self) -> Vec<Record> {
        self.inner
    }
}

#[cfg(test)]
mod test {
    use super::{ChunkBuffer, ChunkBufferBuilder, LimitedBufferBuilder};
    use crate::record::Record;

    #[test]
    fn test_limited_buffer() {
        let builder = LimitedBufferBuilder::new(2, true);
        let mut buffer = builder.build().unwrap();

        buffer.push(Record::new(0, "a"));
        assert_eq!(buffer.is_full(), false);
        buffer.push(Record::new(1, "b"));
        assert_eq!(buffer.is_full(), true);

        let data = buffer.into_records();
        assert_eq!(data, vec![Record::new(0, "a"), Record::new(1, "b")]);
    }

    #[test]
    fn test_limited_buffer_allocation_failure() {
        let builder = LimitedBufferBuilder::new(usize::MAX, true);
        assert!(builder.build().is_err());
    }

    #[test]
    fn test_zero_limit_is_invalid() {
        assert!(!LimitedBufferBuilder::new(0, false).is_valid());
        assert!(LimitedBufferBuilder::default().is_valid());
    }
}

#[cfg(feature = "memory-limit")]
pub mod mem {
    use std::collections::TryReserveError;

    use deepsize::DeepSizeOf;

    use super::{ChunkBuffer, ChunkBufferBuilder};
    use crate::record::Record;

    #[derive(Debug, Clone)]
    pub struct MemoryLimitedBufferBuilder {
        buffer_limit: u64,
    }

    impl MemoryLimitedBufferBuilder {
        pub fn new(buffer_limit: u64) -> Self {
            MemoryLimitedBufferBuilder { buffer_limit }
        }
    }

    impl ChunkBufferBuilder for MemoryLimitedBufferBuilder {
        type Buffer = MemoryLimitedBuffer;

        fn build(&self) -> Result<Self::Buffer, TryReserveError> {
            Ok(MemoryLimitedBuffer::new(self.buffer_limit))
        }

        fn is_valid(&self) -> bool {
            self.buffer_limit > 0
        }
    }

    impl Default for MemoryLimitedBufferBuilder {
        fn default() -> Self {
            MemoryLimitedBufferBuilder {
                buffer_limit: 512 * 1024 * 1024,
            }
        }
    }

    /// Buffer limited by memory consumed by its records.
    pub struct MemoryLimitedBuffer {
        limit: u64,
        current_size: u64,
        inner: Vec<Record>,
    }

    impl MemoryLimitedBuffer {
        pub fn new(limit: u64) -> Self {
            MemoryLimitedBuffer {
                limit,
                current_size: 0,
                inner: Vec::new(),
            }
        }

        pub fn mem_size(&self) -> u64 {
            self.current_size
        }
    }

    impl ChunkBuffer for MemoryLimitedBuffer {
        fn push(&mut self, record: Record) {
            self.current_size += record.deep_size_of() as u64;
            self.inner.push(record);
        }

        fn len(&self) -> usize {
            self.inner.len()
        }

        fn is_full(&self) -> bool {
            self.current_size >= self.limit
        }

        fn into_records(self) -> Vec<Record> {
            self.inner
        }
    }

    #[cfg(test)]
    mod test {
        use super::{ChunkBuffer, ChunkBufferBuilder, MemoryLimitedBufferBuilder};
        use crate::record::Record;

        #[test]
        fn test_memory_limited_buffer() {
            // i64 + String (ptr, cap, len) + u64 = 40 bytes, plus the text heap bytes
            let builder = MemoryLimitedBufferBuilder::new(92);
            let mut buffer = builder.build().unwrap();

            let record1 = Record::new(0, "hello!");
            buffer.push(record1.clone());
            assert_eq!(buffer.mem_size(), 46);
            assert_eq!(buffer.is_full(), false);

            let record2 = Record::new(1, "world!");
            buffer.push(record2.clone());
            assert_eq!(buffer.mem_size(), 92);
            assert_eq!(buffer.is_full(), true);

            assert_eq!(buffer.into_records(), vec![record1, record2]);
        }
    }
}
