use flate2::{Decompress, DecompressError, FlushDecompress};
use tracing::trace;

/// Marker which Discord appends to every complete message on a `zlib-stream` connection.
const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xff, 0xff];
const INTERNAL_BUFFER_SIZE: usize = 32 * 1024;

/// Streaming zlib context shared by every frame of a single gateway connection.
pub struct Inflater {
    decompress: Decompress,
    compressed: Vec<u8>,
    internal_buffer: Vec<u8>,
    buffer: Vec<u8>,
}

impl Inflater {
    pub fn new() -> Self {
        Self {
            decompress: Decompress::new(true),
            compressed: Vec::new(),
            internal_buffer: Vec::with_capacity(INTERNAL_BUFFER_SIZE),
            buffer: Vec::with_capacity(INTERNAL_BUFFER_SIZE),
        }
    }

    pub fn extend(&mut self, slice: &[u8]) {
        self.compressed.extend_from_slice(slice);
    }

    /// Inflates the buffered frames once they form a complete message.
    ///
    /// Returns `Ok(None)` while only part of a message has arrived.
    pub fn msg(&mut self) -> Result<Option<&[u8]>, DecompressError> {
        if !self.compressed.ends_with(&ZLIB_SUFFIX) {
            return Ok(None);
        }

        self.buffer.clear();
        let before = self.decompress.total_in();
        let mut offset = 0;

        loop {
            self.internal_buffer.clear();

            self.decompress.decompress_vec(
                &self.compressed[offset..],
                &mut self.internal_buffer,
                FlushDecompress::Sync,
            )?;

            offset = usize::try_from(self.decompress.total_in() - before).unwrap_or(0);
            self.buffer.extend_from_slice(&self.internal_buffer);

            if self.internal_buffer.len() < self.internal_buffer.capacity()
                || offset >= self.compressed.len()
            {
                break;
            }
        }

        trace!("in:out: {}:{}", self.compressed.len(), self.buffer.len());
        self.compressed.clear();

        Ok(Some(&self.buffer))
    }
}
