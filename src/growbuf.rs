use std::fs::File;
use std::io::{self, Read};
use std::time::Duration;

use tracing::{trace, warn};

/// Size of each block the growing buffer appends; also the most a single
/// read from the producer can add.
pub const GROWBUF_BLOCK_SIZE: usize = 8192;

/// How long one wait for a stalled producer lasts. Callers that need the
/// data loop on `wait`, checking for cancellation in between.
pub const PRODUCER_WAIT: Duration = Duration::from_millis(50);

/// What waiting on a stalled producer achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Data, EOF or an error is ready to be read.
    Ready,
    /// Nothing arrived within the timeout; ask again.
    Pending,
    /// The producer cannot be waited on, so a stall lasts until something
    /// outside feeds it.
    Unsupported,
}

/// The reading end of a pipe. A read that reports `WouldBlock` means the
/// producer has nothing for us right now.
pub trait Producer: Read {
    /// Block for at most `timeout` until a read can make progress.
    fn wait(&mut self, timeout: Duration) -> Wait {
        let _ = timeout;
        Wait::Unsupported
    }
}

// Reads on a plain file block until there is data, so they never stall.
impl Producer for File {}

/// Accumulates the output of a non-seekable producer (a pipe) so that it can
/// be read at random offsets.
///
/// Blocks are appended and never touched again once full. Bytes are only
/// pulled from the producer when someone asks for an offset beyond what has
/// been buffered so far.
pub struct GrowingBuffer {
    reader: Option<Box<dyn Producer>>,
    blocks: Vec<Box<[u8]>>,
    // Number of valid bytes in the last block.
    last_block_len: usize,
    finished: bool,
    error: Option<io::Error>,
}

impl GrowingBuffer {
    pub fn new(reader: Box<dyn Producer>) -> GrowingBuffer {
        GrowingBuffer {
            reader: Some(reader),
            blocks: vec![],
            last_block_len: 0,
            finished: false,
            error: None,
        }
    }

    /// Bytes buffered so far.
    pub fn filesize(&self) -> u64 {
        match self.blocks.len() {
            0 => 0,
            n => ((n - 1) * GROWBUF_BLOCK_SIZE + self.last_block_len) as u64,
        }
    }

    /// Whether the producer has signalled EOF (or failed, which counts as EOF).
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Pull from the producer until at least `target` bytes are buffered or
    /// the producer is done. A producer that reports `WouldBlock` is stalled:
    /// we stop pulling for now, but the buffer is not finished.
    pub fn read_until(&mut self, target: u64) {
        while self.filesize() < target && !self.finished {
            let Some(reader) = self.reader.as_mut() else {
                self.finished = true;
                break;
            };

            if self.blocks.is_empty() || self.last_block_len == GROWBUF_BLOCK_SIZE {
                self.blocks
                    .push(vec![0; GROWBUF_BLOCK_SIZE].into_boxed_slice());
                self.last_block_len = 0;
            }

            let Some(block) = self.blocks.last_mut() else {
                break;
            };

            match reader.read(&mut block[self.last_block_len..]) {
                Ok(0) => {
                    trace!(target: "growbuf", filesize = self.filesize(), "producer closed");
                    self.finish();
                }
                Ok(n) => {
                    self.last_block_len += n;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!(target: "growbuf", error = %err, "read from producer failed");
                    self.error = Some(err);
                    self.finish();
                }
            }
        }
    }

    /// Pull everything the producer has ready. Stops at a stall.
    pub fn read_all(&mut self) {
        self.read_until(u64::MAX);
    }

    /// Wait for a stalled producer to have something again.
    pub fn wait(&mut self, timeout: Duration) -> Wait {
        match self.reader.as_mut() {
            Some(reader) if !self.finished => reader.wait(timeout),
            _ => Wait::Ready,
        }
    }

    pub fn get_byte(&mut self, offset: u64) -> Option<u8> {
        self.chunk(offset).map(|chunk| chunk[0])
    }

    /// The buffered bytes from `offset` to the end of the block containing it.
    pub fn chunk(&mut self, offset: u64) -> Option<&[u8]> {
        if offset >= self.filesize() {
            self.read_until(offset.saturating_add(1));
        }
        if offset >= self.filesize() {
            return None;
        }

        let (index, start) = Self::locate(offset);
        let end = self.block_len(index);
        Some(&self.blocks[index][start..end])
    }

    /// The buffered bytes from the start of the block containing `offset - 1`
    /// up to (not including) `offset`. Never pulls from the producer.
    pub fn chunk_before(&self, offset: u64) -> Option<&[u8]> {
        if offset == 0 || offset > self.filesize() {
            return None;
        }
        let (index, start) = Self::locate(offset - 1);
        Some(&self.blocks[index][..=start])
    }

    /// Hands out the read error that finished the buffer. Reported once.
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    /// Stop reading; anything already buffered stays readable.
    pub fn finish(&mut self) {
        self.finished = true;
        self.reader = None;
    }

    fn locate(offset: u64) -> (usize, usize) {
        let block = GROWBUF_BLOCK_SIZE as u64;
        ((offset / block) as usize, (offset % block) as usize)
    }

    fn block_len(&self, index: usize) -> usize {
        if index + 1 == self.blocks.len() {
            self.last_block_len
        } else {
            GROWBUF_BLOCK_SIZE
        }
    }
}
