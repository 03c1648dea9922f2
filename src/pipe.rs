//! Reading a producer that blocks (stdin, a command's stdout) without
//! blocking the UI.
//!
//! A thread does the blocking reads and hands the data over a bounded
//! channel. The receiving end implements `Read` for the growing buffer and
//! reports `WouldBlock` when nothing has arrived yet, so a redraw shows what
//! there is and picks up the rest later. Searches and jumps to the end that
//! need the data `wait` for it instead.

use std::io::{self, Read};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::growbuf::{Producer, Wait, GROWBUF_BLOCK_SIZE};

// Blocks in flight between the reader thread and the view. The thread stops
// reading once this many are waiting, so a viewer that is not scrolling does
// not drain an endless producer.
const PIPE_QUEUE_BLOCKS: usize = 16;

pub struct ChannelReader {
    receiver: Receiver<io::Result<Vec<u8>>>,
    pending: Vec<u8>,
    pos: usize,
    // Received while waiting; handed out by the next read.
    error: Option<io::Error>,
    done: bool,
}

/// Start reading `input` on a background thread. `notify` is called after
/// each block is queued and once more at EOF or error.
pub fn spawn_reader(
    mut input: Box<dyn Read + Send>,
    notify: impl Fn() + Send + 'static,
) -> ChannelReader {
    let (sender, receiver) = mpsc::sync_channel(PIPE_QUEUE_BLOCKS);

    thread::spawn(move || {
        let mut total = 0;
        loop {
            let mut buffer = vec![0; GROWBUF_BLOCK_SIZE];
            let message = match input.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    buffer.truncate(n);
                    Ok(buffer)
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(target: "datasource", error = %err, "input read failed");
                    let _ = sender.send(Err(err));
                    break;
                }
            };

            // The view was closed; nobody wants the rest.
            if sender.send(message).is_err() {
                return;
            }
            notify();
        }
        debug!(target: "datasource", total, "input finished");
        drop(sender);
        notify();
    });

    ChannelReader {
        receiver,
        pending: vec![],
        pos: 0,
        error: None,
        done: false,
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(err) = self.error.take() {
            self.done = true;
            return Err(err);
        }
        if self.pos == self.pending.len() {
            if self.done {
                return Ok(0);
            }
            match self.receiver.try_recv() {
                Ok(Ok(data)) => {
                    self.pending = data;
                    self.pos = 0;
                }
                Ok(Err(err)) => {
                    self.done = true;
                    return Err(err);
                }
                Err(TryRecvError::Empty) => return Err(io::ErrorKind::WouldBlock.into()),
                Err(TryRecvError::Disconnected) => {
                    self.done = true;
                    return Ok(0);
                }
            }
        }

        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Producer for ChannelReader {
    fn wait(&mut self, timeout: Duration) -> Wait {
        if self.done || self.error.is_some() || self.pos < self.pending.len() {
            return Wait::Ready;
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(Ok(data)) => {
                self.pending = data;
                self.pos = 0;
                Wait::Ready
            }
            Ok(Err(err)) => {
                self.error = Some(err);
                Wait::Ready
            }
            Err(RecvTimeoutError::Timeout) => Wait::Pending,
            Err(RecvTimeoutError::Disconnected) => {
                self.done = true;
                Wait::Ready
            }
        }
    }
}
