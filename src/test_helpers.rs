use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use crate::growbuf::Producer;

/// What a `ScriptedReader` does on its next `read` call.
pub enum Step {
    Data(Vec<u8>),
    Fail(io::ErrorKind),
    // Stays at the front: every later read also reports EOF.
    Eof,
}

/// A pipe stand-in. Delivers the queued steps in order and reports
/// `WouldBlock` when the queue is empty, i.e. the producer has stalled.
/// Clones share the queue, so a test can keep a handle and feed more data
/// after the reader has been moved into a buffer.
#[derive(Clone)]
pub struct ScriptedReader {
    steps: Rc<RefCell<VecDeque<Step>>>,
}

impl ScriptedReader {
    pub fn new(steps: Vec<Step>) -> ScriptedReader {
        ScriptedReader {
            steps: Rc::new(RefCell::new(steps.into())),
        }
    }

    pub fn push(&self, step: Step) {
        self.steps.borrow_mut().push_back(step);
    }
}

impl Read for ScriptedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut steps = self.steps.borrow_mut();
        match steps.pop_front() {
            None => Err(io::ErrorKind::WouldBlock.into()),
            Some(Step::Eof) => {
                steps.push_front(Step::Eof);
                Ok(0)
            }
            Some(Step::Fail(kind)) => Err(kind.into()),
            Some(Step::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    steps.push_front(Step::Data(data.split_off(n)));
                }
                Ok(n)
            }
        }
    }
}

// Nothing can arrive while a test is blocked waiting, so stalls stay put.
impl Producer for ScriptedReader {}

/// A blocking producer that pauses before handing out each chunk, like a
/// command that is still working. Meant to be read on a reader thread.
pub struct SlowReader {
    chunks: VecDeque<Vec<u8>>,
    delay: Duration,
}

impl SlowReader {
    pub fn new(chunks: Vec<Vec<u8>>, delay: Duration) -> SlowReader {
        SlowReader {
            chunks: chunks.into(),
            delay,
        }
    }
}

impl Read for SlowReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        thread::sleep(self.delay);
        let Some(mut chunk) = self.chunks.pop_front() else {
            return Ok(0);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.chunks.push_front(chunk.split_off(n));
        }
        Ok(n)
    }
}
