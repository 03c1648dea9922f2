use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::time::Duration;

use memchr::{memchr2, memrchr2};
use tracing::{trace, warn};

use crate::charset::Unit;
use crate::growbuf::{GrowingBuffer, Producer, Wait};

/// Size of the window a `File` source keeps cached; reloads are aligned to it.
pub const FILE_BLOCK_SIZE: usize = 4096;

/// A seekable byte handle whose size can be queried again later.
pub trait RandomAccess: Read + Seek {
    fn size(&self) -> io::Result<u64>;
}

impl RandomAccess for File {
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

impl<T: AsRef<[u8]>> RandomAccess for Cursor<T> {
    fn size(&self) -> io::Result<u64> {
        Ok(self.get_ref().as_ref().len() as u64)
    }
}

pub struct FileSource {
    handle: Box<dyn RandomAccess>,
    filesize: u64,
    window: Box<[u8]>,
    window_offset: u64,
    window_len: usize,
}

impl FileSource {
    pub fn new(handle: Box<dyn RandomAccess>) -> io::Result<FileSource> {
        let filesize = handle.size()?;
        Ok(FileSource {
            handle,
            filesize,
            window: vec![0; FILE_BLOCK_SIZE].into_boxed_slice(),
            window_offset: 0,
            window_len: 0,
        })
    }

    fn window_contains(&self, offset: u64) -> bool {
        self.window_offset <= offset && offset - self.window_offset < self.window_len as u64
    }

    // Make sure the window holds `offset`, reloading the aligned block around it
    // if needed. Returns the index of `offset` within the window.
    fn load(&mut self, offset: u64) -> Option<usize> {
        if offset >= self.filesize {
            return None;
        }

        if !self.window_contains(offset) {
            self.window_offset = offset - offset % FILE_BLOCK_SIZE as u64;
            self.window_len = 0;

            if let Err(err) = self.handle.seek(SeekFrom::Start(self.window_offset)) {
                warn!(target: "datasource", offset = self.window_offset, error = %err, "seek failed");
                return None;
            }

            while self.window_len < FILE_BLOCK_SIZE {
                match self.handle.read(&mut self.window[self.window_len..]) {
                    Ok(0) => break,
                    Ok(n) => self.window_len += n,
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                    Err(err) => {
                        warn!(target: "datasource", offset = self.window_offset, error = %err, "read failed");
                        break;
                    }
                }
            }

            // Never show bytes past the size we believe the file has.
            let known = self.filesize - self.window_offset;
            if (self.window_len as u64) > known {
                self.window_len = known as usize;
            }

            if !self.window_contains(offset) {
                return None;
            }
        }

        Some((offset - self.window_offset) as usize)
    }

    fn chunk(&mut self, offset: u64) -> Option<&[u8]> {
        let start = self.load(offset)?;
        Some(&self.window[start..self.window_len])
    }

    fn chunk_before(&mut self, offset: u64) -> Option<&[u8]> {
        let last = self.load(offset.checked_sub(1)?)?;
        Some(&self.window[..=last])
    }

    fn update_filesize(&mut self) {
        match self.handle.size() {
            Ok(size) if size != self.filesize => {
                trace!(target: "datasource", old = self.filesize, new = size, "file size changed");
                self.filesize = size;
                self.window_len = 0;
            }
            Ok(_) => {}
            Err(err) => warn!(target: "datasource", error = %err, "stat failed"),
        }
    }
}

/// Where a view's bytes come from.
pub enum DataSource {
    None,
    File(FileSource),
    Pipe(GrowingBuffer),
    String(Vec<u8>),
}

impl DataSource {
    pub fn file(handle: Box<dyn RandomAccess>) -> io::Result<DataSource> {
        Ok(DataSource::File(FileSource::new(handle)?))
    }

    pub fn pipe(reader: Box<dyn Producer>) -> DataSource {
        DataSource::Pipe(GrowingBuffer::new(reader))
    }

    pub fn string(bytes: impl Into<Vec<u8>>) -> DataSource {
        DataSource::String(bytes.into())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, DataSource::None)
    }

    /// Drops the source, closing whatever handle backs it.
    pub fn close(&mut self) {
        *self = DataSource::None;
    }

    pub fn get_byte(&mut self, offset: u64) -> Option<u8> {
        self.chunk(offset).map(|chunk| chunk[0])
    }

    /// The contiguous run of bytes available starting at `offset`.
    pub fn chunk(&mut self, offset: u64) -> Option<&[u8]> {
        match self {
            DataSource::None => None,
            DataSource::File(file) => file.chunk(offset),
            DataSource::Pipe(growbuf) => growbuf.chunk(offset),
            DataSource::String(bytes) => {
                let start = usize::try_from(offset).ok()?;
                bytes.get(start..).filter(|rest| !rest.is_empty())
            }
        }
    }

    /// A contiguous run of bytes ending just before `offset`.
    pub fn chunk_before(&mut self, offset: u64) -> Option<&[u8]> {
        match self {
            DataSource::None => None,
            DataSource::File(file) => file.chunk_before(offset),
            DataSource::Pipe(growbuf) => growbuf.chunk_before(offset),
            DataSource::String(bytes) => {
                let end = usize::try_from(offset).ok()?;
                bytes.get(..end).filter(|rest| !rest.is_empty())
            }
        }
    }

    /// Decode one UTF-8 character at `offset`. Bytes that do not start a
    /// valid sequence come back as `Unit::Invalid`, one byte at a time.
    pub fn get_utf8(&mut self, offset: u64) -> Option<(Unit, usize)> {
        let decoded = {
            let chunk = self.chunk(offset)?;
            match bstr::decode_utf8(chunk) {
                (Some(ch), len) => Some((Unit::Char(ch), len)),
                (None, _) if chunk.len() >= 4 => Some((Unit::Invalid(chunk[0]), 1)),
                // The sequence may continue past the end of this chunk.
                (None, _) => None,
            }
        };
        if decoded.is_some() {
            return decoded;
        }

        let mut bytes = [0; 4];
        let mut len = 0;
        while len < bytes.len() {
            let Some(byte) = self.get_byte(offset + len as u64) else {
                break;
            };
            bytes[len] = byte;
            len += 1;
        }

        match bstr::decode_utf8(&bytes[..len]) {
            (Some(ch), len) => Some((Unit::Char(ch), len)),
            (None, _) => Some((Unit::Invalid(bytes[0]), 1)),
        }
    }

    /// Bytes known so far. Authoritative for files and strings; for pipes,
    /// only what has been buffered.
    pub fn filesize(&self) -> u64 {
        match self {
            DataSource::None => 0,
            DataSource::File(file) => file.filesize,
            DataSource::Pipe(growbuf) => growbuf.filesize(),
            DataSource::String(bytes) => bytes.len() as u64,
        }
    }

    pub fn may_still_grow(&self) -> bool {
        match self {
            DataSource::Pipe(growbuf) => !growbuf.is_finished(),
            _ => false,
        }
    }

    /// Re-stat a file source, which may have changed size since it was opened.
    pub fn update_filesize(&mut self) {
        if let DataSource::File(file) = self {
            file.update_filesize();
        }
    }

    /// Pull whatever a pipe source has ready.
    pub fn read_all(&mut self) {
        if let DataSource::Pipe(growbuf) = self {
            growbuf.read_all();
        }
    }

    /// Wait up to `timeout` for a stalled pipe to have more data.
    pub fn wait_for_data(&mut self, timeout: Duration) -> Wait {
        match self {
            DataSource::Pipe(growbuf) => growbuf.wait(timeout),
            _ => Wait::Ready,
        }
    }

    /// Record that the byte at `offset` was rewritten in the backing store.
    /// The cached copy is dropped rather than patched, so the next read
    /// fetches whatever the store really holds.
    pub fn set_byte(&mut self, offset: u64, byte: u8) {
        trace!(target: "datasource", offset, byte, "byte changed");
        if let DataSource::File(file) = self {
            if file.window_contains(offset) {
                file.window_len = 0;
            }
        }
    }

    /// A read error hit while pulling from a pipe. Reported once.
    pub fn take_error(&mut self) -> Option<io::Error> {
        match self {
            DataSource::Pipe(growbuf) => growbuf.take_error(),
            _ => None,
        }
    }

    /// Start of the paragraph containing `current`, scanning back no further
    /// than `limit`. A `\r\n` pair counts as one terminator and a lone `\r`
    /// ends a line as well.
    pub fn bol(&mut self, current: u64, limit: u64) -> u64 {
        if current == 0 {
            return 0;
        }
        let filesize = self.filesize();
        if current > filesize {
            return filesize;
        }

        let mut current = current;
        let Some(byte) = self.get_byte(current) else {
            return current;
        };
        if byte == b'\n' {
            match self.get_byte(current - 1) {
                Some(b'\r') => current -= 1,
                Some(_) => {}
                None => return current,
            }
        }

        while current > 0 && current > limit {
            let Some(chunk) = self.chunk_before(current) else {
                break;
            };
            let chunk_start = current - chunk.len() as u64;
            let floor = limit.max(chunk_start);
            let window = &chunk[(floor - chunk_start) as usize..];

            match memrchr2(b'\n', b'\r', window) {
                Some(pos) => {
                    current = floor + pos as u64 + 1;
                    break;
                }
                None => current = floor,
            }
        }

        current
    }

    /// Offset just past the terminator (`\n`, `\r\n` or a lone `\r`) of the
    /// paragraph containing `current`, or the end of the data.
    pub fn eol(&mut self, current: u64) -> u64 {
        let mut current = current;
        loop {
            let Some(chunk) = self.chunk(current) else {
                return current;
            };
            let Some(pos) = memchr2(b'\n', b'\r', chunk) else {
                current += chunk.len() as u64;
                continue;
            };

            let is_cr = chunk[pos] == b'\r';
            current += pos as u64 + 1;
            if is_cr && self.get_byte(current) == Some(b'\n') {
                current += 1;
            }
            return current;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use bstr::ByteSlice;

    use crate::test_helpers::{ScriptedReader, Step};

    fn file_source(bytes: &[u8]) -> DataSource {
        DataSource::file(Box::new(Cursor::new(bytes.to_vec()))).unwrap()
    }

    #[test]
    fn test_file_window_reloads_on_block_boundaries() {
        let bytes: Vec<u8> = (0..FILE_BLOCK_SIZE * 3).map(|n| (n % 7) as u8).collect();
        let mut ds = file_source(&bytes);

        assert_eq!(bytes.len() as u64, ds.filesize());
        assert_eq!(Some(bytes[5000]), ds.get_byte(5000));
        assert_eq!(Some(bytes[10]), ds.get_byte(10));
        assert_eq!(FILE_BLOCK_SIZE - 10, ds.chunk(10).unwrap().len());
        assert_eq!(11, ds.chunk_before(11).unwrap().len());
        assert_eq!(None, ds.get_byte(bytes.len() as u64));
        assert!(!ds.may_still_grow());
    }

    #[test]
    fn test_utf8_across_window_boundary() {
        let mut bytes = vec![b'a'; FILE_BLOCK_SIZE - 1];
        bytes.extend_from_slice("é日".as_bytes());
        let mut ds = file_source(&bytes);

        let offset = FILE_BLOCK_SIZE as u64 - 1;
        assert_eq!(Some((Unit::Char('é'), 2)), ds.get_utf8(offset));
        assert_eq!(Some((Unit::Char('日'), 3)), ds.get_utf8(offset + 2));
        assert_eq!(None, ds.get_utf8(offset + 5));
    }

    #[test]
    fn test_invalid_utf8_is_one_byte_at_a_time() {
        let mut ds = DataSource::string(b"\xe6\x97a\xff".to_vec());

        assert_eq!(Some((Unit::Invalid(0xe6), 1)), ds.get_utf8(0));
        assert_eq!(Some((Unit::Invalid(0x97), 1)), ds.get_utf8(1));
        assert_eq!(Some((Unit::Char('a'), 1)), ds.get_utf8(2));
        assert_eq!(Some((Unit::Invalid(0xff), 1)), ds.get_utf8(3));
        assert_eq!(None, ds.get_utf8(4));
    }

    #[test]
    fn test_set_byte_drops_cached_window() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        file.flush().unwrap();

        let handle = File::open(file.path()).unwrap();
        let mut ds = DataSource::file(Box::new(handle)).unwrap();
        assert_eq!(Some(b'h'), ds.get_byte(0));

        let mut writer = file.reopen().unwrap();
        writer.write_all(b"J").unwrap();
        writer.flush().unwrap();

        // Still the cached copy.
        assert_eq!(Some(b'h'), ds.get_byte(0));
        ds.set_byte(0, b'J');
        assert_eq!(Some(b'J'), ds.get_byte(0));
    }

    #[test]
    fn test_update_filesize() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();
        file.flush().unwrap();

        let handle = File::open(file.path()).unwrap();
        let mut ds = DataSource::file(Box::new(handle)).unwrap();
        assert_eq!(3, ds.filesize());
        assert_eq!(None, ds.get_byte(3));

        file.write_all(b"def").unwrap();
        file.flush().unwrap();
        ds.update_filesize();
        assert_eq!(6, ds.filesize());
        assert_eq!(Some(b'd'), ds.get_byte(3));
    }

    #[test]
    fn test_pipe_growth() {
        let reader = ScriptedReader::new(vec![Step::Data(b"x".to_vec())]);
        let handle = reader.clone();
        let mut ds = DataSource::pipe(Box::new(reader));

        assert_eq!(Some(b'x'), ds.get_byte(0));
        assert_eq!(1, ds.filesize());
        assert!(ds.may_still_grow());

        handle.push(Step::Eof);
        assert_eq!(None, ds.get_byte(1));
        assert!(!ds.may_still_grow());
        assert_eq!(1, ds.filesize());
    }

    #[test]
    fn test_bol() {
        let mut ds = DataSource::string(b"abc\ndef\r\nghi\rjkl".to_vec());
        let text = b"abc\ndef\r\nghi\rjkl";
        assert_eq!(16, text.len());

        assert_eq!(0, ds.bol(0, 0));
        assert_eq!(0, ds.bol(2, 0));
        // On the terminator itself: still the same paragraph.
        assert_eq!(0, ds.bol(3, 0));
        assert_eq!(4, ds.bol(4, 0));
        assert_eq!(4, ds.bol(7, 0));
        // The `\n` of a `\r\n` pair belongs to the line before it.
        assert_eq!(4, ds.bol(8, 0));
        assert_eq!(9, ds.bol(11, 0));
        assert_eq!(13, ds.bol(15, 0));
        // At or past the end.
        assert_eq!(16, ds.bol(16, 0));
        assert_eq!(16, ds.bol(99, 0));
        // Limited lookback.
        assert_eq!(6, ds.bol(7, 6));
    }

    #[test]
    fn test_eol() {
        let mut ds = DataSource::string(b"abc\ndef\r\nghi\rjkl".to_vec());

        assert_eq!(4, ds.eol(0));
        assert_eq!(4, ds.eol(3));
        assert_eq!(9, ds.eol(4));
        assert_eq!(13, ds.eol(9));
        assert_eq!(16, ds.eol(13));
        assert_eq!(16, ds.eol(16));
    }

    #[test]
    fn test_bol_and_eol_across_file_windows() {
        let mut bytes = vec![b'x'; FILE_BLOCK_SIZE * 2 + 100];
        bytes[10] = b'\n';
        let mut ds = file_source(&bytes);

        assert_eq!(11, ds.bol(FILE_BLOCK_SIZE as u64 * 2 + 50, 0));
        assert_eq!(bytes.len() as u64, ds.eol(11));
        assert_eq!(
            b"xxxx"[..].as_bstr(),
            ds.chunk(FILE_BLOCK_SIZE as u64 - 4).unwrap().as_bstr()
        );
    }
}
