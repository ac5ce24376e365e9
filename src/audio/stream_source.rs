use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, Condvar, Mutex};

/// Back-pressure ceiling on bytes buffered ahead of the read cursor.
const MAX_AHEAD_BYTES: usize = 8 * 1024 * 1024;

/// Bytes shared between the download task and the decode thread. The
/// whole stream is retained so symphonia can seek backwards.
struct Buffer {
    bytes: Vec<u8>,
    cursor: usize,
    complete: bool,
    /// The reader was dropped; the writer should stop feeding us.
    abandoned: bool,
    error: Option<String>,
}

struct Shared {
    buffer: Mutex<Buffer>,
    wakeup: Condvar,
}

/// Blocking `Read + Seek` view over a progressive HTTP download, handed
/// to symphonia as its media source. A read past the downloaded prefix
/// parks until more bytes arrive or the download settles.
pub struct HttpStreamSource {
    shared: Arc<Shared>,
}

impl HttpStreamSource {
    pub fn new() -> (Self, StreamWriter) {
        let shared = Arc::new(Shared {
            buffer: Mutex::new(Buffer {
                bytes: Vec::with_capacity(1024 * 1024),
                cursor: 0,
                complete: false,
                abandoned: false,
                error: None,
            }),
            wakeup: Condvar::new(),
        });
        let writer = StreamWriter {
            shared: Arc::clone(&shared),
        };
        (Self { shared }, writer)
    }
}

impl Drop for HttpStreamSource {
    fn drop(&mut self) {
        let mut buffer = self.shared.buffer.lock().unwrap();
        buffer.abandoned = true;
        self.shared.wakeup.notify_all();
    }
}

impl Read for HttpStreamSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut buffer = self.shared.buffer.lock().unwrap();
        while buffer.cursor >= buffer.bytes.len() && !buffer.complete && buffer.error.is_none() {
            buffer = self.shared.wakeup.wait(buffer).unwrap();
        }

        if let Some(error) = &buffer.error {
            return Err(io::Error::new(io::ErrorKind::Other, error.clone()));
        }

        let available = buffer.bytes.len().saturating_sub(buffer.cursor);
        if available == 0 {
            return Ok(0);
        }
        let n = buf.len().min(available);
        let start = buffer.cursor;
        buf[..n].copy_from_slice(&buffer.bytes[start..start + n]);
        buffer.cursor += n;

        // The writer may be parked on back-pressure.
        self.shared.wakeup.notify_all();
        Ok(n)
    }
}

impl Seek for HttpStreamSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let mut buffer = self.shared.buffer.lock().unwrap();
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(offset) => buffer.cursor as i64 + offset,
            SeekFrom::End(offset) => buffer.bytes.len() as i64 + offset,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before the start of the stream",
            ));
        }
        buffer.cursor = target as usize;
        Ok(target as u64)
    }
}

impl symphonia::core::io::MediaSource for HttpStreamSource {
    fn is_seekable(&self) -> bool {
        true
    }

    /// Unknown until the download settles; symphonia treats `None` as an
    /// unbounded stream.
    fn byte_len(&self) -> Option<u64> {
        let buffer = self.shared.buffer.lock().unwrap();
        buffer.complete.then(|| buffer.bytes.len() as u64)
    }
}

/// Feeding end, held by the download task.
pub struct StreamWriter {
    shared: Arc<Shared>,
}

impl StreamWriter {
    /// Appends a downloaded chunk, parking when too far ahead of the
    /// reader. Returns false once the reader is gone or the stream has
    /// settled, at which point the download should stop.
    pub fn write_bytes(&self, data: &[u8]) -> bool {
        let mut buffer = self.shared.buffer.lock().unwrap();
        while buffer.bytes.len().saturating_sub(buffer.cursor) >= MAX_AHEAD_BYTES
            && !buffer.complete
            && !buffer.abandoned
        {
            buffer = self.shared.wakeup.wait(buffer).unwrap();
        }
        if buffer.complete || buffer.abandoned {
            return false;
        }
        buffer.bytes.extend_from_slice(data);
        self.shared.wakeup.notify_all();
        true
    }

    /// Marks the download finished; pending reads drain and then hit EOF.
    pub fn finish(&self) {
        let mut buffer = self.shared.buffer.lock().unwrap();
        buffer.complete = true;
        self.shared.wakeup.notify_all();
    }

    /// Fails pending and future reads with `error`.
    pub fn set_error(&self, error: String) {
        let mut buffer = self.shared.buffer.lock().unwrap();
        buffer.error = Some(error);
        buffer.complete = true;
        self.shared.wakeup.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::io::MediaSource;

    #[test]
    fn reads_drain_written_bytes_in_order() {
        let (mut source, writer) = HttpStreamSource::new();
        assert!(writer.write_bytes(b"abc"));
        assert!(writer.write_bytes(b"def"));
        writer.finish();

        let mut out = [0u8; 4];
        assert_eq!(source.read(&mut out).unwrap(), 4);
        assert_eq!(&out, b"abcd");
        let mut rest = Vec::new();
        source.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"ef");
    }

    #[test]
    fn byte_len_is_unknown_until_the_download_settles() {
        let (source, writer) = HttpStreamSource::new();
        writer.write_bytes(b"abc");
        assert_eq!(source.byte_len(), None);
        writer.finish();
        assert_eq!(source.byte_len(), Some(3));
    }

    #[test]
    fn seeking_back_rereads_retained_bytes() {
        let (mut source, writer) = HttpStreamSource::new();
        writer.write_bytes(b"abcdef");
        writer.finish();

        let mut out = Vec::new();
        source.read_to_end(&mut out).unwrap();
        assert_eq!(source.seek(SeekFrom::Start(2)).unwrap(), 2);
        let mut rest = Vec::new();
        source.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"cdef");
    }

    #[test]
    fn seeking_before_the_start_is_rejected() {
        let (mut source, _writer) = HttpStreamSource::new();
        assert!(source.seek(SeekFrom::Current(-1)).is_err());
    }

    #[test]
    fn download_errors_surface_on_read() {
        let (mut source, writer) = HttpStreamSource::new();
        writer.set_error("connection reset".to_string());
        let mut out = [0u8; 8];
        let err = source.read(&mut out).unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn a_dropped_reader_stops_the_writer() {
        let (source, writer) = HttpStreamSource::new();
        assert!(writer.write_bytes(b"abc"));
        drop(source);
        assert!(!writer.write_bytes(b"def"));
    }
}
