//! Byte-stream endpoints exposed by a launched process.

use crate::error::Result;

/// Read side of a process stream.
///
/// End of stream is a sentinel, not an error: `read` returns `Ok(0)` once the
/// peer end has closed and all buffered bytes are drained, so callers can use
/// a single read loop for data and termination.
pub trait Readable {
    /// Reads up to `buf.len()` bytes, blocking until at least one byte is
    /// available or the stream ends. Returns the number of bytes read, `Ok(0)`
    /// at end of stream. Reading a closed endpoint is an illegal-state error.
    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Reads until `buf` is full or the stream ends; returns the total number
    /// of bytes read, which is short only at end of stream.
    fn read_fully(&self, buf: &mut [u8]) -> Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            let n = self.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    /// Closes the endpoint. Idempotent; subsequent reads fail.
    fn close(&self) -> Result<()>;
}

/// Write side of a process stream.
pub trait Writable {
    /// Writes the whole of `buf`, blocking until the OS accepts it, and
    /// returns `buf.len()`. Writing to a closed endpoint is an illegal-state
    /// error; the peer end having closed surfaces as a broken-channel OS
    /// error on the call.
    fn write(&self, buf: &[u8]) -> Result<usize>;

    /// No-op by default; pipe writes are unbuffered.
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Closes the endpoint, signalling end of stream to a reader of the peer
    /// end. Idempotent; subsequent writes fail.
    fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Hands out its payload in fixed-size chunks, like a pipe under
    /// back-pressure would.
    struct Chunked {
        data: Mutex<Vec<u8>>,
        chunk: usize,
    }

    impl Readable for Chunked {
        fn read(&self, buf: &mut [u8]) -> Result<usize> {
            let mut data = self.data.lock().unwrap();
            let n = data.len().min(self.chunk).min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
            data.drain(..n);
            Ok(n)
        }

        fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn read_fully_loops_over_short_reads() {
        let source = Chunked {
            data: Mutex::new(b"hello world".to_vec()),
            chunk: 3,
        };
        let mut buf = [0u8; 11];
        assert_eq!(source.read_fully(&mut buf).unwrap(), 11);
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn read_fully_returns_short_count_at_end_of_stream() {
        let source = Chunked {
            data: Mutex::new(b"abc".to_vec()),
            chunk: 2,
        };
        let mut buf = [0u8; 16];
        assert_eq!(source.read_fully(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
    }
}
