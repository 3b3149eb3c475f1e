//! Sources of response bodies.
//!
//! A [`ContentSource`] is asked to fill a scratch buffer sized to whatever the transport can
//! take right now.  Returning [`Poll::Pending`] means "nothing ready yet, ask again on the next
//! ack or poll"; it is not an error.

use alloc::borrow::Cow;
use alloc::string::String;
use alloc::vec::Vec;
use core::task::Poll;

use embedded_io::{Read, ReadReady};

/// Producer of response body bytes.
pub trait ContentSource {
    /// Write up to `buf.len()` bytes into `buf`.  `Ready(0)` marks the end of the content.
    fn fill(&mut self, buf: &mut [u8]) -> Poll<usize>;

    /// False once the source can no longer produce its content.  A response whose source
    /// turns invalid is failed and its connection closed.
    fn is_valid(&self) -> bool {
        true
    }

    /// Total length, when known up front.
    fn len(&self) -> Option<usize> {
        None
    }
}

/// Body held in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Cow<'static, [u8]>,
    pos: usize,
}

impl MemorySource {
    /// Serve `data`.
    pub fn new(data: impl Into<Cow<'static, [u8]>>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }

    pub(crate) fn remaining(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    pub(crate) fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.data.len());
    }
}

impl From<String> for MemorySource {
    fn from(value: String) -> Self {
        Self::new(value.into_bytes())
    }
}

impl From<Vec<u8>> for MemorySource {
    fn from(value: Vec<u8>) -> Self {
        Self::new(value)
    }
}

impl ContentSource for MemorySource {
    fn fill(&mut self, buf: &mut [u8]) -> Poll<usize> {
        let remaining = self.remaining();
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.advance(n);
        Poll::Ready(n)
    }

    fn len(&self) -> Option<usize> {
        Some(self.data.len())
    }
}

/// Body produced by a closure called with the scratch buffer and the number of bytes produced
/// so far.
pub struct CallbackSource<F> {
    filler: F,
    index: usize,
    len: Option<usize>,
}

impl<F> CallbackSource<F>
where
    F: FnMut(&mut [u8], usize) -> Poll<usize>,
{
    /// `len` is the declared total, `None` when the closure decides when to stop.
    pub fn new(len: Option<usize>, filler: F) -> Self {
        Self {
            filler,
            index: 0,
            len,
        }
    }
}

impl<F> ContentSource for CallbackSource<F>
where
    F: FnMut(&mut [u8], usize) -> Poll<usize>,
{
    fn fill(&mut self, buf: &mut [u8]) -> Poll<usize> {
        let buf = match self.len {
            Some(len) => {
                let left = len.saturating_sub(self.index);
                let cap = left.min(buf.len());
                &mut buf[..cap]
            }
            None => buf,
        };
        if buf.is_empty() {
            return Poll::Ready(0);
        }

        match (self.filler)(buf, self.index) {
            Poll::Ready(n) => {
                let n = n.min(buf.len());
                self.index += n;
                Poll::Ready(n)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn len(&self) -> Option<usize> {
        self.len
    }
}

/// Body read from a blocking byte stream such as a file.  The stream is only read when it
/// reports data ready, so filling never blocks.
pub struct StreamSource<R> {
    reader: R,
    len: Option<usize>,
    valid: bool,
}

impl<R: Read + ReadReady> StreamSource<R> {
    /// `len` is the number of bytes the stream will yield, when known.
    pub fn new(reader: R, len: Option<usize>) -> Self {
        Self {
            reader,
            len,
            valid: true,
        }
    }
}

impl<R: Read + ReadReady> ContentSource for StreamSource<R> {
    fn fill(&mut self, buf: &mut [u8]) -> Poll<usize> {
        if !self.valid {
            return Poll::Ready(0);
        }
        match self.reader.read_ready() {
            Ok(true) => {}
            Ok(false) => return Poll::Pending,
            Err(_) => {
                self.valid = false;
                return Poll::Ready(0);
            }
        }
        match self.reader.read(buf) {
            Ok(n) => Poll::Ready(n),
            Err(_) => {
                self.valid = false;
                Poll::Ready(0)
            }
        }
    }

    fn is_valid(&self) -> bool {
        self.valid
    }

    fn len(&self) -> Option<usize> {
        self.len
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec;

    use embedded_io::{ErrorKind, ErrorType};

    use super::*;

    #[test]
    fn test_memory_source() {
        let mut src = MemorySource::new(&b"hello world"[..]);
        let mut buf = [0u8; 4];
        assert_eq!(src.fill(&mut buf), Poll::Ready(4));
        assert_eq!(&buf, b"hell");
        assert_eq!(src.fill(&mut buf), Poll::Ready(4));
        assert_eq!(src.fill(&mut buf), Poll::Ready(3));
        assert_eq!(&buf[..3], b"rld");
        assert_eq!(src.fill(&mut buf), Poll::Ready(0));
        assert_eq!(src.len(), Some(11));
    }

    #[test]
    fn test_callback_source_respects_length() {
        let mut calls = vec![];
        let mut src = CallbackSource::new(Some(10), |buf: &mut [u8], index| {
            calls.push((buf.len(), index));
            buf.fill(b'a');
            Poll::Ready(buf.len())
        });
        let mut buf = [0u8; 8];
        assert_eq!(src.fill(&mut buf), Poll::Ready(8));
        assert_eq!(src.fill(&mut buf), Poll::Ready(2));
        assert_eq!(src.fill(&mut buf), Poll::Ready(0));
        drop(src);
        assert_eq!(calls, vec![(8, 0), (2, 8)]);
    }

    #[test]
    fn test_callback_source_pending() {
        let mut ready = false;
        let mut src = CallbackSource::new(None, move |buf: &mut [u8], _| {
            if !ready {
                ready = true;
                return Poll::Pending;
            }
            buf[0] = b'x';
            Poll::Ready(1)
        });
        let mut buf = [0u8; 8];
        assert_eq!(src.fill(&mut buf), Poll::Pending);
        assert_eq!(src.fill(&mut buf), Poll::Ready(1));
    }

    struct FlakyReader {
        ready: bool,
        fail: bool,
    }

    impl ErrorType for FlakyReader {
        type Error = ErrorKind;
    }

    impl Read for FlakyReader {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            if self.fail {
                return Err(ErrorKind::Other);
            }
            buf[0] = b'z';
            Ok(1)
        }
    }

    impl ReadReady for FlakyReader {
        fn read_ready(&mut self) -> Result<bool, Self::Error> {
            Ok(self.ready)
        }
    }

    #[test]
    fn test_stream_source() {
        let mut src = StreamSource::new(FlakyReader { ready: false, fail: false }, None);
        let mut buf = [0u8; 4];
        assert_eq!(src.fill(&mut buf), Poll::Pending);
        src.reader.ready = true;
        assert_eq!(src.fill(&mut buf), Poll::Ready(1));
        assert!(src.is_valid());

        src.reader.fail = true;
        assert_eq!(src.fill(&mut buf), Poll::Ready(0));
        assert!(!src.is_valid());
    }
}
