//! `%name%` placeholder substitution over a streamed body.
//!
//! The processor sees the body one fill at a time, so a placeholder may start in one fill and
//! end in a later one.  Partial names are carried between fills and replacement text that does
//! not fit the caller's buffer is cached and replayed first on the next fill.
//!
//! * `%%` produces a literal `%`.
//! * A name longer than [`TEMPLATE_PARAM_NAME_LENGTH`] is not a placeholder; it is emitted as
//!   is, opening `%` included.
//! * An unterminated placeholder at the end of the body is emitted as is.

use alloc::collections::VecDeque;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use core::task::Poll;

use crate::content::ContentSource;

/// Byte that opens and closes a placeholder.
pub const TEMPLATE_PLACEHOLDER: u8 = b'%';
/// Longest placeholder name.
pub const TEMPLATE_PARAM_NAME_LENGTH: usize = 32;

/// Content source that substitutes placeholders in the output of another source.
///
/// The length of the output is unknown, so responses built on a template are always sent
/// chunked (or close delimited to HTTP/1.0 peers).
pub struct TemplateSource<S, F> {
    inner: S,
    processor: F,
    name: Vec<u8>,
    in_placeholder: bool,
    inner_done: bool,
    cache: VecDeque<u8>,
    scratch: Vec<u8>,
}

impl<S, F> TemplateSource<S, F>
where
    S: ContentSource,
    F: FnMut(&str) -> String,
{
    /// Substitute placeholders in the output of `inner` with what `processor` returns for their
    /// name.
    pub fn new(inner: S, processor: F) -> Self {
        Self {
            inner,
            processor,
            name: Vec::with_capacity(TEMPLATE_PARAM_NAME_LENGTH),
            in_placeholder: false,
            inner_done: false,
            cache: VecDeque::new(),
            scratch: Vec::new(),
        }
    }

    fn process(&mut self, byte: u8) {
        if !self.in_placeholder {
            if byte == TEMPLATE_PLACEHOLDER {
                self.in_placeholder = true;
                self.name.clear();
            } else {
                self.cache.push_back(byte);
            }
            return;
        }

        if byte == TEMPLATE_PLACEHOLDER {
            self.in_placeholder = false;
            if self.name.is_empty() {
                self.cache.push_back(TEMPLATE_PLACEHOLDER);
            } else {
                let name = String::from_utf8_lossy(&self.name).to_string();
                let value = (self.processor)(&name);
                self.cache.extend(value.as_bytes());
            }
        } else if self.name.len() == TEMPLATE_PARAM_NAME_LENGTH {
            self.in_placeholder = false;
            self.cache.push_back(TEMPLATE_PLACEHOLDER);
            self.cache.extend(self.name.iter());
            self.cache.push_back(byte);
        } else {
            self.name.push(byte);
        }
    }

    fn finish(&mut self) {
        self.inner_done = true;
        if self.in_placeholder {
            self.in_placeholder = false;
            self.cache.push_back(TEMPLATE_PLACEHOLDER);
            self.cache.extend(self.name.iter());
        }
    }
}

impl<S, F> ContentSource for TemplateSource<S, F>
where
    S: ContentSource,
    F: FnMut(&str) -> String,
{
    fn fill(&mut self, buf: &mut [u8]) -> Poll<usize> {
        let mut written = 0;

        while written < buf.len() {
            if !self.cache.is_empty() {
                let n = self.cache.len().min(buf.len() - written);
                for (dst, src) in buf[written..written + n].iter_mut().zip(self.cache.drain(..n)) {
                    *dst = src;
                }
                written += n;
                continue;
            }
            if self.inner_done {
                break;
            }

            let want = buf.len() - written;
            if self.scratch.len() < want {
                self.scratch = vec![0; want];
            }
            let mut scratch = core::mem::take(&mut self.scratch);
            let filled = self.inner.fill(&mut scratch[..want]);
            match filled {
                Poll::Pending => {
                    self.scratch = scratch;
                    if written == 0 {
                        return Poll::Pending;
                    }
                    break;
                }
                Poll::Ready(0) => self.finish(),
                Poll::Ready(n) => {
                    for &b in &scratch[..n] {
                        self.process(b);
                    }
                }
            }
            self.scratch = scratch;
        }

        Poll::Ready(written)
    }

    fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::format;

    use super::*;
    use crate::content::MemorySource;

    fn vars(name: &str) -> String {
        match name {
            "NAME" => "world".to_string(),
            "LONGER_VALUE" => "a replacement much longer than its name".to_string(),
            "EMPTY" => String::new(),
            _ => format!("?{name}?"),
        }
    }

    fn render(body: &'static str, fill_size: usize) -> String {
        let mut src = TemplateSource::new(MemorySource::new(body.as_bytes()), vars);
        let mut out = Vec::new();
        let mut buf = vec![0u8; fill_size];
        loop {
            match src.fill(&mut buf) {
                Poll::Ready(0) => break,
                Poll::Ready(n) => out.extend_from_slice(&buf[..n]),
                Poll::Pending => panic!("memory source never pends"),
            }
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_substitution() {
        assert_eq!(render("Hello %NAME%!", 64), "Hello world!");
        assert_eq!(render("100%% sure", 64), "100% sure");
        assert_eq!(render("[%EMPTY%]", 64), "[]");
        assert_eq!(render("%LONGER_VALUE%", 64), "a replacement much longer than its name");
    }

    #[test]
    fn test_unterminated_placeholder_is_literal() {
        assert_eq!(render("50% off", 64), "50% off");
        assert_eq!(render("trailing %", 64), "trailing %");
    }

    #[test]
    fn test_long_name_is_literal() {
        let body = "x%abcdefghijklmnopqrstuvwxyz0123456789% y";
        // the name overflows at 33 bytes, so the closing % opens a new (unterminated) one
        assert_eq!(render(body, 64), body);
    }

    #[test]
    fn test_every_fill_size() {
        let body = "<p>%NAME%</p><p>%LONGER_VALUE%</p>%%<b>%unknown%</b>%EMPTY%.";
        let expected = render(body, 1024);
        assert_eq!(
            expected,
            "<p>world</p><p>a replacement much longer than its name</p>%<b>?unknown?</b>."
        );
        for size in 1..body.len() + 8 {
            assert_eq!(render(body, size), expected, "fill size {size}");
        }
    }
}
