//! Incremental HTTP request parser.
//!
//! Bytes are fed in whatever slices the transport delivers them.  Nothing depends on where a
//! slice ends: the request line and headers are collected a line at a time, bodies are decoded
//! byte by byte, and file uploads are streamed to the handler as they arrive rather than
//! buffered whole.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::ascii::{CR, LF, url_decode};
use crate::config::ServerConfig;
use crate::request::{Param, Request, RequestError};

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
const TEXT_PLAIN: &str = "text/plain";

/// A slice of an uploaded file, delivered to upload handlers.
#[derive(Debug)]
pub struct UploadChunk<'a> {
    /// Form field name of the upload.
    pub name: &'a str,
    /// File name supplied by the client.
    pub filename: &'a str,
    /// Content type of the part, empty when not given.
    pub content_type: &'a str,
    /// Offset of `data` in the file.
    pub index: usize,
    /// File bytes.
    pub data: &'a [u8],
    /// This is the last slice of the file.
    pub is_final: bool,
}

/// What the parser reports while consuming a request.
pub(crate) trait ParseEvents {
    /// The request line and all headers were read.  Returning false skips over the body
    /// without decoding it.
    fn headers_complete(&mut self, req: &mut Request) -> bool;

    /// A slice of a raw body.  Returning true means the handler took the bytes and they need
    /// not be buffered.
    fn body(&mut self, req: &mut Request, data: &[u8], index: usize, total: usize) -> bool;

    /// A slice of an uploaded file.
    fn upload(&mut self, req: &mut Request, chunk: &UploadChunk);

    /// The whole request was read.
    fn complete(&mut self, req: &mut Request);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    RequestLine,
    Headers,
    Body,
    Complete,
    Error,
}

#[derive(Debug)]
enum BodyMode {
    /// Buffered as is, or handed to a body handler.
    Raw { consumed: bool },
    /// `text/plain` body that may still turn out to be a form.
    Detect { seen: Vec<u8> },
    /// `name=value&...`
    Form { pair: Vec<u8> },
    Multipart(Multipart),
    /// Counted and dropped.
    Skip,
}

#[derive(Debug)]
enum PartPhase {
    /// Before the first delimiter; `matched` bytes of `--boundary` seen.
    Preamble { matched: usize },
    /// Right after a delimiter, expecting `--` or CRLF.
    AfterDelimiter { seen: Vec<u8> },
    /// Reading the headers of a part.
    Headers { line: Vec<u8> },
    /// Reading part content; `matched` bytes of the delimiter are held back.
    Data { matched: usize },
    /// After the closing delimiter.
    Epilogue,
}

#[derive(Debug, Default)]
struct Part {
    name: String,
    filename: String,
    content_type: String,
    is_file: bool,
    value: Vec<u8>,
    buffer: Vec<u8>,
    size: usize,
}

#[derive(Debug)]
struct Multipart {
    /// `\r\n--` followed by the boundary.
    delimiter: Vec<u8>,
    phase: PartPhase,
    part: Option<Part>,
}

/// Parse state of one request.
#[derive(Debug)]
pub(crate) struct RequestParser {
    phase: Phase,
    line: Vec<u8>,
    parsed_length: usize,
    body: Option<BodyMode>,
    raw: Vec<u8>,
    max_line_length: usize,
    max_body_size: usize,
    upload_chunk_size: usize,
}

impl RequestParser {
    pub(crate) fn new(config: &ServerConfig) -> Self {
        Self {
            phase: Phase::RequestLine,
            line: Vec::new(),
            parsed_length: 0,
            body: None,
            raw: Vec::new(),
            max_line_length: config.max_line_length,
            max_body_size: config.max_body_size,
            upload_chunk_size: config.upload_chunk_size.max(1),
        }
    }

    /// Start over for the next request on the same connection.
    pub(crate) fn reset(&mut self) {
        self.phase = Phase::RequestLine;
        self.line.clear();
        self.parsed_length = 0;
        self.body = None;
        self.raw.clear();
    }

    /// All of the request was read.
    pub(crate) fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }

    /// Consume `data`, returning how many bytes belonged to this request.  Anything after the
    /// declared body is left unconsumed.
    pub(crate) fn feed<E: ParseEvents>(
        &mut self,
        req: &mut Request,
        data: &[u8],
        events: &mut E,
    ) -> Result<usize, RequestError> {
        let result = self.feed_inner(req, data, events);
        if result.is_err() {
            self.phase = Phase::Error;
            debug!("request parse error");
        }
        result
    }

    fn feed_inner<E: ParseEvents>(
        &mut self,
        req: &mut Request,
        data: &[u8],
        events: &mut E,
    ) -> Result<usize, RequestError> {
        let mut pos = 0;

        while pos < data.len() {
            match self.phase {
                Phase::RequestLine | Phase::Headers => {
                    let rest = &data[pos..];
                    match rest.iter().position(|b| *b == LF) {
                        Some(end) => {
                            self.push_line(&rest[..end])?;
                            pos += end + 1;
                            let mut line = core::mem::take(&mut self.line);
                            if line.last() == Some(&CR) {
                                line.pop();
                            }
                            self.on_line(req, &line, events)?;
                        }
                        None => {
                            self.push_line(rest)?;
                            pos = data.len();
                        }
                    }
                }
                Phase::Body => {
                    let remaining = req.content_length - self.parsed_length;
                    let take = remaining.min(data.len() - pos);
                    let slice = &data[pos..pos + take];
                    self.on_body(req, slice, events)?;
                    self.parsed_length += take;
                    pos += take;
                    if self.parsed_length == req.content_length {
                        self.finish_body(req, events)?;
                    }
                }
                Phase::Complete => return Ok(pos),
                Phase::Error => return Err(RequestError::ProtocolError("request already failed")),
            }
        }

        self.flush_upload(req, events);
        Ok(pos)
    }

    fn push_line(&mut self, data: &[u8]) -> Result<(), RequestError> {
        if self.line.len() + data.len() > self.max_line_length + 1 {
            return Err(RequestError::LineTooLong);
        }
        self.line.extend_from_slice(data);
        Ok(())
    }

    fn on_line<E: ParseEvents>(
        &mut self,
        req: &mut Request,
        line: &[u8],
        events: &mut E,
    ) -> Result<(), RequestError> {
        if line.len() > self.max_line_length {
            return Err(RequestError::LineTooLong);
        }

        match self.phase {
            Phase::RequestLine => {
                if line.is_empty() {
                    return Err(RequestError::ProtocolError("empty request line"));
                }
                req.parse_request_line(line)?;
                self.phase = Phase::Headers;
            }
            Phase::Headers if line.is_empty() => self.end_of_headers(req, events)?,
            Phase::Headers => req.parse_header_line(line)?,
            _ => {}
        }
        Ok(())
    }

    fn end_of_headers<E: ParseEvents>(
        &mut self,
        req: &mut Request,
        events: &mut E,
    ) -> Result<(), RequestError> {
        let parse_body = events.headers_complete(req);

        if req.content_length == 0 {
            self.complete(req, events);
            return Ok(());
        }

        let mode = if !parse_body {
            BodyMode::Skip
        } else if req.is_multipart {
            let mut delimiter = Vec::with_capacity(req.boundary.len() + 4);
            delimiter.extend_from_slice(b"\r\n--");
            delimiter.extend_from_slice(req.boundary.as_bytes());
            BodyMode::Multipart(Multipart {
                delimiter,
                phase: PartPhase::Preamble { matched: 0 },
                part: None,
            })
        } else if req.content_type.eq_ignore_ascii_case(FORM_URLENCODED) {
            BodyMode::Form { pair: Vec::new() }
        } else if req.content_type.eq_ignore_ascii_case(TEXT_PLAIN) {
            BodyMode::Detect { seen: Vec::new() }
        } else {
            self.raw_mode(req)
        };

        self.body = Some(mode);
        self.phase = Phase::Body;
        Ok(())
    }

    fn raw_mode(&mut self, req: &mut Request) -> BodyMode {
        if req.content_length > self.max_body_size {
            req.body_too_large = true;
        }
        BodyMode::Raw { consumed: false }
    }

    fn on_body<E: ParseEvents>(
        &mut self,
        req: &mut Request,
        data: &[u8],
        events: &mut E,
    ) -> Result<(), RequestError> {
        let Some(mut mode) = self.body.take() else {
            return Ok(());
        };

        let mut decided = None;
        if let BodyMode::Detect { seen } = &mut mode {
            for (i, &b) in data.iter().enumerate() {
                if is_param_char(b) && seen.len() < self.max_line_length {
                    seen.push(b);
                    continue;
                }
                // a form body opens with `name=`
                decided = Some((b == b'=' && !seen.is_empty(), core::mem::take(seen), i));
                break;
            }
            if decided.is_none() {
                self.body = Some(mode);
                return Ok(());
            }
        }

        let result = match decided {
            Some((is_form, seen, split)) => {
                mode = if is_form {
                    BodyMode::Form { pair: Vec::new() }
                } else {
                    self.raw_mode(req)
                };
                // `seen` always starts at the beginning of the body
                let index = self.parsed_length + split;
                self.dispatch(&mut mode, req, &seen, 0, events)
                    .and_then(|_| self.dispatch(&mut mode, req, &data[split..], index, events))
            }
            None => {
                let index = self.parsed_length;
                self.dispatch(&mut mode, req, data, index, events)
            }
        };

        self.body = Some(mode);
        result
    }

    fn dispatch<E: ParseEvents>(
        &mut self,
        mode: &mut BodyMode,
        req: &mut Request,
        data: &[u8],
        index: usize,
        events: &mut E,
    ) -> Result<(), RequestError> {
        if data.is_empty() {
            return Ok(());
        }
        match mode {
            BodyMode::Raw { consumed } => {
                let total = req.content_length;
                if events.body(req, data, index, total) {
                    *consumed = true;
                } else if !req.body_too_large && !*consumed {
                    self.raw.extend_from_slice(data);
                }
                Ok(())
            }
            BodyMode::Form { pair } => {
                for &b in data {
                    if b == b'&' {
                        add_form_pair(req, pair);
                        pair.clear();
                    } else if pair.len() < self.max_body_size {
                        pair.push(b);
                    } else {
                        req.body_too_large = true;
                    }
                }
                Ok(())
            }
            BodyMode::Multipart(mp) => {
                for &b in data {
                    self.multipart_byte(mp, req, b, events)?;
                }
                Ok(())
            }
            BodyMode::Detect { .. } | BodyMode::Skip => Ok(()),
        }
    }

    fn finish_body<E: ParseEvents>(
        &mut self,
        req: &mut Request,
        events: &mut E,
    ) -> Result<(), RequestError> {
        match self.body.take() {
            Some(BodyMode::Detect { seen }) => {
                // the whole body was one token without '='
                let mut mode = self.raw_mode(req);
                let start = self.parsed_length - seen.len();
                self.dispatch(&mut mode, req, &seen, start, events)?;
                self.store_raw(req, &mode);
            }
            Some(BodyMode::Form { pair }) => {
                if !pair.is_empty() {
                    add_form_pair(req, &pair);
                }
            }
            Some(mode @ BodyMode::Raw { .. }) => self.store_raw(req, &mode),
            Some(BodyMode::Multipart(mp)) => {
                if !matches!(mp.phase, PartPhase::Epilogue) {
                    debug!("multipart body ended before its closing boundary");
                }
            }
            Some(BodyMode::Skip) | None => {}
        }

        self.complete(req, events);
        Ok(())
    }

    fn store_raw(&mut self, req: &mut Request, mode: &BodyMode) {
        if let BodyMode::Raw { consumed: false } = mode
            && !req.body_too_large
        {
            req.body = Some(core::mem::take(&mut self.raw));
        }
    }

    fn complete<E: ParseEvents>(&mut self, req: &mut Request, events: &mut E) {
        self.phase = Phase::Complete;
        events.complete(req);
    }

    fn multipart_byte<E: ParseEvents>(
        &mut self,
        mp: &mut Multipart,
        req: &mut Request,
        b: u8,
        events: &mut E,
    ) -> Result<(), RequestError> {
        match &mut mp.phase {
            PartPhase::Preamble { matched } => {
                // the body opens with the delimiter minus its leading CRLF
                if b != mp.delimiter[*matched + 2] {
                    return Err(RequestError::BodyError("multipart body does not start with its boundary"));
                }
                *matched += 1;
                if *matched + 2 == mp.delimiter.len() {
                    mp.phase = PartPhase::AfterDelimiter { seen: Vec::new() };
                }
            }
            PartPhase::AfterDelimiter { seen } => {
                seen.push(b);
                if seen.len() < 2 {
                    return Ok(());
                }
                let seen = core::mem::take(seen);
                match seen.as_slice() {
                    b"--" => {
                        self.end_part(mp, req, events);
                        mp.phase = PartPhase::Epilogue;
                    }
                    b"\r\n" => {
                        self.end_part(mp, req, events);
                        mp.phase = PartPhase::Headers { line: Vec::new() };
                        mp.part = Some(Part::default());
                    }
                    _ if mp.part.is_none() => {
                        return Err(RequestError::BodyError("malformed multipart boundary"));
                    }
                    _ => {
                        // looked like a delimiter but was part of the content
                        mp.phase = PartPhase::Data { matched: 0 };
                        self.part_data(&mut mp.part, req, &mp.delimiter, events);
                        for &b in &seen {
                            self.multipart_byte(mp, req, b, events)?;
                        }
                    }
                }
            }
            PartPhase::Headers { line } => {
                if b != LF {
                    if line.len() >= self.max_line_length {
                        return Err(RequestError::LineTooLong);
                    }
                    line.push(b);
                    return Ok(());
                }
                if line.last() == Some(&CR) {
                    line.pop();
                }
                let line = core::mem::take(line);
                if line.is_empty() {
                    mp.phase = PartPhase::Data { matched: 0 };
                } else if let Some(part) = mp.part.as_mut() {
                    parse_part_header(part, &line)?;
                }
            }
            PartPhase::Data { matched } => {
                if b == mp.delimiter[*matched] {
                    *matched += 1;
                    if *matched == mp.delimiter.len() {
                        mp.phase = PartPhase::AfterDelimiter { seen: Vec::new() };
                    }
                    return Ok(());
                }

                let held = *matched;
                *matched = 0;
                if held > 0 {
                    self.part_data(&mut mp.part, req, &mp.delimiter[..held], events);
                }
                if b == mp.delimiter[0] {
                    mp.phase = PartPhase::Data { matched: 1 };
                } else {
                    self.part_data(&mut mp.part, req, &[b], events);
                }
            }
            PartPhase::Epilogue => {}
        }
        Ok(())
    }

    fn part_data<E: ParseEvents>(
        &mut self,
        part: &mut Option<Part>,
        req: &mut Request,
        data: &[u8],
        events: &mut E,
    ) {
        let Some(part) = part.as_mut() else {
            return;
        };

        if !part.is_file {
            let room = self.max_body_size.saturating_sub(part.value.len());
            if room < data.len() {
                req.body_too_large = true;
            }
            part.value.extend_from_slice(&data[..room.min(data.len())]);
            return;
        }

        for &b in data {
            part.buffer.push(b);
            if part.buffer.len() >= self.upload_chunk_size {
                send_upload(part, req, events, false);
            }
        }
    }

    fn end_part<E: ParseEvents>(&mut self, mp: &mut Multipart, req: &mut Request, events: &mut E) {
        let Some(mut part) = mp.part.take() else {
            return;
        };

        if part.is_file {
            send_upload(&mut part, req, events, true);
            if part.size > 0 {
                req.add_param(Param::new(part.name, part.filename, true, true, part.size));
            }
        } else {
            let value = String::from_utf8_lossy(&part.value).to_string();
            req.add_param(Param::new(part.name, value, true, false, 0));
        }
    }

    /// Hand buffered upload bytes to the handler at the end of every received slice so that
    /// uploads stream at the pace the transport delivers them.
    fn flush_upload<E: ParseEvents>(&mut self, req: &mut Request, events: &mut E) {
        if let Some(BodyMode::Multipart(Multipart {
            part: Some(part),
            ..
        })) = self.body.as_mut()
            && part.is_file
            && !part.buffer.is_empty()
        {
            send_upload(part, req, events, false);
        }
    }
}

fn send_upload<E: ParseEvents>(part: &mut Part, req: &mut Request, events: &mut E, is_final: bool) {
    if part.buffer.is_empty() && !is_final {
        return;
    }
    let chunk = UploadChunk {
        name: &part.name,
        filename: &part.filename,
        content_type: &part.content_type,
        index: part.size,
        data: &part.buffer,
        is_final,
    };
    events.upload(req, &chunk);
    part.size += part.buffer.len();
    part.buffer.clear();
}

fn parse_part_header(part: &mut Part, line: &[u8]) -> Result<(), RequestError> {
    let line = core::str::from_utf8(line)
        .map_err(|_| RequestError::BodyError("multipart header is not valid utf8"))?;
    let Some((name, value)) = line.split_once(':') else {
        return Err(RequestError::BodyError("malformed multipart header"));
    };
    let name = name.trim();
    let value = value.trim();

    if name.eq_ignore_ascii_case("Content-Disposition") {
        for attr in value.split(';').map(str::trim) {
            if let Some(v) = attr.strip_prefix("name=") {
                part.name = v.trim_matches('"').to_string();
            } else if let Some(v) = attr.strip_prefix("filename=") {
                part.filename = v.trim_matches('"').to_string();
                part.is_file = true;
            }
        }
    } else if name.eq_ignore_ascii_case("Content-Type") {
        part.content_type = value.to_string();
        part.is_file = true;
    }
    Ok(())
}

/// `name=value` pair of a form body.  Values that look like JSON and bare values are kept
/// whole under the name `body`.
fn add_form_pair(req: &mut Request, pair: &[u8]) {
    let pair = String::from_utf8_lossy(pair);
    let named = !pair.starts_with('{') && !pair.starts_with('[');

    let (name, value) = match pair.find('=') {
        Some(eq) if named && eq > 0 => (&pair[..eq], &pair[eq + 1..]),
        _ => ("body", &pair[..]),
    };
    req.add_param(Param::new(
        url_decode(name).into_owned(),
        url_decode(value).into_owned(),
        true,
        false,
        0,
    ));
}

fn is_param_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~' | b'%' | b'+' | b'[' | b']')
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::format;
    use std::vec;

    use super::*;
    use crate::request::{ANY_HEADER, Method};

    #[derive(Default)]
    struct Recorder {
        headers_complete: usize,
        complete: usize,
        uploads: Vec<(String, String, Vec<u8>, bool)>,
        body: Vec<u8>,
        take_body: bool,
        skip_body: bool,
    }

    impl ParseEvents for Recorder {
        fn headers_complete(&mut self, req: &mut Request) -> bool {
            self.headers_complete += 1;
            req.add_interesting_header(ANY_HEADER);
            !self.skip_body
        }

        fn body(&mut self, _req: &mut Request, data: &[u8], index: usize, _total: usize) -> bool {
            assert_eq!(index, self.body.len());
            self.body.extend_from_slice(data);
            self.take_body
        }

        fn upload(&mut self, _req: &mut Request, chunk: &UploadChunk) {
            match self.uploads.last_mut() {
                Some((name, _, data, done)) if name == chunk.name && !*done => {
                    assert_eq!(chunk.index, data.len());
                    data.extend_from_slice(chunk.data);
                    *done = chunk.is_final;
                }
                _ => {
                    assert_eq!(chunk.index, 0);
                    self.uploads.push((
                        chunk.name.to_string(),
                        chunk.filename.to_string(),
                        chunk.data.to_vec(),
                        chunk.is_final,
                    ));
                }
            }
        }

        fn complete(&mut self, _req: &mut Request) {
            self.complete += 1;
        }
    }

    fn config() -> ServerConfig {
        ServerConfig {
            upload_chunk_size: 7,
            ..ServerConfig::default()
        }
    }

    fn parse_chunks(chunks: &[&[u8]], config: &ServerConfig) -> (Request, Recorder, usize) {
        let mut req = Request::new((0, 0));
        let mut parser = RequestParser::new(config);
        let mut events = Recorder::default();
        let mut consumed = 0;
        for chunk in chunks {
            consumed += parser.feed(&mut req, chunk, &mut events).unwrap();
        }
        assert!(parser.is_complete());
        (req, events, consumed)
    }

    fn summary(req: &Request, events: &Recorder) -> String {
        format!(
            "{:?} {} {:?} {:?} {:?} {:?} {:?} {}",
            req.method(),
            req.raw_url(),
            req.headers(),
            req.params(),
            req.body(),
            events.uploads,
            events.body,
            events.complete
        )
    }

    /// Parse `data` whole and split in two at every offset; all parses must agree.
    fn assert_boundary_independent(data: &[u8]) -> (Request, Recorder) {
        let config = config();
        let (req, events, consumed) = parse_chunks(&[data], &config);
        assert_eq!(consumed, data.len());
        let expected = summary(&req, &events);

        for split in 1..data.len() {
            let (a, b) = data.split_at(split);
            let (r, e, consumed) = parse_chunks(&[a, b], &config);
            assert_eq!(consumed, data.len());
            assert_eq!(summary(&r, &e), expected, "split at {split}");
        }

        let bytes: Vec<&[u8]> = data.chunks(1).collect();
        let (r, e, _) = parse_chunks(&bytes, &config);
        assert_eq!(summary(&r, &e), expected, "byte at a time");

        (req, events)
    }

    #[test]
    fn test_get_request() {
        let (req, events) = assert_boundary_independent(
            b"GET /status?verbose=1 HTTP/1.1\r\nHost: device\r\nLast-Event-ID: 42\r\n\r\n",
        );
        assert_eq!(req.method(), Method::GET);
        assert_eq!(req.url(), "/status");
        assert_eq!(req.arg("verbose"), Some("1"));
        assert_eq!(req.header("last-event-id").unwrap().value(), "42");
        assert_eq!(events.headers_complete, 1);
        assert_eq!(events.complete, 1);
    }

    #[test]
    fn test_bare_lf_line_endings() {
        let (req, _, _) = parse_chunks(&[b"GET / HTTP/1.0\nHost: x\n\n"], &config());
        assert_eq!(req.version(), 0);
        assert_eq!(req.host(), "x");
    }

    #[test]
    fn test_form_post() {
        let (req, _) = assert_boundary_independent(
            b"POST /form HTTP/1.1\r\n\
              Content-Type: application/x-www-form-urlencoded\r\n\
              Content-Length: 17\r\n\r\n\
              a=1&b=two%20words",
        );
        let a = req.param("a", true, false).unwrap();
        assert_eq!(a.value(), "1");
        assert!(a.is_post());
        let b = req.param("b", true, false).unwrap();
        assert_eq!(b.value(), "two words");
        assert!(b.is_post());
        assert_eq!(req.params().len(), 2);
        assert_eq!(req.body(), None);
    }

    #[test]
    fn test_form_bare_values() {
        let body = "{\"on\":true}&x";
        let data = format!(
            "POST / HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let (req, _, _) = parse_chunks(&[data.as_bytes()], &config());
        assert_eq!(req.params()[0].name(), "body");
        assert_eq!(req.params()[0].value(), "{\"on\":true}");
        assert_eq!(req.params()[1].name(), "body");
        assert_eq!(req.params()[1].value(), "x");
    }

    #[test]
    fn test_text_plain_detection() {
        let (req, _) = assert_boundary_independent(
            b"POST / HTTP/1.1\r\nContent-Type: text/plain\r\nContent-Length: 9\r\n\r\nkey=v+a+l",
        );
        assert_eq!(req.param("key", true, false).unwrap().value(), "v a l");

        let (req, _) = assert_boundary_independent(
            b"POST / HTTP/1.1\r\nContent-Type: text/plain\r\nContent-Length: 11\r\n\r\nhello world",
        );
        assert!(req.params().is_empty());
        assert_eq!(req.body(), Some(&b"hello world"[..]));

        let (req, _) = assert_boundary_independent(
            b"POST / HTTP/1.1\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\nhello",
        );
        assert_eq!(req.body(), Some(&b"hello"[..]));
    }

    #[test]
    fn test_raw_body() {
        let (req, events) = assert_boundary_independent(
            b"PUT /cfg HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 13\r\n\r\n{\"led\":\"on\"}\n",
        );
        assert_eq!(req.body(), Some(&b"{\"led\":\"on\"}\n"[..]));
        assert_eq!(events.body, b"{\"led\":\"on\"}\n");
    }

    #[test]
    fn test_raw_body_taken_by_handler() {
        let mut req = Request::new((0, 0));
        let mut parser = RequestParser::new(&config());
        let mut events = Recorder {
            take_body: true,
            ..Default::default()
        };
        parser
            .feed(&mut req, b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nab", &mut events)
            .unwrap();
        parser.feed(&mut req, b"cd", &mut events).unwrap();
        assert_eq!(events.body, b"abcd");
        assert_eq!(req.body(), None);
        assert!(parser.is_complete());
    }

    #[test]
    fn test_oversized_body_not_buffered() {
        let config = ServerConfig {
            max_body_size: 4,
            ..ServerConfig::default()
        };
        let (req, events, _) = parse_chunks(
            &[b"POST / HTTP/1.1\r\nContent-Length: 6\r\n\r\n", b"abcdef"],
            &config,
        );
        assert!(req.body_too_large());
        assert_eq!(req.body(), None);
        assert_eq!(events.complete, 1);
    }

    #[test]
    fn test_excess_bytes_are_not_consumed() {
        let mut req = Request::new((0, 0));
        let mut parser = RequestParser::new(&config());
        let mut events = Recorder::default();
        let data = b"POST / HTTP/1.1\r\nContent-Length: 2\r\n\r\nokGET / HTTP/1.1\r\n\r\n";
        let consumed = parser.feed(&mut req, data, &mut events).unwrap();
        assert_eq!(&data[consumed..], b"GET / HTTP/1.1\r\n\r\n");
        assert_eq!(req.body(), Some(&b"ok"[..]));
        assert_eq!(parser.feed(&mut req, b"more", &mut events), Ok(0));
    }

    #[test]
    fn test_skipped_body() {
        let mut req = Request::new((0, 0));
        let mut parser = RequestParser::new(&config());
        let mut events = Recorder {
            skip_body: true,
            ..Default::default()
        };
        let data = b"POST /f HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\n\
Content-Length: 7\r\n\r\na=1&b=2";
        assert_eq!(parser.feed(&mut req, data, &mut events), Ok(data.len()));
        assert!(parser.is_complete());
        assert!(events.body.is_empty());
        assert!(req.params().is_empty());
        assert_eq!(req.body(), None);
    }

    const MULTIPART: &[u8] = b"POST /upload HTTP/1.1\r\n\
Content-Type: multipart/form-data; boundary=XyZ\r\n\
Content-Length: 225\r\n\
\r\n\
--XyZ\r\n\
Content-Disposition: form-data; name=\"title\"\r\n\
\r\n\
my file\r\n\
--XyZ\r\n\
Content-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\
Content-Type: text/plain\r\n\
\r\n\
line one\r\n\
--XyZnot a boundary\r\n\
-- still data\r\n\
--XyZ--\r\n\
epilogue";

    #[test]
    fn test_multipart_upload() {
        let head = MULTIPART.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        assert_eq!(MULTIPART.len() - head, 225);

        let (req, events) = assert_boundary_independent(MULTIPART);
        assert_eq!(req.param("title", true, false).unwrap().value(), "my file");

        let file = req.param("file", true, true).unwrap();
        assert_eq!(file.value(), "a.txt");
        let content = b"line one\r\n--XyZnot a boundary\r\n-- still data";
        assert_eq!(file.size(), content.len());

        assert_eq!(events.uploads.len(), 1);
        let (name, filename, data, done) = &events.uploads[0];
        assert_eq!(name, "file");
        assert_eq!(filename, "a.txt");
        assert_eq!(data.as_slice(), &content[..]);
        assert!(*done);
        assert_eq!(req.body(), None);
    }

    #[test]
    fn test_multipart_bad_preamble() {
        let mut req = Request::new((0, 0));
        let mut parser = RequestParser::new(&config());
        let mut events = Recorder::default();
        let res = parser.feed(
            &mut req,
            b"POST / HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=b\r\nContent-Length: 10\r\n\r\n--c\r\n",
            &mut events,
        );
        assert!(matches!(res, Err(RequestError::BodyError(_))));
        assert!(parser.feed(&mut req, b"x", &mut events).is_err());
    }

    #[test]
    fn test_protocol_errors() {
        let cases: [&[u8]; 4] = [
            b"\r\nGET / HTTP/1.1\r\n\r\n",
            b"FETCH / HTTP/1.1\r\n\r\n",
            b"GET / HTTP/1.1\r\nbroken header\r\n\r\n",
            b"GET / HTTP/1.1\r\nContent-Length: -1\r\n\r\n",
        ];
        for case in cases {
            let mut req = Request::new((0, 0));
            let mut parser = RequestParser::new(&config());
            assert!(parser.feed(&mut req, case, &mut Recorder::default()).is_err());
        }
    }

    #[test]
    fn test_line_too_long() {
        let config = ServerConfig {
            max_line_length: 16,
            ..ServerConfig::default()
        };
        let mut req = Request::new((0, 0));
        let mut parser = RequestParser::new(&config);
        let long = vec![b'a'; 40];
        assert_eq!(
            parser.feed(&mut req, &long, &mut Recorder::default()),
            Err(RequestError::LineTooLong)
        );
    }
}
