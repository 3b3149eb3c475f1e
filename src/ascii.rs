use alloc::borrow::Cow;
use alloc::string::String;
use alloc::vec::Vec;

pub(crate) const CR: u8 = 13;
pub(crate) const LF: u8 = 10;
pub(crate) const SP: u8 = 32;
pub(crate) const COLON: u8 = 58;
pub(crate) const ZERO: u8 = 48;
pub(crate) const CRLF: &[u8] = &[CR, LF];

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Parse a run of ascii digits, rejecting anything else and values that overflow `usize`.
pub(crate) fn atoi(data: &[u8]) -> Option<usize> {
    if data.is_empty() {
        return None;
    }

    let mut val: usize = 0;
    for digit in data {
        if !digit.is_ascii_digit() {
            return None;
        }
        val = val
            .checked_mul(10)?
            .checked_add(usize::from(digit - ZERO))?;
    }

    Some(val)
}

/// Lenient integer parse of a header value: leading digits only, anything else yields 0.
pub(crate) fn atoi_lenient(data: &str) -> usize {
    let data = data.trim().as_bytes();
    let end = data
        .iter()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(data.len());

    atoi(&data[..end]).unwrap_or(0)
}

pub(crate) fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Lower case hex encoding of `data`, two characters per byte.
pub(crate) fn to_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for b in data {
        out.push(HEX_DIGITS[usize::from(b >> 4)] as char);
        out.push(HEX_DIGITS[usize::from(b & 0x0F)] as char);
    }
    out
}

/// Write `value` as exactly `dest.len()` zero padded hex digits.  Returns false when the value
/// does not fit.
pub(crate) fn write_hex_padded(mut value: usize, dest: &mut [u8]) -> bool {
    for slot in dest.iter_mut().rev() {
        *slot = HEX_DIGITS[value & 0x0F];
        value >>= 4;
    }
    value == 0
}

/// Decode `%XX` escapes and `+` as a space.  Invalid escapes are kept verbatim.  Borrows the
/// input when there is nothing to decode.
pub(crate) fn url_decode(data: &str) -> Cow<'_, str> {
    let bytes = data.as_bytes();
    if !bytes.iter().any(|b| *b == b'%' || *b == b'+') {
        return Cow::Borrowed(data);
    }

    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                match (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 2;
                    }
                    _ => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }

    match String::from_utf8(out) {
        Ok(s) => Cow::Owned(s),
        Err(e) => Cow::Owned(String::from_utf8_lossy(e.as_bytes()).into_owned()),
    }
}
