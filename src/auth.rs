//! Basic and Digest (RFC 2617, `qop=auth`, MD5) authentication helpers.
//!
//! These are pure functions; [`Request::authenticate`](crate::request::Request::authenticate)
//! and [`Request::request_authentication`](crate::request::Request::request_authentication)
//! wire them to the `Authorization` and `WWW-Authenticate` headers.

use alloc::format;
use alloc::string::String;

use base64ct::{Base64, Encoding};
use md5::{Digest, Md5};

use crate::ascii::to_hex;

const DEFAULT_REALM: &str = "httplite";

/// Lower case hex MD5 of `data`.
pub fn md5_hex(data: &[u8]) -> String {
    to_hex(&Md5::digest(data))
}

/// Compare the credentials of a `Basic` `Authorization` header (the part after `Basic `) with
/// `username` and `password`.
pub fn check_basic_authentication(hash: &str, username: &str, password: &str) -> bool {
    if username.is_empty() || password.is_empty() {
        return false;
    }

    let credentials = format!("{username}:{password}");
    if hash.len() != Base64::encoded_len(credentials.as_bytes()) {
        return false;
    }

    Base64::encode_string(credentials.as_bytes()) == hash
}

/// `username:realm:HA1` line as stored in htdigest files.  The trailing HA1 part is what
/// [`check_digest_authentication`] accepts as a password with `password_is_hash` set.
pub fn generate_digest_hash(username: &str, password: &str, realm: &str) -> String {
    let ha1 = md5_hex(format!("{username}:{realm}:{password}").as_bytes());
    format!("{username}:{realm}:{ha1}")
}

/// Value of a `WWW-Authenticate: Digest ...` challenge.  `seeds` feed the nonce and opaque
/// values.
pub fn request_digest_authentication(realm: Option<&str>, seeds: (u32, u32)) -> String {
    format!(
        "realm=\"{}\", qop=\"auth\", nonce=\"{}\", opaque=\"{}\"",
        realm.unwrap_or(DEFAULT_REALM),
        md5_hex(&seeds.0.to_le_bytes()),
        md5_hex(&seeds.1.to_le_bytes()),
    )
}

/// What the server knows about the expected Digest credentials.  Optional fields are only
/// checked when set.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestCredentials<'a> {
    /// Expected user name.
    pub username: &'a str,
    /// Plain password, or HA1 when `password_is_hash` is set.
    pub password: &'a str,
    /// Expected realm.
    pub realm: Option<&'a str>,
    /// Treat `password` as a precomputed HA1.
    pub password_is_hash: bool,
    /// Expected nonce.
    pub nonce: Option<&'a str>,
    /// Expected opaque value.
    pub opaque: Option<&'a str>,
    /// Expected request URI.
    pub uri: Option<&'a str>,
}

/// Verify the parameters of a `Digest` `Authorization` header (the part after `Digest `)
/// against `expected` for a request made with `method`.
pub fn check_digest_authentication(header: &str, method: &str, expected: &DigestCredentials) -> bool {
    if expected.username.is_empty() || expected.password.is_empty() || header.is_empty() {
        return false;
    }

    let mut username = "";
    let mut realm = "";
    let mut nonce = "";
    let mut uri = "";
    let mut response = "";
    let mut qop = "";
    let mut nc = "";
    let mut cnonce = "";

    for pair in header.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some((name, value)) = pair.split_once('=') else {
            return false;
        };
        let value = unquote(value.trim());

        match name.trim() {
            "username" => {
                if value != expected.username {
                    return false;
                }
                username = value;
            }
            "realm" => {
                if expected.realm.is_some_and(|r| r != value) {
                    return false;
                }
                realm = value;
            }
            "nonce" => {
                if expected.nonce.is_some_and(|n| n != value) {
                    return false;
                }
                nonce = value;
            }
            "opaque" => {
                if expected.opaque.is_some_and(|o| o != value) {
                    return false;
                }
            }
            "uri" => {
                if expected.uri.is_some_and(|u| u != value) {
                    return false;
                }
                uri = value;
            }
            "response" => response = value,
            "qop" => qop = value,
            "nc" => nc = value,
            "cnonce" => cnonce = value,
            _ => {}
        }
    }

    let ha1 = if expected.password_is_hash {
        String::from(expected.password)
    } else {
        md5_hex(format!("{username}:{realm}:{}", expected.password).as_bytes())
    };
    let ha2 = md5_hex(format!("{method}:{uri}").as_bytes());
    let calculated = md5_hex(format!("{ha1}:{nonce}:{nc}:{cnonce}:{qop}:{ha2}").as_bytes());

    response == calculated
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    #[test]
    fn test_md5_hex() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_basic_authentication() {
        // base64("admin:secret")
        let hash = "YWRtaW46c2VjcmV0";
        assert!(check_basic_authentication(hash, "admin", "secret"));
        assert!(!check_basic_authentication(hash, "admin", "wrong"));
        assert!(!check_basic_authentication(hash, "root", "secret"));
        assert!(!check_basic_authentication("", "admin", "secret"));
    }

    fn client_response(user: &str, realm: &str, pass: &str, method: &str, uri: &str, nonce: &str) -> String {
        let ha1 = md5_hex(format!("{user}:{realm}:{pass}").as_bytes());
        let ha2 = md5_hex(format!("{method}:{uri}").as_bytes());
        md5_hex(format!("{ha1}:{nonce}:00000001:0a4f113b:auth:{ha2}").as_bytes())
    }

    fn authorization(user: &str, realm: &str, uri: &str, nonce: &str, response: &str) -> String {
        format!(
            "username=\"{user}\", realm=\"{realm}\", nonce=\"{nonce}\", uri=\"{uri}\", \
             qop=auth, nc=00000001, cnonce=\"0a4f113b\", response=\"{response}\", opaque=\"5ccc\""
        )
    }

    #[test]
    fn test_digest_authentication() {
        let nonce = "dcd98b7102dd2f0e8b11d0f600bfb0c093";
        let response = client_response("Mufasa", "testrealm", "Circle Of Life", "GET", "/dir/index.html", nonce);
        let header = authorization("Mufasa", "testrealm", "/dir/index.html", nonce, &response);

        let mut expected = DigestCredentials {
            username: "Mufasa",
            password: "Circle Of Life",
            realm: Some("testrealm"),
            ..Default::default()
        };
        assert!(check_digest_authentication(&header, "GET", &expected));
        assert!(!check_digest_authentication(&header, "POST", &expected));

        expected.password = "wrong";
        assert!(!check_digest_authentication(&header, "GET", &expected));

        expected.password = "Circle Of Life";
        expected.realm = Some("otherrealm");
        assert!(!check_digest_authentication(&header, "GET", &expected));

        expected.realm = None;
        expected.uri = Some("/elsewhere");
        assert!(!check_digest_authentication(&header, "GET", &expected));
    }

    #[test]
    fn test_digest_authentication_with_stored_hash() {
        let line = generate_digest_hash("admin", "secret", "dev");
        let ha1 = line.rsplit(':').next().unwrap();
        assert!(line.starts_with("admin:dev:"));

        let nonce = "abc123";
        let response = client_response("admin", "dev", "secret", "GET", "/", nonce);
        let header = authorization("admin", "dev", "/", nonce, &response);

        let expected = DigestCredentials {
            username: "admin",
            password: ha1,
            realm: Some("dev"),
            password_is_hash: true,
            ..Default::default()
        };
        assert!(check_digest_authentication(&header, "GET", &expected));
    }

    #[test]
    fn test_digest_challenge() {
        let challenge = request_digest_authentication(None, (1, 2));
        assert!(challenge.starts_with("realm=\"httplite\", qop=\"auth\", nonce=\""));
        assert!(challenge.contains(&md5_hex(&1u32.to_le_bytes())));
        assert!(challenge.ends_with(&format!("opaque=\"{}\"", md5_hex(&2u32.to_le_bytes()))));
    }
}
