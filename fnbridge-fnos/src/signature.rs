//! Authx request signing
//!
//! Every fnOS API request carries an `Authx` header of the form
//! `nonce={nonce}&timestamp={timestamp}&sign={sign}` where
//! `sign = md5(api_key _ path _ nonce _ timestamp _ md5(body) _ api_secret)`.
//! The signature is deterministic given (path, body, nonce, timestamp).

use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

const API_KEY: &str = "NDzZTVxnRKP8Z0jXg1VAMonaG8akvh";
const API_SECRET: &str = "16CCEB3D-AB42-077D-36A1-F355324E4237";

/// Signature parameters for one request.
#[derive(Debug, Clone)]
pub struct AuthxParams {
    pub nonce: String,
    pub timestamp: u64,
    pub sign: String,
}

pub fn md5_hex(text: &str) -> String {
    format!("{:x}", md5::compute(text.as_bytes()))
}

/// Six-digit numeric nonce, also injected into mutating request bodies.
pub fn generate_nonce() -> String {
    rand::thread_rng().gen_range(100_000..1_000_000).to_string()
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Compute the signature for explicit nonce/timestamp values.
pub fn sign_path(path: &str, body: Option<&str>, nonce: &str, timestamp: u64) -> String {
    let body_md5 = md5_hex(body.unwrap_or(""));
    let payload = format!("{API_KEY}_{path}_{nonce}_{timestamp}_{body_md5}_{API_SECRET}");
    md5_hex(&payload)
}

pub fn generate_authx(path: &str, body: Option<&str>) -> AuthxParams {
    let nonce = generate_nonce();
    let timestamp = now_millis();
    let sign = sign_path(path, body, &nonce, timestamp);
    AuthxParams {
        nonce,
        timestamp,
        sign,
    }
}

/// The `Authx` header value for one request.
pub fn authx_string(path: &str, body: Option<&str>) -> String {
    let p = generate_authx(path, body);
    format!("nonce={}&timestamp={}&sign={}", p.nonce, p.timestamp, p.sign)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_hex_known_value() {
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn sign_is_deterministic_for_fixed_inputs() {
        let a = sign_path("/v/api/v1/play/info", Some("{}"), "123456", 1_700_000_000_000);
        let b = sign_path("/v/api/v1/play/info", Some("{}"), "123456", 1_700_000_000_000);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn sign_varies_with_path_and_body() {
        let base = sign_path("/a", None, "111111", 1);
        assert_ne!(base, sign_path("/b", None, "111111", 1));
        assert_ne!(base, sign_path("/a", Some("x"), "111111", 1));
    }

    #[test]
    fn nonce_is_six_digits() {
        for _ in 0..32 {
            let n = generate_nonce();
            assert_eq!(n.len(), 6);
            assert!(n.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn authx_string_shape() {
        let s = authx_string("/v/media/x/preset.m3u8", None);
        assert!(s.starts_with("nonce="));
        assert!(s.contains("&timestamp="));
        assert!(s.contains("&sign="));
    }
}
