//! HMAC signing and AES-CBC/zero-padding encryption for the upstream
//! platform's `x-encrypt-key` handshake, ported from the reference
//! client's byte-for-byte behavior (Latin-1 key bytes, UTF-8 IV bytes,
//! zero padding rather than PKCS7).

use aes::cipher::{block_padding::NoPadding, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 over UTF-8 `query_string` keyed by `hmac_key`, hex-encoded.
pub fn hmac_sign(hmac_key: &str, query_string: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(hmac_key.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(query_string.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Builds the `k=v&`-joined, key-sorted signing string plus the trailing
/// `key=<hmac_key>` the upstream's front-end counterpart appends before
/// signing.
pub fn build_query_string(params: &[(&str, String)], hmac_key: &str) -> String {
    let mut sorted: Vec<&(&str, String)> = params.iter().collect();
    sorted.sort_by_key(|(k, _)| *k);
    let mut out = String::new();
    for (k, v) in sorted {
        out.push_str(k);
        out.push('=');
        out.push_str(v);
        out.push('&');
    }
    out.push_str("key=");
    out.push_str(hmac_key);
    out
}

/// AES-CBC encrypts `plaintext` with zero-padding to the 16-byte block
/// boundary (not PKCS7), then base64-encodes the ciphertext. `aes_key` is
/// interpreted as raw Latin-1 bytes (one byte per char) matching the
/// front-end's `CryptoJS.enc.Latin1.parse`; `iv` as UTF-8 bytes.
pub fn encrypt(aes_key: &str, iv: &str, plaintext: &str) -> Result<String, String> {
    let key_bytes: Vec<u8> = aes_key.chars().map(|c| c as u8).collect();
    let iv_bytes = iv.as_bytes();

    let mut buf = plaintext.as_bytes().to_vec();
    let block_size = 16;
    let pad = block_size - (buf.len() % block_size);
    let pad = if pad == block_size { 0 } else { pad };
    buf.resize(buf.len() + pad, 0u8);

    let ciphertext = match key_bytes.len() {
        16 => {
            let enc = Aes128CbcEnc::new_from_slices(&key_bytes, iv_bytes)
                .map_err(|e| format!("invalid AES-128 key/iv: {e}"))?;
            enc.encrypt_padded_vec_mut::<NoPadding>(&buf)
        }
        32 => {
            let enc = Aes256CbcEnc::new_from_slices(&key_bytes, iv_bytes)
                .map_err(|e| format!("invalid AES-256 key/iv: {e}"))?;
            enc.encrypt_padded_vec_mut::<NoPadding>(&buf)
        }
        other => return Err(format!("unsupported AES key length: {other} bytes")),
    };

    Ok(BASE64.encode(ciphertext))
}

/// A random string of at least 18 characters, matching the reference
/// client's `uuid4-without-dashes + last 6 digits of epoch millis` scheme.
pub fn generate_nonce() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let random_part: String = (0..26)
        .map(|_| std::char::from_digit(rng.gen_range(0..16), 16).unwrap())
        .collect();
    let millis_tail = chrono::Utc::now().timestamp_millis() % 1_000_000;
    format!("{random_part}{millis_tail:06}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_string_is_sorted_and_terminated_with_key() {
        let qs = build_query_string(
            &[
                ("userId", "7".to_string()),
                ("token", "abc".to_string()),
                ("timestamp", "123".to_string()),
            ],
            "hmac-secret",
        );
        assert_eq!(qs, "timestamp=123&token=abc&userId=7&key=hmac-secret");
    }

    #[test]
    fn hmac_sign_is_deterministic() {
        let a = hmac_sign("key", "payload");
        let b = hmac_sign("key", "payload");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn encrypt_roundtrips_with_zero_padding_removed() {
        let key = "0123456789abcdef"; // 16 bytes
        let iv = "abcdef0123456789"; // 16 bytes
        let ciphertext = encrypt(key, iv, "hello").expect("encrypt");
        let raw = BASE64.decode(ciphertext).expect("valid base64");
        assert_eq!(raw.len(), 16);

        use aes::cipher::BlockDecryptMut;
        type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
        let key_bytes: Vec<u8> = key.chars().map(|c| c as u8).collect();
        let dec = Aes128CbcDec::new_from_slices(&key_bytes, iv.as_bytes()).unwrap();
        let mut buf = raw;
        let plain = dec.decrypt_padded_mut::<NoPadding>(&mut buf).unwrap();
        let trimmed: Vec<u8> = plain.iter().copied().take_while(|b| *b != 0).collect();
        assert_eq!(String::from_utf8(trimmed).unwrap(), "hello");
    }

    #[test]
    fn nonce_is_at_least_18_chars() {
        let n = generate_nonce();
        assert!(n.len() >= 18, "nonce too short: {n}");
    }
}
