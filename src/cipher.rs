use crate::error::CipherError;

// Base64 alphabet with the padding symbol folded in as position 64
pub const ALPHABET: &[u8; 65] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/=";
const ALPHABET_LEN: i64 = 65;

fn position(symbol: char, offset: usize) -> Result<i64, CipherError> {
    u8::try_from(symbol)
        .ok()
        .and_then(|b| ALPHABET.iter().position(|&a| a == b))
        .and_then(|p| i64::try_from(p).ok())
        .ok_or(CipherError::InvalidSymbol { symbol, offset })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn shift(key: i64, text: &str) -> Result<String, CipherError> {
    text.chars()
        .enumerate()
        .map(|(offset, symbol)| {
            let p = position(symbol, offset)?;
            let shifted = (p + key).rem_euclid(ALPHABET_LEN);
            Ok(char::from(ALPHABET[shifted as usize]))
        })
        .collect()
}

/// Reverses the positional substitution: every symbol moves `key` places
/// back in [`ALPHABET`]. The result is plain base64 text.
///
/// # Errors
///
/// Fails on the first character that is not part of the alphabet.
pub fn decode(key: i64, text: &str) -> Result<String, CipherError> {
    shift(-key.rem_euclid(ALPHABET_LEN), text)
}

/// Forward substitution, the inverse of [`decode`].
///
/// # Errors
///
/// Fails on the first character that is not part of the alphabet.
pub fn encode(key: i64, text: &str) -> Result<String, CipherError> {
    shift(key.rem_euclid(ALPHABET_LEN), text)
}

fn xor_cycle(key: &[u8], data: &[u8]) -> Vec<u8> {
    data.iter()
        .zip(key.iter().cycle())
        .map(|(byte, key_byte)| byte ^ key_byte)
        .collect()
}

/// XORs the hex ciphertext with the repeating hex key. Every output byte
/// becomes the code point of the same value, so bytes above 0x7f come out
/// as Latin-1 characters rather than being decoded as UTF-8.
///
/// # Errors
///
/// Fails if either argument is not hex or the key is empty.
pub fn decrypt(key: &str, ciphertext: &str) -> Result<String, CipherError> {
    let key = hex::decode(key)?;
    if key.is_empty() {
        return Err(CipherError::EmptyKey);
    }
    let ciphertext = hex::decode(ciphertext)?;
    Ok(xor_cycle(&key, &ciphertext)
        .into_iter()
        .map(char::from)
        .collect())
}

/// XORs `plaintext` with the repeating `key` and hex-encodes the result.
///
/// # Errors
///
/// Fails if the key is empty.
pub fn xor_encrypt(key: &[u8], plaintext: &[u8]) -> Result<String, CipherError> {
    if key.is_empty() {
        return Err(CipherError::EmptyKey);
    }
    Ok(hex::encode(xor_cycle(key, plaintext)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decode_shifts_back_and_wraps() {
        assert_eq!(decode(1, "B").unwrap(), "A");
        assert_eq!(decode(1, "A").unwrap(), "=");
        assert_eq!(decode(3, "B").unwrap(), "/");
        assert_eq!(decode(0, "QUJD").unwrap(), "QUJD");
    }

    #[test]
    fn keys_outside_the_alphabet_wrap() {
        assert_eq!(decode(66, "B").unwrap(), "A");
        assert_eq!(decode(-1, "A").unwrap(), "B");
        assert_eq!(decode(130, "xyz").unwrap(), "xyz");
    }

    #[test]
    fn decode_empty_is_empty() {
        for key in 0..65 {
            assert_eq!(decode(key, "").unwrap(), "");
        }
    }

    #[test]
    fn decode_rejects_unknown_symbols() {
        assert_eq!(
            decode(4, "AB-C"),
            Err(CipherError::InvalidSymbol {
                symbol: '-',
                offset: 2
            })
        );
        assert!(matches!(
            decode(4, "é"),
            Err(CipherError::InvalidSymbol { symbol: 'é', .. })
        ));
    }

    #[test]
    fn decrypt_cycles_the_key() {
        let key = hex::encode([0x01, 0x02]);
        let ct = hex::encode([b'a' ^ 1, b'b' ^ 2, b'c' ^ 1]);
        assert_eq!(decrypt(&key, &ct).unwrap(), "abc");
    }

    #[test]
    fn decrypt_maps_high_bytes_to_code_points() {
        let out = decrypt("ff", "00").unwrap();
        assert_eq!(out, "\u{ff}");
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn decrypt_rejects_bad_input() {
        assert_eq!(decrypt("", "00"), Err(CipherError::EmptyKey));
        assert!(matches!(decrypt("zz", "00"), Err(CipherError::InvalidHex(_))));
        assert!(matches!(decrypt("00", "abc"), Err(CipherError::InvalidHex(_))));
    }

    proptest! {
        #[test]
        fn substitution_round_trips(key in 0_i64..65, text in "[A-Za-z0-9+/=]{0,64}") {
            let encoded = encode(key, &text).unwrap();
            prop_assert_eq!(decode(key, &encoded).unwrap(), text);
        }

        #[test]
        fn xor_round_trips(
            key in proptest::collection::vec(any::<u8>(), 1..32),
            plaintext in proptest::collection::vec(any::<u8>(), 0..256),
        ) {
            let ct = xor_encrypt(&key, &plaintext).unwrap();
            let decrypted = decrypt(&hex::encode(&key), &ct).unwrap();
            let bytes: Vec<u8> = decrypted.chars().map(|c| u8::try_from(c).unwrap()).collect();
            prop_assert_eq!(bytes, plaintext);
        }
    }
}
