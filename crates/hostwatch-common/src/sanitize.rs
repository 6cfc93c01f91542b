//! UTF-8 boundary filter. Applied to every inbound command body, every chunk
//! of child-process output, and script content before it is written to disk.

/// Strict RFC 3629 validation.
pub fn is_valid_utf8(bytes: &[u8]) -> bool {
    std::str::from_utf8(bytes).is_ok()
}

/// Copy valid sequences verbatim; each invalid byte sequence collapses to a
/// single ASCII space. The result is always valid UTF-8 and never longer
/// than the input.
pub fn clean(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    let mut input = bytes;
    while !input.is_empty() {
        match std::str::from_utf8(input) {
            Ok(valid) => {
                out.push_str(valid);
                break;
            }
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&input[..valid_up_to]));
                out.push(' ');
                // error_len is None only for a truncated sequence at the end.
                let skip = err.error_len().unwrap_or(input.len() - valid_up_to);
                input = &input[valid_up_to + skip..];
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_input_is_unchanged() {
        let text = "привет, мир — 你好";
        assert!(is_valid_utf8(text.as_bytes()));
        assert_eq!(clean(text.as_bytes()), text);
    }

    #[test]
    fn lone_invalid_byte_becomes_space() {
        assert_eq!(clean(b"ab\xffcd"), "ab cd");
    }

    #[test]
    fn invalid_sequence_becomes_single_space() {
        // 0xF0 0x9F starts a 4-byte sequence that never completes.
        assert_eq!(clean(b"x\xf0\x9f"), "x ");
    }

    #[test]
    fn overlong_encoding_is_rejected() {
        // Overlong NUL (0xC0 0x80) is not valid UTF-8.
        let cleaned = clean(b"a\xc0\x80b");
        assert!(is_valid_utf8(cleaned.as_bytes()));
        assert!(cleaned.starts_with('a') && cleaned.ends_with('b'));
    }

    #[test]
    fn clean_is_idempotent() {
        let samples: &[&[u8]] = &[
            b"plain",
            b"\xff\xfe\xfd",
            b"mixed \xe2\x82 tail \xf4\x90\x80\x80",
            "русский текст".as_bytes(),
            b"",
        ];
        for sample in samples {
            let once = clean(sample);
            assert!(is_valid_utf8(once.as_bytes()));
            assert_eq!(clean(once.as_bytes()), once);
            assert!(once.len() <= sample.len());
        }
    }

    #[test]
    fn output_never_longer_than_input() {
        let noisy: Vec<u8> = (0u8..=255).collect();
        let cleaned = clean(&noisy);
        assert!(cleaned.len() <= noisy.len());
        assert!(is_valid_utf8(cleaned.as_bytes()));
    }
}
