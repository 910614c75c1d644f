//! Property-based tests for output normalization
//!
//! These tests use proptest to generate random terminal output and verify
//! that normalization is total, idempotent and chunking-independent.

use proptest::prelude::*;
use shellpilot::ansi::{normalize, StreamNormalizer};

/// Fragments a real terminal stream is made of
fn fragment() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        "[a-zA-Z0-9 .:/_-]{1,12}".prop_map(|s| s.into_bytes()),
        Just(b"\r\n".to_vec()),
        Just(b"\r".to_vec()),
        Just(b"\n".to_vec()),
        Just(b"\t".to_vec()),
        (0u8..108).prop_map(|n| format!("\x1b[{}m", n).into_bytes()),
        (1u16..200, 1u16..200).prop_map(|(r, c)| format!("\x1b[{};{}H", r, c).into_bytes()),
        Just(b"\x1b[?2004h".to_vec()),
        Just(b"\x1b[K".to_vec()),
        "[a-z@:~ ]{0,20}".prop_map(|t| format!("\x1b]0;{}\x07", t).into_bytes()),
        Just(b"\x1b(B".to_vec()),
        Just("\u{2713}".as_bytes().to_vec()),
        Just("\u{e9}".as_bytes().to_vec()),
    ]
}

fn stream() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(fragment(), 0..40).prop_map(|parts| parts.concat())
}

proptest! {
    #[test]
    fn test_normalize_doesnt_panic_on_random_bytes(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = normalize(&bytes);
    }

    #[test]
    fn test_normalize_is_idempotent(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let once = normalize(&bytes);
        prop_assert_eq!(normalize(once.as_bytes()), once);
    }

    #[test]
    fn test_output_has_no_escape_or_carriage_return(bytes in stream()) {
        let out = normalize(&bytes);
        prop_assert!(!out.contains('\x1b'));
        prop_assert!(!out.contains('\r'));
        prop_assert!(out.chars().all(|c| c == '\n' || c == '\t' || !c.is_control()));
    }

    #[test]
    fn test_plain_text_preserved(text in "[a-zA-Z0-9 .,:;/_-]{0,200}") {
        prop_assert_eq!(normalize(text.as_bytes()), text);
    }

    #[test]
    fn test_streaming_matches_one_shot(bytes in stream(), cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..8)) {
        let mut points: Vec<usize> = cuts.iter().map(|i| i.index(bytes.len() + 1)).collect();
        points.sort_unstable();

        let mut normalizer = StreamNormalizer::new();
        let mut out = String::new();
        let mut start = 0;
        for point in points {
            out.push_str(&normalizer.feed(&bytes[start..point]));
            start = point;
        }
        out.push_str(&normalizer.feed(&bytes[start..]));
        out.push_str(&normalizer.finish());

        prop_assert_eq!(out, normalize(&bytes));
    }
}
