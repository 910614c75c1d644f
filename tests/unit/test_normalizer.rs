//! Unit tests for output normalization

use shellpilot::ansi::{normalize, normalize_str, tail_excerpt, StreamNormalizer};

#[cfg(test)]
mod normalizer_tests {
    use super::*;

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(normalize(b"Hello, World!\n"), "Hello, World!\n");
        assert_eq!(normalize(b""), "");
    }

    #[test]
    fn test_colored_ls_output() {
        let raw = b"\x1b[0m\x1b[01;34mbin\x1b[0m  \x1b[01;32mdeploy.sh\x1b[0m  notes.txt\r\n";
        assert_eq!(normalize(raw), "bin  deploy.sh  notes.txt\n");
    }

    #[test]
    fn test_bash_prompt_with_title_and_bracketed_paste() {
        let raw = b"\x1b]0;ops@web01: ~\x07\x1b[?2004hops@web01:~$ ";
        assert_eq!(normalize(raw), "ops@web01:~$ ");
    }

    #[test]
    fn test_progress_bar_carriage_returns() {
        let raw = b"downloading  10%\rdownloading  50%\rdownloading 100%\r\n";
        assert_eq!(
            normalize(raw),
            "downloading  10%\ndownloading  50%\ndownloading 100%\n"
        );
    }

    #[test]
    fn test_charset_and_keypad_sequences() {
        assert_eq!(normalize(b"\x1b(Bplain\x1b="), "plain");
        assert_eq!(normalize(b"\x1b7saved\x1b8"), "saved");
    }

    #[test]
    fn test_dcs_string_removed() {
        assert_eq!(normalize(b"a\x1bPq#0;2;0;0;0\x1b\\b"), "ab");
    }

    #[test]
    fn test_invalid_utf8_is_replaced_not_dropped() {
        let out = normalize(b"ok \xff\xfe done");
        assert!(out.starts_with("ok "));
        assert!(out.ends_with(" done"));
        assert!(out.contains('\u{FFFD}'));
    }

    #[test]
    fn test_normalize_str_matches_bytes() {
        let text = "\x1b[33mwarn\x1b[0m\r\n";
        assert_eq!(normalize_str(text), normalize(text.as_bytes()));
    }

    #[test]
    fn test_stream_matches_one_shot_for_every_split() {
        let raw: &[u8] = b"\x1b]0;t\x07\x1b[1;31mred\x1b[0m\r\nnext\r\n\xe2\x9c\x93 done\x1b[K";
        let expected = normalize(raw);
        for split in 0..=raw.len() {
            let mut stream = StreamNormalizer::new();
            let mut out = stream.feed(&raw[..split]);
            out.push_str(&stream.feed(&raw[split..]));
            out.push_str(&stream.finish());
            assert_eq!(out, expected, "split at byte {}", split);
        }
    }

    #[test]
    fn test_stream_byte_by_byte() {
        let raw = b"\x1b[32mok\x1b[0m\r\n$ ";
        let mut stream = StreamNormalizer::new();
        let mut out = String::new();
        for byte in raw {
            out.push_str(&stream.feed(std::slice::from_ref(byte)));
        }
        out.push_str(&stream.finish());
        assert_eq!(out, "ok\n$ ");
    }

    #[test]
    fn test_tail_excerpt_char_boundaries() {
        let text = "é".repeat(10);
        let excerpt = tail_excerpt(&text, 3);
        assert_eq!(excerpt, "…ééé");
        assert_eq!(tail_excerpt("  \n", 5), "");
    }
}
