//! Encoding detection for legacy spreadsheet exports.
//!
//! Fallback order, applied once to the whole buffer:
//! 1. UTF-8 byte order mark -> UTF-8 (BOM stripped)
//! 2. strict Shift-JIS, no replacement characters
//! 3. UTF-8, invalid sequences replaced with U+FFFD

use encoding_rs::SHIFT_JIS;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

pub fn decode_legacy_csv(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(UTF8_BOM) {
        return String::from_utf8_lossy(rest).into_owned();
    }

    match SHIFT_JIS.decode_without_bom_handling_and_without_replacement(bytes) {
        Some(text) => text.into_owned(),
        None => {
            tracing::debug!("csv is not valid Shift-JIS, decoding as UTF-8");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shift_jis_export_is_decoded() {
        let (bytes, _, had_errors) = SHIFT_JIS.encode("商品名,認証キー\nトラブル解決ラボ,ABC123\n");
        assert!(!had_errors);
        assert_eq!(
            decode_legacy_csv(&bytes),
            "商品名,認証キー\nトラブル解決ラボ,ABC123\n"
        );
    }

    #[test]
    fn test_bom_prefixed_utf8_is_stripped() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice("商品名,認証キー\n".as_bytes());
        assert_eq!(decode_legacy_csv(&bytes), "商品名,認証キー\n");
    }

    #[test]
    fn test_ascii_passes_through() {
        assert_eq!(decode_legacy_csv(b"a,b\n1,2\n"), "a,b\n1,2\n");
    }

    #[test]
    fn test_invalid_shift_jis_falls_back_to_utf8() {
        // 0xFF is never valid Shift-JIS; it is not valid UTF-8 either, so
        // the lossy UTF-8 pass replaces it.
        assert_eq!(decode_legacy_csv(b"a,b\n\xFF"), "a,b\n\u{FFFD}");
    }

    #[test]
    fn test_utf8_export_without_bom() {
        let text = "商品名,認証キー,電話番号,ステータス\nトラブル解決ラボ,ABC123,09012345678,承認\n";
        assert_eq!(decode_legacy_csv(text.as_bytes()), text);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(decode_legacy_csv(b""), "");
    }
}
