use encoding_rs::Encoding;
use tracing::warn;

/// Turns stored entry names into display names using an optional charset.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameDecoder {
    encoding: Option<&'static Encoding>,
}

impl NameDecoder {
    /// Resolves an IANA/WHATWG label such as `gbk` or `shift_jis`.
    ///
    /// Unknown labels are logged and ignored.
    pub fn new(charset: Option<&str>) -> Self {
        let encoding = charset.filter(|label| !label.is_empty()).and_then(|label| {
            let found = Encoding::for_label(label.trim().as_bytes());
            if found.is_none() {
                warn!(charset = label, "unknown charset, falling back to raw names");
            }
            found
        });
        Self { encoding }
    }

    pub fn decode(&self, raw: &[u8]) -> String {
        if let Some(encoding) = self.encoding {
            if let Some(name) = encoding.decode_without_bom_handling_and_without_replacement(raw) {
                return name.into_owned();
            }
        }
        String::from_utf8_lossy(raw).into_owned()
    }
}

/// Entry name as stored in an archive header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawName {
    pub bytes: Vec<u8>,
    /// Already known to be UTF-8; the charset is not applied.
    pub utf8: bool,
}

impl RawName {
    pub fn utf8(name: String) -> Self {
        Self {
            bytes: name.into_bytes(),
            utf8: true,
        }
    }

    pub fn legacy(bytes: Vec<u8>) -> Self {
        Self { bytes, utf8: false }
    }

    pub fn decode(&self, decoder: &NameDecoder) -> String {
        if self.utf8 {
            String::from_utf8_lossy(&self.bytes).into_owned()
        } else {
            decoder.decode(&self.bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_with_charset() {
        // "中文" in GBK
        let raw = [0xD6, 0xD0, 0xCE, 0xC4];
        assert_eq!(NameDecoder::new(Some("gbk")).decode(&raw), "中文");
        assert_eq!(NameDecoder::new(Some("GB2312")).decode(&raw), "中文");
    }

    #[test]
    fn falls_back_to_raw_name() {
        let raw = "plain.txt".as_bytes();
        assert_eq!(NameDecoder::new(None).decode(raw), "plain.txt");
        assert_eq!(NameDecoder::new(Some("no-such-charset")).decode(raw), "plain.txt");

        // Invalid Shift_JIS lead byte followed by nothing.
        let broken = [b'a', 0x81];
        assert_eq!(NameDecoder::new(Some("shift_jis")).decode(&broken), "a\u{FFFD}");
    }

    #[test]
    fn utf8_names_ignore_charset() {
        let name = RawName::utf8("中文.txt".to_string());
        assert_eq!(name.decode(&NameDecoder::new(Some("gbk"))), "中文.txt");
    }
}
