//! 文字編解碼模組
//!
//! MUD 伺服器常見 UTF-8 以外的編碼（例如台灣 MUD 的 Big5），
//! 以 `encoding_rs` 在位元組與 UTF-8 字串之間轉換。

use encoding_rs::{Encoding, BIG5, UTF_8};

use crate::error::ConfigError;

/// 連線使用的文字編碼
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextCodec {
    encoding: &'static Encoding,
}

impl TextCodec {
    /// 依 WHATWG 標籤建立（例如 `"utf-8"`、`"big5"`、`"latin1"`）
    ///
    /// # Example
    /// ```
    /// use mudbot::encoding::TextCodec;
    ///
    /// let codec = TextCodec::for_label("big5").unwrap();
    /// assert_eq!(codec.name(), "Big5");
    /// ```
    pub fn for_label(label: &str) -> Result<Self, ConfigError> {
        Encoding::for_label(label.trim().as_bytes())
            .map(|encoding| Self { encoding })
            .ok_or_else(|| ConfigError::UnknownEncoding(label.to_string()))
    }

    pub fn utf8() -> Self {
        Self { encoding: UTF_8 }
    }

    pub fn big5() -> Self {
        Self { encoding: BIG5 }
    }

    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }

    /// 位元組轉為 UTF-8 字串（無效字元會被替換為 U+FFFD）
    pub fn decode(&self, bytes: &[u8]) -> String {
        let (decoded, _, _) = self.encoding.decode(bytes);
        decoded.into_owned()
    }

    /// 解碼後前 `text_len` 個位元組在原始資料中佔用的長度
    ///
    /// 逐位元組增量解碼，尾端尚未完整的多位元組字元不會被計入。
    pub fn raw_len(&self, bytes: &[u8], text_len: usize) -> usize {
        if text_len == 0 {
            return 0;
        }

        let mut decoder = self.encoding.new_decoder();
        let mut text = String::with_capacity(text_len + 4);
        for (i, byte) in bytes.iter().enumerate() {
            if let Some(needed) = decoder.max_utf8_buffer_length(1) {
                text.reserve(needed);
            }
            let _ = decoder.decode_to_string(std::slice::from_ref(byte), &mut text, false);
            if text.len() >= text_len {
                return i + 1;
            }
        }
        bytes.len()
    }

    /// UTF-8 字串轉為連線編碼的位元組（無法編碼的字元會被替換）
    pub fn encode(&self, text: &str) -> Vec<u8> {
        let (encoded, _, _) = self.encoding.encode(text);
        encoded.into_owned()
    }
}

impl Default for TextCodec {
    fn default() -> Self {
        Self::utf8()
    }
}
