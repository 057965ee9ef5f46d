//! String encodings of the Canonical ABI.
//!
//! Three encodings are supported. UTF-8 stores bytes directly with `len`
//! counting bytes. UTF-16 little-endian stores 16-bit code units with `len`
//! counting units. The combined Latin-1/UTF-16 encoding tags the high bit of
//! `len`: set means UTF-16 of `len & 0x7FFF_FFFF` units, clear means Latin-1
//! bytes.

use crate::prelude::*;

/// High bit of the length field marking UTF-16 data in the combined encoding
pub const UTF16_TAG: u32 = 0x8000_0000;

/// A string encoding selected by a canonical option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringEncoding {
    /// UTF-8 (the default)
    #[default]
    Utf8,
    /// UTF-16 little-endian
    Utf16Le,
    /// Latin-1 or UTF-16, discriminated per string by the length tag
    Latin1Utf16,
}

impl StringEncoding {
    /// Alignment requirement of the string payload pointer
    pub fn ptr_alignment(&self) -> u32 {
        match self {
            StringEncoding::Utf8 => 1,
            StringEncoding::Utf16Le | StringEncoding::Latin1Utf16 => 2,
        }
    }
}

/// The payload byte length a string will occupy under an encoding
pub fn string_byte_length(s: &str, encoding: StringEncoding) -> usize {
    match encoding {
        StringEncoding::Utf8 => s.len(),
        StringEncoding::Utf16Le => s.encode_utf16().count() * 2,
        StringEncoding::Latin1Utf16 => {
            if s.chars().all(|c| (c as u32) <= 0xFF) {
                s.chars().count()
            } else {
                s.encode_utf16().count() * 2
            }
        }
    }
}

/// Encode a string, returning the payload bytes and the length field to
/// store beside the pointer
pub fn encode_string(s: &str, encoding: StringEncoding) -> Result<(Vec<u8>, u32)> {
    match encoding {
        StringEncoding::Utf8 => {
            let bytes = s.as_bytes().to_vec();
            let len = u32::try_from(bytes.len())
                .map_err(|_| Error::invalid_encoding("string exceeds 32-bit byte length"))?;
            Ok((bytes, len))
        }
        StringEncoding::Utf16Le => {
            let bytes = encode_utf16_le(s);
            let units = (bytes.len() / 2) as u32;
            Ok((bytes, units))
        }
        StringEncoding::Latin1Utf16 => {
            if s.chars().all(|c| (c as u32) <= 0xFF) {
                let bytes: Vec<u8> = s.chars().map(|c| c as u8).collect();
                let len = bytes.len() as u32;
                if len & UTF16_TAG != 0 {
                    return Err(Error::invalid_encoding(
                        "latin-1 string exceeds the taggable length",
                    ));
                }
                Ok((bytes, len))
            } else {
                let bytes = encode_utf16_le(s);
                let units = (bytes.len() / 2) as u32;
                if units & UTF16_TAG != 0 {
                    return Err(Error::invalid_encoding(
                        "utf-16 string exceeds the taggable length",
                    ));
                }
                Ok((bytes, units | UTF16_TAG))
            }
        }
    }
}

/// Number of payload bytes described by a length field
pub fn encoded_byte_length(encoding: StringEncoding, len_field: u32) -> Result<u32> {
    match encoding {
        StringEncoding::Utf8 => Ok(len_field),
        StringEncoding::Utf16Le => len_field
            .checked_mul(2)
            .ok_or_else(|| Error::invalid_encoding("utf-16 length overflows")),
        StringEncoding::Latin1Utf16 => {
            if len_field & UTF16_TAG != 0 {
                (len_field & !UTF16_TAG)
                    .checked_mul(2)
                    .ok_or_else(|| Error::invalid_encoding("utf-16 length overflows"))
            } else {
                Ok(len_field)
            }
        }
    }
}

/// Decode payload bytes read from linear memory
pub fn decode_string(
    bytes: &[u8],
    encoding: StringEncoding,
    len_field: u32,
) -> Result<String> {
    match encoding {
        StringEncoding::Utf8 => decode_utf8(bytes),
        StringEncoding::Utf16Le => decode_utf16_le(bytes),
        StringEncoding::Latin1Utf16 => {
            if len_field & UTF16_TAG != 0 {
                decode_utf16_le(bytes)
            } else {
                Ok(decode_latin1(bytes))
            }
        }
    }
}

fn encode_utf16_le(s: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(s.len() * 2);
    for unit in s.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    bytes
}

fn decode_utf8(bytes: &[u8]) -> Result<String> {
    str::from_utf8(bytes)
        .map(ToString::to_string)
        .map_err(|_| Error::invalid_encoding("string payload is not valid UTF-8"))
}

fn decode_utf16_le(bytes: &[u8]) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(Error::invalid_encoding(
            "utf-16 payload has an odd byte length",
        ));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units)
        .map_err(|_| Error::invalid_encoding("string payload is not valid UTF-16"))
}

fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_roundtrip() {
        let (bytes, len) = encode_string("héllo", StringEncoding::Utf8).unwrap();
        assert_eq!(bytes, [0x68, 0xC3, 0xA9, 0x6C, 0x6C, 0x6F]);
        assert_eq!(len, 6);
        assert_eq!(
            decode_string(&bytes, StringEncoding::Utf8, len).unwrap(),
            "héllo"
        );
    }

    #[test]
    fn utf16_counts_code_units() {
        let (bytes, len) = encode_string("héllo", StringEncoding::Utf16Le).unwrap();
        assert_eq!(
            bytes,
            [0x68, 0x00, 0xE9, 0x00, 0x6C, 0x00, 0x6C, 0x00, 0x6F, 0x00]
        );
        assert_eq!(len, 5);
        assert_eq!(encoded_byte_length(StringEncoding::Utf16Le, len).unwrap(), 10);
        assert_eq!(
            decode_string(&bytes, StringEncoding::Utf16Le, len).unwrap(),
            "héllo"
        );
    }

    #[test]
    fn latin1_utf16_tags_wide_strings() {
        let (bytes, len) = encode_string("héllo", StringEncoding::Latin1Utf16).unwrap();
        assert_eq!(len & UTF16_TAG, 0);
        assert_eq!(bytes.len(), 5);
        assert_eq!(
            decode_string(&bytes, StringEncoding::Latin1Utf16, len).unwrap(),
            "héllo"
        );

        let (bytes, len) = encode_string("héllo☃", StringEncoding::Latin1Utf16).unwrap();
        assert_ne!(len & UTF16_TAG, 0);
        assert_eq!(len & !UTF16_TAG, 6);
        assert_eq!(
            encoded_byte_length(StringEncoding::Latin1Utf16, len).unwrap(),
            12
        );
        assert_eq!(
            decode_string(&bytes, StringEncoding::Latin1Utf16, len).unwrap(),
            "héllo☃"
        );
    }

    #[test]
    fn invalid_utf8_rejected() {
        assert!(decode_string(&[0xFF, 0xFE], StringEncoding::Utf8, 2).is_err());
    }

    #[test]
    fn surrogate_pairs_roundtrip_in_utf16() {
        let text = "a𝄞b";
        let (bytes, len) = encode_string(text, StringEncoding::Utf16Le).unwrap();
        assert_eq!(len, 4);
        assert_eq!(
            decode_string(&bytes, StringEncoding::Utf16Le, len).unwrap(),
            text
        );
    }
}
