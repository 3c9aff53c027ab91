//! Label/token mapping for the acoustic model output classes.
//!
//! Two variants exist: [`ConfigAlphabet`], read from a text file with one
//! token per line, and [`RawByteAlphabet`], which maps labels directly to
//! UTF-8 bytes and needs no file.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum AlphabetError {
    #[error("cannot read alphabet file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("serialized alphabet truncated at byte {offset}")]
    Truncated { offset: usize },
    #[error("token for label {label} is not valid UTF-8")]
    InvalidUtf8 { label: u16 },
    #[error("alphabet too large to serialize: {0}")]
    TooLarge(String),
    #[error("token {0:?} not in alphabet")]
    UnknownToken(String),
    #[error("label {0} not in alphabet")]
    UnknownLabel(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Alphabet {
    Config(ConfigAlphabet),
    RawBytes(RawByteAlphabet),
}

impl Alphabet {
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self, AlphabetError> {
        ConfigAlphabet::init(path).map(Self::Config)
    }

    pub fn raw_bytes() -> Self {
        Self::RawBytes(RawByteAlphabet::new())
    }

    pub fn size(&self) -> usize {
        match self {
            Self::Config(a) => a.size(),
            Self::RawBytes(a) => a.size(),
        }
    }

    pub fn space_label(&self) -> Option<u32> {
        match self {
            Self::Config(a) => a.space_label(),
            Self::RawBytes(a) => Some(a.space_label()),
        }
    }

    pub fn is_raw_bytes(&self) -> bool {
        matches!(self, Self::RawBytes(_))
    }

    /// Bytes of one token.
    pub fn token_bytes(&self, label: u32) -> Option<&[u8]> {
        match self {
            Self::Config(a) => a.token(label).map(str::as_bytes),
            Self::RawBytes(a) => a.byte(label),
        }
    }

    /// Splits `input` into the units this alphabet labels: codepoints for
    /// config alphabets, bytes for raw-byte alphabets.
    pub fn split_units<'a>(&self, input: &'a str) -> Vec<Cow<'a, [u8]>> {
        match self {
            Self::Config(_) => input
                .char_indices()
                .map(|(i, c)| Cow::Borrowed(&input.as_bytes()[i..i + c.len_utf8()]))
                .collect(),
            Self::RawBytes(_) => input.bytes().map(|b| Cow::Owned(vec![b])).collect(),
        }
    }

    pub fn try_encode(&self, input: &str) -> Result<Vec<u32>, AlphabetError> {
        match self {
            Self::Config(a) => a.try_encode(input),
            Self::RawBytes(a) => a.try_encode(input),
        }
    }

    pub fn try_decode(&self, labels: &[u32]) -> Result<String, AlphabetError> {
        let mut bytes = Vec::with_capacity(labels.len());
        for &label in labels {
            let token = self
                .token_bytes(label)
                .ok_or(AlphabetError::UnknownLabel(label))?;
            bytes.extend_from_slice(token);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Encodes `input`; a token missing from the alphabet is a fatal invariant violation.
    pub fn encode(&self, input: &str) -> Vec<u32> {
        match self.try_encode(input) {
            Ok(labels) => labels,
            Err(e) => {
                log::error!("alphabet encode failed: {e}");
                panic!("alphabet encode failed: {e}");
            }
        }
    }

    /// Decodes `labels`; a label missing from the alphabet is a fatal invariant violation.
    pub fn decode(&self, labels: &[u32]) -> String {
        match self.try_decode(labels) {
            Ok(text) => text,
            Err(e) => {
                log::error!("alphabet decode failed: {e}");
                panic!("alphabet decode failed: {e}");
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigAlphabet {
    label_to_str: BTreeMap<u32, String>,
    str_to_label: HashMap<String, u32>,
    space_label: Option<u32>,
}

impl ConfigAlphabet {
    pub fn init(path: impl AsRef<Path>) -> Result<Self, AlphabetError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| AlphabetError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let alphabet = Self::from_lines(&content);
        log::debug!(
            "Loaded alphabet from {} ({} labels, space label {:?})",
            path.display(),
            alphabet.size(),
            alphabet.space_label
        );
        Ok(alphabet)
    }

    /// Parses the text format: one token per line, `#` comments, `\#` for a literal `#`.
    pub fn from_lines(content: &str) -> Self {
        let mut alphabet = Self::default();
        let mut label = 0u32;
        for line in content.lines() {
            let token = if line == "\\#" {
                "#"
            } else if line.starts_with('#') || line.is_empty() {
                continue;
            } else {
                line
            };
            if token == " " {
                alphabet.space_label = Some(label);
            }
            alphabet.insert(label, token.to_string());
            label += 1;
        }
        alphabet
    }

    fn insert(&mut self, label: u32, token: String) {
        self.str_to_label.insert(token.clone(), label);
        self.label_to_str.insert(label, token);
    }

    pub fn size(&self) -> usize {
        self.label_to_str.len()
    }

    pub fn space_label(&self) -> Option<u32> {
        self.space_label
    }

    pub fn token(&self, label: u32) -> Option<&str> {
        self.label_to_str.get(&label).map(String::as_str)
    }

    pub fn label(&self, token: &str) -> Option<u32> {
        self.str_to_label.get(token).copied()
    }

    pub fn try_encode(&self, input: &str) -> Result<Vec<u32>, AlphabetError> {
        let mut buf = [0u8; 4];
        input
            .chars()
            .map(|c| {
                let cp: &str = c.encode_utf8(&mut buf);
                self.label(cp)
                    .ok_or_else(|| AlphabetError::UnknownToken(cp.to_string()))
            })
            .collect()
    }

    /// `u16 count`, then per entry `u16 label, u16 len, len bytes`, little-endian.
    pub fn serialize(&self) -> Result<Vec<u8>, AlphabetError> {
        let count = u16::try_from(self.label_to_str.len())
            .map_err(|_| AlphabetError::TooLarge(format!("{} entries", self.label_to_str.len())))?;
        let mut out = Vec::with_capacity(2 + self.label_to_str.len() * 5);
        out.extend_from_slice(&count.to_le_bytes());
        for (&label, token) in &self.label_to_str {
            let label = u16::try_from(label)
                .map_err(|_| AlphabetError::TooLarge(format!("label {label}")))?;
            let len = u16::try_from(token.len())
                .map_err(|_| AlphabetError::TooLarge(format!("token of {} bytes", token.len())))?;
            out.extend_from_slice(&label.to_le_bytes());
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(token.as_bytes());
        }
        Ok(out)
    }

    pub fn deserialize(buffer: &[u8]) -> Result<Self, AlphabetError> {
        let mut reader = ByteReader::new(buffer);
        let count = reader.read_u16()?;
        let mut alphabet = Self::default();
        for _ in 0..count {
            let label = reader.read_u16()?;
            let len = reader.read_u16()? as usize;
            let bytes = reader.read_bytes(len)?;
            let token = std::str::from_utf8(bytes)
                .map_err(|_| AlphabetError::InvalidUtf8 { label })?
                .to_string();
            if token == " " {
                alphabet.space_label = Some(label as u32);
            }
            alphabet.insert(label as u32, token);
        }
        Ok(alphabet)
    }
}

struct ByteReader<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, offset: 0 }
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], AlphabetError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.buffer.len())
            .ok_or(AlphabetError::Truncated {
                offset: self.offset,
            })?;
        let bytes = &self.buffer[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn read_u16(&mut self) -> Result<u16, AlphabetError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }
}

/// Labels `0..255` stand for the bytes `1..=255`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawByteAlphabet {
    bytes: [u8; 255],
}

impl Default for RawByteAlphabet {
    fn default() -> Self {
        Self::new()
    }
}

impl RawByteAlphabet {
    pub fn new() -> Self {
        let mut bytes = [0u8; 255];
        for (label, byte) in bytes.iter_mut().enumerate() {
            *byte = label as u8 + 1;
        }
        Self { bytes }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn space_label(&self) -> u32 {
        (b' ' - 1) as u32
    }

    pub fn byte(&self, label: u32) -> Option<&[u8]> {
        let label = label as usize;
        self.bytes.get(label..label + 1)
    }

    pub fn try_encode(&self, input: &str) -> Result<Vec<u32>, AlphabetError> {
        input
            .bytes()
            .map(|b| match b {
                0 => Err(AlphabetError::UnknownToken("\\0".to_string())),
                b => Ok((b - 1) as u32),
            })
            .collect()
    }
}
