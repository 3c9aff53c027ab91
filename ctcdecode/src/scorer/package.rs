use crate::automaton::WordAutomaton;

use super::ScorerError;

/// "TRIE", stored little-endian.
pub const MAGIC: u32 = 0x5452_4945;
pub const FILE_VERSION: u32 = 1;

const HEADER_LEN: usize = 9;

pub(crate) fn write(is_character_based: bool, dictionary: &WordAutomaton) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + dictionary.num_states() * 16);
    out.extend_from_slice(&MAGIC.to_le_bytes());
    out.extend_from_slice(&FILE_VERSION.to_le_bytes());
    out.push(u8::from(is_character_based));
    dictionary.write_to(&mut out);
    out
}

pub(crate) fn read(bytes: &[u8]) -> Result<(bool, WordAutomaton), ScorerError> {
    if bytes.len() < HEADER_LEN {
        return Err(ScorerError::Truncated(bytes.len()));
    }
    let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if magic != MAGIC {
        return Err(ScorerError::BadMagic(magic));
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != FILE_VERSION {
        return Err(ScorerError::BadVersion {
            found: version,
            expected: FILE_VERSION,
        });
    }
    let is_character_based = bytes[8] != 0;
    let (dictionary, used) = WordAutomaton::read_from(&bytes[HEADER_LEN..])?;
    if HEADER_LEN + used != bytes.len() {
        log::warn!(
            "Scorer package has {} trailing bytes after the dictionary",
            bytes.len() - HEADER_LEN - used
        );
    }
    Ok((is_character_based, dictionary))
}
