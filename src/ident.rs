use camino::Utf8Path;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::error::Error;

const ID_PREFIX: &str = "doc-";
const SHORT_LEN: usize = 8;
const LONG_LEN: usize = 16;
const MAX_COLLISION_SUFFIX: u32 = 100;

/// RFC 4648 alphabet, lowercased for readable block tokens.
const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// A minted document identity. `block_suggestion` is set when the line had
/// no block token yet; the walker may write it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintedId {
    pub uuid: String,
    pub block_suggestion: Option<String>,
}

fn base32_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 8 / 5 + 1);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for &b in bytes {
        buffer = (buffer << 8) | u32::from(b);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

fn hash_token(vault_path: &Utf8Path, file_path: &Utf8Path, line_number: usize, description: &str) -> String {
    let vault_id = vault_path.file_name().unwrap_or(vault_path.as_str());
    let canonical = format!(
        "{vault_id}|{file_path}|{line_number}|{}",
        description.trim().to_lowercase()
    );
    base32_lower(&Sha256::digest(canonical.as_bytes()))
}

/// Mint a stable id for a document task.
///
/// A present block token is authoritative: the id is derived from it and no
/// write-back is suggested. Otherwise the id is a location-and-content hash,
/// deconflicted against the tokens already present in the file.
pub fn mint_id(
    vault_path: &Utf8Path,
    file_path: &Utf8Path,
    line_number: usize,
    description: &str,
    existing_block_ids: &HashSet<String>,
    block_id: Option<&str>,
) -> Result<MintedId, Error> {
    if let Some(token) = block_id {
        if token.is_empty() || !token.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(Error::BlockToken {
                token: token.to_owned(),
            });
        }
        return Ok(MintedId {
            uuid: format!("{ID_PREFIX}{token}"),
            block_suggestion: None,
        });
    }

    let full = hash_token(vault_path, file_path, line_number, description);
    let base = &full[..SHORT_LEN];

    let mut token = base.to_owned();
    let mut counter = 0u32;
    while existing_block_ids.contains(&token) {
        counter += 1;
        if counter > MAX_COLLISION_SUFFIX {
            log::warn!("high collision count for id prefix {base}, widening to {LONG_LEN} chars");
            token = full[..LONG_LEN].to_owned();
            if existing_block_ids.contains(&token) {
                return Err(Error::IdCollision {
                    prefix: base.to_owned(),
                });
            }
            break;
        }
        token = format!("{base}-{counter}");
    }

    Ok(MintedId {
        uuid: format!("{ID_PREFIX}{token}"),
        block_suggestion: Some(token),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    use pretty_assertions::assert_eq;

    fn mint(line: usize, desc: &str, existing: &HashSet<String>) -> MintedId {
        mint_id(
            Utf8Path::new("/vaults/Work"),
            Utf8Path::new("notes/todo.md"),
            line,
            desc,
            existing,
            None,
        )
        .unwrap()
    }

    #[test]
    fn stable_across_invocations() {
        let existing = HashSet::new();
        let a = mint(3, "Buy milk", &existing);
        let b = mint(3, "Buy milk", &existing);
        assert_eq!(a, b);
        assert!(a.uuid.starts_with("doc-"));
        assert_eq!(a.uuid.len(), "doc-".len() + 8);
    }

    #[test]
    fn description_case_and_whitespace_insensitive() {
        let existing = HashSet::new();
        assert_eq!(mint(3, "Buy milk", &existing), mint(3, "  buy MILK ", &existing));
    }

    #[test]
    fn different_lines_do_not_collide() {
        let existing = HashSet::new();
        assert_ne!(mint(3, "Buy milk", &existing), mint(4, "Buy milk", &existing));
    }

    #[test]
    fn collision_appends_counter() {
        let no_conflict = mint(3, "Buy milk", &HashSet::new());
        let base = no_conflict.block_suggestion.unwrap();

        let existing: HashSet<String> = [base.clone()].into();
        let deconflicted = mint(3, "Buy milk", &existing);
        assert_eq!(deconflicted.block_suggestion.unwrap(), format!("{base}-1"));
    }

    #[test]
    fn block_token_is_authoritative() {
        let minted = mint_id(
            Utf8Path::new("/vaults/Work"),
            Utf8Path::new("notes/todo.md"),
            3,
            "Buy milk",
            &HashSet::new(),
            Some("ab12cd34"),
        )
        .unwrap();
        assert_eq!(minted.uuid, "doc-ab12cd34");
        assert_eq!(minted.block_suggestion, None);
    }

    #[test]
    fn malformed_block_token_rejected() {
        let got = mint_id(
            Utf8Path::new("/vaults/Work"),
            Utf8Path::new("notes/todo.md"),
            3,
            "Buy milk",
            &HashSet::new(),
            Some("bad token"),
        );
        assert!(matches!(got, Err(Error::BlockToken { .. })));
    }
}
