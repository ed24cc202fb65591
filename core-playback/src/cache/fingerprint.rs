//! Cache keys for downloaded audio files.

use crate::cache::config::FingerprintScheme;
use crate::model::Book;
use sha2::{Digest, Sha256};

const DIGEST_HEX_LEN: usize = 32;

/// `<first 32 hex chars of sha256(key)>_<file_index>`.
///
/// Deterministic across runs and platforms, and safe as a file name.
pub fn stable_fingerprint(key: &str, file_index: usize) -> String {
    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    format!("{}_{}", &digest[..DIGEST_HEX_LEN], file_index)
}

/// Fingerprint of one file of `book` under `scheme`.
pub fn book_fingerprint(book: &Book, file_index: usize, scheme: FingerprintScheme) -> String {
    let key = match scheme {
        FingerprintScheme::LibraryItem => book.library_item_id.as_str(),
        FingerprintScheme::Title => book.title.as_str(),
    };
    stable_fingerprint(key, file_index)
}
