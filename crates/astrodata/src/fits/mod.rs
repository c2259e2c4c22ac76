//! The on-disk multi-extension container codec.

pub mod bintable;
pub mod hdu;
pub mod header;
pub mod image;
pub mod table;
pub mod value;

pub use hdu::{Hdu, HduInfo, RawExtension};
pub use header::{Card, Header};
pub use value::Value;

/// FITS block size in bytes.
pub const BLOCK_SIZE: usize = 2880;

/// FITS card (keyword record) size in bytes.
pub const CARD_SIZE: usize = 80;

/// Number of cards that fit in a single block.
pub const CARDS_PER_BLOCK: usize = BLOCK_SIZE / CARD_SIZE;

/// Returns the total byte length (in whole blocks) required to hold `num_bytes`.
pub const fn padded_byte_len(num_bytes: usize) -> usize {
    num_bytes.div_ceil(BLOCK_SIZE) * BLOCK_SIZE
}

/// [`padded_byte_len`] that reports overflow as `None`.
pub fn checked_padded_len(num_bytes: usize) -> Option<usize> {
    num_bytes.div_ceil(BLOCK_SIZE).checked_mul(BLOCK_SIZE)
}
