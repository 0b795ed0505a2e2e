//! Shared network protocol logic.
//!
//! This crate contains transport-independent components:
//!
//! - [`wire`]: LZ4 compress/decompress helpers
//! - [`codec`]: SBOR encode/decode of the signing envelope
//! - [`traits`]: the [`Transport`] seam runners deliver envelopes through
//!
//! No async runtime dependency. Each runner (production/simulation) owns
//! the actual delivery.

pub mod codec;
pub mod traits;
pub mod wire;

pub use codec::{decode_from_wire, decode_message, encode_message, encode_to_wire, CodecError};
pub use traits::{Transport, TransportError};
pub use wire::{compress, decompress, WireError, MAX_MESSAGE_BYTES};
