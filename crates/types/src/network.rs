//! Network message marker trait.

use sbor::prelude::{BasicDecode, BasicEncode};

/// Marker trait for messages carried between tree nodes.
pub trait NetworkMessage: Send + Sync + Sized + BasicEncode + BasicDecode {
    /// Unique message type identifier for routing.
    fn message_type_id() -> &'static str;

    /// Versioned topic string for this message type.
    fn topic() -> String {
        format!("treesig/{}/1.0.0", Self::message_type_id())
    }
}
