pub mod bridge;

pub use bridge::{BridgeReply, DialogueBridge, DialogueTurn, Speaker};
