pub mod codec;
pub mod dedup;
pub mod limiter;
pub mod message;
pub mod node;
pub mod peer;

pub use codec::{P2pError, MAX_MESSAGE_SIZE};
pub use message::{Message, MessageType};
pub use node::{P2pConfig, P2pHandler, P2pNode, P2pStatus, SYNC_BATCH_MAX};
pub use peer::{Direction, Peer, PeerSnapshot, PeerState};
