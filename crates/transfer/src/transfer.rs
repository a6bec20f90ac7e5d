//! Building blocks shared by the sender and receiver engines: ports and peer
//! profiles, the data-stream codec, file encryption, path policy, discovery
//! datagrams, selection planning and throughput sampling.

pub mod crypto;
pub mod discovery;
pub mod paths;
pub mod profile;
pub mod selection;
pub mod stats;
pub mod wire;

pub use profile::{PeerProfile, TransferPorts};
