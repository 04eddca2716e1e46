//! Single-process chain node: configuration, orchestration of consensus,
//! ledger and mempool, and the round timeout driver.

mod config;
mod error;
mod node;
mod timer;
pub mod view;

pub use config::{GenesisAccount, GenesisValidator, NodeConfig, SchemeKind};
pub use error::NodeError;
pub use node::ChainNode;
pub use timer::RoundTimer;
