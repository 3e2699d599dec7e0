//! Core implementation of the CA3 collaborative block-creation protocol:
//! the trip registry, block assembler, signature engine, peer dispatcher,
//! protocol state machine, retry driver, and peer receiver, plus the
//! collaborator traits a hosting node wires up (key store, ledger
//! façade, peer transport).

#[macro_use]
extern crate error_chain;

pub mod assembler;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod packet;
pub mod protocol;
pub mod receiver;
pub mod registry;
pub mod retry;
pub mod roster;
pub mod signature;
pub mod types;

pub use crate::collaborators::{LedgerFacade, PeerTransport, TenantId};
pub use crate::config::Config;
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::protocol::ProtocolContext;
pub use crate::signature::KeyStore;
pub use crate::types::{Block, BlockType, Oid, RosterEntry, Tx, TxType};
