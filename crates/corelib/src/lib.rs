//! Core library for the rendezvous server.
//!
//! This crate provides the transport-independent pieces:
//! - Process identity and the values exchanged between processes
//! - Status codes and single-shot completion tokens
//! - The publish/lookup directory and the local modex store
//! - The verb table (`ServerModule`) and its single-server implementation

pub mod completion;
pub mod error;
pub mod modex;
pub mod module;
pub mod peers;
pub mod proc;
pub mod status;
pub mod store;
pub mod value;

pub use completion::Completion;
pub use error::{Error, Result};
pub use module::{HarnessModule, LookupData, ModuleConfig, ServerModule, Verb};
pub use proc::{ProcId, Rank, MAX_NAMESPACE_LEN, WILDCARD_RANK};
pub use status::Status;
pub use store::{LookupResult, PublishStore, PublishedEntry};
pub use value::{AppSpec, Info, Persistence, PublishedData, Scope, Value, MAX_KEY_LEN};
