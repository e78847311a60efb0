//! # Elastos DID
//!
//! Control and lifecycle engine for `did:elastos` decentralized identifiers.
//!
//! The crate covers the identifier grammar, DID documents with single and
//! multi-signature controllers, transfer tickets, verifiable credentials and
//! presentations, and the publish / deactivate / declare / revoke lifecycle
//! against an ID-chain [`Registry`].
//!
//! [`DidStore`] is the entry point. It combines a [`Storage`] provider for
//! keys and documents with a shared [`Backend`] that caches registry
//! resolution.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use elastos_did::{Backend, Config, DidStore, MemoryStorage, PublishOptions, SimulatedRegistry};
//!
//! # async fn run() -> elastos_did::Result<()> {
//! let backend = Arc::new(Backend::new(SimulatedRegistry::new(), Config::default()));
//! let store = DidStore::new(MemoryStorage::new(), backend);
//!
//! let identity = store.create_root_identity(None, "passw0rd").await?;
//! let doc = store.new_did(&identity, "passw0rd").await?;
//! store.publish(&doc, PublishOptions::default(), "passw0rd").await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod blocking;
pub mod config;
pub mod core;
pub mod credential;
pub mod did;
pub mod document;
mod error;
pub mod identity;
pub mod key;
pub mod presentation;
pub mod proof;
pub mod provider;
pub mod registry;
pub mod store;
pub mod ticket;
pub mod url;

pub use self::backend::Backend;
pub use self::config::{Config, KdfParams};
pub use self::credential::{CredentialBuilder, VerifiableCredential};
pub use self::did::Did;
pub use self::document::{Controllers, Document, DocumentBuilder, DocumentMetadata, MultiSignature};
pub use self::error::{Error, ParseError};
pub use self::key::KeyPair;
pub use self::presentation::Presentation;
pub use self::provider::{KeySigner, Signer};
pub use self::registry::{Registry, SimulatedRegistry};
pub use self::store::{
    Archive, ConflictResolver, DidStore, ExportScope, KeepLocal, MemoryStorage, PublishOptions,
    Storage,
};
pub use self::ticket::TransferTicket;
pub use self::url::DidUrl;

/// Result type for engine operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
