//! Feedgate Core - package sources and credentials
//!
//! This crate provides the foundational types used by the feedgate protocol
//! layer:
//! - `PackageSource`: a configured feed with optional stored credentials
//! - `SourceConfig`: the YAML source list on disk
//! - `NormalizedUri`: feed URI identity used for credential matching
//! - `CredentialChain`: ordered credential providers, settings first

pub mod error;
pub mod uri;
pub mod source;
pub mod config;
pub mod credentials;

pub use error::{CoreError, Result};
pub use uri::{NormalizedUri, uri_equals};
pub use source::{PackageSource, PackageSourceProvider, SourceKind, StaticSourceProvider};
pub use config::SourceConfig;
pub use credentials::{
    CredentialChain, CredentialChainBuilder, CredentialEntry, CredentialMessages,
    CredentialProvider, CredentialStore, CredentialType, Credentials, NoCredentials,
    SettingsCredentialProvider,
};
