//! `gwinit-module-registry`: third-party module registration.
//!
//! Links module archives from the drop directory into the gateway's live
//! module directory and records their signing certificate and license
//! acceptance in the gateway's embedded config store (SQLite).

pub mod archive;
pub mod error;
pub mod registrar;
pub mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use archive::{ModuleCertificate, ModuleLicense, ModuleMetadata, Thumbprint};
pub use error::{RegistryError, Result};
pub use registrar::{ModuleRegistrar, RegistrationReport};
pub use store::{CERTIFICATES_SEQ, ConfigStore, EULAS_SEQ, InsertOutcome};
