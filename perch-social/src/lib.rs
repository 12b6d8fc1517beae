//! Social-service surface shared by the Perch engine and its drivers.
//!
//! Defines the normalized data types, the [`Capability`] facade the engine
//! drives, and the on-disk credential/session layout. The concrete protocol
//! implementation lives behind the trait (see `perch-drivers`); nothing in
//! this crate talks to the remote service itself.

pub mod facade;
pub mod session;
pub mod types;

pub use facade::Capability;
pub use session::{load_credentials, Credential, SessionStore};
pub use types::{ContentItem, Identity, MutateAction, ProfileData, SessionBlob};
