//! rxconsent core: domain models, error taxonomy and the storage and
//! collaborator traits shared by every crate in the workspace.

pub mod error;
pub mod models;
pub mod notify;
pub mod repository;

pub use error::{RxError, RxResult};
