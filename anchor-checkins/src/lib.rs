//! Check-in writes against an ATProto personal data server.
//!
//! A check-in is two linked records in the user's own repo: a
//! `community.lexicon.location.address` record and an
//! `app.dropanchor.checkin` record that references it by StrongRef. The PDS
//! offers no multi-record transaction, so [`CheckinCoordinator`] sequences
//! the writes and compensates partial failures itself.
//!
//! # Features
//!
//! - Two-phase create: address record, optional image blobs, then the
//!   check-in referencing both
//! - Compensating address delete when the check-in write fails, with the
//!   orphan's reference surfaced if cleanup fails too
//! - Reverse-order delete: blobs, check-in record, then the address
//! - Ownership check before any delete call leaves the process
//! - `axum` feature for converting [`CheckinError`] into HTTP responses

pub mod coordinator;
pub mod error;
pub mod repo;

pub use coordinator::{CheckinCoordinator, CheckinRefs, ImageUpload, Place};
pub use error::{CheckinError, RepoError, Result, WriteStep};
pub use repo::{PdsRepoClient, RepoClient};
