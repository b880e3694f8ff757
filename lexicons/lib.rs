//! Record schema types for the anchor check-in app.
//!
//! Plain serde representations of the records this app writes to a user's PDS:
//! the `community.lexicon.location.address` venue record, the
//! `app.dropanchor.checkin` record that references it, and the shared
//! primitives (strong refs, blob refs, AT-URIs) both are built from.
//!
//! All constructors validate; a record value that exists is a record value the
//! PDS will accept as far as this app can tell locally.

pub mod address;
pub mod checkin;
pub mod geo;
pub mod types;

pub use address::AddressRecord;
pub use checkin::{CheckinImage, CheckinRecord, validate_text};
pub use geo::GeoCoordinates;
pub use types::{AtUri, BlobRef, CidLink, RecordError, StrongRef};

/// Collection NSID for check-in records.
pub const CHECKIN_COLLECTION: &str = "app.dropanchor.checkin";

/// Collection NSID for address records.
pub const ADDRESS_COLLECTION: &str = "community.lexicon.location.address";
