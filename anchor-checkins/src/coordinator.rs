//! The two-record write/delete coordinator.
//!
//! A check-in is a linked pair of records: an address record plus a check-in
//! record holding a StrongRef to it. The PDS has no multi-record transaction,
//! so this module sequences the writes itself and compensates when the second
//! write fails. Deletion runs the reverse order: blobs, check-in, address.

use crate::error::{CheckinError, RepoError, Result, WriteStep};
use crate::repo::RepoClient;
use chrono::Utc;
use lexicons::{
    ADDRESS_COLLECTION, AddressRecord, AtUri, CHECKIN_COLLECTION, CheckinImage, CheckinRecord,
    GeoCoordinates, StrongRef,
};
use std::sync::Arc;

/// Place data for the address record, as the caller supplies it.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Place {
    pub name: String,
    pub street: Option<String>,
    pub locality: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

/// Pre-derived image representations to attach to a check-in.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub thumb: Vec<u8>,
    pub fullsize: Option<Vec<u8>>,
    pub mime_type: String,
    pub alt: Option<String>,
}

/// What a successful check-in create hands back.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckinRefs {
    pub checkin: StrongRef,
    pub address: StrongRef,
}

/// Operation-scoped ledger of what has been created so far, so a later
/// failure in the same operation knows exactly what to compensate. Never
/// persisted.
#[derive(Debug, Default)]
struct TransactionContext {
    address: Option<StrongRef>,
    blobs: Vec<String>,
}

/// Result of the compensating address delete. Surfaced separately from the
/// primary failure so cleanup can be observed even when it fails.
#[derive(Debug)]
enum Compensation {
    NothingToDo,
    Reverted,
    Failed { orphan: StrongRef, message: String },
}

pub struct CheckinCoordinator<R: RepoClient + 'static> {
    repo: Arc<R>,
}

impl<R: RepoClient + 'static> CheckinCoordinator<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Create a check-in: address record first, then optional image blobs,
    /// then the check-in record referencing both.
    ///
    /// Nothing is sent upstream until all inputs validate. A blob-upload
    /// failure drops the image but keeps the check-in. If the check-in write
    /// fails after the address write succeeded, the address is deleted again;
    /// if that cleanup also fails the error carries the orphan's reference.
    pub async fn create_checkin(
        &self,
        place: &Place,
        text: &str,
        image: Option<ImageUpload>,
    ) -> Result<CheckinRefs> {
        // Validate everything before the first remote call.
        lexicons::validate_text(text)?;
        let coordinates = GeoCoordinates::new(place.latitude, place.longitude)?;
        let address = build_address(place)?;

        let mut context = TransactionContext::default();

        let address_ref = self
            .repo
            .create_record(ADDRESS_COLLECTION, None, serde_json::to_value(&address)?)
            .await
            .map_err(|e| CheckinError::at(WriteStep::CreateAddress, e))?;
        context.address = Some(address_ref.clone());
        tracing::debug!(uri = %address_ref.uri, "created address record");

        let image_embed = match image {
            Some(upload) => self.upload_image(upload, &mut context).await,
            None => None,
        };

        let mut record =
            CheckinRecord::new(text, Utc::now().to_rfc3339(), address_ref.clone(), coordinates)?;
        if let Some(embed) = image_embed {
            record = record.with_image(embed);
        }

        match self
            .repo
            .create_record(CHECKIN_COLLECTION, None, serde_json::to_value(&record)?)
            .await
        {
            Ok(checkin_ref) => {
                tracing::info!(
                    checkin = %checkin_ref.uri,
                    address = %address_ref.uri,
                    "check-in created"
                );
                Ok(CheckinRefs {
                    checkin: checkin_ref,
                    address: address_ref,
                })
            }
            Err(e) => {
                let primary = CheckinError::at(WriteStep::CreateCheckin, e);
                match self.compensate(context).await {
                    Compensation::NothingToDo | Compensation::Reverted => Err(primary),
                    Compensation::Failed { orphan, message } => {
                        Err(CheckinError::PartialWriteOrphan {
                            step: WriteStep::CreateCheckin,
                            orphan,
                            message,
                        })
                    }
                }
            }
        }
    }

    /// Delete a check-in and everything it references: blobs first, then the
    /// check-in record, then the address record it points at.
    ///
    /// Only the check-in delete itself is load-bearing. Blob and address
    /// deletes are attempted and logged; an address left behind is swept by
    /// an out-of-band cleanup.
    pub async fn delete_checkin(&self, uri: &str) -> Result<()> {
        let at_uri: AtUri = uri.parse()?;
        if at_uri.collection != CHECKIN_COLLECTION {
            return Err(CheckinError::Validation(format!(
                "not a check-in record: {}",
                uri
            )));
        }
        // Ownership gate, before any remote call goes out.
        if at_uri.did != self.repo.did().await {
            return Err(CheckinError::Unauthenticated);
        }

        let fetched = self
            .repo
            .get_record(&at_uri.did, &at_uri.collection, &at_uri.rkey)
            .await
            .map_err(|e| CheckinError::at(WriteStep::DeleteCheckin, e))?;
        let record: CheckinRecord = serde_json::from_value(
            fetched
                .get("value")
                .cloned()
                .unwrap_or(serde_json::Value::Null),
        )
        .map_err(|e| CheckinError::Internal(format!("malformed check-in record: {}", e)))?;

        for cid in record.blob_cids() {
            if let Err(e) = self.repo.delete_blob(&cid).await {
                tracing::warn!(%cid, "blob delete failed, continuing: {}", e);
            }
        }

        self.repo
            .delete_record(CHECKIN_COLLECTION, &at_uri.rkey)
            .await
            .map_err(|e| CheckinError::at(WriteStep::DeleteCheckin, e))?;
        tracing::info!(uri = %uri, "check-in deleted");

        self.delete_address(&record.address_ref, &at_uri.did).await;
        Ok(())
    }

    /// Upload the image representations. Any failure here drops the image
    /// rather than failing the check-in.
    async fn upload_image(
        &self,
        upload: ImageUpload,
        context: &mut TransactionContext,
    ) -> Option<CheckinImage> {
        let thumb = match self.repo.upload_blob(upload.thumb, &upload.mime_type).await {
            Ok(blob) => blob,
            Err(e) => {
                tracing::warn!("image upload failed, posting without image: {}", e);
                return None;
            }
        };
        context.blobs.push(thumb.cid().to_string());

        let fullsize = match upload.fullsize {
            Some(data) => match self.repo.upload_blob(data, &upload.mime_type).await {
                Ok(blob) => {
                    context.blobs.push(blob.cid().to_string());
                    Some(blob)
                }
                Err(e) => {
                    tracing::warn!("fullsize upload failed, keeping thumbnail only: {}", e);
                    None
                }
            },
            None => None,
        };

        Some(CheckinImage {
            thumb,
            fullsize,
            alt: upload.alt,
        })
    }

    /// Undo everything the context accumulated after a failed check-in
    /// write: uploaded blobs best-effort, then the address record.
    ///
    /// Runs on a spawned task so it still completes if the invoking request
    /// is aborted mid-operation.
    async fn compensate(&self, context: TransactionContext) -> Compensation {
        let Some(address_ref) = context.address else {
            return Compensation::NothingToDo;
        };
        let rkey = match address_ref.at_uri() {
            Ok(at_uri) => at_uri.rkey,
            Err(e) => {
                return Compensation::Failed {
                    orphan: address_ref,
                    message: e.to_string(),
                };
            }
        };

        let repo = self.repo.clone();
        let task_rkey = rkey.clone();
        let blobs = context.blobs;
        let outcome = tokio::spawn(async move {
            for cid in &blobs {
                if let Err(e) = repo.delete_blob(cid).await {
                    tracing::warn!(%cid, "orphaned blob delete failed, continuing: {}", e);
                }
            }
            repo.delete_record(ADDRESS_COLLECTION, &task_rkey).await
        })
        .await;

        match outcome {
            Ok(Ok(())) => {
                tracing::info!(uri = %address_ref.uri, "compensated: orphaned address deleted");
                Compensation::Reverted
            }
            Ok(Err(e)) => {
                tracing::error!(uri = %address_ref.uri, "compensation failed, address orphaned: {}", e);
                Compensation::Failed {
                    orphan: address_ref,
                    message: e.to_string(),
                }
            }
            Err(e) => Compensation::Failed {
                orphan: address_ref,
                message: format!("compensation task failed: {}", e),
            },
        }
    }

    /// Best-effort address delete at the tail of the delete flow.
    async fn delete_address(&self, address_ref: &StrongRef, owner_did: &str) {
        let at_uri = match address_ref.at_uri() {
            Ok(at_uri) => at_uri,
            Err(e) => {
                tracing::warn!(uri = %address_ref.uri, "unparseable address ref, leaving it: {}", e);
                return;
            }
        };
        if at_uri.did != owner_did {
            tracing::warn!(uri = %address_ref.uri, "address lives in another repo, leaving it");
            return;
        }
        if let Err(e) = self
            .repo
            .delete_record(ADDRESS_COLLECTION, &at_uri.rkey)
            .await
        {
            tracing::warn!(
                orphan = %address_ref.uri,
                "address delete failed, orphan left for sweep: {}",
                e
            );
        }
    }
}

fn build_address(place: &Place) -> Result<AddressRecord> {
    let mut address = AddressRecord::new(&place.name)?;
    if let Some(street) = &place.street {
        address = address.with_street(street);
    }
    if let Some(locality) = &place.locality {
        address = address.with_locality(locality);
    }
    if let Some(region) = &place.region {
        address = address.with_region(region);
    }
    if let Some(country) = &place.country {
        address = address.with_country(country);
    }
    if let Some(postal_code) = &place.postal_code {
        address = address.with_postal_code(postal_code);
    }
    Ok(address)
}
