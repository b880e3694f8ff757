use crate::geo::GeoCoordinates;
use crate::types::{BlobRef, RecordError, StrongRef};
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// Maximum check-in text length, counted in grapheme clusters.
pub const MAX_TEXT_GRAPHEMES: usize = 300;

/// An image attached to a check-in: an uploaded blob plus alt text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckinImage {
    pub thumb: BlobRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fullsize: Option<BlobRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
}

/// `app.dropanchor.checkin`: the check-in record itself.
///
/// References its address record by StrongRef, so the check-in pins the exact
/// address version that existed when it was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckinRecord {
    #[serde(rename = "$type")]
    pub type_: String,
    pub text: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "addressRef")]
    pub address_ref: StrongRef,
    pub coordinates: GeoCoordinates,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<CheckinImage>,
}

pub const CHECKIN_TYPE: &str = "app.dropanchor.checkin";

/// Check the message length limit, counted in grapheme clusters rather than
/// bytes or code points.
pub fn validate_text(text: &str) -> Result<(), RecordError> {
    let len = text.graphemes(true).count();
    if len > MAX_TEXT_GRAPHEMES {
        return Err(RecordError::TextTooLong {
            len,
            max: MAX_TEXT_GRAPHEMES,
        });
    }
    Ok(())
}

impl CheckinRecord {
    pub fn new(
        text: impl Into<String>,
        created_at: impl Into<String>,
        address_ref: StrongRef,
        coordinates: GeoCoordinates,
    ) -> Result<Self, RecordError> {
        let text = text.into();
        validate_text(&text)?;
        Ok(Self {
            type_: CHECKIN_TYPE.to_string(),
            text,
            created_at: created_at.into(),
            address_ref,
            coordinates,
            image: None,
        })
    }

    pub fn with_image(mut self, image: CheckinImage) -> Self {
        self.image = Some(image);
        self
    }

    /// CIDs of every blob this record references, in record order.
    pub fn blob_cids(&self) -> Vec<String> {
        let mut cids = Vec::new();
        if let Some(image) = &self.image {
            cids.push(image.thumb.cid().to_string());
            if let Some(fullsize) = &image.fullsize {
                cids.push(fullsize.cid().to_string());
            }
        }
        cids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geo() -> GeoCoordinates {
        GeoCoordinates::new(52.0742969, 4.3468013).unwrap()
    }

    fn address_ref() -> StrongRef {
        StrongRef::new(
            "at://did:plc:abc/community.lexicon.location.address/3kaddr",
            "bafyaddr",
        )
    }

    #[test]
    fn text_limit_counts_graphemes_not_bytes() {
        // 300 multi-byte graphemes are fine; 301 are not.
        let ok = "\u{1f9ed}".repeat(MAX_TEXT_GRAPHEMES);
        assert!(CheckinRecord::new(ok, "2026-08-30T12:00:00Z", address_ref(), geo()).is_ok());

        let too_long = "\u{1f9ed}".repeat(MAX_TEXT_GRAPHEMES + 1);
        assert_eq!(
            CheckinRecord::new(too_long, "2026-08-30T12:00:00Z", address_ref(), geo()),
            Err(RecordError::TextTooLong {
                len: MAX_TEXT_GRAPHEMES + 1,
                max: MAX_TEXT_GRAPHEMES
            })
        );
    }

    #[test]
    fn record_serializes_with_type_tags_and_camel_case() {
        let record = CheckinRecord::new(
            "dropped anchor",
            "2026-08-30T12:00:00Z",
            address_ref(),
            geo(),
        )
        .unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["$type"], CHECKIN_TYPE);
        assert_eq!(json["createdAt"], "2026-08-30T12:00:00Z");
        assert_eq!(
            json["addressRef"]["uri"],
            "at://did:plc:abc/community.lexicon.location.address/3kaddr"
        );
        assert_eq!(json["coordinates"]["latitude"], "52.0742969");
        assert!(json.get("image").is_none());
    }

    #[test]
    fn blob_cids_lists_thumb_then_fullsize() {
        let record = CheckinRecord::new("", "2026-08-30T12:00:00Z", address_ref(), geo())
            .unwrap()
            .with_image(CheckinImage {
                thumb: BlobRef::new("bafkthumb", "image/jpeg", 100),
                fullsize: Some(BlobRef::new("bafkfull", "image/jpeg", 2000)),
                alt: Some("harbour".into()),
            });
        assert_eq!(record.blob_cids(), vec!["bafkthumb", "bafkfull"]);
    }
}
