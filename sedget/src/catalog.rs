//! Role to firmware file mapping.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SedgetError;

const ROLE_KINDS: [&str; 2] = ["video_decoder", "video_encoder"];

/// Built-in role table for the reference firmware set.
const REFERENCE_ROLES: [(&str, &str); 16] = [
    ("video_decoder.avc", "h264dec.efwb"),
    ("video_encoder.avc", "h264enc.efwb"),
    ("video_decoder.hevc", "hevcdec.efwb"),
    ("video_encoder.hevc", "hevcenc.efwb"),
    ("video_decoder.h264", "h264dec.efwb"),
    ("video_decoder.vp8", "vp8dec.efwb"),
    ("video_encoder.vp8", "vp8enc.efwb"),
    ("video_decoder.vp9", "vp9dec.efwb"),
    ("video_encoder.vp9", "vp9enc.efwb"),
    ("video_decoder.rv", "rvdec.efwb"),
    ("video_decoder.mpeg2", "mpeg2dec.efwb"),
    ("video_decoder.mpeg4", "mpeg4dec.efwb"),
    ("video_decoder.h263", "mpeg4dec.efwb"),
    ("video_decoder.vc1", "vc1dec.efwb"),
    ("video_encoder.jpeg", "jpegenc.efwb"),
    ("video_decoder.jpeg", "jpegdec.efwb"),
];

/// One role and the file holding its firmware.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// `<video_decoder|video_encoder>.<codec>`.
    pub role: String,
    /// File name, relative to the firmware directory.
    pub filename: String,
}

/// Immutable role table, matched exactly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FirmwareCatalog {
    entries: Vec<CatalogEntry>,
}

impl Default for FirmwareCatalog {
    fn default() -> Self {
        Self::reference()
    }
}

impl FirmwareCatalog {
    /// The sixteen roles of the reference firmware set.
    pub fn reference() -> Self {
        Self {
            entries: REFERENCE_ROLES
                .iter()
                .map(|(role, filename)| CatalogEntry {
                    role: (*role).to_string(),
                    filename: (*filename).to_string(),
                })
                .collect(),
        }
    }

    /// Build from explicit entries, checking every role.
    pub fn from_entries(entries: Vec<CatalogEntry>) -> Result<Self, SedgetError> {
        let mut seen = HashSet::new();
        for entry in &entries {
            validate_role(&entry.role)?;
            if entry.filename.is_empty() || Path::new(&entry.filename).is_absolute() {
                return Err(SedgetError::InvalidArgument(
                    "catalog filename must be a non-empty relative path",
                ));
            }
            if !seen.insert(entry.role.as_str()) {
                return Err(SedgetError::DuplicateRole(entry.role.clone()));
            }
        }
        Ok(Self { entries })
    }

    /// Parse a JSON list of `{ "role": ..., "filename": ... }` objects.
    pub fn from_json(bytes: &[u8]) -> Result<Self, SedgetError> {
        let entries: Vec<CatalogEntry> = serde_json::from_slice(bytes)?;
        Self::from_entries(entries)
    }

    /// File registered for `role`.
    pub fn lookup(&self, role: &str) -> Result<&str, SedgetError> {
        validate_role(role)?;
        self.entries
            .iter()
            .find(|e| e.role == role)
            .map(|e| e.filename.as_str())
            .ok_or_else(|| SedgetError::UnknownRole(role.to_string()))
    }

    /// All entries in table order.
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }
}

/// Check that `role` reads `<video_decoder|video_encoder>.<codec>` where
/// the codec is lowercase alphanumeric.
pub fn validate_role(role: &str) -> Result<(), SedgetError> {
    let invalid = || SedgetError::InvalidRole(role.to_string());
    let (kind, codec) = role.split_once('.').ok_or_else(invalid)?;
    if !ROLE_KINDS.contains(&kind) {
        return Err(invalid());
    }
    let codec_ok = !codec.is_empty()
        && codec
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
    if !codec_ok {
        return Err(invalid());
    }
    Ok(())
}
