use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::constants::{IMAGE_DATA_URI_PREFIX, IMAGE_UPLOAD_DIR};
use crate::error::ValidationError;
use crate::schema::Uuid;

/// A decoded `data:image/<ext>;base64,<payload>` upload. Writing the bytes
/// out is the storage collaborator's job; the SDK only derives the stored
/// reference that gets persisted on the recipe row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub extension: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn stored_path(&self, recipe_id: Uuid) -> String {
        format!("{IMAGE_UPLOAD_DIR}/{recipe_id}.{}", self.extension)
    }
}

pub fn decode_image_data_uri(data: &str) -> Result<ImageUpload, ValidationError> {
    let rest = data
        .strip_prefix(IMAGE_DATA_URI_PREFIX)
        .ok_or(ValidationError::InvalidImage)?;
    let (extension, payload) = rest
        .split_once(";base64,")
        .ok_or(ValidationError::InvalidImage)?;

    if extension.is_empty() || extension.contains('/') {
        return Err(ValidationError::InvalidImage);
    }

    let bytes = STANDARD
        .decode(payload)
        .map_err(|_| ValidationError::InvalidImage)?;

    Ok(ImageUpload {
        extension: extension.to_string(),
        bytes,
    })
}
