use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use image::ImageFormat;
use log::{ debug, warn };
use serde::{ Serialize, Serializer };

use crate::error::ChatError;

/// An uploaded image, already decoded and checked to be PNG or JPEG.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImageAttachment {
    pub filename: String,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    #[serde(serialize_with = "serialize_base64")]
    pub data: Vec<u8>,
}

fn serialize_base64<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&BASE64_STANDARD.encode(data))
}

impl ImageAttachment {
    /// Detects the format from the bytes themselves; the file name is informational only.
    pub fn from_bytes(filename: impl Into<String>, data: Vec<u8>) -> Result<Self, ChatError> {
        let filename = filename.into();
        let format = image::guess_format(&data).map_err(|_| {
            ChatError::Input(format!("'{}' is not a recognised image", filename))
        })?;

        let mime_type = match format {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            other => {
                warn!("Rejecting upload '{}' with unsupported format {:?}", filename, other);
                return Err(
                    ChatError::Input(
                        format!("'{}' must be a PNG or JPEG image (got {:?})", filename, other)
                    )
                );
            }
        };

        let decoded = image::load_from_memory_with_format(&data, format).map_err(|e| {
            ChatError::Input(format!("'{}' could not be decoded: {}", filename, e))
        })?;

        debug!(
            "Decoded upload '{}' as {} ({}x{}, {} bytes)",
            filename,
            mime_type,
            decoded.width(),
            decoded.height(),
            data.len()
        );

        Ok(Self {
            filename,
            mime_type: mime_type.to_string(),
            width: decoded.width(),
            height: decoded.height(),
            data,
        })
    }

    /// Decodes a base64 payload as sent by the client. A `data:` URL prefix is accepted.
    pub fn from_base64(filename: impl Into<String>, payload: &str) -> Result<Self, ChatError> {
        let filename = filename.into();
        let encoded = match payload.split_once(";base64,") {
            Some((prefix, rest)) if prefix.starts_with("data:") => rest,
            _ => payload,
        };
        let data = BASE64_STANDARD.decode(encoded.trim()).map_err(|e| {
            ChatError::Input(format!("'{}' is not valid base64: {}", filename, e))
        })?;
        Self::from_bytes(filename, data)
    }

    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(&self.data)
    }
}
