use crate::core::io::Storage;
use crate::core::state::BaseImage;
use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::path::Path;

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

/// Reads an image file and turns it into an embeddable reference portrait.
pub async fn ingest_image(storage: &dyn Storage, path: &str) -> Result<BaseImage> {
    let mime_type = mime_for_path(Path::new(path))
        .ok_or_else(|| anyhow!("Unsupported image type: {}", path))?;
    let bytes = storage.read(path).await?;
    Ok(BaseImage {
        data: BASE64.encode(&bytes),
        mime_type: mime_type.to_string(),
        preview: path.to_string(),
    })
}

/// Splits a `data:<mime>;base64,<payload>` URL into a reference portrait.
pub fn ingest_data_url(data_url: &str, preview: &str) -> Result<BaseImage> {
    let (mime_type, data) = split_data_url(data_url)?;
    Ok(BaseImage {
        data: data.to_string(),
        mime_type: mime_type.to_string(),
        preview: preview.to_string(),
    })
}

pub fn split_data_url(data_url: &str) -> Result<(&str, &str)> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| anyhow!("Not a data URL"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| anyhow!("Data URL has no payload"))?;
    let mime_type = header
        .strip_suffix(";base64")
        .ok_or_else(|| anyhow!("Data URL is not base64 encoded"))?;
    if mime_type.is_empty() {
        return Err(anyhow!("Data URL has no media type"));
    }
    Ok((mime_type, payload))
}

/// Decodes a base64 data URL back to its media type and raw bytes.
pub fn decode_data_url(data_url: &str) -> Result<(String, Vec<u8>)> {
    let (mime_type, payload) = split_data_url(data_url)?;
    let bytes = BASE64
        .decode(payload.as_bytes())
        .context("Image base64 decode failed")?;
    Ok((mime_type.to_string(), bytes))
}
