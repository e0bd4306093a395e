use std::path::Path;

use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// The single not-yet-sent image. Lives in one slot on the app: filled by
/// [`encode`], emptied when consumed into a user turn or cleared explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAttachment {
    pub file_name: String,
    pub data_url: String,
}

/// Read the file and produce its transportable textual encoding
/// (`data:<mime>;base64,...`). No MIME or size validation here; the backend
/// decides what it accepts.
pub async fn encode(path: &Path) -> Result<PendingAttachment> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;

    let data_url = format!("data:{};base64,{}", mime_for(path), STANDARD.encode(&bytes));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    Ok(PendingAttachment { file_name, data_url })
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn encode_produces_data_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pixel.png");
        let payload = b"\x89PNG\r\n\x1a\n";
        std::fs::File::create(&path)
            .unwrap()
            .write_all(payload)
            .unwrap();

        let attachment = encode(&path).await.unwrap();
        assert_eq!(attachment.file_name, "pixel.png");

        let prefix = "data:image/png;base64,";
        assert!(attachment.data_url.starts_with(prefix));
        let decoded = STANDARD
            .decode(&attachment.data_url[prefix.len()..])
            .unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn encode_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(encode(&dir.path().join("missing.jpg")).await.is_err());
    }

    #[test]
    fn mime_guessed_from_extension() {
        assert_eq!(mime_for(Path::new("a.jpeg")), "image/jpeg");
        assert_eq!(mime_for(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(mime_for(Path::new("a.webp")), "image/webp");
        assert_eq!(mime_for(Path::new("noext")), "application/octet-stream");
    }
}
