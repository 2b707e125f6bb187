use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::error::{ChatError, Result};
use crate::state::Part;

const SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xff\xd8\xff", "image/jpeg"),
    (b"GIF87a", "image/gif"),
    (b"GIF89a", "image/gif"),
];

fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    // RIFF....WEBP
    if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    SIGNATURES
        .iter()
        .find(|(magic, _)| bytes.starts_with(magic))
        .map(|(_, mime)| *mime)
}

/// Wrap raw upload bytes as an inline `data:` URL part. The bytes are passed
/// through untouched; only the container format is recognized.
pub fn encode_image(bytes: &[u8]) -> Result<Part> {
    if bytes.is_empty() {
        return Err(ChatError::unsupported_image("empty upload"));
    }
    let mime = sniff_mime(bytes)
        .ok_or_else(|| ChatError::unsupported_image("expected PNG, JPEG, GIF or WEBP data"))?;

    Ok(Part::image(format!("data:{};base64,{}", mime, BASE64.encode(bytes))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url_of(part: Part) -> String {
        match part {
            Part::ImageUrl { image_url } => image_url.url,
            other => panic!("expected image part, got {:?}", other),
        }
    }

    #[test]
    fn test_png_data_url() {
        let bytes = b"\x89PNG\r\n\x1a\nrest";
        let url = url_of(encode_image(bytes).unwrap());
        assert!(url.starts_with("data:image/png;base64,"));
        let encoded = url.trim_start_matches("data:image/png;base64,");
        assert_eq!(BASE64.decode(encoded).unwrap(), bytes.to_vec());
    }

    #[test]
    fn test_jpeg_and_webp() {
        let jpeg = url_of(encode_image(b"\xff\xd8\xff\xe0data").unwrap());
        assert!(jpeg.starts_with("data:image/jpeg;base64,"));

        let webp = url_of(encode_image(b"RIFF\x00\x00\x00\x00WEBPVP8 ").unwrap());
        assert!(webp.starts_with("data:image/webp;base64,"));
    }

    #[test]
    fn test_rejects_unknown_and_empty() {
        assert!(matches!(
            encode_image(b"plain text"),
            Err(ChatError::UnsupportedImage(_))
        ));
        assert!(matches!(encode_image(b""), Err(ChatError::UnsupportedImage(_))));
    }
}
