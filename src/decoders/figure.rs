//! `figure.binary@v1`: image bytes plus a `{caption, alt_text}` sidecar.

use base64::Engine;
use serde::Deserialize;
use serde_json::Value;

use super::{ArtifactInput, DecodeError, DecoderKey, FormatDecoder};
use crate::pandoc;
use crate::tree::Kind;

#[derive(Debug, Deserialize)]
struct FigureMeta {
    caption: String,
    #[serde(alias = "alt")]
    alt_text: String,
}

pub struct FigureBinaryV1;

/// MIME type from magic bytes
pub fn sniff_image(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        return Some("image/png");
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if bytes.starts_with(b"%PDF-") {
        return Some("application/pdf");
    }
    let head = &bytes[..bytes.len().min(1024)];
    if let Ok(text) = std::str::from_utf8(head) {
        let text = text.trim_start();
        if text.starts_with("<svg") || (text.starts_with("<?xml") && text.contains("<svg")) {
            return Some("image/svg+xml");
        }
    }
    None
}

fn parse_sidecar(bytes: Option<&[u8]>) -> Result<FigureMeta, DecodeError> {
    let bytes =
        bytes.ok_or_else(|| DecodeError::Sidecar("sidecar metadata file is absent".into()))?;
    let meta: FigureMeta = serde_json::from_slice(bytes)
        .map_err(|e| DecodeError::Sidecar(format!("malformed sidecar: {e}")))?;
    if meta.caption.trim().is_empty() {
        return Err(DecodeError::Sidecar("caption must be a non-empty string".into()));
    }
    if meta.alt_text.trim().is_empty() {
        return Err(DecodeError::Sidecar("alt_text must be a non-empty string".into()));
    }
    Ok(meta)
}

impl FormatDecoder for FigureBinaryV1 {
    fn key(&self) -> DecoderKey {
        DecoderKey::new(Kind::Figure, "figure.binary", "v1")
    }

    fn needs_sidecar(&self) -> bool {
        true
    }

    fn decode(&self, input: &ArtifactInput<'_>) -> Result<Value, DecodeError> {
        let limit = input.options.limits.max_image_bytes;
        if input.bytes.len() > limit {
            return Err(DecodeError::LimitExceeded(format!(
                "image is {} bytes > {limit}",
                input.bytes.len()
            )));
        }
        let mime = sniff_image(input.bytes).ok_or_else(|| {
            DecodeError::Image(format!("{} bytes of unknown format", input.bytes.len()))
        })?;
        let meta = parse_sidecar(input.sidecar)?;

        let target = if input.options.embed_figures {
            let encoded = base64::engine::general_purpose::STANDARD.encode(input.bytes);
            format!("data:{mime};base64,{encoded}")
        } else {
            input.target.to_string()
        };

        let image = pandoc::image(meta.alt_text.trim(), &target);
        Ok(pandoc::figure(input.id, meta.caption.trim(), image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::DecodeOptions;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    fn decode(
        bytes: &[u8],
        sidecar: Option<&str>,
        options: DecodeOptions,
    ) -> Result<Value, DecodeError> {
        FigureBinaryV1.decode(&ArtifactInput {
            id: "figure.roc.v1",
            bytes,
            sidecar: sidecar.map(str::as_bytes),
            target: "/artifacts/roc.png",
            options: &options,
        })
    }

    #[test]
    fn sniffs_formats() {
        assert_eq!(sniff_image(PNG), Some("image/png"));
        assert_eq!(sniff_image(b"%PDF-1.7"), Some("application/pdf"));
        assert_eq!(sniff_image(b"<?xml version=\"1.0\"?><svg/>"), Some("image/svg+xml"));
        assert_eq!(sniff_image(b"hello"), None);
    }

    #[test]
    fn builds_figure_from_sidecar() {
        let fragment = decode(
            PNG,
            Some(r#"{"caption": "ROC curve", "alt_text": "curve"}"#),
            DecodeOptions::default(),
        )
        .unwrap();
        assert_eq!(fragment["t"], "Figure");
        assert_eq!(fragment["c"][0][0], "figure.roc.v1");
        let image = &fragment["c"][2][0]["c"][0];
        assert_eq!(image["t"], "Image");
        assert_eq!(image["c"][2][0], "/artifacts/roc.png");
        assert_eq!(image["c"][1][0]["c"], "curve");
    }

    #[test]
    fn accepts_alt_alias() {
        assert!(decode(PNG, Some(r#"{"caption": "c", "alt": "a"}"#), DecodeOptions::default()).is_ok());
    }

    #[test]
    fn missing_or_bad_sidecar_fails() {
        assert!(matches!(
            decode(PNG, None, DecodeOptions::default()),
            Err(DecodeError::Sidecar(_))
        ));
        assert!(matches!(
            decode(PNG, Some(r#"{"caption": "c"}"#), DecodeOptions::default()),
            Err(DecodeError::Sidecar(_))
        ));
        assert!(matches!(
            decode(PNG, Some(r#"{"caption": " ", "alt_text": "a"}"#), DecodeOptions::default()),
            Err(DecodeError::Sidecar(_))
        ));
    }

    #[test]
    fn unknown_bytes_fail() {
        let err = decode(b"text", Some(r#"{"caption": "c", "alt_text": "a"}"#), DecodeOptions::default());
        assert!(matches!(err, Err(DecodeError::Image(_))));
    }

    #[test]
    fn embeds_data_uri() {
        let options = DecodeOptions { embed_figures: true, ..DecodeOptions::default() };
        let fragment = decode(PNG, Some(r#"{"caption": "c", "alt_text": "a"}"#), options).unwrap();
        let target = fragment["c"][2][0]["c"][0]["c"][2][0].as_str().unwrap();
        assert!(target.starts_with("data:image/png;base64,"));
    }
}
