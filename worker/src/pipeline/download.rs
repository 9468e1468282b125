use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header, Client, StatusCode};
use sha2::{Digest, Sha256};
use url::Url;

use common::ImageRecord;

use super::{ImageDownloader, USER_AGENT};

const ACCEPT_IMAGES: &str = "image/webp,image/apng,image/*,*/*;q=0.8";

/// Formatos que sabemos verificar por cabecera de archivo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
    Bmp,
}

impl ImageFormat {
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        match content_type {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::Webp),
            "image/bmp" | "image/x-ms-bmp" => Some(Self::Bmp),
            _ => None,
        }
    }

    pub fn sniff(data: &[u8]) -> Option<Self> {
        match data {
            [0xFF, 0xD8, 0xFF, ..] => Some(Self::Jpeg),
            [0x89, b'P', b'N', b'G', ..] => Some(Self::Png),
            [b'G', b'I', b'F', b'8', ..] => Some(Self::Gif),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(Self::Webp),
            [b'B', b'M', ..] => Some(Self::Bmp),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Webp => "webp",
            Self::Bmp => "bmp",
        }
    }
}

/// Comprueba que el contenido coincide con el tipo declarado. Tipos que no
/// sabemos verificar (svg, avif...) se aceptan tal cual.
pub fn verify_image(data: &[u8], content_type: &str) -> Result<()> {
    if data.is_empty() {
        bail!("imagen vacía");
    }
    if let Some(expected) = ImageFormat::from_content_type(content_type) {
        if ImageFormat::sniff(data) != Some(expected) {
            bail!("el contenido no es {content_type} válido");
        }
    }
    Ok(())
}

pub fn extension_for(content_type: &str) -> &'static str {
    ImageFormat::from_content_type(content_type)
        .map(|f| f.extension())
        .unwrap_or("jpg")
}

pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Algunas URLs firmadas llevan un timestamp que caduca; se refresca antes
/// de pedirlas.
pub fn refresh_timestamps(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    const KEYS: &[&str] = &["t", "_t", "timestamp"];
    if !url.query_pairs().any(|(k, _)| KEYS.contains(&k.as_ref())) {
        return raw.to_string();
    }

    let now = Utc::now().timestamp_millis().to_string();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if KEYS.contains(&k.as_ref()) {
                now.clone()
            } else {
                v.into_owned()
            };
            (k.into_owned(), v)
        })
        .collect();
    url.query_pairs_mut().clear().extend_pairs(pairs);
    url.to_string()
}

fn media_type(value: Option<&header::HeaderValue>) -> String {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default()
}

pub struct HttpImageDownloader {
    client: Client,
}

impl HttpImageDownloader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ImageDownloader for HttpImageDownloader {
    async fn download(&self, url: &str, referer: &str) -> Result<ImageRecord> {
        let target = refresh_timestamps(url);
        let res = self
            .client
            .get(&target)
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::ACCEPT, ACCEPT_IMAGES)
            .header(header::REFERER, referer)
            .send()
            .await?;

        if res.status() != StatusCode::OK {
            bail!("HTTP {}", res.status());
        }

        let content_type = media_type(res.headers().get(header::CONTENT_TYPE));
        if !content_type.starts_with("image/") {
            bail!("la respuesta no es una imagen ({content_type})");
        }

        let data = res.bytes().await?;
        verify_image(&data, &content_type)?;

        Ok(ImageRecord {
            url: url.to_string(),
            extension: extension_for(&content_type).to_string(),
            hash: sha256_hex(&data),
            size: data.len() as u64,
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    const WEBP: &[u8] = b"RIFF\x24\x00\x00\x00WEBPVP8 ";

    #[test]
    fn sniffs_magic_bytes() {
        assert_eq!(ImageFormat::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::sniff(PNG), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::sniff(b"GIF89a"), Some(ImageFormat::Gif));
        assert_eq!(ImageFormat::sniff(WEBP), Some(ImageFormat::Webp));
        assert_eq!(ImageFormat::sniff(b"BM\x00\x00"), Some(ImageFormat::Bmp));
        assert_eq!(ImageFormat::sniff(b"RIFF\x00\x00\x00\x00WAVE"), None);
        assert_eq!(ImageFormat::sniff(b"<html>"), None);
    }

    #[test]
    fn verification_rejects_mismatched_content() {
        assert!(verify_image(PNG, "image/png").is_ok());
        assert!(verify_image(PNG, "image/jpeg").is_err());
        assert!(verify_image(b"<html>", "image/gif").is_err());
        assert!(verify_image(b"", "image/png").is_err());
        // formato que no verificamos
        assert!(verify_image(b"<svg/>", "image/svg+xml").is_ok());
    }

    #[test]
    fn extension_from_content_type() {
        assert_eq!(extension_for("image/jpeg"), "jpg");
        assert_eq!(extension_for("image/webp"), "webp");
        assert_eq!(extension_for("image/x-icon"), "jpg");
    }

    #[test]
    fn sha256_is_hex_encoded() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn media_type_strips_parameters() {
        let v = header::HeaderValue::from_static("Image/PNG; charset=binary");
        assert_eq!(media_type(Some(&v)), "image/png");
        assert_eq!(media_type(None), "");
    }

    #[test]
    fn refreshes_only_timestamp_params() {
        let untouched = "https://example.com/a.jpg?w=100";
        assert_eq!(refresh_timestamps(untouched), untouched);

        let refreshed = refresh_timestamps("https://example.com/a.jpg?w=100&t=1&sign=abc");
        let url = Url::parse(&refreshed).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("w".to_string(), "100".to_string()));
        assert_eq!(pairs[2], ("sign".to_string(), "abc".to_string()));
        assert_ne!(pairs[1].1, "1");
        assert!(pairs[1].1.parse::<i64>().unwrap() > 1_600_000_000_000);
    }
}
