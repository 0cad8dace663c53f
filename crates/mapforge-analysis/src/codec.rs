//! PNG encoding and decoding at the analysis boundary.
//!
//! Bitmaps cross every boundary (worker, controller, external
//! collaborators) as PNG bytes wrapped in [`EncodedImage`]. Decoding
//! accepts anything the `image` crate can read; encoding always
//! produces PNG so translucent overlays keep their alpha channel.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::ImageEncoder;
use serde::{Deserialize, Serialize};

use crate::types::{AnalysisError, RgbaImage};

/// Prefix of a PNG data URI.
const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// Decode raw image bytes into an RGBA bitmap.
///
/// # Errors
///
/// Returns [`AnalysisError::EmptyInput`] if `bytes` is empty.
/// Returns [`AnalysisError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
pub fn decode_rgba(bytes: &[u8]) -> Result<RgbaImage, AnalysisError> {
    if bytes.is_empty() {
        return Err(AnalysisError::EmptyInput);
    }

    let img = image::load_from_memory(bytes)?;
    Ok(img.to_rgba8())
}

/// Encode an RGBA bitmap as PNG.
///
/// # Errors
///
/// Returns [`AnalysisError::ImageEncode`] if the PNG encoder fails.
pub fn encode_png(image: &RgbaImage) -> Result<EncodedImage, AnalysisError> {
    let mut png_bytes = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut png_bytes);
    encoder
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|e| AnalysisError::ImageEncode(e.to_string()))?;
    Ok(EncodedImage(png_bytes))
}

/// PNG-encoded image bytes.
///
/// Serializes as a `data:image/png;base64,...` URI so revision
/// histories stay embeddable when exported as JSON.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage(Vec<u8>);

impl EncodedImage {
    /// Wrap already-encoded image bytes. No validation is performed
    /// until the bytes are decoded.
    #[must_use]
    pub const fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Encode a bitmap. See [`encode_png`].
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::ImageEncode`] if the PNG encoder fails.
    pub fn encode(image: &RgbaImage) -> Result<Self, AnalysisError> {
        encode_png(image)
    }

    /// Decode back into a bitmap. See [`decode_rgba`].
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::EmptyInput`] or
    /// [`AnalysisError::ImageDecode`] on bad data.
    pub fn decode(&self) -> Result<RgbaImage, AnalysisError> {
        decode_rgba(&self.0)
    }

    /// The raw encoded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume and return the raw encoded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Byte length of the encoded data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Render as an embeddable `data:image/png;base64,...` URI.
    #[must_use]
    pub fn to_data_uri(&self) -> String {
        format!("{PNG_DATA_URI_PREFIX}{}", STANDARD.encode(&self.0))
    }

    /// Parse a base64 image data URI.
    ///
    /// Any `data:image/<type>;base64,` prefix is accepted; the payload is
    /// kept as-is and decoded lazily.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::InvalidDataUri`] if the prefix is missing
    /// or the payload is not valid base64.
    pub fn from_data_uri(uri: &str) -> Result<Self, AnalysisError> {
        let rest = uri
            .strip_prefix("data:image/")
            .ok_or_else(|| AnalysisError::InvalidDataUri("missing data:image/ prefix".into()))?;
        let (_, payload) = rest
            .split_once(";base64,")
            .ok_or_else(|| AnalysisError::InvalidDataUri("not base64-encoded".into()))?;
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| AnalysisError::InvalidDataUri(e.to_string()))?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncodedImage({} bytes)", self.0.len())
    }
}

impl Serialize for EncodedImage {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_data_uri())
    }
}

impl<'de> Deserialize<'de> for EncodedImage {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let uri = String::deserialize(deserializer)?;
        Self::from_data_uri(&uri).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_returns_error() {
        assert!(matches!(decode_rgba(&[]), Err(AnalysisError::EmptyInput)));
    }

    #[test]
    fn corrupt_bytes_returns_image_decode_error() {
        let result = decode_rgba(&[0xFF, 0xFE, 0x00, 0x01]);
        assert!(matches!(result, Err(AnalysisError::ImageDecode(_))));
    }

    #[test]
    #[allow(clippy::cast_possible_truncation)]
    fn png_preserves_pixels_and_alpha() {
        let img = RgbaImage::from_fn(5, 3, |x, y| {
            image::Rgba([(x * 40) as u8, (y * 80) as u8, 7, if x == 0 { 0 } else { 200 }])
        });
        let encoded = encode_png(&img).unwrap();
        assert!(!encoded.is_empty());
        let decoded = encoded.decode().unwrap();
        assert_eq!(decoded.dimensions(), (5, 3));
        assert_eq!(decoded.as_raw(), img.as_raw());
    }

    #[test]
    fn data_uri_has_png_prefix() {
        let img = RgbaImage::from_pixel(1, 1, image::Rgba([1, 2, 3, 4]));
        let uri = encode_png(&img).unwrap().to_data_uri();
        assert!(uri.starts_with("data:image/png;base64,"));
        let back = EncodedImage::from_data_uri(&uri).unwrap();
        assert_eq!(back.decode().unwrap().get_pixel(0, 0).0, [1, 2, 3, 4]);
    }

    #[test]
    fn from_data_uri_accepts_other_image_types() {
        let uri = format!("data:image/jpeg;base64,{}", STANDARD.encode([1u8, 2, 3]));
        let img = EncodedImage::from_data_uri(&uri).unwrap();
        assert_eq!(img.as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn from_data_uri_rejects_bad_input() {
        assert!(matches!(
            EncodedImage::from_data_uri("http://example.com/a.png"),
            Err(AnalysisError::InvalidDataUri(_))
        ));
        assert!(EncodedImage::from_data_uri("data:image/png,rawbytes").is_err());
        assert!(EncodedImage::from_data_uri("data:image/png;base64,@@@").is_err());
    }

    #[test]
    fn serde_uses_data_uri_string() {
        let img = RgbaImage::from_pixel(2, 2, image::Rgba([9, 9, 9, 255]));
        let encoded = encode_png(&img).unwrap();
        let json = serde_json::to_string(&encoded).unwrap();
        assert!(json.starts_with("\"data:image/png;base64,"));
        let back: EncodedImage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, encoded);
    }

    #[test]
    fn debug_hides_payload() {
        let encoded = EncodedImage::from_bytes(vec![0; 42]);
        assert_eq!(format!("{encoded:?}"), "EncodedImage(42 bytes)");
    }
}
