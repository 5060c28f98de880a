//! HEIC/HEIF ("high efficiency" phone photos) detection and conversion.
//!
//! Only uploads already declared as `image/*` get here. Within those, the
//! type may be generic or the file renamed by a picker, so either the name
//! or the type marking HEIF is enough.

use std::sync::Arc;

use crate::error::MediaError;

/// Quality used when re-encoding a HEIF photo as baseline JPEG.
pub const HEIF_JPEG_QUALITY: u8 = 90;

/// Returns `true` when either the file extension or the media type marks
/// the upload as HEIC/HEIF.
pub fn is_heif(original_name: &str, media_type: &str) -> bool {
    let name = original_name.to_ascii_lowercase();
    let media_type = media_type.to_ascii_lowercase();
    name.ends_with(".heic")
        || name.ends_with(".heif")
        || media_type.contains("heic")
        || media_type.contains("heif")
}

/// Converts a HEIF container into JPEG bytes.
pub trait HeifConverter: Send + Sync {
    fn to_jpeg(&self, data: &[u8], quality: u8) -> Result<Vec<u8>, MediaError>;
}

/// Converter used when the crate is built without the `heif` feature.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableHeif;

impl HeifConverter for UnavailableHeif {
    fn to_jpeg(&self, _data: &[u8], _quality: u8) -> Result<Vec<u8>, MediaError> {
        Err(MediaError::Conversion(
            "HEIF support is not compiled in (enable the `heif` feature)".to_string(),
        ))
    }
}

/// libheif-backed converter.
#[cfg(feature = "heif")]
#[derive(Debug, Default, Clone, Copy)]
pub struct LibheifConverter;

#[cfg(feature = "heif")]
impl HeifConverter for LibheifConverter {
    fn to_jpeg(&self, data: &[u8], quality: u8) -> Result<Vec<u8>, MediaError> {
        use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

        let conversion = |e: libheif_rs::HeifError| MediaError::Conversion(e.to_string());

        let lib = LibHeif::new();
        let ctx = HeifContext::read_from_bytes(data).map_err(conversion)?;
        let handle = ctx.primary_image_handle().map_err(conversion)?;
        let decoded = lib
            .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)
            .map_err(conversion)?;

        let planes = decoded.planes();
        let plane = planes
            .interleaved
            .ok_or_else(|| MediaError::Conversion("decoded HEIF has no RGB plane".to_string()))?;

        // Rows may be padded: copy `width * 3` bytes out of every `stride`.
        let row_len = plane.width as usize * 3;
        let mut pixels = Vec::with_capacity(row_len * plane.height as usize);
        for row in plane.data.chunks(plane.stride).take(plane.height as usize) {
            pixels.extend_from_slice(&row[..row_len]);
        }

        let rgb = image::RgbImage::from_raw(plane.width, plane.height, pixels)
            .ok_or_else(|| MediaError::Conversion("HEIF plane size mismatch".to_string()))?;

        encode_jpeg(&image::DynamicImage::ImageRgb8(rgb), quality)
    }
}

/// The converter matching the enabled cargo features.
pub fn default_converter() -> Arc<dyn HeifConverter> {
    #[cfg(feature = "heif")]
    {
        Arc::new(LibheifConverter)
    }
    #[cfg(not(feature = "heif"))]
    {
        Arc::new(UnavailableHeif)
    }
}

#[cfg(any(feature = "heif", test))]
pub(crate) fn encode_jpeg(img: &image::DynamicImage, quality: u8) -> Result<Vec<u8>, MediaError> {
    use std::io::Cursor;

    use image::codecs::jpeg::JpegEncoder;
    use image::DynamicImage;

    let mut out = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut out, quality);
    DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)?;
    Ok(out.into_inner())
}
