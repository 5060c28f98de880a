//! Upload normalization: any image in, size-bounded WebP out.
//!
//! Pipeline per file:
//! 1. reject non-`image/*` media types ([`MediaError::UnsupportedMedia`])
//! 2. HEIC/HEIF -> JPEG (quality 90) through a [`HeifConverter`]
//! 3. decode, rotate upright from EXIF orientation, cap the width
//! 4. encode lossy WebP, stepping quality then width down per [`CompressionPlan`]
//!
//! Every call is independent and deterministic for the same input.

use std::io::Cursor;
use std::sync::Arc;

use image::imageops::FilterType;
use image::{DynamicImage, ImageDecoder, ImageReader};
use tracing::{debug, info, warn};

use crate::error::MediaError;
use crate::heif::{self, HeifConverter, HEIF_JPEG_QUALITY};
use crate::plan::{CompressionPlan, CompressionStep};

/// Media type of every transcoder output.
pub const OUTPUT_MEDIA_TYPE: &str = "image/webp";

/// File extension of every transcoder output.
pub const OUTPUT_EXTENSION: &str = ".webp";

#[derive(Debug, Clone)]
pub struct TranscodeOptions {
    /// Width cap applied before the first encode (never upscales).
    pub max_width: u32,
    /// Quality of the first encode.
    pub initial_quality: u8,
    /// libwebp `method` (0 = fast .. 6 = slowest/smallest).
    pub effort: i32,
    pub plan: CompressionPlan,
}

impl Default for TranscodeOptions {
    fn default() -> Self {
        Self {
            max_width: 2560,
            initial_quality: 85,
            effort: 4,
            plan: CompressionPlan::default(),
        }
    }
}

/// A transcoded image.
#[derive(Debug, Clone)]
pub struct Transcoded {
    pub bytes: Vec<u8>,
    pub quality: u8,
    pub width: u32,
    pub attempts: u32,
    /// `false` when even the floors could not get under the size ceiling.
    pub within_budget: bool,
}

impl Transcoded {
    pub fn media_type(&self) -> &'static str {
        OUTPUT_MEDIA_TYPE
    }

    pub fn extension(&self) -> &'static str {
        OUTPUT_EXTENSION
    }
}

#[derive(Clone)]
pub struct ImageTranscoder {
    options: TranscodeOptions,
    heif: Arc<dyn HeifConverter>,
}

impl Default for ImageTranscoder {
    fn default() -> Self {
        Self::new(TranscodeOptions::default())
    }
}

impl ImageTranscoder {
    pub fn new(options: TranscodeOptions) -> Self {
        Self {
            options,
            heif: heif::default_converter(),
        }
    }

    pub fn with_heif_converter(mut self, converter: Arc<dyn HeifConverter>) -> Self {
        self.heif = converter;
        self
    }

    pub fn options(&self) -> &TranscodeOptions {
        &self.options
    }

    /// Transcode one uploaded file.
    ///
    /// CPU-bound; async callers should run it on a blocking thread.
    pub fn transcode(
        &self,
        data: &[u8],
        original_name: &str,
        media_type: &str,
    ) -> Result<Transcoded, MediaError> {
        if !is_image_media_type(media_type) {
            return Err(MediaError::UnsupportedMedia(media_type.to_string()));
        }

        let converted;
        let source: &[u8] = if heif::is_heif(original_name, media_type) {
            converted = self.heif.to_jpeg(data, HEIF_JPEG_QUALITY)?;
            debug!(
                name = original_name,
                heif_bytes = data.len(),
                jpeg_bytes = converted.len(),
                "Converted HEIF upload to JPEG"
            );
            &converted
        } else {
            data
        };

        let base = decode_upright(source)?;
        let start = CompressionStep {
            quality: self.options.initial_quality,
            width: base.width().min(self.options.max_width),
        };

        let mut scaled: Option<(u32, DynamicImage)> = None;
        let result = self.options.plan.run(start, |step| {
            if step.width >= base.width() {
                return encode_webp(&base, step.quality, self.options.effort);
            }
            let stale = scaled.as_ref().map_or(true, |(w, _)| *w != step.width);
            if stale {
                scaled = Some((step.width, resize_to_width(&base, step.width)));
            }
            let img = scaled.as_ref().map(|(_, img)| img).unwrap_or(&base);
            encode_webp(img, step.quality, self.options.effort)
        })?;

        if result.within_budget {
            info!(
                name = original_name,
                input_bytes = data.len(),
                output_bytes = result.bytes.len(),
                quality = result.step.quality,
                width = result.step.width,
                attempts = result.attempts,
                "Transcoded upload to WebP"
            );
        } else {
            warn!(
                name = original_name,
                output_bytes = result.bytes.len(),
                max_bytes = self.options.plan.max_bytes,
                attempts = result.attempts,
                "Could not reach size ceiling; keeping smallest encode"
            );
        }

        Ok(Transcoded {
            bytes: result.bytes,
            quality: result.step.quality,
            width: result.step.width,
            attempts: result.attempts,
            within_budget: result.within_budget,
        })
    }
}

pub fn is_image_media_type(media_type: &str) -> bool {
    media_type
        .trim()
        .to_ascii_lowercase()
        .starts_with("image/")
}

/// Decode and apply the EXIF orientation, normalized to 8-bit RGB(A).
fn decode_upright(data: &[u8]) -> Result<DynamicImage, MediaError> {
    let mut decoder = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?
        .into_decoder()?;
    let orientation = decoder.orientation()?;

    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);

    // libwebp only accepts 8-bit RGB / RGBA buffers.
    Ok(match img {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => img,
        other if other.color().has_alpha() => DynamicImage::ImageRgba8(other.to_rgba8()),
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    })
}

fn resize_to_width(img: &DynamicImage, width: u32) -> DynamicImage {
    let height = ((img.height() as u64 * width as u64 + img.width() as u64 / 2)
        / img.width() as u64)
        .max(1) as u32;
    img.resize_exact(width, height, FilterType::Lanczos3)
}

fn encode_webp(img: &DynamicImage, quality: u8, effort: i32) -> Result<Vec<u8>, MediaError> {
    let encoder =
        webp::Encoder::from_image(img).map_err(|e| MediaError::Encode(e.to_string()))?;

    let mut config = webp::WebPConfig::new()
        .map_err(|_| MediaError::Encode("libwebp rejected the default config".to_string()))?;
    config.quality = quality as f32;
    config.method = effort;

    let memory = encoder
        .encode_advanced(&config)
        .map_err(|e| MediaError::Encode(format!("{e:?}")))?;
    Ok(memory.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, Rgba};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn png_bytes(img: DynamicImage) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        img.write_to(&mut cursor, image::ImageFormat::Png).unwrap();
        cursor.into_inner()
    }

    fn gradient(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        png_bytes(DynamicImage::ImageRgb8(img))
    }

    fn noise(width: u32, height: u32) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(7);
        let img = ImageBuffer::from_fn(width, height, |_, _| Rgb([rng.gen(), rng.gen(), rng.gen()]));
        png_bytes(DynamicImage::ImageRgb8(img))
    }

    /// 40x20 JPEG, red left half and blue right half, carrying an EXIF
    /// APP1 segment with Orientation=6 (rotate 90 degrees clockwise).
    fn jpeg_rotated_cw() -> Vec<u8> {
        let img = ImageBuffer::from_fn(40, 20, |x, _| {
            if x < 20 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) }
        });
        let mut jpeg = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut jpeg, image::ImageFormat::Jpeg)
            .unwrap();
        let jpeg = jpeg.into_inner();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        #[rustfmt::skip]
        let app1: [u8; 36] = [
            0xFF, 0xE1, 0x00, 0x22,
            b'E', b'x', b'i', b'f', 0, 0,
            // TIFF header, big endian, IFD0 at offset 8
            b'M', b'M', 0x00, 0x2A, 0x00, 0x00, 0x00, 0x08,
            // one entry: Orientation (0x0112), SHORT, count 1, value 6
            0x00, 0x01,
            0x01, 0x12, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01, 0x00, 0x06, 0x00, 0x00,
            // no next IFD
            0x00, 0x00, 0x00, 0x00,
        ];

        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&app1);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    fn decoded_width(webp: &[u8]) -> u32 {
        image::load_from_memory_with_format(webp, image::ImageFormat::WebP)
            .unwrap()
            .width()
    }

    fn is_webp(bytes: &[u8]) -> bool {
        bytes.len() > 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP"
    }

    struct PngAsJpeg(Vec<u8>);

    impl HeifConverter for PngAsJpeg {
        fn to_jpeg(&self, _data: &[u8], quality: u8) -> Result<Vec<u8>, MediaError> {
            assert_eq!(quality, 90);
            Ok(self.0.clone())
        }
    }

    struct BrokenHeif;

    impl HeifConverter for BrokenHeif {
        fn to_jpeg(&self, _data: &[u8], _quality: u8) -> Result<Vec<u8>, MediaError> {
            Err(MediaError::Conversion("corrupt container".to_string()))
        }
    }

    #[test]
    fn non_image_is_unsupported() {
        let err = ImageTranscoder::default()
            .transcode(b"%PDF-1.7", "brochure.pdf", "application/pdf")
            .unwrap_err();
        assert!(err.is_skippable());
    }

    #[test]
    fn exif_orientation_is_applied_before_encoding() {
        let upright = decode_upright(&jpeg_rotated_cw()).unwrap();
        assert_eq!((upright.width(), upright.height()), (20, 40));
        // The red left half ends up on top.
        let rgb = upright.to_rgb8();
        let top = rgb.get_pixel(10, 5);
        let bottom = rgb.get_pixel(10, 34);
        assert!(top[0] > 200 && top[2] < 60, "top pixel {top:?}");
        assert!(bottom[2] > 200 && bottom[0] < 60, "bottom pixel {bottom:?}");

        let out = ImageTranscoder::default()
            .transcode(&jpeg_rotated_cw(), "phone.jpg", "image/jpeg")
            .unwrap();
        assert_eq!(out.width, 20);
        let webp = image::load_from_memory_with_format(&out.bytes, image::ImageFormat::WebP).unwrap();
        assert_eq!((webp.width(), webp.height()), (20, 40));
    }

    #[test]
    fn small_image_keeps_width_and_initial_quality() {
        let out = ImageTranscoder::default()
            .transcode(&gradient(320, 200), "small.png", "image/png")
            .unwrap();

        assert!(is_webp(&out.bytes));
        assert_eq!(out.width, 320);
        assert_eq!(out.quality, 85);
        assert_eq!(out.attempts, 1);
        assert_eq!(decoded_width(&out.bytes), 320);
        assert_eq!(out.extension(), ".webp");
    }

    #[test]
    fn wide_image_is_capped() {
        let out = ImageTranscoder::default()
            .transcode(&gradient(3000, 60), "wide.png", "image/png")
            .unwrap();
        assert_eq!(out.width, 2560);
        assert_eq!(decoded_width(&out.bytes), 2560);
    }

    #[test]
    fn alpha_images_are_accepted() {
        let img = ImageBuffer::from_fn(64, 64, |x, _| Rgba([255, 0, 0, (x * 4) as u8]));
        let out = ImageTranscoder::default()
            .transcode(&png_bytes(DynamicImage::ImageRgba8(img)), "a.png", "image/png")
            .unwrap();
        assert!(is_webp(&out.bytes));
    }

    #[test]
    fn impossible_ceiling_stops_at_floors() {
        let options = TranscodeOptions {
            plan: CompressionPlan {
                max_bytes: 64,
                ..CompressionPlan::default()
            },
            ..TranscodeOptions::default()
        };
        let out = ImageTranscoder::new(options)
            .transcode(&noise(1500, 120), "noise.png", "image/png")
            .unwrap();

        assert!(!out.within_budget);
        // 85..60 in steps of 5, then 1500 -> 1350 -> 1280
        assert_eq!(out.attempts, 8);
        assert!(out.quality >= 60);
        assert!(out.width >= 1280);
        assert_eq!(decoded_width(&out.bytes), out.width);
    }

    #[test]
    fn same_input_gives_same_output() {
        let input = noise(200, 100);
        let transcoder = ImageTranscoder::default();
        let a = transcoder.transcode(&input, "n.png", "image/png").unwrap();
        let b = transcoder.transcode(&input, "n.png", "image/png").unwrap();
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn heif_is_routed_through_converter() {
        let transcoder = ImageTranscoder::default()
            .with_heif_converter(Arc::new(PngAsJpeg(gradient(40, 30))));
        // Declared type looks like JPEG; the extension gives it away.
        let out = transcoder
            .transcode(b"ftypheic....", "IMG_0001.HEIC", "image/jpeg")
            .unwrap();
        assert_eq!(out.width, 40);
    }

    #[test]
    fn heif_conversion_failure_is_reported() {
        let transcoder = ImageTranscoder::default().with_heif_converter(Arc::new(BrokenHeif));
        let err = transcoder
            .transcode(b"ftypheic....", "photo", "image/heic")
            .unwrap_err();
        assert!(matches!(err, MediaError::Conversion(_)));
        assert!(!err.is_skippable());
    }

    #[test]
    fn garbage_image_fails_to_decode() {
        let err = ImageTranscoder::default()
            .transcode(b"definitely not pixels", "x.jpg", "image/jpeg")
            .unwrap_err();
        assert!(matches!(err, MediaError::Image(_)));
    }
}
