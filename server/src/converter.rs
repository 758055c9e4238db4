use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::metadata::Orientation;
use image::{DynamicImage, GenericImageView, ImageDecoder, ImageFormat, ImageReader};
use kernel::TargetFormat;
use oxidize_pdf::{Document, Image as PdfImage, Page};

use crate::domain::{Codec, CodecError, DecodedImage};
use crate::error::ServiceError;
use crate::heif;

const JPEG_QUALITY: u8 = 90;
const PDF_IMAGE_NAME: &str = "page_image";

/// [`Codec`] backed by the `image` crate, with PDF output through `oxidize-pdf`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageCodec;

impl Codec for ImageCodec {
    fn decode(&self, data: &[u8]) -> Result<DecodedImage, CodecError> {
        if heif::is_heif(data) {
            return Ok(DecodedImage {
                pixels: heif::decode(data)?,
                orientation: Orientation::NoTransforms,
            });
        }
        let reader = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(image::ImageError::IoError)?;
        let mut decoder = reader.into_decoder()?;
        let orientation = decoder.orientation()?;
        let pixels = DynamicImage::from_decoder(decoder)?;
        Ok(DecodedImage {
            pixels,
            orientation,
        })
    }

    fn normalize_orientation(&self, image: DecodedImage) -> DynamicImage {
        let mut pixels = image.pixels;
        pixels.apply_orientation(image.orientation);
        pixels
    }

    fn convert_mode(&self, image: DynamicImage, target: &TargetFormat) -> DynamicImage {
        if target.requires_flattening() {
            return match image {
                DynamicImage::ImageRgb8(_) => image,
                other => DynamicImage::ImageRgb8(other.to_rgb8()),
            };
        }
        // the lossless WebP and the BMP encoders only take 8 bit RGB(A)
        match (target, image) {
            (
                TargetFormat::WebP | TargetFormat::Bmp,
                image @ (DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_)),
            ) => image,
            (TargetFormat::WebP | TargetFormat::Bmp, image) if image.color().has_alpha() => {
                DynamicImage::ImageRgba8(image.to_rgba8())
            }
            (TargetFormat::WebP | TargetFormat::Bmp, image) => {
                DynamicImage::ImageRgb8(image.to_rgb8())
            }
            (_, image) => image,
        }
    }

    fn encode(&self, image: &DynamicImage, target: &TargetFormat) -> Result<Vec<u8>, CodecError> {
        let mut buffer = Vec::new();
        match target {
            TargetFormat::Jpeg => {
                image.write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY))?;
            }
            TargetFormat::Pdf => buffer = encode_pdf(image)?,
            other => {
                let format = image_format(other)
                    .ok_or_else(|| CodecError::UnsupportedFormat(other.to_string()))?;
                image.write_to(&mut Cursor::new(&mut buffer), format)?;
            }
        }
        Ok(buffer)
    }
}

fn image_format(target: &TargetFormat) -> Option<ImageFormat> {
    match target {
        TargetFormat::Jpeg => Some(ImageFormat::Jpeg),
        TargetFormat::Png => Some(ImageFormat::Png),
        TargetFormat::WebP => Some(ImageFormat::WebP),
        TargetFormat::Bmp => Some(ImageFormat::Bmp),
        TargetFormat::Tiff => Some(ImageFormat::Tiff),
        TargetFormat::Pdf => None,
        TargetFormat::Other(token) => ImageFormat::from_extension(token),
    }
}

/// One page PDF, page size equal to the image size in points.
fn encode_pdf(image: &DynamicImage) -> Result<Vec<u8>, CodecError> {
    let mut jpeg = Vec::new();
    image.write_with_encoder(JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY))?;

    let (width, height) = image.dimensions();
    let (width, height) = (f64::from(width), f64::from(height));
    let mut page = Page::new(width, height);
    page.add_image(PDF_IMAGE_NAME, PdfImage::from_jpeg_data(jpeg)?);
    page.draw_image(PDF_IMAGE_NAME, 0.0, 0.0, width, height)?;

    let mut document = Document::new();
    document.add_page(page);
    let mut pdf = Vec::new();
    document.write(&mut pdf)?;
    Ok(pdf)
}

/// Converts the file at `input` into `target`, writing the result to `output`.
///
/// Any failure is reported as a single [`ServiceError::Conversion`] naming the
/// input file and the target format.
pub fn convert(
    codec: &dyn Codec,
    input: &Path,
    output: &Path,
    target: &TargetFormat,
) -> Result<(), ServiceError> {
    let fail = |reason: String| conversion_error(input, target, reason);

    let data = std::fs::read(input).map_err(|e| fail(e.to_string()))?;
    let decoded = codec.decode(&data).map_err(|e| fail(e.to_string()))?;
    let image = codec.normalize_orientation(decoded);
    let image = codec.convert_mode(image, target);
    let encoded = codec.encode(&image, target).map_err(|e| fail(e.to_string()))?;
    std::fs::write(output, &encoded).map_err(|e| fail(e.to_string()))?;

    tracing::debug!(
        "converted {} -> {} ({} bytes)",
        input.display(),
        output.display(),
        encoded.len()
    );
    Ok(())
}

/// Runs [`convert`] on the blocking pool.
pub async fn convert_file(
    codec: Arc<dyn Codec>,
    input: PathBuf,
    output: PathBuf,
    target: TargetFormat,
) -> Result<(), ServiceError> {
    let name = input.clone();
    let format = target.clone();
    tokio::task::spawn_blocking(move || convert(codec.as_ref(), &input, &output, &target))
        .await
        .map_err(|e| conversion_error(&name, &format, e.to_string()))?
}

fn conversion_error(input: &Path, target: &TargetFormat, reason: String) -> ServiceError {
    ServiceError::Conversion {
        file: input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        format: target.to_string(),
        reason,
    }
}
