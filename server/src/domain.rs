use image::metadata::Orientation;
use image::DynamicImage;
use kernel::TargetFormat;

/// Pixels as decoded, together with the orientation recorded in their metadata.
pub struct DecodedImage {
    pub pixels: DynamicImage,
    pub orientation: Orientation,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Pdf(#[from] oxidize_pdf::PdfError),
    #[cfg(feature = "heic")]
    #[error(transparent)]
    Heif(#[from] libheif_rs::HeifError),
    #[error("no encoder for {0}")]
    UnsupportedFormat(String),
    #[error("{0} input needs a build with the `{0}` feature")]
    UnsupportedInput(String),
    #[error("{0}")]
    Malformed(String),
}

/// The image codec the conversion pipeline depends on.
pub trait Codec: Send + Sync {
    fn decode(&self, data: &[u8]) -> Result<DecodedImage, CodecError>;

    /// Bakes the recorded orientation into the pixel data.
    fn normalize_orientation(&self, image: DecodedImage) -> DynamicImage;

    /// Adjusts the color mode to something `target` can store.
    fn convert_mode(&self, image: DynamicImage, target: &TargetFormat) -> DynamicImage;

    fn encode(&self, image: &DynamicImage, target: &TargetFormat) -> Result<Vec<u8>, CodecError>;
}
