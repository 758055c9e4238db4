//! HEIF/HEIC input. Detection is always available, decoding only with the
//! `heic` feature, which links the system libheif.

use image::DynamicImage;

use crate::domain::CodecError;

const FTYP: &[u8] = b"ftyp";
const HEIF_BRANDS: [&[u8]; 8] = [
    b"heic", b"heix", b"hevc", b"hevx", b"heim", b"heis", b"mif1", b"msf1",
];

/// Whether `data` opens with an ISO BMFF `ftyp` box of a HEIF major brand.
#[must_use]
pub fn is_heif(data: &[u8]) -> bool {
    match (data.get(4..8), data.get(8..12)) {
        (Some(FTYP), Some(brand)) => HEIF_BRANDS.contains(&brand),
        _ => false,
    }
}

/// Decodes the primary image. libheif applies the container's rotation and
/// mirroring, so the pixels come out upright.
#[cfg(feature = "heic")]
pub fn decode(data: &[u8]) -> Result<DynamicImage, CodecError> {
    use image::{RgbImage, RgbaImage};
    use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

    let ctx = HeifContext::read_from_bytes(data)?;
    let handle = ctx.primary_image_handle()?;
    let alpha = handle.has_alpha_channel();
    let (chroma, channels) = if alpha {
        (RgbChroma::Rgba, 4)
    } else {
        (RgbChroma::Rgb, 3)
    };
    let image = LibHeif::new().decode(&handle, ColorSpace::Rgb(chroma), None)?;
    let planes = image.planes();
    let plane = planes
        .interleaved
        .ok_or_else(|| CodecError::Malformed("heic image without interleaved plane".to_owned()))?;

    let (width, height) = (plane.width, plane.height);
    let row = width as usize * channels;
    let mut pixels = Vec::with_capacity(row * height as usize);
    for line in plane.data.chunks(plane.stride).take(height as usize) {
        let line = line
            .get(..row)
            .ok_or_else(|| CodecError::Malformed("heic row shorter than its width".to_owned()))?;
        pixels.extend_from_slice(line);
    }

    let image = if alpha {
        RgbaImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgba8)
    } else {
        RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8)
    };
    image.ok_or_else(|| CodecError::Malformed("heic plane size mismatch".to_owned()))
}

#[cfg(not(feature = "heic"))]
pub fn decode(_data: &[u8]) -> Result<DynamicImage, CodecError> {
    Err(CodecError::UnsupportedInput("heic".to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::ImageCodec;
    use crate::domain::Codec;
    use rstest::rstest;

    #[rstest]
    #[case(b"\0\0\0\x18ftypheic\0\0\0\0mif1heic", true)]
    #[case(b"\0\0\0\x18ftypmif1\0\0\0\0heic", true)]
    #[case(b"\0\0\0\x1cftypavif\0\0\0\0avifmif1", false)]
    #[case(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR", false)]
    #[case(b"\0\0\0\x18ftyp", false)]
    #[case(b"", false)]
    fn heif_detection(#[case] data: &[u8], #[case] expected: bool) {
        assert_eq!(is_heif(data), expected);
    }

    #[cfg(not(feature = "heic"))]
    #[test]
    fn heic_needs_the_feature() {
        // Arrange
        let data = b"\0\0\0\x18ftypheic\0\0\0\0mif1heic";

        // Act
        let result = ImageCodec.decode(data);

        // Assert
        match result {
            Err(e @ CodecError::UnsupportedInput(_)) => {
                assert_eq!(e.to_string(), "heic input needs a build with the `heic` feature");
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("heic decoded without the feature"),
        }
    }

    #[cfg(feature = "heic")]
    #[test]
    fn heic_decodes_to_upright_pixels() {
        use image::GenericImageView;
        use libheif_rs::{
            Channel, ColorSpace, CompressionFormat, EncoderQuality, HeifContext, Image, LibHeif,
            RgbChroma,
        };

        // Arrange
        let lib = LibHeif::new();
        let mut image = Image::new(64, 32, ColorSpace::Rgb(RgbChroma::C444)).unwrap();
        for channel in [Channel::R, Channel::G, Channel::B] {
            image.create_plane(channel, 64, 32, 8).unwrap();
        }
        let mut ctx = HeifContext::new().unwrap();
        let mut encoder = lib.encoder_for_format(CompressionFormat::Hevc).unwrap();
        encoder.set_quality(EncoderQuality::Lossy(90)).unwrap();
        ctx.encode_image(&image, &mut encoder, None).unwrap();
        let data = ctx.write_to_bytes().unwrap();

        // Act
        let decoded = ImageCodec.decode(&data).unwrap();

        // Assert
        assert!(is_heif(&data));
        assert_eq!(decoded.pixels.dimensions(), (64, 32));
    }
}
