//! Image decoding for the classifier.

use std::io::Cursor;

use image::{ImageFormat, RgbImage};

use emotion_core::{Error, Result};

/// Decode any supported encoded image into 8-bit RGB.
///
/// Alpha is dropped and grayscale is expanded, so every backend sees the
/// same three-channel layout.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| Error::Decode(format!("Failed to decode image: {}", e)))?;
    Ok(img.to_rgb8())
}

/// Encode an RGB image as PNG.
pub fn encode_png(img: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| Error::Decode(format!("Failed to encode PNG: {}", e)))?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, Rgba, RgbaImage};

    fn encode_dynamic(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_decode_rgb_png() {
        let img = RgbImage::from_pixel(3, 2, Rgb([10, 20, 30]));
        let png = encode_png(&img).unwrap();

        let decoded = decode_rgb(&png).unwrap();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.get_pixel(0, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_decode_rgb_drops_alpha() {
        let img = RgbaImage::from_pixel(2, 2, Rgba([200, 100, 50, 128]));
        let png = encode_dynamic(DynamicImage::ImageRgba8(img), ImageFormat::Png);

        let decoded = decode_rgb(&png).unwrap();
        assert_eq!(decoded.get_pixel(1, 1), &Rgb([200, 100, 50]));
    }

    #[test]
    fn test_decode_rgb_jpeg() {
        let img = RgbImage::from_pixel(8, 8, Rgb([128, 128, 128]));
        let jpeg = encode_dynamic(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg);

        let decoded = decode_rgb(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (8, 8));
    }

    #[test]
    fn test_decode_rgb_rejects_garbage() {
        let err = decode_rgb(b"definitely not an image").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_decode_rgb_rejects_empty() {
        assert!(decode_rgb(&[]).is_err());
    }
}
