use std::fmt;
use std::path::Path;
use std::time::Instant;

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::shared::constants::JPEG_QUALITY;
use crate::shared::frame::Frame;

/// An immutable JPEG snapshot of one camera frame.
#[derive(Clone)]
pub struct StillImage {
    jpeg: Vec<u8>,
    width: u32,
    height: u32,
    sequence: u64,
    captured_at: Instant,
}

impl StillImage {
    /// Encodes `frame` as JPEG. Frames with an alpha channel are flattened
    /// to RGB first.
    pub fn encode(frame: &Frame) -> Result<Self, image::ImageError> {
        let rgb: Vec<u8> = match frame.channels() {
            3 => frame.data().to_vec(),
            4 => frame
                .data()
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect(),
            n => {
                return Err(image::ImageError::Unsupported(
                    image::error::UnsupportedError::from_format_and_kind(
                        image::error::ImageFormatHint::Unknown,
                        image::error::UnsupportedErrorKind::GenericFeature(format!(
                            "{n}-channel frames"
                        )),
                    ),
                ))
            }
        };

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).encode(
            &rgb,
            frame.width(),
            frame.height(),
            ExtendedColorType::Rgb8,
        )?;

        Ok(Self {
            jpeg,
            width: frame.width(),
            height: frame.height(),
            sequence: frame.sequence(),
            captured_at: Instant::now(),
        })
    }

    pub fn jpeg(&self) -> &[u8] {
        &self.jpeg
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Sequence number of the frame this still was taken from.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &self.jpeg)
    }
}

impl fmt::Debug for StillImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StillImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("bytes", &self.jpeg.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_produces_decodable_jpeg() {
        let frame = Frame::filled(64, 48, [200, 40, 40], 7);
        let still = StillImage::encode(&frame).unwrap();

        assert_eq!(&still.jpeg()[..2], &[0xFF, 0xD8]);
        assert_eq!(still.sequence(), 7);

        let decoded = image::load_from_memory(still.jpeg()).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (64, 48));
        let px = decoded.get_pixel(32, 24).0;
        assert!(px[0] > 150 && px[1] < 90 && px[2] < 90);
    }

    #[test]
    fn test_encode_flattens_alpha() {
        let data = [10u8, 20, 30, 255].repeat(16 * 16);
        let frame = Frame::new(data, 16, 16, 4, 0).unwrap();
        let still = StillImage::encode(&frame).unwrap();
        assert_eq!((still.width(), still.height()), (16, 16));
    }

    #[test]
    fn test_encode_rejects_grayscale_layout() {
        let frame = Frame::new(vec![0; 8 * 8], 8, 8, 1, 0).unwrap();
        assert!(StillImage::encode(&frame).is_err());
    }

    #[test]
    fn test_save_writes_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("captures").join("face.jpg");
        let still = StillImage::encode(&Frame::filled(8, 8, [1, 2, 3], 0)).unwrap();

        still.save(&path).unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), still.jpeg());
    }
}
