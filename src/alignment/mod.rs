//! Facial landmark alignment: locates the five points (eye centers, nose
//! tip, mouth corners) inside a detected face box.

mod cfan;
mod sift;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::{Error, Result};
use crate::image::ImageData;
use crate::reader::BinReader;
use crate::types::{FaceInfo, Point};
use cfan::Cfan;

/// Landmark locator backed by a coarse-to-fine stacked-autoencoder model.
///
/// # Usage
///
/// ```no_run
/// use veriface::{Aligner, Detector, ImageData};
///
/// let mut detector = Detector::from_file("seeta_fd_frontal_v1.0.bin").unwrap();
/// let aligner = Aligner::from_file("seeta_fa_v1.1.bin").unwrap();
///
/// let (width, height) = (640u32, 480u32);
/// let pixels = vec![0u8; (width * height) as usize];
/// let image = ImageData::gray(&pixels, width, height).unwrap();
/// for face in detector.detect(&image).unwrap() {
///     let landmarks = aligner.detect_landmarks(&image, &face).unwrap();
///     println!("left eye at ({}, {})", landmarks[0].x, landmarks[0].y);
/// }
/// ```
pub struct Aligner {
    cfan: Cfan,
}

impl Aligner {
    /// Parse a landmark model from bytes.
    pub fn new(model_bytes: &[u8]) -> Result<Self> {
        let mut reader = BinReader::new(model_bytes);
        Ok(Self {
            cfan: Cfan::read(&mut reader)?,
        })
    }

    /// Load a landmark model from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BinReader::new(BufReader::new(file));
        Ok(Self {
            cfan: Cfan::read(&mut reader)?,
        })
    }

    /// Locate the five facial landmarks for a detected face, in the order
    /// left eye, right eye, nose tip, left mouth corner, right mouth
    /// corner, in input-image coordinates.
    pub fn detect_landmarks(&self, image: &ImageData<'_>, face: &FaceInfo) -> Result<[Point; 5]> {
        if image.num_channels() != 1 {
            return Err(Error::InvalidArgument(format!(
                "landmark alignment expects a grayscale image, got {} channels",
                image.num_channels()
            )));
        }

        let loc = self.cfan.facial_point_locate(
            image.data(),
            image.width() as usize,
            image.height() as usize,
            face.bbox,
        );

        let mut points = [Point::zero(); 5];
        for (i, p) in points.iter_mut().enumerate() {
            p.x = loc[i * 2];
            p.y = loc[i * 2 + 1];
        }
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rect;

    fn aligner() -> Aligner {
        let mut buf = Vec::new();
        cfan::tests::write_identity_model(&mut buf);
        Aligner::new(&buf).unwrap()
    }

    #[test]
    fn landmarks_fall_inside_the_extended_face_region() {
        let aligner = aligner();
        let pixels: Vec<u8> = (0..100 * 100).map(|i| (i % 256) as u8).collect();
        let image = ImageData::gray(&pixels, 100, 100).unwrap();
        let mut face = FaceInfo::new();
        face.bbox = Rect::new(10, 10, 80, 80);

        let landmarks = aligner.detect_landmarks(&image, &face).unwrap();
        for p in &landmarks {
            assert!(p.x >= 10.0 - 4.0 && p.x <= 89.0 + 4.0);
            assert!(p.y >= 10.0 && p.y <= 89.0 + 8.0);
        }
        // Eyes above the mouth.
        assert!(landmarks[0].y < landmarks[3].y);
        assert!(landmarks[1].y < landmarks[4].y);
    }

    #[test]
    fn color_image_is_rejected() {
        let aligner = aligner();
        let pixels = vec![0u8; 100 * 100 * 3];
        let image = ImageData::with_channels(&pixels, 100, 100, 3).unwrap();
        let face = FaceInfo::new();
        assert!(matches!(
            aligner.detect_landmarks(&image, &face),
            Err(Error::InvalidArgument(_))
        ));
    }
}
