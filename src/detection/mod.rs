//! Face detection: a funnel-structured cascade of LAB-boosted and
//! SURF-MLP classifiers evaluated over a sliding-window image pyramid.

mod fust;
mod lab_boosted;
mod lab_featmap;
mod model;
mod nms;
mod surf_featmap;
mod surf_mlp;

pub use nms::non_maximum_suppression;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};
use crate::image::ImageData;
use crate::pyramid::ImagePyramid;
use crate::reader::BinReader;
use crate::types::FaceInfo;
use fust::FuStDetector;
use model::CascadeModel;

/// Face detector over grayscale images.
///
/// # Usage
///
/// ```no_run
/// use veriface::{Detector, ImageData};
///
/// let mut detector = Detector::from_file("seeta_fd_frontal_v1.0.bin").unwrap();
/// detector.set_min_face_size(40).unwrap();
///
/// let (width, height) = (640u32, 480u32);
/// let pixels = vec![0u8; (width * height) as usize];
/// let image = ImageData::gray(&pixels, width, height).unwrap();
/// let faces = detector.detect(&image).unwrap();
/// println!("found {} faces", faces.len());
/// ```
pub struct Detector {
    detector: FuStDetector,
    pyramid: ImagePyramid,
    min_face_size: u32,
    max_face_size: Option<u32>,
    scale_step: f32,
    score_thresh: f64,
}

impl Detector {
    /// Parse a cascade model from bytes.
    pub fn new(model_bytes: &[u8]) -> Result<Self> {
        let mut reader = BinReader::new(model_bytes);
        let model = CascadeModel::read(&mut reader)?;
        Self::with_model(model)
    }

    /// Load a cascade model from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BinReader::new(BufReader::new(file));
        let model = CascadeModel::read(&mut reader)?;
        Self::with_model(model)
    }

    fn with_model(model: CascadeModel) -> Result<Self> {
        let detector = FuStDetector::new(model);
        detector.check_feature_ids()?;
        Ok(Self {
            detector,
            pyramid: ImagePyramid::new(),
            min_face_size: 20,
            max_face_size: None,
            scale_step: 0.8,
            score_thresh: 3.85,
        })
    }

    /// Smallest face to look for; constrained to at least 20 pixels.
    pub fn set_min_face_size(&mut self, size: u32) -> Result<()> {
        if size < 20 {
            return Err(Error::InvalidArgument(format!(
                "min face size must be at least 20, got {}",
                size
            )));
        }
        self.min_face_size = size;
        Ok(())
    }

    /// Largest face to look for; the effective maximum is also capped by
    /// the image dimensions.
    pub fn set_max_face_size(&mut self, size: u32) -> Result<()> {
        if size == 0 {
            return Err(Error::InvalidArgument("max face size must be positive".into()));
        }
        self.max_face_size = Some(size);
        Ok(())
    }

    /// Factor between adjacent pyramid scales, strictly inside (0, 1).
    pub fn set_pyramid_scale_factor(&mut self, factor: f32) -> Result<()> {
        if !(factor > 0.0 && factor < 1.0) {
            return Err(Error::InvalidArgument(format!(
                "pyramid scale factor must lie in (0, 1), got {}",
                factor
            )));
        }
        self.scale_step = factor;
        Ok(())
    }

    /// Sliding-window step in pixels along each axis.
    pub fn set_window_step(&mut self, step_x: u32, step_y: u32) -> Result<()> {
        if step_x == 0 || step_y == 0 {
            return Err(Error::InvalidArgument("window steps must be positive".into()));
        }
        self.detector.set_slide_window_step(step_x, step_y);
        Ok(())
    }

    /// Detections scoring below this threshold are dropped.
    pub fn set_score_thresh(&mut self, thresh: f64) -> Result<()> {
        if thresh <= 0.0 {
            return Err(Error::InvalidArgument(format!(
                "score threshold must be positive, got {}",
                thresh
            )));
        }
        self.score_thresh = thresh;
        Ok(())
    }

    /// Detect faces on a grayscale image. Returns boxes in input-image
    /// coordinates ordered by descending confidence. Images smaller than
    /// the detection window yield an empty list.
    pub fn detect(&mut self, image: &ImageData<'_>) -> Result<Vec<FaceInfo>> {
        if image.num_channels() != 1 {
            return Err(Error::InvalidArgument(format!(
                "detection expects a grayscale image, got {} channels",
                image.num_channels()
            )));
        }
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let mut min_img_size = image.width().min(image.height());
        if let Some(max_face) = self.max_face_size {
            min_img_size = min_img_size.min(max_face);
        }

        let wnd_size = self.detector.wnd_size() as f32;
        self.pyramid
            .set_image_1x(image.data(), image.width(), image.height());
        self.pyramid.set_max_scale(wnd_size / self.min_face_size as f32);
        self.pyramid.set_min_scale(wnd_size / min_img_size as f32);
        self.pyramid.set_scale_step(self.scale_step);

        let faces = self.detector.detect(&mut self.pyramid);
        debug!(
            "cascade produced {} candidates before score filtering",
            faces.len()
        );
        Ok(faces
            .into_iter()
            .filter(|f| f.score >= self.score_thresh)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_detector() -> Detector {
        let mut buf = Vec::new();
        model::tests::write_tiny_cascade(&mut buf, -1.0, 0.0);
        Detector::new(&buf).unwrap()
    }

    #[test]
    fn all_zero_image_has_no_faces() {
        let mut detector = tiny_detector();
        let pixels = vec![0u8; 320 * 240];
        let image = ImageData::gray(&pixels, 320, 240).unwrap();
        assert!(detector.detect(&image).unwrap().is_empty());
    }

    #[test]
    fn flat_small_image_has_no_faces() {
        let mut detector = tiny_detector();
        detector.set_min_face_size(40).unwrap();
        let pixels = vec![128u8; 40 * 40];
        let image = ImageData::gray(&pixels, 40, 40).unwrap();
        assert!(detector.detect(&image).unwrap().is_empty());
    }

    #[test]
    fn image_below_window_yields_empty() {
        let mut detector = tiny_detector();
        let pixels = vec![10u8; 16 * 16];
        let image = ImageData::gray(&pixels, 16, 16).unwrap();
        assert!(detector.detect(&image).unwrap().is_empty());
    }

    #[test]
    fn color_image_is_rejected() {
        let mut detector = tiny_detector();
        let pixels = vec![10u8; 32 * 32 * 3];
        let image = ImageData::with_channels(&pixels, 32, 32, 3).unwrap();
        assert!(matches!(
            detector.detect(&image),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn setters_validate_their_arguments() {
        let mut detector = tiny_detector();
        assert!(detector.set_min_face_size(19).is_err());
        assert!(detector.set_min_face_size(20).is_ok());
        assert!(detector.set_pyramid_scale_factor(1.0).is_err());
        assert!(detector.set_pyramid_scale_factor(0.0).is_err());
        assert!(detector.set_pyramid_scale_factor(0.8).is_ok());
        assert!(detector.set_window_step(0, 4).is_err());
        assert!(detector.set_window_step(4, 4).is_ok());
        assert!(detector.set_score_thresh(-1.0).is_err());
        assert!(detector.set_score_thresh(2.0).is_ok());
        assert!(detector.set_max_face_size(0).is_err());
        assert!(detector.set_max_face_size(200).is_ok());
    }
}
