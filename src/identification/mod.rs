//! Face identification: crops a face to the canonical frame and runs the
//! identification graph to produce an identity embedding.

mod crop;

pub use crop::FaceCrop;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::info;

use crate::error::{Error, Result};
use crate::image::{ImageBuffer, ImageData};
use crate::net::{Blob, Graph, SampleKind};
use crate::reader::BinReader;
use crate::types::Point;

/// Identity-embedding extractor.
///
/// The model file starts with `crop_channels, crop_height, crop_width,
/// feature_size` followed by the serialized network graph. A cropper
/// built without a model can still align faces but not embed them.
///
/// # Usage
///
/// ```no_run
/// use veriface::{Identifier, ImageData, Point};
///
/// let mut identifier = Identifier::from_file("seeta_fr_v1.0.bin").unwrap();
/// let (width, height) = (640u32, 480u32);
/// let pixels = vec![0u8; (width * height * 3) as usize];
/// let image = ImageData::with_channels(&pixels, width, height, 3).unwrap();
/// let landmarks = [Point::zero(); 5]; // from the aligner
/// let feat = identifier.extract_with_crop(&image, &landmarks).unwrap();
/// let score = identifier.similarity(&feat, &feat, None);
/// assert!((score - 1.0).abs() < 1e-5);
/// ```
pub struct Identifier {
    graph: Option<Graph>,
    cropper: FaceCrop,
    crop_channels: usize,
    crop_height: usize,
    crop_width: usize,
    feature_size: usize,
}

impl Identifier {
    /// Parse an identification model from bytes.
    pub fn new(model_bytes: &[u8]) -> Result<Self> {
        Self::read(&mut BinReader::new(model_bytes))
    }

    /// Load an identification model from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::read(&mut BinReader::new(BufReader::new(file)))
    }

    fn read<R: std::io::Read>(reader: &mut BinReader<R>) -> Result<Self> {
        let crop_channels = reader.read_count("crop channel count")?;
        let crop_height = reader.read_count("crop height")?;
        let crop_width = reader.read_count("crop width")?;
        let feature_size = reader.read_count("feature size")?;
        let graph = Graph::load(reader)?;
        info!(
            "loaded identification model: {}x{}x{} crop, {}-D feature",
            crop_height, crop_width, crop_channels, feature_size
        );

        Ok(Self {
            graph: Some(graph),
            cropper: FaceCrop::with_sampling(crop_height, crop_width, SampleKind::Linear)?,
            crop_channels,
            crop_height,
            crop_width,
            feature_size,
        })
    }

    /// A crop-only instance: alignment works, extraction returns
    /// `InvalidState`.
    pub fn without_model() -> Result<Self> {
        Ok(Self {
            graph: None,
            cropper: FaceCrop::with_sampling(256, 256, SampleKind::Linear)?,
            crop_channels: 3,
            crop_height: 256,
            crop_width: 256,
            feature_size: 0,
        })
    }

    pub fn crop_width(&self) -> usize {
        self.crop_width
    }

    pub fn crop_height(&self) -> usize {
        self.crop_height
    }

    pub fn crop_channels(&self) -> usize {
        self.crop_channels
    }

    pub fn feature_size(&self) -> usize {
        self.feature_size
    }

    /// Align the face to the canonical frame and return the cropped
    /// interleaved image.
    pub fn crop_face(
        &mut self,
        image: &ImageData<'_>,
        landmarks: &[Point; 5],
    ) -> Result<ImageBuffer> {
        self.cropper.crop(image, landmarks)
    }

    /// Extract the embedding from an already-cropped face image.
    pub fn extract(&mut self, cropped: &ImageData<'_>) -> Result<Vec<f32>> {
        if cropped.width() as usize != self.crop_width
            || cropped.height() as usize != self.crop_height
            || cropped.num_channels() as usize != self.crop_channels
        {
            return Err(Error::InvalidArgument(format!(
                "cropped face must be {}x{}x{}, got {}x{}x{}",
                self.crop_height,
                self.crop_width,
                self.crop_channels,
                cropped.height(),
                cropped.width(),
                cropped.num_channels()
            )));
        }

        let mut blob = Blob::from_bytes(
            1,
            self.crop_height,
            self.crop_width,
            self.crop_channels,
            cropped.data(),
        );
        blob.permute([0, 3, 1, 2]);
        self.run_graph(blob)
    }

    /// Align the face and extract its embedding in one call.
    pub fn extract_with_crop(
        &mut self,
        image: &ImageData<'_>,
        landmarks: &[Point; 5],
    ) -> Result<Vec<f32>> {
        let blob = self.cropper.align(image, landmarks)?;
        self.run_graph(blob)
    }

    fn run_graph(&mut self, input: Blob) -> Result<Vec<f32>> {
        let graph = self
            .graph
            .as_mut()
            .ok_or_else(|| Error::InvalidState("no identification model loaded".into()))?;
        graph.set_input(0, input)?;
        graph.execute()?;
        let output = graph.take_output(0)?;
        if output.count() != self.feature_size {
            return Err(Error::InvalidModel(format!(
                "model produced a {}-D feature, header says {}",
                output.count(),
                self.feature_size
            )));
        }
        Ok(output.to_vec())
    }

    /// Cosine similarity over the first `dim` components (the full
    /// feature by default). Zero vectors compare as 0.
    pub fn similarity(&self, fc1: &[f32], fc2: &[f32], dim: Option<usize>) -> f32 {
        let default_dim = if self.feature_size > 0 {
            self.feature_size
        } else {
            fc1.len()
        };
        let dim = dim.unwrap_or(default_dim).min(fc1.len()).min(fc2.len());

        let mut dot = 0.0f64;
        let mut norm1 = 0.0f64;
        let mut norm2 = 0.0f64;
        for i in 0..dim {
            dot += f64::from(fc1[i]) * f64::from(fc2[i]);
            norm1 += f64::from(fc1[i]) * f64::from(fc1[i]);
            norm2 += f64::from(fc2[i]) * f64::from(fc2[i]);
        }
        if norm1 == 0.0 || norm2 == 0.0 {
            return 0.0;
        }
        (dot / (norm1.sqrt() * norm2.sqrt())) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similarity_is_cosine() {
        let identifier = Identifier::without_model().unwrap();

        let mut a = vec![0.0f32; 2048];
        a[0] = 1.0;
        assert!((identifier.similarity(&a, &a, None) - 1.0).abs() < 1e-6);

        let mut b = vec![0.0f32; 2048];
        b[0] = -1.0;
        assert!((identifier.similarity(&a, &b, None) + 1.0).abs() < 1e-6);

        let zero = vec![0.0f32; 2048];
        assert_eq!(identifier.similarity(&a, &zero, None), 0.0);
    }

    #[test]
    fn similarity_respects_dim() {
        let identifier = Identifier::without_model().unwrap();
        // Orthogonal over the first component, identical on the second.
        let a = [1.0f32, 5.0];
        let b = [0.0f32, 5.0];
        assert_eq!(identifier.similarity(&a, &b, Some(1)), 0.0);
        assert!(identifier.similarity(&a, &b, Some(2)) > 0.9);
    }

    #[test]
    fn extract_without_model_is_invalid_state() {
        let mut identifier = Identifier::without_model().unwrap();
        let pixels = vec![0u8; 256 * 256 * 3];
        let image = ImageData::with_channels(&pixels, 256, 256, 3).unwrap();
        assert!(matches!(
            identifier.extract(&image),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn extract_validates_crop_dimensions() {
        let mut identifier = Identifier::without_model().unwrap();
        let pixels = vec![0u8; 64 * 64 * 3];
        let image = ImageData::with_channels(&pixels, 64, 64, 3).unwrap();
        assert!(matches!(
            identifier.extract(&image),
            Err(Error::InvalidArgument(_))
        ));
    }
}
