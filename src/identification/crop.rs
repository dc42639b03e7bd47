//! The built-in face-crop graph: a transformation maker feeding a
//! spatial transform, assembled programmatically.

use crate::error::Result;
use crate::image::{ImageBuffer, ImageData};
use crate::net::{Blob, Graph, HyperParams, SampleKind};
use crate::types::Point;

/// Canonical landmark positions (left eye, right eye, nose, left and
/// right mouth corners) in the 256x256 reference frame.
const STD_POINTS: [f32; 10] = [
    89.3095, 72.9025, //
    169.3095, 72.9025, //
    127.8949, 127.0441, //
    96.8796, 184.8907, //
    159.1065, 184.7601, //
];

/// Aligns a face to the canonical frame by a least-squares similarity
/// transform derived from its five landmarks.
pub struct FaceCrop {
    graph: Graph,
    crop_height: usize,
    crop_width: usize,
}

impl FaceCrop {
    /// Bicubic resampling by default.
    pub fn new(crop_height: usize, crop_width: usize) -> Result<Self> {
        Self::with_sampling(crop_height, crop_width, SampleKind::Bicubic)
    }

    pub fn with_sampling(
        crop_height: usize,
        crop_width: usize,
        kind: SampleKind,
    ) -> Result<Self> {
        let mut graph = Graph::with_common_root(2, 1);

        let mut std_points = STD_POINTS;
        for p in std_points.chunks_mut(2) {
            p[0] *= crop_height as f32 / 256.0;
            p[1] *= crop_width as f32 / 256.0;
        }

        let mut tform_hyper = HyperParams::new();
        tform_hyper.insert_int("points_num", 5);
        let std_blob = Blob::from_data(1, 5, 2, 1, std_points.to_vec())?;
        let tform = graph.add_subnet(0, "TransformationMaker", tform_hyper, vec![std_blob])?;

        let mut align_hyper = HyperParams::new();
        align_hyper.insert_int("new_height", crop_height as i32);
        align_hyper.insert_int("new_width", crop_width as i32);
        align_hyper.insert_str(
            "type",
            match kind {
                SampleKind::Linear => "linear",
                SampleKind::Bicubic => "bicubic",
            },
        );
        // The image input arrives as interleaved bytes, not planar floats.
        align_hyper.insert_int("is_mat_data", 1);
        let align = graph.add_subnet(0, "SpatialTransform", align_hyper, Vec::new())?;

        graph.wire_input(0, 0, tform, 0);
        graph.wire_input(0, 1, align, 0);
        graph.wire_across(0, tform, 0, align, 1);
        graph.wire_output(0, 0, align, 0);

        Ok(Self {
            graph,
            crop_height,
            crop_width,
        })
    }

    pub fn crop_height(&self) -> usize {
        self.crop_height
    }

    pub fn crop_width(&self) -> usize {
        self.crop_width
    }

    /// Run the alignment graph; the result is a planar
    /// `(1, c, crop_h, crop_w)` blob.
    pub fn align(&mut self, image: &ImageData<'_>, landmarks: &[Point; 5]) -> Result<Blob> {
        let (h, w, c) = (
            image.height() as usize,
            image.width() as usize,
            image.num_channels() as usize,
        );
        // The declared shape is planar but the data stays interleaved;
        // the spatial transform reads it in mat layout.
        let image_blob = Blob::from_bytes(1, c, h, w, image.data());

        let mut points = Vec::with_capacity(10);
        for p in landmarks {
            points.push(p.x);
            points.push(p.y);
        }
        let point_blob = Blob::from_data(1, 5, 2, 1, points)?;

        self.graph.set_input(0, point_blob)?;
        self.graph.set_input(1, image_blob)?;
        self.graph.execute()?;
        self.graph.take_output(0)
    }

    /// Align and convert back to an interleaved byte image.
    pub fn crop(&mut self, image: &ImageData<'_>, landmarks: &[Point; 5]) -> Result<ImageBuffer> {
        let mut blob = self.align(image, landmarks)?;
        blob.permute([0, 2, 3, 1]);

        let mut out = ImageBuffer::new(
            self.crop_width as u32,
            self.crop_height as u32,
            image.num_channels(),
        );
        blob.copy_to_bytes(&mut out.data);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical_landmarks() -> [Point; 5] {
        let mut pts = [Point::zero(); 5];
        for (i, p) in pts.iter_mut().enumerate() {
            p.x = STD_POINTS[i * 2];
            p.y = STD_POINTS[i * 2 + 1];
        }
        pts
    }

    #[test]
    fn canonical_landmarks_reproduce_the_image() {
        // Landmarks already at the reference points: the similarity
        // transform is the identity and the crop returns the image
        // unmoved (within a pixel).
        let mut crop = FaceCrop::with_sampling(256, 256, SampleKind::Linear).unwrap();
        let mut pixels = vec![0u8; 256 * 256];
        for y in 0..256usize {
            for x in 0..256usize {
                pixels[y * 256 + x] = ((x + y) / 2) as u8;
            }
        }
        let image = ImageData::gray(&pixels, 256, 256).unwrap();
        let out = crop.crop(&image, &canonical_landmarks()).unwrap();

        assert_eq!(out.width, 256);
        assert_eq!(out.height, 256);
        let mut max_diff = 0i32;
        for y in 1..255usize {
            for x in 1..255usize {
                let diff =
                    (i32::from(out.data[y * 256 + x]) - i32::from(pixels[y * 256 + x])).abs();
                max_diff = max_diff.max(diff);
            }
        }
        assert!(max_diff <= 1, "max diff {}", max_diff);
    }

    #[test]
    fn half_size_crop_scales_reference_points() {
        let crop = FaceCrop::new(128, 128).unwrap();
        assert_eq!(crop.crop_height(), 128);
        assert_eq!(crop.crop_width(), 128);
    }
}
