//! Lazy image pyramid over a base grayscale image.

use crate::image::resize_image;

/// One level of the pyramid, borrowed from the pyramid's reusable buffer.
#[derive(Debug, Clone, Copy)]
pub struct ScaledImage<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub scale: f32,
}

/// Enumerates scaled versions of a base image, from `max_scale` down to
/// `min_scale`, multiplying by `scale_step` each step. A single scaled
/// buffer is reused across levels.
pub struct ImagePyramid {
    max_scale: f32,
    min_scale: f32,
    scale_factor: f32,
    scale_step: f32,

    width1x: u32,
    height1x: u32,

    buf_img: Vec<u8>,
    buf_img_scaled: Vec<u8>,
}

impl ImagePyramid {
    pub fn new() -> Self {
        Self {
            max_scale: 1.0,
            min_scale: 1.0,
            scale_factor: 1.0,
            scale_step: 0.8,
            width1x: 0,
            height1x: 0,
            buf_img: Vec::new(),
            buf_img_scaled: Vec::new(),
        }
    }

    /// Valid steps lie in (0, 1]; anything else is ignored.
    pub fn set_scale_step(&mut self, step: f32) {
        if step > 0.0 && step <= 1.0 {
            self.scale_step = step;
        }
    }

    pub fn set_min_scale(&mut self, min_scale: f32) {
        self.min_scale = min_scale;
    }

    pub fn set_max_scale(&mut self, max_scale: f32) {
        self.max_scale = max_scale;
        self.scale_factor = max_scale;
        self.update_buf_scaled();
    }

    pub fn min_scale(&self) -> f32 {
        self.min_scale
    }

    pub fn max_scale(&self) -> f32 {
        self.max_scale
    }

    /// Copy the base image in and rewind enumeration to `max_scale`.
    pub fn set_image_1x(&mut self, data: &[u8], width: u32, height: u32) {
        self.width1x = width;
        self.height1x = height;
        self.buf_img.clear();
        self.buf_img.extend_from_slice(data);
        self.scale_factor = self.max_scale;
        self.update_buf_scaled();
    }

    /// The unscaled base image.
    pub fn image_1x(&self) -> (&[u8], u32, u32) {
        (&self.buf_img, self.width1x, self.height1x)
    }

    /// Produce the next pyramid level, or `None` once the current scale
    /// falls below `min_scale`. Dimensions are `floor(W*s) x floor(H*s)`.
    pub fn next_scale(&mut self) -> Option<ScaledImage<'_>> {
        if self.scale_factor < self.min_scale {
            return None;
        }
        let scale = self.scale_factor;
        let width_scaled = (self.width1x as f32 * scale) as u32;
        let height_scaled = (self.height1x as f32 * scale) as u32;
        if width_scaled == 0 || height_scaled == 0 {
            return None;
        }

        let len = width_scaled as usize * height_scaled as usize;
        if self.buf_img_scaled.len() < len {
            self.buf_img_scaled.resize(len, 0);
        }
        resize_image(
            &self.buf_img,
            self.width1x,
            self.height1x,
            &mut self.buf_img_scaled,
            width_scaled,
            height_scaled,
        );
        self.scale_factor *= self.scale_step;

        Some(ScaledImage {
            data: &self.buf_img_scaled[..len],
            width: width_scaled,
            height: height_scaled,
            scale,
        })
    }

    fn update_buf_scaled(&mut self) {
        if self.width1x == 0 || self.height1x == 0 {
            return;
        }
        let max_width = (self.width1x as f32 * self.max_scale + 0.5) as usize;
        let max_height = (self.height1x as f32 * self.max_scale + 0.5) as usize;
        if self.buf_img_scaled.len() < max_width * max_height {
            self.buf_img_scaled.resize(max_width * max_height, 0);
        }
    }
}

impl Default for ImagePyramid {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_scale_when_min_equals_max() {
        let mut pyramid = ImagePyramid::new();
        pyramid.set_max_scale(1.0);
        pyramid.set_min_scale(1.0);
        pyramid.set_scale_step(0.8);
        let img = vec![128u8; 40 * 40];
        pyramid.set_image_1x(&img, 40, 40);

        let first = pyramid.next_scale().expect("one scale");
        assert_eq!(first.width, 40);
        assert_eq!(first.height, 40);
        assert!((first.scale - 1.0).abs() < 1e-6);
        drop(first);
        assert!(pyramid.next_scale().is_none());
    }

    #[test]
    fn scales_are_strictly_decreasing_and_bounded() {
        let mut pyramid = ImagePyramid::new();
        pyramid.set_max_scale(1.0);
        pyramid.set_min_scale(0.2);
        pyramid.set_scale_step(0.5);
        let img = vec![0u8; 100 * 100];
        pyramid.set_image_1x(&img, 100, 100);

        let mut scales = Vec::new();
        while let Some(level) = pyramid.next_scale() {
            scales.push(level.scale);
        }
        // 1.0, 0.5, 0.25; next would be 0.125 < 0.2.
        assert_eq!(scales.len(), 3);
        for pair in scales.windows(2) {
            assert!(pair[1] < pair[0]);
        }
        for s in &scales {
            assert!(*s >= 0.2 && *s <= 1.0);
        }
    }

    #[test]
    fn level_dimensions_are_floored() {
        let mut pyramid = ImagePyramid::new();
        pyramid.set_max_scale(1.0);
        pyramid.set_min_scale(0.7);
        pyramid.set_scale_step(0.7);
        let img = vec![0u8; 99 * 55];
        pyramid.set_image_1x(&img, 99, 55);

        let first = pyramid.next_scale().unwrap();
        assert_eq!((first.width, first.height), (99, 55));
        drop(first);
        let second = pyramid.next_scale().unwrap();
        assert_eq!(second.width, (99.0f32 * 0.7) as u32);
        assert_eq!(second.height, (55.0f32 * 0.7) as u32);
    }

    #[test]
    fn rewind_on_new_image() {
        let mut pyramid = ImagePyramid::new();
        pyramid.set_max_scale(1.0);
        pyramid.set_min_scale(1.0);
        let img = vec![1u8; 16];
        pyramid.set_image_1x(&img, 4, 4);
        assert!(pyramid.next_scale().is_some());
        assert!(pyramid.next_scale().is_none());

        pyramid.set_image_1x(&img, 4, 4);
        assert!(pyramid.next_scale().is_some());
    }
}
