//! Locally Assembled Binary (LAB) feature map.
//!
//! Every pixel that has room for the full 3x3 grid of 3x3 rectangles gets
//! an 8-bit code: one bit per surrounding rectangle, set when the center
//! rectangle sum is greater than or equal to the neighbor sum.

use crate::math;
use crate::types::Rect;

const RECT_WIDTH: usize = 3;
const RECT_HEIGHT: usize = 3;
const NUM_RECT: usize = 3;

pub struct LabFeatureMap {
    width: usize,
    height: usize,
    roi: Rect,

    feat_map: Vec<u8>,
    rect_sum: Vec<i32>,
    int_img: Vec<i32>,
    square_int_img: Vec<u32>,
}

impl LabFeatureMap {
    pub fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            roi: Rect::new(0, 0, 0, 0),
            feat_map: Vec::new(),
            rect_sum: Vec::new(),
            int_img: Vec::new(),
            square_int_img: Vec::new(),
        }
    }

    pub fn compute(&mut self, input: &[u8], width: u32, height: u32) {
        if input.is_empty() || width == 0 || height == 0 {
            return;
        }
        self.reshape(width as usize, height as usize);
        self.compute_integral_images(input);
        self.compute_rect_sum();
        self.compute_feature_map();
    }

    pub fn set_roi(&mut self, roi: Rect) {
        self.roi = roi;
    }

    /// LAB code at the given offset inside the current ROI.
    #[inline]
    pub fn feature_val(&self, offset_x: i32, offset_y: i32) -> u8 {
        let x = (self.roi.x + offset_x) as usize;
        let y = (self.roi.y + offset_y) as usize;
        self.feat_map[y * self.width + x]
    }

    /// Standard deviation of pixel values over the current ROI, from the
    /// value and squared-value integrals.
    pub fn std_dev(&self) -> f32 {
        let x = self.roi.x as usize;
        let y = self.roi.y as usize;
        let w = self.roi.width as usize;
        let h = self.roi.height as usize;
        let area = (w * h) as f64;

        let sum = self.corner_sum_i32(x, y, w, h);
        let sq_sum = self.corner_sum_u32(x, y, w, h);

        let mean = sum as f64 / area;
        let m2 = sq_sum as f64 / area;
        ((m2 - mean * mean).max(0.0)).sqrt() as f32
    }

    fn reshape(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        let len = width * height;
        self.feat_map.resize(len, 0);
        self.rect_sum.resize(len, 0);
        self.int_img.resize(len, 0);
        self.square_int_img.resize(len, 0);
    }

    fn compute_integral_images(&mut self, input: &[u8]) {
        let len = self.width * self.height;
        math::u8_to_i32(input, &mut self.int_img[..len]);
        math::square(&self.int_img[..len], &mut self.square_int_img[..len]);
        integral_i32(&mut self.int_img, self.width, self.height);
        integral_u32(&mut self.square_int_img, self.width, self.height);
    }

    /// Sum of the `RECT_WIDTH x RECT_HEIGHT` block with top-left (c, r),
    /// for every position where it fits.
    fn compute_rect_sum(&mut self) {
        let w = self.width;
        if w < RECT_WIDTH || self.height < RECT_HEIGHT {
            return;
        }
        for r in 0..=(self.height - RECT_HEIGHT) {
            for c in 0..=(w - RECT_WIDTH) {
                let sum = self.corner_sum_i32(c, r, RECT_WIDTH, RECT_HEIGHT);
                self.rect_sum[r * w + c] = sum;
            }
        }
    }

    fn compute_feature_map(&mut self) {
        let w = self.width;
        let span = RECT_WIDTH * NUM_RECT;
        if w < span || self.height < span {
            return;
        }
        let offset = w * RECT_HEIGHT;
        for r in 0..=(self.height - span) {
            for c in 0..=(w - span) {
                let center = self.rect_sum[(r + RECT_HEIGHT) * w + c + RECT_WIDTH];
                let mut code = 0u8;

                let mut idx = r * w + c;
                code |= if center >= self.rect_sum[idx] { 0x80 } else { 0 };
                idx += RECT_WIDTH;
                code |= if center >= self.rect_sum[idx] { 0x40 } else { 0 };
                idx += RECT_WIDTH;
                code |= if center >= self.rect_sum[idx] { 0x20 } else { 0 };
                idx += offset;
                code |= if center >= self.rect_sum[idx] { 0x08 } else { 0 };
                idx += offset;
                code |= if center >= self.rect_sum[idx] { 0x01 } else { 0 };
                idx -= RECT_WIDTH;
                code |= if center >= self.rect_sum[idx] { 0x02 } else { 0 };
                idx -= RECT_WIDTH;
                code |= if center >= self.rect_sum[idx] { 0x04 } else { 0 };
                idx -= offset;
                code |= if center >= self.rect_sum[idx] { 0x10 } else { 0 };

                self.feat_map[r * w + c] = code;
            }
        }
    }

    fn corner_sum_i32(&self, x: usize, y: usize, w: usize, h: usize) -> i32 {
        let img = &self.int_img;
        let stride = self.width;
        let br = img[(y + h - 1) * stride + x + w - 1];
        let bl = if x > 0 { img[(y + h - 1) * stride + x - 1] } else { 0 };
        let tr = if y > 0 { img[(y - 1) * stride + x + w - 1] } else { 0 };
        let tl = if x > 0 && y > 0 { img[(y - 1) * stride + x - 1] } else { 0 };
        br.wrapping_sub(bl).wrapping_sub(tr).wrapping_add(tl)
    }

    fn corner_sum_u32(&self, x: usize, y: usize, w: usize, h: usize) -> u32 {
        let img = &self.square_int_img;
        let stride = self.width;
        let br = img[(y + h - 1) * stride + x + w - 1];
        let bl = if x > 0 { img[(y + h - 1) * stride + x - 1] } else { 0 };
        let tr = if y > 0 { img[(y - 1) * stride + x + w - 1] } else { 0 };
        let tl = if x > 0 && y > 0 { img[(y - 1) * stride + x - 1] } else { 0 };
        br.wrapping_sub(bl).wrapping_sub(tr).wrapping_add(tl)
    }
}

impl Default for LabFeatureMap {
    fn default() -> Self {
        Self::new()
    }
}

/// In-place 2-D prefix sum.
fn integral_i32(data: &mut [i32], width: usize, height: usize) {
    for c in 1..width {
        data[c] = data[c].wrapping_add(data[c - 1]);
    }
    for r in 1..height {
        let mut row_sum = 0i32;
        for c in 0..width {
            row_sum = row_sum.wrapping_add(data[r * width + c]);
            data[r * width + c] = data[(r - 1) * width + c].wrapping_add(row_sum);
        }
    }
}

fn integral_u32(data: &mut [u32], width: usize, height: usize) {
    for c in 1..width {
        data[c] = data[c].wrapping_add(data[c - 1]);
    }
    for r in 1..height {
        let mut row_sum = 0u32;
        for c in 0..width {
            row_sum = row_sum.wrapping_add(data[r * width + c]);
            data[r * width + c] = data[(r - 1) * width + c].wrapping_add(row_sum);
        }
    }
}
