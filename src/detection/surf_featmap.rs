//! SURF-style feature map: sign-separated gradient statistics summed over
//! cell grids, read in O(1) from an 8-channel integral image.

use crate::math;
use crate::types::Rect;

const NUM_INT_CHANNEL: usize = 8;

/// A pooled feature: a patch inside the sliding window plus its cell grid.
#[derive(Debug, Clone, Copy)]
pub struct SurfFeature {
    pub patch: Rect,
    pub num_cell_per_row: i32,
    pub num_cell_per_col: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PatchFormat {
    // coprime aspect ratio
    width: i32,
    height: i32,
    // cell partition
    num_cell_per_row: i32,
    num_cell_per_col: i32,
}

/// All candidate patches enumerated over the sample window at construction.
pub struct SurfFeaturePool {
    sample_width: i32,
    sample_height: i32,
    patch_move_step_x: i32,
    patch_move_step_y: i32,
    patch_size_inc_step: i32,
    patch_min_width: i32,
    patch_min_height: i32,

    pool: Vec<SurfFeature>,
    formats: Vec<PatchFormat>,
}

impl SurfFeaturePool {
    pub fn new() -> Self {
        Self {
            sample_width: 40,
            sample_height: 40,
            patch_move_step_x: 16,
            patch_move_step_y: 16,
            patch_size_inc_step: 1,
            patch_min_width: 16,
            patch_min_height: 16,
            pool: Vec::new(),
            formats: Vec::new(),
        }
    }

    pub fn add_patch_format(
        &mut self,
        width: i32,
        height: i32,
        num_cell_per_row: i32,
        num_cell_per_col: i32,
    ) {
        let format = PatchFormat {
            width,
            height,
            num_cell_per_row,
            num_cell_per_col,
        };
        if !self.formats.contains(&format) {
            self.formats.push(format);
        }
    }

    pub fn create(&mut self) {
        if self.sample_height - self.patch_min_height <= self.sample_width - self.patch_min_width {
            for fi in 0..self.formats.len() {
                let format = self.formats[fi];
                let mut h = self.patch_min_height;
                while h <= self.sample_height {
                    if h % format.num_cell_per_col == 0 && h % format.height == 0 {
                        let w = h / format.height * format.width;
                        if w % format.num_cell_per_row == 0
                            && w >= self.patch_min_width
                            && w <= self.sample_width
                        {
                            self.add_all_features(
                                w,
                                h,
                                format.num_cell_per_row,
                                format.num_cell_per_col,
                            );
                        }
                    }
                    h += self.patch_size_inc_step;
                }
            }
        } else {
            for fi in 0..self.formats.len() {
                let format = self.formats[fi];
                let mut w = self.patch_min_width;
                while w <= self.sample_width {
                    if w % format.num_cell_per_row == 0 && w % format.width == 0 {
                        let h = w / format.width * format.height;
                        if h % format.num_cell_per_col == 0
                            && h >= self.patch_min_height
                            && h <= self.sample_height
                        {
                            self.add_all_features(
                                w,
                                h,
                                format.num_cell_per_row,
                                format.num_cell_per_col,
                            );
                        }
                    }
                    w += self.patch_size_inc_step;
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn get(&self, idx: usize) -> &SurfFeature {
        &self.pool[idx]
    }

    fn add_all_features(
        &mut self,
        width: i32,
        height: i32,
        num_cell_per_row: i32,
        num_cell_per_col: i32,
    ) {
        let mut y = 0;
        while y <= self.sample_height - height {
            let mut x = 0;
            while x <= self.sample_width - width {
                self.pool.push(SurfFeature {
                    patch: Rect::new(x, y, width, height),
                    num_cell_per_row,
                    num_cell_per_col,
                });
                x += self.patch_move_step_x;
            }
            y += self.patch_move_step_y;
        }
    }
}

impl Default for SurfFeaturePool {
    fn default() -> Self {
        Self::new()
    }
}

/// Gradient channel layout per pixel before masking:
/// `[gx, |gx|, gx, |gx|, gy, |gy|, gy, |gy|]`. Masking keeps channels
/// 0..1 where `gy >= 0`, channels 2..3 where `gy < 0`, and mirrors the
/// rule with `gx` for channels 4..7. After masking the 8 lanes are summed
/// along rows then columns into one interleaved integral image.
pub struct SurfFeatureMap {
    width: usize,
    height: usize,
    roi: Rect,

    grad_x: Vec<i32>,
    grad_y: Vec<i32>,
    int_img: Vec<i32>,
    img_buf: Vec<i32>,

    feat_vec_buf: Vec<Vec<i32>>,
    feat_vec_normed_buf: Vec<Vec<f32>>,
    buf_valid: Vec<bool>,
    buf_valid_reset: bool,

    feat_pool: SurfFeaturePool,
}

impl SurfFeatureMap {
    pub fn new() -> Self {
        let mut feat_pool = SurfFeaturePool::new();
        feat_pool.add_patch_format(1, 1, 2, 2);
        feat_pool.add_patch_format(1, 2, 2, 2);
        feat_pool.add_patch_format(2, 1, 2, 2);
        feat_pool.add_patch_format(2, 3, 2, 2);
        feat_pool.add_patch_format(3, 2, 2, 2);
        feat_pool.create();

        let pool_size = feat_pool.len();
        let mut feat_vec_buf = Vec::with_capacity(pool_size);
        let mut feat_vec_normed_buf = Vec::with_capacity(pool_size);
        for i in 0..pool_size {
            let feat = feat_pool.get(i);
            let dim =
                (feat.num_cell_per_row * feat.num_cell_per_col) as usize * NUM_INT_CHANNEL;
            feat_vec_buf.push(vec![0i32; dim]);
            feat_vec_normed_buf.push(vec![0f32; dim]);
        }

        Self {
            width: 0,
            height: 0,
            roi: Rect::new(0, 0, 0, 0),
            grad_x: Vec::new(),
            grad_y: Vec::new(),
            int_img: Vec::new(),
            img_buf: Vec::new(),
            feat_vec_buf,
            feat_vec_normed_buf,
            buf_valid: vec![false; pool_size],
            buf_valid_reset: false,
            feat_pool,
        }
    }

    pub fn compute(&mut self, input: &[u8], width: u32, height: u32) {
        if input.is_empty() || width == 0 || height == 0 {
            return;
        }
        self.reshape(width as usize, height as usize);
        self.compute_gradient_images(input);
        self.compute_integral_images();
    }

    pub fn set_roi(&mut self, roi: Rect) {
        self.roi = roi;
        if self.buf_valid_reset {
            for v in self.buf_valid.iter_mut() {
                *v = false;
            }
            self.buf_valid_reset = false;
        }
    }

    pub fn pool_size(&self) -> usize {
        self.feat_pool.len()
    }

    /// The L2-normalized feature vector for the given pool entry, computed
    /// on first access per ROI and cached until the ROI moves.
    pub fn feature_vector(&mut self, feat_id: usize) -> &[f32] {
        if !self.buf_valid[feat_id] {
            let feat = *self.feat_pool.get(feat_id);
            let mut raw = std::mem::take(&mut self.feat_vec_buf[feat_id]);
            self.compute_feature_vector(&feat, &mut raw);
            normalize_l2(&raw, &mut self.feat_vec_normed_buf[feat_id]);
            self.feat_vec_buf[feat_id] = raw;
            self.buf_valid[feat_id] = true;
            self.buf_valid_reset = true;
        }
        &self.feat_vec_normed_buf[feat_id]
    }

    fn reshape(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        let len = width * height;
        self.grad_x.resize(len, 0);
        self.grad_y.resize(len, 0);
        self.int_img.resize(len * NUM_INT_CHANNEL, 0);
        self.img_buf.resize(len, 0);
    }

    fn compute_gradient_images(&mut self, input: &[u8]) {
        let len = self.width * self.height;
        math::u8_to_i32(input, &mut self.img_buf[..len]);
        self.compute_grad_x();
        self.compute_grad_y();
    }

    /// Central differences, doubled forward/backward differences at edges.
    fn compute_grad_x(&mut self) {
        let w = self.width;
        for r in 0..self.height {
            let src = &self.img_buf[r * w..(r + 1) * w];
            let dest = &mut self.grad_x[r * w..(r + 1) * w];
            dest[0] = (src[1] - src[0]) << 1;
            for c in 1..w - 1 {
                dest[c] = src[c + 1] - src[c - 1];
            }
            dest[w - 1] = (src[w - 1] - src[w - 2]) << 1;
        }
    }

    fn compute_grad_y(&mut self) {
        let w = self.width;
        let h = self.height;
        for c in 0..w {
            self.grad_y[c] = (self.img_buf[w + c] - self.img_buf[c]) << 1;
        }
        for r in 1..h - 1 {
            for c in 0..w {
                self.grad_y[r * w + c] = self.img_buf[(r + 1) * w + c] - self.img_buf[(r - 1) * w + c];
            }
        }
        let off = (h - 1) * w;
        for c in 0..w {
            self.grad_y[off + c] = (self.img_buf[off + c] - self.img_buf[off - w + c]) << 1;
        }
    }

    fn compute_integral_images(&mut self) {
        let len = self.width * self.height;

        Self::fill_channel(&self.grad_x, &mut self.int_img, len, 0);
        Self::fill_channel(&self.grad_y, &mut self.int_img, len, 4);

        math::vector_abs(&self.grad_x[..len], &mut self.img_buf[..len]);
        Self::fill_channel(&self.img_buf, &mut self.int_img, len, 1);
        math::vector_abs(&self.grad_y[..len], &mut self.img_buf[..len]);
        Self::fill_channel(&self.img_buf, &mut self.int_img, len, 5);

        self.mask_integral_channel();
        self.integral();
    }

    /// Write `src` into lanes `ch` and `ch + 2` of the interleaved image.
    fn fill_channel(src: &[i32], int_img: &mut [i32], len: usize, ch: usize) {
        for i in 0..len {
            int_img[i * NUM_INT_CHANNEL + ch] = src[i];
            int_img[i * NUM_INT_CHANNEL + ch + 2] = src[i];
        }
    }

    fn mask_integral_channel(&mut self) {
        let len = self.width * self.height;
        for i in 0..len {
            let dx = self.grad_x[i];
            let dy = self.grad_y[i];
            let lanes = &mut self.int_img[i * NUM_INT_CHANNEL..(i + 1) * NUM_INT_CHANNEL];
            if dy < 0 {
                lanes[0] = 0;
                lanes[1] = 0;
            } else {
                lanes[2] = 0;
                lanes[3] = 0;
            }
            if dx < 0 {
                lanes[4] = 0;
                lanes[5] = 0;
            } else {
                lanes[6] = 0;
                lanes[7] = 0;
            }
        }
    }

    /// Cumulative sums along rows, then along columns, lane-wise.
    fn integral(&mut self) {
        let row_len = self.width * NUM_INT_CHANNEL;
        for r in 0..self.height - 1 {
            let (head, tail) = self.int_img.split_at_mut((r + 1) * row_len);
            math::vector_add(&head[r * row_len..], &mut tail[..row_len]);
        }
        for r in 0..self.height {
            let row = &mut self.int_img[r * row_len..(r + 1) * row_len];
            for c in 1..self.width {
                for ch in 0..NUM_INT_CHANNEL {
                    row[c * NUM_INT_CHANNEL + ch] = row[c * NUM_INT_CHANNEL + ch]
                        .wrapping_add(row[(c - 1) * NUM_INT_CHANNEL + ch]);
                }
            }
        }
    }

    /// Per-cell 8-channel sums over the feature patch, read off the
    /// integral image with the four-corner formula.
    fn compute_feature_vector(&self, feat: &SurfFeature, feat_vec: &mut [i32]) {
        let x0 = (self.roi.x + feat.patch.x) as usize;
        let y0 = (self.roi.y + feat.patch.y) as usize;
        let cell_w = (feat.patch.width / feat.num_cell_per_row) as usize;
        let cell_h = (feat.patch.height / feat.num_cell_per_col) as usize;

        let mut out = 0;
        for cy in 0..feat.num_cell_per_col as usize {
            for cx in 0..feat.num_cell_per_row as usize {
                let cx0 = x0 + cx * cell_w;
                let cy0 = y0 + cy * cell_h;
                for ch in 0..NUM_INT_CHANNEL {
                    feat_vec[out] = self.channel_sum(cx0, cy0, cell_w, cell_h, ch);
                    out += 1;
                }
            }
        }
    }

    fn channel_sum(&self, x: usize, y: usize, w: usize, h: usize, ch: usize) -> i32 {
        let stride = self.width * NUM_INT_CHANNEL;
        let at = |cx: usize, cy: usize| self.int_img[cy * stride + cx * NUM_INT_CHANNEL + ch];

        let br = at(x + w - 1, y + h - 1);
        let bl = if x > 0 { at(x - 1, y + h - 1) } else { 0 };
        let tr = if y > 0 { at(x + w - 1, y - 1) } else { 0 };
        let tl = if x > 0 && y > 0 { at(x - 1, y - 1) } else { 0 };
        br.wrapping_sub(bl).wrapping_sub(tr).wrapping_add(tl)
    }
}

impl Default for SurfFeatureMap {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_l2(feat_vec: &[i32], normed: &mut [f32]) {
    let mut prod = 0.0f64;
    for v in feat_vec {
        prod += f64::from(*v) * f64::from(*v);
    }
    if prod != 0.0 {
        let norm = prod.sqrt() as f32;
        for (n, v) in normed.iter_mut().zip(feat_vec.iter()) {
            *n = *v as f32 / norm;
        }
    } else {
        for n in normed.iter_mut() {
            *n = 0.0;
        }
    }
}
