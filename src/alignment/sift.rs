//! Dense SIFT descriptors over small grayscale patches.
//!
//! Gradients come from fixed 5x5 Gaussian-derivative kernels; eight
//! orientation response maps are pooled with a separable triangular
//! kernel evaluated sparsely at the sample grid.

/// 5x5 x-oriented Gaussian derivative (sigma = 1).
const DELTA_GAUSS_X: [f64; 25] = [
    0.0284161904936934, 0.0260724940559495, 0.0, -0.0260724940559495, -0.0284161904936934,
    0.127352530356230, 0.116848811647003, 0.0, -0.116848811647003, -0.127352530356230,
    0.209968825675801, 0.192651121218447, 0.0, -0.192651121218447, -0.209968825675801,
    0.127352530356230, 0.116848811647003, 0.0, -0.116848811647003, -0.127352530356230,
    0.0284161904936934, 0.0260724940559495, 0.0, -0.0260724940559495, -0.0284161904936934,
];

/// 5x5 y-oriented Gaussian derivative (the transpose of the x kernel).
const DELTA_GAUSS_Y: [f64; 25] = [
    0.0284161904936934, 0.127352530356230, 0.209968825675801, 0.127352530356230, 0.0284161904936934,
    0.0260724940559495, 0.116848811647003, 0.192651121218447, 0.116848811647003, 0.0260724940559495,
    0.0, 0.0, 0.0, 0.0, 0.0,
    -0.0260724940559495, -0.116848811647003, -0.192651121218447, -0.116848811647003, -0.0260724940559495,
    -0.0284161904936934, -0.127352530356230, -0.209968825675801, -0.127352530356230, -0.0284161904936934,
];

const ANGLE_NUMS: usize = 8;
const BIN_NUMS: usize = 4;
const FILTER_SIZE: usize = 5;

/// Reference angles at multiples of 45 degrees.
const COS_ARRAY: [f64; 8] = [1.0, 0.7071, 0.0, -0.7071, -1.0, -0.7071, 0.0, 0.7071];
const SIN_ARRAY: [f64; 8] = [0.0, 0.7071, 1.0, 0.7071, 0.0, -0.7071, -1.0, -0.7071];

/// Dense SIFT extractor over a fixed-size square frame.
pub struct DenseSift {
    image_width: usize,
    image_height: usize,
    patch_size: usize,
    grid_spacing: usize,

    image_pixel: usize,
    sample_pixel: usize,
    patch_cnt_width: usize,
    patch_cnt_height: usize,
    patch_dims: usize,
}

impl DenseSift {
    /// The sampling step reads response maps transposed, which is only
    /// coherent on square frames; descriptor extraction is always run on
    /// square patches here.
    pub fn new(image_width: usize, image_height: usize, patch_size: usize, grid_spacing: usize) -> Self {
        debug_assert_eq!(image_width, image_height);
        let sample_pixel = patch_size / BIN_NUMS;
        let patch_cnt_width = (image_width - patch_size) / grid_spacing + 1;
        let patch_cnt_height = (image_height - patch_size) / grid_spacing + 1;
        Self {
            image_width,
            image_height,
            patch_size,
            grid_spacing,
            image_pixel: image_width * image_height,
            sample_pixel,
            patch_cnt_width,
            patch_cnt_height,
            patch_dims: BIN_NUMS * BIN_NUMS * ANGLE_NUMS,
        }
    }

    /// Total descriptor length for one frame.
    pub fn descriptor_len(&self) -> usize {
        self.patch_cnt_width * self.patch_cnt_height * self.patch_dims
    }

    /// Extract L2-normalized descriptors for every patch center on the
    /// sample grid, concatenated into `sift_feature`.
    pub fn calc(&self, gray_im: &[u8], sift_feature: &mut [f64]) {
        // Normalize intensities by the frame maximum.
        let mut lf_gray = vec![0.0f64; self.image_pixel];
        let mut max = 1e-6f64;
        for (dst, src) in lf_gray.iter_mut().zip(gray_im.iter()) {
            *dst = f64::from(*src);
            if *dst > max {
                max = *dst;
            }
        }
        for v in lf_gray.iter_mut() {
            *v /= max;
        }

        let mut im_orientation = vec![0.0f64; self.image_pixel * ANGLE_NUMS];
        let mut conv_im = vec![0.0f64; self.image_pixel * ANGLE_NUMS];
        self.image_orientation(&lf_gray, &mut im_orientation);
        self.conv_image(&im_orientation, &mut conv_im);

        let half = self.patch_size / 2;
        let mut patch_feature = vec![0.0f64; self.patch_dims];
        let mut patch_cnt = 0;

        let mut location_x = half;
        while location_x <= self.image_height - half {
            let mut location_y = half;
            while location_y <= self.image_width - half {
                for v in patch_feature.iter_mut() {
                    *v = 0.0;
                }
                let mut l2_norm = 1e-6f64;
                let mut point_cnt = 0;

                let mut p_x = -(half as isize);
                while p_x <= half as isize - self.sample_pixel as isize {
                    let mut p_y = -(half as isize);
                    while p_y <= half as isize - self.sample_pixel as isize {
                        let i = (location_x as isize + p_x) as usize;
                        let j = (location_y as isize + p_y) as usize;

                        for index in 0..ANGLE_NUMS {
                            let v = conv_im[index * self.image_pixel + j * self.image_height + i];
                            patch_feature[point_cnt] = v;
                            l2_norm += v * v;
                            point_cnt += 1;
                        }
                        p_y += self.sample_pixel as isize;
                    }
                    p_x += self.sample_pixel as isize;
                }

                let norm = 1.0 / l2_norm.sqrt();
                for v in patch_feature.iter_mut() {
                    *v *= norm;
                }
                sift_feature[patch_cnt * self.patch_dims..(patch_cnt + 1) * self.patch_dims]
                    .copy_from_slice(&patch_feature);
                patch_cnt += 1;

                location_y += self.grid_spacing;
            }
            location_x += self.grid_spacing;
        }
    }

    /// Zero-padded full 2-D convolution.
    fn filter2(&self, gray_im: &[f64], kernel: &[f64], kernel_size: usize, filter_im: &mut [f64]) {
        let pad = (kernel_size - 1) / 2;
        let ex_w = self.image_width + kernel_size - 1;
        let ex_h = self.image_height + kernel_size - 1;
        let mut padded = vec![0.0f64; ex_w * ex_h];
        for i in 0..self.image_height {
            let dst = (i + pad) * ex_w + pad;
            padded[dst..dst + self.image_width]
                .copy_from_slice(&gray_im[i * self.image_width..(i + 1) * self.image_width]);
        }

        for i in 0..self.image_height {
            for j in 0..self.image_width {
                let mut acc = 0.0f64;
                for ki in 0..kernel_size {
                    for kj in 0..kernel_size {
                        acc += padded[(i + ki) * ex_w + j + kj] * kernel[ki * kernel_size + kj];
                    }
                }
                filter_im[i * self.image_width + j] = acc;
            }
        }
    }

    /// As [`filter2`], evaluated only at sample-grid positions.
    fn sparse_filter2(
        &self,
        gray_im: &[f64],
        kernel: &[f64],
        kernel_size: usize,
        filter_im: &mut [f64],
    ) {
        let pad = (kernel_size - 1) / 2;
        let ex_w = self.image_width + kernel_size - 1;
        let ex_h = self.image_height + kernel_size - 1;
        let mut padded = vec![0.0f64; ex_w * ex_h];
        for i in 0..self.image_height {
            let dst = (i + pad) * ex_w + pad;
            padded[dst..dst + self.image_width]
                .copy_from_slice(&gray_im[i * self.image_width..(i + 1) * self.image_width]);
        }

        let mut i = 0;
        while i < self.image_height {
            let mut j = 0;
            while j < self.image_width {
                let mut acc = 0.0f64;
                for ki in 0..kernel_size {
                    for kj in 0..kernel_size {
                        acc += padded[(i + ki) * ex_w + j + kj] * kernel[ki * kernel_size + kj];
                    }
                }
                filter_im[i * self.image_width + j] = acc;
                j += self.sample_pixel;
            }
            i += self.sample_pixel;
        }
    }

    /// Gradient magnitude split into eight soft orientation responses:
    /// `max(0, (cos t cos a_k + sin t sin a_k)^3) * magnitude`.
    fn image_orientation(&self, gray_im: &[f64], image_orientation: &mut [f64]) {
        let mut im_vert = vec![0.0f64; self.image_pixel];
        let mut im_hori = vec![0.0f64; self.image_pixel];
        self.filter2(gray_im, &DELTA_GAUSS_X, FILTER_SIZE, &mut im_vert);
        self.filter2(gray_im, &DELTA_GAUSS_Y, FILTER_SIZE, &mut im_hori);

        let mut magnitude = vec![0.0f64; self.image_pixel];
        let mut cos_theta = vec![0.0f64; self.image_pixel];
        let mut sin_theta = vec![0.0f64; self.image_pixel];
        for p in 0..self.image_pixel {
            let v = im_vert[p];
            let h = im_hori[p];
            let m = (v * v + h * h).sqrt();
            magnitude[p] = m;
            // A zero magnitude makes these NaN; the caller zeroes NaN
            // features after reordering.
            cos_theta[p] = v / m;
            sin_theta[p] = h / m;
        }

        for index in 0..ANGLE_NUMS {
            for p in 0..self.image_pixel {
                let t = cos_theta[p] * COS_ARRAY[index] + sin_theta[p] * SIN_ARRAY[index];
                let t3 = t * t * t;
                let clamped = if t3 > 0.0 { t3 } else { 0.0 };
                image_orientation[index * self.image_pixel + p] = clamped * magnitude[p];
            }
        }
    }

    /// Pool every orientation map with the separable triangular kernel
    /// `w[k] = max(0, 1 - |k - (P-1)/2| / sample_pixel)`.
    fn conv_image(&self, image_orientation: &[f64], conv_im: &mut [f64]) {
        let p = self.patch_size;
        let mut weight = vec![0.0f64; p];
        for (k, w) in weight.iter_mut().enumerate() {
            let d = (k as f64 - (p as f64 - 1.0) / 2.0).abs() / self.sample_pixel as f64;
            *w = if d <= 1.0 { 1.0 - d } else { 0.0 };
        }
        let mut kernel = vec![0.0f64; p * p];
        for i in 0..p {
            for j in 0..p {
                kernel[i * p + j] = weight[i] * weight[j];
            }
        }

        let mut angle_conv = vec![0.0f64; self.image_pixel];
        for index in 0..ANGLE_NUMS {
            let src = &image_orientation[index * self.image_pixel..(index + 1) * self.image_pixel];
            self.sparse_filter2(src, &kernel, p, &mut angle_conv);
            conv_im[index * self.image_pixel..(index + 1) * self.image_pixel]
                .copy_from_slice(&angle_conv);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_descriptor_for_a_32px_frame() {
        let sift = DenseSift::new(32, 32, 32, 16);
        assert_eq!(sift.descriptor_len(), 128);
    }

    #[test]
    fn descriptor_norm_is_near_unit_on_textured_patch() {
        let sift = DenseSift::new(32, 32, 32, 16);
        let mut patch = vec![0u8; 32 * 32];
        for (i, v) in patch.iter_mut().enumerate() {
            *v = ((i * 53) % 251) as u8;
        }
        let mut feature = vec![0.0f64; 128];
        sift.calc(&patch, &mut feature);

        let norm: f64 = feature.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!(norm <= 1.0 + 1e-6);
        assert!(norm > 0.9);
    }

    #[test]
    fn uniform_patch_produces_nan_features() {
        // Zero gradient everywhere makes orientation undefined; the NaNs
        // propagate to the descriptor and are cleaned by the refiner.
        let sift = DenseSift::new(32, 32, 32, 16);
        let patch = vec![200u8; 32 * 32];
        let mut feature = vec![0.0f64; 128];
        sift.calc(&patch, &mut feature);
        assert!(feature.iter().any(|v| v.is_nan()));
    }

    #[test]
    fn oriented_edge_energizes_matching_direction() {
        // Vertical edge: strong horizontal gradient. The response for the
        // 0-degree angle should dominate the 90-degree one.
        let sift = DenseSift::new(32, 32, 32, 16);
        let mut patch = vec![0u8; 32 * 32];
        for y in 0..32 {
            for x in 16..32 {
                patch[y * 32 + x] = 255;
            }
        }
        let mut feature = vec![0.0f64; 128];
        sift.calc(&patch, &mut feature);

        // Channel k of each 8-bundle corresponds to angle k * 45 degrees;
        // a horizontal gradient loads 0/180 degrees over 90/270.
        let sum_angle = |k: usize| -> f64 {
            feature
                .chunks(8)
                .map(|c| if c[k].is_nan() { 0.0 } else { c[k] })
                .sum()
        };
        assert!(sum_angle(0) + sum_angle(4) > sum_angle(2) + sum_angle(6));
    }
}
