//! Typed layer kinds and their execution.

use log::debug;

use super::blob::Blob;
use super::hyper::HyperParams;
use crate::error::{Error, Result};
use crate::math;

#[derive(Debug, Clone, PartialEq)]
pub enum EltwiseOp {
    Scale(f32),
    BiasAdder,
    Clamp { lower: f32, upper: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Linear,
    Bicubic,
}

/// Everything a node can be besides a `Common` container. The variant is
/// decoded from the node's type name and hyper-parameters; parameter
/// blobs follow in the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerKind {
    Conv {
        stride: usize,
    },
    InnerProduct,
    MaxPooling {
        kernel: usize,
        stride: usize,
    },
    Pad {
        left: i32,
        right: i32,
        top: i32,
        bottom: i32,
    },
    BiasAdder,
    Eltwise(EltwiseOp),
    Bn {
        epsilon: f32,
    },
    SpatialTransform {
        new_height: usize,
        new_width: usize,
        kind: SampleKind,
        /// When set, the first input holds interleaved image bytes
        /// (widened to f32) laid out `(h, w, c)` regardless of the
        /// declared planar shape.
        mat_data: bool,
    },
    TformMaker {
        points_num: usize,
    },
}

impl LayerKind {
    /// Decode a node type from its name and hyper-parameters. `Common`
    /// containers are handled by the graph itself and rejected here.
    pub fn from_hyper(type_name: &str, hyper: &HyperParams) -> Result<LayerKind> {
        let positive = |v: i32, what: &str| -> Result<usize> {
            if v <= 0 {
                Err(Error::InvalidModel(format!("non-positive {}: {}", what, v)))
            } else {
                Ok(v as usize)
            }
        };

        match type_name {
            "Conv" => Ok(LayerKind::Conv {
                stride: positive(hyper.get_int("stride")?, "stride")?,
            }),
            "InnerProduct" => Ok(LayerKind::InnerProduct),
            "MaxPooling" => Ok(LayerKind::MaxPooling {
                kernel: positive(hyper.get_int("kernel_size")?, "kernel size")?,
                stride: positive(hyper.get_int("stride")?, "stride")?,
            }),
            "Pad" => {
                let pad = hyper.get_int("pad")?;
                Ok(LayerKind::Pad {
                    left: pad,
                    right: pad,
                    top: pad,
                    bottom: pad,
                })
            }
            "BiasAdder" => Ok(LayerKind::BiasAdder),
            "Eltwise" => {
                let op = match hyper.get_str("eltwise_op")? {
                    "SCALE" => EltwiseOp::Scale(hyper.get_float("scale")?),
                    // The misspelled tag is part of the wire format.
                    "BAIS_ADDER" => EltwiseOp::BiasAdder,
                    "CLOSE" => EltwiseOp::Clamp {
                        lower: hyper.get_float("lower")?,
                        upper: hyper.get_float("upper")?,
                    },
                    other => {
                        return Err(Error::InvalidModel(format!(
                            "unknown eltwise op \"{}\"",
                            other
                        )))
                    }
                };
                Ok(LayerKind::Eltwise(op))
            }
            "Bn" => Ok(LayerKind::Bn {
                epsilon: hyper.get_float("epsilon")?,
            }),
            "SpatialTransform" => {
                let kind = match hyper.get_str("type")? {
                    "linear" => SampleKind::Linear,
                    "bicubic" => SampleKind::Bicubic,
                    other => {
                        return Err(Error::InvalidModel(format!(
                            "unknown sampling type \"{}\"",
                            other
                        )))
                    }
                };
                let mat_data = hyper.has("is_mat_data") && hyper.get_int("is_mat_data")? != 0;
                Ok(LayerKind::SpatialTransform {
                    new_height: positive(hyper.get_int("new_height")?, "new height")?,
                    new_width: positive(hyper.get_int("new_width")?, "new width")?,
                    kind,
                    mat_data,
                })
            }
            "TransformationMaker" => Ok(LayerKind::TformMaker {
                points_num: positive(hyper.get_int("points_num")?, "points count")?,
            }),
            other => Err(Error::InvalidModel(format!("unknown net type \"{}\"", other))),
        }
    }

    pub fn num_params(&self) -> usize {
        match self {
            LayerKind::Conv { .. } | LayerKind::InnerProduct | LayerKind::BiasAdder => 1,
            LayerKind::Eltwise(EltwiseOp::BiasAdder) => 1,
            LayerKind::Bn { .. } => 3,
            LayerKind::TformMaker { .. } => 1,
            _ => 0,
        }
    }

    pub fn num_inputs(&self) -> usize {
        match self {
            LayerKind::SpatialTransform { .. } => 2,
            _ => 1,
        }
    }

    pub fn num_outputs(&self) -> usize {
        1
    }

    pub fn execute(&self, inputs: &[Blob], params: &[Blob]) -> Result<Blob> {
        match self {
            LayerKind::Conv { stride } => conv(&inputs[0], &params[0], *stride),
            LayerKind::InnerProduct => inner_product(&inputs[0], &params[0]),
            LayerKind::MaxPooling { kernel, stride } => max_pooling(&inputs[0], *kernel, *stride),
            LayerKind::Pad {
                left,
                right,
                top,
                bottom,
            } => pad(&inputs[0], *left, *right, *top, *bottom),
            LayerKind::BiasAdder => bias_adder(&inputs[0], &params[0]),
            LayerKind::Eltwise(op) => eltwise(&inputs[0], op, params.first()),
            LayerKind::Bn { epsilon } => batch_norm(&inputs[0], params, *epsilon),
            LayerKind::SpatialTransform {
                new_height,
                new_width,
                kind,
                mat_data,
            } => spatial_transform(&inputs[0], &inputs[1], *new_height, *new_width, *kind, *mat_data),
            LayerKind::TformMaker { points_num } => tform_maker(&inputs[0], &params[0], *points_num),
        }
    }
}

/// Valid convolution via an im2col scan and a weight-matrix product.
fn conv(input: &Blob, weight: &Blob, stride: usize) -> Result<Blob> {
    let (src_num, src_channels) = (input.num(), input.channels());
    let (src_h, src_w) = (input.height(), input.width());
    let dst_channels = weight.num();
    let (kernel_h, kernel_w) = (weight.height(), weight.width());

    if weight.channels() != src_channels {
        return Err(Error::InvalidModel(format!(
            "conv weight expects {} input channels, got {}",
            weight.channels(),
            src_channels
        )));
    }
    if src_h < kernel_h || src_w < kernel_w {
        return Err(Error::InvalidModel(format!(
            "conv input {}x{} smaller than kernel {}x{}",
            src_h, src_w, kernel_h, kernel_w
        )));
    }
    debug!(
        "conv input ({},{},{},{})",
        src_num, src_channels, src_h, src_w
    );

    let dst_h = (src_h - kernel_h) / stride + 1;
    let dst_w = (src_w - kernel_w) / stride + 1;
    let dst_size = dst_h * dst_w;
    let kernel_size = src_channels * kernel_h * kernel_w;

    let src_data = input.data();
    let weight_data = weight.data();
    let mut dst = vec![0.0f32; src_num * dst_size * dst_channels];
    let mut mat = vec![0.0f32; dst_size * kernel_size];

    for sn in 0..src_num {
        let src_base = sn * src_channels * src_h * src_w;
        let mut mat_off = 0;
        let mut sh = 0;
        while sh + kernel_h <= src_h {
            let mut sw = 0;
            while sw + kernel_w <= src_w {
                for sc in 0..src_channels {
                    let mut src_off = src_base + (sc * src_h + sh) * src_w + sw;
                    for _ in 0..kernel_h {
                        mat[mat_off..mat_off + kernel_w]
                            .copy_from_slice(&src_data[src_off..src_off + kernel_w]);
                        mat_off += kernel_w;
                        src_off += src_w;
                    }
                }
                sw += stride;
            }
            sh += stride;
        }

        let dst_base = sn * dst_channels * dst_size;
        for dc in 0..dst_channels {
            let w_row = &weight_data[dc * kernel_size..(dc + 1) * kernel_size];
            for s in 0..dst_size {
                let m_row = &mat[s * kernel_size..(s + 1) * kernel_size];
                dst[dst_base + dc * dst_size + s] = math::vector_inner_product(m_row, w_row);
            }
        }
    }

    Blob::from_data(src_num, dst_channels, dst_h, dst_w, dst)
}

fn inner_product(input: &Blob, weight: &Blob) -> Result<Blob> {
    let src_num = input.num();
    let vec_len = input.channels() * input.height() * input.width();
    let dst_channels = weight.num();

    if weight.count() != dst_channels * vec_len {
        return Err(Error::InvalidModel(format!(
            "inner product weight count {} does not match {}x{}",
            weight.count(),
            dst_channels,
            vec_len
        )));
    }

    let src_data = input.data();
    let weight_data = weight.data();
    let mut dst = vec![0.0f32; src_num * dst_channels];
    for sn in 0..src_num {
        let src_row = &src_data[sn * vec_len..(sn + 1) * vec_len];
        for dc in 0..dst_channels {
            let w_row = &weight_data[dc * vec_len..(dc + 1) * vec_len];
            dst[sn * dst_channels + dc] = math::vector_inner_product(src_row, w_row);
        }
    }

    Blob::from_data(src_num, dst_channels, 1, 1, dst)
}

/// Max pooling with a floor of zero, so negative activations vanish.
fn max_pooling(input: &Blob, kernel: usize, stride: usize) -> Result<Blob> {
    let (num, channels) = (input.num(), input.channels());
    let (src_h, src_w) = (input.height(), input.width());
    if src_h < kernel || src_w < kernel {
        return Err(Error::InvalidModel(format!(
            "pooling input {}x{} smaller than kernel {}",
            src_h, src_w, kernel
        )));
    }

    let dst_h = ((src_h - kernel) as f32 / stride as f32).ceil() as usize + 1;
    let dst_w = ((src_w - kernel) as f32 / stride as f32).ceil() as usize + 1;

    let src_data = input.data();
    let mut dst = vec![0.0f32; num * channels * dst_h * dst_w];
    let mut didx = 0;
    for n in 0..num {
        for c in 0..channels {
            let src_base = (n * channels + c) * src_h * src_w;
            for dh in 0..dst_h {
                let hstart = dh * stride;
                let hend = (hstart + kernel).min(src_h);
                for dw in 0..dst_w {
                    let wstart = dw * stride;
                    let wend = (wstart + kernel).min(src_w);

                    let mut max_val = 0.0f32;
                    for sh in hstart..hend {
                        for sw in wstart..wend {
                            let v = src_data[src_base + sh * src_w + sw];
                            if v > max_val {
                                max_val = v;
                            }
                        }
                    }
                    dst[didx] = max_val;
                    didx += 1;
                }
            }
        }
    }

    Blob::from_data(num, channels, dst_h, dst_w, dst)
}

/// Uniform padding; a negative amount crops centrally instead. Mixed
/// signs are rejected.
fn pad(input: &Blob, left: i32, right: i32, top: i32, bottom: i32) -> Result<Blob> {
    let (num, channels) = (input.num(), input.channels());
    let (src_h, src_w) = (input.height() as i32, input.width() as i32);

    let dst_w = src_w + left + right;
    let dst_h = src_h + top + bottom;
    if dst_w <= 0 || dst_h <= 0 {
        return Err(Error::InvalidModel(format!(
            "padding collapses a {}x{} input",
            src_h, src_w
        )));
    }
    if (top < 0) != (left < 0) {
        return Err(Error::InvalidModel("mixed-sign padding".into()));
    }

    let height = src_h.min(dst_h) as usize;
    let width = src_w.min(dst_w) as usize;
    let src_data = input.data();
    let mut dst = vec![0.0f32; num * channels * (dst_h * dst_w) as usize];

    for n in 0..num {
        for c in 0..channels {
            let plane = (n * channels + c) as usize;
            let (mut src_off, mut dst_off);
            if top < 0 {
                src_off = plane * (src_h * src_w) as usize + ((-top) * src_w + (-left)) as usize;
                dst_off = plane * (dst_h * dst_w) as usize;
            } else {
                src_off = plane * (src_h * src_w) as usize;
                dst_off = plane * (dst_h * dst_w) as usize + (top * dst_w + left) as usize;
            }
            for _ in 0..height {
                dst[dst_off..dst_off + width].copy_from_slice(&src_data[src_off..src_off + width]);
                src_off += src_w as usize;
                dst_off += dst_w as usize;
            }
        }
    }

    Blob::from_data(num, channels, dst_h as usize, dst_w as usize, dst)
}

fn bias_adder(input: &Blob, bias: &Blob) -> Result<Blob> {
    let channels = input.channels();
    if bias.channels() != channels {
        return Err(Error::InvalidModel(format!(
            "bias has {} channels, input has {}",
            bias.channels(),
            channels
        )));
    }

    let size = input.height() * input.width();
    let src_data = input.data();
    let bias_data = bias.data();
    let mut dst = vec![0.0f32; input.count()];
    let mut offset = 0;
    for _ in 0..input.num() {
        for c in 0..channels {
            for _ in 0..size {
                dst[offset] = src_data[offset] + bias_data[c];
                offset += 1;
            }
        }
    }

    Blob::from_data(input.num(), channels, input.height(), input.width(), dst)
}

fn eltwise(input: &Blob, op: &EltwiseOp, param: Option<&Blob>) -> Result<Blob> {
    let src_data = input.data();
    let dst = match op {
        EltwiseOp::Scale(scale) => src_data.iter().map(|v| v * scale).collect(),
        EltwiseOp::Clamp { lower, upper } => {
            src_data.iter().map(|v| v.min(*upper).max(*lower)).collect()
        }
        EltwiseOp::BiasAdder => {
            let bias = param.ok_or_else(|| Error::InvalidModel("eltwise bias missing".into()))?;
            if bias.channels() != input.channels() {
                return Err(Error::InvalidModel(format!(
                    "eltwise bias has {} channels, input has {}",
                    bias.channels(),
                    input.channels()
                )));
            }
            // Broadcast along every singleton axis of the bias blob.
            let bn = (bias.num() != 1) as usize;
            let bc = (bias.channels() != 1) as usize;
            let bh = (bias.height() != 1) as usize;
            let bw = (bias.width() != 1) as usize;

            let mut dst = vec![0.0f32; input.count()];
            let mut offset = 0;
            for n in 0..input.num() {
                for c in 0..input.channels() {
                    for h in 0..input.height() {
                        for w in 0..input.width() {
                            let b = bias.data()[bias.offset(n * bn, c * bc, h * bh, w * bw)];
                            dst[offset] = src_data[offset] + b;
                            offset += 1;
                        }
                    }
                }
            }
            dst
        }
    };

    Blob::from_data(
        input.num(),
        input.channels(),
        input.height(),
        input.width(),
        dst,
    )
}

/// Batch normalization with the historical "scale" convention: a positive
/// third parameter is a reciprocal count, a negative one means no
/// rescaling, and zero lifts epsilon to at least 1e-5.
fn batch_norm(input: &Blob, params: &[Blob], epsilon: f32) -> Result<Blob> {
    let (mean_p, var_p, scale_p) = (&params[0], &params[1], &params[2]);
    let channels = input.channels();
    if mean_p.channels() != channels || var_p.channels() != channels {
        return Err(Error::InvalidModel(format!(
            "batch-norm statistics have {}/{} channels, input has {}",
            mean_p.channels(),
            var_p.channels(),
            channels
        )));
    }

    let mut epsilon = epsilon;
    let raw_scale = scale_p.data()[0];
    let scale = if raw_scale > 0.0 {
        1.0 / raw_scale
    } else if raw_scale < 0.0 {
        1.0
    } else {
        if epsilon < 1e-5 {
            epsilon = 1e-5;
        }
        0.0
    };

    let size = input.height() * input.width();
    let src_data = input.data();
    let mut dst = vec![0.0f32; input.count()];
    let mut offset = 0;
    for _ in 0..input.num() {
        for c in 0..channels {
            let mean = mean_p.data()[c] * scale;
            let var = (var_p.data()[c] * scale + epsilon).sqrt();
            for _ in 0..size {
                dst[offset] = (src_data[offset] - mean) / var;
                offset += 1;
            }
        }
    }

    Blob::from_data(input.num(), channels, input.height(), input.width(), dst)
}

/// MATLAB-compatible cubic interpolation kernel.
fn cubic(x: f64) -> f64 {
    let ax = x.abs();
    let ax2 = ax * ax;
    let ax3 = ax2 * ax;
    if ax <= 1.0 {
        1.5 * ax3 - 2.5 * ax2 + 1.0
    } else if ax <= 2.0 {
        -0.5 * ax3 + 2.5 * ax2 - 4.0 * ax + 2.0
    } else {
        0.0
    }
}

fn norm_weights(weights: &mut [f64]) {
    let sum: f64 = weights.iter().sum();
    if sum != 0.0 {
        for w in weights.iter_mut() {
            *w /= sum;
        }
    }
}

struct Sampler<'a> {
    data: &'a [f32],
    kind: SampleKind,
    height: usize,
    width: usize,
    /// Stride between horizontally adjacent samples of one channel.
    channel_stride: usize,
    /// Offset of the sampled channel.
    base: usize,
}

impl<'a> Sampler<'a> {
    /// Sample at fractional `(x, y)` = (row, column), out-of-range reads
    /// as zero. `scale` shrinks the bicubic kernel for minification.
    fn sample(&self, x: f64, y: f64, scale: f64) -> f64 {
        let h = self.height as i64;
        let w = self.width as i64;
        let at = |r: i64, c: i64| -> f64 {
            f64::from(self.data[self.base + (r as usize * self.width + c as usize) * self.channel_stride])
        };

        match self.kind {
            SampleKind::Linear => {
                let ux = x.floor() as i64;
                let uy = y.floor() as i64;
                if ux >= 0 && ux < h - 1 && uy >= 0 && uy < w - 1 {
                    let cof_x = x - ux as f64;
                    let cof_y = y - uy as f64;
                    let top = (1.0 - cof_y) * at(ux, uy) + cof_y * at(ux, uy + 1);
                    let bottom = (1.0 - cof_y) * at(ux + 1, uy) + cof_y * at(ux + 1, uy + 1);
                    (1.0 - cof_x) * top + cof_x * bottom
                } else {
                    0.0
                }
            }
            SampleKind::Bicubic => {
                if !(x >= 0.0 && x < h as f64 && y >= 0.0 && y < w as f64) {
                    return 0.0;
                }
                let scale = scale.min(1.0);
                let kernel_width = (4.0 / scale).max(8.0);

                let mut weights_x = Vec::with_capacity(5);
                let mut indices_x = Vec::with_capacity(5);
                let mut ux = (x - kernel_width / 2.0).ceil() as i64;
                while ux as f64 <= x + kernel_width / 2.0 {
                    indices_x.push(ux.clamp(0, h - 1));
                    weights_x.push(cubic((x - ux as f64) * scale));
                    ux += 1;
                }
                let mut weights_y = Vec::with_capacity(5);
                let mut indices_y = Vec::with_capacity(5);
                let mut uy = (y - kernel_width / 2.0).ceil() as i64;
                while uy as f64 <= y + kernel_width / 2.0 {
                    indices_y.push(uy.clamp(0, w - 1));
                    weights_y.push(cubic((y - uy as f64) * scale));
                    uy += 1;
                }
                norm_weights(&mut weights_x);
                norm_weights(&mut weights_y);

                let mut ans = 0.0;
                let mut val = 0.0;
                for i in 0..indices_x.len() {
                    if i == 0 || indices_x[i] != indices_x[i - 1] {
                        val = 0.0;
                        for j in 0..indices_y.len() {
                            val += at(indices_x[i], indices_y[j]) * weights_y[j];
                        }
                    }
                    ans += val * weights_x[i];
                }
                ans
            }
        }
    }
}

/// Resample the input through a 6-dof affine transform. The second input
/// carries one `theta = [t0..t5]` per batch item; output pixel `(x, y)`
/// reads the source at `(t3*y + t4*x + t5, t0*y + t1*x + t2)`.
fn spatial_transform(
    input: &Blob,
    theta: &Blob,
    new_height: usize,
    new_width: usize,
    kind: SampleKind,
    mat_data: bool,
) -> Result<Blob> {
    if input.num() != theta.num() {
        return Err(Error::InvalidModel(format!(
            "transform count {} does not match batch {}",
            theta.num(),
            input.num()
        )));
    }
    let tform_size = theta.count() / theta.num();
    if tform_size != 6 {
        return Err(Error::InvalidModel(format!(
            "expected 6-dof transforms, got {} values",
            tform_size
        )));
    }

    let num = input.num();
    let channels = input.channels();
    let (src_h, src_w) = (input.height(), input.width());
    debug!(
        "spatial transform input ({},{},{},{}) -> {}x{}",
        num, channels, src_h, src_w, new_height, new_width
    );

    let mut dst = vec![0.0f32; num * channels * new_height * new_width];
    let theta_data = theta.data();

    for n in 0..num {
        let t = &theta_data[n * 6..(n + 1) * 6];
        let scale = (f64::from(t[0]) * f64::from(t[0]) + f64::from(t[3]) * f64::from(t[3])).sqrt();

        for x in 0..new_height {
            for y in 0..new_width {
                let src_y = f64::from(t[0]) * y as f64 + f64::from(t[1]) * x as f64 + f64::from(t[2]);
                let src_x = f64::from(t[3]) * y as f64 + f64::from(t[4]) * x as f64 + f64::from(t[5]);
                for c in 0..channels {
                    let sampler = if mat_data {
                        Sampler {
                            data: input.data(),
                            kind,
                            height: src_h,
                            width: src_w,
                            channel_stride: channels,
                            base: n * channels * src_h * src_w + c,
                        }
                    } else {
                        Sampler {
                            data: input.data(),
                            kind,
                            height: src_h,
                            width: src_w,
                            channel_stride: 1,
                            base: (n * channels + c) * src_h * src_w,
                        }
                    };
                    let v = sampler.sample(src_x, src_y, 1.0 / scale);
                    dst[((n * channels + c) * new_height + x) * new_width + y] = v as f32;
                }
            }
        }
    }

    Blob::from_data(num, channels, new_height, new_width, dst)
}

/// Solve the least-squares 2-D similarity transform mapping the reference
/// points onto the observed landmarks and emit it as a 6-vector
/// `[a, -b, c, b, a, d]`.
fn tform_maker(input: &Blob, std_points: &Blob, points_num: usize) -> Result<Blob> {
    const EPS: f64 = 1e-4;
    const TFORM_SIZE: usize = 6;

    if input.channels() != points_num {
        return Err(Error::InvalidModel(format!(
            "expected {} landmark pairs, got {}",
            points_num,
            input.channels()
        )));
    }
    if std_points.count() < points_num * 2 {
        return Err(Error::InvalidModel("reference point blob too small".into()));
    }

    let feat_points = input.data();
    let std = std_points.data();
    let mut out = vec![0.0f32; input.num() * TFORM_SIZE];

    for n in 0..input.num() {
        let mut sum_x = 0.0f64;
        let mut sum_y = 0.0f64;
        let mut sum_u = 0.0f64;
        let mut sum_v = 0.0f64;
        let mut sum_xx_yy = 0.0f64;
        let mut sum_ux_vy = 0.0f64;
        let mut sum_vx_uy = 0.0f64;

        for c in 0..points_num {
            let x_off = n * points_num * 2 + c * 2;
            let y_off = x_off + 1;
            let (sx, sy) = (f64::from(std[c * 2]), f64::from(std[c * 2 + 1]));
            let (u, v) = (f64::from(feat_points[x_off]), f64::from(feat_points[y_off]));
            sum_x += sx;
            sum_y += sy;
            sum_u += u;
            sum_v += v;
            sum_xx_yy += sx * sx + sy * sy;
            sum_ux_vy += sx * u + sy * v;
            sum_vx_uy += v * sx - u * sy;
        }

        if sum_xx_yy <= EPS {
            return Err(Error::InvalidArgument(
                "degenerate reference points for similarity transform".into(),
            ));
        }

        let q = sum_u - sum_x * sum_ux_vy / sum_xx_yy + sum_y * sum_vx_uy / sum_xx_yy;
        let p = sum_v - sum_y * sum_ux_vy / sum_xx_yy - sum_x * sum_vx_uy / sum_xx_yy;
        let r = points_num as f64 - (sum_x * sum_x + sum_y * sum_y) / sum_xx_yy;
        if !(r > EPS || r < -EPS) {
            return Err(Error::InvalidArgument(
                "singular similarity-transform system".into(),
            ));
        }

        let a = (sum_ux_vy - sum_x * q / r - sum_y * p / r) / sum_xx_yy;
        let b = (sum_vx_uy + sum_y * q / r - sum_x * p / r) / sum_xx_yy;
        let c = q / r;
        let d = p / r;

        let tform = &mut out[n * TFORM_SIZE..(n + 1) * TFORM_SIZE];
        tform[0] = a as f32;
        tform[4] = a as f32;
        tform[1] = -b as f32;
        tform[3] = b as f32;
        tform[2] = c as f32;
        tform[5] = d as f32;
    }

    Blob::from_data(input.num(), TFORM_SIZE, 1, 1, out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conv_valid_stride_one() {
        // 1x1x3x3 input, single 2x2 kernel of ones: each output is the
        // sum of a 2x2 neighborhood.
        let input = Blob::from_data(
            1,
            1,
            3,
            3,
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
        )
        .unwrap();
        let weight = Blob::from_data(1, 1, 2, 2, vec![1.0; 4]).unwrap();
        let out = conv(&input, &weight, 1).unwrap();
        assert_eq!(out.shape(), [1, 1, 2, 2]);
        assert_eq!(out.data(), &[12.0, 16.0, 24.0, 28.0]);
    }

    #[test]
    fn inner_product_computes_dot_rows() {
        let input = Blob::from_data(1, 4, 1, 1, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let weight =
            Blob::from_data(2, 4, 1, 1, vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0]).unwrap();
        let out = inner_product(&input, &weight).unwrap();
        assert_eq!(out.shape(), [1, 2, 1, 1]);
        assert_eq!(out.data(), &[1.0, 9.0]);
    }

    #[test]
    fn max_pooling_clamps_at_zero() {
        let input = Blob::from_data(1, 1, 2, 2, vec![-5.0, -1.0, -2.0, -3.0]).unwrap();
        let out = max_pooling(&input, 2, 2).unwrap();
        assert_eq!(out.shape(), [1, 1, 1, 1]);
        assert_eq!(out.data(), &[0.0]);
    }

    #[test]
    fn pad_grows_and_crops() {
        let input = Blob::from_data(1, 1, 2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let grown = pad(&input, 1, 1, 1, 1).unwrap();
        assert_eq!(grown.shape(), [1, 1, 4, 4]);
        assert_eq!(grown.data()[0], 0.0);
        assert_eq!(grown.data()[grown.offset(0, 0, 1, 1)], 1.0);

        let cropped = pad(&grown, -1, -1, -1, -1).unwrap();
        assert_eq!(cropped.shape(), [1, 1, 2, 2]);
        assert_eq!(cropped.data(), input.data());
    }

    #[test]
    fn bias_and_eltwise_ops() {
        let input = Blob::from_data(1, 2, 1, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let bias = Blob::from_data(1, 2, 1, 1, vec![10.0, 20.0]).unwrap();
        let out = bias_adder(&input, &bias).unwrap();
        assert_eq!(out.data(), &[11.0, 12.0, 23.0, 24.0]);

        let out = eltwise(&input, &EltwiseOp::Scale(2.0), None).unwrap();
        assert_eq!(out.data(), &[2.0, 4.0, 6.0, 8.0]);

        let out = eltwise(
            &input,
            &EltwiseOp::Clamp {
                lower: 1.5,
                upper: 3.5,
            },
            None,
        )
        .unwrap();
        assert_eq!(out.data(), &[1.5, 2.0, 3.0, 3.5]);

        let out = eltwise(&input, &EltwiseOp::BiasAdder, Some(&bias)).unwrap();
        assert_eq!(out.data(), &[11.0, 12.0, 23.0, 24.0]);
    }

    #[test]
    fn batch_norm_scale_conventions() {
        let input = Blob::from_data(1, 1, 1, 2, vec![4.0, 8.0]).unwrap();
        let mean = Blob::from_data(1, 1, 1, 1, vec![4.0]).unwrap();
        let var = Blob::from_data(1, 1, 1, 1, vec![16.0]).unwrap();

        // Negative scale leaves the statistics as-is.
        let scale = Blob::from_data(1, 1, 1, 1, vec![-1.0]).unwrap();
        let out = batch_norm(
            &input,
            &[mean.clone(), var.clone(), scale],
            0.0,
        )
        .unwrap();
        assert!((out.data()[0] - 0.0).abs() < 1e-6);
        assert!((out.data()[1] - 1.0).abs() < 1e-6);

        // Positive scale divides the statistics: mean 2, var 8.
        let scale = Blob::from_data(1, 1, 1, 1, vec![2.0]).unwrap();
        let out = batch_norm(&input, &[mean.clone(), var.clone(), scale], 0.0).unwrap();
        let expect = (4.0f32 - 2.0) / 8.0f32.sqrt();
        assert!((out.data()[0] - expect).abs() < 1e-6);

        // Zero scale lifts epsilon.
        let scale = Blob::from_data(1, 1, 1, 1, vec![0.0]).unwrap();
        let out = batch_norm(&input, &[mean, var, scale], 0.0).unwrap();
        let expect = 4.0f32 / 1e-5f32.sqrt();
        assert!((out.data()[1] - expect).abs() < 1e-2);
    }

    #[test]
    fn identity_spatial_transform_is_near_exact() {
        // theta = [1 0 0 0 1 0]: output equals input.
        let (h, w) = (16usize, 16usize);
        let data: Vec<f32> = (0..h * w).map(|i| (i % 256) as f32).collect();
        let input = Blob::from_data(1, 1, h, w, data.clone()).unwrap();
        let theta = Blob::from_data(1, 6, 1, 1, vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0]).unwrap();

        for kind in [SampleKind::Linear, SampleKind::Bicubic] {
            let out = spatial_transform(&input, &theta, h, w, kind, false).unwrap();
            for x in 0..h - 1 {
                for y in 0..w - 1 {
                    let got = out.data()[out.offset(0, 0, x, y)];
                    let want = data[x * w + y];
                    assert!(
                        (got - want).abs() <= 1.0 / 256.0 + 1e-3,
                        "{:?} mismatch at ({}, {}): {} vs {}",
                        kind,
                        x,
                        y,
                        got,
                        want
                    );
                }
            }
        }
    }

    #[test]
    fn tform_maker_identity_for_matching_points() {
        // Landmarks identical to the reference points give the identity
        // similarity transform.
        let pts = vec![10.0, 10.0, 50.0, 10.0, 30.0, 30.0, 15.0, 50.0, 45.0, 50.0];
        let input = Blob::from_data(1, 5, 2, 1, pts.clone()).unwrap();
        let std = Blob::from_data(1, 5, 2, 1, pts).unwrap();
        let out = tform_maker(&input, &std, 5).unwrap();
        let t = out.data();
        assert!((t[0] - 1.0).abs() < 1e-4);
        assert!(t[1].abs() < 1e-4);
        assert!(t[2].abs() < 1e-3);
        assert!((t[4] - 1.0).abs() < 1e-4);
        assert!(t[3].abs() < 1e-4);
        assert!(t[5].abs() < 1e-3);
    }

    #[test]
    fn tform_maker_recovers_translation() {
        let std = vec![10.0, 10.0, 50.0, 10.0, 30.0, 30.0, 15.0, 50.0, 45.0, 50.0];
        let moved: Vec<f32> = std
            .chunks(2)
            .flat_map(|p| [p[0] + 7.0, p[1] - 3.0])
            .collect();
        let input = Blob::from_data(1, 5, 2, 1, moved).unwrap();
        let std = Blob::from_data(1, 5, 2, 1, std).unwrap();
        let out = tform_maker(&input, &std, 5).unwrap();
        let t = out.data();
        assert!((t[0] - 1.0).abs() < 1e-4);
        assert!((t[2] - 7.0).abs() < 1e-2);
        assert!((t[5] + 3.0).abs() < 1e-2);
    }
}
