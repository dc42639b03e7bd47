//! Coarse-to-fine landmark refinement: two stacked autoencoders over
//! shape-indexed dense-SIFT features.

use std::io::Read;

use log::info;

use super::sift::DenseSift;
use crate::error::Result;
use crate::image::resize_image;
use crate::reader::BinReader;
use crate::types::Rect;

const PTS_NUM: usize = 5;
const FEA_DIM: usize = PTS_NUM * 128;
const SIFT_PATCH_SIZE: usize = 32;
const STAGE1_SIZE: usize = 80;
const STAGE2_SIZE: usize = 140;

/// A feed-forward network with logistic hidden layers and a linear last
/// layer predicting a landmark delta.
struct StackedAutoencoder {
    structure: Vec<usize>,
    weights: Vec<Vec<f32>>,
    biases: Vec<Vec<f32>>,
}

impl StackedAutoencoder {
    fn read<R: Read>(reader: &mut BinReader<R>) -> Result<Self> {
        let size = reader.read_count("autoencoder layer count")?;
        let mut structure = Vec::with_capacity(size);
        for _ in 0..size {
            structure.push(reader.read_count("autoencoder layer dimension")?);
        }

        let mut weights = Vec::with_capacity(size - 1);
        let mut biases = Vec::with_capacity(size - 1);
        for i in 0..size - 1 {
            weights.push(reader.read_f32_vec(structure[i] * structure[i + 1])?);
            biases.push(reader.read_f32_vec(structure[i + 1])?);
        }

        Ok(Self {
            structure,
            weights,
            biases,
        })
    }

    fn output_dim(&self) -> usize {
        *self.structure.last().unwrap()
    }

    fn forward(&self, input: &[f32]) -> Vec<f32> {
        let num_layers = self.structure.len();
        let mut activation = input.to_vec();

        for i in 0..num_layers - 1 {
            let in_dim = self.structure[i];
            let out_dim = self.structure[i + 1];
            let w = &self.weights[i];
            let b = &self.biases[i];
            let mut next = Vec::with_capacity(out_dim);

            for j in 0..out_dim {
                let mut inner_product = 0.0f32;
                for k in 0..in_dim {
                    inner_product += activation[k] * w[j * in_dim + k];
                }
                if i == num_layers - 2 {
                    next.push(inner_product + b[j]);
                } else {
                    next.push(1.0 / (1.0 + (-inner_product - b[j]).exp()));
                }
            }
            activation = next;
        }
        activation
    }
}

/// The two-stage refiner with its mean shape.
pub struct Cfan {
    // Stored 1-indexed, exactly as in the model file.
    mean_shape: [f32; PTS_NUM * 2],
    lan1: StackedAutoencoder,
    lan2: StackedAutoencoder,
}

impl Cfan {
    pub fn read<R: Read>(reader: &mut BinReader<R>) -> Result<Self> {
        let shape = reader.read_f32_vec(PTS_NUM * 2)?;
        let mut mean_shape = [0.0f32; PTS_NUM * 2];
        mean_shape.copy_from_slice(&shape);

        let lan1 = StackedAutoencoder::read(reader)?;
        let lan2 = StackedAutoencoder::read(reader)?;

        if lan1.output_dim() != PTS_NUM * 2 || lan2.output_dim() != PTS_NUM * 2 {
            return Err(crate::error::Error::InvalidModel(format!(
                "landmark networks must predict {} values, got {} and {}",
                PTS_NUM * 2,
                lan1.output_dim(),
                lan2.output_dim()
            )));
        }

        info!(
            "loaded landmark model: stage-1 {:?}, stage-2 {:?}",
            lan1.structure, lan2.structure
        );
        Ok(Self {
            mean_shape,
            lan1,
            lan2,
        })
    }

    /// Locate the five landmarks of the face inside `face_bbox`, returned
    /// in input-image coordinates as `[x0, y0, x1, y1, ...]`.
    pub fn facial_point_locate(
        &self,
        gray_im: &[u8],
        im_width: usize,
        im_height: usize,
        face_bbox: Rect,
    ) -> [f32; PTS_NUM * 2] {
        let left_x = face_bbox.x;
        let left_y = face_bbox.y;
        let bbox_w = face_bbox.width;
        let bbox_h = face_bbox.height;
        let right_x = left_x + bbox_w - 1;
        let right_y = left_y + bbox_h - 1;

        // Extend the detector box, more at the bottom to capture the chin.
        let extend_factor = 0.05f32;
        let extend_revised_y = 0.05f32;

        let extend_lx = ((left_x as f32 - extend_factor * bbox_w as f32).floor() as i32).max(0);
        let extend_rx = ((right_x as f32 + extend_factor * bbox_w as f32).floor() as i32)
            .min(im_width as i32 - 1);
        let extend_ly = ((left_y as f32 - (extend_factor - extend_revised_y) * bbox_h as f32)
            .floor() as i32)
            .max(0);
        let extend_ry = ((right_y as f32 + (extend_factor + extend_revised_y) * bbox_h as f32)
            .floor() as i32)
            .min(im_height as i32 - 1);

        // A box far outside the frame degenerates to a sliver.
        let extend_lx = extend_lx.min(im_width as i32 - 1);
        let extend_ly = extend_ly.min(im_height as i32 - 1);
        let extend_rx = extend_rx.max(extend_lx);
        let extend_ry = extend_ry.max(extend_ly);

        let face_w = (extend_rx - extend_lx + 1) as usize;
        let face_h = (extend_ry - extend_ly + 1) as usize;

        let mut face_patch = vec![0u8; face_w * face_h];
        for h in 0..face_h {
            let src = (h + extend_ly as usize) * im_width + extend_lx as usize;
            face_patch[h * face_w..(h + 1) * face_w].copy_from_slice(&gray_im[src..src + face_w]);
        }

        // Stage 1 on the 80x80 frame, starting from the mean shape
        // (1-indexed in the model file, shifted to 0-indexed here).
        let mut stage1_patch = vec![0u8; STAGE1_SIZE * STAGE1_SIZE];
        resize_image(
            &face_patch,
            face_w as u32,
            face_h as u32,
            &mut stage1_patch,
            STAGE1_SIZE as u32,
            STAGE1_SIZE as u32,
        );

        let mut facial_loc = [0.0f32; PTS_NUM * 2];
        for i in 0..PTS_NUM * 2 {
            facial_loc[i] = self.mean_shape[i] - 1.0;
        }

        let fea = self.shape_indexed_sift(&stage1_patch, STAGE1_SIZE, STAGE1_SIZE, &facial_loc);
        let re_fea = reorder_features(&fea);
        let delta = self.lan1.forward(&re_fea);
        for i in 0..PTS_NUM * 2 {
            facial_loc[i] += delta[i];
        }

        // Stage 2 on the 140x140 frame.
        let mut stage2_patch = vec![0u8; STAGE2_SIZE * STAGE2_SIZE];
        resize_image(
            &face_patch,
            face_w as u32,
            face_h as u32,
            &mut stage2_patch,
            STAGE2_SIZE as u32,
            STAGE2_SIZE as u32,
        );

        let x_scale = STAGE1_SIZE as f32 / STAGE2_SIZE as f32;
        let y_scale = STAGE1_SIZE as f32 / STAGE2_SIZE as f32;
        for i in 0..PTS_NUM {
            facial_loc[i * 2] /= x_scale;
            facial_loc[i * 2 + 1] /= y_scale;
        }

        let fea = self.shape_indexed_sift(&stage2_patch, STAGE2_SIZE, STAGE2_SIZE, &facial_loc);
        let re_fea = reorder_features(&fea);
        let delta = self.lan2.forward(&re_fea);
        for i in 0..PTS_NUM * 2 {
            facial_loc[i] += delta[i];
        }

        // Back to input-image coordinates.
        let x_scale = STAGE2_SIZE as f32 / face_w as f32;
        let y_scale = STAGE2_SIZE as f32 / face_h as f32;
        for i in 0..PTS_NUM {
            facial_loc[i * 2] = facial_loc[i * 2] / x_scale + extend_lx as f32;
            facial_loc[i * 2 + 1] = facial_loc[i * 2 + 1] / y_scale + extend_ly as f32;
        }

        facial_loc
    }

    /// One 128-D SIFT descriptor per landmark, extracted from a patch
    /// centered at the landmark.
    fn shape_indexed_sift(
        &self,
        gray_im: &[u8],
        im_width: usize,
        im_height: usize,
        face_shape: &[f32],
    ) -> [f64; FEA_DIM] {
        let sift = DenseSift::new(SIFT_PATCH_SIZE, SIFT_PATCH_SIZE, SIFT_PATCH_SIZE, 16);
        let mut sub_img = vec![0u8; SIFT_PATCH_SIZE * SIFT_PATCH_SIZE];
        let mut one_fea = vec![0.0f64; 128];
        let mut sift_fea = [0.0f64; FEA_DIM];

        for i in 0..PTS_NUM {
            get_sub_img(
                gray_im,
                im_width,
                im_height,
                face_shape[i * 2],
                face_shape[i * 2 + 1],
                SIFT_PATCH_SIZE,
                &mut sub_img,
            );
            sift.calc(&sub_img, &mut one_fea);
            sift_fea[i * 128..(i + 1) * 128].copy_from_slice(&one_fea);
        }
        sift_fea
    }
}

/// Transpose landmark-major features to channel-major and zero NaNs.
fn reorder_features(fea: &[f64; FEA_DIM]) -> Vec<f32> {
    let mut re_fea = vec![0.0f32; FEA_DIM];
    for i in 0..128 {
        for j in 0..PTS_NUM {
            let v = fea[j * 128 + i];
            re_fea[i * PTS_NUM + j] = if v.is_nan() { 0.0 } else { v as f32 };
        }
    }
    re_fea
}

/// Extract a `patch_size` square centered at the point, zero-filling the
/// pixels that fall outside the frame.
fn get_sub_img(
    gray_im: &[u8],
    im_width: usize,
    im_height: usize,
    point_x: f32,
    point_y: f32,
    patch_size: usize,
    sub_img: &mut [u8],
) {
    for v in sub_img.iter_mut() {
        *v = 0;
    }
    let patch = patch_size as i32;
    let center_x = (point_x + 0.5).floor() as i32;
    let center_y = (point_y + 0.5).floor() as i32;

    let patch_left = ((center_x + 1) - patch / 2).max(0);
    let patch_right = ((center_x + 1) + patch / 2 - 1).min(im_width as i32 - 1);
    let patch_top = ((center_y + 1) - patch / 2).max(0);
    let patch_bottom = ((center_y + 1) + patch / 2 - 1).min(im_height as i32 - 1);

    let lx = (patch_left - ((center_x + 1) - patch / 2)).abs();
    let rx = patch - (patch_right - ((center_x + 1) + patch / 2 - 1)).abs() - 1;
    let ty = (patch_top - ((center_y + 1) - patch / 2)).abs();
    let by = patch - (patch_bottom - ((center_y + 1) + patch / 2 - 1)).abs() - 1;

    let mut ph = patch_top;
    for h in ty..=by {
        let mut pw = patch_left;
        for w in lx..=rx {
            sub_img[h as usize * patch_size + w as usize] =
                gray_im[ph as usize * im_width + pw as usize];
            pw += 1;
        }
        ph += 1;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::reader::BinWriter;

    /// Serialize a synthetic landmark model whose networks output
    /// constant zero deltas (zero weights and biases everywhere).
    pub(crate) fn write_identity_model(buf: &mut Vec<u8>) {
        let mut w = BinWriter::new(buf);
        // Mean shape, 1-indexed in an 80x80 frame.
        let mean = [
            25.0f32, 30.0, 55.0, 30.0, 40.0, 45.0, 30.0, 60.0, 50.0, 60.0,
        ];
        w.write_f32_slice(&mean).unwrap();
        for _ in 0..2 {
            // Two-layer network: 640 -> 10, all-zero weights.
            w.write_i32(2).unwrap();
            w.write_i32(640).unwrap();
            w.write_i32(10).unwrap();
            for _ in 0..640 * 10 {
                w.write_f32(0.0).unwrap();
            }
            for _ in 0..10 {
                w.write_f32(0.0).unwrap();
            }
        }
    }

    #[test]
    fn zero_networks_track_the_mean_shape() {
        let mut buf = Vec::new();
        write_identity_model(&mut buf);
        let cfan = Cfan::read(&mut BinReader::new(buf.as_slice())).unwrap();

        let im_w = 100usize;
        let im_h = 100usize;
        let img: Vec<u8> = (0..im_w * im_h).map(|i| (i * 7 % 256) as u8).collect();
        let face = Rect::new(10, 10, 80, 80);

        let loc = cfan.facial_point_locate(&img, im_w, im_h, face);

        // With zero deltas, landmarks are the mean shape mapped from the
        // 80x80 frame into the extended face region; all must land inside
        // the 5%-extended box.
        let ex_lx = 10.0 - 0.05 * 80.0;
        let ex_rx = 89.0 + 0.05 * 80.0;
        let ex_ly = 10.0;
        let ex_ry = 89.0 + 0.1 * 80.0;
        for i in 0..5 {
            let x = loc[i * 2];
            let y = loc[i * 2 + 1];
            assert!(x >= ex_lx && x <= ex_rx, "x{} = {}", i, x);
            assert!(y >= ex_ly && y <= ex_ry, "y{} = {}", i, y);
        }
    }

    #[test]
    fn sub_image_zero_fills_outside_the_frame() {
        let im: Vec<u8> = vec![200u8; 80 * 80];
        let mut sub = vec![0u8; 32 * 32];
        // Centered near the corner: the top-left part of the patch falls
        // outside and stays zero.
        get_sub_img(&im, 80, 80, 2.0, 2.0, 32, &mut sub);
        assert_eq!(sub[0], 0);
        assert_eq!(sub[31 * 32 + 31], 200);
    }

    #[test]
    fn autoencoder_forward_shapes() {
        let mut buf = Vec::new();
        {
            let mut w = BinWriter::new(&mut buf);
            w.write_i32(3).unwrap();
            w.write_i32(4).unwrap();
            w.write_i32(3).unwrap();
            w.write_i32(2).unwrap();
            // 4 -> 3 weights and bias.
            for _ in 0..12 {
                w.write_f32(0.0).unwrap();
            }
            for _ in 0..3 {
                w.write_f32(0.0).unwrap();
            }
            // 3 -> 2 weights and bias.
            for _ in 0..6 {
                w.write_f32(1.0).unwrap();
            }
            w.write_f32(0.5).unwrap();
            w.write_f32(-0.5).unwrap();
        }
        let net = StackedAutoencoder::read(&mut BinReader::new(buf.as_slice())).unwrap();
        let out = net.forward(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(out.len(), 2);
        // Hidden activations are sigmoid(0) = 0.5 each; the linear output
        // layer sums them: 1.5 + bias.
        assert!((out[0] - 2.0).abs() < 1e-6);
        assert!((out[1] - 1.0).abs() < 1e-6);
    }
}
