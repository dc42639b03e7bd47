//! SURF feature classifier: concatenated normalized cell vectors fed into
//! a small multi-layer perceptron.

use super::surf_featmap::SurfFeatureMap;
use crate::math;

/// Hidden layers rectify, the output layer squashes with the logistic
/// function so its values can drive bounding-box regression directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActFunc {
    Relu,
    Sigmoid,
}

struct MlpLayer {
    input_dim: usize,
    output_dim: usize,
    weights: Vec<f32>,
    bias: Vec<f32>,
    act_func: ActFunc,
}

impl MlpLayer {
    fn compute(&self, input: &[f32], output: &mut Vec<f32>) {
        output.clear();
        for i in 0..self.output_dim {
            let row = &self.weights[i * self.input_dim..(i + 1) * self.input_dim];
            let mut v = math::vector_inner_product(input, row) + self.bias[i];
            v = match self.act_func {
                ActFunc::Relu => v.max(0.0),
                ActFunc::Sigmoid => 1.0 / (1.0 + (-v).exp()),
            };
            output.push(v);
        }
    }
}

pub struct Mlp {
    layers: Vec<MlpLayer>,
}

impl Mlp {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    pub fn add_layer(
        &mut self,
        input_dim: usize,
        output_dim: usize,
        weights: Vec<f32>,
        bias: Vec<f32>,
        is_output: bool,
    ) {
        self.layers.push(MlpLayer {
            input_dim,
            output_dim,
            weights,
            bias,
            act_func: if is_output { ActFunc::Sigmoid } else { ActFunc::Relu },
        });
    }

    pub fn input_dim(&self) -> usize {
        self.layers.first().map_or(0, |l| l.input_dim)
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map_or(0, |l| l.output_dim)
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn compute(&self, input: &[f32], output: &mut Vec<f32>) {
        let mut buf_a = Vec::new();
        let mut buf_b = Vec::new();
        self.layers[0].compute(input, &mut buf_a);
        for (i, layer) in self.layers.iter().enumerate().skip(1) {
            if i % 2 == 1 {
                layer.compute(&buf_a, &mut buf_b);
            } else {
                layer.compute(&buf_b, &mut buf_a);
            }
        }
        let last = if self.layers.len() % 2 == 1 { &buf_a } else { &buf_b };
        output.clear();
        output.extend_from_slice(last);
    }
}

impl Default for Mlp {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SurfMlpClassifier {
    feat_ids: Vec<i32>,
    thresh: f32,
    mlp: Mlp,
    input_buf: Vec<f32>,
    output_buf: Vec<f32>,
}

impl SurfMlpClassifier {
    pub fn new() -> Self {
        Self {
            feat_ids: Vec::new(),
            thresh: 0.0,
            mlp: Mlp::new(),
            input_buf: Vec::new(),
            output_buf: Vec::new(),
        }
    }

    /// Feature IDs in the model file are 1-indexed into the pool.
    pub fn add_feature_by_id(&mut self, feat_id: i32) {
        self.feat_ids.push(feat_id);
    }

    pub fn max_feature_id(&self) -> i32 {
        self.feat_ids.iter().copied().max().unwrap_or(0)
    }

    pub fn set_threshold(&mut self, thresh: f32) {
        self.thresh = thresh;
    }

    pub fn add_layer(
        &mut self,
        input_dim: usize,
        output_dim: usize,
        weights: Vec<f32>,
        bias: Vec<f32>,
        is_output: bool,
    ) {
        self.mlp.add_layer(input_dim, output_dim, weights, bias, is_output);
    }

    /// Run the MLP over the concatenated feature vectors of the current
    /// ROI. Positive when the first output exceeds the threshold; when
    /// `outputs` is given, the full output vector is copied there (a 4-D
    /// output regresses the bounding box downstream).
    pub fn classify(
        &mut self,
        feat_map: &mut SurfFeatureMap,
        outputs: Option<&mut Vec<f32>>,
    ) -> Option<f32> {
        self.input_buf.clear();
        for id in &self.feat_ids {
            let vec = feat_map.feature_vector((*id - 1) as usize);
            self.input_buf.extend_from_slice(vec);
        }
        self.mlp.compute(&self.input_buf, &mut self.output_buf);

        if let Some(out) = outputs {
            out.clear();
            out.extend_from_slice(&self.output_buf);
        }

        if self.output_buf[0] > self.thresh {
            Some(self.output_buf[0])
        } else {
            None
        }
    }
}

impl Default for SurfMlpClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_layer_logistic_output() {
        let mut mlp = Mlp::new();
        // 2 -> 1, weights [1, 1], bias 0, output layer.
        mlp.add_layer(2, 1, vec![1.0, 1.0], vec![0.0], true);
        let mut out = Vec::new();
        mlp.compute(&[0.0, 0.0], &mut out);
        assert!((out[0] - 0.5).abs() < 1e-6);

        mlp.compute(&[10.0, 10.0], &mut out);
        assert!(out[0] > 0.99);
    }

    #[test]
    fn hidden_layers_rectify() {
        let mut mlp = Mlp::new();
        // 1 -> 1 hidden with weight -1 (ReLU clamps to 0), then 1 -> 1 output.
        mlp.add_layer(1, 1, vec![-1.0], vec![0.0], false);
        mlp.add_layer(1, 1, vec![5.0], vec![0.0], true);
        let mut out = Vec::new();
        mlp.compute(&[3.0], &mut out);
        // Hidden output is max(0, -3) = 0, so the output is sigmoid(0).
        assert!((out[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn three_layer_chain_uses_both_buffers() {
        let mut mlp = Mlp::new();
        mlp.add_layer(1, 2, vec![1.0, 2.0], vec![0.0, 0.0], false);
        mlp.add_layer(2, 2, vec![1.0, 0.0, 0.0, 1.0], vec![0.0, 0.0], false);
        mlp.add_layer(2, 1, vec![1.0, 1.0], vec![-3.0], true);
        let mut out = Vec::new();
        mlp.compute(&[1.0], &mut out);
        // Hidden: [1, 2] -> [1, 2]; output: sigmoid(1 + 2 - 3) = 0.5.
        assert_eq!(out.len(), 1);
        assert!((out[0] - 0.5).abs() < 1e-6);
    }
}
