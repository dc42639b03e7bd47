//! Boosted strong classifier over LAB features.

use super::lab_featmap::LabFeatureMap;

/// Score accumulation is checked against a stage threshold after every
/// group of this many base classifiers.
const FEAT_GROUP_SIZE: usize = 10;
const STD_DEV_THRESH: f32 = 10.0;

/// One weak stage: a weight per LAB byte value plus a cut-off threshold.
pub struct LabBaseClassifier {
    weights: Vec<f32>,
    thresh: f32,
}

impl LabBaseClassifier {
    pub fn new(weights: Vec<f32>, thresh: f32) -> Self {
        Self { weights, thresh }
    }

    #[inline]
    fn weight(&self, val: u8) -> f32 {
        self.weights[val as usize]
    }
}

pub struct LabBoostedClassifier {
    features: Vec<(i32, i32)>,
    base_classifiers: Vec<LabBaseClassifier>,
    use_std_dev: bool,
}

impl LabBoostedClassifier {
    pub fn new() -> Self {
        Self {
            features: Vec::new(),
            base_classifiers: Vec::new(),
            use_std_dev: true,
        }
    }

    pub fn add_feature(&mut self, x: i32, y: i32) {
        self.features.push((x, y));
    }

    pub fn add_base_classifier(&mut self, weights: Vec<f32>, thresh: f32) {
        self.base_classifiers.push(LabBaseClassifier::new(weights, thresh));
    }

    /// Accumulate stage scores over the ROI of the feature map; reject as
    /// soon as the running score drops under the latest stage threshold.
    /// When positive, the windows's score is the final accumulated value.
    pub fn classify(&self, feat_map: &LabFeatureMap) -> Option<f32> {
        let n = self.base_classifiers.len();
        let mut score = 0.0f32;
        let mut i = 0;

        while i < n {
            let end = (i + FEAT_GROUP_SIZE).min(n);
            for k in i..end {
                let (x, y) = self.features[k];
                let val = feat_map.feature_val(x, y);
                score += self.base_classifiers[k].weight(val);
            }
            i = end;
            if score < self.base_classifiers[i - 1].thresh {
                return None;
            }
        }

        if self.use_std_dev && feat_map.std_dev() <= STD_DEV_THRESH {
            return None;
        }
        Some(score)
    }
}

impl Default for LabBoostedClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rect;

    fn textured_map() -> LabFeatureMap {
        let mut img = vec![0u8; 40 * 40];
        for (i, v) in img.iter_mut().enumerate() {
            *v = ((i * 31) % 256) as u8;
        }
        let mut map = LabFeatureMap::new();
        map.compute(&img, 40, 40);
        map.set_roi(Rect::new(0, 0, 40, 40));
        map
    }

    #[test]
    fn accepts_when_weights_clear_the_threshold() {
        let map = textured_map();
        let mut cls = LabBoostedClassifier::new();
        for k in 0..10 {
            cls.add_feature(k, 0);
            cls.add_base_classifier(vec![1.0; 256], 5.0);
        }
        let score = cls.classify(&map).expect("accepted");
        assert!((score - 10.0).abs() < 1e-6);
    }

    #[test]
    fn rejects_when_score_falls_below_stage_threshold() {
        let map = textured_map();
        let mut cls = LabBoostedClassifier::new();
        for k in 0..10 {
            cls.add_feature(k, 0);
            cls.add_base_classifier(vec![0.1; 256], 5.0);
        }
        assert!(cls.classify(&map).is_none());
    }

    #[test]
    fn flat_window_fails_the_std_dev_gate() {
        let img = vec![128u8; 40 * 40];
        let mut map = LabFeatureMap::new();
        map.compute(&img, 40, 40);
        map.set_roi(Rect::new(0, 0, 40, 40));

        let mut cls = LabBoostedClassifier::new();
        for k in 0..10 {
            cls.add_feature(k, 0);
            cls.add_base_classifier(vec![1.0; 256], -100.0);
        }
        assert!(cls.classify(&map).is_none());
    }
}
