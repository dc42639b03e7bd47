//! Cascade model: the classifier tree and its binary reader.

use std::io::Read;

use log::{debug, info};

use super::lab_boosted::LabBoostedClassifier;
use super::lab_featmap::LabFeatureMap;
use super::surf_featmap::SurfFeatureMap;
use super::surf_mlp::SurfMlpClassifier;
use crate::error::{Error, Result};
use crate::reader::BinReader;
use crate::types::Rect;

const CLASSIFIER_KIND_LAB_BOOSTED: i32 = 1;
const CLASSIFIER_KIND_SURF_MLP: i32 = 2;

/// Which feature map a classifier reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierKind {
    LabBoosted,
    SurfMlp,
}

/// A node stage classifier; the variant decides the feature map family.
pub enum Classifier {
    LabBoosted(LabBoostedClassifier),
    SurfMlp(SurfMlpClassifier),
}

impl Classifier {
    pub fn kind(&self) -> ClassifierKind {
        match self {
            Classifier::LabBoosted(_) => ClassifierKind::LabBoosted,
            Classifier::SurfMlp(_) => ClassifierKind::SurfMlp,
        }
    }

    pub fn classify(
        &mut self,
        maps: &mut FeatureMaps,
        outputs: Option<&mut Vec<f32>>,
    ) -> Option<f32> {
        match self {
            Classifier::LabBoosted(c) => c.classify(&maps.lab),
            Classifier::SurfMlp(c) => c.classify(&mut maps.surf, outputs),
        }
    }
}

/// One feature map of each family, shared across all classifiers of that
/// family and recomputed per image (or per extracted window).
pub struct FeatureMaps {
    pub lab: LabFeatureMap,
    pub surf: SurfFeatureMap,
}

impl FeatureMaps {
    pub fn new() -> Self {
        Self {
            lab: LabFeatureMap::new(),
            surf: SurfFeatureMap::new(),
        }
    }

    pub fn compute(&mut self, kind: ClassifierKind, data: &[u8], width: u32, height: u32) {
        match kind {
            ClassifierKind::LabBoosted => self.lab.compute(data, width, height),
            ClassifierKind::SurfMlp => self.surf.compute(data, width, height),
        }
    }

    pub fn set_roi(&mut self, kind: ClassifierKind, roi: Rect) {
        match kind {
            ClassifierKind::LabBoosted => self.lab.set_roi(roi),
            ClassifierKind::SurfMlp => self.surf.set_roi(roi),
        }
    }
}

impl Default for FeatureMaps {
    fn default() -> Self {
        Self::new()
    }
}

/// The funnel cascade: hierarchy sizes, per-node stage counts, window
/// sources linking each node to the previous hierarchy, and the flat
/// classifier array walked in file order.
pub struct CascadeModel {
    pub hierarchy_sizes: Vec<usize>,
    pub num_stages: Vec<usize>,
    pub wnd_srcs: Vec<Vec<usize>>,
    pub classifiers: Vec<Classifier>,
}

impl CascadeModel {
    pub fn num_hierarchies(&self) -> usize {
        self.hierarchy_sizes.len()
    }

    /// Parse the cascade stream (see the format notes on each reader).
    pub fn read<R: Read>(reader: &mut BinReader<R>) -> Result<Self> {
        let num_hierarchy = reader.read_count("hierarchy count")?;

        let mut model = CascadeModel {
            hierarchy_sizes: Vec::with_capacity(num_hierarchy),
            num_stages: Vec::new(),
            wnd_srcs: Vec::new(),
            classifiers: Vec::new(),
        };

        for hierarchy in 0..num_hierarchy {
            let hierarchy_size = reader.read_count("hierarchy size")?;
            model.hierarchy_sizes.push(hierarchy_size);

            for _ in 0..hierarchy_size {
                let num_stage = reader.read_count("stage count")?;
                model.num_stages.push(num_stage);

                for _ in 0..num_stage {
                    let type_id = reader.read_i32()?;
                    let classifier = match type_id {
                        CLASSIFIER_KIND_LAB_BOOSTED => {
                            Classifier::LabBoosted(read_lab_boosted(reader)?)
                        }
                        CLASSIFIER_KIND_SURF_MLP => Classifier::SurfMlp(read_surf_mlp(reader)?),
                        other => {
                            return Err(Error::InvalidModel(format!(
                                "unknown classifier type: {}",
                                other
                            )))
                        }
                    };
                    model.classifiers.push(classifier);
                }

                let num_wnd_src = reader.read_i32()?;
                if num_wnd_src < 0 {
                    return Err(Error::InvalidModel(format!(
                        "negative window source count: {}",
                        num_wnd_src
                    )));
                }
                let mut srcs = Vec::with_capacity(num_wnd_src as usize);
                for _ in 0..num_wnd_src {
                    let src = reader.read_i32()?;
                    if src < 0 {
                        return Err(Error::InvalidModel(format!(
                            "negative window source index: {}",
                            src
                        )));
                    }
                    srcs.push(src as usize);
                }
                // Every node past the root hierarchy must pull windows
                // from valid nodes of the previous hierarchy.
                if hierarchy > 0 {
                    let prev_size = model.hierarchy_sizes[hierarchy - 1];
                    if srcs.is_empty() {
                        return Err(Error::InvalidModel(
                            "refinement node lists no window sources".into(),
                        ));
                    }
                    if let Some(bad) = srcs.iter().find(|s| **s >= prev_size) {
                        return Err(Error::InvalidModel(format!(
                            "window source {} exceeds previous hierarchy size {}",
                            bad, prev_size
                        )));
                    }
                }
                model.wnd_srcs.push(srcs);
            }
        }

        info!(
            "loaded cascade: {} hierarchies, {} classifiers",
            model.hierarchy_sizes.len(),
            model.classifiers.len()
        );
        Ok(model)
    }
}

/// LAB-boosted body: `num_base, num_bin, (x, y) pairs, thresholds, then
/// `num_bin + 1` bin weights per base classifier`.
fn read_lab_boosted<R: Read>(reader: &mut BinReader<R>) -> Result<LabBoostedClassifier> {
    let num_base = reader.read_count("LAB base classifier count")?;
    let num_bin = reader.read_count("LAB bin count")?;

    let mut classifier = LabBoostedClassifier::new();
    for _ in 0..num_base {
        let x = reader.read_i32()?;
        let y = reader.read_i32()?;
        classifier.add_feature(x, y);
    }

    let thresholds = reader.read_f32_vec(num_base)?;
    for thresh in thresholds {
        let weights = reader.read_f32_vec(num_bin + 1)?;
        classifier.add_base_classifier(weights, thresh);
    }
    debug!("LAB classifier: {} stages, {} bins", num_base, num_bin);
    Ok(classifier)
}

/// SURF-MLP body: `num_layer, num_feat, feature ids, threshold, input
/// dim, then output dim + weights + bias per layer (last layer output)`.
fn read_surf_mlp<R: Read>(reader: &mut BinReader<R>) -> Result<SurfMlpClassifier> {
    let num_layer = reader.read_count("MLP layer count")?;
    if num_layer < 2 {
        return Err(Error::InvalidModel(
            "SURF-MLP needs at least an input and an output layer".into(),
        ));
    }
    let num_feat = reader.read_count("MLP feature count")?;

    let mut classifier = SurfMlpClassifier::new();
    for _ in 0..num_feat {
        let feat_id = reader.read_i32()?;
        if feat_id <= 0 {
            return Err(Error::InvalidModel(format!(
                "non-positive SURF feature id: {}",
                feat_id
            )));
        }
        classifier.add_feature_by_id(feat_id);
    }

    classifier.set_threshold(reader.read_f32()?);
    let mut input_dim = reader.read_count("MLP input dimension")?;

    for i in 1..num_layer {
        let output_dim = reader.read_count("MLP output dimension")?;
        let weights = reader.read_f32_vec(input_dim * output_dim)?;
        let bias = reader.read_f32_vec(output_dim)?;
        let is_output = i == num_layer - 1;
        classifier.add_layer(input_dim, output_dim, weights, bias, is_output);
        input_dim = output_dim;
    }
    debug!("SURF-MLP classifier: {} layers, {} features", num_layer, num_feat);
    Ok(classifier)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::reader::BinWriter;

    /// A minimal single-hierarchy, single-node cascade with one LAB
    /// classifier of `num_base` stages.
    pub(crate) fn write_tiny_cascade(buf: &mut Vec<u8>, bin_weight: f32, thresh: f32) {
        let mut w = BinWriter::new(buf);
        w.write_i32(1).unwrap(); // num hierarchies
        w.write_i32(1).unwrap(); // hierarchy size
        w.write_i32(1).unwrap(); // num stages
        w.write_i32(1).unwrap(); // LAB type tag

        let num_base = 10;
        w.write_i32(num_base).unwrap();
        w.write_i32(255).unwrap(); // num bins
        for i in 0..num_base {
            w.write_i32(i % 5).unwrap(); // x
            w.write_i32(i / 5).unwrap(); // y
        }
        for _ in 0..num_base {
            w.write_f32(thresh).unwrap();
        }
        for _ in 0..num_base {
            for _ in 0..256 {
                w.write_f32(bin_weight).unwrap();
            }
        }
        w.write_i32(0).unwrap(); // no window sources
    }

    #[test]
    fn parses_a_synthetic_cascade() {
        let mut buf = Vec::new();
        write_tiny_cascade(&mut buf, 0.5, 0.0);
        let model = CascadeModel::read(&mut BinReader::new(buf.as_slice())).unwrap();
        assert_eq!(model.num_hierarchies(), 1);
        assert_eq!(model.hierarchy_sizes, vec![1]);
        assert_eq!(model.num_stages, vec![1]);
        assert_eq!(model.classifiers.len(), 1);
        assert_eq!(model.classifiers[0].kind(), ClassifierKind::LabBoosted);
    }

    #[test]
    fn rejects_unknown_classifier_type() {
        let mut buf = Vec::new();
        {
            let mut w = BinWriter::new(&mut buf);
            w.write_i32(1).unwrap();
            w.write_i32(1).unwrap();
            w.write_i32(1).unwrap();
            w.write_i32(99).unwrap(); // bogus type tag
        }
        assert!(matches!(
            CascadeModel::read(&mut BinReader::new(buf.as_slice())),
            Err(Error::InvalidModel(_))
        ));
    }

    #[test]
    fn truncated_stream_is_io_error() {
        let mut buf = Vec::new();
        write_tiny_cascade(&mut buf, 0.5, 0.0);
        buf.truncate(buf.len() - 10);
        assert!(matches!(
            CascadeModel::read(&mut BinReader::new(buf.as_slice())),
            Err(Error::Io(_))
        ));
    }
}
