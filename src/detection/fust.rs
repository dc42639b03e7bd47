//! Funnel-structured cascade: sliding-window roots over an image pyramid,
//! then window refinement through the following hierarchies.

use super::model::{CascadeModel, Classifier, FeatureMaps};
use super::nms::non_maximum_suppression;
use crate::error::{Error, Result};
use crate::image::resize_image;
use crate::pyramid::ImagePyramid;
use crate::types::{FaceInfo, Rect};

pub struct FuStDetector {
    model: CascadeModel,
    maps: FeatureMaps,
    wnd_data_buf: Vec<u8>,
    wnd_data: Vec<u8>,
    wnd_size: u32,
    slide_wnd_step_x: u32,
    slide_wnd_step_y: u32,
}

impl FuStDetector {
    pub fn new(model: CascadeModel) -> Self {
        let wnd_size = 40u32;
        Self {
            model,
            maps: FeatureMaps::new(),
            wnd_data_buf: vec![0; (wnd_size * wnd_size) as usize],
            wnd_data: vec![0; (wnd_size * wnd_size) as usize],
            wnd_size,
            slide_wnd_step_x: 4,
            slide_wnd_step_y: 4,
        }
    }

    pub fn wnd_size(&self) -> u32 {
        self.wnd_size
    }

    /// Every SURF classifier must reference features the pool actually
    /// enumerates for the detection window.
    pub fn check_feature_ids(&self) -> Result<()> {
        let pool_size = self.maps.surf.pool_size() as i32;
        for classifier in &self.model.classifiers {
            if let Classifier::SurfMlp(c) = classifier {
                if c.max_feature_id() > pool_size {
                    return Err(Error::InvalidModel(format!(
                        "SURF feature id {} exceeds pool size {}",
                        c.max_feature_id(),
                        pool_size
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn set_slide_window_step(&mut self, step_x: u32, step_y: u32) {
        if step_x > 0 {
            self.slide_wnd_step_x = step_x;
        }
        if step_y > 0 {
            self.slide_wnd_step_y = step_y;
        }
    }

    /// Copy the window into a contiguous buffer, zero-filling any part
    /// outside the image, then resample to the cascade window size.
    fn get_window_data(&mut self, img: &[u8], img_width: i32, img_height: i32, wnd: Rect) {
        let mut roi = wnd;

        let pad_right = (roi.x + roi.width - img_width).max(0);
        let pad_left = if roi.x >= 0 {
            0
        } else {
            let t = roi.x;
            roi.x = 0;
            -t
        };
        let pad_bottom = (roi.y + roi.height - img_height).max(0);
        let pad_top = if roi.y >= 0 {
            0
        } else {
            let t = roi.y;
            roi.y = 0;
            -t
        };

        let roi_w = roi.width as usize;
        let roi_h = roi.height as usize;
        self.wnd_data_buf.clear();
        self.wnd_data_buf.resize(roi_w * roi_h, 0);

        let copy_len = (roi.width - pad_left - pad_right).max(0) as usize;
        if copy_len > 0 {
            for y in pad_top..(roi.height - pad_bottom) {
                let src_row = (roi.y + y - pad_top) as usize;
                let src_off = src_row * img_width as usize + roi.x as usize;
                let dest_off = y as usize * roi_w + pad_left as usize;
                self.wnd_data_buf[dest_off..dest_off + copy_len]
                    .copy_from_slice(&img[src_off..src_off + copy_len]);
            }
        }

        let wnd_len = (self.wnd_size * self.wnd_size) as usize;
        self.wnd_data.resize(wnd_len, 0);
        resize_image(
            &self.wnd_data_buf,
            roi.width as u32,
            roi.height as u32,
            &mut self.wnd_data,
            self.wnd_size,
            self.wnd_size,
        );
    }

    pub fn detect(&mut self, pyramid: &mut ImagePyramid) -> Vec<FaceInfo> {
        let num_hierarchy = self.model.num_hierarchies();
        if num_hierarchy == 0 {
            return Vec::new();
        }
        let first_hierarchy_size = self.model.hierarchy_sizes[0];
        let max_hierarchy_size = *self.model.hierarchy_sizes.iter().max().unwrap();
        let num_slots = first_hierarchy_size.max(max_hierarchy_size);

        let mut proposals: Vec<Vec<FaceInfo>> = vec![Vec::new(); num_slots];
        let mut proposals_nms: Vec<Vec<FaceInfo>> = vec![Vec::new(); num_slots];

        // Sliding window over every pyramid level with the root classifiers.
        let mut wnd_info = FaceInfo::new();
        let root_kind = self.model.classifiers[0].kind();
        while let Some(level) = pyramid.next_scale() {
            let (data, width, height, scale) =
                (level.data, level.width, level.height, level.scale);
            self.maps.compute(root_kind, data, width, height);

            let bbox_size = (self.wnd_size as f32 / scale + 0.5) as i32;
            wnd_info.bbox.width = bbox_size;
            wnd_info.bbox.height = bbox_size;

            if width < self.wnd_size || height < self.wnd_size {
                continue;
            }
            let max_x = width - self.wnd_size;
            let max_y = height - self.wnd_size;

            let mut y = 0u32;
            while y <= max_y {
                let mut x = 0u32;
                while x <= max_x {
                    self.maps.set_roi(
                        root_kind,
                        Rect::new(x as i32, y as i32, self.wnd_size as i32, self.wnd_size as i32),
                    );
                    wnd_info.bbox.x = (x as f32 / scale + 0.5) as i32;
                    wnd_info.bbox.y = (y as f32 / scale + 0.5) as i32;

                    for i in 0..first_hierarchy_size {
                        if let Some(score) = self.model.classifiers[i].classify(&mut self.maps, None)
                        {
                            wnd_info.score = f64::from(score);
                            proposals[i].push(wnd_info);
                        }
                    }
                    x += self.slide_wnd_step_x;
                }
                y += self.slide_wnd_step_y;
            }
        }

        for i in 0..first_hierarchy_size {
            proposals_nms[i] = non_maximum_suppression(&mut proposals[i], 0.8);
            proposals[i].clear();
        }

        // Remaining hierarchies refine windows extracted from the 1x image.
        let (img1x, img_w, img_h) = {
            let (data, w, h) = pyramid.image_1x();
            (data, w as i32, h as i32)
        };
        let roi = Rect::new(0, 0, self.wnd_size as i32, self.wnd_size as i32);
        let mut mlp_predicts: Vec<f32> = Vec::with_capacity(4);

        let mut cls_idx = first_hierarchy_size;
        let mut model_idx = first_hierarchy_size;
        let mut buf_idx: Vec<usize> = Vec::new();

        for h in 1..num_hierarchy {
            let hierarchy_size = self.model.hierarchy_sizes[h];
            buf_idx.resize(hierarchy_size.max(buf_idx.len()), 0);

            for j in 0..hierarchy_size {
                let wnd_src = self.model.wnd_srcs[cls_idx].clone();
                buf_idx[j] = wnd_src[0];
                let slot = buf_idx[j];

                proposals[slot].clear();
                for src in &wnd_src {
                    let sources = proposals_nms[*src].clone();
                    proposals[slot].extend_from_slice(&sources);
                }

                let num_stage = self.model.num_stages[cls_idx];
                for k in 0..num_stage {
                    let kind = self.model.classifiers[model_idx].kind();
                    let num_wnd = proposals[slot].len();
                    let mut bbox_idx = 0;

                    for m in 0..num_wnd {
                        let bbox = proposals[slot][m].bbox;
                        if bbox.x + bbox.width <= 0 || bbox.y + bbox.height <= 0 {
                            continue;
                        }
                        self.get_window_data(&img1x, img_w, img_h, bbox);
                        self.maps
                            .compute(kind, &self.wnd_data, self.wnd_size, self.wnd_size);
                        self.maps.set_roi(kind, roi);

                        // Only a 4-D classifier output regresses the box;
                        // a bare accept keeps the window geometry.
                        mlp_predicts.clear();
                        if let Some(score) = self.model.classifiers[model_idx]
                            .classify(&mut self.maps, Some(&mut mlp_predicts))
                        {
                            let x = bbox.x as f32;
                            let y = bbox.y as f32;
                            let w = bbox.width as f32;
                            let hh = bbox.height as f32;

                            let refined = &mut proposals[slot][bbox_idx];
                            if mlp_predicts.len() >= 4 {
                                let new_w = (mlp_predicts[3] * 2.0 - 1.0) * w + w + 0.5;
                                refined.bbox.width = new_w as i32;
                                refined.bbox.height = new_w as i32;
                                refined.bbox.x = ((mlp_predicts[1] * 2.0 - 1.0) * w
                                    + x
                                    + (w - new_w as i32 as f32) * 0.5
                                    + 0.5) as i32;
                                refined.bbox.y = ((mlp_predicts[2] * 2.0 - 1.0) * hh
                                    + y
                                    + (hh - new_w as i32 as f32) * 0.5
                                    + 0.5) as i32;
                            } else {
                                refined.bbox = bbox;
                            }
                            refined.score = f64::from(score);
                            bbox_idx += 1;
                        }
                    }
                    proposals[slot].truncate(bbox_idx);

                    if k < num_stage - 1 {
                        proposals_nms[slot] = non_maximum_suppression(&mut proposals[slot], 0.8);
                        proposals[slot] = proposals_nms[slot].clone();
                    } else if h == num_hierarchy - 1 {
                        proposals_nms[slot] = non_maximum_suppression(&mut proposals[slot], 0.3);
                        proposals[slot] = proposals_nms[slot].clone();
                    }
                    model_idx += 1;
                }

                cls_idx += 1;
            }

            for j in 0..hierarchy_size {
                proposals_nms[j] = proposals[buf_idx[j]].clone();
            }
        }

        std::mem::take(&mut proposals_nms[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_model() -> CascadeModel {
        use crate::reader::BinReader;
        let mut buf = Vec::new();
        crate::detection::model::tests::write_tiny_cascade(&mut buf, -1.0, 0.0);
        CascadeModel::read(&mut BinReader::new(buf.as_slice())).unwrap()
    }

    #[test]
    fn window_extraction_zero_fills_outside() {
        let mut det = FuStDetector::new(dummy_model());
        // 10x10 image of 200s; window half outside on the top-left.
        let img = vec![200u8; 100];
        det.get_window_data(&img, 10, 10, Rect::new(-5, -5, 10, 10));

        // The buffer before resizing holds the padded window.
        assert_eq!(det.wnd_data_buf.len(), 100);
        assert_eq!(det.wnd_data_buf[0], 0); // padded corner
        assert_eq!(det.wnd_data_buf[5 * 10 + 5], 200); // in-bounds portion
    }

    #[test]
    fn window_extraction_handles_in_bounds_roi() {
        let mut det = FuStDetector::new(dummy_model());
        let img: Vec<u8> = (0..100).map(|i| i as u8).collect();
        det.get_window_data(&img, 10, 10, Rect::new(2, 3, 4, 4));
        assert_eq!(det.wnd_data_buf[0], 32); // img[3 * 10 + 2]
        assert_eq!(det.wnd_data_buf.len(), 16);
    }
}
