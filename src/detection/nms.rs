//! Score-summing non-maximum suppression.

use crate::types::FaceInfo;

/// Deduplicate boxes by IoU. The highest-scoring surviving box absorbs
/// the score of every box it suppresses, so detection confidence reflects
/// the amount of supporting evidence. Output is ordered by descending
/// pre-suppression score.
pub fn non_maximum_suppression(bboxes: &mut Vec<FaceInfo>, iou_thresh: f32) -> Vec<FaceInfo> {
    let mut result = Vec::new();
    bboxes.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let num_bbox = bboxes.len();
    let mut merged = vec![false; num_bbox];
    let mut select_idx = 0;

    loop {
        while select_idx < num_bbox && merged[select_idx] {
            select_idx += 1;
        }
        if select_idx == num_bbox {
            break;
        }

        let selected = bboxes[select_idx];
        merged[select_idx] = true;

        let area1 = (selected.bbox.width * selected.bbox.height) as f32;
        let x1 = selected.bbox.x;
        let y1 = selected.bbox.y;
        let x2 = selected.bbox.x + selected.bbox.width - 1;
        let y2 = selected.bbox.y + selected.bbox.height - 1;

        let mut score = selected.score;
        select_idx += 1;

        for i in select_idx..num_bbox {
            if merged[i] {
                continue;
            }
            let other = &bboxes[i].bbox;
            let x = x1.max(other.x);
            let y = y1.max(other.y);
            let w = x2.min(other.x + other.width - 1) - x + 1;
            let h = y2.min(other.y + other.height - 1) - y + 1;
            if w <= 0 || h <= 0 {
                continue;
            }

            let area2 = (other.width * other.height) as f32;
            let area_intersect = (w * h) as f32;
            let area_union = area1 + area2 - area_intersect;
            if area_intersect / area_union > iou_thresh {
                merged[i] = true;
                score += bboxes[i].score;
            }
        }

        let mut survivor = selected;
        survivor.score = score;
        result.push(survivor);
    }

    result
}
