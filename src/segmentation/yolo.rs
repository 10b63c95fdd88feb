// SPDX-License-Identifier: GPL-3.0-only

//! YOLOv8-seg instance segmentation on the CPU
//!
//! Pipeline: RgbImage → letterbox → CHW tensor → tract → boxes + mask
//! coefficients → NMS → per-instance masks at frame resolution.
//!
//! The model has two outputs:
//! - predictions `[1, 4 + classes + coefficients, anchors]` with boxes as
//!   center/size in input pixels and per-class scores already activated
//! - prototypes `[1, coefficients, mask_h, mask_w]`
//!
//! An instance mask is `sigmoid(coefficients · prototypes)`, cropped to the
//! instance box and thresholded at 0.5.

use super::{Instance, SegmentationError, SegmentationResult, Segmenter};
use image::{GrayImage, Rgb, RgbImage, imageops};
use std::path::Path;
use tracing::{debug, info};
use tract_onnx::prelude::*;
use tract_ndarray::{Array4, ArrayView1, ArrayView3, ArrayView4, Ix3, Ix4, s};

/// Gray level used to pad the letterboxed input
const LETTERBOX_FILL: u8 = 114;
/// Mask probability above which a pixel belongs to the instance
const MASK_THRESHOLD: f32 = 0.5;
/// Upper bound on detections kept after NMS
const MAX_DETECTIONS: usize = 300;

type YoloModel = RunnableModel<TypedFact, Box<dyn TypedOp>, TypedModel>;

// ------------------------------------------------------------
// helpers: sigmoid • IoU • NMS
// ------------------------------------------------------------
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix1 = a[0].max(b[0]);
    let iy1 = a[1].max(b[1]);
    let ix2 = a[2].min(b[2]);
    let iy2 = a[3].min(b[3]);
    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    inter / (area_a + area_b - inter + 1e-6)
}

/// Greedy NMS; boxes of different classes never suppress each other
fn non_max_suppression(mut dets: Vec<Detection>, iou_thr: f32) -> Vec<Detection> {
    dets.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::with_capacity(dets.len().min(MAX_DETECTIONS));
    'outer: for d in dets {
        for k in &keep {
            if k.class_id == d.class_id && iou(&d.bbox, &k.bbox) > iou_thr {
                continue 'outer;
            }
        }
        keep.push(d);
        if keep.len() >= MAX_DETECTIONS {
            break;
        }
    }
    keep
}

/// Candidate box in model input coordinates
#[derive(Debug, Clone)]
struct Detection {
    /// [x1, y1, x2, y2]
    bbox: [f32; 4],
    score: f32,
    class_id: u32,
    coefficients: Vec<f32>,
}

/// Aspect-preserving fit of a frame into the square model input
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    size: u32,
    scale: f32,
    scaled_width: u32,
    scaled_height: u32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn new(width: u32, height: u32, size: u32) -> Self {
        let scale = (size as f32 / width.max(1) as f32).min(size as f32 / height.max(1) as f32);
        let scaled_width = ((width as f32 * scale).round() as u32).clamp(1, size);
        let scaled_height = ((height as f32 * scale).round() as u32).clamp(1, size);
        Self {
            size,
            scale,
            scaled_width,
            scaled_height,
            pad_x: (size - scaled_width) / 2,
            pad_y: (size - scaled_height) / 2,
        }
    }

    /// Frame pixel center to input coordinates
    fn to_input(&self, x: u32, y: u32) -> (f32, f32) {
        (
            (x as f32 + 0.5) * self.scale + self.pad_x as f32,
            (y as f32 + 0.5) * self.scale + self.pad_y as f32,
        )
    }

    /// Input coordinates to (fractional) frame coordinates
    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }

    /// Resize and pad a frame, then lay it out as a normalized NCHW tensor
    fn tensor(&self, frame: &RgbImage) -> Tensor {
        let resized = imageops::resize(
            frame,
            self.scaled_width,
            self.scaled_height,
            imageops::FilterType::Triangle,
        );
        let mut canvas = RgbImage::from_pixel(self.size, self.size, Rgb([LETTERBOX_FILL; 3]));
        imageops::replace(&mut canvas, &resized, self.pad_x as i64, self.pad_y as i64);

        let size = self.size as usize;
        Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        })
        .into()
    }
}

/// Tract-powered YOLOv8-seg segmenter
pub struct YoloSegmenter {
    model: YoloModel,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl YoloSegmenter {
    /// Load and optimize the ONNX model for a square `input_size` input
    pub fn load(
        model_path: &Path,
        input_size: u32,
        confidence_threshold: f32,
        iou_threshold: f32,
    ) -> Result<Self, SegmentationError> {
        if !model_path.exists() {
            return Err(SegmentationError::ModelLoad(format!(
                "{} does not exist",
                model_path.display()
            )));
        }

        info!(path = %model_path.display(), input_size, "Loading segmentation model");
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .and_then(|m| {
                m.with_input_fact(
                    0,
                    InferenceFact::dt_shape(f32::datum_type(), tvec![1, 3, size, size]),
                )
            })
            .and_then(|m| m.into_optimized())
            .and_then(|m| m.into_runnable())
            .map_err(|e| SegmentationError::ModelLoad(format!("{}: {}", model_path.display(), e)))?;

        info!(confidence_threshold, iou_threshold, "Segmentation model ready");
        Ok(Self {
            model,
            input_size,
            confidence_threshold,
            iou_threshold,
        })
    }
}

impl Segmenter for YoloSegmenter {
    fn segment(&self, frame: &RgbImage) -> Result<SegmentationResult, SegmentationError> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Ok(SegmentationResult::empty(width, height));
        }

        let letterbox = Letterbox::new(width, height, self.input_size);
        let outputs = self
            .model
            .run(tvec![letterbox.tensor(frame).into()])
            .map_err(|e| SegmentationError::Inference(e.to_string()))?;

        if outputs.len() < 2 {
            return Err(SegmentationError::InvalidOutput(format!(
                "expected 2 outputs, got {}",
                outputs.len()
            )));
        }
        let first = outputs[0]
            .to_array_view::<f32>()
            .map_err(|e| SegmentationError::InvalidOutput(e.to_string()))?;
        let second = outputs[1]
            .to_array_view::<f32>()
            .map_err(|e| SegmentationError::InvalidOutput(e.to_string()))?;

        // Some exports list the prototypes first
        let (preds, protos) = if first.ndim() == 4 {
            (second, first)
        } else {
            (first, second)
        };
        let preds = preds
            .into_dimensionality::<Ix3>()
            .map_err(|e| SegmentationError::InvalidOutput(format!("predictions: {}", e)))?;
        let protos = protos
            .into_dimensionality::<Ix4>()
            .map_err(|e| SegmentationError::InvalidOutput(format!("prototypes: {}", e)))?;

        let instances = decode(
            preds,
            protos,
            &letterbox,
            (width, height),
            self.confidence_threshold,
            self.iou_threshold,
        )?;
        debug!(instances = instances.len(), "Segmentation complete");

        Ok(SegmentationResult {
            width,
            height,
            instances,
        })
    }
}

/// Turn raw model outputs into frame-resolution instance masks
fn decode(
    preds: ArrayView3<f32>,
    protos: ArrayView4<f32>,
    letterbox: &Letterbox,
    frame_size: (u32, u32),
    confidence_threshold: f32,
    iou_threshold: f32,
) -> Result<Vec<Instance>, SegmentationError> {
    let num_coefficients = protos.shape()[1];
    let rows = preds.shape()[1];
    if rows <= 4 + num_coefficients {
        return Err(SegmentationError::InvalidOutput(format!(
            "{} prediction rows leave no class scores with {} mask coefficients",
            rows, num_coefficients
        )));
    }
    let num_classes = rows - 4 - num_coefficients;
    let preds = preds.slice(s![0, .., ..]);

    let mut candidates = Vec::new();
    for anchor in 0..preds.shape()[1] {
        let column: ArrayView1<f32> = preds.slice(s![.., anchor]);

        let (class_id, score) = (0..num_classes)
            .map(|c| (c, column[4 + c]))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        if score < confidence_threshold {
            continue;
        }

        let (xc, yc, w, h) = (column[0], column[1], column[2], column[3]);
        candidates.push(Detection {
            bbox: [xc - w / 2.0, yc - h / 2.0, xc + w / 2.0, yc + h / 2.0],
            score,
            class_id: class_id as u32,
            coefficients: column.slice(s![4 + num_classes..]).to_vec(),
        });
    }

    let kept = non_max_suppression(candidates, iou_threshold);
    let protos = protos.slice(s![0, .., .., ..]);
    Ok(kept
        .into_iter()
        .map(|det| Instance {
            class_id: det.class_id,
            confidence: det.score,
            mask: instance_mask(&det, protos, letterbox, frame_size),
        })
        .collect())
}

/// Rasterize one instance mask at frame resolution
fn instance_mask(
    det: &Detection,
    protos: ArrayView3<f32>,
    letterbox: &Letterbox,
    (width, height): (u32, u32),
) -> GrayImage {
    let (mask_h, mask_w) = (protos.shape()[1], protos.shape()[2]);
    let sx = mask_w as f32 / letterbox.size as f32;
    let sy = mask_h as f32 / letterbox.size as f32;
    let [x1, y1, x2, y2] = det.bbox;

    // Prototype cells covered by the box
    let px0 = ((x1 * sx).floor().max(0.0) as usize).min(mask_w);
    let px1 = ((x2 * sx).ceil().max(0.0) as usize).min(mask_w);
    let py0 = ((y1 * sy).floor().max(0.0) as usize).min(mask_h);
    let py1 = ((y2 * sy).ceil().max(0.0) as usize).min(mask_h);
    let cells_w = px1.saturating_sub(px0);

    let mut inside = vec![false; cells_w * py1.saturating_sub(py0)];
    for py in py0..py1 {
        for px in px0..px1 {
            let logit: f32 = det
                .coefficients
                .iter()
                .enumerate()
                .map(|(k, coef)| coef * protos[[k, py, px]])
                .sum();
            inside[(py - py0) * cells_w + px - px0] = sigmoid(logit) > MASK_THRESHOLD;
        }
    }

    // Frame pixels whose centers may fall inside the box
    let (fx1, fy1) = letterbox.to_frame(x1, y1);
    let (fx2, fy2) = letterbox.to_frame(x2, y2);
    let fx_range = (fx1.floor().max(0.0) as u32).min(width)..(fx2.ceil().max(0.0) as u32).min(width);
    let fy_range = (fy1.floor().max(0.0) as u32).min(height)..(fy2.ceil().max(0.0) as u32).min(height);

    let mut mask = GrayImage::new(width, height);
    for y in fy_range {
        for x in fx_range.clone() {
            let (ix, iy) = letterbox.to_input(x, y);
            if ix < x1 || ix >= x2 || iy < y1 || iy >= y2 {
                continue;
            }
            let px = ((ix * sx) as usize).min(mask_w.saturating_sub(1));
            let py = ((iy * sy) as usize).min(mask_h.saturating_sub(1));
            if px < px0 || px >= px1 || py < py0 || py >= py1 {
                continue;
            }
            if inside[(py - py0) * cells_w + px - px0] {
                mask.put_pixel(x, y, image::Luma([255]));
            }
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use tract_onnx::prelude::tract_ndarray::Array3;

    fn det(bbox: [f32; 4], score: f32, class_id: u32) -> Detection {
        Detection {
            bbox,
            score,
            class_id,
            coefficients: vec![1.0],
        }
    }

    #[test]
    fn test_letterbox_geometry() {
        let lb = Letterbox::new(128, 64, 64);
        assert_eq!(lb.scale, 0.5);
        assert_eq!((lb.scaled_width, lb.scaled_height), (64, 32));
        assert_eq!((lb.pad_x, lb.pad_y), (0, 16));
        assert_eq!(lb.to_frame(32.0, 32.0), (64.0, 32.0));
    }

    #[test]
    fn test_letterbox_tensor_padding() {
        let frame = RgbImage::from_pixel(4, 2, Rgb([255, 0, 0]));
        let lb = Letterbox::new(4, 2, 4);
        let tensor = lb.tensor(&frame);
        let view = tensor
            .to_array_view::<f32>()
            .unwrap()
            .into_dimensionality::<Ix4>()
            .unwrap();

        assert_eq!(view.shape(), &[1, 3, 4, 4]);
        // Padding rows are gray, content rows red
        assert!((view[[0, 0, 0, 0]] - 114.0 / 255.0).abs() < 1e-6);
        assert_eq!(view[[0, 0, 1, 0]], 1.0);
        assert_eq!(view[[0, 1, 1, 0]], 0.0);
    }

    #[test]
    fn test_nms_suppresses_same_class_only() {
        let dets = vec![
            det([0.0, 0.0, 10.0, 10.0], 0.9, 0),
            det([1.0, 1.0, 11.0, 11.0], 0.8, 0),
            det([1.0, 1.0, 11.0, 11.0], 0.7, 1),
            det([50.0, 50.0, 60.0, 60.0], 0.6, 0),
        ];

        let kept = non_max_suppression(dets, 0.45);
        let scores: Vec<f32> = kept.iter().map(|d| d.score).collect();
        assert_eq!(scores, vec![0.9, 0.7, 0.6]);
    }

    #[test]
    fn test_decode_masks_cropped_to_box() {
        // 64px input, 2 classes, 1 coefficient, 16x16 prototypes
        let mut preds = Array3::<f32>::zeros((1, 7, 2));
        // Anchor 0: person box centered at (32, 32), 32x32
        for (row, value) in [32.0, 32.0, 32.0, 32.0, 0.9, 0.1, 1.0].into_iter().enumerate() {
            preds[[0, row, 0]] = value;
        }
        // Anchor 1: below threshold
        for (row, value) in [10.0, 10.0, 8.0, 8.0, 0.2, 0.1, 1.0].into_iter().enumerate() {
            preds[[0, row, 1]] = value;
        }
        let protos = Array4::<f32>::from_elem((1, 1, 16, 16), 10.0);

        let lb = Letterbox::new(64, 64, 64);
        let instances = decode(preds.view(), protos.view(), &lb, (64, 64), 0.5, 0.45).unwrap();

        assert_eq!(instances.len(), 1);
        let instance = &instances[0];
        assert_eq!(instance.class_id, 0);
        assert_eq!(instance.mask.dimensions(), (64, 64));
        assert_eq!(instance.mask.get_pixel(16, 16).0[0], 255);
        assert_eq!(instance.mask.get_pixel(47, 47).0[0], 255);
        assert_eq!(instance.mask.get_pixel(15, 32).0[0], 0);
        assert_eq!(instance.mask.get_pixel(48, 32).0[0], 0);
    }

    #[test]
    fn test_decode_negative_prototypes_give_empty_mask() {
        let mut preds = Array3::<f32>::zeros((1, 6, 1));
        for (row, value) in [8.0, 8.0, 8.0, 8.0, 0.9, 1.0].into_iter().enumerate() {
            preds[[0, row, 0]] = value;
        }
        let protos = Array4::<f32>::from_elem((1, 1, 4, 4), -10.0);

        let lb = Letterbox::new(16, 16, 16);
        let instances = decode(preds.view(), protos.view(), &lb, (16, 16), 0.5, 0.45).unwrap();
        assert_eq!(instances.len(), 1);
        assert!(instances[0].mask.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn test_decode_rejects_missing_class_rows() {
        let preds = Array3::<f32>::zeros((1, 5, 1));
        let protos = Array4::<f32>::zeros((1, 1, 4, 4));
        let lb = Letterbox::new(16, 16, 16);
        assert!(matches!(
            decode(preds.view(), protos.view(), &lb, (16, 16), 0.5, 0.45),
            Err(SegmentationError::InvalidOutput(_))
        ));
    }

    #[test]
    fn test_load_missing_model() {
        let result = YoloSegmenter::load(Path::new("/nonexistent/model.onnx"), 640, 0.5, 0.45);
        assert!(matches!(result, Err(SegmentationError::ModelLoad(_))));
    }
}
