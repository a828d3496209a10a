/// Short-range face detector using ONNX Runtime via `ort`.
///
/// A lightweight single-shot detector (BlazeFace topology) suited to
/// per-frame presence polling: 128x128 input, anchor-decoded boxes,
/// sigmoid scores, greedy NMS. Only the fast variant is available.
use std::path::Path;

use crate::detection::domain::face_detector::{
    DetectorError, DetectorOptions, DetectorVariant, FaceDetector,
};
use crate::detection::domain::model_loader::ModelLoadError;
use crate::shared::face_box::FaceBox;
use crate::shared::frame::{Frame, FrameError};

/// Model input resolution.
const INPUT_SIZE: u32 = 128;

/// NMS IoU threshold.
const NMS_IOU_THRESH: f64 = 0.3;

/// Number of anchors for the short-range model.
const NUM_ANCHORS: usize = 896;

/// Values per anchor in the regressor output (4 box + 6 keypoints x 2).
const REGRESSOR_STRIDE: usize = 16;

pub struct OnnxFaceDetector {
    session: ort::session::Session,
    anchors: Vec<[f32; 2]>,
}

impl OnnxFaceDetector {
    pub fn new(model_path: &Path) -> Result<Self, ModelLoadError> {
        let initialize = |e: &dyn std::fmt::Display| {
            ModelLoadError::Initialize(format!("{}: {e}", model_path.display()))
        };
        let builder = ort::session::Session::builder().map_err(|e| initialize(&e))?;
        // Single-frame polling: one intra-op thread keeps latency predictable.
        let builder = builder
            .with_intra_threads(1)
            .map_err(|e| initialize(&e))?;
        let builder = builder
            .with_execution_providers(preferred_execution_providers())
            .map_err(|e| initialize(&e))?;
        let session = builder
            .commit_from_file(model_path)
            .map_err(|e| initialize(&e))?;
        Ok(Self {
            session,
            anchors: generate_anchors(),
        })
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(
        &mut self,
        frame: &Frame,
        options: &DetectorOptions,
    ) -> Result<Vec<FaceBox>, DetectorError> {
        if options.variant != DetectorVariant::Fast {
            return Err(DetectorError::Unsupported(options.variant));
        }
        if frame.channels() < 3 || frame.width() == 0 || frame.height() == 0 {
            return Err(DetectorError::Inference(format!(
                "unsupported frame layout {}x{}x{}",
                frame.width(),
                frame.height(),
                frame.channels()
            )));
        }

        let input_tensor = preprocess(frame, INPUT_SIZE).map_err(inference)?;
        let input_value = ort::value::Tensor::from_array(input_tensor).map_err(inference)?;
        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(inference)?;

        // regressors: [1, 896, 16], classificators: [1, 896, 1]
        if outputs.len() < 2 {
            return Err(DetectorError::Inference(format!(
                "expected 2 model outputs, got {}",
                outputs.len()
            )));
        }
        let regressors = outputs[0].try_extract_array::<f32>().map_err(inference)?;
        let scores = outputs[1].try_extract_array::<f32>().map_err(inference)?;
        let reg_data = regressors
            .as_slice()
            .ok_or_else(|| DetectorError::Inference("non-contiguous regressor output".into()))?;
        let score_data = scores
            .as_slice()
            .ok_or_else(|| DetectorError::Inference("non-contiguous score output".into()))?;

        let mut raw = decode(
            reg_data,
            score_data,
            &self.anchors,
            options.score_threshold,
            frame.width(),
            frame.height(),
        );
        Ok(nms(&mut raw, NMS_IOU_THRESH))
    }
}

/// Platform accelerator first; ONNX Runtime falls back to CPU when it is
/// unavailable.
fn preferred_execution_providers() -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    #[cfg(target_os = "macos")]
    {
        vec![ort::execution_providers::CoreMLExecutionProvider::default().build()]
    }
    #[cfg(target_os = "windows")]
    {
        vec![ort::execution_providers::DirectMLExecutionProvider::default().build()]
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        vec![]
    }
}

fn inference<E: std::fmt::Display>(e: E) -> DetectorError {
    DetectorError::Inference(e.to_string())
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

/// Resize frame to `size x size` and normalize to [0,1] NCHW float32.
fn preprocess(frame: &Frame, size: u32) -> Result<ndarray::Array4<f32>, FrameError> {
    let src = frame.as_ndarray()?;
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;
    let s = size as usize;

    let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, s, s));

    for y in 0..s {
        let src_y = (((y as f64 + 0.5) * src_h as f64 / s as f64) as usize).min(src_h - 1);
        for x in 0..s {
            let src_x = (((x as f64 + 0.5) * src_w as f64 / s as f64) as usize).min(src_w - 1);
            for c in 0..3 {
                tensor[[0, c, y, x]] = src[[src_y, src_x, c]] as f32 / 255.0;
            }
        }
    }

    Ok(tensor)
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Anchor centres for the two feature maps: 16x16 with 2 anchors per cell,
/// 8x8 with 6.
fn generate_anchors() -> Vec<[f32; 2]> {
    let strides = [(8, 2), (16, 6)]; // (stride, anchors_per_cell)
    let mut anchors = Vec::with_capacity(NUM_ANCHORS);

    for &(stride, num) in &strides {
        let grid_size = INPUT_SIZE as usize / stride;
        for y in 0..grid_size {
            for x in 0..grid_size {
                let cx = (x as f32 + 0.5) / grid_size as f32;
                let cy = (y as f32 + 0.5) / grid_size as f32;
                for _ in 0..num {
                    anchors.push([cx, cy]);
                }
            }
        }
    }

    anchors
}

fn decode(
    reg_data: &[f32],
    score_data: &[f32],
    anchors: &[[f32; 2]],
    threshold: f64,
    frame_w: u32,
    frame_h: u32,
) -> Vec<FaceBox> {
    let fw = frame_w as f32;
    let fh = frame_h as f32;
    let size = INPUT_SIZE as f32;
    let mut boxes = Vec::new();

    for (i, &raw_score) in score_data.iter().enumerate().take(anchors.len()) {
        let score = sigmoid(raw_score);
        if (score as f64) < threshold {
            continue;
        }
        let offset = i * REGRESSOR_STRIDE;
        if offset + 4 > reg_data.len() {
            break;
        }

        let anchor = anchors[i];
        let cx = anchor[0] + reg_data[offset] / size;
        let cy = anchor[1] + reg_data[offset + 1] / size;
        let w = reg_data[offset + 2] / size;
        let h = reg_data[offset + 3] / size;

        let x1 = ((cx - w / 2.0) * fw).max(0.0);
        let y1 = ((cy - h / 2.0) * fh).max(0.0);
        let x2 = ((cx + w / 2.0) * fw).min(fw);
        let y2 = ((cy + h / 2.0) * fh).min(fh);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        boxes.push(FaceBox::new(
            x1 as f64,
            y1 as f64,
            (x2 - x1) as f64,
            (y2 - y1) as f64,
            score as f64,
        ));
    }

    boxes
}

fn nms(boxes: &mut [FaceBox], iou_thresh: f64) -> Vec<FaceBox> {
    boxes.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<FaceBox> = Vec::new();
    for candidate in boxes.iter() {
        if keep.iter().all(|kept| kept.iou(candidate) <= iou_thresh) {
            keep.push(*candidate);
        }
    }
    keep
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
