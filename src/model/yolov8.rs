// 该文件是 Huakuang （画框） 项目的一部分。
// src/model/yolov8.rs - YOLOv8 目标检测器
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{EncodedFrame, FrameError, NchwTensor},
  model::{
    COCO_CLASSES, Detection, Detector,
    session::{Session, SessionBuilder, SessionError},
  },
};

const YOLOV8_INPUT_W: u32 = 640;
const YOLOV8_INPUT_H: u32 = 640;
const YOLOV8_CLASS_NUM: usize = 80;
const YOLOV8_ANCHORS: usize = 8400;
const YOLOV8_OBJECT_THRESH: f32 = 0.5;
const YOLOV8_NMS_THRESH: f32 = 0.7;

#[derive(Error, Debug)]
pub enum YoloV8Error {
  #[error("推理会话错误: {0}")]
  Session(#[from] SessionError),
  #[error("帧解码错误: {0}")]
  Frame(#[from] FrameError),
  #[error("无效的阈值参数: {0}")]
  InvalidThreshold(String),
}

/// 候选框，坐标为原图像素坐标
#[derive(Debug, Clone, Copy)]
struct Candidate {
  x1: f32,
  y1: f32,
  x2: f32,
  y2: f32,
  class_id: usize,
  score: f32,
}

impl Candidate {
  fn area(&self) -> f32 {
    (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
  }

  fn iou(&self, other: &Candidate) -> f32 {
    let x1 = self.x1.max(other.x1);
    let y1 = self.y1.max(other.y1);
    let x2 = self.x2.min(other.x2);
    let y2 = self.y2.min(other.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = self.area() + other.area() - intersection;
    if union > 0.0 { intersection / union } else { 0.0 }
  }
}

/// YOLOv8 检测器
///
/// 输出布局为 `[1, 84, 8400]`：前 4 行是中心点与宽高，后 80 行是类别分数。
pub struct YoloV8Detector {
  session: Session,
  tensor: NchwTensor<YOLOV8_INPUT_W, YOLOV8_INPUT_H>,
  confidence_threshold: f32,
  nms_threshold: f32,
}

impl YoloV8Detector {
  pub fn new(session: Session) -> Self {
    Self {
      session,
      tensor: NchwTensor::default(),
      confidence_threshold: YOLOV8_OBJECT_THRESH,
      nms_threshold: YOLOV8_NMS_THRESH,
    }
  }

  pub fn with_thresholds(mut self, confidence: f32, nms: f32) -> Self {
    self.confidence_threshold = confidence;
    self.nms_threshold = nms;
    self
  }

  pub fn session(&self) -> &Session {
    &self.session
  }
}

impl Detector for YoloV8Detector {
  type Error = YoloV8Error;

  fn detect(&mut self, frame: &EncodedFrame) -> Result<Vec<Detection>, Self::Error> {
    let surface = frame.decode()?;
    let (width, height) = surface.dimensions();

    self.tensor.fill_from(&surface);
    let output = self.session.infer(self.tensor.as_slice())?;

    let candidates = decode_output(
      output,
      width as f32 / YOLOV8_INPUT_W as f32,
      height as f32 / YOLOV8_INPUT_H as f32,
      self.confidence_threshold,
    );
    let kept = nms(candidates, self.nms_threshold);
    debug!("检测到 {} 个目标", kept.len());

    Ok(kept.into_iter().map(to_detection).collect())
  }

  fn close(&mut self) {
    self.session.close();
  }
}

fn to_detection(candidate: Candidate) -> Detection {
  let label = COCO_CLASSES
    .get(candidate.class_id)
    .copied()
    .unwrap_or("unknown");
  Detection::new(
    candidate.x1 as i32,
    candidate.y1 as i32,
    candidate.x2 as i32,
    candidate.y2 as i32,
    label,
    candidate.score,
  )
}

fn decode_output(output: &[f32], scale_x: f32, scale_y: f32, threshold: f32) -> Vec<Candidate> {
  let mut candidates = Vec::new();

  for i in 0..YOLOV8_ANCHORS {
    let (class_id, score) = (0..YOLOV8_CLASS_NUM)
      .map(|c| (c, output[(4 + c) * YOLOV8_ANCHORS + i]))
      .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

    if score < threshold {
      continue;
    }

    let cx = output[i];
    let cy = output[YOLOV8_ANCHORS + i];
    let w = output[2 * YOLOV8_ANCHORS + i];
    let h = output[3 * YOLOV8_ANCHORS + i];

    candidates.push(Candidate {
      x1: (cx - w / 2.0) * scale_x,
      y1: (cy - h / 2.0) * scale_y,
      x2: (cx + w / 2.0) * scale_x,
      y2: (cy + h / 2.0) * scale_y,
      class_id,
      score,
    });
  }

  candidates
}

/// 按类别的贪心非极大值抑制，结果按分数降序
fn nms(mut candidates: Vec<Candidate>, threshold: f32) -> Vec<Candidate> {
  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut result: Vec<Candidate> = Vec::new();
  for candidate in candidates {
    let suppressed = result
      .iter()
      .any(|kept| kept.class_id == candidate.class_id && kept.iou(&candidate) >= threshold);
    if !suppressed {
      result.push(candidate);
    }
  }
  result
}

impl FromUrlWithScheme for YoloV8Detector {
  const SCHEME: &'static str = SessionBuilder::SCHEME;
}

impl FromUrl for YoloV8Detector {
  type Error = YoloV8Error;

  /// 在会话参数之外读取 `conf` 与 `iou`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let session = SessionBuilder::from_url(url)?.build()?;

    let mut confidence = YOLOV8_OBJECT_THRESH;
    let mut iou = YOLOV8_NMS_THRESH;
    for (key, value) in url.query_pairs() {
      let target = match key.as_ref() {
        "conf" => &mut confidence,
        "iou" => &mut iou,
        _ => continue,
      };
      *target = value
        .parse()
        .map_err(|_| YoloV8Error::InvalidThreshold(format!("{}={}", key, value)))?;
    }

    Ok(YoloV8Detector::new(session).with_thresholds(confidence, iou))
  }
}
