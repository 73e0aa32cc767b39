// 该文件是 Huakuang （画框） 项目的一部分。
// src/model.rs - 模型与检测结果
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

use crate::frame::EncodedFrame;

/// 单帧中的一个检测目标
///
/// 坐标为像素坐标。`x1 < x2`、`y1 < y2` 与概率范围均不做校验，
/// 退化的框只会画出退化的边框。
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub x1: i32,
  pub y1: i32,
  pub x2: i32,
  pub y2: i32,
  pub label: String,
  pub probability: f32,
}

impl Detection {
  pub fn new(x1: i32, y1: i32, x2: i32, y2: i32, label: impl Into<String>, probability: f32) -> Self {
    Self {
      x1,
      y1,
      x2,
      y2,
      label: label.into(),
      probability,
    }
  }
}

/// 上游检测器：编码帧进，检测结果出
pub trait Detector {
  type Error;

  fn detect(&mut self, frame: &EncodedFrame) -> Result<Vec<Detection>, Self::Error>;

  /// 释放模型资源，重复调用安全
  fn close(&mut self) {}
}

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

#[cfg(feature = "onnx")]
pub mod session;
#[cfg(feature = "onnx")]
pub use self::session::{ExecutionProvider, Session, SessionBuilder, SessionError};

#[cfg(feature = "onnx")]
mod yolov8;
#[cfg(feature = "onnx")]
pub use self::yolov8::{YoloV8Detector, YoloV8Error};
