// 该文件是 Huakuang （画框） 项目的一部分。
// src/config.rs - 运行配置
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

use std::path::PathBuf;

use url::Url;

use crate::output::{
  FrameGeometry,
  draw::{DEFAULT_FONT_SIZE, DrawError, Renderer, TextBrush},
};

/// 一次运行的全部配置，启动时构造，之后只读
#[derive(Debug, Clone)]
pub struct PipelineConfig {
  /// `onnx:///path/model.onnx?provider=cuda&device=0&conf=0.5&iou=0.7`
  pub model: Url,
  /// `video:///input.mp4` 或 `image:///input.jpg`
  pub input: Url,
  /// `video:///output.mp4?fourcc=MP4V` 或 `image:///output.jpg`
  pub output: Url,
  /// 缺省使用内置字体
  pub font: Option<PathBuf>,
  pub font_size: f32,
  pub marker_size: Option<u32>,
  pub max_frames: Option<u64>,
  /// JSON lines 检测记录
  pub record: Option<PathBuf>,
}

impl PipelineConfig {
  pub fn new(model: Url, input: Url, output: Url) -> Self {
    Self {
      model,
      input,
      output,
      font: None,
      font_size: DEFAULT_FONT_SIZE,
      marker_size: None,
      max_frames: None,
      record: None,
    }
  }

  pub fn renderer(&self) -> Result<Renderer, DrawError> {
    let brush = match &self.font {
      Some(path) => TextBrush::from_file(path, self.font_size)?,
      None => TextBrush::embedded(self.font_size)?,
    };
    let renderer = Renderer::new(brush);
    Ok(match self.marker_size {
      Some(size) => renderer.with_marker_size(size),
      None => renderer,
    })
  }
}

/// 按固定顺序打开输入、输出与检测器
///
/// 流水线只通过这个接口获取资源，测试可以替换为内存实现。
pub trait ResourceFactory {
  type Source;
  type Sink;
  type Detector;

  fn open_source(&self) -> anyhow::Result<Self::Source>;
  /// 输出几何参数取自已打开的输入
  fn open_sink(&self, geometry: FrameGeometry) -> anyhow::Result<Self::Sink>;
  fn open_detector(&self) -> anyhow::Result<Self::Detector>;
}

#[cfg(feature = "onnx")]
mod url_factory {
  use anyhow::Context;

  use super::{PipelineConfig, ResourceFactory};
  use crate::{
    FromUrl,
    input::InputWrapper,
    model::YoloV8Detector,
    output::{FrameGeometry, OutputWrapper},
  };

  /// 由配置中的 URL 打开真实资源
  pub struct UrlFactory<'a> {
    config: &'a PipelineConfig,
  }

  impl<'a> UrlFactory<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
      Self { config }
    }
  }

  impl ResourceFactory for UrlFactory<'_> {
    type Source = InputWrapper;
    type Sink = OutputWrapper;
    type Detector = YoloV8Detector;

    fn open_source(&self) -> anyhow::Result<Self::Source> {
      InputWrapper::from_url(&self.config.input)
        .with_context(|| format!("无法打开输入 {}", self.config.input))
    }

    fn open_sink(&self, geometry: FrameGeometry) -> anyhow::Result<Self::Sink> {
      OutputWrapper::open(&self.config.output, geometry)
        .with_context(|| format!("无法打开输出 {}", self.config.output))
    }

    fn open_detector(&self) -> anyhow::Result<Self::Detector> {
      YoloV8Detector::from_url(&self.config.model)
        .with_context(|| format!("无法加载模型 {}", self.config.model))
    }
  }
}

#[cfg(feature = "onnx")]
pub use self::url_factory::UrlFactory;

#[cfg(test)]
mod tests {
  use super::*;

  fn config() -> PipelineConfig {
    PipelineConfig::new(
      Url::parse("onnx:///models/yolov8n.onnx").unwrap(),
      Url::parse("video:///in.mp4").unwrap(),
      Url::parse("video:///out.mp4").unwrap(),
    )
  }

  #[test]
  fn default_renderer_uses_embedded_font() {
    let renderer = config().renderer().unwrap();
    assert_eq!(renderer.brush().size(), DEFAULT_FONT_SIZE);
    assert_eq!(renderer.marker_size(), 2);
  }

  #[test]
  fn marker_size_is_at_least_one() {
    let mut config = config();
    config.marker_size = Some(0);
    assert_eq!(config.renderer().unwrap().marker_size(), 1);
  }

  #[test]
  fn missing_font_fails() {
    let mut config = config();
    config.font = Some(PathBuf::from("/nonexistent/font.ttf"));
    assert!(matches!(config.renderer(), Err(DrawError::FontIo { .. })));
  }
}
