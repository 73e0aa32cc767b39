// 该文件是 Huakuang （画框） 项目的一部分。
// src/bin/simple.rs - 简单的图像推理代码
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

use anyhow::{Context, Result};
use clap::Parser;
use url::Url;

use huakuang::{
  FromUrl,
  frame::EncodedFrame,
  model::{Detector, YoloV8Detector},
  output::draw::{DEFAULT_FONT_SIZE, Renderer, TextBrush},
};
use tracing::info;

/// Huakuang 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型，如 onnx:///models/yolov8n.onnx
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像
  #[arg(long, value_name = "SOURCE")]
  pub input: PathBuf,
  /// 输出图像，始终为 JPEG
  #[arg(long, value_name = "OUTPUT")]
  pub output: PathBuf,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input.display());
  info!("输出路径: {}", args.output.display());

  let mut model = YoloV8Detector::from_url(&args.model)?;
  let frame = std::fs::read(&args.input)
    .map(EncodedFrame::from)
    .with_context(|| format!("无法读取 {}", args.input.display()))?;

  info!("开始推理...");
  let now = std::time::Instant::now();
  let detections = model.detect(&frame)?;
  info!("推理完成，耗时: {:.2?}, {} 个目标", now.elapsed(), detections.len());
  model.close();

  let renderer = Renderer::new(TextBrush::embedded(DEFAULT_FONT_SIZE)?);
  renderer.annotate_image_file(&args.input, &args.output, &detections)?;

  Ok(())
}
