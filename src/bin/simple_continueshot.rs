// 该文件是 Huakuang （画框） 项目的一部分。
// src/bin/simple_continueshot.rs - 逐帧推理并标注视频
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

use std::{
  path::PathBuf,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::Duration,
};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use huakuang::{
  config::{PipelineConfig, UrlFactory},
  output::draw::DEFAULT_FONT_SIZE,
  task::Pipeline,
};

/// Huakuang 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型，如 onnx:///models/yolov8n.onnx?provider=cuda&device=0
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，如 video:///input.mp4 或 image:///input.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径，如 video:///output.mp4?fourcc=MP4V
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 字体文件，缺省使用内置字体
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,
  #[arg(long, default_value_t = DEFAULT_FONT_SIZE, value_name = "SIZE")]
  pub font_size: f32,
  /// 边框点的边长（像素）
  #[arg(long, value_name = "PIXELS")]
  pub marker_size: Option<u32>,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<u64>,
  /// 逐帧检测记录（JSON lines）
  #[arg(long, value_name = "RECORD")]
  pub record: Option<PathBuf>,
}

impl From<Args> for PipelineConfig {
  fn from(args: Args) -> Self {
    PipelineConfig {
      font: args.font,
      font_size: args.font_size,
      marker_size: args.marker_size,
      max_frames: args.frame_number,
      record: args.record,
      ..PipelineConfig::new(args.model, args.input, args.output)
    }
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let config = PipelineConfig::from(Args::parse());

  info!("模型文件路径: {}", config.model);
  info!("输入来源: {}", config.input);
  info!("输出路径: {}", config.output);

  let cancel = Arc::new(AtomicBool::new(false));
  let flag = cancel.clone();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    flag.store(true, Ordering::SeqCst);
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  let report = Pipeline::from_config(&config)?
    .with_cancel_flag(cancel)
    .run(&UrlFactory::new(&config))?;

  info!(
    "共处理 {} 帧, 检测到 {} 个目标, 耗时 {:.2?}",
    report.frames, report.detections, report.elapsed
  );
  Ok(())
}
