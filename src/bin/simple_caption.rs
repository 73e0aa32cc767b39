// 该文件是 Huakuang （画框） 项目的一部分。
// src/bin/simple_caption.rs - 在图像上写字
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

use anyhow::{Result, anyhow};
use clap::Parser;
use image::Rgba;
use tracing::info;

use huakuang::output::draw::{DEFAULT_FONT_SIZE, Renderer, TextBrush};

/// 解析 `文本@x,y`
fn parse_caption(value: &str) -> Result<(String, i32, i32)> {
  let (text, position) = value
    .rsplit_once('@')
    .ok_or_else(|| anyhow!("缺少位置，格式为 文本@x,y"))?;
  let (x, y) = position
    .split_once(',')
    .ok_or_else(|| anyhow!("位置格式为 x,y"))?;
  Ok((text.to_string(), x.trim().parse()?, y.trim().parse()?))
}

/// 解析 `r,g,b`
fn parse_color(value: &str) -> Result<Rgba<u8>> {
  let channels = value
    .split(',')
    .map(|c| c.trim().parse::<u8>())
    .collect::<Result<Vec<_>, _>>()?;
  match channels.as_slice() {
    [r, g, b] => Ok(Rgba([*r, *g, *b, 255])),
    _ => Err(anyhow!("颜色格式为 r,g,b")),
  }
}

/// Huakuang 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图像（JPEG / PNG / GIF）
  #[arg(long, value_name = "INPUT")]
  pub input: PathBuf,
  /// 输出图像，始终为 JPEG
  #[arg(long, value_name = "OUTPUT")]
  pub output: PathBuf,
  /// 文字与位置，如 "hello@10,40"，可重复
  #[arg(long = "text", value_name = "TEXT@X,Y", value_parser = parse_caption, required = true)]
  pub captions: Vec<(String, i32, i32)>,
  /// 文字颜色 r,g,b，缺省为红色
  #[arg(long, value_name = "R,G,B", value_parser = parse_color)]
  pub color: Option<Rgba<u8>>,

  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,
  #[arg(long, default_value_t = DEFAULT_FONT_SIZE, value_name = "SIZE")]
  pub font_size: f32,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  let brush = match &args.font {
    Some(path) => TextBrush::from_file(path, args.font_size)?,
    None => TextBrush::embedded(args.font_size)?,
  };
  let renderer = Renderer::new(brush);

  info!("输入图像: {}", args.input.display());
  renderer.caption_image_file(&args.input, &args.output, &args.captions, args.color)?;
  info!("输出图像: {}", args.output.display());

  Ok(())
}
