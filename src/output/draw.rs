// 该文件是 Huakuang （画框） 项目的一部分。
// src/output/draw.rs - 检测结果标注
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

//! 在画布上画点线边框和文字标签。
//!
//! 边框由逐像素打点组成：上下边在 `x1..x2` 的每个整数 x 处各打一点，
//! 左右边在 `y1..y2` 的每个整数 y 处各打一点。所有边框画完后再统一画标签，
//! 标签位于 `(x1, y1 - 70)` 与 `(x1, y1 - 30)`，超出画布的部分直接裁掉。

use std::path::{Path, PathBuf};

use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use image::{Rgba, RgbaImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::{EncodedFrame, FrameError, ImageFormat},
  model::Detection,
};

/// 边框颜色（绿）
pub const BORDER_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);
/// 标签颜色（红）
pub const LABEL_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);

const LABEL_LINE_OFFSET: i32 = 70;
const PROBABILITY_LINE_OFFSET: i32 = 30;

pub const DEFAULT_FONT_SIZE: f32 = 30.0;
const DEFAULT_ADVANCE_WIDTH: f32 = 20.0;
const DEFAULT_MARKER_SIZE: u32 = 2;
const MAX_MARKER_SIZE: u32 = 64;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法读取字体文件 {path}: {source}")]
  FontIo {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("无法解析字体 {0}")]
  Font(String),
  #[error("无法读取图像文件 {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error(transparent)]
  Frame(#[from] FrameError),
}

/// 文字画笔：字体、字号与缺省字宽
///
/// 构造后不可变，颜色由每次绘制调用显式给出。
#[derive(Clone)]
pub struct TextBrush {
  font: FontArc,
  scale: PxScale,
  advance_width: f32,
}

impl TextBrush {
  /// 使用内置的 DejaVu Sans
  pub fn embedded(size: f32) -> Result<Self, DrawError> {
    let font_data: &'static [u8] = include_bytes!("../../assets/font.ttf");
    let font = FontArc::try_from_slice(font_data)
      .map_err(|e| DrawError::Font(format!("内置字体: {}", e)))?;
    Ok(Self::with_font(font, size))
  }

  pub fn from_file(path: impl AsRef<Path>, size: f32) -> Result<Self, DrawError> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|source| DrawError::FontIo {
      path: path.to_path_buf(),
      source,
    })?;
    let font =
      FontArc::try_from_vec(data).map_err(|e| DrawError::Font(format!("{}: {}", path.display(), e)))?;
    Ok(Self::with_font(font, size))
  }

  fn with_font(font: FontArc, size: f32) -> Self {
    Self {
      font,
      scale: PxScale::from(size),
      advance_width: DEFAULT_ADVANCE_WIDTH,
    }
  }

  /// 字体缺字时使用的字宽
  pub fn with_advance_width(mut self, advance_width: f32) -> Self {
    self.advance_width = advance_width;
    self
  }

  pub fn size(&self) -> f32 {
    self.scale.y
  }

  /// 估算文本宽度（像素）
  pub fn measure(&self, text: &str) -> f32 {
    let scaled = self.font.as_scaled(self.scale);
    text
      .chars()
      .map(|c| {
        let glyph = scaled.glyph_id(c);
        if glyph.0 == 0 {
          self.advance_width
        } else {
          scaled.h_advance(glyph)
        }
      })
      .sum()
  }
}

/// 光栅化能力
pub trait Canvas {
  fn width(&self) -> u32;
  fn height(&self) -> u32;

  /// 打一个 `size`×`size` 的方点，`(x, y)` 是方点右下角
  fn stamp_marker(&mut self, x: i32, y: i32, size: u32, color: Rgba<u8>);

  /// 文本左上角位于 `(x, y)`，超出画布的部分被裁掉
  fn draw_text(&mut self, x: i32, y: i32, text: &str, brush: &TextBrush, color: Rgba<u8>);
}

impl Canvas for RgbaImage {
  fn width(&self) -> u32 {
    self.dimensions().0
  }

  fn height(&self) -> u32 {
    self.dimensions().1
  }

  fn stamp_marker(&mut self, x: i32, y: i32, size: u32, color: Rgba<u8>) {
    let offset = size as i32 - 1;
    let rect = Rect::at(x - offset, y - offset).of_size(size, size);
    draw_filled_rect_mut(self, rect, color);
  }

  fn draw_text(&mut self, x: i32, y: i32, text: &str, brush: &TextBrush, color: Rgba<u8>) {
    draw_text_mut(self, color, x, y, brush.scale, &brush.font, text);
  }
}

/// 标注渲染器
#[derive(Clone)]
pub struct Renderer {
  brush: TextBrush,
  marker_size: u32,
}

impl Renderer {
  pub fn new(brush: TextBrush) -> Self {
    Self {
      brush,
      marker_size: DEFAULT_MARKER_SIZE,
    }
  }

  /// 标记边长限制在 1 到 64 像素之间
  pub fn with_marker_size(mut self, marker_size: u32) -> Self {
    self.marker_size = marker_size.clamp(1, MAX_MARKER_SIZE);
    self
  }

  pub fn brush(&self) -> &TextBrush {
    &self.brush
  }

  pub fn marker_size(&self) -> u32 {
    self.marker_size
  }

  /// 画出所有检测框，再画出所有标签
  ///
  /// 标签按传入顺序绘制，后画的覆盖先画的。退化的框（`x1 >= x2` 或 `y1 >= y2`）
  /// 只画出对应的退化边，不报错。
  pub fn draw_boxes<C: Canvas + ?Sized>(&self, canvas: &mut C, detections: &[Detection]) {
    for detection in detections {
      self.draw_border(canvas, detection);
    }

    for detection in detections {
      let label = format!("类型 {}", detection.label);
      let probability = format!("精度 {:.2}", detection.probability);
      canvas.draw_text(
        detection.x1,
        detection.y1 - LABEL_LINE_OFFSET,
        &label,
        &self.brush,
        LABEL_COLOR,
      );
      canvas.draw_text(
        detection.x1,
        detection.y1 - PROBABILITY_LINE_OFFSET,
        &probability,
        &self.brush,
        LABEL_COLOR,
      );
    }
  }

  fn draw_border<C: Canvas + ?Sized>(&self, canvas: &mut C, detection: &Detection) {
    let Detection { x1, y1, x2, y2, .. } = *detection;
    for x in x1..x2 {
      canvas.stamp_marker(x, y1, self.marker_size, BORDER_COLOR);
      canvas.stamp_marker(x, y2, self.marker_size, BORDER_COLOR);
    }
    for y in y1..y2 {
      canvas.stamp_marker(x1, y, self.marker_size, BORDER_COLOR);
      canvas.stamp_marker(x2, y, self.marker_size, BORDER_COLOR);
    }
  }

  /// 在任意位置画文字，不画边框；颜色缺省为标签红
  pub fn draw_text<C, S>(&self, canvas: &mut C, items: &[(S, i32, i32)], color: Option<Rgba<u8>>)
  where
    C: Canvas + ?Sized,
    S: AsRef<str>,
  {
    let color = color.unwrap_or(LABEL_COLOR);
    for (text, x, y) in items {
      let text = text.as_ref();
      let right = *x as f32 + self.brush.measure(text);
      if right > canvas.width() as f32 || *y < 0 || *y >= canvas.height() as i32 {
        debug!("文字 {:?} 超出画布，将被裁剪", text);
      }
      canvas.draw_text(*x, *y, text, &self.brush, color);
    }
  }

  /// 解码、画框、按 `format` 重新编码
  pub fn annotate(
    &self,
    frame: &EncodedFrame,
    detections: &[Detection],
    format: ImageFormat,
  ) -> Result<EncodedFrame, DrawError> {
    let mut surface = decode_to_surface(frame)?;
    self.draw_boxes(&mut surface, detections);
    encode_to_bytes(&surface, format)
  }

  /// 读取图像文件，画框后以 JPEG 写出
  pub fn annotate_image_file(
    &self,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    detections: &[Detection],
  ) -> Result<(), DrawError> {
    let frame = read_frame(input.as_ref())?;
    let annotated = self.annotate(&frame, detections, ImageFormat::Jpeg)?;
    write_frame(output.as_ref(), &annotated)
  }

  /// 读取图像文件，写上文字后以 JPEG 写出
  pub fn caption_image_file<S: AsRef<str>>(
    &self,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    items: &[(S, i32, i32)],
    color: Option<Rgba<u8>>,
  ) -> Result<(), DrawError> {
    let frame = read_frame(input.as_ref())?;
    let mut surface = decode_to_surface(&frame)?;
    self.draw_text(&mut surface, items, color);
    write_frame(output.as_ref(), &encode_to_bytes(&surface, ImageFormat::Jpeg)?)
  }
}

/// 按内容判定格式并解码为画布
pub fn decode_to_surface(frame: &EncodedFrame) -> Result<RgbaImage, DrawError> {
  Ok(frame.decode()?)
}

pub fn encode_to_bytes(surface: &RgbaImage, format: ImageFormat) -> Result<EncodedFrame, DrawError> {
  Ok(EncodedFrame::encode(surface, format)?)
}

fn read_frame(path: &Path) -> Result<EncodedFrame, DrawError> {
  std::fs::read(path)
    .map(EncodedFrame::from)
    .map_err(|source| DrawError::Io {
      path: path.to_path_buf(),
      source,
    })
}

fn write_frame(path: &Path, frame: &EncodedFrame) -> Result<(), DrawError> {
  std::fs::write(path, frame.as_ref()).map_err(|source| DrawError::Io {
    path: path.to_path_buf(),
    source,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  /// 只记录调用的画布
  #[derive(Default)]
  struct RecordingCanvas {
    markers: Vec<(i32, i32)>,
    texts: Vec<(i32, i32, String, Rgba<u8>)>,
    calls: Vec<&'static str>,
  }

  impl Canvas for RecordingCanvas {
    fn width(&self) -> u32 {
      200
    }

    fn height(&self) -> u32 {
      200
    }

    fn stamp_marker(&mut self, x: i32, y: i32, _size: u32, color: Rgba<u8>) {
      assert_eq!(color, BORDER_COLOR);
      self.markers.push((x, y));
      self.calls.push("marker");
    }

    fn draw_text(&mut self, x: i32, y: i32, text: &str, _brush: &TextBrush, color: Rgba<u8>) {
      self.texts.push((x, y, text.to_string(), color));
      self.calls.push("text");
    }
  }

  fn renderer() -> Renderer {
    Renderer::new(TextBrush::embedded(DEFAULT_FONT_SIZE).unwrap())
  }

  #[test]
  fn marker_count_is_the_perimeter() {
    let renderer = renderer();
    for (x1, y1, x2, y2) in [(10, 10, 50, 50), (0, 5, 1, 6), (3, 100, 90, 180)] {
      let mut canvas = RecordingCanvas::default();
      renderer.draw_boxes(&mut canvas, &[Detection::new(x1, y1, x2, y2, "cat", 0.9)]);
      let expected = 2 * (x2 - x1) + 2 * (y2 - y1);
      assert_eq!(canvas.markers.len(), expected as usize);
    }
  }

  #[test]
  fn degenerate_box_draws_no_markers() {
    let mut canvas = RecordingCanvas::default();
    renderer().draw_boxes(&mut canvas, &[Detection::new(50, 50, 10, 10, "cat", 0.9)]);
    assert!(canvas.markers.is_empty());
    assert_eq!(canvas.texts.len(), 2);
  }

  #[test]
  fn label_lines_sit_above_the_box() {
    let mut canvas = RecordingCanvas::default();
    renderer().draw_boxes(
      &mut canvas,
      &[Detection::new(60, 100, 120, 150, "dog", 0.5)],
    );
    assert_eq!(
      canvas.texts,
      vec![
        (60, 30, "类型 dog".to_string(), LABEL_COLOR),
        (60, 70, "精度 0.50".to_string(), LABEL_COLOR),
      ]
    );
  }

  #[test]
  fn probability_is_printed_verbatim() {
    let mut canvas = RecordingCanvas::default();
    renderer().draw_boxes(&mut canvas, &[Detection::new(0, 0, 1, 1, "odd", 1.2345)]);
    assert_eq!(canvas.texts[1].2, "精度 1.23");
  }

  #[test]
  fn borders_come_before_labels_in_given_order() {
    let mut canvas = RecordingCanvas::default();
    renderer().draw_boxes(
      &mut canvas,
      &[
        Detection::new(10, 10, 12, 12, "cat", 0.91),
        Detection::new(60, 60, 62, 62, "dog", 0.5),
      ],
    );

    let first_text = canvas.calls.iter().position(|c| *c == "text").unwrap();
    assert_eq!(first_text, canvas.markers.len());
    let labels: Vec<_> = canvas.texts.iter().map(|t| t.2.as_str()).collect();
    assert_eq!(labels, ["类型 cat", "精度 0.91", "类型 dog", "精度 0.50"]);
  }

  #[test]
  fn corner_pixels_take_the_border_color() {
    let mut surface = RgbaImage::from_pixel(200, 200, Rgba([0, 0, 0, 255]));
    renderer().draw_boxes(
      &mut surface,
      &[
        Detection::new(10, 10, 50, 50, "cat", 0.91),
        Detection::new(60, 60, 100, 100, "dog", 0.5),
      ],
    );

    for (x, y) in [(10, 10), (49, 10), (10, 49), (49, 49)] {
      assert_eq!(*surface.get_pixel(x, y), BORDER_COLOR, "({}, {})", x, y);
    }
    assert_eq!(*surface.get_pixel(30, 30), Rgba([0, 0, 0, 255]));
  }

  #[test]
  fn label_bands_land_above_the_box_on_a_surface() {
    let mut surface = RgbaImage::from_pixel(200, 200, Rgba([0, 0, 0, 255]));
    renderer().draw_boxes(&mut surface, &[Detection::new(20, 120, 60, 160, "dog", 0.5)]);

    let red_in = |rows: std::ops::Range<u32>| {
      rows
        .flat_map(|y| (20..200).map(move |x| (x, y)))
        .any(|(x, y)| surface.get_pixel(x, y)[0] > 0)
    };
    // 类型行从 y1 - 70 = 50 开始，精度行从 y1 - 30 = 90 开始
    assert!(red_in(50..90));
    assert!(red_in(90..120));
    assert!(!red_in(0..45));
  }

  #[test]
  fn marker_size_is_clamped() {
    let brush = TextBrush::embedded(DEFAULT_FONT_SIZE).unwrap();
    assert_eq!(Renderer::new(brush.clone()).with_marker_size(0).marker_size(), 1);
    let renderer = Renderer::new(brush).with_marker_size(u32::MAX);
    assert_eq!(renderer.marker_size(), MAX_MARKER_SIZE);

    let mut surface = RgbaImage::from_pixel(16, 16, Rgba([0, 0, 0, 255]));
    renderer.draw_boxes(&mut surface, &[Detection::new(2, 2, 6, 6, "cat", 0.9)]);
    assert_eq!(*surface.get_pixel(0, 0), BORDER_COLOR);
  }

  #[test]
  fn caption_uses_override_color() {
    let mut canvas = RecordingCanvas::default();
    let renderer = renderer();
    let blue = Rgba([0, 0, 255, 255]);
    renderer.draw_text(&mut canvas, &[("hello", 5, 6), ("world", 5, 40)], Some(blue));
    renderer.draw_text(&mut canvas, &[("plain".to_string(), 0, 0)], None);

    assert!(canvas.markers.is_empty());
    assert_eq!(canvas.texts[0], (5, 6, "hello".to_string(), blue));
    assert_eq!(canvas.texts[1].3, blue);
    assert_eq!(canvas.texts[2].3, LABEL_COLOR);
  }

  #[test]
  fn measure_grows_with_text() {
    let brush = TextBrush::embedded(DEFAULT_FONT_SIZE).unwrap();
    assert_eq!(brush.measure(""), 0.0);
    assert!(brush.measure("cat") > 0.0);
    assert!(brush.measure("giraffe") > brush.measure("cat"));
  }

  #[test]
  fn bad_font_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("font.ttf");
    std::fs::write(&path, b"not a font").unwrap();
    assert!(matches!(
      TextBrush::from_file(&path, 12.0),
      Err(DrawError::Font(_))
    ));
    assert!(matches!(
      TextBrush::from_file(dir.path().join("missing.ttf"), 12.0),
      Err(DrawError::FontIo { .. })
    ));
  }

  #[test]
  fn unknown_encoding_is_a_format_error() {
    let frame = EncodedFrame::from(b"BM\x00\x00".to_vec());
    assert!(matches!(
      decode_to_surface(&frame),
      Err(DrawError::Frame(FrameError::UnsupportedFormat))
    ));
  }

  #[test]
  fn annotate_image_file_writes_jpeg() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.png");
    let output = dir.path().join("out.jpg");
    let surface = RgbaImage::from_pixel(120, 120, Rgba([255, 255, 255, 255]));
    std::fs::write(
      &input,
      encode_to_bytes(&surface, ImageFormat::Png).unwrap().as_ref(),
    )
    .unwrap();

    renderer()
      .annotate_image_file(&input, &output, &[Detection::new(20, 90, 60, 110, "cup", 0.77)])
      .unwrap();

    let written = EncodedFrame::from(std::fs::read(&output).unwrap());
    assert_eq!(written.format(), Some(ImageFormat::Jpeg));
    assert_eq!(written.decode().unwrap().dimensions(), (120, 120));
  }
}
