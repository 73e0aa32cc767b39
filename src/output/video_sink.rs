// 该文件是 Huakuang （画框） 项目的一部分。
// src/output/video_sink.rs - GStreamer 视频文件输出
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

//! # GStreamer 视频文件输出模块
//!
//! 把编码帧解码回像素后逐帧写入视频文件。
//!
//! ## 编码标识
//!
//! | FourCC | 编码 | GStreamer 元素 |
//! |---|---|---|
//! | `MP4V` `FMP4` `DIVX` `XVID` | MPEG-4 Part 2 | `avenc_mpeg4` |
//! | `H264` `AVC1` `X264` | H.264 | `x264enc` |
//! | `MJPG` | Motion JPEG | `jpegenc` |
//! | `VP80` | VP8 | `vp8enc` |
//!
//! 容器由扩展名决定：`mp4` `m4v` `mov` `mkv` `avi` `webm`。
//!
//! ## URL Scheme
//!
//! `video:///output.mp4?fourcc=MP4V&color=true`
//!
//! 编码标识和容器在创建任何文件之前校验，不支持的组合不会在磁盘上留下文件。

use std::path::{Path, PathBuf};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::DynamicImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::{EncodedFrame, FrameError},
  output::{FrameGeometry, FrameSink},
};

const FINALIZE_TIMEOUT_SECS: u64 = 10;

/// GStreamer 视频输出错误类型
#[derive(Error, Debug)]
pub enum VideoSinkError {
  #[error("不支持的编码标识: {0}")]
  UnsupportedFourcc(String),
  #[error("不支持的视频容器: {0}")]
  UnsupportedContainer(PathBuf),
  #[error("编码 {fourcc} 不能写入 {container} 容器")]
  Incompatible {
    fourcc: Fourcc,
    container: &'static str,
  },
  #[error("无效的帧参数: {0}")]
  InvalidGeometry(String),
  /// 编码器缺失或管道无法启动
  #[error("无法打开视频输出 {path}: {reason}")]
  Open { path: PathBuf, reason: String },
  #[error("写入帧失败: {0}")]
  FrameWrite(String),
  #[error("帧解码失败: {0}")]
  Decode(#[from] FrameError),
  #[error("视频输出已关闭")]
  WriterClosed,
  #[error("视频文件收尾失败: {0}")]
  Finalize(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Codec {
  Mpeg4,
  H264,
  Mjpeg,
  Vp8,
}

impl Codec {
  fn encoder(self) -> &'static str {
    match self {
      Codec::Mpeg4 => "avenc_mpeg4",
      Codec::H264 => "x264enc",
      Codec::Mjpeg => "jpegenc",
      Codec::Vp8 => "vp8enc",
    }
  }

  fn encoder_description(self) -> &'static str {
    match self {
      Codec::Mpeg4 => "avenc_mpeg4 ! mpeg4videoparse",
      Codec::H264 => "x264enc speed-preset=fast ! h264parse",
      Codec::Mjpeg => "jpegenc",
      Codec::Vp8 => "vp8enc deadline=1",
    }
  }
}

/// 四字符编码标识
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fourcc {
  code: [u8; 4],
  codec: Codec,
}

impl Fourcc {
  pub fn parse(code: &str) -> Result<Self, VideoSinkError> {
    let upper = code.to_ascii_uppercase();
    let codec = match upper.as_str() {
      "MP4V" | "FMP4" | "DIVX" | "XVID" => Codec::Mpeg4,
      "H264" | "AVC1" | "X264" => Codec::H264,
      "MJPG" => Codec::Mjpeg,
      "VP80" => Codec::Vp8,
      _ => return Err(VideoSinkError::UnsupportedFourcc(code.to_string())),
    };
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(upper.as_bytes());
    Ok(Self { code: bytes, codec })
  }

  pub fn as_str(&self) -> &str {
    std::str::from_utf8(&self.code).unwrap_or("????")
  }
}

impl Default for Fourcc {
  fn default() -> Self {
    Self {
      code: *b"MP4V",
      codec: Codec::Mpeg4,
    }
  }
}

impl std::fmt::Display for Fourcc {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
  Mp4,
  Mov,
  Matroska,
  Avi,
  WebM,
}

impl Container {
  fn from_path(path: &Path) -> Result<Self, VideoSinkError> {
    let extension = path
      .extension()
      .and_then(|ext| ext.to_str())
      .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
      Some("mp4") | Some("m4v") => Ok(Container::Mp4),
      Some("mov") => Ok(Container::Mov),
      Some("mkv") => Ok(Container::Matroska),
      Some("avi") => Ok(Container::Avi),
      Some("webm") => Ok(Container::WebM),
      _ => Err(VideoSinkError::UnsupportedContainer(path.to_path_buf())),
    }
  }

  fn muxer(self) -> &'static str {
    match self {
      Container::Mp4 => "mp4mux",
      Container::Mov => "qtmux",
      Container::Matroska => "matroskamux",
      Container::Avi => "avimux",
      Container::WebM => "webmmux",
    }
  }

  fn accepts(self, codec: Codec) -> bool {
    match self {
      Container::WebM => codec == Codec::Vp8,
      Container::Mp4 | Container::Mov => codec != Codec::Vp8,
      Container::Matroska | Container::Avi => true,
    }
  }
}

/// appsrc 缓冲的行布局，行尾按 caps 要求补齐
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RowLayout {
  /// 每行有效字节
  row: usize,
  /// 每行实际占用字节
  stride: usize,
  height: usize,
  /// 整帧字节
  size: usize,
}

impl RowLayout {
  fn from_info(info: &gst_video::VideoInfo) -> Self {
    let channels = if info.format() == gst_video::VideoFormat::Rgb { 3 } else { 1 };
    Self {
      row: info.width() as usize * channels,
      stride: info.stride()[0] as usize,
      height: info.height() as usize,
      size: info.size(),
    }
  }

  /// 把紧密排列的像素行拷进按 stride 对齐的缓冲
  fn pad_rows(&self, packed: &[u8]) -> Result<Vec<u8>, VideoSinkError> {
    if packed.len() != self.row * self.height
      || self.stride < self.row
      || self.size < self.stride * (self.height.saturating_sub(1)) + self.row
    {
      return Err(VideoSinkError::FrameWrite(format!(
        "像素数据 {} 字节与行布局 {:?} 不一致",
        packed.len(),
        self
      )));
    }

    let mut padded = vec![0u8; self.size];
    for (y, line) in packed.chunks_exact(self.row).enumerate() {
      let start = y * self.stride;
      padded[start..start + self.row].copy_from_slice(line);
    }
    Ok(padded)
  }
}

/// GStreamer 视频文件输出
///
/// 几何参数在打开时固定，写入的每一帧都必须与之一致。
pub struct VideoSink {
  path: PathBuf,
  pipeline: Option<gst::Pipeline>,
  appsrc: gst_app::AppSrc,
  geometry: FrameGeometry,
  fourcc: Fourcc,
  is_color: bool,
  layout: RowLayout,
  frame_count: u64,
}

impl VideoSink {
  pub const SCHEME: &'static str = "video";

  pub fn open(
    path: impl AsRef<Path>,
    geometry: FrameGeometry,
    fourcc: Fourcc,
    is_color: bool,
  ) -> Result<Self, VideoSinkError> {
    let path = path.as_ref().to_path_buf();

    let container = Container::from_path(&path)?;
    if !container.accepts(fourcc.codec) {
      return Err(VideoSinkError::Incompatible {
        fourcc,
        container: container.muxer(),
      });
    }
    if geometry.width == 0 || geometry.height == 0 {
      return Err(VideoSinkError::InvalidGeometry(format!(
        "{}x{}",
        geometry.width, geometry.height
      )));
    }
    if !geometry.fps.is_finite() || geometry.fps <= 0.0 {
      return Err(VideoSinkError::InvalidGeometry(format!(
        "fps = {}",
        geometry.fps
      )));
    }

    let open_error = |reason: String| VideoSinkError::Open {
      path: path.clone(),
      reason,
    };
    let location = path
      .to_str()
      .ok_or_else(|| open_error("路径不是有效的 UTF-8".to_string()))?;

    gst::init().map_err(|e| open_error(e.to_string()))?;
    for element in [fourcc.codec.encoder(), container.muxer()] {
      if gst::ElementFactory::find(element).is_none() {
        return Err(open_error(format!("缺少 GStreamer 元素 {}", element)));
      }
    }

    let description = format!(
      "appsrc name=src ! videoconvert ! {} ! {} ! filesink name=dst",
      fourcc.codec.encoder_description(),
      container.muxer()
    );
    info!("Creating video output pipeline: {}", description);

    let pipeline = gst::parse::launch(&description)
      .map_err(|e| open_error(e.to_string()))?
      .downcast::<gst::Pipeline>()
      .map_err(|_| open_error("Failed to create pipeline".to_string()))?;

    pipeline
      .by_name("dst")
      .ok_or_else(|| open_error("Failed to get filesink element".to_string()))?
      .set_property("location", location);

    let appsrc = pipeline
      .by_name("src")
      .ok_or_else(|| open_error("Failed to get appsrc element".to_string()))?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| open_error("Failed to convert element to appsrc".to_string()))?;

    let fps_millis = (geometry.fps * 1000.0).round() as i32;
    let format = if is_color {
      gst_video::VideoFormat::Rgb
    } else {
      gst_video::VideoFormat::Gray8
    };
    let video_info = gst_video::VideoInfo::builder(format, geometry.width, geometry.height)
      .fps(gst::Fraction::new(fps_millis, 1000))
      .build()
      .map_err(|e| open_error(e.to_string()))?;
    let caps = video_info
      .to_caps()
      .map_err(|e| open_error(e.to_string()))?;
    let layout = RowLayout::from_info(&video_info);
    debug!("appsrc 行布局: {:?}", layout);
    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    if let Err(e) = pipeline.set_state(gst::State::Playing) {
      let _ = pipeline.set_state(gst::State::Null);
      return Err(open_error(e.to_string()));
    }

    info!(
      "Video output initialized: {}x{} @ {:.2} fps, {} -> {}",
      geometry.width,
      geometry.height,
      geometry.fps,
      fourcc,
      path.display()
    );

    Ok(Self {
      path,
      pipeline: Some(pipeline),
      appsrc,
      geometry,
      fourcc,
      is_color,
      layout,
      frame_count: 0,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn fourcc(&self) -> Fourcc {
    self.fourcc
  }

  pub fn frame_count(&self) -> u64 {
    self.frame_count
  }

  fn raster(&self, frame: &EncodedFrame) -> Result<Vec<u8>, VideoSinkError> {
    let surface = frame.decode()?;
    if surface.dimensions() != (self.geometry.width, self.geometry.height) {
      return Err(VideoSinkError::FrameWrite(format!(
        "帧尺寸 {}x{} 与输出 {}x{} 不一致",
        surface.width(),
        surface.height(),
        self.geometry.width,
        self.geometry.height
      )));
    }
    let surface = DynamicImage::ImageRgba8(surface);
    let packed = if self.is_color {
      surface.into_rgb8().into_raw()
    } else {
      surface.into_luma8().into_raw()
    };
    self.layout.pad_rows(&packed)
  }

  fn timestamp(&self, index: u64) -> gst::ClockTime {
    gst::ClockTime::from_nseconds((index as f64 * 1e9 / self.geometry.fps) as u64)
  }
}

fn pending_error(pipeline: &gst::Pipeline) -> Option<String> {
  let bus = pipeline.bus()?;
  let message = bus.pop_filtered(&[gst::MessageType::Error])?;
  match message.view() {
    gst::MessageView::Error(err) => Some(format!("{} ({:?})", err.error(), err.debug())),
    _ => None,
  }
}

impl FrameSink for VideoSink {
  type Error = VideoSinkError;

  fn write_frame(&mut self, frame: &EncodedFrame) -> Result<(), Self::Error> {
    let Some(pipeline) = self.pipeline.as_ref() else {
      return Err(VideoSinkError::WriterClosed);
    };

    let data = self.raster(frame)?;
    let mut buffer = gst::Buffer::from_mut_slice(data);
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or_else(|| VideoSinkError::FrameWrite("Buffer is not writable".to_string()))?;
      let pts = self.timestamp(self.frame_count);
      buffer_ref.set_pts(pts);
      buffer_ref.set_duration(self.timestamp(self.frame_count + 1) - pts);
    }

    if let Err(e) = self.appsrc.push_buffer(buffer) {
      let reason = pending_error(pipeline).unwrap_or_else(|| format!("{:?}", e));
      error!("Failed to push buffer: {}", reason);
      return Err(VideoSinkError::FrameWrite(reason));
    }

    self.frame_count += 1;
    debug!("写入第 {} 帧", self.frame_count);
    Ok(())
  }

  fn close(&mut self) -> Result<(), Self::Error> {
    let Some(pipeline) = self.pipeline.take() else {
      return Ok(());
    };

    let mut result = self
      .appsrc
      .end_of_stream()
      .map(|_| ())
      .map_err(|e| VideoSinkError::Finalize(format!("{:?}", e)));

    // 等待 EOS 穿过复用器，文件尾才会写出
    if result.is_ok()
      && let Some(bus) = pipeline.bus()
    {
      let message = bus.timed_pop_filtered(
        gst::ClockTime::from_seconds(FINALIZE_TIMEOUT_SECS),
        &[gst::MessageType::Eos, gst::MessageType::Error],
      );
      result = match message.as_ref().map(|m| m.view()) {
        Some(gst::MessageView::Eos(_)) => Ok(()),
        Some(gst::MessageView::Error(err)) => Err(VideoSinkError::Finalize(format!(
          "{} ({:?})",
          err.error(),
          err.debug()
        ))),
        _ => Err(VideoSinkError::Finalize("等待 EOS 超时".to_string())),
      };
    }

    if let Err(e) = pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer video output pipeline: {}", e);
    }

    info!(
      "Video output closed: {} (total frames written: {})",
      self.path.display(),
      self.frame_count
    );
    result
  }
}

impl Drop for VideoSink {
  fn drop(&mut self) {
    if let Err(e) = self.close() {
      warn!("视频输出关闭失败: {}", e);
    }
  }
}
