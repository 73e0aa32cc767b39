// 该文件是 Huakuang （画框） 项目的一部分。
// src/input/video_source.rs - GStreamer 视频文件输入
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

//! # GStreamer 视频输入模块
//!
//! 逐帧解码视频文件，每帧重新编码为 JPEG 后交给下游。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev \
//!   gstreamer1.0-plugins-good gstreamer1.0-libav
//! ```
//!
//! ## URL Scheme
//!
//! `video:///path/to/input.mp4`
//!
//! ## 基本用法
//!
//! ```no_run
//! use huakuang::input::{FrameSource, VideoSource};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut source = VideoSource::open("input.mp4")?;
//! println!("{}x{} @ {:.2} fps", source.width(), source.height(), source.fps());
//! while let Some(frame) = source.next_frame()? {
//!     println!("帧大小: {} 字节", frame.len());
//! }
//! source.close();
//! # Ok(())
//! # }
//! ```
//!
//! 解码是同步的：`appsink` 不丢帧，每次 `next_frame` 阻塞到下一帧或流结束。

use std::path::{Path, PathBuf};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, decode_url_path,
  frame::{EncodedFrame, FrameError},
  input::FrameSource,
};

const PREROLL_TIMEOUT_SECS: u64 = 10;
const DEFAULT_FPS: f64 = 30.0;

/// GStreamer 视频输入错误类型
#[derive(Error, Debug)]
pub enum VideoSourceError {
  /// URI scheme 不匹配（期望 "video://"）
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// 路径不可读或容器无法识别
  #[error("无法打开视频 {path}: {reason}")]
  Open { path: PathBuf, reason: String },
  /// 非流结束的读取失败
  #[error("读取帧失败: {0}")]
  FrameRead(String),
  /// 重新编码失败
  #[error("帧编码失败: {0}")]
  Encode(#[from] FrameError),
  #[error("视频输入已关闭")]
  Closed,
}

/// GStreamer 视频输入
///
/// 宽、高、帧率在打开时读取一次，之后只读。
pub struct VideoSource {
  path: PathBuf,
  pipeline: Option<gst::Pipeline>,
  appsink: gst_app::AppSink,
  width: u32,
  height: u32,
  fps: f64,
  total_frames: Option<u64>,
  position: u64,
}

impl VideoSource {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, VideoSourceError> {
    let path = path.as_ref().to_path_buf();
    let open_error = |reason: String| VideoSourceError::Open {
      path: path.clone(),
      reason,
    };

    std::fs::File::open(&path).map_err(|e| open_error(e.to_string()))?;
    let location = path
      .to_str()
      .ok_or_else(|| open_error("路径不是有效的 UTF-8".to_string()))?;

    gst::init().map_err(|e| open_error(e.to_string()))?;

    let description = "filesrc name=src ! decodebin ! videoconvert ! video/x-raw,format=RGB \
                       ! appsink name=sink sync=false max-buffers=4 drop=false";
    info!("GStreamer pipeline description: {}", description);

    let pipeline = gst::parse::launch(description)
      .map_err(|e| open_error(e.to_string()))?
      .downcast::<gst::Pipeline>()
      .map_err(|_| open_error("Failed to create pipeline".to_string()))?;

    let filesrc = pipeline
      .by_name("src")
      .ok_or_else(|| open_error("Failed to get filesrc element".to_string()))?;
    filesrc.set_property("location", location);

    let appsink = pipeline
      .by_name("sink")
      .ok_or_else(|| open_error("Failed to get appsink element".to_string()))?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| open_error("Failed to convert element to appsink".to_string()))?;

    // 预卷以读取视频参数
    let prerolled = pipeline
      .set_state(gst::State::Paused)
      .map_err(|e| e.to_string())
      .and_then(|_| {
        let (result, _, _) = pipeline.state(gst::ClockTime::from_seconds(PREROLL_TIMEOUT_SECS));
        result.map_err(|e| e.to_string())
      });
    if let Err(reason) = prerolled {
      let reason = pending_error(&pipeline).unwrap_or(reason);
      let _ = pipeline.set_state(gst::State::Null);
      return Err(open_error(reason));
    }

    let video_info = appsink
      .static_pad("sink")
      .and_then(|pad| pad.current_caps())
      .and_then(|caps| gst_video::VideoInfo::from_caps(&caps).ok());
    let Some(video_info) = video_info else {
      let _ = pipeline.set_state(gst::State::Null);
      return Err(open_error("Failed to get video info from caps".to_string()));
    };

    let framerate = video_info.fps();
    let fps = if framerate.numer() > 0 && framerate.denom() > 0 {
      framerate.numer() as f64 / framerate.denom() as f64
    } else {
      warn!("视频未声明帧率，使用默认值 {}", DEFAULT_FPS);
      DEFAULT_FPS
    };
    let total_frames = pipeline
      .query_duration::<gst::format::Default>()
      .map(|frames| *frames);

    if let Err(e) = pipeline.set_state(gst::State::Playing) {
      let _ = pipeline.set_state(gst::State::Null);
      return Err(open_error(e.to_string()));
    }

    info!(
      "视频输入已打开: {} ({}x{} @ {:.2} fps, 总帧数 {:?})",
      path.display(),
      video_info.width(),
      video_info.height(),
      fps,
      total_frames
    );

    Ok(Self {
      path,
      pipeline: Some(pipeline),
      appsink,
      width: video_info.width(),
      height: video_info.height(),
      fps,
      total_frames,
      position: 0,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// 容器声明的总帧数（若可得）
  pub fn total_frames(&self) -> Option<u64> {
    self.total_frames
  }

  /// 已读取的帧数
  pub fn position(&self) -> u64 {
    self.position
  }

  fn encode_sample(&self, sample: &gst::Sample) -> Result<EncodedFrame, VideoSourceError> {
    let buffer = sample
      .buffer()
      .ok_or_else(|| VideoSourceError::FrameRead("No buffer in sample".to_string()))?;
    let caps = sample
      .caps()
      .ok_or_else(|| VideoSourceError::FrameRead("No caps in sample".to_string()))?;
    let video_info = gst_video::VideoInfo::from_caps(caps)
      .map_err(|_| VideoSourceError::FrameRead("Failed to get video info from caps".to_string()))?;

    let width = video_info.width() as usize;
    let height = video_info.height() as usize;
    let stride = video_info.stride()[0] as usize;

    let map = buffer
      .map_readable()
      .map_err(|e| VideoSourceError::FrameRead(format!("Failed to map buffer: {}", e)))?;
    let data = map.as_slice();

    let row = width * 3;
    let expected = stride * (height.saturating_sub(1)) + row;
    if data.len() < expected {
      return Err(VideoSourceError::FrameRead(format!(
        "Buffer size mismatch: expected {} bytes, got {} bytes",
        expected,
        data.len()
      )));
    }

    // 去掉行对齐填充
    let mut pixels = Vec::with_capacity(row * height);
    for y in 0..height {
      pixels.extend_from_slice(&data[y * stride..y * stride + row]);
    }

    let image = RgbImage::from_raw(width as u32, height as u32, pixels)
      .ok_or_else(|| VideoSourceError::FrameRead("无法创建 RGB 图像".to_string()))?;
    Ok(EncodedFrame::encode_rgb_jpeg(&image)?)
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

impl FromUrlWithScheme for VideoSource {
  const SCHEME: &'static str = "video";
}

impl FromUrl for VideoSource {
  type Error = VideoSourceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(VideoSourceError::SchemeMismatch);
    }
    Self::open(decode_url_path(url))
  }
}

impl FrameSource for VideoSource {
  type Error = VideoSourceError;

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn fps(&self) -> f64 {
    self.fps
  }

  fn next_frame(&mut self) -> Result<Option<EncodedFrame>, Self::Error> {
    let Some(pipeline) = self.pipeline.as_ref() else {
      return Err(VideoSourceError::Closed);
    };

    match self.appsink.pull_sample() {
      Ok(sample) => {
        let frame = self.encode_sample(&sample)?;
        self.position += 1;
        debug!("读取第 {} 帧, {} 字节", self.position, frame.len());
        Ok(Some(frame))
      }
      Err(_) if self.appsink.is_eos() => {
        end_of_stream(self.total_frames, self.position).map(|_| None)
      }
      Err(e) => {
        let reason = pending_error(pipeline).unwrap_or_else(|| e.to_string());
        error!("Failed to pull sample: {}", reason);
        Err(VideoSourceError::FrameRead(reason))
      }
    }
  }

  fn close(&mut self) {
    if let Some(pipeline) = self.pipeline.take() {
      if let Err(e) = pipeline.set_state(gst::State::Null) {
        warn!("Failed to stop GStreamer pipeline: {}", e);
      }
      info!(
        "视频输入已关闭: {} (读取 {} 帧)",
        self.path.display(),
        self.position
      );
    }
  }
}

impl Drop for VideoSource {
  fn drop(&mut self) {
    self.close();
  }
}

/// 流结束时核对读取帧数
///
/// 容器声明的帧数未读满视为读取失败；多读出的帧只记录警告。
fn end_of_stream(total: Option<u64>, position: u64) -> Result<(), VideoSourceError> {
  match total {
    Some(total) if position < total => {
      error!("容器声明 {} 帧, 仅读取 {} 帧后流已结束", total, position);
      Err(VideoSourceError::FrameRead(format!(
        "流在第 {} 帧提前结束, 容器声明 {} 帧",
        position, total
      )))
    }
    Some(total) if position > total => {
      warn!("容器声明 {} 帧, 实际读取 {} 帧", total, position);
      Ok(())
    }
    _ => Ok(()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_file_fails_before_touching_gstreamer() {
    let err = VideoSource::open("/nonexistent/input.mp4").err().unwrap();
    assert!(matches!(err, VideoSourceError::Open { .. }));
  }

  #[test]
  fn truncated_stream_is_a_read_error() {
    assert!(matches!(
      end_of_stream(Some(100), 42),
      Err(VideoSourceError::FrameRead(_))
    ));
    assert!(matches!(
      end_of_stream(Some(1), 0),
      Err(VideoSourceError::FrameRead(_))
    ));
  }

  #[test]
  fn full_or_unknown_count_ends_cleanly() {
    assert!(end_of_stream(Some(100), 100).is_ok());
    assert!(end_of_stream(None, 0).is_ok());
    assert!(end_of_stream(None, 17).is_ok());
    // 容器低估帧数时不丢弃已读到的帧
    assert!(end_of_stream(Some(10), 12).is_ok());
  }

  #[test]
  fn from_url_checks_scheme() {
    let url = Url::parse("image:///tmp/input.mp4").unwrap();
    assert!(matches!(
      VideoSource::from_url(&url),
      Err(VideoSourceError::SchemeMismatch)
    ));
  }
}
