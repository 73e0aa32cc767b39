// 该文件是 Huakuang （画框） 项目的一部分。
// src/output.rs - 输出定义
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
use url::Url;

use crate::{decode_url_path, frame::EncodedFrame};

/// 顺序写入的帧输出
pub trait FrameSink {
  type Error;

  fn write_frame(&mut self, frame: &EncodedFrame) -> Result<(), Self::Error>;

  /// 完成写入并释放底层句柄，重复调用安全
  fn close(&mut self) -> Result<(), Self::Error>;
}

/// 输出帧的几何参数，通常取自输入源
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameGeometry {
  pub width: u32,
  pub height: u32,
  pub fps: f64,
}

pub mod draw;
pub mod record;

mod image_sink;
pub use self::image_sink::{ImageFileSink, ImageSinkError};

#[cfg(feature = "gstreamer_video")]
mod video_sink;
#[cfg(feature = "gstreamer_video")]
pub use self::video_sink::{Fourcc, VideoSink, VideoSinkError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("保存图像文件错误: {0}")]
  ImageSinkError(#[from] ImageSinkError),
  #[cfg(feature = "gstreamer_video")]
  #[error("视频输出错误: {0}")]
  VideoSinkError(#[from] VideoSinkError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  #[cfg(feature = "gstreamer_video")]
  Video(VideoSink),
  Image(ImageFileSink),
}

impl OutputWrapper {
  /// 按 URL 方案打开输出
  ///
  /// - `video:///out.mp4?fourcc=MP4V&color=true`
  /// - `image:///out.jpg`
  pub fn open(url: &Url, geometry: FrameGeometry) -> Result<Self, OutputError> {
    match url.scheme() {
      #[cfg(feature = "gstreamer_video")]
      VideoSink::SCHEME => {
        let mut fourcc = Fourcc::default();
        let mut is_color = true;
        for (key, value) in url.query_pairs() {
          match key.as_ref() {
            "fourcc" => fourcc = Fourcc::parse(&value)?,
            "color" => is_color = !matches!(value.as_ref(), "false" | "0" | "no"),
            _ => {}
          }
        }
        let sink = VideoSink::open(decode_url_path(url), geometry, fourcc, is_color)?;
        Ok(OutputWrapper::Video(sink))
      }
      ImageFileSink::SCHEME => Ok(OutputWrapper::Image(ImageFileSink::open(
        decode_url_path(url),
      )?)),
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl FrameSink for OutputWrapper {
  type Error = OutputError;

  fn write_frame(&mut self, frame: &EncodedFrame) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "gstreamer_video")]
      OutputWrapper::Video(output) => output.write_frame(frame).map_err(OutputError::from),
      OutputWrapper::Image(output) => output.write_frame(frame).map_err(OutputError::from),
    }
  }

  fn close(&mut self) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "gstreamer_video")]
      OutputWrapper::Video(output) => output.close().map_err(OutputError::from),
      OutputWrapper::Image(output) => output.close().map_err(OutputError::from),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const GEOMETRY: FrameGeometry = FrameGeometry {
    width: 64,
    height: 48,
    fps: 25.0,
  };

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("rtsp://camera.local/stream").unwrap();
    assert!(matches!(
      OutputWrapper::open(&url, GEOMETRY),
      Err(OutputError::SchemeMismatch(_))
    ));
  }

  #[cfg(feature = "gstreamer_video")]
  #[test]
  fn unsupported_fourcc_leaves_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.mp4");
    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&format!("video://{}?fourcc=ABCD", url.path())).unwrap();

    let err = OutputWrapper::open(&url, GEOMETRY).err().unwrap();
    assert!(matches!(err, OutputError::VideoSinkError(_)));
    assert!(!path.exists());
  }
}
