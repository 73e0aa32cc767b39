// 该文件是 Huakuang （画框） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use crate::{FromUrl, FromUrlWithScheme, decode_url_path, frame::EncodedFrame};

/// 顺序读取的帧来源
///
/// `next_frame` 返回 `Ok(None)` 表示正常结束，与读取失败区分开。
pub trait FrameSource {
  type Error;

  fn width(&self) -> u32;
  fn height(&self) -> u32;
  fn fps(&self) -> f64;

  fn next_frame(&mut self) -> Result<Option<EncodedFrame>, Self::Error>;

  /// 释放底层句柄，重复调用安全
  fn close(&mut self);
}

mod image_source;
pub use self::image_source::{ImageFileSource, ImageSourceError};

#[cfg(feature = "gstreamer_video")]
mod video_source;
#[cfg(feature = "gstreamer_video")]
pub use self::video_source::{VideoSource, VideoSourceError};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("Image file input error: {0}")]
  ImageSourceError(#[from] ImageSourceError),
  #[cfg(feature = "gstreamer_video")]
  #[error("Video input error: {0}")]
  VideoSourceError(#[from] VideoSourceError),
  #[error("URI scheme mismatch: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  #[cfg(feature = "gstreamer_video")]
  Video(VideoSource),
  Image(ImageFileSource),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "gstreamer_video")]
    {
      if url.scheme() == VideoSource::SCHEME {
        let input = VideoSource::open(decode_url_path(url))?;
        return Ok(InputWrapper::Video(input));
      }
    }

    if url.scheme() == ImageFileSource::SCHEME {
      let input = ImageFileSource::open(decode_url_path(url))?;
      return Ok(InputWrapper::Image(input));
    }

    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl FrameSource for InputWrapper {
  type Error = InputError;

  fn width(&self) -> u32 {
    match self {
      #[cfg(feature = "gstreamer_video")]
      InputWrapper::Video(input) => input.width(),
      InputWrapper::Image(input) => input.width(),
    }
  }

  fn height(&self) -> u32 {
    match self {
      #[cfg(feature = "gstreamer_video")]
      InputWrapper::Video(input) => input.height(),
      InputWrapper::Image(input) => input.height(),
    }
  }

  fn fps(&self) -> f64 {
    match self {
      #[cfg(feature = "gstreamer_video")]
      InputWrapper::Video(input) => input.fps(),
      InputWrapper::Image(input) => input.fps(),
    }
  }

  fn next_frame(&mut self) -> Result<Option<EncodedFrame>, Self::Error> {
    match self {
      #[cfg(feature = "gstreamer_video")]
      InputWrapper::Video(input) => input.next_frame().map_err(InputError::from),
      InputWrapper::Image(input) => input.next_frame().map_err(InputError::from),
    }
  }

  fn close(&mut self) {
    match self {
      #[cfg(feature = "gstreamer_video")]
      InputWrapper::Video(input) => input.close(),
      InputWrapper::Image(input) => input.close(),
    }
  }
}
