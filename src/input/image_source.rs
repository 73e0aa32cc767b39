// 该文件是 Huakuang （画框） 项目的一部分。
// src/input/image_source.rs - 图像文件输入
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, decode_url_path,
  frame::{EncodedFrame, FrameError},
  input::FrameSource,
};

#[derive(Error, Debug)]
pub enum ImageSourceError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("无法读取图像文件 {path}: {source}")]
  Open {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("图像格式错误 {path}: {source}")]
  Format {
    path: PathBuf,
    #[source]
    source: FrameError,
  },
}

/// 单张图像输入：产出一帧后即结束
pub struct ImageFileSource {
  path: PathBuf,
  frame: Option<EncodedFrame>,
  width: u32,
  height: u32,
}

impl ImageFileSource {
  /// 读取并校验图像，格式由内容判定
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageSourceError> {
    let path = path.as_ref().to_path_buf();
    let data = std::fs::read(&path).map_err(|source| ImageSourceError::Open {
      path: path.clone(),
      source,
    })?;

    let frame = EncodedFrame::from(data);
    let (width, height) = frame
      .decode()
      .map_err(|source| ImageSourceError::Format {
        path: path.clone(),
        source,
      })?
      .dimensions();

    info!(
      "图像输入已打开: {} ({}x{}, {})",
      path.display(),
      width,
      height,
      frame.format().map_or("unknown", |f| f.mime_type())
    );

    Ok(Self {
      path,
      frame: Some(frame),
      width,
      height,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl FromUrlWithScheme for ImageFileSource {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileSource {
  type Error = ImageSourceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageSourceError::SchemaMismatch);
    }
    Self::open(decode_url_path(url))
  }
}

impl FrameSource for ImageFileSource {
  type Error = ImageSourceError;

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn fps(&self) -> f64 {
    1.0
  }

  fn next_frame(&mut self) -> Result<Option<EncodedFrame>, Self::Error> {
    Ok(self.frame.take())
  }

  fn close(&mut self) {
    self.frame = None;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::ImageFormat;
  use image::{Rgba, RgbaImage};

  fn write_png(dir: &Path, name: &str) -> PathBuf {
    let surface = RgbaImage::from_pixel(12, 8, Rgba([0, 0, 255, 255]));
    let frame = EncodedFrame::encode(&surface, ImageFormat::Png).unwrap();
    // 扩展名故意与内容不符
    let path = dir.join(name);
    std::fs::write(&path, frame.as_ref()).unwrap();
    path
  }

  #[test]
  fn yields_one_frame_then_end_of_stream() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(dir.path(), "still.jpg");

    let mut source = ImageFileSource::open(&path).unwrap();
    assert_eq!((source.width(), source.height()), (12, 8));

    let frame = source.next_frame().unwrap().unwrap();
    assert_eq!(frame.format(), Some(ImageFormat::Png));
    assert!(source.next_frame().unwrap().is_none());
    assert!(source.next_frame().unwrap().is_none());

    source.close();
    source.close();
  }

  #[test]
  fn missing_file_is_an_open_error() {
    let err = ImageFileSource::open("/nonexistent/still.png").err().unwrap();
    assert!(matches!(err, ImageSourceError::Open { .. }));
  }

  #[test]
  fn unrecognised_content_is_a_format_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fake.png");
    std::fs::write(&path, b"BM not really a bitmap").unwrap();

    let err = ImageFileSource::open(&path).err().unwrap();
    assert!(matches!(
      err,
      ImageSourceError::Format {
        source: FrameError::UnsupportedFormat,
        ..
      }
    ));
  }

  #[test]
  fn from_url_checks_scheme() {
    let url = Url::parse("video:///tmp/still.png").unwrap();
    assert!(matches!(
      ImageFileSource::from_url(&url),
      Err(ImageSourceError::SchemaMismatch)
    ));
  }
}
