// 该文件是 Huakuang （画框） 项目的一部分。
// src/output/image_sink.rs - 图像文件输出
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
use tracing::{debug, info};

use crate::{
  frame::{EncodedFrame, FrameError, ImageFormat},
  output::FrameSink,
};

#[derive(Error, Debug)]
pub enum ImageSinkError {
  #[error("无法打开图像输出 {path}: {reason}")]
  Open { path: PathBuf, reason: String },
  #[error("无法写入图像文件 {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("图像格式错误: {0}")]
  Format(#[from] FrameError),
  #[error("图像输出已关闭")]
  WriterClosed,
}

/// 图像文件输出，始终写 JPEG
///
/// 第一帧写入给定路径，之后的帧写入 `<stem>-NNNNN.jpg`。
pub struct ImageFileSink {
  path: PathBuf,
  written: usize,
  closed: bool,
}

impl ImageFileSink {
  pub const SCHEME: &'static str = "image";

  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageSinkError> {
    let path = path.as_ref().to_path_buf();
    let parent = match path.parent() {
      Some(parent) if !parent.as_os_str().is_empty() => parent,
      _ => Path::new("."),
    };
    if !parent.is_dir() {
      return Err(ImageSinkError::Open {
        reason: format!("目录 {} 不存在", parent.display()),
        path,
      });
    }
    if path.file_stem().is_none() {
      return Err(ImageSinkError::Open {
        reason: "缺少文件名".to_string(),
        path,
      });
    }

    info!("图像输出已打开: {}", path.display());
    Ok(Self {
      path,
      written: 0,
      closed: false,
    })
  }

  /// 第 `index` 帧的输出路径
  pub fn frame_path(&self, index: usize) -> PathBuf {
    if index == 0 {
      return self.path.clone();
    }
    let stem = self
      .path
      .file_stem()
      .map(|stem| stem.to_string_lossy().into_owned())
      .unwrap_or_default();
    self.path.with_file_name(format!("{}-{:05}.jpg", stem, index))
  }

  pub fn written(&self) -> usize {
    self.written
  }
}

impl FrameSink for ImageFileSink {
  type Error = ImageSinkError;

  fn write_frame(&mut self, frame: &EncodedFrame) -> Result<(), Self::Error> {
    if self.closed {
      return Err(ImageSinkError::WriterClosed);
    }

    let jpeg;
    let bytes = if frame.format() == Some(ImageFormat::Jpeg) {
      frame
    } else {
      jpeg = EncodedFrame::encode(&frame.decode()?, ImageFormat::Jpeg)?;
      &jpeg
    };

    let path = self.frame_path(self.written);
    std::fs::write(&path, bytes.as_ref())
      .map_err(|source| ImageSinkError::Write { path: path.clone(), source })?;
    self.written += 1;
    debug!("保存图像: {} ({} 字节)", path.display(), bytes.len());
    Ok(())
  }

  fn close(&mut self) -> Result<(), Self::Error> {
    if !self.closed {
      self.closed = true;
      info!("图像输出已关闭: {} (共 {} 张)", self.path.display(), self.written);
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgba, RgbaImage};

  fn png_frame() -> EncodedFrame {
    let surface = RgbaImage::from_pixel(16, 10, Rgba([200, 10, 10, 255]));
    EncodedFrame::encode(&surface, ImageFormat::Png).unwrap()
  }

  #[test]
  fn always_writes_jpeg() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("annotated.png");

    let mut sink = ImageFileSink::open(&path).unwrap();
    sink.write_frame(&png_frame()).unwrap();
    sink.close().unwrap();

    let written = EncodedFrame::from(std::fs::read(&path).unwrap());
    assert_eq!(written.format(), Some(ImageFormat::Jpeg));
    assert_eq!(written.decode().unwrap().dimensions(), (16, 10));
  }

  #[test]
  fn later_frames_get_numbered_names() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shot.jpg");

    let mut sink = ImageFileSink::open(&path).unwrap();
    for _ in 0..3 {
      sink.write_frame(&png_frame()).unwrap();
    }
    assert_eq!(sink.written(), 3);
    assert!(path.exists());
    assert!(dir.path().join("shot-00001.jpg").exists());
    assert!(dir.path().join("shot-00002.jpg").exists());
  }

  #[test]
  fn write_after_close_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shot.jpg");

    let mut sink = ImageFileSink::open(&path).unwrap();
    sink.close().unwrap();
    sink.close().unwrap();
    assert!(matches!(
      sink.write_frame(&png_frame()),
      Err(ImageSinkError::WriterClosed)
    ));
    assert!(!path.exists());
  }

  #[test]
  fn missing_directory_fails_on_open() {
    assert!(matches!(
      ImageFileSink::open("/nonexistent/dir/shot.jpg"),
      Err(ImageSinkError::Open { .. })
    ));
  }

  #[test]
  fn unrecognised_frame_is_a_format_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut sink = ImageFileSink::open(dir.path().join("shot.jpg")).unwrap();
    let frame = EncodedFrame::from(b"not an image".to_vec());
    assert!(matches!(
      sink.write_frame(&frame),
      Err(ImageSinkError::Format(FrameError::UnsupportedFormat))
    ));
  }
}
