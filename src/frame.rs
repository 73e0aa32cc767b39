// 该文件是 Huakuang （画框） 项目的一部分。
// src/frame.rs - 编码帧与 NCHW 张量定义
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

use std::io::Cursor;

use image::{
  DynamicImage, RgbImage, RgbaImage,
  codecs::jpeg::JpegEncoder,
  imageops::{self, FilterType},
};
use thiserror::Error;

const RGB_CHANNELS: usize = 3;
const JPEG_QUALITY: u8 = 90;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("不支持的图像格式")]
  UnsupportedFormat,
  #[error("图像解码错误: {0}")]
  Decode(#[source] image::ImageError),
  #[error("图像编码错误: {0}")]
  Encode(#[source] image::ImageError),
}

/// 编码帧支持的压缩格式
///
/// 格式由字节流内容判定，与文件扩展名无关。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
  /// 有损压缩
  Jpeg,
  /// 无损压缩
  Png,
  /// 动图，仅使用第一帧
  Gif,
}

impl ImageFormat {
  /// 根据文件头魔数判定格式，无法识别时返回 `None`
  pub fn sniff(data: &[u8]) -> Option<Self> {
    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
    const JPEG_MAGIC: &[u8] = b"\xff\xd8\xff";

    if data.starts_with(JPEG_MAGIC) {
      Some(ImageFormat::Jpeg)
    } else if data.starts_with(PNG_MAGIC) {
      Some(ImageFormat::Png)
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
      Some(ImageFormat::Gif)
    } else {
      None
    }
  }

  pub fn mime_type(&self) -> &'static str {
    match self {
      ImageFormat::Jpeg => "image/jpeg",
      ImageFormat::Png => "image/png",
      ImageFormat::Gif => "image/gif",
    }
  }

  fn as_image_format(&self) -> image::ImageFormat {
    match self {
      ImageFormat::Jpeg => image::ImageFormat::Jpeg,
      ImageFormat::Png => image::ImageFormat::Png,
      ImageFormat::Gif => image::ImageFormat::Gif,
    }
  }
}

/// 压缩后的单帧图像
///
/// 输入源与输出之间只传递压缩字节，不依赖解码器内部的像素格式。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
  data: Box<[u8]>,
}

impl From<Vec<u8>> for EncodedFrame {
  fn from(data: Vec<u8>) -> Self {
    Self {
      data: data.into_boxed_slice(),
    }
  }
}

impl AsRef<[u8]> for EncodedFrame {
  fn as_ref(&self) -> &[u8] {
    &self.data
  }
}

impl EncodedFrame {
  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn format(&self) -> Option<ImageFormat> {
    ImageFormat::sniff(&self.data)
  }

  /// 解码为 RGBA 画布
  pub fn decode(&self) -> Result<RgbaImage, FrameError> {
    let format = self.format().ok_or(FrameError::UnsupportedFormat)?;
    let image = image::load_from_memory_with_format(&self.data, format.as_image_format())
      .map_err(FrameError::Decode)?;
    Ok(image.into_rgba8())
  }

  /// 将画布编码为指定格式
  pub fn encode(surface: &RgbaImage, format: ImageFormat) -> Result<Self, FrameError> {
    if format == ImageFormat::Jpeg {
      // JPEG 不支持透明通道
      let rgb = DynamicImage::ImageRgba8(surface.clone()).into_rgb8();
      return Self::encode_rgb_jpeg(&rgb);
    }

    let mut buffer = Cursor::new(Vec::new());
    surface
      .write_to(&mut buffer, format.as_image_format())
      .map_err(FrameError::Encode)?;
    Ok(Self::from(buffer.into_inner()))
  }

  /// 将 RGB 图像编码为 JPEG
  pub fn encode_rgb_jpeg(image: &RgbImage) -> Result<Self, FrameError> {
    let mut data = Vec::new();
    JpegEncoder::new_with_quality(&mut data, JPEG_QUALITY)
      .encode_image(image)
      .map_err(FrameError::Encode)?;
    Ok(Self::from(data))
  }
}

/// 模型输入：1 × 3 × H × W 的平面 RGB 浮点张量，取值 [0, 1]
#[derive(Debug, Clone)]
pub struct NchwTensor<const W: u32, const H: u32> {
  data: Box<[f32]>,
}

impl<const W: u32, const H: u32> Default for NchwTensor<W, H> {
  fn default() -> Self {
    let size = RGB_CHANNELS * (W as usize) * (H as usize);
    Self {
      data: vec![0f32; size].into_boxed_slice(),
    }
  }
}

impl<const W: u32, const H: u32> NchwTensor<W, H> {
  pub fn height(&self) -> usize {
    H as usize
  }

  pub fn width(&self) -> usize {
    W as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  /// 缩放到 W × H 后按通道平铺
  pub fn fill_from(&mut self, surface: &RgbaImage) {
    let resized = imageops::resize(surface, W, H, FilterType::Triangle);
    let plane = (W as usize) * (H as usize);

    for (x, y, pixel) in resized.enumerate_pixels() {
      let idx = (y as usize) * (W as usize) + (x as usize);
      for c in 0..RGB_CHANNELS {
        self.data[c * plane + idx] = pixel[c] as f32 / 255.0;
      }
    }
  }
}

impl<const W: u32, const H: u32> From<&RgbaImage> for NchwTensor<W, H> {
  fn from(surface: &RgbaImage) -> Self {
    let mut tensor = Self::default();
    tensor.fill_from(surface);
    tensor
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgba;

  fn solid(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba([255, 0, 0, 255]))
  }

  #[test]
  fn sniff_recognises_supported_headers() {
    assert_eq!(ImageFormat::sniff(b"\xff\xd8\xff\xe0rest"), Some(ImageFormat::Jpeg));
    assert_eq!(
      ImageFormat::sniff(b"\x89PNG\r\n\x1a\n...."),
      Some(ImageFormat::Png)
    );
    assert_eq!(ImageFormat::sniff(b"GIF89a...."), Some(ImageFormat::Gif));
    assert_eq!(ImageFormat::sniff(b"BM......"), None);
    assert_eq!(ImageFormat::sniff(b""), None);
  }

  #[test]
  fn decode_rejects_unknown_bytes() {
    let frame = EncodedFrame::from(b"not an image at all".to_vec());
    assert!(matches!(frame.decode(), Err(FrameError::UnsupportedFormat)));
  }

  #[test]
  fn decode_reports_corrupt_data_of_known_format() {
    let frame = EncodedFrame::from(b"\x89PNG\r\n\x1a\ntruncated".to_vec());
    assert!(matches!(frame.decode(), Err(FrameError::Decode(_))));
  }

  #[test]
  fn encode_then_decode_keeps_dimensions() {
    let surface = solid(37, 21);
    for format in [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::Gif] {
      let frame = EncodedFrame::encode(&surface, format).unwrap();
      assert_eq!(frame.format(), Some(format));
      let decoded = frame.decode().unwrap();
      assert_eq!(decoded.dimensions(), (37, 21));
    }
  }

  #[test]
  fn tensor_is_planar_and_normalised() {
    let tensor: NchwTensor<4, 4> = NchwTensor::from(&solid(8, 8));
    let plane = 16;
    assert_eq!(tensor.as_slice().len(), 3 * plane);
    assert!(tensor.as_slice()[..plane].iter().all(|v| (*v - 1.0).abs() < 1e-6));
    assert!(tensor.as_slice()[plane..].iter().all(|v| v.abs() < 1e-6));
  }
}
