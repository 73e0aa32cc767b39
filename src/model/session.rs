// 该文件是 Huakuang （画框） 项目的一部分。
// src/model/session.rs - ONNX Runtime 推理会话
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

//! # 推理会话
//!
//! 一个会话绑定一个模型文件、一个固定形状的输入张量 `images (1, 3, 640, 640)`
//! 和一个固定形状的输出缓冲 `output0 (1, 84, 8400)`。两者在会话的整个生命周期内复用，
//! 每次推理只覆盖内容，不重新分配。
//!
//! [`Session::infer`] 返回的输出视图借用了会话本身，下一次推理开始前必须结束使用。
//!
//! ## URL 格式
//!
//! - `onnx:///path/to/yolov8m.onnx` - 默认后端（macOS 为 CoreML，其他平台为 CUDA 0 号设备）
//! - `onnx:///path/to/yolov8m.onnx?provider=cpu`
//! - `onnx:///path/to/yolov8m.onnx?provider=tensorrt&device=1`
//!
//! 首选后端无法初始化时记录警告并回退到 CPU，不视为失败。

use std::path::{Path, PathBuf};

use ort::{
  execution_providers::{self as ep, ExecutionProviderDispatch},
  session::Session as OrtSession,
  value::{Tensor, ValueType},
};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, decode_url_path};

pub const INPUT_NAME: &str = "images";
pub const OUTPUT_NAME: &str = "output0";
pub const INPUT_SHAPE: [i64; 4] = [1, 3, 640, 640];
pub const OUTPUT_SHAPE: [i64; 3] = [1, 84, 8400];
pub const INPUT_LEN: usize = 3 * 640 * 640;
pub const OUTPUT_LEN: usize = 84 * 8400;

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("模型加载错误: {path}: {reason}")]
  ModelLoad { path: PathBuf, reason: String },
  #[error("张量 {tensor} 形状不匹配: 期望 {expected:?}, 模型声明 {declared:?}")]
  ShapeMismatch {
    tensor: &'static str,
    expected: Vec<i64>,
    declared: Option<Vec<i64>>,
  },
  #[error("执行后端初始化失败: {0}")]
  Provider(String),
  #[error("输入长度不匹配: 期望 {expected}, 实际 {actual}")]
  InputLength { expected: usize, actual: usize },
  #[error("推理错误: {0}")]
  Inference(String),
  #[error("会话已关闭")]
  Closed,
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无效的模型参数: {0}")]
  InvalidParameter(String),
}

fn load_error(path: &Path, reason: impl std::fmt::Display) -> SessionError {
  SessionError::ModelLoad {
    path: path.to_path_buf(),
    reason: reason.to_string(),
  }
}

/// 执行后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
  Cpu,
  Cuda(i32),
  TensorRt(i32),
  CoreMl,
}

impl Default for ExecutionProvider {
  fn default() -> Self {
    if cfg!(target_os = "macos") {
      ExecutionProvider::CoreMl
    } else {
      ExecutionProvider::Cuda(0)
    }
  }
}

impl ExecutionProvider {
  pub fn parse(name: &str, device: i32) -> Result<Self, SessionError> {
    match name.to_ascii_lowercase().as_str() {
      "cpu" => Ok(ExecutionProvider::Cpu),
      "cuda" => Ok(ExecutionProvider::Cuda(device)),
      "tensorrt" | "trt" => Ok(ExecutionProvider::TensorRt(device)),
      "coreml" => Ok(ExecutionProvider::CoreMl),
      other => Err(SessionError::InvalidParameter(format!(
        "未知的执行后端: {}",
        other
      ))),
    }
  }

  fn dispatch(&self) -> Option<ExecutionProviderDispatch> {
    match self {
      ExecutionProvider::Cpu => None,
      ExecutionProvider::Cuda(device) => Some(
        ep::CUDAExecutionProvider::default()
          .with_device_id(*device)
          .build()
          .error_on_failure(),
      ),
      ExecutionProvider::TensorRt(device) => Some(
        ep::TensorRTExecutionProvider::default()
          .with_device_id(*device)
          .build()
          .error_on_failure(),
      ),
      ExecutionProvider::CoreMl => Some(
        ep::CoreMLExecutionProvider::default()
          .build()
          .error_on_failure(),
      ),
    }
  }
}

struct SessionState {
  session: OrtSession,
  input: Tensor<f32>,
  output: Box<[f32]>,
}

/// 推理会话
///
/// 不提供内部锁，`infer` 需要 `&mut self`，同一会话无法被并发调用。
pub struct Session {
  model_path: PathBuf,
  provider: ExecutionProvider,
  state: Option<SessionState>,
}

impl Session {
  /// 加载模型并分配固定形状的输入输出缓冲
  pub fn open(path: impl AsRef<Path>, provider: ExecutionProvider) -> Result<Self, SessionError> {
    let path = path.as_ref();

    let metadata = std::fs::metadata(path).map_err(|e| load_error(path, e))?;
    if !metadata.is_file() {
      return Err(load_error(path, "不是普通文件"));
    }
    info!("加载模型文件: {}", path.display());
    debug!(
      "模型文件大小: {:.2} MB",
      metadata.len() as f64 / (1024.0 * 1024.0)
    );

    let (session, provider) = Self::build_session(path, provider)?;
    check_contract(&session)?;

    let input = Tensor::from_array((
      [1usize, 3, 640, 640],
      vec![0f32; INPUT_LEN].into_boxed_slice(),
    ))
    .map_err(|e| load_error(path, e))?;

    info!("模型加载完成，执行后端: {:?}", provider);

    Ok(Self {
      model_path: path.to_path_buf(),
      provider,
      state: Some(SessionState {
        session,
        input,
        output: vec![0f32; OUTPUT_LEN].into_boxed_slice(),
      }),
    })
  }

  fn build_session(
    path: &Path,
    provider: ExecutionProvider,
  ) -> Result<(OrtSession, ExecutionProvider), SessionError> {
    if let Some(dispatch) = provider.dispatch() {
      match Self::commit(path, Some(dispatch)) {
        Ok(session) => return Ok((session, provider)),
        Err(SessionError::Provider(reason)) => {
          warn!("执行后端 {:?} 不可用，回退到 CPU: {}", provider, reason);
        }
        Err(e) => return Err(e),
      }
    }

    Ok((Self::commit(path, None)?, ExecutionProvider::Cpu))
  }

  fn commit(
    path: &Path,
    dispatch: Option<ExecutionProviderDispatch>,
  ) -> Result<OrtSession, SessionError> {
    let mut builder = OrtSession::builder().map_err(|e| load_error(path, e))?;
    if let Some(dispatch) = dispatch {
      builder = builder
        .with_execution_providers([dispatch])
        .map_err(|e| SessionError::Provider(e.to_string()))?;
    }
    builder
      .commit_from_file(path)
      .map_err(|e| load_error(path, e))
  }

  pub fn model_path(&self) -> &Path {
    &self.model_path
  }

  /// 实际使用的执行后端
  pub fn provider(&self) -> ExecutionProvider {
    self.provider
  }

  pub fn is_open(&self) -> bool {
    self.state.is_some()
  }

  /// 同步推理
  ///
  /// 将 `pixels` 覆盖写入输入张量，返回输出缓冲的只读视图。
  /// 视图在下一次调用前有效，出错不重试。
  pub fn infer(&mut self, pixels: &[f32]) -> Result<&[f32], SessionError> {
    if pixels.len() != INPUT_LEN {
      return Err(SessionError::InputLength {
        expected: INPUT_LEN,
        actual: pixels.len(),
      });
    }
    let state = self.state.as_mut().ok_or(SessionError::Closed)?;

    let (_, input) = state.input.extract_tensor_mut();
    input.copy_from_slice(pixels);

    let outputs = state
      .session
      .run(ort::inputs![INPUT_NAME => &state.input])
      .map_err(|e| SessionError::Inference(e.to_string()))?;
    let (_, data) = outputs
      .get(OUTPUT_NAME)
      .ok_or_else(|| SessionError::Inference(format!("缺少输出 {}", OUTPUT_NAME)))?
      .try_extract_tensor::<f32>()
      .map_err(|e| SessionError::Inference(e.to_string()))?;
    if data.len() != OUTPUT_LEN {
      return Err(SessionError::Inference(format!(
        "输出长度不匹配: 期望 {}, 实际 {}",
        OUTPUT_LEN,
        data.len()
      )));
    }
    state.output.copy_from_slice(data);
    drop(outputs);

    Ok(&state.output)
  }

  /// 释放模型与张量，重复调用安全
  pub fn close(&mut self) {
    if self.state.take().is_some() {
      info!("推理会话已关闭: {}", self.model_path.display());
    }
  }
}

fn declared_shape(value_type: &ValueType) -> Option<Vec<i64>> {
  value_type
    .tensor_shape()
    .map(|shape| shape.iter().copied().collect())
}

fn check_contract(session: &OrtSession) -> Result<(), SessionError> {
  let input = session
    .inputs
    .iter()
    .find(|input| input.name == INPUT_NAME)
    .and_then(|input| declared_shape(&input.input_type));
  check_shape(INPUT_NAME, &INPUT_SHAPE, input)?;

  let output = session
    .outputs
    .iter()
    .find(|output| output.name == OUTPUT_NAME)
    .and_then(|output| declared_shape(&output.output_type));
  check_shape(OUTPUT_NAME, &OUTPUT_SHAPE, output)
}

/// 动态维度（-1）视为匹配
fn check_shape(
  tensor: &'static str,
  expected: &[i64],
  declared: Option<Vec<i64>>,
) -> Result<(), SessionError> {
  let matches = declared.as_ref().is_some_and(|dims| {
    dims.len() == expected.len()
      && dims
        .iter()
        .zip(expected)
        .all(|(dim, want)| *dim == -1 || dim == want)
  });

  if matches {
    debug!("张量 {} 形状校验通过: {:?}", tensor, declared);
    Ok(())
  } else {
    Err(SessionError::ShapeMismatch {
      tensor,
      expected: expected.to_vec(),
      declared,
    })
  }
}

const ONNX_SCHEME: &str = "onnx";

/// 从 URL 构建推理会话
pub struct SessionBuilder {
  model_path: PathBuf,
  provider: ExecutionProvider,
}

impl FromUrlWithScheme for SessionBuilder {
  const SCHEME: &'static str = ONNX_SCHEME;
}

impl FromUrl for SessionBuilder {
  type Error = SessionError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(SessionError::SchemeMismatch);
    }

    let mut provider = None;
    let mut device = 0;
    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "provider" => provider = Some(value.into_owned()),
        "device" => {
          device = value
            .parse()
            .map_err(|_| SessionError::InvalidParameter(format!("无效的设备号: {}", value)))?
        }
        _ => {}
      }
    }

    let provider = match provider {
      Some(name) => ExecutionProvider::parse(&name, device)?,
      None => ExecutionProvider::default(),
    };

    Ok(SessionBuilder {
      model_path: decode_url_path(url),
      provider,
    })
  }
}

impl SessionBuilder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      provider: ExecutionProvider::default(),
    }
  }

  pub fn provider(mut self, provider: ExecutionProvider) -> Self {
    self.provider = provider;
    self
  }

  pub fn model_path(&self) -> &Path {
    &self.model_path
  }

  pub fn build(self) -> Result<Session, SessionError> {
    Session::open(&self.model_path, self.provider)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn exact_shape_matches() {
    assert!(check_shape(OUTPUT_NAME, &OUTPUT_SHAPE, Some(vec![1, 84, 8400])).is_ok());
  }

  #[test]
  fn dynamic_batch_matches() {
    assert!(check_shape(INPUT_NAME, &INPUT_SHAPE, Some(vec![-1, 3, 640, 640])).is_ok());
  }

  #[test]
  fn wrong_output_shape_is_rejected() {
    let err = check_shape(OUTPUT_NAME, &OUTPUT_SHAPE, Some(vec![1, 85, 8400])).unwrap_err();
    assert!(matches!(
      err,
      SessionError::ShapeMismatch {
        tensor: "output0",
        ..
      }
    ));
  }

  #[test]
  fn wrong_rank_or_missing_tensor_is_rejected() {
    assert!(check_shape(OUTPUT_NAME, &OUTPUT_SHAPE, Some(vec![84, 8400])).is_err());
    assert!(check_shape(INPUT_NAME, &INPUT_SHAPE, None).is_err());
  }

  #[test]
  fn missing_model_file_fails_to_load() {
    let err = Session::open("/nonexistent/yolov8m.onnx", ExecutionProvider::Cpu)
      .err()
      .unwrap();
    assert!(matches!(err, SessionError::ModelLoad { .. }));
  }

  #[test]
  fn directory_is_not_a_model() {
    let dir = tempfile::tempdir().unwrap();
    let err = Session::open(dir.path(), ExecutionProvider::Cpu).err().unwrap();
    assert!(matches!(err, SessionError::ModelLoad { .. }));
  }

  #[test]
  fn builder_reads_provider_from_url() {
    let url = Url::parse("onnx:///models/yolov8m.onnx?provider=tensorrt&device=1").unwrap();
    let builder = SessionBuilder::from_url(&url).unwrap();
    assert_eq!(builder.provider, ExecutionProvider::TensorRt(1));
    assert_eq!(builder.model_path(), Path::new("/models/yolov8m.onnx"));
  }

  #[test]
  fn builder_rejects_other_schemes_and_providers() {
    let url = Url::parse("video:///models/yolov8m.onnx").unwrap();
    assert!(matches!(
      SessionBuilder::from_url(&url),
      Err(SessionError::SchemeMismatch)
    ));

    let url = Url::parse("onnx:///models/yolov8m.onnx?provider=npu").unwrap();
    assert!(matches!(
      SessionBuilder::from_url(&url),
      Err(SessionError::InvalidParameter(_))
    ));
  }
}
