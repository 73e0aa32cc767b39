// 该文件是 Huakuang （画框） 项目的一部分。
// src/task.rs - 流水线编排
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

use std::{
  path::PathBuf,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::{Duration, Instant},
};

use anyhow::{Context, anyhow};
use tracing::{debug, error, info, warn};

use crate::{
  config::{PipelineConfig, ResourceFactory},
  frame::ImageFormat,
  input::FrameSource,
  model::Detector,
  output::{FrameGeometry, FrameSink, draw::Renderer, record::DetectionRecord},
};

/// 输入与输出之间传递标注帧使用的格式
const TRANSPORT_FORMAT: ImageFormat = ImageFormat::Png;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
  Idle,
  Running,
  /// 输入结束或提前停止，资源已释放
  Drained,
  /// 出错终止，资源已释放
  Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
  pub state: PipelineState,
  pub frames: u64,
  pub detections: u64,
  pub elapsed: Duration,
}

/// 单线程逐帧流水线：读帧 → 检测 → 画框 → 写帧
///
/// 打开顺序为输入、输出、检测器，释放顺序相反，且每个资源只释放一次。
pub struct Pipeline {
  renderer: Renderer,
  max_frames: Option<u64>,
  record: Option<PathBuf>,
  cancel: Arc<AtomicBool>,
  state: PipelineState,
}

impl Pipeline {
  pub fn new(renderer: Renderer) -> Self {
    Self {
      renderer,
      max_frames: None,
      record: None,
      cancel: Arc::new(AtomicBool::new(false)),
      state: PipelineState::Idle,
    }
  }

  pub fn from_config(config: &PipelineConfig) -> anyhow::Result<Self> {
    let renderer = config.renderer().context("无法加载字体")?;
    Ok(
      Self::new(renderer)
        .with_max_frames(config.max_frames)
        .with_record(config.record.clone()),
    )
  }

  pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
    self.max_frames = max_frames;
    self
  }

  pub fn with_record(mut self, record: Option<PathBuf>) -> Self {
    self.record = record;
    self
  }

  /// 外部置位后，流水线在下一帧开始前停止
  pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn cancel_flag(&self) -> Arc<AtomicBool> {
    self.cancel.clone()
  }

  pub fn state(&self) -> PipelineState {
    self.state
  }

  pub fn run<F>(&mut self, factory: &F) -> anyhow::Result<PipelineReport>
  where
    F: ResourceFactory,
    F::Source: FrameSource,
    F::Sink: FrameSink,
    F::Detector: Detector,
    <F::Source as FrameSource>::Error: std::error::Error + Send + Sync + 'static,
    <F::Sink as FrameSink>::Error: std::error::Error + Send + Sync + 'static,
    <F::Detector as Detector>::Error: std::error::Error + Send + Sync + 'static,
  {
    if self.state != PipelineState::Idle {
      return Err(anyhow!("流水线已运行过，当前状态 {:?}", self.state));
    }
    self.state = PipelineState::Running;
    info!("开始任务...");
    let started = Instant::now();

    let mut source = factory.open_source().inspect_err(|_| self.fail())?;
    let geometry = FrameGeometry {
      width: source.width(),
      height: source.height(),
      fps: source.fps(),
    };
    info!(
      "输入: {}x{} @ {:.2} fps",
      geometry.width, geometry.height, geometry.fps
    );

    let mut sink = match factory.open_sink(geometry) {
      Ok(sink) => sink,
      Err(e) => {
        source.close();
        self.fail();
        return Err(e);
      }
    };

    let mut detector = match factory.open_detector() {
      Ok(detector) => detector,
      Err(e) => {
        if let Err(close) = sink.close() {
          warn!("关闭输出失败: {}", close);
        }
        source.close();
        self.fail();
        return Err(e);
      }
    };

    let outcome = self.drive(&mut source, &mut sink, &mut detector);

    // 逆序释放
    detector.close();
    let sink_closed = sink.close();
    source.close();

    let (frames, detections) = match (outcome, sink_closed) {
      (Ok(counts), Ok(())) => counts,
      (Ok(_), Err(e)) => {
        self.fail();
        return Err(anyhow::Error::new(e).context("输出收尾失败"));
      }
      (Err(e), sink_closed) => {
        if let Err(close) = sink_closed {
          warn!("关闭输出失败: {}", close);
        }
        self.fail();
        return Err(e);
      }
    };

    self.state = PipelineState::Drained;
    let elapsed = started.elapsed();
    info!(
      "任务完成: {} 帧, {} 个目标, 耗时 {:.2?}",
      frames, detections, elapsed
    );
    Ok(PipelineReport {
      state: self.state,
      frames,
      detections,
      elapsed,
    })
  }

  fn fail(&mut self) {
    error!("流水线失败，资源已释放");
    self.state = PipelineState::Failed;
  }

  fn drive<S, K, D>(
    &self,
    source: &mut S,
    sink: &mut K,
    detector: &mut D,
  ) -> anyhow::Result<(u64, u64)>
  where
    S: FrameSource,
    K: FrameSink,
    D: Detector,
    S::Error: std::error::Error + Send + Sync + 'static,
    K::Error: std::error::Error + Send + Sync + 'static,
    D::Error: std::error::Error + Send + Sync + 'static,
  {
    let mut record = match &self.record {
      Some(path) => Some(
        DetectionRecord::create(path)
          .with_context(|| format!("无法创建检测记录 {}", path.display()))?,
      ),
      None => None,
    };

    let mut frames = 0u64;
    let mut detections = 0u64;
    loop {
      if self.cancel.load(Ordering::SeqCst) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
      if let Some(max) = self.max_frames
        && frames >= max
      {
        info!("达到指定帧数 {}, 退出任务循环", max);
        break;
      }

      let now = Instant::now();
      let Some(frame) = source
        .next_frame()
        .with_context(|| format!("读取第 {} 帧失败", frames + 1))?
      else {
        info!("输入结束");
        break;
      };

      let found = detector
        .detect(&frame)
        .with_context(|| format!("第 {} 帧推理失败", frames + 1))?;
      let elapsed_a = now.elapsed();

      let annotated = self
        .renderer
        .annotate(&frame, &found, TRANSPORT_FORMAT)
        .with_context(|| format!("第 {} 帧标注失败", frames + 1))?;
      sink
        .write_frame(&annotated)
        .with_context(|| format!("写入第 {} 帧失败", frames + 1))?;

      if let Some(record) = record.as_mut() {
        record
          .append(frames, &found)
          .context("写入检测记录失败")?;
      }

      frames += 1;
      detections += found.len() as u64;
      debug!(
        "第 {} 帧: {} 个目标, 推理 {:.2?} / 总计 {:.2?}",
        frames,
        found.len(),
        elapsed_a,
        now.elapsed()
      );
    }

    if let Some(record) = record {
      record.finish().context("写入检测记录失败")?;
    }
    Ok((frames, detections))
  }
}
