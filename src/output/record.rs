// 该文件是 Huakuang （画框） 项目的一部分。
// src/output/record.rs - 检测结果记录
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
  fs::File,
  io::{BufWriter, Write},
  path::{Path, PathBuf},
};

use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::model::Detection;

/// 每帧一行 JSON 的检测记录
pub struct DetectionRecord {
  path: PathBuf,
  writer: BufWriter<File>,
  lines: usize,
}

impl DetectionRecord {
  pub fn create(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
    let path = path.as_ref().to_path_buf();
    let writer = BufWriter::new(File::create(&path)?);
    info!("检测记录写入: {}", path.display());
    Ok(Self {
      path,
      writer,
      lines: 0,
    })
  }

  pub fn append(&mut self, frame: u64, detections: &[Detection]) -> Result<(), std::io::Error> {
    let items: Vec<_> = detections
      .iter()
      .map(|d| {
        json!({
          "label": d.label,
          "probability": d.probability,
          "bbox": [d.x1, d.y1, d.x2, d.y2],
        })
      })
      .collect();
    let line = json!({
      "frame": frame,
      "timestamp": Utc::now().to_rfc3339(),
      "detections": items,
    });
    writeln!(self.writer, "{}", line)?;
    self.lines += 1;
    Ok(())
  }

  pub fn finish(mut self) -> Result<(), std::io::Error> {
    self.writer.flush()?;
    info!("检测记录完成: {} ({} 行)", self.path.display(), self.lines);
    Ok(())
  }
}
