// 该文件是 Shanan Cascade （山南级联） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, Ordering};

use chrono::{Datelike, Utc};
use image::RgbImage;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::warn;

use crate::{FromUrl, FromUrlWithScheme, model::ProcessResult, output::Render, url_file_path};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 按日期目录记录每幅图像的结果（JSON）
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  frame_counter: AtomicU16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");
    Ok(DirectoryRecordOutput::new(url_file_path(uri)).with_always(always))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      frame_counter: AtomicU16::new(0),
      always: false,
    }
  }

  /// 为 true 时没有检测结果也写记录
  pub fn with_always(mut self, always: bool) -> Self {
    self.always = always;
    self
  }

  fn frame_id(&self) -> u16 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn record_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.json",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

fn round4(value: f32) -> f64 {
  (value as f64 * 10_000.0).round() / 10_000.0
}

/// 结果列表的 JSON 表示
pub fn results_to_json(image: &RgbImage, results: &[ProcessResult]) -> Value {
  let objects: Vec<Value> = results
    .iter()
    .enumerate()
    .map(|(index, result)| {
      let detection = &result.detection;
      let bbox = detection.bbox;
      let classifications: Vec<Value> = result
        .classifications
        .iter()
        .map(|c| json!({ "label_id": c.label_id, "score": round4(c.score) }))
        .collect();

      json!({
        "index": index + 1,
        "label_id": detection.label_id,
        "score": round4(detection.score),
        "bbox": {
          "x": bbox.x,
          "y": bbox.y,
          "width": bbox.width,
          "height": bbox.height,
        },
        "mask": detection.mask.is_some(),
        "classifications": classifications,
      })
    })
    .collect();

  json!({
    "image": { "width": image.width(), "height": image.height() },
    "objects": objects,
  })
}

impl Render for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, image: &RgbImage, results: &[ProcessResult]) -> Result<(), Self::Error> {
    if !self.always && results.is_empty() {
      return Ok(());
    }

    let path = self.record_path()?;
    let record = serde_json::to_string_pretty(&results_to_json(image, results))?;
    std::fs::write(&path, record)?;
    warn!("保存记录到文件: {}", path.display());
    Ok(())
  }
}
