// 该文件是 Shanan Cascade （山南级联） 项目的一部分。
// src/output/table.rs - 结果表格输出
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

use std::io::Write;

use image::RgbImage;

use crate::{
  model::{Classification, Detection, ProcessResult},
  output::Render,
};

pub const DEFAULT_COLUMN_WIDTH: usize = 40;
const COLUMN_GAP: &str = "  ";

/// 两列定宽文本表格，仅用于调试查看，不是稳定的机器可读格式
#[derive(Debug, Clone, Copy)]
pub struct ResultFormatter {
  column_width: usize,
}

impl Default for ResultFormatter {
  fn default() -> Self {
    Self {
      column_width: DEFAULT_COLUMN_WIDTH,
    }
  }
}

impl ResultFormatter {
  pub fn with_column_width(column_width: usize) -> Self {
    Self { column_width }
  }

  pub fn format(&self, results: &[ProcessResult]) -> String {
    let mut table = String::new();
    let separator = self.separator();

    self.push_row(
      &mut table,
      &["Detection".to_string()],
      &["Classification".to_string()],
    );
    table.push_str(&separator);

    for result in results {
      self.push_row(
        &mut table,
        &detection_lines(&result.detection),
        &classification_lines(&result.classifications),
      );
      table.push_str(&separator);
    }

    table
  }

  fn separator(&self) -> String {
    let rule = "-".repeat(self.column_width);
    format!("{}{}{}\n", rule, COLUMN_GAP, rule)
  }

  fn push_row(&self, table: &mut String, left: &[String], right: &[String]) {
    let width = self.column_width;
    for i in 0..left.len().max(right.len()) {
      let l = left.get(i).map(String::as_str).unwrap_or("");
      let r = right.get(i).map(String::as_str).unwrap_or("");
      let line = format!("{:<width$}{}{}", l, COLUMN_GAP, r);
      table.push_str(line.trim_end());
      table.push('\n');
    }
  }
}

fn detection_lines(detection: &Detection) -> Vec<String> {
  let bbox = detection.bbox;
  vec![
    format!("Label: {}", detection.label_id),
    format!("Score: {}", detection.score),
    format!(
      "BBox: ({}, {}, {}, {})",
      bbox.x, bbox.y, bbox.width, bbox.height
    ),
  ]
}

fn classification_lines(classifications: &[Classification]) -> Vec<String> {
  classifications
    .iter()
    .flat_map(|c| [format!("Label: {}", c.label_id), format!("Score: {}", c.score)])
    .collect()
}

/// 以默认列宽渲染
pub fn format_results(results: &[ProcessResult]) -> String {
  ResultFormatter::default().format(results)
}

/// 将表格打印到标准输出
#[derive(Debug, Default, Clone, Copy)]
pub struct TableOutput {
  formatter: ResultFormatter,
}

impl TableOutput {
  pub fn new(formatter: ResultFormatter) -> Self {
    Self { formatter }
  }
}

impl Render for TableOutput {
  type Error = std::io::Error;

  fn render_result(&self, _image: &RgbImage, results: &[ProcessResult]) -> Result<(), Self::Error> {
    let table = self.formatter.format(results);
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "\nProcessing Results:\n{}", table)?;
    stdout.flush()
  }
}
