// 该文件是 Shanan Cascade （山南级联） 项目的一部分。
// src/output/visualizer.rs - 可视化模块
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use thiserror::Error;

use crate::model::ProcessResult;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_OFFSET: i32 = 20;
// 掩码叠加：红色通道增加半强度
const MASK_RED_BOOST: u8 = 128;

#[derive(Error, Debug)]
pub enum FontError {
  #[error("无法读取字体文件: {0}")]
  Io(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  Invalid(String),
}

/// 可视化工具
pub struct Visualizer {
  /// 字体，缺省时不绘制标签
  font: Option<FontArc>,
  /// 字体大小
  font_scale: PxScale,
  /// 边界框颜色
  color: Rgb<u8>,
}

impl Default for Visualizer {
  fn default() -> Self {
    Self::new()
  }
}

impl Visualizer {
  /// 创建一个新的可视化工具
  pub fn new() -> Self {
    Self {
      font: None,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
      color: BOX_COLOR,
    }
  }

  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = Some(font);
    self
  }

  /// 从 TTF/OTF 文件加载标签字体
  pub fn with_font_file(self, path: &Path) -> Result<Self, FontError> {
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data).map_err(|e| FontError::Invalid(e.to_string()))?;
    Ok(self.with_font(font))
  }

  /// 是否绘制 "Object N" 标签；没有字体时只画框和掩码
  pub fn draws_labels(&self) -> bool {
    self.font.is_some()
  }

  /// 在图像上绘制边界框、掩码和对象编号
  pub fn draw_results(&self, image: &mut RgbImage, results: &[ProcessResult]) {
    for (index, result) in results.iter().enumerate() {
      let detection = &result.detection;
      let bbox = detection.bbox;
      let x = bbox.x as i32;
      let y = bbox.y as i32;

      if bbox.width > 0 && bbox.height > 0 {
        let rect = Rect::at(x, y).of_size(bbox.width, bbox.height);
        draw_hollow_rect_mut(image, rect, self.color);

        // 第二个边框以增加可见度
        if bbox.width > 2 && bbox.height > 2 {
          let inner_rect = Rect::at(x + 1, y + 1).of_size(bbox.width - 2, bbox.height - 2);
          draw_hollow_rect_mut(image, inner_rect, self.color);
        }
      }

      if let Some(mask) = detection.mask.as_ref() {
        let mask = mask.resampled(image.width(), image.height()).to_gray8();
        for (pixel, weight) in image.pixels_mut().zip(mask.pixels()) {
          if weight[0] != 0 {
            pixel[0] = pixel[0].saturating_add(MASK_RED_BOOST);
          }
        }
      }

      if let Some(font) = self.font.as_ref() {
        let label = format!("Object {}", index + 1);
        let text_y = (y - LABEL_OFFSET).max(0);
        draw_text_mut(image, self.color, x, text_y, self.font_scale, font, &label);
      }
    }
  }
}
