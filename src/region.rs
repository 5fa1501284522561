// 该文件是 Shanan Cascade （山南级联） 项目的一部分。
// src/region.rs - 分类区域提取
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

//! # 区域提取
//!
//! 将单个检测结果转换为固定尺寸的彩色区域，作为分类器输入。
//!
//! - 无掩码：按 bbox 裁剪后缩放到目标尺寸（[`BoxCrop`]）
//! - 有掩码：掩码重采样到源图像尺寸，掩码外像素填充为背景色，
//!   再将整幅图像缩放到目标尺寸（[`MaskedCanvas`]）
//!
//! 掩码路径不会先按 bbox 裁剪，分类器看到的是整幅画布的缩略图。

use std::{fmt, str::FromStr};

use image::{GrayImage, Rgb, RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::debug;

use crate::model::{BBox, Detection};

const DEFAULT_REGION_WIDTH: u32 = 224;
const DEFAULT_REGION_HEIGHT: u32 = 224;
const REGION_FILTER: FilterType = FilterType::Triangle;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidRegionError {
  #[error("边界框面积为零: {width}x{height}")]
  ZeroArea { width: u32, height: u32 },
  #[error("边界框 ({}, {}, {}, {}) 超出图像范围 {image_width}x{image_height}", .bbox.x, .bbox.y, .bbox.width, .bbox.height)]
  OutOfBounds {
    bbox: BBox,
    image_width: u32,
    image_height: u32,
  },
}

/// 区域目标尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSize {
  pub width: u32,
  pub height: u32,
}

impl Default for TargetSize {
  fn default() -> Self {
    Self {
      width: DEFAULT_REGION_WIDTH,
      height: DEFAULT_REGION_HEIGHT,
    }
  }
}

#[derive(Error, Debug)]
#[error("无法解析参数 '{0}'")]
pub struct ParseConfigError(String);

impl FromStr for TargetSize {
  type Err = ParseConfigError;

  /// 格式 `WxH`，例如 `224x224`
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let err = || ParseConfigError(s.to_string());
    let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(err)?;
    let width = w.trim().parse::<u32>().map_err(|_| err())?;
    let height = h.trim().parse::<u32>().map_err(|_| err())?;
    Ok(TargetSize { width, height })
  }
}

impl fmt::Display for TargetSize {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}x{}", self.width, self.height)
  }
}

/// 掩码外区域的填充色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FillColor(pub [u8; 3]);

impl FromStr for FillColor {
  type Err = ParseConfigError;

  /// 格式 `R,G,B`，或单个灰度值
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let err = || ParseConfigError(s.to_string());
    let values = s
      .split(',')
      .map(|v| v.trim().parse::<u8>().map_err(|_| err()))
      .collect::<Result<Vec<_>, _>>()?;
    match values.as_slice() {
      [v] => Ok(FillColor([*v; 3])),
      [r, g, b] => Ok(FillColor([*r, *g, *b])),
      _ => Err(err()),
    }
  }
}

impl fmt::Display for FillColor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let [r, g, b] = self.0;
    write!(f, "{},{},{}", r, g, b)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegionConfig {
  pub target_size: TargetSize,
  pub mask_fill_value: FillColor,
}

/// 送入分类器的固定尺寸区域，独占自己的像素缓冲
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
  image: RgbImage,
}

impl Region {
  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn as_image(&self) -> &RgbImage {
    &self.image
  }

  pub fn into_image(self) -> RgbImage {
    self.image
  }

  /// NHWC 排列的 RGB 字节
  pub fn as_nhwc(&self) -> &[u8] {
    self.image.as_raw()
  }
}

pub trait RegionStrategy {
  fn extract(
    &self,
    image: &RgbImage,
    detection: &Detection,
    config: &RegionConfig,
  ) -> Result<Region, InvalidRegionError>;
}

/// 按 bbox 裁剪再缩放
#[derive(Debug, Default, Clone, Copy)]
pub struct BoxCrop;

impl RegionStrategy for BoxCrop {
  fn extract(
    &self,
    image: &RgbImage,
    detection: &Detection,
    config: &RegionConfig,
  ) -> Result<Region, InvalidRegionError> {
    let bbox = detection.bbox;
    check_area(&bbox)?;
    if !bbox.fits_within(image.width(), image.height()) {
      return Err(InvalidRegionError::OutOfBounds {
        bbox,
        image_width: image.width(),
        image_height: image.height(),
      });
    }

    let crop = image::imageops::crop_imm(image, bbox.x, bbox.y, bbox.width, bbox.height).to_image();
    let TargetSize { width, height } = config.target_size;
    let region = image::imageops::resize(&crop, width, height, REGION_FILTER);
    Ok(Region { image: region })
  }
}

/// 掩码引导的整幅画布提取
#[derive(Debug, Default, Clone, Copy)]
pub struct MaskedCanvas;

impl RegionStrategy for MaskedCanvas {
  fn extract(
    &self,
    image: &RgbImage,
    detection: &Detection,
    config: &RegionConfig,
  ) -> Result<Region, InvalidRegionError> {
    let Some(mask) = detection.mask.as_ref() else {
      return BoxCrop.extract(image, detection, config);
    };

    let (width, height) = image.dimensions();
    let mask = mask.resampled(width, height).to_gray8();
    let masked = apply_mask(image, &mask, config.mask_fill_value);

    let TargetSize { width, height } = config.target_size;
    let region = image::imageops::resize(&masked, width, height, REGION_FILTER);
    Ok(Region { image: region })
  }
}

/// 掩码非零处保留源像素，其余填充 `fill`；`mask` 须与 `image` 同尺寸
pub fn apply_mask(image: &RgbImage, mask: &GrayImage, fill: FillColor) -> RgbImage {
  let mut masked = image.clone();
  for (pixel, weight) in masked.pixels_mut().zip(mask.pixels()) {
    if weight[0] == 0 {
      *pixel = Rgb(fill.0);
    }
  }
  masked
}

fn check_area(bbox: &BBox) -> Result<(), InvalidRegionError> {
  if bbox.is_empty() {
    return Err(InvalidRegionError::ZeroArea {
      width: bbox.width,
      height: bbox.height,
    });
  }
  Ok(())
}

#[derive(Debug, Default, Clone)]
pub struct RegionExtractor {
  config: RegionConfig,
}

impl RegionExtractor {
  pub fn new(config: RegionConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &RegionConfig {
    &self.config
  }

  /// 按是否携带掩码选择提取策略
  pub fn strategy_for(detection: &Detection) -> &'static dyn RegionStrategy {
    if detection.mask.is_some() {
      &MaskedCanvas
    } else {
      &BoxCrop
    }
  }

  pub fn extract(&self, image: &RgbImage, detection: &Detection) -> Result<Region, InvalidRegionError> {
    check_area(&detection.bbox)?;
    debug!(
      "提取区域: 标签 {}, 掩码 {}, 目标尺寸 {}",
      detection.label_id,
      detection.mask.is_some(),
      self.config.target_size
    );
    Self::strategy_for(detection).extract(image, detection, &self.config)
  }
}
