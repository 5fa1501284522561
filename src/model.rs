// 该文件是 Shanan Cascade （山南级联） 项目的一部分。
// src/model.rs - 模型接口与数据定义
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

use std::{fmt, str::FromStr};

use image::{GrayImage, ImageBuffer, Luma, RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::region::Region;

/// 通用 RKNN 方案，检测与分类后端都接受
pub const RKNN_SCHEME: &str = "rknn";

#[derive(Error, Debug)]
pub enum ConstructionError {
  #[error("模型加载错误: {0}")]
  ModelLoad(#[from] std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("设备不可用: {0}")]
  DeviceUnavailable(String),
  #[error("不支持的模型方案: {0}")]
  UnsupportedScheme(String),
  #[error("配置无效: {0}")]
  InvalidConfig(String),
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("推理后端错误: {0}")]
  Backend(String),
  #[error("模型输入无效: {0}")]
  InvalidInput(String),
  #[error("模型输出无效: {0}")]
  MalformedOutput(String),
}

#[cfg(feature = "rknn")]
impl From<rknpu::Error> for InferenceError {
  fn from(err: rknpu::Error) -> Self {
    InferenceError::Backend(err.to_string())
  }
}

/// 推理设备标识，例如 `cpu`、`npu`、`cuda:1`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Device {
  Cpu,
  Accelerator { name: String, index: u32 },
}

#[derive(Error, Debug)]
#[error("无法解析设备标识: '{0}'")]
pub struct DeviceParseError(String);

impl FromStr for Device {
  type Err = DeviceParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim().to_lowercase();
    let (name, index) = match s.split_once(':') {
      Some((name, index)) => {
        let index = index
          .parse::<u32>()
          .map_err(|_| DeviceParseError(s.clone()))?;
        (name, index)
      }
      None => (s.as_str(), 0),
    };

    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
      return Err(DeviceParseError(s.clone()));
    }

    if name == "cpu" {
      return Ok(Device::Cpu);
    }

    Ok(Device::Accelerator {
      name: name.to_string(),
      index,
    })
  }
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Device::Cpu => write!(f, "cpu"),
      Device::Accelerator { name, index } => write!(f, "{}:{}", name, index),
    }
  }
}

/// 检测器输出的角点坐标（绝对像素）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxCorners {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

/// 图像空间中的边界框 (x, y, width, height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BBox {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
}

impl BBox {
  pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.width == 0 || self.height == 0
  }

  /// 是否完整落在 `width` x `height` 的图像内
  pub fn fits_within(&self, width: u32, height: u32) -> bool {
    self.x as u64 + self.width as u64 <= width as u64
      && self.y as u64 + self.height as u64 <= height as u64
  }
}

/// 角点坐标截断为整数像素：`x = trunc(left)`, `width = trunc(right - left)`，
/// 与检测器常见的整数矩形构造一致；负坐标先截到 0，反向框得到零宽或零高。
impl From<BoxCorners> for BBox {
  fn from(corners: BoxCorners) -> Self {
    let left = corners.left.max(0.0);
    let top = corners.top.max(0.0);

    BBox {
      x: left as u32,
      y: top as u32,
      width: (corners.right - left).max(0.0) as u32,
      height: (corners.bottom - top).max(0.0) as u32,
    }
  }
}

/// 检测器边界上的掩码像素
#[derive(Debug, Clone, PartialEq)]
pub enum MaskPixels {
  Gray8(Vec<u8>),
  /// 取值范围 [0, 1] 的软掩码
  Float32(Vec<f32>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawMask {
  pub width: u32,
  pub height: u32,
  pub pixels: MaskPixels,
}

/// 检测器原始输出
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
  pub label_id: i32,
  pub score: f32,
  pub bbox: BoxCorners,
  pub mask: Option<RawMask>,
}

pub type FloatMaskImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// 已校验的单通道掩码
#[derive(Debug, Clone, PartialEq)]
pub enum Mask {
  Gray8(GrayImage),
  Float32(FloatMaskImage),
}

impl Mask {
  pub fn from_raw(raw: RawMask) -> Result<Self, InferenceError> {
    let RawMask {
      width,
      height,
      pixels,
    } = raw;

    if width == 0 || height == 0 {
      return Err(InferenceError::MalformedOutput(format!(
        "掩码尺寸为空: {}x{}",
        width, height
      )));
    }

    let expected = width as usize * height as usize;
    let mismatch = |actual: usize| {
      InferenceError::MalformedOutput(format!(
        "掩码数据长度不匹配: 期望长度 {}, 实际长度 {}",
        expected, actual
      ))
    };

    match pixels {
      MaskPixels::Gray8(data) => {
        let len = data.len();
        GrayImage::from_raw(width, height, data)
          .filter(|_| len == expected)
          .map(Mask::Gray8)
          .ok_or_else(|| mismatch(len))
      }
      MaskPixels::Float32(data) => {
        let len = data.len();
        FloatMaskImage::from_raw(width, height, data)
          .filter(|_| len == expected)
          .map(Mask::Float32)
          .ok_or_else(|| mismatch(len))
      }
    }
  }

  pub fn dimensions(&self) -> (u32, u32) {
    match self {
      Mask::Gray8(mask) => mask.dimensions(),
      Mask::Float32(mask) => mask.dimensions(),
    }
  }

  /// 线性插值重采样到指定尺寸，尺寸一致时直接复制
  pub fn resampled(&self, width: u32, height: u32) -> Mask {
    if self.dimensions() == (width, height) {
      return self.clone();
    }

    match self {
      Mask::Gray8(mask) => Mask::Gray8(image::imageops::resize(
        mask,
        width,
        height,
        FilterType::Triangle,
      )),
      Mask::Float32(mask) => Mask::Float32(image::imageops::resize(
        mask,
        width,
        height,
        FilterType::Triangle,
      )),
    }
  }

  /// 转为 8 位单通道掩码
  ///
  /// 软掩码按饱和取整（四舍六入五取偶）转为整数，再二值化为 0 / 255：
  /// 只有大于 0.5 的值保留，0.3 之类的弱响应会被当作背景。
  pub fn to_gray8(&self) -> GrayImage {
    match self {
      Mask::Gray8(mask) => mask.clone(),
      Mask::Float32(mask) => {
        let (width, height) = mask.dimensions();
        GrayImage::from_fn(width, height, |x, y| {
          let value = mask.get_pixel(x, y)[0];
          if value.round_ties_even() >= 1.0 {
            Luma([u8::MAX])
          } else {
            Luma([0])
          }
        })
      }
    }
  }
}

/// 单个检测结果，bbox 位于源图像坐标系
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub label_id: i32,
  pub score: f32,
  pub bbox: BBox,
  pub mask: Option<Mask>,
}

impl Detection {
  /// 由检测器原始输出组装检测结果，掩码重采样到源图像尺寸
  pub fn from_raw(raw: RawDetection, image_width: u32, image_height: u32) -> Result<Self, InferenceError> {
    let mask = raw
      .mask
      .map(Mask::from_raw)
      .transpose()?
      .map(|mask| mask.resampled(image_width, image_height));

    Ok(Detection {
      label_id: raw.label_id,
      score: raw.score,
      bbox: BBox::from(raw.bbox),
      mask,
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
  pub label_id: i32,
  pub score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessResult {
  pub detection: Detection,
  /// 保持分类器给出的排序
  pub classifications: Vec<Classification>,
}

pub trait Detector {
  fn apply(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>, InferenceError>;

  fn name(&self) -> &str {
    "detector"
  }
}

pub trait Classifier {
  fn apply(&mut self, region: &Region) -> Result<Vec<Classification>, InferenceError>;

  fn name(&self) -> &str {
    "classifier"
  }
}

impl<T: Detector + ?Sized> Detector for Box<T> {
  fn apply(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>, InferenceError> {
    (**self).apply(image)
  }

  fn name(&self) -> &str {
    (**self).name()
  }
}

impl<T: Classifier + ?Sized> Classifier for Box<T> {
  fn apply(&mut self, region: &Region) -> Result<Vec<Classification>, InferenceError> {
    (**self).apply(region)
  }

  fn name(&self) -> &str {
    (**self).name()
  }
}

/// 按 URL 方案打开检测模型
pub fn open_detector(url: &Url, device: &Device) -> Result<Box<dyn Detector>, ConstructionError> {
  info!("打开检测模型: {} (设备: {})", url, device);

  #[cfg(feature = "rknn")]
  {
    use crate::{FromUrl, FromUrlWithScheme};

    if url.scheme() == Yolo26Builder::SCHEME || url.scheme() == RKNN_SCHEME {
      let detector = Yolo26Builder::from_url(url)?.device(device)?.build()?;
      return Ok(Box::new(detector));
    }
  }

  Err(ConstructionError::UnsupportedScheme(url.scheme().to_string()))
}

/// 按 URL 方案打开分类模型
pub fn open_classifier(
  url: &Url,
  device: &Device,
) -> Result<Box<dyn Classifier>, ConstructionError> {
  info!("打开分类模型: {} (设备: {})", url, device);

  #[cfg(feature = "rknn")]
  {
    use crate::{FromUrl, FromUrlWithScheme};

    if url.scheme() == RknnClassifierBuilder::SCHEME || url.scheme() == RKNN_SCHEME {
      let classifier = RknnClassifierBuilder::from_url(url)?
        .device(device)?
        .build()?;
      return Ok(Box::new(classifier));
    }
  }

  Err(ConstructionError::UnsupportedScheme(url.scheme().to_string()))
}

/// RKNN 上下文只能运行在 NPU 上
#[cfg(feature = "rknn")]
fn require_npu(device: &Device) -> Result<(), ConstructionError> {
  match device {
    Device::Accelerator { name, .. } if name == "npu" => Ok(()),
    other => Err(ConstructionError::DeviceUnavailable(format!(
      "RKNN 后端仅支持 npu 设备, 实际为 {}",
      other
    ))),
  }
}

#[cfg(feature = "rknn")]
mod rknn_classifier;
#[cfg(feature = "rknn")]
pub use self::rknn_classifier::{RknnClassifier, RknnClassifierBuilder};

#[cfg(feature = "rknn")]
mod yolo26;
#[cfg(feature = "rknn")]
pub use self::yolo26::{Yolo26, Yolo26Builder};
