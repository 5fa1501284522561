// 该文件是 Shanan Cascade （山南级联） 项目的一部分。
// src/model/yolo26.rs - YOLO26 RKNN 检测后端
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

use image::{RgbImage, imageops::FilterType};
use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{
    BoxCorners, ConstructionError, Detector, Device, InferenceError, RKNN_SCHEME, RawDetection,
    require_npu,
  },
  url_file_path,
};

const YOLO26_NUM_INPUTS: u32 = 1;
const YOLO26_NUM_OUTPUTS: u32 = 6;
const YOLO26_CLASS_NUM: usize = 80;
const YOLO26_INPUT_W: u32 = 640;
const YOLO26_INPUT_H: u32 = 640;
const YOLO26_HEAD_SIZES: [(usize, usize); 3] = [(80, 80), (40, 40), (20, 20)];
const YOLO26_STRIDES: [f32; 3] = [8.0, 16.0, 32.0];
const YOLO26_OBJECT_THRESH: f32 = 0.5;

/// YOLO26 检测器，输出不带掩码
pub struct Yolo26 {
  context: Context,
  threshold: f32,
}

pub struct Yolo26Builder {
  model_path: String,
  flags: InitFlags,
  threshold: f32,
}

impl FromUrlWithScheme for Yolo26Builder {
  const SCHEME: &'static str = "yolo26";
}

impl FromUrl for Yolo26Builder {
  type Error = ConstructionError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME && url.scheme() != RKNN_SCHEME {
      return Err(ConstructionError::UnsupportedScheme(format!(
        "模型路径必须使用 {} 或 {} 方案, 实际为 {}",
        Self::SCHEME,
        RKNN_SCHEME,
        url.scheme()
      )));
    }

    let mut threshold = YOLO26_OBJECT_THRESH;
    for (k, v) in url.query_pairs() {
      if k == "threshold" {
        threshold = v
          .parse::<f32>()
          .ok()
          .filter(|t| (0.0..=1.0).contains(t))
          .ok_or_else(|| ConstructionError::InvalidConfig(format!("检测阈值无效: {}", v)))?;
      }
    }

    Ok(Yolo26Builder {
      model_path: url_file_path(url),
      flags: InitFlags::default(),
      threshold,
    })
  }
}

impl Yolo26Builder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn device(self, device: &Device) -> Result<Self, ConstructionError> {
    require_npu(device)?;
    Ok(self)
  }

  pub fn build(self) -> Result<Yolo26, ConstructionError> {
    info!("加载检测模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, self.flags)
      .map_err(|e| ConstructionError::ModelInvalid(format!("无法创建推理上下文: {}", e)))?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(ConstructionError::ModelInvalid(format!(
          "无法查询 SDK 版本: {}",
          e
        )));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| ConstructionError::ModelInvalid(format!("无法获取输入数量: {}", e)))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| ConstructionError::ModelInvalid(format!("无法获取输出数量: {}", e)))?;

    if num_inputs != YOLO26_NUM_INPUTS || num_outputs != YOLO26_NUM_OUTPUTS {
      let msg = format!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        YOLO26_NUM_INPUTS, YOLO26_NUM_OUTPUTS, num_inputs, num_outputs
      );
      error!("{}", msg);
      return Err(ConstructionError::ModelInvalid(msg));
    }

    info!("检测模型加载完成");
    Ok(Yolo26 {
      context,
      threshold: self.threshold,
    })
  }
}

/// 根据张量大小匹配回归和分类输出
/// 返回 (reg, cls) 元组，如果大小不匹配则返回 None
fn match_reg_cls_tensors<'a>(
  tensor1: &'a [f32],
  tensor2: &'a [f32],
  reg_expected: usize,
  cls_expected: usize,
) -> Option<(&'a [f32], &'a [f32])> {
  if tensor1.len() == reg_expected && tensor2.len() == cls_expected {
    Some((tensor1, tensor2))
  } else if tensor1.len() == cls_expected && tensor2.len() == reg_expected {
    Some((tensor2, tensor1))
  } else {
    None
  }
}

/// 解码单个检测头，坐标归一化到 [0, 1]
fn decode_head(
  reg: &[f32],
  cls: &[f32],
  (map_h, map_w): (usize, usize),
  stride: f32,
  threshold: f32,
  items: &mut Vec<(u32, f32, [f32; 4])>,
) {
  let spatial = map_h * map_w;
  let (input_w, input_h) = (YOLO26_INPUT_W as f32, YOLO26_INPUT_H as f32);

  for h in 0..map_h {
    for w in 0..map_w {
      let idx = h * map_w + w;

      let (class_id, max_logit) = (0..YOLO26_CLASS_NUM)
        .map(|c| (c as u32, cls[c * spatial + idx]))
        .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
      let score = sigmoid(max_logit);
      if score <= threshold {
        continue;
      }

      let grid_x = (w as f32) + 0.5;
      let grid_y = (h as f32) + 0.5;
      let xmin = ((grid_x - reg[idx]) * stride).clamp(0.0, input_w);
      let ymin = ((grid_y - reg[spatial + idx]) * stride).clamp(0.0, input_h);
      let xmax = ((grid_x + reg[2 * spatial + idx]) * stride).clamp(0.0, input_w);
      let ymax = ((grid_y + reg[3 * spatial + idx]) * stride).clamp(0.0, input_h);

      items.push((
        class_id,
        score,
        [xmin / input_w, ymin / input_h, xmax / input_w, ymax / input_h],
      ));
    }
  }
}

impl Detector for Yolo26 {
  fn apply(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>, InferenceError> {
    let (image_w, image_h) = image.dimensions();

    debug!("预处理: 缩放到 {}x{}", YOLO26_INPUT_W, YOLO26_INPUT_H);
    let resized = image::imageops::resize(image, YOLO26_INPUT_W, YOLO26_INPUT_H, FilterType::Triangle);

    debug!("设置模型输入");
    self.context.set_input(
      0,
      resized.as_raw().as_slice(),
      TensorFormat::NHWC,
      TensorType::UInt8,
    )?;

    debug!("执行模型推理");
    self.context.run()?;

    let output = self.context.get_outputs()?;
    let mut items = Vec::new();
    for (head_idx, (&head_size, stride)) in YOLO26_HEAD_SIZES.iter().zip(YOLO26_STRIDES).enumerate() {
      let spatial = head_size.0 * head_size.1;
      let tensor1 = output.get_f32(head_idx * 2)?;
      let tensor2 = output.get_f32(head_idx * 2 + 1)?;

      // 输出顺序不固定，按张量大小区分回归与分类
      let (reg, cls) = match_reg_cls_tensors(tensor1, tensor2, 4 * spatial, YOLO26_CLASS_NUM * spatial)
        .ok_or_else(|| {
          InferenceError::MalformedOutput(format!(
            "检测头 {} 输出大小不匹配: {} / {}",
            head_idx,
            tensor1.len(),
            tensor2.len()
          ))
        })?;

      decode_head(reg, cls, head_size, stride, self.threshold, &mut items);
    }
    debug!("检测到 {} 个物体", items.len());

    // 模型空间 -> 源图像像素坐标
    let (scale_x, scale_y) = (image_w as f32, image_h as f32);
    Ok(
      items
        .into_iter()
        .map(|(class_id, score, [x0, y0, x1, y1])| RawDetection {
          label_id: class_id as i32,
          score,
          bbox: BoxCorners {
            left: x0 * scale_x,
            top: y0 * scale_y,
            right: x1 * scale_x,
            bottom: y1 * scale_y,
          },
          mask: None,
        })
        .collect(),
    )
  }

  fn name(&self) -> &str {
    "yolo26"
  }
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}
