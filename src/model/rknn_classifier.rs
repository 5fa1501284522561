// 该文件是 Shanan Cascade （山南级联） 项目的一部分。
// src/model/rknn_classifier.rs - RKNN 分类后端
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

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{
    Classification, Classifier, ConstructionError, Device, InferenceError, RKNN_SCHEME,
    require_npu,
  },
  region::Region,
  url_file_path,
};

const RKNN_CLS_TOP_K: usize = 5;

/// 单输入单输出的分类模型，输出为各类别的 logits
pub struct RknnClassifier {
  context: Context,
  top_k: usize,
}

pub struct RknnClassifierBuilder {
  model_path: String,
  flags: InitFlags,
  top_k: usize,
}

impl FromUrlWithScheme for RknnClassifierBuilder {
  const SCHEME: &'static str = "rknn-cls";
}

impl FromUrl for RknnClassifierBuilder {
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

    let mut top_k = RKNN_CLS_TOP_K;
    for (k, v) in url.query_pairs() {
      if k == "top_k" {
        top_k = v
          .parse::<usize>()
          .ok()
          .filter(|k| *k > 0)
          .ok_or_else(|| ConstructionError::InvalidConfig(format!("top_k 无效: {}", v)))?;
      }
    }

    Ok(RknnClassifierBuilder {
      model_path: url_file_path(url),
      flags: InitFlags::default(),
      top_k,
    })
  }
}

impl RknnClassifierBuilder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn device(self, device: &Device) -> Result<Self, ConstructionError> {
    require_npu(device)?;
    Ok(self)
  }

  pub fn build(self) -> Result<RknnClassifier, ConstructionError> {
    info!("加载分类模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;

    let context = Context::new(&model_data, self.flags)
      .map_err(|e| ConstructionError::ModelInvalid(format!("无法创建推理上下文: {}", e)))?;

    let num_inputs = context
      .num_inputs()
      .map_err(|e| ConstructionError::ModelInvalid(format!("无法获取输入数量: {}", e)))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| ConstructionError::ModelInvalid(format!("无法获取输出数量: {}", e)))?;
    if num_inputs != 1 || num_outputs < 1 {
      let msg = format!(
        "分类模型需要 1 个输入和至少 1 个输出, 实际为 {}/{}",
        num_inputs, num_outputs
      );
      error!("{}", msg);
      return Err(ConstructionError::ModelInvalid(msg));
    }

    info!("分类模型加载完成, top_k = {}", self.top_k);
    Ok(RknnClassifier {
      context,
      top_k: self.top_k,
    })
  }
}

/// softmax 后按分数降序排列，保留前 `top_k` 项
fn rank(logits: &[f32], top_k: usize) -> Vec<Classification> {
  let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let exp: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
  let sum: f32 = exp.iter().sum();

  let mut ranked: Vec<Classification> = exp
    .into_iter()
    .enumerate()
    .map(|(idx, e)| Classification {
      label_id: idx as i32,
      score: e / sum,
    })
    .collect();
  ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
  ranked.truncate(top_k);
  ranked
}

impl Classifier for RknnClassifier {
  fn apply(&mut self, region: &Region) -> Result<Vec<Classification>, InferenceError> {
    debug!("设置分类输入: {}x{}", region.width(), region.height());
    self.context.set_input(
      0,
      region.as_nhwc(),
      TensorFormat::NHWC,
      TensorType::UInt8,
    )?;
    self.context.run()?;

    let output = self.context.get_outputs()?;
    let logits = output.get_f32(0)?;
    if logits.is_empty() {
      return Err(InferenceError::MalformedOutput("分类输出为空".to_string()));
    }

    Ok(rank(logits, self.top_k))
  }

  fn name(&self) -> &str {
    "rknn-cls"
  }
}
