// 该文件是 Shanan Cascade （山南级联） 项目的一部分。
// src/args.rs - 项目参数配置
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

use clap::Parser;

use shanan_cascade::{
  model::Device,
  pipeline::PipelineConfig,
  region::{FillColor, RegionConfig, TargetSize},
};

/// 检测 + 分类两阶段推理
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图像路径
  #[arg(value_name = "IMAGE")]
  pub image: PathBuf,

  /// 检测模型路径或 URL（如 yolo26:///models/det.rknn?threshold=0.4）
  #[arg(value_name = "DETECTOR_MODEL")]
  pub detector: String,

  /// 分类模型路径或 URL（如 rknn-cls:///models/cls.rknn?top_k=3）
  #[arg(value_name = "CLASSIFIER_MODEL")]
  pub classifier: String,

  /// 推理设备: cpu, npu, npu:1, cuda:0 ...
  #[arg(long, default_value = "npu", value_name = "DEVICE")]
  pub device: Device,

  /// 可视化结果保存路径
  #[arg(long, default_value = "output.jpg", value_name = "OUTPUT")]
  pub output: PathBuf,

  /// 分类器输入尺寸
  #[arg(long, default_value = "224x224", value_name = "WxH")]
  pub target_size: TargetSize,

  /// 掩码外区域的填充颜色
  #[arg(long, default_value = "0,0,0", value_name = "R,G,B")]
  pub mask_fill: FillColor,

  /// 标签字体文件（TTF/OTF），不提供时不绘制文字
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,

  /// 将结果以 JSON 记录到该目录
  #[arg(long, value_name = "DIR")]
  pub record: Option<PathBuf>,

  /// 重复推理次数，大于 1 时统计平均耗时
  #[arg(long, default_value = "1", value_name = "N")]
  pub repeat: usize,

  /// 输出调试日志
  #[arg(short, long)]
  pub verbose: bool,
}

pub const EXIT_FAILURE: u8 = 255;

/// 参数错误的退出码：帮助与版本信息为 0，其余为 [`EXIT_FAILURE`]
pub fn exit_code_for(error: &clap::Error) -> u8 {
  if error.exit_code() == 0 { 0 } else { EXIT_FAILURE }
}

impl Args {
  pub fn pipeline_config(&self) -> PipelineConfig {
    PipelineConfig {
      region: RegionConfig {
        target_size: self.target_size,
        mask_fill_value: self.mask_fill,
      },
    }
  }
}
