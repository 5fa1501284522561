// 该文件是 Shanan Cascade （山南级联） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use shanan_cascade::{
  input::ImageFileInput,
  logger::Logger,
  model::RKNN_SCHEME,
  model_url,
  output::{OutputWrapper, SaveImageFileOutput, TableOutput, Visualizer},
  pipeline::Pipeline,
  task::{OneShotTask, RepeatShotTask, Task},
};

use crate::args::{Args, EXIT_FAILURE, exit_code_for};

fn main() -> ExitCode {
  let args = match Args::try_parse() {
    Ok(args) => args,
    Err(e) => {
      e.print().ok();
      return ExitCode::from(exit_code_for(&e));
    }
  };

  if args.verbose {
    Logger::new();
  } else {
    tracing_subscriber::fmt::init();
  }

  match run(args) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      error!("运行失败: {:#}", e);
      eprintln!("Error: {:#}", e);
      ExitCode::from(EXIT_FAILURE)
    }
  }
}

fn run(args: Args) -> Result<()> {
  info!("输入图像: {}", args.image.display());
  info!("检测模型: {}", args.detector);
  info!("分类模型: {}", args.classifier);
  info!("推理设备: {}", args.device);

  let input = ImageFileInput::open(&args.image)
    .with_context(|| format!("Failed to load image: {}", args.image.display()))?;

  let detector_url = model_url(&args.detector, RKNN_SCHEME)
    .with_context(|| format!("检测模型路径无效: {}", args.detector))?;
  let classifier_url = model_url(&args.classifier, RKNN_SCHEME)
    .with_context(|| format!("分类模型路径无效: {}", args.classifier))?;

  let pipeline = Pipeline::open(
    &detector_url,
    &classifier_url,
    &args.device,
    args.pipeline_config(),
  )?;

  let visualizer = match args.font.as_deref() {
    Some(font) => Visualizer::default()
      .with_font_file(font)
      .with_context(|| format!("无法加载字体: {}", font.display()))?,
    None => Visualizer::default(),
  };
  if !visualizer.draws_labels() {
    warn!("未指定 --font，结果图像不绘制 Object N 标签");
  }

  let mut outputs = vec![
    OutputWrapper::Table(TableOutput::default()),
    OutputWrapper::SaveImageFileOutput(SaveImageFileOutput::new(&args.output, visualizer)),
  ];

  if let Some(directory) = args.record.as_ref() {
    #[cfg(feature = "directory_record")]
    outputs.push(OutputWrapper::DirectoryRecordOutput(
      shanan_cascade::output::DirectoryRecordOutput::new(directory),
    ));
    #[cfg(not(feature = "directory_record"))]
    warn!(
      "未启用 directory_record 特性，忽略记录目录: {}",
      directory.display()
    );
  }

  if args.repeat > 1 {
    RepeatShotTask::new(args.repeat).run_task(input, pipeline, outputs)?;
  } else {
    OneShotTask.run_task(input, pipeline, outputs)?;
  }

  println!("\nVisualization saved to {}", args.output.display());
  Ok(())
}
