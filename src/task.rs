// 该文件是 Shanan Cascade （山南级联） 项目的一部分。
// src/task.rs - 推理任务
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

use std::time::{Duration, Instant};

use image::RgbImage;
use tracing::{info, warn};

use crate::{
  model::{Classifier, Detector},
  output::Render,
  pipeline::Pipeline,
};

pub trait Task<I, P, O>: Sized {
  type Error;
  fn run_task(self, input: I, pipeline: P, output: O) -> Result<(), Self::Error>;
}

/// 处理第一幅输入图像一次
pub struct OneShotTask;

impl<I, D, C, O, RE> Task<I, Pipeline<D, C>, O> for OneShotTask
where
  I: Iterator<Item = RgbImage>,
  D: Detector,
  C: Classifier,
  O: Render<Error = RE>,
  RE: std::error::Error + Sync + Send + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut pipeline: Pipeline<D, C>, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let image = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    info!("输入图像获取成功，开始推理...");
    let now = Instant::now();
    let results = pipeline.process(&image)?;
    let elapsed = now.elapsed();
    info!("推理完成，耗时: {:.2?}", elapsed);
    output.render_result(&image, &results)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(())
  }
}

/// 对同一幅图像重复处理，统计平均耗时
pub struct RepeatShotTask {
  times: usize,
}

impl RepeatShotTask {
  pub fn new(times: usize) -> Self {
    Self { times }
  }
}

/// 超过两次时去掉前两次预热
fn average_latency(times: &[Duration]) -> Option<Duration> {
  let measured = if times.len() > 2 { &times[2..] } else { times };
  if measured.is_empty() {
    return None;
  }
  Some(measured.iter().sum::<Duration>() / measured.len() as u32)
}

impl<I, D, C, O, RE> Task<I, Pipeline<D, C>, O> for RepeatShotTask
where
  I: Iterator<Item = RgbImage>,
  D: Detector,
  C: Classifier,
  O: Render<Error = RE>,
  RE: std::error::Error + Sync + Send + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, mut pipeline: Pipeline<D, C>, output: O) -> Result<(), Self::Error> {
    if self.times == 0 {
      anyhow::bail!("重复次数必须大于 0");
    }

    info!("开始任务...");
    let image = input.next().ok_or_else(|| anyhow::anyhow!("没有输入图像"))?;
    info!("输入图像获取成功，开始推理...");
    let mut times = Vec::with_capacity(self.times);
    for i in 0..self.times {
      let now = Instant::now();
      let results = pipeline.process(&image)?;
      let elapsed = now.elapsed();
      info!("({})推理完成，耗时: {:.2?}", i, elapsed);
      output.render_result(&image, &results)?;
      info!("({})渲染完成，耗时: {:.2?}", i, now.elapsed());
      times.push(elapsed);
    }

    if let Some(average) = average_latency(&times) {
      warn!("平均推理时间: {:.2?}", average);
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{Arc, Mutex};

  use super::*;
  use crate::{
    model::{BoxCorners, Classification, InferenceError, ProcessResult, RawDetection},
    region::Region,
  };

  struct OneBox;

  impl Detector for OneBox {
    fn apply(&mut self, _image: &RgbImage) -> Result<Vec<RawDetection>, InferenceError> {
      Ok(vec![RawDetection {
        label_id: 1,
        score: 0.9,
        bbox: BoxCorners {
          left: 0.0,
          top: 0.0,
          right: 4.0,
          bottom: 4.0,
        },
        mask: None,
      }])
    }
  }

  struct Constant;

  impl Classifier for Constant {
    fn apply(&mut self, _region: &Region) -> Result<Vec<Classification>, InferenceError> {
      Ok(vec![Classification {
        label_id: 2,
        score: 1.0,
      }])
    }
  }

  #[derive(Clone, Default)]
  struct Recorder {
    calls: Arc<Mutex<Vec<Vec<ProcessResult>>>>,
  }

  impl Render for Recorder {
    type Error = std::io::Error;

    fn render_result(&self, _image: &RgbImage, results: &[ProcessResult]) -> Result<(), Self::Error> {
      self.calls.lock().unwrap().push(results.to_vec());
      Ok(())
    }
  }

  fn input() -> std::vec::IntoIter<RgbImage> {
    vec![RgbImage::new(8, 8)].into_iter()
  }

  #[test]
  fn one_shot_renders_once() {
    let recorder = Recorder::default();
    OneShotTask
      .run_task(input(), Pipeline::new(OneBox, Constant), recorder.clone())
      .unwrap();

    let calls = recorder.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0][0].classifications[0].label_id, 2);
  }

  #[test]
  fn one_shot_without_input_fails() {
    let result = OneShotTask.run_task(
      Vec::<RgbImage>::new().into_iter(),
      Pipeline::new(OneBox, Constant),
      Recorder::default(),
    );
    assert!(result.is_err());
  }

  #[test]
  fn repeat_shot_renders_each_run() {
    let recorder = Recorder::default();
    RepeatShotTask::new(4)
      .run_task(input(), Pipeline::new(OneBox, Constant), recorder.clone())
      .unwrap();
    assert_eq!(recorder.calls.lock().unwrap().len(), 4);

    let zero = RepeatShotTask::new(0).run_task(input(), Pipeline::new(OneBox, Constant), Recorder::default());
    assert!(zero.is_err());
  }

  #[test]
  fn average_skips_warm_up() {
    let ms = Duration::from_millis;
    assert_eq!(average_latency(&[ms(100), ms(50), ms(10), ms(20)]), Some(ms(15)));
    assert_eq!(average_latency(&[ms(10), ms(30)]), Some(ms(20)));
    assert_eq!(average_latency(&[]), None);
  }
}
