// 该文件是 Shanan Cascade （山南级联） 项目的一部分。
// tests/end_to_end.rs - 公开接口的端到端测试
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

use image::{Rgb, RgbImage};
use shanan_cascade::{
  model::{
    BBox, BoxCorners, Classification, Classifier, Detector, InferenceError, MaskPixels,
    RawDetection, RawMask,
  },
  output::format_results,
  pipeline::{Pipeline, PipelineConfig, ProcessError},
  region::{FillColor, Region, RegionConfig, TargetSize},
};

/// 按顺序返回预设检测结果
struct ScriptedDetector(Vec<RawDetection>);

impl Detector for ScriptedDetector {
  fn apply(&mut self, _image: &RgbImage) -> Result<Vec<RawDetection>, InferenceError> {
    Ok(self.0.clone())
  }
}

/// 以区域平均亮度作为分数，便于观察掩码效果
struct BrightnessClassifier;

impl Classifier for BrightnessClassifier {
  fn apply(&mut self, region: &Region) -> Result<Vec<Classification>, InferenceError> {
    let pixels = region.as_nhwc();
    let mean = pixels.iter().map(|&p| p as f32).sum::<f32>() / pixels.len() as f32;
    Ok(vec![
      Classification {
        label_id: 1,
        score: mean / 255.0,
      },
      Classification {
        label_id: 0,
        score: 1.0 - mean / 255.0,
      },
    ])
  }
}

fn corners(x: f32, y: f32, w: f32, h: f32) -> BoxCorners {
  BoxCorners {
    left: x,
    top: y,
    right: x + w,
    bottom: y + h,
  }
}

#[test]
fn box_detection_produces_one_result() {
  let image = RgbImage::from_pixel(640, 480, Rgb([255, 255, 255]));
  let detector = ScriptedDetector(vec![RawDetection {
    label_id: 3,
    score: 0.91,
    bbox: corners(10.0, 10.0, 100.0, 100.0),
    mask: None,
  }]);
  let mut pipeline = Pipeline::new(detector, BrightnessClassifier);

  let results = pipeline.process(&image).unwrap();
  assert_eq!(results.len(), 1);
  assert_eq!(results[0].detection.bbox, BBox::new(10, 10, 100, 100));
  assert_eq!(results[0].classifications[0].label_id, 1);
  assert!((results[0].classifications[0].score - 1.0).abs() < 1e-6);

  let table = format_results(&results);
  assert!(table.starts_with("Detection"));
  assert!(table.contains("BBox: (10, 10, 100, 100)"));
  assert!(table.contains("Label: 3"));
}

#[test]
fn masked_detection_blanks_background() {
  let image = RgbImage::from_pixel(64, 64, Rgb([200, 200, 200]));
  // 只保留左上角 8x8
  let mut pixels = vec![0u8; 16 * 16];
  for y in 0..2 {
    for x in 0..2 {
      pixels[y * 16 + x] = 255;
    }
  }
  let detector = ScriptedDetector(vec![RawDetection {
    label_id: 5,
    score: 0.7,
    bbox: corners(0.0, 0.0, 8.0, 8.0),
    mask: Some(RawMask {
      width: 16,
      height: 16,
      pixels: MaskPixels::Gray8(pixels),
    }),
  }]);
  let config = PipelineConfig {
    region: RegionConfig {
      target_size: TargetSize {
        width: 32,
        height: 32,
      },
      mask_fill_value: FillColor([0, 0, 0]),
    },
  };
  let mut pipeline = Pipeline::with_config(detector, BrightnessClassifier, config).unwrap();

  let results = pipeline.process(&image).unwrap();
  let mask = results[0].detection.mask.as_ref().unwrap();
  assert_eq!(mask.dimensions(), (64, 64));
  // 大部分画布被填充为黑色
  assert!(results[0].classifications[0].score < 0.25);
}

#[test]
fn degenerate_box_aborts_whole_image() {
  let image = RgbImage::new(64, 64);
  let detector = ScriptedDetector(vec![
    RawDetection {
      label_id: 1,
      score: 0.9,
      bbox: corners(0.0, 0.0, 10.0, 10.0),
      mask: None,
    },
    RawDetection {
      label_id: 2,
      score: 0.8,
      bbox: corners(5.0, 5.0, 0.0, 10.0),
      mask: None,
    },
  ]);
  let mut pipeline = Pipeline::new(detector, BrightnessClassifier);

  assert!(matches!(
    pipeline.process(&image),
    Err(ProcessError::InvalidRegion(_))
  ));
}

#[test]
fn empty_image_has_empty_table_body() {
  let mut pipeline = Pipeline::new(ScriptedDetector(Vec::new()), BrightnessClassifier);
  let results = pipeline.process(&RgbImage::new(32, 32)).unwrap();
  assert!(results.is_empty());
  assert_eq!(format_results(&results).lines().count(), 2);
}
