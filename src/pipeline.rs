// 该文件是 Shanan Cascade （山南级联） 项目的一部分。
// src/pipeline.rs - 检测 + 分类两阶段流水线
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

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  model::{
    Classifier, ConstructionError, Detection, Detector, Device, InferenceError, ProcessResult,
    open_classifier, open_detector,
  },
  region::{InvalidRegionError, RegionConfig, RegionExtractor},
};

#[derive(Error, Debug)]
pub enum ProcessError {
  #[error("区域无效: {0}")]
  InvalidRegion(#[from] InvalidRegionError),
  #[error("推理失败: {0}")]
  Inference(#[from] InferenceError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineConfig {
  pub region: RegionConfig,
}

impl PipelineConfig {
  pub fn validate(&self) -> Result<(), ConstructionError> {
    let size = self.region.target_size;
    if size.width == 0 || size.height == 0 {
      return Err(ConstructionError::InvalidConfig(format!(
        "区域目标尺寸不能为空: {}",
        size
      )));
    }
    Ok(())
  }
}

/// 两阶段推理流水线
///
/// 检测器与分类器由流水线独占；`process` 需要 `&mut self`，
/// 同一实例上的调用因此是串行的。需要吞吐量时在每个工作线程内各建一条流水线。
pub struct Pipeline<D, C> {
  detector: D,
  classifier: C,
  extractor: RegionExtractor,
}

impl Pipeline<Box<dyn Detector>, Box<dyn Classifier>> {
  /// 加载两个模型，构建开销较大，每条流水线只做一次
  pub fn open(
    detector_model: &Url,
    classifier_model: &Url,
    device: &Device,
    config: PipelineConfig,
  ) -> Result<Self, ConstructionError> {
    config.validate()?;

    info!("正在加载检测模型...");
    let detector = open_detector(detector_model, device)?;
    info!("正在加载分类模型...");
    let classifier = open_classifier(classifier_model, device)?;
    info!("模型加载完成");

    Self::with_config(detector, classifier, config)
  }
}

impl<D: Detector, C: Classifier> Pipeline<D, C> {
  pub fn new(detector: D, classifier: C) -> Self {
    Self {
      detector,
      classifier,
      extractor: RegionExtractor::default(),
    }
  }

  /// 配置无效（如目标尺寸为零）时返回 `ConstructionError::InvalidConfig`
  pub fn with_config(detector: D, classifier: C, config: PipelineConfig) -> Result<Self, ConstructionError> {
    config.validate()?;
    Ok(Self {
      detector,
      classifier,
      extractor: RegionExtractor::new(config.region),
    })
  }

  pub fn config(&self) -> PipelineConfig {
    PipelineConfig {
      region: *self.extractor.config(),
    }
  }

  /// 处理一幅图像
  ///
  /// 结果顺序与检测器输出顺序一致。任一检测或分类失败都会使整幅图像失败，
  /// 不返回部分结果，也不重试。
  pub fn process(&mut self, image: &RgbImage) -> Result<Vec<ProcessResult>, ProcessError> {
    let (width, height) = image.dimensions();

    debug!("运行检测模型 {}", self.detector.name());
    let raw = self.detector.apply(image).inspect_err(|e| {
      error!("检测失败: {}", e);
    })?;
    info!("检测到 {} 个对象", raw.len());

    let mut results = Vec::with_capacity(raw.len());
    for (index, raw) in raw.into_iter().enumerate() {
      let detection = Detection::from_raw(raw, width, height)?;
      debug!(
        "对象 {}: 标签 {}, 置信度 {:.2}, 边界框 {:?}",
        index + 1,
        detection.label_id,
        detection.score,
        detection.bbox
      );

      let region = self.extractor.extract(image, &detection).inspect_err(|e| {
        error!("对象 {} 区域提取失败: {}", index + 1, e);
      })?;

      let classifications = self.classifier.apply(&region).inspect_err(|e| {
        error!("对象 {} 分类失败: {}", index + 1, e);
      })?;
      debug!("对象 {}: {} 个分类候选", index + 1, classifications.len());

      results.push(ProcessResult {
        detection,
        classifications,
      });
    }

    Ok(results)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{Arc, Mutex};

  use image::{Rgb, imageops::FilterType};

  use super::*;
  use crate::{
    model::{BBox, BoxCorners, Classification, Mask, MaskPixels, RawDetection, RawMask},
    region::{Region, TargetSize},
  };

  struct FakeDetector {
    detections: Vec<RawDetection>,
    fail: bool,
  }

  impl Detector for FakeDetector {
    fn apply(&mut self, _image: &RgbImage) -> Result<Vec<RawDetection>, InferenceError> {
      if self.fail {
        return Err(InferenceError::Backend("设备不可用".to_string()));
      }
      Ok(self.detections.clone())
    }
  }

  #[derive(Default)]
  struct FakeClassifier {
    seen: Arc<Mutex<Vec<Region>>>,
    fail_on_call: Option<usize>,
  }

  impl Classifier for FakeClassifier {
    fn apply(&mut self, region: &Region) -> Result<Vec<Classification>, InferenceError> {
      let mut seen = self.seen.lock().unwrap();
      if self.fail_on_call == Some(seen.len()) {
        return Err(InferenceError::Backend("分类超时".to_string()));
      }
      seen.push(region.clone());
      Ok(vec![Classification {
        label_id: 7,
        score: 0.88,
      }])
    }
  }

  fn raw(label_id: i32, score: f32, x: f32, y: f32, w: f32, h: f32) -> RawDetection {
    RawDetection {
      label_id,
      score,
      bbox: BoxCorners {
        left: x,
        top: y,
        right: x + w,
        bottom: y + h,
      },
      mask: None,
    }
  }

  fn image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 42]))
  }

  #[test]
  fn single_detection_end_to_end() {
    let detector = FakeDetector {
      detections: vec![raw(3, 0.91, 10.0, 10.0, 100.0, 100.0)],
      fail: false,
    };
    let classifier = FakeClassifier::default();
    let seen = classifier.seen.clone();
    let mut pipeline = Pipeline::new(detector, classifier);

    let results = pipeline.process(&image(640, 480)).unwrap();
    assert_eq!(
      results,
      vec![ProcessResult {
        detection: Detection {
          label_id: 3,
          score: 0.91,
          bbox: BBox::new(10, 10, 100, 100),
          mask: None,
        },
        classifications: vec![Classification {
          label_id: 7,
          score: 0.88
        }],
      }]
    );

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!((seen[0].width(), seen[0].height()), (224, 224));
  }

  #[test]
  fn emission_order_is_preserved() {
    let detector = FakeDetector {
      detections: vec![
        raw(1, 0.2, 0.0, 0.0, 10.0, 10.0),
        raw(2, 0.9, 5.0, 5.0, 10.0, 10.0),
        raw(3, 0.5, 20.0, 20.0, 10.0, 10.0),
      ],
      fail: false,
    };
    let mut pipeline = Pipeline::new(detector, FakeClassifier::default());

    let results = pipeline.process(&image(64, 64)).unwrap();
    let labels: Vec<_> = results.iter().map(|r| r.detection.label_id).collect();
    assert_eq!(labels, vec![1, 2, 3]);
  }

  #[test]
  fn zero_area_never_reaches_classifier() {
    let detector = FakeDetector {
      detections: vec![raw(1, 0.9, 10.0, 10.0, 0.0, 20.0)],
      fail: false,
    };
    let classifier = FakeClassifier::default();
    let seen = classifier.seen.clone();
    let mut pipeline = Pipeline::new(detector, classifier);

    let err = pipeline.process(&image(64, 64)).unwrap_err();
    assert!(matches!(
      err,
      ProcessError::InvalidRegion(InvalidRegionError::ZeroArea { .. })
    ));
    assert!(seen.lock().unwrap().is_empty());
  }

  #[test]
  fn detector_failure_propagates() {
    let detector = FakeDetector {
      detections: vec![],
      fail: true,
    };
    let mut pipeline = Pipeline::new(detector, FakeClassifier::default());
    assert!(matches!(
      pipeline.process(&image(8, 8)),
      Err(ProcessError::Inference(_))
    ));
  }

  #[test]
  fn classifier_failure_discards_partial_results() {
    let detector = FakeDetector {
      detections: vec![
        raw(1, 0.9, 0.0, 0.0, 4.0, 4.0),
        raw(2, 0.8, 2.0, 2.0, 4.0, 4.0),
      ],
      fail: false,
    };
    let classifier = FakeClassifier {
      fail_on_call: Some(1),
      ..Default::default()
    };
    let mut pipeline = Pipeline::new(detector, classifier);
    assert!(matches!(
      pipeline.process(&image(16, 16)),
      Err(ProcessError::Inference(InferenceError::Backend(_)))
    ));
  }

  #[test]
  fn full_mask_converges_with_full_image_resize() {
    let mut detection = raw(5, 0.7, 10.0, 10.0, 100.0, 100.0);
    detection.mask = Some(RawMask {
      width: 640,
      height: 480,
      pixels: MaskPixels::Gray8(vec![255; 640 * 480]),
    });
    let detector = FakeDetector {
      detections: vec![detection],
      fail: false,
    };
    let classifier = FakeClassifier::default();
    let seen = classifier.seen.clone();
    let mut pipeline = Pipeline::new(detector, classifier);

    let source = image(640, 480);
    pipeline.process(&source).unwrap();

    let expected = image::imageops::resize(&source, 224, 224, FilterType::Triangle);
    assert_eq!(seen.lock().unwrap()[0].as_image(), &expected);
  }

  #[test]
  fn mask_is_stored_at_image_size() {
    let mut detection = raw(5, 0.7, 0.0, 0.0, 8.0, 8.0);
    detection.mask = Some(RawMask {
      width: 4,
      height: 3,
      pixels: MaskPixels::Gray8(vec![0, 255, 255, 0, 0, 255, 255, 0, 0, 0, 0, 0]),
    });
    let detector = FakeDetector {
      detections: vec![detection],
      fail: false,
    };
    let mut pipeline = Pipeline::new(detector, FakeClassifier::default());

    let results = pipeline.process(&image(32, 24)).unwrap();
    let mask = results[0].detection.mask.as_ref().unwrap();
    assert_eq!(mask.dimensions(), (32, 24));
    assert!(matches!(mask, Mask::Gray8(_)));
  }

  #[test]
  fn malformed_mask_is_inference_error() {
    let mut detection = raw(5, 0.7, 0.0, 0.0, 8.0, 8.0);
    detection.mask = Some(RawMask {
      width: 4,
      height: 4,
      pixels: MaskPixels::Gray8(vec![0; 3]),
    });
    let detector = FakeDetector {
      detections: vec![detection],
      fail: false,
    };
    let mut pipeline = Pipeline::new(detector, FakeClassifier::default());
    assert!(matches!(
      pipeline.process(&image(8, 8)),
      Err(ProcessError::Inference(InferenceError::MalformedOutput(_)))
    ));
  }

  #[test]
  fn custom_target_size_reaches_classifier() {
    let detector = FakeDetector {
      detections: vec![raw(1, 0.9, 0.0, 0.0, 10.0, 10.0)],
      fail: false,
    };
    let classifier = FakeClassifier::default();
    let seen = classifier.seen.clone();
    let config = PipelineConfig {
      region: RegionConfig {
        target_size: TargetSize {
          width: 96,
          height: 64,
        },
        ..Default::default()
      },
    };
    let mut pipeline = Pipeline::with_config(detector, classifier, config).unwrap();
    pipeline.process(&image(32, 32)).unwrap();

    let region = &seen.lock().unwrap()[0];
    assert_eq!((region.width(), region.height()), (96, 64));
    assert_eq!(pipeline.config(), config);
  }

  #[test]
  fn zero_target_size_fails_construction() {
    let config = PipelineConfig {
      region: RegionConfig {
        target_size: TargetSize {
          width: 0,
          height: 224,
        },
        ..Default::default()
      },
    };
    let url = Url::parse("rknn:///models/det.rknn").unwrap();
    assert!(matches!(
      Pipeline::open(&url, &url, &Device::Cpu, config),
      Err(ConstructionError::InvalidConfig(_))
    ));
  }

  #[test]
  fn zero_target_size_rejected_with_injected_backends() {
    let detector = FakeDetector {
      detections: vec![raw(1, 0.9, 0.0, 0.0, 10.0, 10.0)],
      fail: false,
    };
    let classifier = FakeClassifier::default();
    let seen = classifier.seen.clone();
    let config = PipelineConfig {
      region: RegionConfig {
        target_size: TargetSize {
          width: 0,
          height: 224,
        },
        ..Default::default()
      },
    };

    assert!(matches!(
      Pipeline::with_config(detector, classifier, config),
      Err(ConstructionError::InvalidConfig(_))
    ));
    assert!(seen.lock().unwrap().is_empty());
  }

  #[test]
  fn replicas_run_on_worker_threads() {
    let handles: Vec<_> = (0..2)
      .map(|i| {
        // 每个工作线程在线程内构建自己的流水线
        std::thread::spawn(move || {
          let detector = FakeDetector {
            detections: vec![raw(i, 0.5, 0.0, 0.0, 4.0, 4.0)],
            fail: false,
          };
          let mut pipeline = Pipeline::new(detector, FakeClassifier::default());
          pipeline.process(&image(8, 8)).map(|r| r.len())
        })
      })
      .collect();

    for handle in handles {
      assert_eq!(handle.join().unwrap().unwrap(), 1);
    }
  }

  #[test]
  fn masked_out_pixels_are_black_in_region() {
    let mut detection = raw(5, 0.7, 0.0, 0.0, 8.0, 8.0);
    detection.mask = Some(RawMask {
      width: 8,
      height: 8,
      pixels: MaskPixels::Gray8(vec![0; 64]),
    });
    let detector = FakeDetector {
      detections: vec![detection],
      fail: false,
    };
    let classifier = FakeClassifier::default();
    let seen = classifier.seen.clone();
    let mut pipeline = Pipeline::new(detector, classifier);
    pipeline.process(&image(8, 8)).unwrap();

    let seen = seen.lock().unwrap();
    assert!(seen[0].as_image().pixels().all(|p| p == &Rgb([0, 0, 0])));
  }
}
