// 该文件是 Weibei （渭北春树） 项目的一部分。
// src/pipeline.rs - 单次检测请求的编排
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;
use std::time::Instant;

use image::{ImageReader, RgbImage};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::engine::{Engine, EngineError};
use crate::labels::Labels;
use crate::letterbox::letterbox;
use crate::postprocess::{
  DetectorConfig, Detection, PerClassDetections, assemble_detections, post_process,
};
use crate::tensor::ShapeMismatchError;

#[derive(Error, Debug)]
pub enum DetectError {
  /// 源图像不可读或已损坏；确定性错误，不做重试
  #[error("图像解码错误: {0}")]
  ImageDecode(#[from] image::ImageError),
  /// 输出张量与 3 分支 DFL 布局不符，模型与流水线版本不匹配
  #[error("输出形状不匹配: {0}")]
  ShapeMismatch(#[from] ShapeMismatchError),
  #[error("推理引擎错误: {0}")]
  Engine(#[from] EngineError),
}

/// 各阶段耗时（毫秒）。`inference_ms` 在推理引擎调用两侧测量。
/// 仅用于可观测性，流水线自身不消费这些数值。
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StageTimings {
  pub decode_ms: f64,
  pub resize_ms: f64,
  pub inference_ms: f64,
  pub post_process_ms: f64,
  pub total_ms: f64,
}

/// 一次检测请求的完整产物：逐类别映射、平铺列表和计时。
/// 序列化时只输出映射与计时，对应套接字应答的模式。
#[derive(Debug, Serialize)]
pub struct DetectOutcome {
  pub detections: PerClassDetections,
  pub stats: StageTimings,
  /// NMS 输出顺序的平铺列表，用于标注与调试
  #[serde(skip)]
  pub flat: Vec<Detection>,
}

fn elapsed_ms(since: Instant) -> f64 {
  since.elapsed().as_secs_f64() * 1000.0
}

/// 检测器：标签、配置与推理引擎的组合。
/// 流水线本身无跨请求状态，所有实体每次请求新建、应答后丢弃。
pub struct Detector<E> {
  engine: E,
  labels: Labels,
  config: DetectorConfig,
}

impl<E: Engine> Detector<E> {
  pub fn new(engine: E, labels: Labels, config: DetectorConfig) -> Self {
    Self {
      engine,
      labels,
      config,
    }
  }

  pub fn labels(&self) -> &Labels {
    &self.labels
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  /// 从文件读入图像并完成整条流水线。
  /// 返回产物和解码后的原图（供标注输出复用）。
  pub fn detect_file<P: AsRef<Path>>(
    &mut self,
    path: P,
  ) -> Result<(DetectOutcome, RgbImage), DetectError> {
    let total_start = Instant::now();

    let image = ImageReader::open(path.as_ref())
      .map_err(image::ImageError::IoError)?
      .decode()?
      .into_rgb8();
    let decode_ms = elapsed_ms(total_start);
    debug!(
      "图像解码完成: {}x{}, 耗时 {:.2} ms",
      image.width(),
      image.height(),
      decode_ms
    );

    let mut outcome = self.detect_image(&image)?;
    outcome.stats.decode_ms = decode_ms;
    outcome.stats.total_ms = elapsed_ms(total_start);

    Ok((outcome, image))
  }

  /// 对已解码的图像执行 letterbox → 推理 → 后处理。
  /// 任一阶段失败则整个请求失败，绝不发出部分结果。
  pub fn detect_image(&mut self, image: &RgbImage) -> Result<DetectOutcome, DetectError> {
    let total_start = Instant::now();
    let (image_w, image_h) = image.dimensions();

    let resize_start = Instant::now();
    let (frame, transform) = letterbox(image, self.config.input_w, self.config.input_h);
    let resize_ms = elapsed_ms(resize_start);

    let inference_start = Instant::now();
    let outputs = self.engine.infer(&frame)?;
    let inference_ms = elapsed_ms(inference_start);
    debug!("推理完成, {} 个输出张量, 耗时 {:.2} ms", outputs.len(), inference_ms);

    let post_start = Instant::now();
    let kept = post_process(&outputs, &self.config)?;
    let (flat, detections) = assemble_detections(&kept, &transform, &self.labels, image_w, image_h);
    let post_process_ms = elapsed_ms(post_start);

    debug!("检测到 {} 个物体", flat.len());

    Ok(DetectOutcome {
      detections,
      flat,
      stats: StageTimings {
        decode_ms: 0.0,
        resize_ms,
        inference_ms,
        post_process_ms,
        total_ms: elapsed_ms(total_start),
      },
    })
  }
}

#[cfg(test)]
mod tests {
  use image::Rgb;

  use super::*;
  use crate::frame::RgbNhwcFrame;
  use crate::tensor::OutputTensor;

  // 固定输出的桩引擎，32x32 输入对应 4x4/2x2/1x1 网格
  struct StubEngine {
    outputs: Vec<OutputTensor>,
  }

  impl Engine for StubEngine {
    fn infer(&mut self, frame: &RgbNhwcFrame) -> Result<Vec<OutputTensor>, EngineError> {
      assert_eq!(frame.width(), 32);
      assert_eq!(frame.height(), 32);
      Ok(self.outputs.clone())
    }
  }

  fn delta_reg(grid: usize, bins: usize) -> OutputTensor {
    let spatial = grid * grid;
    let mut data = vec![0.0f32; 4 * bins * spatial];
    for edge in 0..4 {
      for idx in 0..spatial {
        data[(edge * bins + 1) * spatial + idx] = 50.0;
      }
    }
    OutputTensor::new(data, &[1, 4 * bins, grid, grid]).unwrap()
  }

  fn cls(grid: usize, nc: usize, hits: &[(usize, usize, f32)]) -> OutputTensor {
    let spatial = grid * grid;
    let mut data = vec![0.0f32; nc * spatial];
    for &(idx, c, score) in hits {
      data[c * spatial + idx] = score;
    }
    OutputTensor::new(data, &[1, nc, grid, grid]).unwrap()
  }

  fn stub(hits: &[(usize, usize, f32)]) -> StubEngine {
    StubEngine {
      outputs: vec![
        delta_reg(4, 2),
        cls(4, 3, hits),
        delta_reg(2, 2),
        cls(2, 3, &[]),
        delta_reg(1, 2),
        cls(1, 3, &[]),
      ],
    }
  }

  fn config() -> DetectorConfig {
    DetectorConfig {
      input_w: 32,
      input_h: 32,
      ..DetectorConfig::default()
    }
  }

  #[test]
  fn detect_image_produces_both_views_and_timings() {
    let labels = Labels::from_comma_list("person,car,dog").unwrap();
    let mut detector = Detector::new(stub(&[(0, 1, 0.9)]), labels, config());

    let image = RgbImage::from_pixel(64, 64, Rgb([10, 20, 30]));
    let outcome = detector.detect_image(&image).unwrap();

    assert_eq!(outcome.flat.len(), 1);
    assert_eq!(outcome.flat[0].class_name, "car");
    assert_eq!(outcome.detections.len(), 3);
    assert_eq!(outcome.detections.get("car").unwrap().len(), 1);
    assert_eq!(outcome.detections.get("person").unwrap().len(), 0);

    assert!(outcome.stats.resize_ms >= 0.0);
    assert!(outcome.stats.total_ms >= outcome.stats.post_process_ms);
  }

  #[test]
  fn no_detections_is_not_an_error() {
    let labels = Labels::from_comma_list("person,car,dog").unwrap();
    let mut detector = Detector::new(stub(&[]), labels, config());

    let image = RgbImage::from_pixel(64, 64, Rgb([10, 20, 30]));
    let outcome = detector.detect_image(&image).unwrap();
    assert!(outcome.flat.is_empty());
    assert_eq!(outcome.detections.len(), 3);
    assert_eq!(outcome.detections.total_boxes(), 0);
  }

  #[test]
  fn missing_file_is_an_image_decode_error() {
    let labels = Labels::from_comma_list("person").unwrap();
    let mut detector = Detector::new(stub(&[]), labels, config());
    let err = detector.detect_file("/no/such/image.jpg").unwrap_err();
    assert!(matches!(err, DetectError::ImageDecode(_)));
  }

  #[test]
  fn truncated_outputs_fail_the_request() {
    let labels = Labels::from_comma_list("person").unwrap();
    let mut engine = stub(&[]);
    engine.outputs.truncate(4);
    let mut detector = Detector::new(engine, labels, config());

    let image = RgbImage::from_pixel(64, 64, Rgb([0, 0, 0]));
    let err = detector.detect_image(&image).unwrap_err();
    assert!(matches!(err, DetectError::ShapeMismatch(_)));
  }

  #[test]
  fn outcome_serializes_detections_and_stats_only() {
    let labels = Labels::from_comma_list("person,car").unwrap();
    let mut detector = Detector::new(stub(&[(0, 0, 0.8)]), labels, config());

    let image = RgbImage::from_pixel(64, 64, Rgb([0, 0, 0]));
    let outcome = detector.detect_image(&image).unwrap();
    let json = serde_json::to_value(&outcome).unwrap();
    assert!(json.get("detections").is_some());
    assert!(json.get("stats").is_some());
    assert!(json.get("flat").is_none());
  }
}
