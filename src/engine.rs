// 该文件是 Weibei （渭北春树） 项目的一部分。
// src/engine.rs - 推理引擎边界
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::frame::RgbNhwcFrame;
use crate::tensor::{OutputTensor, ShapeMismatchError};

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("张量清单无效: {0}")]
  ManifestError(#[from] serde_json::Error),
  #[error("张量形状错误: {0}")]
  ShapeError(#[from] ShapeMismatchError),
  #[error("推理运行时错误: {0}")]
  Runtime(String),
}

/// 推理引擎协作方契约：输入一帧 `[1, H, W, 3]` 的预处理张量，
/// 返回 3 检测头 x (回归, 分类) 共 6 个原始输出张量，按检测头顺序排列。
///
/// `&mut self` 要求调用方对同一上下文串行推理：
/// 嵌入式 NPU 运行时通常每个硬件上下文只接受一路并发。
pub trait Engine {
  fn infer(&mut self, frame: &RgbNhwcFrame) -> Result<Vec<OutputTensor>, EngineError>;
}

#[derive(Deserialize, Debug)]
struct ManifestEntry {
  dims: Vec<usize>,
  file: String,
}

#[derive(Deserialize, Debug)]
struct Manifest {
  outputs: Vec<ManifestEntry>,
}

/// 张量转储回放引擎：从 JSON 清单加载一组 NPU 输出张量，
/// 每次推理原样返回。用于在没有 NPU 的机器上联调后处理，
/// 真实的 RKNN 运行时在部署侧以同一契约接入。
///
/// 清单格式:
/// ```json
/// { "outputs": [ { "dims": [1, 64, 60, 100], "file": "head0_reg.bin" }, ... ] }
/// ```
/// `file` 是相对清单所在目录的小端 f32 原始数据。
pub struct TensorFileEngine {
  outputs: Vec<OutputTensor>,
}

impl TensorFileEngine {
  pub fn from_manifest<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
    let path = path.as_ref();
    info!("加载张量清单: {}", path.display());

    let manifest: Manifest = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();

    let mut outputs = Vec::with_capacity(manifest.outputs.len());
    for entry in &manifest.outputs {
      let tensor = read_raw_tensor(&base.join(&entry.file), &entry.dims)?;
      debug!("张量 {} 形状 {:?}", entry.file, tensor.dims());
      outputs.push(tensor);
    }

    info!("清单包含 {} 个输出张量", outputs.len());
    Ok(Self { outputs })
  }
}

fn read_raw_tensor(path: &Path, dims: &[usize]) -> Result<OutputTensor, EngineError> {
  let bytes = std::fs::read(path)?;
  let data: Vec<f32> = bytes
    .chunks_exact(4)
    .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
    .collect();
  Ok(OutputTensor::new(data, dims)?)
}

impl Engine for TensorFileEngine {
  fn infer(&mut self, _frame: &RgbNhwcFrame) -> Result<Vec<OutputTensor>, EngineError> {
    Ok(self.outputs.clone())
  }
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use super::*;

  fn write_raw(path: &Path, values: &[f32]) {
    let mut file = std::fs::File::create(path).unwrap();
    for v in values {
      file.write_all(&v.to_le_bytes()).unwrap();
    }
  }

  #[test]
  fn manifest_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    write_raw(&dir.path().join("reg.bin"), &[1.0, 2.0, 3.0, 4.0]);
    write_raw(&dir.path().join("cls.bin"), &[0.5, 0.6]);

    let manifest = r#"{
      "outputs": [
        { "dims": [1, 4, 1, 1], "file": "reg.bin" },
        { "dims": [1, 2, 1, 1], "file": "cls.bin" }
      ]
    }"#;
    let manifest_path = dir.path().join("outputs.json");
    std::fs::write(&manifest_path, manifest).unwrap();

    let mut engine = TensorFileEngine::from_manifest(&manifest_path).unwrap();
    let frame = RgbNhwcFrame::with_shape(4, 4);
    let outputs = engine.infer(&frame).unwrap();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0].dims(), [1, 4, 1, 1]);
    assert_eq!(outputs[1].at(1, 0), 0.6);
  }

  #[test]
  fn manifest_rejects_bad_shape() {
    let dir = tempfile::tempdir().unwrap();
    write_raw(&dir.path().join("reg.bin"), &[1.0, 2.0, 3.0]);
    let manifest = r#"{ "outputs": [ { "dims": [1, 4, 1, 1], "file": "reg.bin" } ] }"#;
    let manifest_path = dir.path().join("outputs.json");
    std::fs::write(&manifest_path, manifest).unwrap();

    assert!(matches!(
      TensorFileEngine::from_manifest(&manifest_path),
      Err(EngineError::ShapeError(_))
    ));
  }
}
