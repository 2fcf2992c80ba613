// 该文件是 Weibei （渭北春树） 项目的一部分。
// src/tensor.rs - 模型输出张量
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;

/// 输出张量形状不符合 3 分支 DFL 头的布局。
/// 这类错误意味着模型与流水线版本不匹配，绝不能静默降级解码。
#[derive(Error, Debug)]
pub enum ShapeMismatchError {
  #[error("张量秩错误: 期望 4 维, 实际 {actual} 维")]
  InvalidRank { actual: usize },
  #[error("张量元素数量与形状不符: 形状 {dims:?} 需要 {expected} 个, 实际 {actual} 个")]
  LengthMismatch {
    dims: [usize; 4],
    expected: usize,
    actual: usize,
  },
  #[error("批大小错误: 期望 1, 实际 {actual}")]
  InvalidBatch { actual: usize },
  #[error("输出张量数量错误: 期望 {expected} 个 (3 分支 x 2), 实际 {actual} 个")]
  InvalidOutputCount { expected: usize, actual: usize },
  #[error("检测头 {branch}: 回归通道数 {channels} 不是 4 的倍数")]
  InvalidRegChannels { branch: usize, channels: usize },
  #[error("检测头 {branch}: 回归网格 {reg_h}x{reg_w} 与分类网格 {cls_h}x{cls_w} 不一致")]
  GridMismatch {
    branch: usize,
    reg_h: usize,
    reg_w: usize,
    cls_h: usize,
    cls_w: usize,
  },
  #[error("检测头 {branch}: 类别数 {actual} 与其他检测头的 {expected} 不一致")]
  ClassCountMismatch {
    branch: usize,
    expected: usize,
    actual: usize,
  },
}

/// 推理引擎输出的一个原始张量，`[N, C, H, W]` 排布的 f32 缓冲。
#[derive(Debug, Clone)]
pub struct OutputTensor {
  data: Box<[f32]>,
  dims: [usize; 4],
}

impl OutputTensor {
  pub fn new(data: Vec<f32>, dims: &[usize]) -> Result<Self, ShapeMismatchError> {
    let dims: [usize; 4] = dims
      .try_into()
      .map_err(|_| ShapeMismatchError::InvalidRank { actual: dims.len() })?;

    let expected = dims.iter().product::<usize>();
    if data.len() != expected {
      return Err(ShapeMismatchError::LengthMismatch {
        dims,
        expected,
        actual: data.len(),
      });
    }

    if dims[0] != 1 {
      return Err(ShapeMismatchError::InvalidBatch { actual: dims[0] });
    }

    Ok(Self {
      data: data.into_boxed_slice(),
      dims,
    })
  }

  pub fn dims(&self) -> [usize; 4] {
    self.dims
  }

  pub fn channels(&self) -> usize {
    self.dims[1]
  }

  pub fn grid_h(&self) -> usize {
    self.dims[2]
  }

  pub fn grid_w(&self) -> usize {
    self.dims[3]
  }

  /// 单个通道的空间元素数，即 `H*W`。
  pub fn spatial(&self) -> usize {
    self.dims[2] * self.dims[3]
  }

  /// 取通道 `c` 中第 `idx` 个空间位置的值（行主序）。
  #[inline]
  pub fn at(&self, c: usize, idx: usize) -> f32 {
    self.data[c * self.spatial() + idx]
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }
}
