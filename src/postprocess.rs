// 该文件是 Weibei （渭北春树） 项目的一部分。
// src/postprocess.rs - 检测输出后处理
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tracing::debug;

use crate::labels::Labels;
use crate::letterbox::LetterboxTransform;
use crate::tensor::{OutputTensor, ShapeMismatchError};

/// 检测头分支数，对应三个特征图步长
pub const NUM_BRANCHES: usize = 3;

/// 该模型头没有独立的目标置信度通道，等效置信度就是类别概率。
/// 保留显式乘数是为了兼容带目标通道的头（见 filter_boxes）。
const OBJECTNESS: f32 = 1.0;

/// NMS 交叠宽高附加量，避免零面积退化框除零
const IOU_EPSILON: f32 = 1e-5;

/// 每次流水线调用的配置，按值传入，不存在进程级可变状态。
#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
  /// 网络输入宽度
  pub input_w: u32,
  /// 网络输入高度
  pub input_h: u32,
  /// 置信度阈值
  pub obj_threshold: f32,
  /// NMS IoU 阈值
  pub nms_threshold: f32,
  /// 是否输出逐阶段的调试信息
  pub debug: bool,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      input_w: 800,
      input_h: 480,
      obj_threshold: 0.1,
      nms_threshold: 0.5,
      debug: false,
    }
  }
}

/// 解码后的全部预测：网络输入像素空间的框，
/// 以及与之对齐的逐格类别概率矩阵（行主序，每行 `num_classes` 个）。
#[derive(Debug, Clone)]
pub struct DecodedOutputs {
  pub boxes: Vec<[f32; 4]>,
  pub class_probs: Vec<f32>,
  pub num_classes: usize,
}

/// 过滤后的候选框
#[derive(Debug, Clone, Copy)]
pub struct ScoredBox {
  /// 网络输入像素空间的 (x1, y1, x2, y2)
  pub bbox: [f32; 4],
  pub class_id: usize,
  pub score: f32,
}

/// DFL 解码：对某条边的 D 个离散距离 bin 做 softmax 期望。
/// 减最大值保证数值稳定。
fn dfl_expect(reg: &OutputTensor, edge: usize, bins: usize, idx: usize) -> f32 {
  let mut max_logit = f32::MIN;
  for d in 0..bins {
    max_logit = max_logit.max(reg.at(edge * bins + d, idx));
  }

  let mut exp_sum = 0.0f32;
  let mut weighted = 0.0f32;
  for d in 0..bins {
    let e = (reg.at(edge * bins + d, idx) - max_logit).exp();
    exp_sum += e;
    weighted += e * d as f32;
  }
  weighted / exp_sum
}

/// 把 3 个检测头的原始张量解码为网络输入像素空间的框与类别概率。
/// 张量按 (回归, 分类) 对、检测头顺序排列；展平顺序为检测头优先、
/// 网格行主序 —— 只影响 NMS 的同分裁决，不影响正确性。
pub fn decode_outputs(
  outputs: &[OutputTensor],
  input_w: u32,
  input_h: u32,
) -> Result<DecodedOutputs, ShapeMismatchError> {
  if outputs.len() != 2 * NUM_BRANCHES {
    return Err(ShapeMismatchError::InvalidOutputCount {
      expected: 2 * NUM_BRANCHES,
      actual: outputs.len(),
    });
  }

  let mut boxes = Vec::new();
  let mut class_probs = Vec::new();
  let mut num_classes = 0usize;

  for branch in 0..NUM_BRANCHES {
    let reg = &outputs[2 * branch];
    let cls = &outputs[2 * branch + 1];

    if reg.channels() % 4 != 0 || reg.channels() == 0 {
      return Err(ShapeMismatchError::InvalidRegChannels {
        branch,
        channels: reg.channels(),
      });
    }
    if reg.grid_h() != cls.grid_h() || reg.grid_w() != cls.grid_w() {
      return Err(ShapeMismatchError::GridMismatch {
        branch,
        reg_h: reg.grid_h(),
        reg_w: reg.grid_w(),
        cls_h: cls.grid_h(),
        cls_w: cls.grid_w(),
      });
    }
    if branch == 0 {
      num_classes = cls.channels();
    } else if cls.channels() != num_classes {
      return Err(ShapeMismatchError::ClassCountMismatch {
        branch,
        expected: num_classes,
        actual: cls.channels(),
      });
    }

    let bins = reg.channels() / 4;
    let (grid_h, grid_w) = (reg.grid_h(), reg.grid_w());
    // 步长按轴独立计算，整除自原始实现
    let stride_x = (input_w as usize / grid_w) as f32;
    let stride_y = (input_h as usize / grid_h) as f32;

    debug!(
      "检测头 {}: 网格 {}x{}, 步长 ({}, {}), bin 数 {}",
      branch, grid_h, grid_w, stride_x, stride_y, bins
    );

    for row in 0..grid_h {
      for col in 0..grid_w {
        let idx = row * grid_w + col;

        let left = dfl_expect(reg, 0, bins, idx);
        let top = dfl_expect(reg, 1, bins, idx);
        let right = dfl_expect(reg, 2, bins, idx);
        let bottom = dfl_expect(reg, 3, bins, idx);

        let cx = col as f32 + 0.5;
        let cy = row as f32 + 0.5;

        boxes.push([
          (cx - left) * stride_x,
          (cy - top) * stride_y,
          (cx + right) * stride_x,
          (cy + bottom) * stride_y,
        ]);

        for c in 0..num_classes {
          class_probs.push(cls.at(c, idx));
        }
      }
    }
  }

  Ok(DecodedOutputs {
    boxes,
    class_probs,
    num_classes,
  })
}

/// 置信度过滤：取每格最高类别概率乘以隐式目标置信度，
/// 低于阈值的格子丢弃。
pub fn filter_boxes(decoded: &DecodedOutputs, obj_threshold: f32) -> Vec<ScoredBox> {
  let mut candidates = Vec::new();

  for (i, bbox) in decoded.boxes.iter().enumerate() {
    let row = &decoded.class_probs[i * decoded.num_classes..(i + 1) * decoded.num_classes];

    let mut best_score = f32::MIN;
    let mut best_class = 0usize;
    for (c, &prob) in row.iter().enumerate() {
      if prob > best_score {
        best_score = prob;
        best_class = c;
      }
    }

    let score = best_score * OBJECTNESS;
    if score >= obj_threshold {
      candidates.push(ScoredBox {
        bbox: *bbox,
        class_id: best_class,
        score,
      });
    }
  }

  candidates
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let xx1 = a[0].max(b[0]);
  let yy1 = a[1].max(b[1]);
  let xx2 = a[2].min(b[2]);
  let yy2 = a[3].min(b[3]);

  let w = (xx2 - xx1 + IOU_EPSILON).max(0.0);
  let h = (yy2 - yy1 + IOU_EPSILON).max(0.0);
  let inter = w * h;

  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);

  inter / (area_a + area_b - inter)
}

/// 逐类别 NMS。类别按升序遍历，类内按分数降序稳定排序
/// （同分保留展平顺序更靠前的框），贪心保留并剔除 IoU 超阈值的框。
pub fn class_nms(candidates: &[ScoredBox], nms_threshold: f32) -> Vec<ScoredBox> {
  let mut class_ids: Vec<usize> = candidates.iter().map(|b| b.class_id).collect();
  class_ids.sort_unstable();
  class_ids.dedup();

  let mut kept = Vec::new();
  for class_id in class_ids {
    let mut pool: Vec<ScoredBox> = candidates
      .iter()
      .filter(|b| b.class_id == class_id)
      .copied()
      .collect();
    // Vec::sort_by 是稳定排序
    pool.sort_by(|a, b| b.score.total_cmp(&a.score));

    while !pool.is_empty() {
      let best = pool.remove(0);
      pool.retain(|other| iou(&best.bbox, &other.bbox) <= nms_threshold);
      kept.push(best);
    }
  }

  kept
}

/// 解码 → 过滤 → NMS，产出仍在网络输入像素空间的幸存框。
/// 空结果是合法的“无检测”状态，不是错误。
pub fn post_process(
  outputs: &[OutputTensor],
  config: &DetectorConfig,
) -> Result<Vec<ScoredBox>, ShapeMismatchError> {
  let decoded = decode_outputs(outputs, config.input_w, config.input_h)?;
  let candidates = filter_boxes(&decoded, config.obj_threshold);
  let kept = class_nms(&candidates, config.nms_threshold);

  if config.debug {
    debug!(
      "后处理: 解码 {} 格, 过滤后 {} 框, NMS 后 {} 框",
      decoded.boxes.len(),
      candidates.len(),
      kept.len()
    );
  }

  Ok(kept)
}

/// 最终检测结果，原图像素空间
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
  pub x: i32,
  pub y: i32,
  pub w: i32,
  pub h: i32,
  pub confidence: f32,
  pub class_id: usize,
  pub class_name: String,
}

/// 逐类别视图中的单框记录，`area` 为占整幅图像的面积比例
#[derive(Debug, Clone, Serialize)]
pub struct BoxRecord {
  pub x: i32,
  pub y: i32,
  pub w: i32,
  pub h: i32,
  pub confidence: f32,
  pub area: f32,
}

/// 逐类别检测视图：每个配置过的标签都是键（没有检测的映射到空表），
/// 调用方永远看到稳定的模式。合成的 `class_<id>` 名不会出现在这里。
#[derive(Debug, Clone, Default)]
pub struct PerClassDetections {
  entries: Vec<(String, Vec<BoxRecord>)>,
}

impl PerClassDetections {
  pub fn get(&self, label: &str) -> Option<&[BoxRecord]> {
    self
      .entries
      .iter()
      .find(|(name, _)| name == label)
      .map(|(_, boxes)| boxes.as_slice())
  }

  /// 标签数量（含空表）
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn total_boxes(&self) -> usize {
    self.entries.iter().map(|(_, boxes)| boxes.len()).sum()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &[BoxRecord])> {
    self
      .entries
      .iter()
      .map(|(name, boxes)| (name.as_str(), boxes.as_slice()))
  }
}

// 按标签顺序序列化为 JSON 映射；serde_json 默认的映射类型会按键重排
impl Serialize for PerClassDetections {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.entries.len()))?;
    for (label, boxes) in &self.entries {
      map.serialize_entry(label, boxes)?;
    }
    map.end()
  }
}

/// 坐标还原 + 结果组装：把幸存框映射回原图像素空间，
/// 产出同一数据的两个视图（平铺列表和逐类别映射）。
pub fn assemble_detections(
  kept: &[ScoredBox],
  transform: &LetterboxTransform,
  labels: &Labels,
  image_w: u32,
  image_h: u32,
) -> (Vec<Detection>, PerClassDetections) {
  let total_pixels = image_w as f32 * image_h as f32;

  // 条目按标签顺序建立，下标即 class_id
  let mut entries: Vec<(String, Vec<BoxRecord>)> = labels
    .iter()
    .map(|label| (label.to_string(), Vec::new()))
    .collect();

  let mut flat = Vec::with_capacity(kept.len());
  for boxed in kept {
    let [x1, y1, x2, y2] = transform.unscale_box(boxed.bbox, image_w, image_h);
    let w = x2 - x1;
    let h = y2 - y1;

    if labels.get(boxed.class_id).is_some() {
      entries[boxed.class_id].1.push(BoxRecord {
        x: x1,
        y: y1,
        w,
        h,
        confidence: boxed.score,
        area: (w as f32 * h as f32) / total_pixels,
      });
    }

    flat.push(Detection {
      x: x1,
      y: y1,
      w,
      h,
      confidence: boxed.score,
      class_id: boxed.class_id,
      class_name: labels.name_of(boxed.class_id),
    });
  }

  (flat, PerClassDetections { entries })
}
