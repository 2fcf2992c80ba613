// 该文件是 Weibei （渭北春树） 项目的一部分。
// src/labels.rs - 类别标签
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use thiserror::Error;
use tracing::debug;

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

#[derive(Error, Debug)]
pub enum LabelsError {
  #[error("无法读取标签文件: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签列表为空")]
  Empty,
}

/// 有序类别标签表，`class_id` 即下标。
#[derive(Debug, Clone)]
pub struct Labels {
  names: Vec<String>,
}

impl Labels {
  /// 从标签文件加载，每行一个标签，空行忽略。
  pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LabelsError> {
    let content = std::fs::read_to_string(path)?;
    let names: Vec<String> = content
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty())
      .map(str::to_string)
      .collect();
    debug!("加载了 {} 个标签", names.len());
    Self::from_names(names)
  }

  /// 从逗号分隔的列表加载。
  pub fn from_comma_list(list: &str) -> Result<Self, LabelsError> {
    let names: Vec<String> = list
      .split(',')
      .map(str::trim)
      .filter(|name| !name.is_empty())
      .map(str::to_string)
      .collect();
    Self::from_names(names)
  }

  pub fn from_names(names: Vec<String>) -> Result<Self, LabelsError> {
    if names.is_empty() {
      return Err(LabelsError::Empty);
    }
    Ok(Self { names })
  }

  /// COCO 80 类默认标签表。
  pub fn coco() -> Self {
    Self {
      names: COCO_CLASSES.iter().map(|name| name.to_string()).collect(),
    }
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  /// 按下标查找标签名；越界的 `class_id` 合成 `class_<id>`。
  pub fn name_of(&self, class_id: usize) -> String {
    match self.names.get(class_id) {
      Some(name) => name.clone(),
      None => format!("class_{}", class_id),
    }
  }

  /// 配置过的标签才返回 `Some`，不做名称合成。
  pub fn get(&self, class_id: usize) -> Option<&str> {
    self.names.get(class_id).map(String::as_str)
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.names.iter().map(String::as_str)
  }
}
