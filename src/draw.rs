// 该文件是 Weibei （渭北春树） 项目的一部分。
// src/draw.rs - 检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use tracing::debug;

use crate::postprocess::Detection;

/// 边框调色板，按检测序号轮换
const PALETTE: [[u8; 3]; 6] = [
  [0, 255, 0],
  [255, 0, 0],
  [0, 0, 255],
  [255, 255, 0],
  [255, 0, 255],
  [0, 255, 255],
];

/// 最多绘制的检测数
const MAX_DRAWN: usize = 10;

/// 在原图副本上画出检测框（2 像素边框）。
pub fn draw_detections(image: &RgbImage, detections: &[Detection]) -> RgbImage {
  let mut output = image.clone();
  let (width, height) = (image.width() as i32, image.height() as i32);

  for (i, det) in detections.iter().take(MAX_DRAWN).enumerate() {
    let color = Rgb(PALETTE[i % PALETTE.len()]);

    let x = det.x.clamp(0, width - 1);
    let y = det.y.clamp(0, height - 1);
    let w = det.w.min(width - x);
    let h = det.h.min(height - y);
    if w <= 0 || h <= 0 {
      continue;
    }

    debug!(
      "绘制 {} ({:.3}) at ({}, {}, {}x{})",
      det.class_name, det.confidence, x, y, w, h
    );

    draw_hollow_rect_mut(&mut output, Rect::at(x, y).of_size(w as u32, h as u32), color);
    if w > 2 && h > 2 {
      draw_hollow_rect_mut(
        &mut output,
        Rect::at(x + 1, y + 1).of_size(w as u32 - 2, h as u32 - 2),
        color,
      );
    }
  }

  output
}
