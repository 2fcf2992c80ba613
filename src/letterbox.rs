// 该文件是 Weibei （渭北春树） 项目的一部分。
// src/letterbox.rs - Letterbox 预处理
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::{Rgb, RgbImage, imageops};
use tracing::debug;

use crate::frame::RgbNhwcFrame;

/// Letterbox 填充色。必须与模型训练时使用的填充值一致，
/// 偏差不会报错，只会静默拉低检测质量。
pub const PAD_VALUE: u8 = 0x72;

/// Letterbox 逆映射参数，预处理时产生一次，坐标还原时消费一次。
#[derive(Debug, Clone, Copy)]
pub struct LetterboxTransform {
  /// 统一缩放比例，恒大于 0
  pub scale: f32,
  /// 水平留白偏移（像素）
  pub offset_x: u32,
  /// 垂直留白偏移（像素）
  pub offset_y: u32,
  /// 网络输入宽度
  pub target_w: u32,
  /// 网络输入高度
  pub target_h: u32,
}

impl LetterboxTransform {
  /// 把网络输入空间的一个坐标还原到原图空间，并截断在 `[0, bound]`。
  /// 预测进留白区域的坐标会被裁剪，而不是丢弃。
  fn unproject(&self, value: f32, offset: u32, bound: u32) -> i32 {
    let restored = (value - offset as f32) / self.scale;
    restored.clamp(0.0, bound as f32) as i32
  }

  /// 把网络输入空间的 `(x1, y1, x2, y2)` 框还原到原图像素空间。
  pub fn unscale_box(&self, bbox: [f32; 4], image_w: u32, image_h: u32) -> [i32; 4] {
    [
      self.unproject(bbox[0], self.offset_x, image_w),
      self.unproject(bbox[1], self.offset_y, image_h),
      self.unproject(bbox[2], self.offset_x, image_w),
      self.unproject(bbox[3], self.offset_y, image_h),
    ]
  }
}

/// 保持纵横比缩放图像并用常量色填充到目标尺寸。
/// 返回送入推理引擎的 NHWC 帧和逆映射参数。
pub fn letterbox(image: &RgbImage, target_w: u32, target_h: u32) -> (RgbNhwcFrame, LetterboxTransform) {
  let (width, height) = image.dimensions();

  let scale = (target_w as f32 / width as f32).min(target_h as f32 / height as f32);
  let new_w = (width as f32 * scale).round() as u32;
  let new_h = (height as f32 * scale).round() as u32;

  debug!(
    "Letterbox 缩放: scale={:.6}, 新尺寸={}x{}",
    scale, new_w, new_h
  );

  let resized = imageops::resize(image, new_w, new_h, imageops::FilterType::Triangle);

  let mut canvas = RgbImage::from_pixel(target_w, target_h, Rgb([PAD_VALUE; 3]));

  let offset_x = (target_w - new_w) / 2;
  let offset_y = (target_h - new_h) / 2;

  debug!(
    "Letterbox 填充: offset=({}, {}), color=0x{:02x}",
    offset_x, offset_y, PAD_VALUE
  );

  imageops::replace(&mut canvas, &resized, offset_x as i64, offset_y as i64);

  let transform = LetterboxTransform {
    scale,
    offset_x,
    offset_y,
    target_w,
    target_h,
  };

  (RgbNhwcFrame::from(canvas), transform)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn gray(w: u32, h: u32) -> RgbImage {
    RgbImage::from_pixel(w, h, Rgb([50, 60, 70]))
  }

  #[test]
  fn scenario_1920x1080_into_800x480() {
    let (frame, transform) = letterbox(&gray(1920, 1080), 800, 480);
    assert!((transform.scale - 800.0 / 1920.0).abs() < 1e-6);
    assert_eq!(transform.offset_x, 0);
    assert_eq!(transform.offset_y, 15);
    assert_eq!(frame.width(), 800);
    assert_eq!(frame.height(), 480);
  }

  #[test]
  fn scaled_image_never_exceeds_target() {
    for (w, h, tw, th) in [
      (1920u32, 1080u32, 800u32, 480u32),
      (480, 800, 800, 480),
      (33, 77, 640, 640),
      (4000, 10, 800, 480),
    ] {
      let scale = (tw as f32 / w as f32).min(th as f32 / h as f32);
      let new_w = (w as f32 * scale).round() as u32;
      let new_h = (h as f32 * scale).round() as u32;
      assert!(new_w <= tw, "{}x{} -> {}x{}", w, h, new_w, new_h);
      assert!(new_h <= th, "{}x{} -> {}x{}", w, h, new_w, new_h);
    }
  }

  #[test]
  fn padding_uses_training_constant() {
    let (frame, transform) = letterbox(&gray(1920, 1080), 800, 480);
    assert_eq!(transform.offset_y, 15);
    // 顶部留白区域的第一个像素
    assert_eq!(&frame.as_nhwc()[..3], &[PAD_VALUE; 3]);
    // 图像区域第一行（第 15 行）的第一个像素
    let row = transform.offset_y as usize * 800 * 3;
    assert_eq!(&frame.as_nhwc()[row..row + 3], &[50, 60, 70]);
  }

  #[test]
  fn full_canvas_box_round_trips_to_image_bounds() {
    let (_, transform) = letterbox(&gray(1920, 1080), 800, 480);
    let bbox = transform.unscale_box([0.0, 0.0, 800.0, 480.0], 1920, 1080);
    assert_eq!(bbox, [0, 0, 1920, 1080]);
  }

  #[test]
  fn padding_boxes_are_clipped_not_dropped() {
    let (_, transform) = letterbox(&gray(1920, 1080), 800, 480);
    // y1 落在顶部留白里，还原后被截断为 0
    let bbox = transform.unscale_box([-10.0, 3.0, 820.0, 470.0], 1920, 1080);
    assert_eq!(bbox[0], 0);
    assert_eq!(bbox[1], 0);
    assert_eq!(bbox[2], 1920);
    assert!(bbox[3] <= 1080);
  }
}
