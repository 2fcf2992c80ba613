// 该文件是 Weibei （渭北春树） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::Parser;

/// Weibei 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 推理引擎张量清单路径（JSON，格式见 engine 模块）
  #[arg(long, value_name = "FILE")]
  pub model: PathBuf,

  #[command(flatten)]
  pub labels: LabelSource,

  #[command(flatten)]
  pub input: InputSource,

  /// 网络输入尺寸，WxH 格式
  #[arg(long, default_value = "800x480", value_name = "WxH", value_parser = parse_input_size)]
  pub input_size: (u32, u32),

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.1, value_name = "THRESHOLD")]
  pub threshold: f32,

  /// NMS IoU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.5, value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// 标注图像输出路径（仅 --image 模式；取其目录和扩展名，
  /// 文件名为 <原名>_detected<扩展名>）
  #[cfg(feature = "save_image_file")]
  #[arg(long, value_name = "OUTPUT")]
  pub output_image: Option<PathBuf>,

  /// 只输出有检测结果的图片
  #[arg(long)]
  pub only_matches: bool,

  /// 输出调试日志
  #[arg(long)]
  pub debug: bool,
}

/// 标签来源，两者取其一
#[derive(clap::Args, Debug)]
#[group(required = true, multiple = false)]
pub struct LabelSource {
  /// 标签文件路径，每行一个标签
  #[arg(long, value_name = "FILE")]
  pub labels_path: Option<PathBuf>,

  /// 逗号分隔的标签列表
  #[arg(long, value_name = "LIST")]
  pub labels: Option<String>,
}

/// 输入来源，两者取其一
#[derive(clap::Args, Debug)]
#[group(required = true, multiple = false)]
pub struct InputSource {
  /// 输入图片路径，可指定多个
  #[arg(long, value_name = "IMAGE", num_args = 1..)]
  pub image: Option<Vec<PathBuf>>,

  /// 服务模式监听的 Unix 套接字路径
  #[cfg(feature = "sock_server")]
  #[arg(long, value_name = "SOCK")]
  pub sock: Option<PathBuf>,
}

fn parse_input_size(value: &str) -> Result<(u32, u32), String> {
  let (w, h) = value
    .split_once('x')
    .ok_or_else(|| format!("输入尺寸必须是 WxH 格式: {}", value))?;
  let w: u32 = w.parse().map_err(|_| format!("宽度无效: {}", w))?;
  let h: u32 = h.parse().map_err(|_| format!("高度无效: {}", h))?;
  if w == 0 || h == 0 {
    return Err("输入尺寸不能为 0".to_string());
  }
  Ok((w, h))
}
