// 该文件是 Weibei （渭北春树） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tracing::info;

use weibei::engine::TensorFileEngine;
use weibei::labels::Labels;
use weibei::pipeline::Detector;
use weibei::postprocess::DetectorConfig;

use args::Args;

fn main() -> Result<()> {
  let args = Args::parse();

  let level = if args.debug {
    tracing::Level::DEBUG
  } else {
    tracing::Level::INFO
  };
  // 日志走 stderr，stdout 留给 JSON 结果
  tracing_subscriber::fmt()
    .with_max_level(level)
    .with_writer(std::io::stderr)
    .init();

  let labels = match (&args.labels.labels_path, &args.labels.labels) {
    (Some(path), _) => {
      Labels::from_file(path).with_context(|| format!("无法加载标签文件: {}", path.display()))?
    }
    (_, Some(list)) => Labels::from_comma_list(list)?,
    _ => unreachable!("clap 保证两者取其一"),
  };

  let (input_w, input_h) = args.input_size;
  let config = DetectorConfig {
    input_w,
    input_h,
    obj_threshold: args.threshold,
    nms_threshold: args.nms_threshold,
    debug: args.debug,
  };

  info!("模型清单: {}", args.model.display());
  info!("标签数量: {}", labels.len());
  info!(
    "输入尺寸: {}x{}, 置信度阈值: {}, NMS 阈值: {}",
    input_w, input_h, config.obj_threshold, config.nms_threshold
  );

  let engine = TensorFileEngine::from_manifest(&args.model)
    .with_context(|| format!("无法加载模型清单: {}", args.model.display()))?;
  let mut detector = Detector::new(engine, labels, config);

  #[cfg(feature = "sock_server")]
  if let Some(sock) = &args.input.sock {
    weibei::server::run_socket_server(sock, &mut detector)?;
    return Ok(());
  }

  if let Some(images) = &args.input.image {
    run_image_mode(&mut detector, images, &args)?;
  }

  Ok(())
}

fn run_image_mode(
  detector: &mut Detector<TensorFileEngine>,
  images: &[PathBuf],
  args: &Args,
) -> Result<()> {
  for path in images {
    let (outcome, original) = detector
      .detect_file(path)
      .with_context(|| format!("检测失败: {}", path.display()))?;

    if args.only_matches && outcome.flat.is_empty() {
      continue;
    }

    let mut document = serde_json::to_value(&outcome)?;
    document["image_path"] = json!(path);

    #[cfg(feature = "save_image_file")]
    if let Some(output) = &args.output_image {
      if !outcome.flat.is_empty() {
        let annotated = weibei::draw::draw_detections(&original, &outcome.flat);
        let target = detected_path(output, path);
        annotated
          .save(&target)
          .with_context(|| format!("无法保存标注图像: {}", target.display()))?;
        info!("标注图像已保存: {}", target.display());
        document["output_image"] = json!(target);
      }
    }

    #[cfg(not(feature = "save_image_file"))]
    drop(original);

    println!("{}", serde_json::to_string_pretty(&document)?);
  }

  Ok(())
}

/// `--output-image` 提供目录与扩展名，输出名为 `<原名>_detected<扩展名>`
#[cfg(feature = "save_image_file")]
fn detected_path(output: &Path, image: &Path) -> PathBuf {
  let stem = image
    .file_stem()
    .map(|s| s.to_string_lossy().into_owned())
    .unwrap_or_else(|| "output".to_string());
  let ext = output
    .extension()
    .map(|e| format!(".{}", e.to_string_lossy()))
    .unwrap_or_default();
  let dir = output.parent().unwrap_or_else(|| Path::new("."));
  dir.join(format!("{}_detected{}", stem, ext))
}
