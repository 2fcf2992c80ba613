// 该文件是 Weibei （渭北春树） 项目的一部分。
// src/server.rs - Unix 套接字服务模式
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::engine::Engine;
use crate::pipeline::Detector;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Deserialize, Debug)]
struct DetectRequest {
  image: Option<String>,
}

/// 处理一条完整读入的请求，总是产出一个 JSON 应答文档。
/// 检测失败映射为 `{"error": ...}`，由调用方决定日志还是断开。
pub fn handle_request<E: Engine>(detector: &mut Detector<E>, payload: &[u8]) -> serde_json::Value {
  let request: DetectRequest = match serde_json::from_slice(payload) {
    Ok(request) => request,
    Err(e) => return json!({ "error": format!("invalid request: {}", e) }),
  };

  let image = match request.image {
    Some(path) if Path::new(&path).exists() => path,
    _ => return json!({ "error": "Invalid or missing image path" }),
  };

  let response = detector
    .detect_file(&image)
    .map_err(|e| e.to_string())
    .and_then(|(outcome, _)| serde_json::to_value(&outcome).map_err(|e| e.to_string()));

  match response {
    Ok(value) => {
      info!("已处理: {}", image);
      value
    }
    Err(message) => {
      error!("处理失败: {}, 错误: {}", image, message);
      json!({ "error": message })
    }
  }
}

fn serve_connection<E: Engine>(
  detector: &mut Detector<E>,
  mut stream: UnixStream,
) -> std::io::Result<()> {
  // 客户端关闭写端即请求结束
  let mut payload = Vec::new();
  stream.read_to_end(&mut payload)?;

  let response = handle_request(detector, &payload);
  stream.write_all(response.to_string().as_bytes())?;
  Ok(())
}

/// 套接字服务循环：每个连接一条 `{"image": 路径}` 请求，
/// 应答一个 JSON 文档后关闭。请求级错误记录后继续服务。
pub fn run_socket_server<E: Engine, P: AsRef<Path>>(
  sock_path: P,
  detector: &mut Detector<E>,
) -> std::io::Result<()> {
  let sock_path = sock_path.as_ref();

  // 清理上次残留的套接字文件
  if sock_path.exists() {
    std::fs::remove_file(sock_path)?;
  }

  let listener = UnixListener::bind(sock_path)?;
  listener.set_nonblocking(true)?;
  info!("套接字服务监听于 {}", sock_path.display());

  let (tx, rx) = std::sync::mpsc::channel();
  ctrlc::set_handler(move || {
    let _ = tx.send(());
  })
  .expect("Error setting Ctrl-C handler");

  loop {
    if rx.try_recv().is_ok() {
      warn!("收到中断信号，退出服务循环");
      break;
    }

    match listener.accept() {
      Ok((stream, _)) => {
        if let Err(e) = serve_connection(detector, stream) {
          error!("连接处理失败: {}", e);
        }
      }
      Err(e) if e.kind() == ErrorKind::WouldBlock => {
        std::thread::sleep(ACCEPT_POLL_INTERVAL);
      }
      Err(e) => {
        error!("接受连接失败: {}", e);
        return Err(e);
      }
    }
  }

  drop(listener);
  if sock_path.exists() {
    std::fs::remove_file(sock_path)?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use image::{Rgb, RgbImage};

  use super::*;
  use crate::frame::RgbNhwcFrame;
  use crate::labels::Labels;
  use crate::postprocess::DetectorConfig;
  use crate::tensor::OutputTensor;

  struct StubEngine;

  impl Engine for StubEngine {
    fn infer(&mut self, _frame: &RgbNhwcFrame) -> Result<Vec<OutputTensor>, crate::engine::EngineError> {
      // 三个检测头的空白输出: 4x4/2x2/1x1 网格, 2 bin, 3 类
      let mut outputs = Vec::new();
      for grid in [4usize, 2, 1] {
        let spatial = grid * grid;
        outputs.push(OutputTensor::new(vec![0.0; 8 * spatial], &[1, 8, grid, grid]).unwrap());
        outputs.push(OutputTensor::new(vec![0.0; 3 * spatial], &[1, 3, grid, grid]).unwrap());
      }
      Ok(outputs)
    }
  }

  fn detector() -> Detector<StubEngine> {
    let config = DetectorConfig {
      input_w: 32,
      input_h: 32,
      ..DetectorConfig::default()
    };
    Detector::new(StubEngine, Labels::from_comma_list("person,car,dog").unwrap(), config)
  }

  #[test]
  fn missing_image_path_yields_error_document() {
    let mut detector = detector();
    let response = handle_request(&mut detector, br#"{"image": "/no/such/file.jpg"}"#);
    assert_eq!(response["error"], "Invalid or missing image path");

    let response = handle_request(&mut detector, br#"{}"#);
    assert_eq!(response["error"], "Invalid or missing image path");
  }

  #[test]
  fn malformed_json_yields_error_document() {
    let mut detector = detector();
    let response = handle_request(&mut detector, b"not json at all");
    assert!(response.get("error").is_some());
  }

  #[test]
  fn valid_request_yields_detections_and_stats() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = dir.path().join("frame.png");
    RgbImage::from_pixel(48, 48, Rgb([1, 2, 3]))
      .save(&image_path)
      .unwrap();

    let mut detector = detector();
    let payload = serde_json::to_vec(&json!({ "image": image_path })).unwrap();
    let response = handle_request(&mut detector, &payload);

    assert!(response.get("error").is_none());
    assert!(response["stats"]["total_ms"].as_f64().unwrap() >= 0.0);
    // 稳定模式：所有配置的标签都在，且为空表
    assert_eq!(response["detections"]["person"].as_array().unwrap().len(), 0);
    assert_eq!(response["detections"]["dog"].as_array().unwrap().len(), 0);
  }
}
