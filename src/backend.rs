// 该文件是 Zhenwei （甄伪） 项目的一部分。
// src/backend.rs - 外部进程后端
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! 通过子进程调用外部运行器完成模型加载、推理、人脸提取与训练。
//!
//! 每次调用执行 `<program> [args..] <op>`，请求以 JSON 写入标准输入，
//! 响应以 JSON 从标准输出读取。`op` 为 `load`、`infer`、`detect_faces`、
//! `extract_frames` 或 `train`。

use std::{
  io::{BufWriter, Write},
  path::{Path, PathBuf},
  process::{Command, ExitStatus, Stdio},
};

use serde::{Deserialize, Serialize, de::DeserializeOwned, de::IgnoredAny};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  detector::Reproducibility,
  face::{FaceBox, FaceDetector},
  method::{Method, PretrainedWeights},
  model::{InferenceRequest, Model, ModelLoader},
  train::{TrainReport, TrainRequest, Trainer},
};

#[derive(Error, Debug)]
pub enum CommandBackendError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch {
    expected: &'static str,
    actual: String,
  },
  #[error("无法启动 {program}: {source}")]
  Spawn {
    program: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("无法写入运行器标准输入")]
  Stdin,
  #[error("运行器执行 {op} 失败: {status}")]
  Failed { op: &'static str, status: ExitStatus },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// `exec:///path/to/runner?arg=--device&arg=cuda`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBackend {
  program: PathBuf,
  args: Vec<String>,
}

impl FromUrlWithScheme for CommandBackend {
  const SCHEME: &'static str = "exec";
}

impl FromUrl for CommandBackend {
  type Error = CommandBackendError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(CommandBackendError::SchemeMismatch {
        expected: Self::SCHEME,
        actual: uri.scheme().to_string(),
      });
    }

    let args = uri
      .query_pairs()
      .filter(|(k, _)| k == "arg")
      .map(|(_, v)| v.into_owned())
      .collect();
    Ok(CommandBackend {
      program: PathBuf::from(uri.path()),
      args,
    })
  }
}

impl CommandBackend {
  pub fn program(&self) -> &Path {
    &self.program
  }

  fn call<Req, Resp>(&self, op: &'static str, request: &Req) -> Result<Resp, CommandBackendError>
  where
    Req: Serialize,
    Resp: DeserializeOwned,
  {
    debug!("调用运行器 {} {}", self.program.display(), op);
    let now = std::time::Instant::now();
    let mut child = Command::new(&self.program)
      .args(&self.args)
      .arg(op)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::inherit())
      .spawn()
      .map_err(|source| CommandBackendError::Spawn {
        program: self.program.clone(),
        source,
      })?;

    // 运行器可能不读完输入就退出，写入失败时仍以退出码为准
    let written = match child.stdin.take() {
      Some(stdin) => {
        let mut writer = BufWriter::new(stdin);
        serde_json::to_writer(&mut writer, request)
          .map_err(CommandBackendError::from)
          .and_then(|()| writer.flush().map_err(CommandBackendError::from))
      }
      None => Err(CommandBackendError::Stdin),
    };
    if let Err(e) = &written {
      debug!("写入 {} 请求失败: {}", op, e);
    }

    let output = child.wait_with_output()?;
    if !output.status.success() {
      return Err(CommandBackendError::Failed {
        op,
        status: output.status,
      });
    }
    written?;
    debug!("{} 完成，耗时: {:.2?}", op, now.elapsed());
    Ok(serde_json::from_slice(&output.stdout)?)
  }
}

#[derive(Serialize)]
struct LoadRequest<'a> {
  method: Method,
  weights: &'a Path,
  reproducibility: &'a Reproducibility,
}

/// 运行器侧加载的模型，每次推理都携带权重位置
#[derive(Debug, Clone)]
pub struct CommandModel {
  backend: CommandBackend,
  weights: PathBuf,
  reproducibility: Reproducibility,
}

impl ModelLoader for CommandBackend {
  type Model = CommandModel;
  type Error = CommandBackendError;

  fn load(
    &self,
    method: Method,
    weights: &PretrainedWeights,
    reproducibility: &Reproducibility,
  ) -> Result<Self::Model, Self::Error> {
    let _: IgnoredAny = self.call(
      "load",
      &LoadRequest {
        method,
        weights: &weights.path,
        reproducibility,
      },
    )?;
    Ok(CommandModel {
      backend: self.clone(),
      weights: weights.path.clone(),
      reproducibility: *reproducibility,
    })
  }
}

#[derive(Serialize)]
struct InferCall<'a> {
  #[serde(flatten)]
  request: &'a InferenceRequest<'a>,
  weights: &'a Path,
  reproducibility: &'a Reproducibility,
}

#[derive(Deserialize)]
struct InferResponse {
  predictions: Vec<f64>,
}

impl Model for CommandModel {
  type Error = CommandBackendError;

  fn infer(&self, request: &InferenceRequest<'_>) -> Result<Vec<f64>, Self::Error> {
    let response: InferResponse = self.backend.call(
      "infer",
      &InferCall {
        request,
        weights: &self.weights,
        reproducibility: &self.reproducibility,
      },
    )?;
    Ok(response.predictions)
  }
}

#[derive(Serialize)]
struct DetectFacesRequest<'a> {
  video: &'a Path,
  num_frames: usize,
}

#[derive(Deserialize)]
struct DetectFacesResponse {
  faces: Vec<FaceBox>,
}

#[derive(Serialize)]
struct ExtractFramesRequest<'a> {
  faces: Vec<FaceBox>,
  video_id: &'a str,
  save_to: &'a Path,
  face_margin: f32,
  num_frames: usize,
  test: bool,
}

#[derive(Deserialize)]
struct ExtractFramesResponse {
  saved: usize,
}

impl FaceDetector for CommandBackend {
  type Faces = Vec<FaceBox>;
  type Error = CommandBackendError;

  fn detect_faces(&self, video: &Path, num_frames: usize) -> Result<Self::Faces, Self::Error> {
    let response: DetectFacesResponse =
      self.call("detect_faces", &DetectFacesRequest { video, num_frames })?;
    Ok(response.faces)
  }

  fn extract_frames(
    &self,
    faces: Self::Faces,
    video_id: &str,
    save_to: &Path,
    face_margin: f32,
    num_frames: usize,
    test: bool,
  ) -> Result<usize, Self::Error> {
    let response: ExtractFramesResponse = self.call(
      "extract_frames",
      &ExtractFramesRequest {
        faces,
        video_id,
        save_to,
        face_margin,
        num_frames,
        test,
      },
    )?;
    Ok(response.saved)
  }
}

impl Trainer for CommandBackend {
  type Error = CommandBackendError;

  fn train(&self, request: &TrainRequest<'_>) -> Result<TrainReport, Self::Error> {
    self.call("train", request)
  }
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use crate::{dataset::DatasetKind, model::InferenceRequest};

  const RUNNER: &str = r#"#!/bin/sh
op="$1"
cat > "$(dirname "$0")/$op.json"
case "$op" in
  load) echo '{}' ;;
  infer) echo '{"predictions":[0.25,0.75]}' ;;
  detect_faces) echo '{"faces":[{"frame":3,"x1":1,"y1":2,"x2":30,"y2":40,"score":0.98}]}' ;;
  extract_frames) echo '{"saved":1}' ;;
  train) echo '{"model_path":null,"auc":0.9,"average_precision":0.8,"accuracy":0.7,"loss":0.4}' ;;
  *) exit 3 ;;
esac
"#;

  /// 通过 `/bin/sh <脚本>` 启动，避免执行刚写入的文件
  fn backend(dir: &Path) -> CommandBackend {
    let script = dir.join("runner.sh");
    std::fs::write(&script, RUNNER).unwrap();
    let mut url = url::Url::parse("exec:///bin/sh").unwrap();
    url
      .query_pairs_mut()
      .append_pair("arg", &script.to_string_lossy());
    CommandBackend::from_url(&url).unwrap()
  }

  fn sent(dir: &Path, op: &str) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(dir.join(format!("{}.json", op))).unwrap())
      .unwrap()
  }

  #[test]
  fn url_carries_program_and_args() {
    let url = url::Url::parse("exec:///opt/runner?arg=--device&arg=cuda").unwrap();
    let backend = CommandBackend::from_url(&url).unwrap();
    assert_eq!(backend.program(), Path::new("/opt/runner"));
    assert_eq!(backend.args, vec!["--device", "cuda"]);

    let url = url::Url::parse("folder:///tmp").unwrap();
    assert!(matches!(
      CommandBackend::from_url(&url),
      Err(CommandBackendError::SchemeMismatch { .. })
    ));
  }

  #[test]
  fn load_then_infer_forwards_weights() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = backend(tmp.path());
    let weights = PretrainedWeights {
      path: "/weights/xception_best_fulltrain_uadfv.pth".into(),
      size_bytes: 1,
    };
    let seed = Reproducibility {
      seed: 24,
      deterministic: true,
    };
    let model = backend.load(Method::Xception, &weights, &seed).unwrap();
    assert_eq!(sent(tmp.path(), "load")["method"], "xception");

    let samples = vec![PathBuf::from("a.mp4"), PathBuf::from("b.mp4")];
    let request = InferenceRequest::new(
      &samples,
      DatasetKind::Uadfv,
      Method::Xception,
      Method::Xception.spec(),
    );
    assert_eq!(model.infer(&request).unwrap(), vec![0.25, 0.75]);

    let sent = sent(tmp.path(), "infer");
    assert_eq!(sent["input_size"], 299);
    assert_eq!(sent["mean"][0], 0.5);
    assert_eq!(sent["std"][2], 0.5);
    assert_eq!(sent["samples"][1], "b.mp4");
    assert_eq!(sent["weights"], "/weights/xception_best_fulltrain_uadfv.pth");
  }

  #[test]
  fn face_detection_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = backend(tmp.path());
    let faces = backend.detect_faces(Path::new("v.mp4"), 20).unwrap();
    assert_eq!(faces.len(), 1);
    assert_eq!(faces[0].frame, 3);

    let saved = backend
      .extract_frames(faces, "v.mp4", tmp.path(), 0.2, 20, false)
      .unwrap();
    assert_eq!(saved, 1);
    assert_eq!(sent(tmp.path(), "extract_frames")["video_id"], "v.mp4");
  }

  #[test]
  fn failing_runner_reports_status() {
    let tmp = tempfile::tempdir().unwrap();
    let script = tmp.path().join("fail.sh");
    std::fs::write(&script, "#!/bin/sh\ncat > /dev/null\nexit 2\n").unwrap();
    let backend = CommandBackend {
      program: "/bin/sh".into(),
      args: vec![script.to_string_lossy().into_owned()],
    };
    let err = backend.detect_faces(Path::new("v.mp4"), 20).unwrap_err();
    assert!(matches!(
      err,
      CommandBackendError::Failed {
        op: "detect_faces",
        ..
      }
    ));
  }

  #[test]
  fn runner_exiting_before_reading_reports_status() {
    let tmp = tempfile::tempdir().unwrap();
    let script = tmp.path().join("early.sh");
    std::fs::write(
      &script,
      "#!/bin/sh\ncase \"$1\" in\n  load) cat > /dev/null; echo '{}' ;;\n  *) exit 2 ;;\nesac\n",
    )
    .unwrap();
    let backend = CommandBackend {
      program: "/bin/sh".into(),
      args: vec![script.to_string_lossy().into_owned()],
    };
    let weights = PretrainedWeights {
      path: "/weights/xception_best_fulltrain_uadfv.pth".into(),
      size_bytes: 1,
    };
    let seed = Reproducibility {
      seed: 24,
      deterministic: true,
    };
    let model = backend.load(Method::Xception, &weights, &seed).unwrap();

    // 远大于管道缓冲区
    let samples: Vec<PathBuf> = (0..5000)
      .map(|i| PathBuf::from(format!("/data/fake_videos/test/real/{:06}.mp4", i)))
      .collect();
    let request = InferenceRequest::new(
      &samples,
      DatasetKind::Uadfv,
      Method::Xception,
      Method::Xception.spec(),
    );
    let err = model.infer(&request).unwrap_err();
    assert!(matches!(
      err,
      CommandBackendError::Failed { op: "infer", .. }
    ));
  }

  #[test]
  fn missing_program_fails_to_spawn() {
    let backend = CommandBackend {
      program: "/nonexistent/runner".into(),
      args: vec![],
    };
    assert!(matches!(
      backend.detect_faces(Path::new("v.mp4"), 20),
      Err(CommandBackendError::Spawn { .. })
    ));
  }
}
