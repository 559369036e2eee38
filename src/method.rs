// 该文件是 Zhenwei （甄伪） 项目的一部分。
// src/method.rs - 检测方法解析
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

use std::{
  fmt,
  path::{Path, PathBuf},
  str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  dataset::DatasetKind,
  detector::Reproducibility,
  model::{BoxError, ModelLoader},
};

#[derive(Error, Debug)]
pub enum MethodError {
  #[error("方法 {0} 不可用，请使用已支持的方法")]
  UnsupportedMethod(String),
  #[error("找不到预训练权重: {0}")]
  WeightsNotFound(PathBuf),
  #[error("读取权重 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("加载模型 {method} 失败: {source}")]
  Load {
    method: Method,
    #[source]
    source: BoxError,
  },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
  #[default]
  #[serde(rename = "xception")]
  Xception,
  #[serde(rename = "efficientnetb7")]
  EfficientNetB7,
  #[serde(rename = "mesonet")]
  MesoNet,
  #[serde(rename = "resnetlstm")]
  ResNetLstm,
  #[serde(rename = "efficientnetb1_lstm")]
  EfficientNetB1Lstm,
}

impl Method {
  pub const ALL: [Method; 5] = [
    Method::Xception,
    Method::EfficientNetB7,
    Method::MesoNet,
    Method::ResNetLstm,
    Method::EfficientNetB1Lstm,
  ];

  pub fn name(self) -> &'static str {
    match self {
      Method::Xception => "xception",
      Method::EfficientNetB7 => "efficientnetb7",
      Method::MesoNet => "mesonet",
      Method::ResNetLstm => "resnetlstm",
      Method::EfficientNetB1Lstm => "efficientnetb1_lstm",
    }
  }

  pub fn spec(self) -> MethodSpec {
    match self {
      Method::Xception => MethodSpec::new(299, Normalization::Xception, false),
      Method::EfficientNetB7 => MethodSpec::new(380, Normalization::ImageNet, false),
      // 未做 ImageNet 预训练，沿用 [0.5, 0.5, 0.5]
      Method::MesoNet => MethodSpec::new(256, Normalization::Xception, false),
      Method::ResNetLstm => MethodSpec::new(224, Normalization::ImageNet, true),
      Method::EfficientNetB1Lstm => MethodSpec::new(240, Normalization::ImageNet, true),
    }
  }
}

impl FromStr for Method {
  type Err = MethodError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Method::ALL
      .into_iter()
      .find(|m| m.name() == s)
      .ok_or_else(|| MethodError::UnsupportedMethod(s.to_string()))
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// 可用于基准测试的方法：单模型或 DFDC 第 90 名的集成方案
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BenchmarkMethod {
  Single(Method),
  DfdcRank90,
}

const DFDC_RANK90_NAME: &str = "dfdcrank90";

impl BenchmarkMethod {
  pub fn name(self) -> &'static str {
    match self {
      BenchmarkMethod::Single(method) => method.name(),
      BenchmarkMethod::DfdcRank90 => DFDC_RANK90_NAME,
    }
  }
}

impl FromStr for BenchmarkMethod {
  type Err = MethodError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if s == DFDC_RANK90_NAME {
      return Ok(BenchmarkMethod::DfdcRank90);
    }
    s.parse().map(BenchmarkMethod::Single)
  }
}

impl fmt::Display for BenchmarkMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
  /// mean = std = [0.5, 0.5, 0.5]
  Xception,
  #[serde(rename = "imagenet")]
  ImageNet,
}

impl Normalization {
  pub fn mean(self) -> [f32; 3] {
    match self {
      Normalization::Xception => [0.5, 0.5, 0.5],
      Normalization::ImageNet => [0.485, 0.456, 0.406],
    }
  }

  pub fn std(self) -> [f32; 3] {
    match self {
      Normalization::Xception => [0.5, 0.5, 0.5],
      Normalization::ImageNet => [0.229, 0.224, 0.225],
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSpec {
  pub input_size: u32,
  pub normalization: Normalization,
  /// 是否以帧序列为输入
  pub sequence: bool,
}

impl MethodSpec {
  const fn new(input_size: u32, normalization: Normalization, sequence: bool) -> Self {
    Self {
      input_size,
      normalization,
      sequence,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  Train,
  Test,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PretrainedWeights {
  pub path: PathBuf,
  pub size_bytes: u64,
}

impl PretrainedWeights {
  pub fn file_name(method: Method, dataset: DatasetKind) -> String {
    format!("{}_best_fulltrain_{}.pth", method, dataset)
  }

  pub fn locate(dir: &Path, method: Method, dataset: DatasetKind) -> Result<Self, MethodError> {
    let path = dir.join(Self::file_name(method, dataset));
    if !path.is_file() {
      return Err(MethodError::WeightsNotFound(path));
    }
    let size_bytes = std::fs::metadata(&path)
      .map_err(|source| MethodError::Io {
        path: path.clone(),
        source,
      })?
      .len();
    info!("加载权重文件: {}", path.display());
    debug!(
      "权重文件大小: {:.2} MB",
      size_bytes as f64 / (1024.0 * 1024.0)
    );
    Ok(Self { path, size_bytes })
  }
}

/// 训练模式下模型为空，由训练流程在每个交叉验证折中重新构建
pub struct ResolvedMethod<M> {
  pub method: Method,
  pub model: Option<M>,
  pub spec: MethodSpec,
}

#[derive(Debug, Clone)]
pub struct MethodResolver {
  weights_dir: PathBuf,
}

impl MethodResolver {
  pub fn new(weights_dir: impl Into<PathBuf>) -> Self {
    Self {
      weights_dir: weights_dir.into(),
    }
  }

  pub fn resolve<L>(
    &self,
    method: Method,
    dataset: DatasetKind,
    mode: Mode,
    loader: &L,
    reproducibility: &Reproducibility,
  ) -> Result<ResolvedMethod<L::Model>, MethodError>
  where
    L: ModelLoader,
    L::Error: std::error::Error + Send + Sync + 'static,
  {
    let spec = method.spec();
    let model = match mode {
      Mode::Train => None,
      Mode::Test => Some(self.load(method, dataset, loader, reproducibility)?),
    };
    Ok(ResolvedMethod {
      method,
      model,
      spec,
    })
  }

  /// 定位 `{method}_best_fulltrain_{dataset}.pth` 并加载模型
  pub fn load<L>(
    &self,
    method: Method,
    dataset: DatasetKind,
    loader: &L,
    reproducibility: &Reproducibility,
  ) -> Result<L::Model, MethodError>
  where
    L: ModelLoader,
    L::Error: std::error::Error + Send + Sync + 'static,
  {
    let weights = PretrainedWeights::locate(&self.weights_dir, method, dataset)?;
    loader
      .load(method, &weights, reproducibility)
      .map_err(|e| MethodError::Load {
        method,
        source: Box::new(e),
      })
  }

  /// 先校验方法名再访问文件系统
  pub fn resolve_id<L>(
    &self,
    method_id: &str,
    dataset: DatasetKind,
    mode: Mode,
    loader: &L,
    reproducibility: &Reproducibility,
  ) -> Result<ResolvedMethod<L::Model>, MethodError>
  where
    L: ModelLoader,
    L::Error: std::error::Error + Send + Sync + 'static,
  {
    let method = method_id.parse()?;
    self.resolve(method, dataset, mode, loader, reproducibility)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    detector::reproducibility_seed,
    model::{InferenceRequest, Model},
  };
  use std::{cell::Cell, convert::Infallible};

  struct ConstModel;

  impl Model for ConstModel {
    type Error = Infallible;

    fn infer(&self, request: &InferenceRequest<'_>) -> Result<Vec<f64>, Self::Error> {
      Ok(vec![0.5; request.samples.len()])
    }
  }

  #[derive(Default)]
  struct CountingLoader {
    loads: Cell<usize>,
  }

  impl ModelLoader for CountingLoader {
    type Model = ConstModel;
    type Error = Infallible;

    fn load(
      &self,
      _method: Method,
      _weights: &PretrainedWeights,
      _reproducibility: &Reproducibility,
    ) -> Result<Self::Model, Self::Error> {
      self.loads.set(self.loads.get() + 1);
      Ok(ConstModel)
    }
  }

  #[test]
  fn method_table() {
    let table: Vec<(u32, Normalization)> = Method::ALL
      .iter()
      .map(|m| (m.spec().input_size, m.spec().normalization))
      .collect();
    assert_eq!(
      table,
      vec![
        (299, Normalization::Xception),
        (380, Normalization::ImageNet),
        (256, Normalization::Xception),
        (224, Normalization::ImageNet),
        (240, Normalization::ImageNet),
      ]
    );
    assert!(Method::ResNetLstm.spec().sequence);
    assert!(!Method::Xception.spec().sequence);
  }

  #[test]
  fn names_round_trip() {
    for method in Method::ALL {
      assert_eq!(method.name().parse::<Method>().unwrap(), method);
    }
    assert_eq!(
      "dfdcrank90".parse::<BenchmarkMethod>().unwrap(),
      BenchmarkMethod::DfdcRank90
    );
  }

  #[test]
  fn default_method_is_xception() {
    assert_eq!(Method::default(), Method::Xception);
  }

  #[test]
  fn unknown_method_fails_before_touching_disk() {
    let resolver = MethodResolver::new("/nonexistent/weights");
    let loader = CountingLoader::default();
    let err = resolver
      .resolve_id(
        "capsule",
        DatasetKind::Uadfv,
        Mode::Test,
        &loader,
        &reproducibility_seed(24),
      )
      .err()
      .unwrap();
    assert!(matches!(err, MethodError::UnsupportedMethod(ref m) if m == "capsule"));
    assert_eq!(loader.loads.get(), 0);
  }

  #[test]
  fn train_mode_returns_no_model() {
    let resolver = MethodResolver::new("/nonexistent/weights");
    let loader = CountingLoader::default();
    let resolved = resolver
      .resolve(
        Method::EfficientNetB7,
        DatasetKind::CelebDf,
        Mode::Train,
        &loader,
        &reproducibility_seed(24),
      )
      .unwrap();
    assert!(resolved.model.is_none());
    assert_eq!(resolved.spec.input_size, 380);
    assert_eq!(loader.loads.get(), 0);
  }

  #[test]
  fn test_mode_requires_weights() {
    let tmp = tempfile::tempdir().unwrap();
    let resolver = MethodResolver::new(tmp.path());
    let loader = CountingLoader::default();
    let seed = reproducibility_seed(24);

    let err = resolver
      .resolve(Method::Xception, DatasetKind::Uadfv, Mode::Test, &loader, &seed)
      .err()
      .unwrap();
    assert!(matches!(err, MethodError::WeightsNotFound(_)));

    std::fs::write(tmp.path().join("xception_best_fulltrain_uadfv.pth"), b"weights").unwrap();
    let resolved = resolver
      .resolve(Method::Xception, DatasetKind::Uadfv, Mode::Test, &loader, &seed)
      .unwrap();
    assert!(resolved.model.is_some());
    assert_eq!(loader.loads.get(), 1);
  }
}
