// 该文件是 Zhenwei （甄伪） 项目的一部分。
// src/model.rs - 模型
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

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  dataset::{DatasetKind, Label, LabeledDataset},
  detector::Reproducibility,
  method::{Method, MethodSpec, Normalization, PretrainedWeights},
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Clone, Serialize)]
pub struct InferenceRequest<'a> {
  pub samples: &'a [PathBuf],
  pub dataset: DatasetKind,
  pub method: Method,
  pub input_size: u32,
  pub normalization: Normalization,
  /// 按通道的归一化均值与标准差
  pub mean: [f32; 3],
  pub std: [f32; 3],
  pub sequence_model: bool,
  pub ensemble: bool,
}

impl<'a> InferenceRequest<'a> {
  pub fn new(
    samples: &'a [PathBuf],
    dataset: DatasetKind,
    method: Method,
    spec: MethodSpec,
  ) -> Self {
    Self {
      samples,
      dataset,
      method,
      input_size: spec.input_size,
      normalization: spec.normalization,
      mean: spec.normalization.mean(),
      std: spec.normalization.std(),
      sequence_model: spec.sequence,
      ensemble: false,
    }
  }

  pub fn ensemble(mut self, ensemble: bool) -> Self {
    self.ensemble = ensemble;
    self
  }
}

/// 已加载权重的检测模型
pub trait Model {
  type Error;

  /// 返回每个样本的伪造概率，顺序与 `request.samples` 一致
  fn infer(&self, request: &InferenceRequest<'_>) -> Result<Vec<f64>, Self::Error>;
}

pub trait ModelLoader {
  type Model: Model;
  type Error;

  fn load(
    &self,
    method: Method,
    weights: &PretrainedWeights,
    reproducibility: &Reproducibility,
  ) -> Result<Self::Model, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
  pub label: Label,
  pub prediction: f64,
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("推理失败: {0}")]
  Backend(#[source] BoxError),
  #[error("预测数量不匹配: 期望 {expected}, 实际 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("第 {index} 个预测值 {value} 不在 [0, 1] 内")]
  OutOfRange { index: usize, value: f64 },
}

/// 在整个数据集上推理并与真实标签配对
pub fn predict<M>(
  model: &M,
  data: &LabeledDataset,
  method: Method,
  spec: MethodSpec,
  ensemble: bool,
) -> Result<Vec<PredictionRecord>, InferenceError>
where
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  let samples = data.paths();
  let request = InferenceRequest::new(&samples, data.dataset, method, spec).ensemble(ensemble);

  info!("使用 {} 检测 {} 个样本...", method, samples.len());
  let now = std::time::Instant::now();
  let predictions = model
    .infer(&request)
    .map_err(|e| InferenceError::Backend(Box::new(e)))?;
  debug!("推理完成，耗时: {:.2?}", now.elapsed());

  if predictions.len() != samples.len() {
    return Err(InferenceError::LengthMismatch {
      expected: samples.len(),
      actual: predictions.len(),
    });
  }

  data
    .records
    .iter()
    .zip(predictions)
    .enumerate()
    .map(|(index, (record, prediction))| {
      if (0.0..=1.0).contains(&prediction) {
        Ok(PredictionRecord {
          label: record.label,
          prediction,
        })
      } else {
        Err(InferenceError::OutOfRange {
          index,
          value: prediction,
        })
      }
    })
    .collect()
}
