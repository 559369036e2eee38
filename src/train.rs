// 该文件是 Zhenwei （甄伪） 项目的一部分。
// src/train.rs - 训练
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
use tracing::info;

use crate::{
  augment::AugmentationPipeline,
  dataset::{DatasetKind, LabeledDataset},
  detector::Reproducibility,
  method::{Method, MethodSpec, Normalization},
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainParams {
  pub epochs: usize,
  pub batch_size: usize,
  pub lr: f64,
  /// 为 1 时不做交叉验证
  pub folds: usize,
  /// 使用全部训练数据，不划分验证集
  pub fulltrain: bool,
}

impl Default for TrainParams {
  fn default() -> Self {
    Self {
      epochs: 1,
      batch_size: 32,
      lr: 0.001,
      folds: 1,
      fulltrain: false,
    }
  }
}

/// 交给训练流程的全部输入
#[derive(Debug, Clone, Serialize)]
pub struct TrainRequest<'a> {
  pub dataset: DatasetKind,
  pub method: Method,
  pub input_size: u32,
  pub normalization: Normalization,
  pub sequence_model: bool,
  pub data: &'a LabeledDataset,
  pub augmentations: &'a AugmentationPipeline,
  #[serde(flatten)]
  pub params: TrainParams,
  pub reproducibility: Reproducibility,
}

impl<'a> TrainRequest<'a> {
  pub fn new(
    method: Method,
    spec: MethodSpec,
    data: &'a LabeledDataset,
    augmentations: &'a AugmentationPipeline,
    params: TrainParams,
    reproducibility: Reproducibility,
  ) -> Self {
    Self {
      dataset: data.dataset,
      method,
      input_size: spec.input_size,
      normalization: spec.normalization,
      sequence_model: spec.sequence,
      data,
      augmentations,
      params,
      reproducibility,
    }
  }
}

/// 各折平均后的训练结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainReport {
  pub model_path: Option<PathBuf>,
  pub auc: f64,
  pub average_precision: f64,
  pub accuracy: f64,
  pub loss: f64,
}

impl TrainReport {
  pub fn log(&self) {
    info!("平均 AUC: {}", self.auc);
    info!("平均 AP: {}", self.average_precision);
    info!("平均准确率: {}", self.accuracy);
    info!("平均损失: {}", self.loss);
    if let Some(path) = &self.model_path {
      info!("模型已保存: {}", path.display());
    }
  }
}

/// 外部训练流程，在每个折中重新构建模型
pub trait Trainer {
  type Error;

  fn train(&self, request: &TrainRequest<'_>) -> Result<TrainReport, Self::Error>;
}
