// 该文件是 Zhenwei （甄伪） 项目的一部分。
// src/ensemble.rs - 多模型集成
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

use thiserror::Error;
use tracing::{debug, info};

use crate::{
  dataset::{DatasetKind, LabeledDataset},
  detector::Reproducibility,
  method::{Method, MethodError, MethodResolver},
  metrics::{Evaluation, evaluate},
  model::{InferenceError, Model, ModelLoader, PredictionRecord, predict},
};

#[derive(Error, Debug)]
pub enum EnsembleError {
  #[error("集成至少需要一个模型")]
  Empty,
  #[error("第 {index} 个模型给出 {actual} 个预测，期望 {expected} 个")]
  LengthMismatch {
    index: usize,
    expected: usize,
    actual: usize,
  },
  #[error("第 {index} 个模型的第 {sample} 个样本标签与其他模型不一致")]
  LabelMismatch { index: usize, sample: usize },
  #[error(transparent)]
  Method(#[from] MethodError),
  #[error("{member} 推理失败: {source}")]
  Inference {
    member: &'static str,
    #[source]
    source: InferenceError,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnsembleMember {
  pub name: &'static str,
  pub method: Method,
}

/// DFDC 第 90 名方案：EfficientNet-B1 + LSTM 与两个 Xception
pub const DFDC_RANK90: [EnsembleMember; 3] = [
  EnsembleMember {
    name: "EfficientNetB1 + LSTM",
    method: Method::EfficientNetB1Lstm,
  },
  EnsembleMember {
    name: "Xception One",
    method: Method::Xception,
  },
  EnsembleMember {
    name: "Xception Two",
    method: Method::Xception,
  },
];

pub struct LoadedMember<M> {
  pub member: EnsembleMember,
  pub model: M,
}

/// 以数据集对应的预训练权重加载全部成员
pub fn load_members<L>(
  members: &[EnsembleMember],
  resolver: &MethodResolver,
  loader: &L,
  dataset: DatasetKind,
  reproducibility: &Reproducibility,
) -> Result<Vec<LoadedMember<L::Model>>, EnsembleError>
where
  L: ModelLoader,
  L::Error: std::error::Error + Send + Sync + 'static,
{
  members
    .iter()
    .map(|member| {
      let model = resolver.load(member.method, dataset, loader, reproducibility)?;
      Ok(LoadedMember {
        member: *member,
        model,
      })
    })
    .collect()
}

/// 按样本下标对各模型的预测取算术平均
pub fn average_predictions(
  runs: &[Vec<PredictionRecord>],
) -> Result<Vec<PredictionRecord>, EnsembleError> {
  let (first, rest) = runs.split_first().ok_or(EnsembleError::Empty)?;

  let mut averaged = first.clone();
  for (offset, run) in rest.iter().enumerate() {
    let index = offset + 1;
    if run.len() != first.len() {
      return Err(EnsembleError::LengthMismatch {
        index,
        expected: first.len(),
        actual: run.len(),
      });
    }
    for (sample, (acc, record)) in averaged.iter_mut().zip(run).enumerate() {
      if acc.label != record.label {
        return Err(EnsembleError::LabelMismatch { index, sample });
      }
      acc.prediction += record.prediction;
    }
  }

  let n = runs.len() as f64;
  for record in &mut averaged {
    record.prediction /= n;
  }
  Ok(averaged)
}

/// 各成员在同一测试集上独立推理，平均后计算指标
pub fn aggregate<M>(
  members: &[LoadedMember<M>],
  data: &LabeledDataset,
) -> Result<Evaluation, EnsembleError>
where
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  let now = std::time::Instant::now();

  let mut runs = Vec::with_capacity(members.len());
  for loaded in members {
    let member = loaded.member;
    info!("集成成员推理: {}", member.name);
    let records = predict(&loaded.model, data, member.method, member.method.spec(), true)
      .map_err(|source| EnsembleError::Inference {
        member: member.name,
        source,
      })?;
    debug!("{} 完成 {} 个样本", member.name, records.len());
    runs.push(records);
  }

  let averaged = average_predictions(&runs)?;
  let evaluation = evaluate(&averaged);
  evaluation.log();
  info!("集成推理耗时: {:.2?}", now.elapsed());
  Ok(evaluation)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    dataset::{Content, Label, VideoRecord},
    model::InferenceRequest,
  };
  use proptest::prelude::*;
  use std::convert::Infallible;

  fn run(labels: &[Label], predictions: &[f64]) -> Vec<PredictionRecord> {
    labels
      .iter()
      .zip(predictions)
      .map(|(&label, &prediction)| PredictionRecord { label, prediction })
      .collect()
  }

  struct Fixed(Vec<f64>);

  impl Model for Fixed {
    type Error = Infallible;

    fn infer(&self, _request: &InferenceRequest<'_>) -> Result<Vec<f64>, Self::Error> {
      Ok(self.0.clone())
    }
  }

  #[test]
  fn three_models_average_per_sample() {
    let labels = [Label::Real, Label::Fake];
    let runs = vec![
      run(&labels, &[0.2, 0.8]),
      run(&labels, &[0.4, 0.6]),
      run(&labels, &[0.9, 0.7]),
    ];
    let averaged = average_predictions(&runs).unwrap();
    assert!((averaged[0].prediction - 0.5).abs() < 1e-12);
    assert!((averaged[1].prediction - 0.7).abs() < 1e-12);
    assert_eq!(evaluate(&averaged).result.accuracy, 1.0);
  }

  #[test]
  fn aggregate_runs_every_member_on_the_same_samples() {
    let data = LabeledDataset::new(
      DatasetKind::Uadfv,
      Content::Videos,
      true,
      vec![
        VideoRecord::new("test/real/0000.mp4".into(), Label::Real),
        VideoRecord::new("test/fake/0000_fake.mp4".into(), Label::Fake),
      ],
    );
    let members: Vec<LoadedMember<Fixed>> = DFDC_RANK90
      .iter()
      .zip([vec![0.2, 0.8], vec![0.4, 0.6], vec![0.9, 0.7]])
      .map(|(member, p)| LoadedMember {
        member: *member,
        model: Fixed(p),
      })
      .collect();

    let evaluation = aggregate(&members, &data).unwrap();
    assert_eq!(evaluation.result.accuracy, 1.0);
    assert_eq!(evaluation.result.auc, 1.0);
    assert!(evaluation.confusion.is_perfect());
  }

  #[test]
  fn mismatched_runs_are_rejected() {
    assert!(matches!(average_predictions(&[]), Err(EnsembleError::Empty)));

    let a = run(&[Label::Real, Label::Fake], &[0.1, 0.9]);
    let b = run(&[Label::Real], &[0.1]);
    assert!(matches!(
      average_predictions(&[a.clone(), b]),
      Err(EnsembleError::LengthMismatch { index: 1, .. })
    ));

    let c = run(&[Label::Fake, Label::Fake], &[0.1, 0.9]);
    assert!(matches!(
      average_predictions(&[a, c]),
      Err(EnsembleError::LabelMismatch { index: 1, sample: 0 })
    ));
  }

  #[test]
  fn members_load_weights_of_the_benchmark_dataset() {
    let tmp = tempfile::tempdir().unwrap();
    let resolver = MethodResolver::new(tmp.path());

    struct Loader;
    impl ModelLoader for Loader {
      type Model = Fixed;
      type Error = Infallible;

      fn load(
        &self,
        _method: Method,
        weights: &crate::method::PretrainedWeights,
        _reproducibility: &Reproducibility,
      ) -> Result<Self::Model, Self::Error> {
        Ok(Fixed(vec![weights.size_bytes as f64]))
      }
    }

    let seed = Reproducibility {
      seed: 24,
      deterministic: true,
    };
    let err = load_members(&DFDC_RANK90, &resolver, &Loader, DatasetKind::CelebDf, &seed)
      .err()
      .unwrap();
    assert!(matches!(err, EnsembleError::Method(MethodError::WeightsNotFound(_))));

    for name in [
      "efficientnetb1_lstm_best_fulltrain_celebdf.pth",
      "xception_best_fulltrain_celebdf.pth",
    ] {
      std::fs::write(tmp.path().join(name), b"w").unwrap();
    }
    let loaded =
      load_members(&DFDC_RANK90, &resolver, &Loader, DatasetKind::CelebDf, &seed).unwrap();
    assert_eq!(loaded.len(), 3);
    assert_eq!(loaded[2].member.method, Method::Xception);
  }

  proptest! {
    #[test]
    fn average_stays_within_member_range(
      preds in proptest::collection::vec(proptest::collection::vec(0.0f64..=1.0, 4), 1..6)
    ) {
      let labels = [Label::Real, Label::Fake, Label::Real, Label::Fake];
      let runs: Vec<_> = preds.iter().map(|p| run(&labels, p)).collect();
      let averaged = average_predictions(&runs).unwrap();
      for (i, record) in averaged.iter().enumerate() {
        let lo = preds.iter().map(|p| p[i]).fold(f64::INFINITY, f64::min);
        let hi = preds.iter().map(|p| p[i]).fold(f64::NEG_INFINITY, f64::max);
        prop_assert!(record.prediction >= lo - 1e-12 && record.prediction <= hi + 1e-12);
        prop_assert_eq!(record.label, labels[i]);
      }
    }
  }
}
