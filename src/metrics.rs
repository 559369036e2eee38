// 该文件是 Zhenwei （甄伪） 项目的一部分。
// src/metrics.rs - 评估指标
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

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{dataset::Label, model::PredictionRecord};

/// 根据真实标签与预测概率给出一个标量
pub trait Scorer {
  fn score(&self, labels: &[Label], predictions: &[f64]) -> f64;
}

pub struct RocAuc;

impl Scorer for RocAuc {
  fn score(&self, labels: &[Label], predictions: &[f64]) -> f64 {
    let positives = labels.iter().filter(|l| **l == Label::Fake).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
      return f64::NAN;
    }

    let mut order: Vec<usize> = (0..predictions.len()).collect();
    order.sort_by(|&a, &b| predictions[a].total_cmp(&predictions[b]));

    // 并列分数取平均秩
    let mut rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
      let mut end = start + 1;
      while end < order.len() && predictions[order[end]] == predictions[order[start]] {
        end += 1;
      }
      let average_rank = (start + end + 1) as f64 / 2.0;
      for &index in &order[start..end] {
        if labels[index] == Label::Fake {
          rank_sum += average_rank;
        }
      }
      start = end;
    }

    let p = positives as f64;
    let n = negatives as f64;
    (rank_sum - p * (p + 1.0) / 2.0) / (p * n)
  }
}

/// 按阈值从高到低累计的 (tp, fp)，并列分数合并为同一阈值
fn threshold_counts(labels: &[Label], predictions: &[f64]) -> Vec<(usize, usize)> {
  let mut order: Vec<usize> = (0..predictions.len()).collect();
  order.sort_by(|&a, &b| predictions[b].total_cmp(&predictions[a]));

  let mut counts = Vec::new();
  let (mut tp, mut fp) = (0, 0);
  for (i, &index) in order.iter().enumerate() {
    match labels[index] {
      Label::Fake => tp += 1,
      Label::Real => fp += 1,
    }
    let last_of_threshold = order
      .get(i + 1)
      .is_none_or(|&next| predictions[next] != predictions[index]);
    if last_of_threshold {
      counts.push((tp, fp));
    }
  }
  counts
}

pub struct AveragePrecision;

impl Scorer for AveragePrecision {
  fn score(&self, labels: &[Label], predictions: &[f64]) -> f64 {
    let positives = labels.iter().filter(|l| **l == Label::Fake).count();
    if positives == 0 {
      return f64::NAN;
    }

    let mut ap = 0.0;
    let mut previous_recall = 0.0;
    for (tp, fp) in threshold_counts(labels, predictions) {
      let recall = tp as f64 / positives as f64;
      let precision = tp as f64 / (tp + fp) as f64;
      ap += (recall - previous_recall) * precision;
      previous_recall = recall;
    }
    ap
  }
}

/// 把预测值当作 logits 的二元交叉熵
pub struct BceWithLogits;

impl Scorer for BceWithLogits {
  fn score(&self, labels: &[Label], predictions: &[f64]) -> f64 {
    if labels.is_empty() {
      return f64::NAN;
    }
    let total: f64 = labels
      .iter()
      .zip(predictions)
      .map(|(label, &x)| {
        let y = label.as_u8() as f64;
        x.max(0.0) - x * y + (-x.abs()).exp().ln_1p()
      })
      .sum();
    total / labels.len() as f64
  }
}

pub struct Accuracy;

impl Scorer for Accuracy {
  fn score(&self, labels: &[Label], predictions: &[f64]) -> f64 {
    if labels.is_empty() {
      return f64::NAN;
    }
    let correct = labels
      .iter()
      .zip(predictions)
      .filter(|(label, p)| Label::from_prediction(**p) == **label)
      .count();
    correct as f64 / labels.len() as f64
  }
}

/// 在首个达到目标召回率的阈值上计算加权精度 `tp / (tp + alpha * fp)`，
/// 代价为其负对数，0.0 为最优
pub struct CostAtRecall {
  pub recall: f64,
  pub alpha: f64,
}

impl Scorer for CostAtRecall {
  fn score(&self, labels: &[Label], predictions: &[f64]) -> f64 {
    let positives = labels.iter().filter(|l| **l == Label::Fake).count();
    if positives == 0 {
      return f64::NAN;
    }

    for (tp, fp) in threshold_counts(labels, predictions) {
      if (tp as f64 / positives as f64) < self.recall {
        continue;
      }
      if fp == 0 {
        return 0.0;
      }
      let weighted_precision = tp as f64 / (tp as f64 + self.alpha * fp as f64);
      return -weighted_precision.ln();
    }
    f64::NAN
  }
}

pub const COST_ALPHA: f64 = 100.0;

pub fn round5(x: f64) -> f64 {
  (x * 1e5).round() / 1e5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfusionMatrix {
  pub true_negatives: usize,
  pub false_positives: usize,
  pub false_negatives: usize,
  pub true_positives: usize,
}

impl ConfusionMatrix {
  pub fn from_records(records: &[PredictionRecord]) -> Self {
    let mut cm = Self::default();
    for record in records {
      match (record.label, Label::from_prediction(record.prediction)) {
        (Label::Real, Label::Real) => cm.true_negatives += 1,
        (Label::Real, Label::Fake) => cm.false_positives += 1,
        (Label::Fake, Label::Real) => cm.false_negatives += 1,
        (Label::Fake, Label::Fake) => cm.true_positives += 1,
      }
    }
    cm
  }

  pub fn is_perfect(&self) -> bool {
    self.false_positives == 0 && self.false_negatives == 0
  }
}

impl fmt::Display for ConfusionMatrix {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "[[{} {}]", self.true_negatives, self.false_positives)?;
    write!(f, " [{} {}]]", self.false_negatives, self.true_positives)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
  pub auc: f64,
  pub average_precision: f64,
  pub loss: f64,
  pub accuracy: f64,
  pub cost_at_recall_0_1: f64,
  pub cost_at_recall_0_5: f64,
  pub cost_at_recall_0_9: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
  pub result: BenchmarkResult,
  pub confusion: ConfusionMatrix,
}

pub fn evaluate(records: &[PredictionRecord]) -> Evaluation {
  let labels: Vec<Label> = records.iter().map(|r| r.label).collect();
  let predictions: Vec<f64> = records.iter().map(|r| r.prediction).collect();
  let cost = |recall| {
    round5(
      CostAtRecall {
        recall,
        alpha: COST_ALPHA,
      }
      .score(&labels, &predictions),
    )
  };

  let result = BenchmarkResult {
    auc: round5(RocAuc.score(&labels, &predictions)),
    average_precision: round5(AveragePrecision.score(&labels, &predictions)),
    loss: round5(BceWithLogits.score(&labels, &predictions)),
    accuracy: round5(Accuracy.score(&labels, &predictions)),
    cost_at_recall_0_1: cost(0.1),
    cost_at_recall_0_5: cost(0.5),
    cost_at_recall_0_9: cost(0.9),
  };
  if result.auc.is_nan() {
    warn!("测试集只包含一个类别，AUC 无定义");
  }

  Evaluation {
    result,
    confusion: ConfusionMatrix::from_records(records),
  }
}

impl Evaluation {
  pub fn log(&self) {
    let r = &self.result;
    let cm = &self.confusion;
    info!("基准测试结果:");
    info!("混淆矩阵:\n{}", cm);
    info!("Loss: {}", r.loss);
    info!("Acc: {}", r.accuracy);
    info!("AUC: {}", r.auc);
    info!("AP: {}", r.average_precision);
    info!("代价（最优为 0.0）:");
    info!("召回率 0.1 时代价 {}", r.cost_at_recall_0_1);
    info!("召回率 0.5 时代价 {}", r.cost_at_recall_0_5);
    info!("召回率 0.9 时代价 {}", r.cost_at_recall_0_9);
    info!(
      "检出 {} 个伪造视频，正确识别 {} 个真实视频",
      cm.true_positives, cm.true_negatives
    );
    info!(
      "{} 个真实视频被误判为伪造，{} 个伪造视频未被检出",
      cm.false_positives, cm.false_negatives
    );
    if cm.is_perfect() {
      info!("完美分类器！");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::collection::vec;
  use proptest::prelude::*;

  fn labels(raw: &[u8]) -> Vec<Label> {
    raw
      .iter()
      .map(|&l| if l == 1 { Label::Fake } else { Label::Real })
      .collect()
  }

  #[test]
  fn auc_and_ap_match_reference_values() {
    let y = labels(&[0, 0, 1, 1]);
    let p = [0.1, 0.4, 0.35, 0.8];
    assert!((RocAuc.score(&y, &p) - 0.75).abs() < 1e-12);
    assert!((AveragePrecision.score(&y, &p) - 0.833_333_333).abs() < 1e-6);
  }

  #[test]
  fn auc_handles_ties() {
    let y = labels(&[0, 1]);
    assert!((RocAuc.score(&y, &[0.5, 0.5]) - 0.5).abs() < 1e-12);
  }

  #[test]
  fn auc_is_undefined_for_single_class() {
    assert!(RocAuc.score(&labels(&[1, 1]), &[0.2, 0.9]).is_nan());
  }

  #[test]
  fn bce_at_zero_logit_is_ln2() {
    let loss = BceWithLogits.score(&labels(&[0, 1]), &[0.0, 0.0]);
    assert!((loss - std::f64::consts::LN_2).abs() < 1e-12);
  }

  #[test]
  fn bce_treats_probabilities_as_logits() {
    // 完全正确的概率仍有非零损失
    let loss = BceWithLogits.score(&labels(&[0, 1]), &[0.0, 1.0]);
    let expected = (std::f64::consts::LN_2 + (-1.0f64).exp().ln_1p()) / 2.0;
    assert!((loss - expected).abs() < 1e-12);
  }

  #[test]
  fn accuracy_threshold_is_exclusive() {
    let y = labels(&[0, 1]);
    assert_eq!(Accuracy.score(&y, &[0.5, 0.51]), 1.0);
    assert_eq!(Accuracy.score(&y, &[0.51, 0.5]), 0.0);
  }

  #[test]
  fn perfect_separation_costs_nothing() {
    let y = labels(&[0, 0, 1, 1]);
    let p = [0.1, 0.2, 0.8, 0.9];
    for recall in [0.1, 0.5, 0.9] {
      let cost = CostAtRecall {
        recall,
        alpha: COST_ALPHA,
      }
      .score(&y, &p);
      assert_eq!(cost, 0.0);
    }
  }

  #[test]
  fn false_positives_raise_cost() {
    let y = labels(&[0, 1, 0, 1]);
    let p = [0.9, 0.8, 0.1, 0.05];
    let cost = CostAtRecall {
      recall: 0.5,
      alpha: COST_ALPHA,
    }
    .score(&y, &p);
    // tp = 1, fp = 1
    assert!((cost - (101.0f64).ln()).abs() < 1e-12);
  }

  #[test]
  fn confusion_matrix_and_perfect_flag() {
    let records = [
      PredictionRecord {
        label: Label::Real,
        prediction: 0.2,
      },
      PredictionRecord {
        label: Label::Fake,
        prediction: 0.7,
      },
    ];
    let eval = evaluate(&records);
    assert_eq!(eval.confusion.true_negatives, 1);
    assert_eq!(eval.confusion.true_positives, 1);
    assert!(eval.confusion.is_perfect());
    assert_eq!(eval.result.accuracy, 1.0);
    assert_eq!(eval.result.auc, 1.0);
  }

  #[test]
  fn rounding_to_five_places() {
    assert_eq!(round5(0.123456789), 0.12346);
  }

  proptest! {
    #[test]
    fn prop_scores_bounded(
      (raw, preds) in (2usize..60).prop_flat_map(|n| (vec(0u8..=1, n), vec(0.0f64..=1.0, n)))
    ) {
      let y = labels(&raw);
      prop_assume!(y.contains(&Label::Fake) && y.contains(&Label::Real));
      let auc = RocAuc.score(&y, &preds);
      let ap = AveragePrecision.score(&y, &preds);
      let acc = Accuracy.score(&y, &preds);
      prop_assert!((0.0..=1.0).contains(&auc));
      prop_assert!((0.0..=1.0 + 1e-12).contains(&ap));
      prop_assert!((0.0..=1.0).contains(&acc));
      for recall in [0.1, 0.5, 0.9] {
        let cost = CostAtRecall { recall, alpha: COST_ALPHA }.score(&y, &preds);
        prop_assert!(cost >= 0.0);
      }
    }
  }
}
