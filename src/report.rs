// 该文件是 Zhenwei （甄伪） 项目的一部分。
// src/report.rs - 基准测试结果记录
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

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::{
  FromUrl, FromUrlWithScheme,
  dataset::DatasetKind,
  detector::BenchmarkConfig,
  metrics::{BenchmarkResult, ConfusionMatrix, Evaluation},
};

#[derive(Error, Debug)]
pub enum ReportError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch {
    expected: &'static str,
    actual: String,
  },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
  pub dataset: DatasetKind,
  pub method: String,
  pub seed: u64,
  pub recorded_at: DateTime<Utc>,
  pub result: BenchmarkResult,
  pub confusion: ConfusionMatrix,
}

impl BenchmarkReport {
  pub fn new(config: &BenchmarkConfig, evaluation: &Evaluation) -> Self {
    Self {
      dataset: config.dataset,
      method: config.method.to_string(),
      seed: config.seed,
      recorded_at: Utc::now(),
      result: evaluation.result,
      confusion: evaluation.confusion,
    }
  }
}

/// 按日期分目录保存 JSON 报告，`folder:///reports?pretty`
pub struct ReportRecorder {
  directory: PathBuf,
  pretty: bool,
}

impl FromUrlWithScheme for ReportRecorder {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ReportRecorder {
  type Error = ReportError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(ReportError::SchemeMismatch {
        expected: Self::SCHEME,
        actual: uri.scheme().to_string(),
      });
    }

    Ok(ReportRecorder {
      directory: PathBuf::from(uri.path()),
      pretty: uri.query_pairs().any(|(k, _)| k == "pretty"),
    })
  }
}

impl ReportRecorder {
  fn report_path(&self, report: &BenchmarkReport) -> PathBuf {
    let at = report.recorded_at;
    self
      .directory
      .join(at.year().to_string())
      .join(format!("{:02}", at.month()))
      .join(format!("{:02}", at.day()))
      .join(format!(
        "{}-{}-{}.json",
        at.format("%H-%M-%S"),
        report.method,
        report.dataset
      ))
  }

  pub fn record(&self, report: &BenchmarkReport) -> Result<PathBuf, ReportError> {
    let path = self.report_path(report);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let content = if self.pretty {
      serde_json::to_string_pretty(report)?
    } else {
      serde_json::to_string(report)?
    };
    std::fs::write(&path, content)?;

    info!("报告已保存: {}", path.display());
    Ok(path)
  }
}
