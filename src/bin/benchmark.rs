// 该文件是 Zhenwei （甄伪） 项目的一部分。
// src/bin/benchmark.rs - 基准测试
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

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;
use zhenwei::{
  FromUrl,
  backend::CommandBackend,
  detector::{BenchmarkConfig, DEFAULT_SEED, DfDetector, Resources},
  report::{BenchmarkReport, ReportRecorder},
};

/// 在 UADFV 或 Celeb-DF 测试集上评估预训练方法
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 数据集: uadfv 或 celebdf
  #[arg(long, value_name = "DATASET")]
  pub dataset: String,
  /// 数据集根目录（fake_videos/ 或 celebdf/）
  #[arg(long, value_name = "DIR")]
  pub data_path: Option<PathBuf>,
  /// 方法: xception, efficientnetb7, mesonet, resnetlstm, efficientnetb1_lstm, dfdcrank90
  #[arg(long, default_value = "xception", value_name = "METHOD")]
  pub method: String,
  #[arg(long, default_value_t = DEFAULT_SEED, value_name = "SEED")]
  pub seed: u64,
  /// 包含 pretrained_mods/weights 与 data/uadfv_test.csv 的目录
  #[arg(long, default_value = ".", value_name = "DIR")]
  pub resources: PathBuf,
  /// 外部运行器，例如 exec:///usr/local/bin/zhenwei-runner
  #[arg(long, value_name = "BACKEND")]
  pub backend: Url,
  /// 报告目录，例如 folder:///var/lib/zhenwei/reports?pretty
  #[arg(long, value_name = "REPORT")]
  pub report: Option<Url>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("数据集: {}", args.dataset);
  info!("方法: {}", args.method);
  info!("运行器: {}", args.backend);

  let config = BenchmarkConfig::parse(&args.dataset, args.data_path, &args.method, args.seed)?;
  let backend = CommandBackend::from_url(&args.backend)?;
  let detector = DfDetector::new(
    Resources::from_root(&args.resources),
    backend.clone(),
    backend.clone(),
    backend,
  );

  let evaluation = detector.benchmark(&config)?;
  println!("{}", serde_json::to_string_pretty(&evaluation.result)?);

  if let Some(url) = &args.report {
    let recorder = ReportRecorder::from_url(url)?;
    recorder.record(&BenchmarkReport::new(&config, &evaluation))?;
  }

  Ok(())
}
