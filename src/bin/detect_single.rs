// 该文件是 Zhenwei （甄伪） 项目的一部分。
// src/bin/detect_single.rs - 单视频检测
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
use url::Url;
use zhenwei::{
  FromUrl,
  backend::CommandBackend,
  detector::{DEFAULT_SEED, DetectConfig, DfDetector, Resources},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 待检测视频
  #[arg(long, value_name = "VIDEO")]
  pub video: PathBuf,
  #[arg(long, default_value = "xception", value_name = "METHOD")]
  pub method: String,
  /// 使用哪个数据集上训练的权重
  #[arg(long, default_value = "uadfv", value_name = "DATASET")]
  pub weights_dataset: String,
  #[arg(long, default_value_t = DEFAULT_SEED)]
  pub seed: u64,
  #[arg(long, default_value = ".", value_name = "DIR")]
  pub resources: PathBuf,
  #[arg(long, value_name = "BACKEND")]
  pub backend: Url,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  let mut config = DetectConfig::new(args.video, args.method.parse()?);
  config.weights_dataset = args.weights_dataset.parse()?;
  config.seed = args.seed;

  let backend = CommandBackend::from_url(&args.backend)?;
  let detector = DfDetector::new(
    Resources::from_root(&args.resources),
    backend.clone(),
    backend.clone(),
    backend,
  );

  let detection = detector.detect_single(&config)?;
  println!("{}", serde_json::to_string_pretty(&detection)?);

  Ok(())
}
