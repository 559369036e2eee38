// 该文件是 Zhenwei （甄伪） 项目的一部分。
// src/bin/train_method.rs - 训练检测方法
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
  detector::{DEFAULT_SEED, DfDetector, Resources, TrainConfig},
  train::TrainParams,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[arg(long, value_name = "DATASET")]
  pub dataset: String,
  #[arg(long, value_name = "DIR")]
  pub data_path: Option<PathBuf>,
  #[arg(long, default_value = "xception", value_name = "METHOD")]
  pub method: String,
  /// 人脸图像保存目录
  #[arg(long, value_name = "DIR")]
  pub img_save_path: Option<PathBuf>,
  #[arg(long, default_value_t = 1)]
  pub epochs: usize,
  #[arg(long, default_value_t = 32)]
  pub batch_size: usize,
  #[arg(long, default_value_t = 0.001)]
  pub lr: f64,
  /// 交叉验证折数，1 表示不做交叉验证
  #[arg(long, default_value_t = 1)]
  pub folds: usize,
  /// 数据增强强度: weak 或 strong
  #[arg(long, default_value = "weak", value_name = "STRENGTH")]
  pub augmentation: String,
  /// 不划分验证集
  #[arg(long)]
  pub fulltrain: bool,
  /// 人脸图像已提取，跳过检测
  #[arg(long)]
  pub faces_available: bool,
  /// 人脸框每侧外扩比例 [0, 1)
  #[arg(long, default_value_t = 0.0)]
  pub face_margin: f32,
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

  let mut config = TrainConfig::new(args.dataset.parse()?, args.method.parse()?);
  config.data_path = args.data_path;
  config.img_save_path = args.img_save_path;
  config.params = TrainParams {
    epochs: args.epochs,
    batch_size: args.batch_size,
    lr: args.lr,
    folds: args.folds,
    fulltrain: args.fulltrain,
  };
  config.augmentation = args.augmentation.parse()?;
  config.faces_available = args.faces_available;
  config.face_margin = args.face_margin;
  config.seed = args.seed;

  info!("训练参数: {:?}", config.params);
  info!("运行器: {}", args.backend);

  let backend = CommandBackend::from_url(&args.backend)?;
  let detector = DfDetector::new(
    Resources::from_root(&args.resources),
    backend.clone(),
    backend.clone(),
    backend,
  );

  let report = detector.train_method(&config)?;
  println!("{}", serde_json::to_string_pretty(&report)?);

  Ok(())
}
