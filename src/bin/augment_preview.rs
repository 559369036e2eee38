// 该文件是 Zhenwei （甄伪） 项目的一部分。
// src/bin/augment_preview.rs - 数据增强预览
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
use zhenwei::{
  augment::build_augmentations_named,
  detector::{DEFAULT_SEED, reproducibility_seed},
};

/// 对一张人脸图像生成若干增强样本
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[arg(long, value_name = "IMAGE")]
  pub input: PathBuf,
  /// 输出目录
  #[arg(long, value_name = "DIR")]
  pub output: PathBuf,
  /// 目标边长
  #[arg(long, default_value_t = 299)]
  pub size: u32,
  #[arg(long, default_value = "strong", value_name = "STRENGTH")]
  pub strength: String,
  #[arg(long, default_value_t = 8)]
  pub count: usize,
  #[arg(long, default_value_t = DEFAULT_SEED)]
  pub seed: u64,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  let pipeline = build_augmentations_named(args.size, &args.strength)?;
  info!("{} 个增强步骤", pipeline.len());

  let image = image::ImageReader::open(&args.input)?.decode()?.to_rgb8();
  info!(
    "读取图像: {} ({}x{})",
    args.input.display(),
    image.width(),
    image.height()
  );

  std::fs::create_dir_all(&args.output)?;
  let stem = args
    .input
    .file_stem()
    .map(|s| s.to_string_lossy().into_owned())
    .unwrap_or_else(|| "sample".to_string());

  let mut rng = reproducibility_seed(args.seed).rng();
  let now = std::time::Instant::now();
  for i in 0..args.count {
    let augmented = pipeline.apply(&image, &mut rng)?;
    let path = args.output.join(format!("{}-{:02}.png", stem, i));
    augmented.save(&path)?;
    info!("保存: {}", path.display());
  }
  info!("完成，耗时: {:.2?}", now.elapsed());

  Ok(())
}
