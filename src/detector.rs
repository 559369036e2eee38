// 该文件是 Zhenwei （甄伪） 项目的一部分。
// src/detector.rs - 深度伪造检测入口
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

use std::path::{Path, PathBuf};

use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::{
  augment::{AugmentationError, AugmentationStrength, build_augmentations},
  dataset::{DatasetKind, Label, LabelError, Labeler, UnsupportedDataset},
  ensemble::{DFDC_RANK90, EnsembleError, aggregate, load_members},
  face::{FaceDetector, FaceExtractionError, extract_faces, validate_margin},
  layout::{LayoutError, setup_celebdf_benchmark, setup_uadfv_benchmark},
  method::{BenchmarkMethod, Method, MethodError, MethodResolver, Mode},
  metrics::{Evaluation, evaluate},
  model::{BoxError, InferenceError, InferenceRequest, Model, ModelLoader, predict},
  train::{TrainParams, TrainReport, TrainRequest, Trainer},
};

pub const DEFAULT_SEED: u64 = 24;

/// 随机种子与确定性开关，随请求转发给模型与训练流程
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reproducibility {
  pub seed: u64,
  pub deterministic: bool,
}

impl Reproducibility {
  pub fn rng(&self) -> StdRng {
    StdRng::seed_from_u64(self.seed)
  }
}

/// 每个入口开始时调用一次，早于任何随机采样与模型初始化
pub fn reproducibility_seed(seed: u64) -> Reproducibility {
  info!("随机种子设为 {}", seed);
  Reproducibility {
    seed,
    deterministic: true,
  }
}

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("配置错误: {0}")]
  Configuration(String),
  #[error(transparent)]
  Method(#[from] MethodError),
  #[error(transparent)]
  UnsupportedDataset(#[from] UnsupportedDataset),
  #[error(transparent)]
  Label(#[from] LabelError),
  #[error(transparent)]
  Layout(#[from] LayoutError),
  #[error(transparent)]
  Augmentation(#[from] AugmentationError),
  #[error(transparent)]
  Inference(#[from] InferenceError),
  #[error(transparent)]
  Ensemble(#[from] EnsembleError),
  #[error(transparent)]
  FaceExtraction(#[from] FaceExtractionError),
  #[error("外部组件错误: {0}")]
  Backend(#[source] BoxError),
}

/// 随项目分发的固定资源
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resources {
  pub weights_dir: PathBuf,
  pub uadfv_test_list: PathBuf,
}

impl Resources {
  /// `<root>/pretrained_mods/weights` 与 `<root>/data/uadfv_test.csv`
  pub fn from_root(root: impl AsRef<Path>) -> Self {
    let root = root.as_ref();
    Self {
      weights_dir: root.join("pretrained_mods").join("weights"),
      uadfv_test_list: root.join("data").join("uadfv_test.csv"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BenchmarkConfig {
  pub dataset: DatasetKind,
  pub data_path: Option<PathBuf>,
  pub method: BenchmarkMethod,
  pub seed: u64,
}

impl BenchmarkConfig {
  /// 先校验方法名，再校验数据集
  pub fn parse(
    dataset: &str,
    data_path: Option<PathBuf>,
    method: &str,
    seed: u64,
  ) -> Result<Self, DetectorError> {
    let method = method.parse()?;
    let dataset = dataset.parse()?;
    Ok(Self {
      dataset,
      data_path,
      method,
      seed,
    })
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainConfig {
  pub dataset: DatasetKind,
  pub data_path: Option<PathBuf>,
  pub method: Method,
  pub img_save_path: Option<PathBuf>,
  pub params: TrainParams,
  pub augmentation: AugmentationStrength,
  pub faces_available: bool,
  pub face_margin: f32,
  pub seed: u64,
}

impl TrainConfig {
  pub fn new(dataset: DatasetKind, method: Method) -> Self {
    Self {
      dataset,
      data_path: None,
      method,
      img_save_path: None,
      params: TrainParams::default(),
      augmentation: AugmentationStrength::Weak,
      faces_available: false,
      face_margin: 0.0,
      seed: DEFAULT_SEED,
    }
  }

  pub fn validate(&self) -> Result<(), DetectorError> {
    let p = &self.params;
    if p.epochs == 0 || p.batch_size == 0 || p.folds == 0 {
      return Err(DetectorError::Configuration(
        "epochs、batch_size 与 folds 必须大于 0".to_string(),
      ));
    }
    if p.lr.is_nan() || p.lr <= 0.0 {
      return Err(DetectorError::Configuration(format!(
        "学习率必须为正数: {}",
        p.lr
      )));
    }
    validate_margin(self.face_margin)?;
    Ok(())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectConfig {
  pub video: PathBuf,
  pub method: Method,
  /// 使用哪个数据集上训练的权重
  pub weights_dataset: DatasetKind,
  pub seed: u64,
}

impl DetectConfig {
  pub fn new(video: impl Into<PathBuf>, method: Method) -> Self {
    Self {
      video: video.into(),
      method,
      weights_dataset: DatasetKind::Uadfv,
      seed: DEFAULT_SEED,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleDetection {
  pub video: PathBuf,
  pub method: Method,
  pub prediction: f64,
  pub label: Label,
}

/// 基准测试、训练与单视频检测的入口
///
/// 不保存任何运行状态，每次调用只依赖传入的配置。
pub struct DfDetector<L, F, T> {
  labeler: Labeler,
  resolver: MethodResolver,
  loader: L,
  faces: F,
  trainer: T,
}

impl<L, F, T> DfDetector<L, F, T> {
  pub fn new(resources: Resources, loader: L, faces: F, trainer: T) -> Self {
    Self {
      labeler: Labeler::new(resources.uadfv_test_list),
      resolver: MethodResolver::new(resources.weights_dir),
      loader,
      faces,
      trainer,
    }
  }
}

impl<L, F, T> DfDetector<L, F, T>
where
  L: ModelLoader,
  L::Error: std::error::Error + Send + Sync + 'static,
  <L::Model as Model>::Error: std::error::Error + Send + Sync + 'static,
{
  /// 以字符串形式给出方法与数据集，未知方法在访问文件系统前即报错
  pub fn benchmark_named(
    &self,
    dataset: &str,
    data_path: Option<PathBuf>,
    method: &str,
    seed: u64,
  ) -> Result<Evaluation, DetectorError> {
    let config = BenchmarkConfig::parse(dataset, data_path, method, seed)?;
    self.benchmark(&config)
  }

  pub fn benchmark(&self, config: &BenchmarkConfig) -> Result<Evaluation, DetectorError> {
    let reproducibility = reproducibility_seed(config.seed);
    let data_path = config.data_path.as_deref();
    match config.dataset {
      DatasetKind::Uadfv => {
        setup_uadfv_benchmark(data_path, config.method, self.labeler.uadfv_test_list())?
      }
      DatasetKind::CelebDf => setup_celebdf_benchmark(data_path, config.method)?,
    }

    let data = self
      .labeler
      .label_data(data_path, config.dataset, Method::default(), false, true)?;

    let now = std::time::Instant::now();
    let evaluation = match config.method {
      BenchmarkMethod::Single(method) => {
        let resolved =
          self
            .resolver
            .resolve(method, config.dataset, Mode::Test, &self.loader, &reproducibility)?;
        let model = resolved.model.ok_or_else(|| {
          DetectorError::Configuration(format!("{} 未加载模型", method))
        })?;
        info!("使用 {} 检测深度伪造...", method);
        let records = predict(&model, &data, method, resolved.spec, false)?;
        let evaluation = evaluate(&records);
        evaluation.log();
        evaluation
      }
      BenchmarkMethod::DfdcRank90 => {
        let members = load_members(
          &DFDC_RANK90,
          &self.resolver,
          &self.loader,
          config.dataset,
          &reproducibility,
        )?;
        aggregate(&members, &data)?
      }
    };
    info!("基准测试耗时: {:.2?}", now.elapsed());
    Ok(evaluation)
  }

  pub fn detect_single(&self, config: &DetectConfig) -> Result<SingleDetection, DetectorError> {
    if !config.video.is_file() {
      return Err(DetectorError::Configuration(format!(
        "视频不存在: {}",
        config.video.display()
      )));
    }
    let reproducibility = reproducibility_seed(config.seed);
    let method = config.method;
    let model = self
      .resolver
      .load(method, config.weights_dataset, &self.loader, &reproducibility)?;

    let samples = [config.video.clone()];
    let request = InferenceRequest::new(&samples, config.weights_dataset, method, method.spec());
    let predictions = model
      .infer(&request)
      .map_err(|e| InferenceError::Backend(Box::new(e)))?;
    let prediction = match predictions.as_slice() {
      [p] if (0.0..=1.0).contains(p) => *p,
      [p] => {
        return Err(
          InferenceError::OutOfRange {
            index: 0,
            value: *p,
          }
          .into(),
        );
      }
      other => {
        return Err(
          InferenceError::LengthMismatch {
            expected: 1,
            actual: other.len(),
          }
          .into(),
        );
      }
    };

    let label = Label::from_prediction(prediction);
    info!(
      "{}: 伪造概率 {:.5}，判定为{}",
      config.video.display(),
      prediction,
      match label {
        Label::Real => "真实",
        Label::Fake => "伪造",
      }
    );
    Ok(SingleDetection {
      video: config.video.clone(),
      method,
      prediction,
      label,
    })
  }
}

impl<L, F, T> DfDetector<L, F, T>
where
  L: ModelLoader,
  L::Error: std::error::Error + Send + Sync + 'static,
  F: FaceDetector,
  F::Error: std::error::Error + Send + Sync + 'static,
  T: Trainer,
  T::Error: std::error::Error + Send + Sync + 'static,
{
  pub fn train_method(&self, config: &TrainConfig) -> Result<TrainReport, DetectorError> {
    let img_save_path = config.img_save_path.as_deref().ok_or_else(|| {
      DetectorError::Configuration("需要指定保存训练图像的路径".to_string())
    })?;
    config.validate()?;
    info!("在 {} 数据集上训练 {}", config.dataset, config.method);

    let reproducibility = reproducibility_seed(config.seed);
    let resolved = self.resolver.resolve(
      config.method,
      config.dataset,
      Mode::Train,
      &self.loader,
      &reproducibility,
    )?;

    let videos = self.labeler.label_data(
      config.data_path.as_deref(),
      config.dataset,
      config.method,
      false,
      false,
    )?;

    if !config.faces_available {
      extract_faces(&self.faces, &videos, img_save_path, config.face_margin)?;
    }

    let faces =
      self
        .labeler
        .label_data(Some(img_save_path), config.dataset, config.method, true, false)?;
    let augmentations = build_augmentations(resolved.spec.input_size, config.augmentation);

    let request = TrainRequest::new(
      config.method,
      resolved.spec,
      &faces,
      &augmentations,
      config.params,
      reproducibility,
    );
    let now = std::time::Instant::now();
    let report = self
      .trainer
      .train(&request)
      .map_err(|e| DetectorError::Backend(Box::new(e)))?;
    info!("训练耗时: {:.2?}", now.elapsed());
    report.log();
    Ok(report)
  }
}
