// 该文件是 Zhenwei （甄伪） 项目的一部分。
// src/dataset.rs - 数据集标注
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

use std::{
  fmt,
  path::{Path, PathBuf},
  str::FromStr,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::{method::Method, sequence};

mod celebdf;
mod uadfv;

pub use self::celebdf::{
  CELEBDF_FACECROPS_DIR, CELEBDF_FAKE_DIR, CELEBDF_REAL_DIR, CELEBDF_ROOT, CELEBDF_TEST_LIST,
  CELEBDF_YOUTUBE_DIR, CelebDf, read_celebdf_test_list,
};
pub use self::uadfv::{
  UADFV_FAKE_DIR, UADFV_REAL_DIR, UADFV_ROOT, UADFV_TEST_DIR, UADFV_TRAIN_IMGS_DIR, Uadfv,
  read_uadfv_test_list,
};

/// 标签：0 为真实视频，1 为伪造视频
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Label {
  Real = 0,
  Fake = 1,
}

impl Label {
  pub fn as_u8(self) -> u8 {
    self as u8
  }

  /// 以 0.5 为阈值把伪造概率转换为标签
  pub fn from_prediction(prediction: f64) -> Self {
    if prediction > 0.5 {
      Label::Fake
    } else {
      Label::Real
    }
  }
}

impl From<Label> for u8 {
  fn from(label: Label) -> Self {
    label.as_u8()
  }
}

impl TryFrom<u8> for Label {
  type Error = String;

  fn try_from(value: u8) -> Result<Self, Self::Error> {
    match value {
      0 => Ok(Label::Real),
      1 => Ok(Label::Fake),
      other => Err(format!("无效标签: {}", other)),
    }
  }
}

/// CelebDF 使用 1 表示真实视频，这里统一为 1 表示伪造
pub fn switch_one_zero(num: u8) -> u8 {
  if num == 1 { 0 } else { 1 }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("数据集 {0} 不存在，可选: uadfv, celebdf")]
pub struct UnsupportedDataset(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatasetKind {
  #[serde(rename = "uadfv")]
  Uadfv,
  #[serde(rename = "celebdf")]
  CelebDf,
}

impl DatasetKind {
  pub fn name(self) -> &'static str {
    match self {
      DatasetKind::Uadfv => "uadfv",
      DatasetKind::CelebDf => "celebdf",
    }
  }

  /// 人脸图像的真实/伪造目录
  pub fn face_crop_dirs(self, root: &Path) -> (PathBuf, PathBuf) {
    let base = match self {
      DatasetKind::Uadfv => root.join(UADFV_TRAIN_IMGS_DIR),
      DatasetKind::CelebDf => root.join(CELEBDF_FACECROPS_DIR),
    };
    (base.join("real"), base.join("fake"))
  }
}

impl FromStr for DatasetKind {
  type Err = UnsupportedDataset;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "uadfv" => Ok(DatasetKind::Uadfv),
      "celebdf" => Ok(DatasetKind::CelebDf),
      other => Err(UnsupportedDataset(other.to_string())),
    }
  }
}

impl fmt::Display for DatasetKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// 数据集条目的内容类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Content {
  /// 原始视频
  Videos,
  /// 单帧人脸图像
  FaceCrops,
  /// 按视频分组的人脸帧序列，路径为类别目录加上父视频标识
  Sequences,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoRecord {
  pub path: PathBuf,
  pub label: Label,
  pub grouping_key: Option<String>,
}

impl VideoRecord {
  pub fn new(path: PathBuf, label: Label) -> Self {
    Self {
      path,
      label,
      grouping_key: None,
    }
  }

  pub fn with_grouping_key(mut self, key: impl Into<String>) -> Self {
    self.grouping_key = Some(key.into());
    self
  }

  pub fn file_name(&self) -> Option<&str> {
    self.path.file_name().and_then(|name| name.to_str())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledDataset {
  pub dataset: DatasetKind,
  pub content: Content,
  pub test: bool,
  pub records: Vec<VideoRecord>,
}

impl LabeledDataset {
  pub fn new(
    dataset: DatasetKind,
    content: Content,
    test: bool,
    records: Vec<VideoRecord>,
  ) -> Self {
    Self {
      dataset,
      content,
      test,
      records,
    }
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  pub fn count(&self, label: Label) -> usize {
    self.records.iter().filter(|r| r.label == label).count()
  }

  pub fn labels(&self) -> Vec<Label> {
    self.records.iter().map(|r| r.label).collect()
  }

  pub fn paths(&self) -> Vec<PathBuf> {
    self.records.iter().map(|r| r.path.clone()).collect()
  }
}

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("请指定数据集路径")]
  MissingDatasetPath,
  #[error("没有可用的人脸图像，请设置 faces_available=false 先提取人脸")]
  NoFaces,
  #[error("读取 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("测试列表 {path} 第 {line} 行格式错误: {content}")]
  MalformedTestList {
    path: PathBuf,
    line: usize,
    content: String,
  },
  #[error("伪造视频数量 {fake} 少于真实视频数量 {real}，无法欠采样")]
  NotEnoughFakes { real: usize, fake: usize },
}

impl LabelError {
  pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
    LabelError::Io {
      path: path.to_path_buf(),
      source,
    }
  }
}

/// 每种数据集的标注策略
pub trait DatasetLabeler {
  fn kind(&self) -> DatasetKind;

  /// 训练用原始视频，已排除测试视频
  fn training_videos(&self, root: &Path) -> Result<Vec<VideoRecord>, LabelError>;

  /// 已提取人脸图像所在的真实/伪造目录
  fn face_crop_dirs(&self, root: &Path) -> (PathBuf, PathBuf);

  fn test_videos(&self, root: &Path) -> Result<Vec<VideoRecord>, LabelError>;

  /// 人脸图像集为空时是否报错
  fn require_faces(&self) -> bool {
    false
  }
}

/// 数据集标注器，持有 UADFV 固定测试列表的位置
#[derive(Debug, Clone)]
pub struct Labeler {
  uadfv_test_list: PathBuf,
}

impl Labeler {
  pub fn new(uadfv_test_list: impl Into<PathBuf>) -> Self {
    Self {
      uadfv_test_list: uadfv_test_list.into(),
    }
  }

  pub fn uadfv_test_list(&self) -> &Path {
    &self.uadfv_test_list
  }

  pub fn label_data(
    &self,
    dataset_path: Option<&Path>,
    dataset: DatasetKind,
    method: Method,
    face_crops: bool,
    test_data: bool,
  ) -> Result<LabeledDataset, LabelError> {
    let root = dataset_path.ok_or(LabelError::MissingDatasetPath)?;

    let uadfv;
    let labeler: &dyn DatasetLabeler = match dataset {
      DatasetKind::Uadfv => {
        uadfv = Uadfv::new(&self.uadfv_test_list);
        &uadfv
      }
      DatasetKind::CelebDf => &CelebDf,
    };

    let labeled = if test_data {
      let records = labeler.test_videos(root)?;
      info!("{} 个测试视频", records.len());
      LabeledDataset::new(dataset, Content::Videos, true, records)
    } else if face_crops {
      let labeled = label_face_crops(labeler, root, method)?;
      info!("共得到 {} 张人脸图像", labeled.len());
      labeled
    } else {
      let records = labeler.training_videos(root)?;
      info!("{} 个训练视频", records.len());
      LabeledDataset::new(dataset, Content::Videos, false, records)
    };

    Ok(labeled)
  }
}

fn label_face_crops(
  labeler: &dyn DatasetLabeler,
  root: &Path,
  method: Method,
) -> Result<LabeledDataset, LabelError> {
  let kind = labeler.kind();
  let (real_dir, fake_dir) = labeler.face_crop_dirs(root);
  let mut records = walk_labeled(&real_dir, Label::Real, false)?;
  records.extend(walk_labeled(&fake_dir, Label::Fake, false)?);

  if records.is_empty() && labeler.require_faces() {
    return Err(LabelError::NoFaces);
  }

  if !method.spec().sequence {
    return Ok(LabeledDataset::new(kind, Content::FaceCrops, false, records));
  }

  let crops = LabeledDataset::new(kind, Content::FaceCrops, false, records);
  let sequences = sequence::group_sequences(kind, &crops)
    .into_iter()
    .map(|group| {
      let dir = match group.label {
        Label::Real => &real_dir,
        Label::Fake => &fake_dir,
      };
      VideoRecord::new(dir.join(&group.grouping_key), group.label)
        .with_grouping_key(group.grouping_key)
    })
    .collect();

  Ok(LabeledDataset::new(kind, Content::Sequences, false, sequences))
}

/// 非递归地列出目录中的文件名，按名称排序；目录不存在时返回空列表
pub(crate) fn list_files(dir: &Path) -> Result<Vec<String>, LabelError> {
  if !dir.is_dir() {
    warn!("目录不存在: {}", dir.display());
    return Ok(Vec::new());
  }

  let mut names = Vec::new();
  for entry in std::fs::read_dir(dir).map_err(|e| LabelError::io(dir, e))? {
    let entry = entry.map_err(|e| LabelError::io(dir, e))?;
    // 跟随符号链接
    if !entry.path().is_file() {
      continue;
    }
    if let Some(name) = entry.file_name().to_str() {
      names.push(name.to_string());
    } else {
      warn!("跳过非 UTF-8 文件名: {:?}", entry.file_name());
    }
  }
  names.sort();
  Ok(names)
}

/// 以目录决定标签，`keyed` 为真时记录文件名作为分组键
pub(crate) fn walk_labeled(
  dir: &Path,
  label: Label,
  keyed: bool,
) -> Result<Vec<VideoRecord>, LabelError> {
  let records = list_files(dir)?
    .into_iter()
    .map(|name| {
      let record = VideoRecord::new(dir.join(&name), label);
      if keyed {
        record.with_grouping_key(name)
      } else {
        record
      }
    })
    .collect();
  Ok(records)
}
