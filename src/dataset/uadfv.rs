// 该文件是 Zhenwei （甄伪） 项目的一部分。
// src/dataset/uadfv.rs - UADFV 数据集标注
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
  collections::HashSet,
  path::{Path, PathBuf},
};

use tracing::debug;

use super::{DatasetKind, DatasetLabeler, Label, LabelError, VideoRecord, walk_labeled};

pub const UADFV_ROOT: &str = "fake_videos";
pub const UADFV_REAL_DIR: &str = "real";
pub const UADFV_FAKE_DIR: &str = "fake";
pub const UADFV_TEST_DIR: &str = "test";
pub const UADFV_TRAIN_IMGS_DIR: &str = "train_imgs";

/// 读取 UADFV 测试视频列表（单列、无表头）
pub fn read_uadfv_test_list(path: &Path) -> Result<Vec<String>, LabelError> {
  let content = std::fs::read_to_string(path).map_err(|e| LabelError::io(path, e))?;
  let names: Vec<String> = content
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty())
    .map(str::to_string)
    .collect();
  debug!("UADFV 测试列表共 {} 项", names.len());
  Ok(names)
}

pub struct Uadfv<'a> {
  test_list: &'a Path,
}

impl<'a> Uadfv<'a> {
  pub fn new(test_list: &'a Path) -> Self {
    Self { test_list }
  }
}

impl DatasetLabeler for Uadfv<'_> {
  fn kind(&self) -> DatasetKind {
    DatasetKind::Uadfv
  }

  fn training_videos(&self, root: &Path) -> Result<Vec<VideoRecord>, LabelError> {
    let test_list: HashSet<String> = read_uadfv_test_list(self.test_list)?.into_iter().collect();

    let mut records = walk_labeled(&root.join(UADFV_REAL_DIR), Label::Real, true)?;
    records.extend(walk_labeled(&root.join(UADFV_FAKE_DIR), Label::Fake, true)?);
    records.retain(|record| {
      record
        .grouping_key
        .as_ref()
        .is_some_and(|name| !test_list.contains(name))
    });
    Ok(records)
  }

  fn face_crop_dirs(&self, root: &Path) -> (PathBuf, PathBuf) {
    DatasetKind::Uadfv.face_crop_dirs(root)
  }

  fn test_videos(&self, root: &Path) -> Result<Vec<VideoRecord>, LabelError> {
    let base = root.join(UADFV_TEST_DIR);
    let mut records = walk_labeled(&base.join(UADFV_REAL_DIR), Label::Real, true)?;
    records.extend(walk_labeled(&base.join(UADFV_FAKE_DIR), Label::Fake, true)?);
    Ok(records)
  }
}
