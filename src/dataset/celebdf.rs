// 该文件是 Zhenwei （甄伪） 项目的一部分。
// src/dataset/celebdf.rs - Celeb-DF 数据集标注
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

use rand::{SeedableRng, rngs::StdRng};
use tracing::debug;

use super::{
  DatasetKind, DatasetLabeler, Label, LabelError, VideoRecord, switch_one_zero, walk_labeled,
};

pub const CELEBDF_ROOT: &str = "celebdf";
pub const CELEBDF_REAL_DIR: &str = "Celeb-real";
pub const CELEBDF_FAKE_DIR: &str = "Celeb-synthesis";
pub const CELEBDF_YOUTUBE_DIR: &str = "YouTube-real";
pub const CELEBDF_TEST_LIST: &str = "List_of_testing_videos.txt";
pub const CELEBDF_FACECROPS_DIR: &str = "facecrops";

const UNDERSAMPLE_SEED: u64 = 24;

/// 读取 Celeb-DF 自带的测试列表：`<标志> <相对路径>`，标志 1 表示真实
pub fn read_celebdf_test_list(root: &Path) -> Result<Vec<VideoRecord>, LabelError> {
  let path = root.join(CELEBDF_TEST_LIST);
  let content = std::fs::read_to_string(&path).map_err(|e| LabelError::io(&path, e))?;

  let mut records = Vec::new();
  for (index, line) in content.lines().enumerate() {
    let line = line.trim();
    if line.is_empty() {
      continue;
    }
    let malformed = || LabelError::MalformedTestList {
      path: path.clone(),
      line: index + 1,
      content: line.to_string(),
    };

    let mut fields = line.split_whitespace();
    let (Some(flag), Some(relative), None) = (fields.next(), fields.next(), fields.next()) else {
      return Err(malformed());
    };
    let flag: u8 = flag.parse().map_err(|_| malformed())?;
    let label = if switch_one_zero(flag) == 1 {
      Label::Fake
    } else {
      Label::Real
    };

    let video = root.join(relative);
    let name = video
      .file_name()
      .and_then(|n| n.to_str())
      .unwrap_or(relative)
      .to_string();
    records.push(VideoRecord::new(video, label).with_grouping_key(name));
  }
  Ok(records)
}

pub struct CelebDf;

impl DatasetLabeler for CelebDf {
  fn kind(&self) -> DatasetKind {
    DatasetKind::CelebDf
  }

  fn training_videos(&self, root: &Path) -> Result<Vec<VideoRecord>, LabelError> {
    let testing: HashSet<PathBuf> = read_celebdf_test_list(root)?
      .into_iter()
      .map(|r| r.path)
      .collect();

    let mut real = walk_labeled(&root.join(CELEBDF_REAL_DIR), Label::Real, true)?;
    let mut fake = walk_labeled(&root.join(CELEBDF_FAKE_DIR), Label::Fake, true)?;
    real.retain(|r| !testing.contains(&r.path));
    fake.retain(|r| !testing.contains(&r.path));
    debug!("排除测试视频后: {} 真实, {} 伪造", real.len(), fake.len());

    let fake = undersample(fake, real.len())?;
    real.extend(fake);
    Ok(real)
  }

  fn face_crop_dirs(&self, root: &Path) -> (PathBuf, PathBuf) {
    DatasetKind::CelebDf.face_crop_dirs(root)
  }

  fn test_videos(&self, root: &Path) -> Result<Vec<VideoRecord>, LabelError> {
    read_celebdf_test_list(root)
  }

  fn require_faces(&self) -> bool {
    true
  }
}

/// 无放回地抽取 `n` 个伪造视频，使真伪比例为 50/50
fn undersample(fake: Vec<VideoRecord>, n: usize) -> Result<Vec<VideoRecord>, LabelError> {
  if fake.len() < n {
    return Err(LabelError::NotEnoughFakes {
      real: n,
      fake: fake.len(),
    });
  }

  let mut rng = StdRng::seed_from_u64(UNDERSAMPLE_SEED);
  let mut slots: Vec<Option<VideoRecord>> = fake.into_iter().map(Some).collect();
  let sampled = rand::seq::index::sample(&mut rng, slots.len(), n)
    .into_iter()
    .filter_map(|i| slots[i].take())
    .collect();
  Ok(sampled)
}
