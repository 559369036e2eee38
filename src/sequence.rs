// 该文件是 Zhenwei （甄伪） 项目的一部分。
// src/sequence.rs - 序列模型的人脸帧分组
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

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
  NUM_FRAMES,
  dataset::{DatasetKind, Label, LabeledDataset},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceGroup {
  pub grouping_key: String,
  pub label: Label,
  pub frame_count: usize,
}

/// 从人脸帧文件名推导其来源视频
pub trait NamingConvention {
  fn parent_video(&self, frame_name: &str, label: Label) -> String;
}

/// 取固定长度的文件名前缀，长度由标签决定
#[derive(Debug, Clone, Copy)]
pub struct FixedPrefix {
  pub real: usize,
  pub fake: usize,
}

impl NamingConvention for FixedPrefix {
  fn parent_video(&self, frame_name: &str, label: Label) -> String {
    let len = match label {
      Label::Real => self.real,
      Label::Fake => self.fake,
    };
    frame_name.chars().take(len).collect()
  }
}

/// 取第一个 `.` 之前的部分，即来源视频的文件名主干
#[derive(Debug, Clone, Copy)]
pub struct VideoStem;

impl NamingConvention for VideoStem {
  fn parent_video(&self, frame_name: &str, _label: Label) -> String {
    frame_name
      .split_once('.')
      .map_or(frame_name, |(stem, _)| stem)
      .to_string()
  }
}

// "0000.mp4_..." 与 "0000_fake.mp4_..."
const UADFV_NAMING: FixedPrefix = FixedPrefix { real: 4, fake: 9 };

pub fn naming_convention(dataset: DatasetKind) -> &'static dyn NamingConvention {
  match dataset {
    DatasetKind::Uadfv => &UADFV_NAMING,
    DatasetKind::CelebDf => &VideoStem,
  }
}

pub fn group_sequences(dataset: DatasetKind, crops: &LabeledDataset) -> Vec<SequenceGroup> {
  group_sequences_with(naming_convention(dataset), crops)
}

/// 只保留恰好有 [`NUM_FRAMES`] 帧的视频，每个 (标签, 视频) 输出一组
pub fn group_sequences_with(
  naming: &dyn NamingConvention,
  crops: &LabeledDataset,
) -> Vec<SequenceGroup> {
  let mut frames: Vec<(&str, Label)> = crops
    .records
    .iter()
    .filter_map(|r| r.file_name().map(|name| (name, r.label)))
    .collect();
  frames.sort_by(|a, b| a.0.cmp(b.0));

  let mut counts: BTreeMap<String, usize> = BTreeMap::new();
  let mut pairs: BTreeSet<(Label, String)> = BTreeSet::new();
  for (name, label) in frames {
    let parent = naming.parent_video(name, label);
    *counts.entry(parent.clone()).or_default() += 1;
    pairs.insert((label, parent));
  }

  let groups: Vec<SequenceGroup> = pairs
    .into_iter()
    .filter_map(|(label, parent)| {
      let frame_count = counts.get(&parent).copied().unwrap_or(0);
      (frame_count == NUM_FRAMES).then_some(SequenceGroup {
        grouping_key: parent,
        label,
        frame_count,
      })
    })
    .collect();

  debug!(
    "{} 个视频中有 {} 个满足 {} 帧",
    counts.len(),
    groups.len(),
    NUM_FRAMES
  );
  groups
}
