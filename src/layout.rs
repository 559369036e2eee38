// 该文件是 Zhenwei （甄伪） 项目的一部分。
// src/layout.rs - 基准测试数据集目录校验
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

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  dataset::{
    CELEBDF_FAKE_DIR, CELEBDF_REAL_DIR, CELEBDF_ROOT, CELEBDF_TEST_LIST, CELEBDF_YOUTUBE_DIR,
    LabelError, UADFV_FAKE_DIR, UADFV_REAL_DIR, UADFV_ROOT, UADFV_TEST_DIR, list_files,
    read_uadfv_test_list,
  },
  method::BenchmarkMethod,
};

/// UADFV 测试集视频总数
pub const UADFV_TEST_VIDEOS: usize = 28;

/// 真实视频文件名长度上限，超过即为伪造视频
const UADFV_REAL_NAME_LEN: usize = 8;

const UADFV_LAYOUT: &str = "./fake_videos/\n    fake/\n    real/";
const CELEBDF_LAYOUT: &str =
  "./celebdf/\n    Celeb-real/\n    Celeb-synthesis/\n    YouTube-real/\n    List_of_testing_videos.txt";

#[derive(Error, Debug)]
pub enum LayoutError {
  #[error(
    "请前往 https://github.com/danmohaha/WIFS2018_In_Ictu_Oculi 下载 UADFV 数据集，解压后按如下结构组织:\n{layout}",
    layout = UADFV_LAYOUT
  )]
  MissingUadfvPath,
  #[error("请先解压 {0}")]
  ZipNotExtracted(PathBuf),
  #[error("{0} 目录结构不正确，请按如下结构组织:\n{layout}", layout = UADFV_LAYOUT)]
  UadfvLayout(PathBuf),
  #[error(
    "请前往 https://github.com/danmohaha/celeb-deepfakeforensics 下载 Celeb-DF 数据集，解压后按如下结构组织:\n{layout}",
    layout = CELEBDF_LAYOUT
  )]
  MissingCelebDfPath,
  #[error("{0} 目录结构不正确，请按如下结构组织:\n{layout}", layout = CELEBDF_LAYOUT)]
  CelebDfLayout(PathBuf),
  #[error("请重新解压数据集，{root} 中缺少 \"{entry}\"")]
  MissingEntry { root: PathBuf, entry: &'static str },
  #[error("文件操作 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error(transparent)]
  Label(#[from] LabelError),
}

impl LayoutError {
  fn io(path: &Path, source: std::io::Error) -> Self {
    LayoutError::Io {
      path: path.to_path_buf(),
      source,
    }
  }
}

fn root_name_is(path: &Path, name: &str) -> bool {
  path.file_name().and_then(|n| n.to_str()) == Some(name)
}

/// 校验 UADFV 目录，必要时生成 `test/` 测试集
pub fn setup_uadfv_benchmark(
  data_path: Option<&Path>,
  method: BenchmarkMethod,
  test_list: &Path,
) -> Result<(), LayoutError> {
  let root = data_path.ok_or(LayoutError::MissingUadfvPath)?;
  if root_name_is(root, "fake_videos.zip") {
    return Err(LayoutError::ZipNotExtracted(root.to_path_buf()));
  }
  if !root_name_is(root, UADFV_ROOT) {
    return Err(LayoutError::UadfvLayout(root.to_path_buf()));
  }

  info!("在 UADFV 数据集上测试 {}", method);
  let test_dir = root.join(UADFV_TEST_DIR);
  if !test_dir.exists() {
    structure_uadfv_files(root, test_list)?;
    return Ok(());
  }

  let num_files = count_test_files(root)?;
  if num_files != UADFV_TEST_VIDEOS {
    warn!(
      "测试集不完整（{} / {}），重新生成",
      num_files, UADFV_TEST_VIDEOS
    );
    std::fs::remove_dir_all(&test_dir).map_err(|e| LayoutError::io(&test_dir, e))?;
    structure_uadfv_files(root, test_list)?;
  } else {
    debug!("测试集已就绪: {}", test_dir.display());
  }
  Ok(())
}

fn count_test_files(root: &Path) -> Result<usize, LayoutError> {
  let test_dir = root.join(UADFV_TEST_DIR);
  let real = list_files(&test_dir.join(UADFV_REAL_DIR))?.len();
  let fake = list_files(&test_dir.join(UADFV_FAKE_DIR))?.len();
  Ok(real + fake)
}

/// 按固定测试列表把测试视频复制到 `test/real` 与 `test/fake`
///
/// 类别由文件名长度决定：伪造视频名为 `0000_fake.mp4` 形式，长于真实视频名。
pub fn structure_uadfv_files(root: &Path, test_list: &Path) -> Result<usize, LayoutError> {
  let test_dir = root.join(UADFV_TEST_DIR);
  let real_dir = test_dir.join(UADFV_REAL_DIR);
  let fake_dir = test_dir.join(UADFV_FAKE_DIR);
  for dir in [&real_dir, &fake_dir] {
    std::fs::create_dir_all(dir).map_err(|e| LayoutError::io(dir, e))?;
  }

  let videos = read_uadfv_test_list(test_list)?;
  for video in &videos {
    let (source_dir, dest_dir) = if video.len() > UADFV_REAL_NAME_LEN {
      (UADFV_FAKE_DIR, &fake_dir)
    } else {
      (UADFV_REAL_DIR, &real_dir)
    };
    let source = root.join(source_dir).join(video);
    let dest = dest_dir.join(video);
    std::fs::copy(&source, &dest).map_err(|e| LayoutError::io(&source, e))?;
  }

  info!("已生成 {} 个测试视频: {}", videos.len(), test_dir.display());
  Ok(videos.len())
}

/// 校验 Celeb-DF 目录；数据集自带测试划分，不生成文件
pub fn setup_celebdf_benchmark(
  data_path: Option<&Path>,
  method: BenchmarkMethod,
) -> Result<(), LayoutError> {
  let root = data_path.ok_or(LayoutError::MissingCelebDfPath)?;
  if !root_name_is(root, CELEBDF_ROOT) {
    return Err(LayoutError::CelebDfLayout(root.to_path_buf()));
  }
  check_celebdf_entries(root)?;
  info!("在 Celeb-DF 数据集上测试 {}", method);
  Ok(())
}

/// 检查 Celeb-DF 原始目录与测试列表是否齐全
pub fn check_celebdf_entries(root: &Path) -> Result<(), LayoutError> {
  for dir in [CELEBDF_REAL_DIR, CELEBDF_FAKE_DIR, CELEBDF_YOUTUBE_DIR] {
    if !root.join(dir).is_dir() {
      return Err(LayoutError::MissingEntry {
        root: root.to_path_buf(),
        entry: dir,
      });
    }
  }
  if !root.join(CELEBDF_TEST_LIST).is_file() {
    return Err(LayoutError::MissingEntry {
      root: root.to_path_buf(),
      entry: CELEBDF_TEST_LIST,
    });
  }
  Ok(())
}
