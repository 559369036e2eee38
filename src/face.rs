// 该文件是 Zhenwei （甄伪） 项目的一部分。
// src/face.rs - 人脸检测与裁剪
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  NUM_FRAMES,
  dataset::{CELEBDF_FACECROPS_DIR, DatasetKind, Label, LabeledDataset},
  layout::{LayoutError, check_celebdf_entries},
  model::BoxError,
};

/// 某一帧中检测到的人脸框，坐标为像素
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
  pub frame: usize,
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
  pub score: f32,
}

/// 外部人脸检测器
pub trait FaceDetector {
  type Faces: IntoIterator<Item = FaceBox>;
  type Error;

  /// 从视频中均匀抽取 `num_frames` 帧并检测人脸
  fn detect_faces(&self, video: &Path, num_frames: usize) -> Result<Self::Faces, Self::Error>;

  /// 按边距裁剪并统一尺寸后写入 `save_to`，返回写入的图像数
  ///
  /// 文件名以 `video_id` 开头，序列分组依赖这一约定。
  fn extract_frames(
    &self,
    faces: Self::Faces,
    video_id: &str,
    save_to: &Path,
    face_margin: f32,
    num_frames: usize,
    test: bool,
  ) -> Result<usize, Self::Error>;
}

#[derive(Error, Debug)]
pub enum FaceExtractionError {
  #[error("人脸边距 {0} 必须在 [0, 1) 内")]
  InvalidMargin(f32),
  #[error("视频 {0} 缺少标识")]
  MissingVideoId(PathBuf),
  #[error("创建目录 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error(transparent)]
  Layout(#[from] LayoutError),
  #[error("处理视频 {video} 失败: {source}")]
  Detector {
    video: PathBuf,
    #[source]
    source: BoxError,
  },
}

impl FaceExtractionError {
  fn io(path: &Path, source: std::io::Error) -> Self {
    FaceExtractionError::Io {
      path: path.to_path_buf(),
      source,
    }
  }
}

/// 人脸提取结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
  pub videos: usize,
  pub images: usize,
}

pub fn validate_margin(face_margin: f32) -> Result<f32, FaceExtractionError> {
  if (0.0..1.0).contains(&face_margin) {
    Ok(face_margin)
  } else {
    Err(FaceExtractionError::InvalidMargin(face_margin))
  }
}

/// 准备人脸图像输出目录，返回真实/伪造目录
///
/// UADFV 的 `train_imgs/` 按需创建；Celeb-DF 先核对原始目录，再重建 `facecrops/`。
pub fn prepare_face_dirs(
  dataset: DatasetKind,
  img_save_path: &Path,
) -> Result<(PathBuf, PathBuf), FaceExtractionError> {
  let (real_dir, fake_dir) = dataset.face_crop_dirs(img_save_path);

  if dataset == DatasetKind::CelebDf {
    check_celebdf_entries(img_save_path)?;
    let facecrops = img_save_path.join(CELEBDF_FACECROPS_DIR);
    if facecrops.exists() {
      warn!("删除旧的人脸图像: {}", facecrops.display());
      std::fs::remove_dir_all(&facecrops).map_err(|e| FaceExtractionError::io(&facecrops, e))?;
    }
  }

  for dir in [&real_dir, &fake_dir] {
    std::fs::create_dir_all(dir).map_err(|e| FaceExtractionError::io(dir, e))?;
  }
  Ok((real_dir, fake_dir))
}

/// 对每个视频检测人脸并保存 [`NUM_FRAMES`] 张裁剪图像
pub fn extract_faces<D>(
  detector: &D,
  videos: &LabeledDataset,
  img_save_path: &Path,
  face_margin: f32,
) -> Result<ExtractionSummary, FaceExtractionError>
where
  D: FaceDetector,
  D::Error: std::error::Error + Send + Sync + 'static,
{
  let face_margin = validate_margin(face_margin)?;
  let (real_dir, fake_dir) = prepare_face_dirs(videos.dataset, img_save_path)?;

  info!("每个视频检测并保存 {} 张人脸用于训练", NUM_FRAMES);
  if face_margin > 0.0 {
    info!("人脸框每侧外扩 {:.1}%", face_margin * 100.0);
  } else {
    info!("人脸框不外扩");
  }

  let now = std::time::Instant::now();
  let mut summary = ExtractionSummary::default();
  for record in &videos.records {
    let video_id = record
      .grouping_key
      .as_deref()
      .or_else(|| record.file_name())
      .ok_or_else(|| FaceExtractionError::MissingVideoId(record.path.clone()))?;
    let save_to = match record.label {
      Label::Real => &real_dir,
      Label::Fake => &fake_dir,
    };

    let wrap = |e: D::Error| FaceExtractionError::Detector {
      video: record.path.clone(),
      source: Box::new(e),
    };
    let faces = detector.detect_faces(&record.path, NUM_FRAMES).map_err(wrap)?;
    let images = detector
      .extract_frames(faces, video_id, save_to, face_margin, NUM_FRAMES, false)
      .map_err(wrap)?;
    if images < NUM_FRAMES {
      debug!("{} 仅保存了 {} 张人脸", video_id, images);
    }

    summary.videos += 1;
    summary.images += images;
  }

  info!(
    "人脸提取完成: {} 个视频, {} 张图像, 耗时 {:.2?}",
    summary.videos,
    summary.images,
    now.elapsed()
  );
  Ok(summary)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::dataset::{Content, VideoRecord};
  use std::{cell::RefCell, convert::Infallible};

  /// 每个视频写出固定数量的空白帧文件
  #[derive(Default)]
  struct FakeDetector {
    calls: RefCell<Vec<(String, PathBuf, f32)>>,
  }

  impl FaceDetector for FakeDetector {
    type Faces = Vec<FaceBox>;
    type Error = Infallible;

    fn detect_faces(&self, _video: &Path, num_frames: usize) -> Result<Self::Faces, Self::Error> {
      Ok(
        (0..num_frames)
          .map(|frame| FaceBox {
            frame,
            x1: 0.0,
            y1: 0.0,
            x2: 10.0,
            y2: 10.0,
            score: 0.99,
          })
          .collect(),
      )
    }

    fn extract_frames(
      &self,
      faces: Self::Faces,
      video_id: &str,
      save_to: &Path,
      face_margin: f32,
      _num_frames: usize,
      _test: bool,
    ) -> Result<usize, Self::Error> {
      let mut count = 0;
      for face in faces {
        std::fs::write(save_to.join(format!("{}_{}.jpg", video_id, face.frame)), b"").unwrap();
        count += 1;
      }
      self
        .calls
        .borrow_mut()
        .push((video_id.to_string(), save_to.to_path_buf(), face_margin));
      Ok(count)
    }
  }

  fn videos(dataset: DatasetKind) -> LabeledDataset {
    LabeledDataset::new(
      dataset,
      Content::Videos,
      false,
      vec![
        VideoRecord::new("raw/real/0001.mp4".into(), Label::Real).with_grouping_key("0001.mp4"),
        VideoRecord::new("raw/fake/0001_fake.mp4".into(), Label::Fake),
      ],
    )
  }

  #[test]
  fn margin_must_be_below_one() {
    assert!(validate_margin(0.0).is_ok());
    assert!(validate_margin(0.3).is_ok());
    for bad in [1.0, -0.1, f32::NAN] {
      assert!(matches!(
        validate_margin(bad),
        Err(FaceExtractionError::InvalidMargin(_))
      ));
    }
  }

  #[test]
  fn uadfv_frames_land_in_class_dirs() {
    let tmp = tempfile::tempdir().unwrap();
    let detector = FakeDetector::default();
    let summary = extract_faces(&detector, &videos(DatasetKind::Uadfv), tmp.path(), 0.2).unwrap();

    assert_eq!(
      summary,
      ExtractionSummary {
        videos: 2,
        images: 2 * NUM_FRAMES
      }
    );
    let calls = detector.calls.borrow();
    assert_eq!(calls[0].0, "0001.mp4");
    assert_eq!(calls[0].1, tmp.path().join("train_imgs/real"));
    // 无分组键时使用文件名
    assert_eq!(calls[1].0, "0001_fake.mp4");
    assert_eq!(calls[1].1, tmp.path().join("train_imgs/fake"));
    assert_eq!(calls[1].2, 0.2);
  }

  #[test]
  fn celebdf_facecrops_are_recreated() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path();
    for dir in ["Celeb-real", "Celeb-synthesis", "YouTube-real", "facecrops/real"] {
      std::fs::create_dir_all(root.join(dir)).unwrap();
    }
    std::fs::write(root.join("List_of_testing_videos.txt"), "").unwrap();
    let stale = root.join("facecrops/real/old.jpg");
    std::fs::write(&stale, b"").unwrap();

    let (real, fake) = prepare_face_dirs(DatasetKind::CelebDf, root).unwrap();
    assert!(!stale.exists());
    assert!(real.is_dir() && fake.is_dir());
  }

  #[test]
  fn celebdf_requires_raw_dataset() {
    let tmp = tempfile::tempdir().unwrap();
    let err = prepare_face_dirs(DatasetKind::CelebDf, tmp.path()).unwrap_err();
    assert!(matches!(
      err,
      FaceExtractionError::Layout(LayoutError::MissingEntry { .. })
    ));
  }
}
