// 该文件是 Zhenwei （甄伪） 项目的一部分。
// src/augment.rs - 数据增强流水线
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

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[cfg(feature = "augmentation")]
mod apply;

#[derive(Error, Debug)]
pub enum AugmentationError {
  #[error("增强选项 {0} 不存在，请选择 \"weak\" 或 \"strong\"")]
  UnknownStrength(String),
  #[cfg(feature = "augmentation")]
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AugmentationStrength {
  Weak,
  Strong,
}

impl FromStr for AugmentationStrength {
  type Err = AugmentationError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "weak" => Ok(AugmentationStrength::Weak),
      "strong" => Ok(AugmentationStrength::Strong),
      other => Err(AugmentationError::UnknownStrength(other.to_string())),
    }
  }
}

impl fmt::Display for AugmentationStrength {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      AugmentationStrength::Weak => f.write_str("weak"),
      AugmentationStrength::Strong => f.write_str("strong"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transform {
  HorizontalFlip,
  /// JPEG 重压缩，质量在 `[quality_lower, quality_upper]` 内均匀选取
  ImageCompression { quality_lower: u8, quality_upper: u8 },
  /// 方差在 `var_limit` 内均匀选取
  GaussNoise { var_limit: (f32, f32) },
  GaussianBlur { blur_limit: u32 },
  /// 以黑色常量边框填充至最小尺寸
  PadIfNeeded { min_height: u32, min_width: u32 },
  RandomBrightnessContrast { brightness_limit: f32, contrast_limit: f32 },
  /// 沿 RGB 主成分方向扰动颜色
  FancyPca { alpha: f32 },
  HueSaturationValue { hue_shift_limit: i32, sat_shift_limit: i32, val_shift_limit: i32 },
  ToGray,
  /// 平移比例、缩放比例、旋转角度（度）的上限
  ShiftScaleRotate { shift_limit: f32, scale_limit: f32, rotate_limit: f32 },
  Resize { width: u32, height: u32 },
  /// 按概率权重恰好选择其中一个
  OneOf { choices: Vec<Step> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
  pub transform: Transform,
  pub p: f64,
}

impl Step {
  pub fn new(transform: Transform, p: f64) -> Self {
    Self { transform, p }
  }

  pub fn always(transform: Transform) -> Self {
    Self::new(transform, 1.0)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentationPipeline {
  pub target_size: u32,
  pub strength: AugmentationStrength,
  pub steps: Vec<Step>,
}

impl AugmentationPipeline {
  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }
}

pub fn build_augmentations(
  target_size: u32,
  strength: AugmentationStrength,
) -> AugmentationPipeline {
  let resize = Step::always(Transform::Resize {
    width: target_size,
    height: target_size,
  });

  let steps = match strength {
    AugmentationStrength::Weak => {
      info!("弱数据增强");
      vec![Step::new(Transform::HorizontalFlip, 0.5), resize]
    }
    AugmentationStrength::Strong => {
      info!("强数据增强");
      vec![
        Step::new(Transform::HorizontalFlip, 0.5),
        Step::new(
          Transform::ImageCompression {
            quality_lower: 60,
            quality_upper: 100,
          },
          0.5,
        ),
        Step::new(
          Transform::GaussNoise {
            var_limit: (10.0, 50.0),
          },
          0.1,
        ),
        Step::new(Transform::GaussianBlur { blur_limit: 3 }, 0.05),
        Step::always(Transform::PadIfNeeded {
          min_height: target_size,
          min_width: target_size,
        }),
        Step::new(
          Transform::OneOf {
            choices: vec![
              Step::new(
                Transform::RandomBrightnessContrast {
                  brightness_limit: 0.2,
                  contrast_limit: 0.2,
                },
                0.5,
              ),
              Step::new(Transform::FancyPca { alpha: 0.1 }, 0.5),
              Step::new(
                Transform::HueSaturationValue {
                  hue_shift_limit: 20,
                  sat_shift_limit: 30,
                  val_shift_limit: 20,
                },
                0.5,
              ),
            ],
          },
          0.7,
        ),
        Step::new(Transform::ToGray, 0.2),
        Step::new(
          Transform::ShiftScaleRotate {
            shift_limit: 0.1,
            scale_limit: 0.2,
            rotate_limit: 10.0,
          },
          0.5,
        ),
        resize,
      ]
    }
  };

  AugmentationPipeline {
    target_size,
    strength,
    steps,
  }
}

/// 从字符串选择增强强度并构建
pub fn build_augmentations_named(
  target_size: u32,
  strength: &str,
) -> Result<AugmentationPipeline, AugmentationError> {
  Ok(build_augmentations(target_size, strength.parse()?))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn weak_is_flip_then_resize() {
    let pipeline = build_augmentations(299, AugmentationStrength::Weak);
    assert_eq!(
      pipeline.steps,
      vec![
        Step::new(Transform::HorizontalFlip, 0.5),
        Step::always(Transform::Resize {
          width: 299,
          height: 299
        }),
      ]
    );
  }

  #[test]
  fn strong_pipeline_steps() {
    let pipeline = build_augmentations(380, AugmentationStrength::Strong);
    let color = vec![
      Step::new(
        Transform::RandomBrightnessContrast {
          brightness_limit: 0.2,
          contrast_limit: 0.2,
        },
        0.5,
      ),
      Step::new(Transform::FancyPca { alpha: 0.1 }, 0.5),
      Step::new(
        Transform::HueSaturationValue {
          hue_shift_limit: 20,
          sat_shift_limit: 30,
          val_shift_limit: 20,
        },
        0.5,
      ),
    ];
    assert_eq!(
      pipeline.steps,
      vec![
        Step::new(Transform::HorizontalFlip, 0.5),
        Step::new(
          Transform::ImageCompression {
            quality_lower: 60,
            quality_upper: 100
          },
          0.5
        ),
        Step::new(
          Transform::GaussNoise {
            var_limit: (10.0, 50.0)
          },
          0.1
        ),
        Step::new(Transform::GaussianBlur { blur_limit: 3 }, 0.05),
        Step::always(Transform::PadIfNeeded {
          min_height: 380,
          min_width: 380
        }),
        Step::new(Transform::OneOf { choices: color }, 0.7),
        Step::new(Transform::ToGray, 0.2),
        Step::new(
          Transform::ShiftScaleRotate {
            shift_limit: 0.1,
            scale_limit: 0.2,
            rotate_limit: 10.0
          },
          0.5
        ),
        Step::always(Transform::Resize {
          width: 380,
          height: 380
        }),
      ]
    );
    assert_eq!(pipeline.target_size, 380);
    assert_eq!(pipeline.strength, AugmentationStrength::Strong);
  }

  #[test]
  fn unknown_strength_is_rejected() {
    let err = build_augmentations_named(299, "medium").unwrap_err();
    assert!(matches!(err, AugmentationError::UnknownStrength(ref s) if s == "medium"));
  }
}
