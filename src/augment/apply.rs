// 该文件是 Zhenwei （甄伪） 项目的一部分。
// src/augment/apply.rs - 图像增强变换实现
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

use std::f32::consts::PI;

use image::{
  DynamicImage, ImageFormat, Rgb, RgbImage,
  codecs::jpeg::JpegEncoder,
  imageops::{self, FilterType},
};
use imageproc::geometric_transformations::{Interpolation, Projection, warp};
use rand::Rng;
use tracing::debug;

use super::{AugmentationError, AugmentationPipeline, Step, Transform};

// ImageNet RGB 协方差的特征值与特征向量（列）
const PCA_EIGVAL: [f32; 3] = [0.2175, 0.0188, 0.0045];
const PCA_EIGVEC: [[f32; 3]; 3] = [
  [-0.5675, 0.7192, 0.4009],
  [-0.5808, -0.0045, -0.8140],
  [-0.5836, -0.6948, 0.4203],
];

impl AugmentationPipeline {
  pub fn apply<R: Rng + ?Sized>(
    &self,
    image: &RgbImage,
    rng: &mut R,
  ) -> Result<RgbImage, AugmentationError> {
    let mut current = image.clone();
    for step in &self.steps {
      if let Some(next) = step.maybe_apply(&current, rng)? {
        current = next;
      }
    }
    Ok(current)
  }
}

impl Step {
  fn maybe_apply<R: Rng + ?Sized>(
    &self,
    image: &RgbImage,
    rng: &mut R,
  ) -> Result<Option<RgbImage>, AugmentationError> {
    if !rng.random_bool(self.p.clamp(0.0, 1.0)) {
      return Ok(None);
    }
    self.transform.apply(image, rng).map(Some)
  }
}

impl Transform {
  pub fn apply<R: Rng + ?Sized>(
    &self,
    image: &RgbImage,
    rng: &mut R,
  ) -> Result<RgbImage, AugmentationError> {
    let output = match *self {
      Transform::HorizontalFlip => imageops::flip_horizontal(image),
      Transform::ImageCompression {
        quality_lower,
        quality_upper,
      } => {
        let quality = rng.random_range(
          quality_lower.min(quality_upper)..=quality_upper.max(quality_lower),
        );
        debug!("JPEG 压缩质量 {}", quality);
        recompress(image, quality)?
      }
      Transform::GaussNoise { var_limit } => {
        let var = uniform(rng, var_limit.0, var_limit.1);
        let sigma = var.sqrt();
        let mut noisy = image.clone();
        for pixel in noisy.pixels_mut() {
          for channel in pixel.0.iter_mut() {
            *channel = to_u8(*channel as f32 + sigma * standard_normal(rng));
          }
        }
        noisy
      }
      Transform::GaussianBlur { blur_limit } => {
        let ksize = blur_limit.max(3) | 1;
        let sigma = 0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8;
        imageproc::filter::gaussian_blur_f32(image, sigma)
      }
      Transform::PadIfNeeded {
        min_height,
        min_width,
      } => pad(image, min_width, min_height),
      Transform::RandomBrightnessContrast {
        brightness_limit,
        contrast_limit,
      } => {
        let alpha = 1.0 + uniform(rng, -contrast_limit, contrast_limit);
        let beta = uniform(rng, -brightness_limit, brightness_limit) * 255.0;
        map_channels(image, |c, _| c * alpha + beta)
      }
      Transform::FancyPca { alpha } => {
        let weights: [f32; 3] =
          std::array::from_fn(|i| alpha * standard_normal(rng) * PCA_EIGVAL[i]);
        let delta: [f32; 3] = std::array::from_fn(|c| {
          (0..3).map(|i| PCA_EIGVEC[c][i] * weights[i]).sum::<f32>() * 255.0
        });
        map_channels(image, |c, index| c + delta[index])
      }
      Transform::HueSaturationValue {
        hue_shift_limit,
        sat_shift_limit,
        val_shift_limit,
      } => {
        // 偏移量沿用 OpenCV 8 位 HSV 的单位：色相 0..180，饱和度与明度 0..255
        let hue = rng.random_range(-hue_shift_limit..=hue_shift_limit);
        let sat = rng.random_range(-sat_shift_limit..=sat_shift_limit) as f32 / 255.0;
        let val = rng.random_range(-val_shift_limit..=val_shift_limit) as f32 / 255.0;
        let rotated = imageops::huerotate(image, hue * 2);
        shift_saturation_value(&rotated, sat, val)
      }
      Transform::ToGray => DynamicImage::ImageLuma8(imageops::grayscale(image)).to_rgb8(),
      Transform::ShiftScaleRotate {
        shift_limit,
        scale_limit,
        rotate_limit,
      } => {
        let (w, h) = (image.width() as f32, image.height() as f32);
        let angle = uniform(rng, -rotate_limit, rotate_limit) * PI / 180.0;
        let scale = 1.0 + uniform(rng, -scale_limit, scale_limit);
        let dx = uniform(rng, -shift_limit, shift_limit) * w;
        let dy = uniform(rng, -shift_limit, shift_limit) * h;
        let projection = Projection::translate(w / 2.0 + dx, h / 2.0 + dy)
          * Projection::rotate(angle)
          * Projection::scale(scale, scale)
          * Projection::translate(-w / 2.0, -h / 2.0);
        warp(image, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]))
      }
      Transform::Resize { width, height } => {
        imageops::resize(image, width, height, FilterType::Triangle)
      }
      Transform::OneOf { ref choices } => match pick(choices, rng) {
        Some(step) => step.transform.apply(image, rng)?,
        None => image.clone(),
      },
    };
    Ok(output)
  }
}

/// 按各自概率加权选出一个变换
fn pick<'a, R: Rng + ?Sized>(choices: &'a [Step], rng: &mut R) -> Option<&'a Step> {
  let total: f64 = choices.iter().map(|s| s.p.max(0.0)).sum();
  if total <= 0.0 {
    return None;
  }
  let mut target = rng.random::<f64>() * total;
  for step in choices {
    target -= step.p.max(0.0);
    if target < 0.0 {
      return Some(step);
    }
  }
  choices.last()
}

fn uniform<R: Rng + ?Sized>(rng: &mut R, low: f32, high: f32) -> f32 {
  low + (high - low) * rng.random::<f32>()
}

fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f32 {
  let u1 = rng.random::<f32>().max(f32::MIN_POSITIVE);
  let u2 = rng.random::<f32>();
  (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

fn to_u8(value: f32) -> u8 {
  value.round().clamp(0.0, 255.0) as u8
}

fn map_channels(image: &RgbImage, f: impl Fn(f32, usize) -> f32) -> RgbImage {
  let mut output = image.clone();
  for pixel in output.pixels_mut() {
    for (index, channel) in pixel.0.iter_mut().enumerate() {
      *channel = to_u8(f(*channel as f32, index));
    }
  }
  output
}

fn recompress(image: &RgbImage, quality: u8) -> Result<RgbImage, AugmentationError> {
  let mut buffer = Vec::new();
  JpegEncoder::new_with_quality(&mut buffer, quality).encode_image(image)?;
  Ok(image::load_from_memory_with_format(&buffer, ImageFormat::Jpeg)?.to_rgb8())
}

fn pad(image: &RgbImage, min_width: u32, min_height: u32) -> RgbImage {
  let (w, h) = image.dimensions();
  if w >= min_width && h >= min_height {
    return image.clone();
  }
  let (width, height) = (w.max(min_width), h.max(min_height));
  let mut canvas = RgbImage::new(width, height);
  imageops::replace(
    &mut canvas,
    image,
    ((width - w) / 2) as i64,
    ((height - h) / 2) as i64,
  );
  canvas
}

/// 在 HSV 空间平移饱和度与明度，色相保持不变
fn shift_saturation_value(image: &RgbImage, sat: f32, val: f32) -> RgbImage {
  let mut output = image.clone();
  for pixel in output.pixels_mut() {
    let rgb = pixel.0.map(|c| c as f32 / 255.0);
    let max = rgb.iter().copied().fold(0.0f32, f32::max);
    let min = rgb.iter().copied().fold(1.0f32, f32::min);
    let s = if max > 0.0 { (max - min) / max } else { 0.0 };
    let s_new = (s + sat).clamp(0.0, 1.0);
    let v_new = (max + val).clamp(0.0, 1.0);

    pixel.0 = rgb.map(|c| {
      let k = if max > min { (max - c) / (max - min) } else { 0.0 };
      to_u8(v_new * (1.0 - s_new * k) * 255.0)
    });
  }
  output
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::augment::{AugmentationStrength, build_augmentations};
  use rand::{SeedableRng, rngs::StdRng};

  fn gradient(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
      Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, ((x + y) % 256) as u8])
    })
  }

  #[test]
  fn pipelines_produce_target_size() {
    let image = gradient(120, 90);
    let mut rng = StdRng::seed_from_u64(24);
    for strength in [AugmentationStrength::Weak, AugmentationStrength::Strong] {
      let pipeline = build_augmentations(64, strength);
      for _ in 0..8 {
        let out = pipeline.apply(&image, &mut rng).unwrap();
        assert_eq!(out.dimensions(), (64, 64));
      }
    }
  }

  #[test]
  fn same_seed_same_output() {
    let image = gradient(80, 80);
    let pipeline = build_augmentations(48, AugmentationStrength::Strong);
    let a = pipeline.apply(&image, &mut StdRng::seed_from_u64(7)).unwrap();
    let b = pipeline.apply(&image, &mut StdRng::seed_from_u64(7)).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn flip_mirrors_columns() {
    let image = gradient(4, 2);
    let mut rng = StdRng::seed_from_u64(0);
    let out = Transform::HorizontalFlip.apply(&image, &mut rng).unwrap();
    assert_eq!(out.get_pixel(0, 1), image.get_pixel(3, 1));
  }

  #[test]
  fn pad_centres_image_on_black() {
    let image = RgbImage::from_pixel(2, 2, Rgb([200, 200, 200]));
    let out = pad(&image, 4, 6);
    assert_eq!(out.dimensions(), (4, 6));
    assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 0]));
    assert_eq!(out.get_pixel(1, 2), &Rgb([200, 200, 200]));
  }

  #[test]
  fn to_gray_equalises_channels() {
    let mut rng = StdRng::seed_from_u64(0);
    let out = Transform::ToGray.apply(&gradient(10, 10), &mut rng).unwrap();
    assert!(out.pixels().all(|p| p[0] == p[1] && p[1] == p[2]));
  }

  #[test]
  fn zero_shift_keeps_colours() {
    let image = gradient(6, 6);
    assert_eq!(shift_saturation_value(&image, 0.0, 0.0), image);
  }

  #[test]
  fn one_of_skips_zero_weight_choices() {
    let choices = vec![
      Step::new(Transform::ToGray, 0.0),
      Step::new(Transform::HorizontalFlip, 1.0),
    ];
    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..16 {
      assert_eq!(pick(&choices, &mut rng), Some(&choices[1]));
    }
  }
}
