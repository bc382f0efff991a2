// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// BlazePose 关键点模型 (pose_landmark_{lite,full,heavy}.onnx)
// 包含: ROI 旋转裁剪、推理、关键点解码、热图细化与投影回原图

use std::path::Path;

use anyhow::{bail, Context, Result};
use image::RgbImage;
use ndarray::{Array, ArrayView3, Axis, Ix4, IxDyn};

use super::{sigmoid, to_nhwc, Model};
use crate::utils::affine_transform::{warp_affine_rgb, AffineMatrix};
use crate::{Landmark, OrtBackend, OrtConfig, PoseLandmarks, Roi, NUM_LANDMARKS};

/// 模型实际输出的关键点数 (33 个人体点 + 6 个辅助点)
const RAW_LANDMARKS: usize = 39;
/// 每个关键点: x, y, z, visibility, presence
const LANDMARK_STEP: usize = 5;
/// 热图细化窗口边长
const REFINE_KERNEL: usize = 7;
/// 窗口内最大置信度低于该值时不细化
const REFINE_MIN_CONFIDENCE: f32 = 0.5;

/// 裁剪后的 ROI 图像, 连同 ROI 本身用于坐标还原
pub struct RoiCrop {
    pub image: RgbImage,
    pub roi: Roi,
}

/// 原图像素 → ROI 张量像素
///
/// ROI 中心平移到原点, 反向旋转, 缩放到 `size`, 再平移到张量中心
pub fn roi_matrix(roi: &Roi, width: u32, height: u32, size: (u32, u32)) -> AffineMatrix {
    let (w, h) = (width as f32, height as f32);
    let (dw, dh) = (size.0 as f32, size.1 as f32);
    AffineMatrix::translation(dw / 2.0, dh / 2.0)
        .compose(&AffineMatrix::scale(dw / (roi.width * w), dh / (roi.height * h)))
        .compose(&AffineMatrix::rotation(-roi.rotation))
        .compose(&AffineMatrix::translation(-roi.x_center * w, -roi.y_center * h))
}

/// ROI 内归一化关键点 → 原图归一化关键点
pub fn project_landmark(lm: Landmark, roi: &Roi) -> Landmark {
    let (x, y) = (lm.x - 0.5, lm.y - 0.5);
    let (sin_r, cos_r) = roi.rotation.sin_cos();
    let rx = cos_r * x - sin_r * y;
    let ry = sin_r * x + cos_r * y;
    Landmark {
        x: rx * roi.width + roi.x_center,
        y: ry * roi.height + roi.y_center,
        z: lm.z * roi.width,
        ..lm
    }
}

/// 原始关键点张量 `[1, 195]` → ROI 内归一化的全部 39 个关键点
pub fn decode_landmarks(raw: &Array<f32, IxDyn>, input_size: (u32, u32)) -> Result<Vec<Landmark>> {
    if raw.len() < RAW_LANDMARKS * LANDMARK_STEP {
        bail!("unexpected landmark tensor shape {:?}", raw.shape());
    }
    let values: Vec<f32> = raw.iter().copied().collect();
    let (sx, sy) = (input_size.0 as f32, input_size.1 as f32);

    Ok(values
        .chunks_exact(LANDMARK_STEP)
        .take(RAW_LANDMARKS)
        .map(|v| Landmark {
            x: v[0] / sx,
            y: v[1] / sy,
            z: v[2] / sx,
            visibility: sigmoid(v[3]),
            presence: sigmoid(v[4]),
        })
        .collect())
}

/// 按元素个数找出关键点张量 (195) 和人体存在标志 (1), 与输出顺序无关
pub fn select_landmark_outputs(ys: &[Array<f32, IxDyn>]) -> Result<(&Array<f32, IxDyn>, f32)> {
    let raw = ys
        .iter()
        .find(|y| y.len() == RAW_LANDMARKS * LANDMARK_STEP)
        .context("landmark output [1, 195] not found")?;
    let flag = ys
        .iter()
        .find(|y| y.len() == 1)
        .and_then(|y| y.iter().next().copied())
        .context("pose presence output [1, 1] not found")?;
    Ok((raw, flag))
}

/// 找出热图输出, 统一为 `[H, W, channels]` 视图
///
/// 接受 `[1, H, W, C]` 和 `[1, C, H, W]` 两种布局; 没有热图时返回 `None`
pub fn select_heatmap(ys: &[Array<f32, IxDyn>], channels: usize) -> Option<ArrayView3<'_, f32>> {
    ys.iter().find_map(|y| {
        let y = y.view().into_dimensionality::<Ix4>().ok()?;
        if y.shape()[0] != 1 {
            return None;
        }
        let y = y.index_axis_move(Axis(0), 0);
        if y.shape()[2] == channels {
            Some(y)
        } else if y.shape()[0] == channels {
            Some(y.permuted_axes([1, 2, 0]))
        } else {
            None
        }
    })
}

/// 用热图细化 x, y
///
/// 以关键点所在热图格为中心取 7x7 窗口, 按 sigmoid 置信度加权求质心;
/// 窗口内最大置信度不足 0.5 或关键点落在热图外时保持原值
pub fn refine_from_heatmap(landmarks: &mut [Landmark], heatmap: ArrayView3<f32>) {
    let (hm_h, hm_w, channels) = heatmap.dim();
    let offset = (REFINE_KERNEL - 1) / 2;

    for (ch, lm) in landmarks.iter_mut().enumerate().take(channels) {
        // 向零截断
        let col = (lm.x * hm_w as f32) as i64;
        let row = (lm.y * hm_h as f32) as i64;
        if col < 0 || row < 0 || col >= hm_w as i64 || row >= hm_h as i64 {
            continue;
        }
        let (col, row) = (col as usize, row as usize);

        let (mut sum, mut max_conf) = (0.0f32, 0.0f32);
        let (mut weighted_col, mut weighted_row) = (0.0f32, 0.0f32);
        for r in row.saturating_sub(offset)..(row + offset + 1).min(hm_h) {
            for c in col.saturating_sub(offset)..(col + offset + 1).min(hm_w) {
                let conf = sigmoid(heatmap[[r, c, ch]]);
                sum += conf;
                max_conf = max_conf.max(conf);
                weighted_col += c as f32 * conf;
                weighted_row += r as f32 * conf;
            }
        }

        if max_conf >= REFINE_MIN_CONFIDENCE && sum > 0.0 {
            lm.x = weighted_col / hm_w as f32 / sum;
            lm.y = weighted_row / hm_h as f32 / sum;
        }
    }
}

/// 模型输出 → 原图归一化的 33 个关键点; 存在标志低于 `min_presence` 时为 `None`
pub fn landmarks_from_outputs(
    ys: &[Array<f32, IxDyn>],
    roi: &Roi,
    input_size: (u32, u32),
    min_presence: f32,
) -> Result<Option<PoseLandmarks>> {
    let (raw, flag) = select_landmark_outputs(ys)?;
    if flag < min_presence {
        tracing::debug!("ROI 内未检测到人体 (presence {:.3})", flag);
        return Ok(None);
    }

    let mut landmarks = decode_landmarks(raw, input_size)?;
    match select_heatmap(ys, RAW_LANDMARKS) {
        Some(heatmap) => refine_from_heatmap(&mut landmarks, heatmap),
        None => tracing::debug!("模型没有热图输出, 跳过细化"),
    }

    Ok(Some(PoseLandmarks::new(
        landmarks
            .into_iter()
            .take(NUM_LANDMARKS)
            .map(|lm| project_landmark(lm, roi))
            .collect(),
    )))
}

/// BlazePose 关键点模型
pub struct PoseLandmarker {
    engine: OrtBackend,
    min_presence: f32,
}

impl PoseLandmarker {
    #[tracing::instrument(name = "Initialize pose landmarker", skip(path), fields(model = %path.display()), err)]
    pub fn new(path: &Path, intra_threads: usize, min_presence: f32) -> Result<Self> {
        let engine = OrtBackend::build(OrtConfig {
            f: path.to_path_buf(),
            intra_threads,
            image_size: (256, 256),
        })?;
        Ok(Self {
            engine,
            min_presence,
        })
    }

    /// 按 ROI 从原图旋转裁剪出模型输入
    pub fn crop(&self, image: &RgbImage, roi: Roi) -> Result<RoiCrop> {
        let matrix = roi_matrix(&roi, image.width(), image.height(), self.size());
        let crop = warp_affine_rgb(image, &matrix, self.size(), [0, 0, 0])
            .with_context(|| format!("degenerate ROI {roi:?}"))?;
        Ok(RoiCrop { image: crop, roi })
    }

    /// 裁剪 → 推理 → 投影; 模型认为 ROI 内没有人体时返回 `None`
    pub fn landmarks(&mut self, image: &RgbImage, roi: Roi) -> Result<Option<PoseLandmarks>> {
        let crop = self.crop(image, roi)?;
        self.forward(&crop)
    }

    fn size(&self) -> (u32, u32) {
        (self.engine.width(), self.engine.height())
    }
}

impl Model for PoseLandmarker {
    type Input = RoiCrop;
    type Output = Option<PoseLandmarks>;

    fn preprocess(&self, crop: &RoiCrop) -> Result<Array<f32, IxDyn>> {
        // [0, 255] → [0, 1]
        Ok(to_nhwc(&crop.image, 1.0 / 255.0, 0.0))
    }

    fn postprocess(&self, ys: Vec<Array<f32, IxDyn>>, crop: &RoiCrop) -> Result<Option<PoseLandmarks>> {
        landmarks_from_outputs(&ys, &crop.roi, self.size(), self.min_presence)
    }

    fn engine_mut(&mut self) -> &mut OrtBackend {
        &mut self.engine
    }

    fn summary(&self) {
        tracing::debug!(
            "\nSummary:\n> Model: {}\n> Layout: {:?}, Height: {}, Width: {}\n> Outputs: {:?}, min presence: {}",
            self.engine.name(),
            self.engine.layout(),
            self.engine.height(),
            self.engine.width(),
            self.engine.output_names(),
            self.min_presence,
        );
    }
}
