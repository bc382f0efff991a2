// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// BlazePose 人体检测器 (pose_detection.onnx)
// 包含: 锚框生成、letterbox 预处理、解码、加权NMS、检测框 → ROI

use std::f32::consts::{FRAC_PI_2, PI};
use std::path::Path;

use anyhow::{bail, Context, Result};
use image::RgbImage;
use ndarray::{Array, IxDyn};

use super::{sigmoid, to_nhwc, Model};
use crate::utils::affine_transform::{warp_affine_rgb, AffineMatrix};
use crate::{
    weighted_non_max_suppression, Bbox, Detection, OrtBackend, OrtConfig, Point2, Roi,
};

/// 各特征层步长, 相同步长的相邻层共享同一网格
const STRIDES: [u32; 5] = [8, 16, 32, 32, 32];
/// 每层每个网格点的锚框数 (宽高比 1.0 + 插值尺度)
const ANCHORS_PER_LAYER: usize = 2;
const NUM_KEYPOINTS: usize = 4;
/// 框 (4) + 关键点 (4 x 2)
const BOX_VALUES: usize = 4 + NUM_KEYPOINTS * 2;
const SCORE_CLIP: f32 = 100.0;
const NMS_IOU: f32 = 0.3;
/// ROI 放大系数
const ROI_SCALE: f32 = 1.25;

/// letterbox 参数 (目标张量像素)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub size: (u32, u32),
}

impl Letterbox {
    /// 保持宽高比缩放到 `size` 并居中
    pub fn fit(width: u32, height: u32, size: (u32, u32)) -> Self {
        let (w1, h1) = (size.0 as f32, size.1 as f32);
        let scale = (w1 / width as f32).min(h1 / height as f32);
        Self {
            scale,
            pad_x: (w1 - width as f32 * scale) / 2.0,
            pad_y: (h1 - height as f32 * scale) / 2.0,
            size,
        }
    }

    /// 源图像像素 → 张量像素
    pub fn matrix(&self) -> AffineMatrix {
        AffineMatrix::translation(self.pad_x, self.pad_y)
            .compose(&AffineMatrix::scale(self.scale, self.scale))
    }

    /// 张量归一化坐标 → 图像归一化坐标
    pub fn remove(&self, p: Point2) -> Point2 {
        let (l, t) = (self.pad_x / self.size.0 as f32, self.pad_y / self.size.1 as f32);
        Point2::new((p.x - l) / (1.0 - 2.0 * l), (p.y - t) / (1.0 - 2.0 * t))
    }

    fn remove_detection(&self, d: &Detection) -> Detection {
        let tl = self.remove(Point2::new(d.bbox.xmin(), d.bbox.ymin()));
        let br = self.remove(Point2::new(d.bbox.xmax(), d.bbox.ymax()));
        Detection {
            bbox: Bbox::new(tl.x, tl.y, br.x - tl.x, br.y - tl.y, d.score()),
            keypoints: d.keypoints.iter().map(|&p| self.remove(p)).collect(),
        }
    }
}

/// SSD 锚框中心 (归一化), 固定锚框尺寸所以只保留中心
pub fn generate_anchors(width: u32, height: u32) -> Vec<Point2> {
    let mut anchors = Vec::new();
    let mut layer = 0;
    while layer < STRIDES.len() {
        let stride = STRIDES[layer];
        let mut per_cell = 0;
        while layer < STRIDES.len() && STRIDES[layer] == stride {
            per_cell += ANCHORS_PER_LAYER;
            layer += 1;
        }

        let fw = width.div_ceil(stride) as usize;
        let fh = height.div_ceil(stride) as usize;
        for y in 0..fh {
            for x in 0..fw {
                let center = Point2::new(
                    (x as f32 + 0.5) / fw as f32,
                    (y as f32 + 0.5) / fh as f32,
                );
                anchors.extend(std::iter::repeat(center).take(per_cell));
            }
        }
    }
    anchors
}

/// 原始输出 → 候选检测 (张量归一化坐标)
///
/// `boxes`: `[1, N, 12]`, `scores`: `[1, N, 1]`
pub fn decode_detections(
    boxes: &Array<f32, IxDyn>,
    scores: &Array<f32, IxDyn>,
    anchors: &[Point2],
    input_size: (u32, u32),
    min_score: f32,
) -> Result<Vec<Detection>> {
    let n = anchors.len();
    if boxes.shape() != [1, n, BOX_VALUES] || scores.len() != n {
        bail!(
            "unexpected detector output shapes: boxes {:?}, scores {:?}, anchors {}",
            boxes.shape(),
            scores.shape(),
            n
        );
    }

    let (sx, sy) = (input_size.0 as f32, input_size.1 as f32);
    let mut ys = Vec::new();
    for (i, (anchor, &raw_score)) in anchors.iter().zip(scores.iter()).enumerate() {
        let score = sigmoid(raw_score.clamp(-SCORE_CLIP, SCORE_CLIP));
        if score < min_score {
            continue;
        }

        let cx = boxes[[0, i, 0]] / sx + anchor.x;
        let cy = boxes[[0, i, 1]] / sy + anchor.y;
        let w = boxes[[0, i, 2]] / sx;
        let h = boxes[[0, i, 3]] / sy;
        let keypoints = (0..NUM_KEYPOINTS)
            .map(|k| {
                Point2::new(
                    boxes[[0, i, 4 + 2 * k]] / sx + anchor.x,
                    boxes[[0, i, 5 + 2 * k]] / sy + anchor.y,
                )
            })
            .collect();

        ys.push(Detection {
            bbox: Bbox::new(cx - w / 2.0, cy - h / 2.0, w, h, score),
            keypoints,
        });
    }
    Ok(ys)
}

/// 模型输出 → 图像归一化坐标下的检测结果 (按分数降序)
///
/// 按末维找出框回归 (12) 和分数 (1), 与输出顺序无关;
/// 解码 → 加权NMS → 去除 letterbox
pub fn detections_from_outputs(
    ys: &[Array<f32, IxDyn>],
    anchors: &[Point2],
    min_score: f32,
    iou: f32,
    letterbox: &Letterbox,
) -> Result<Vec<Detection>> {
    let boxes = ys
        .iter()
        .find(|y| y.shape().last() == Some(&BOX_VALUES))
        .context("detector output with box regressors not found")?;
    let scores = ys
        .iter()
        .find(|y| y.shape().last() == Some(&1))
        .context("detector output with scores not found")?;

    let candidates = decode_detections(boxes, scores, anchors, letterbox.size, min_score)?;
    Ok(weighted_non_max_suppression(candidates, iou)
        .iter()
        .map(|d| letterbox.remove_detection(d))
        .collect())
}

/// 角度归一化到 [-π, π)
pub fn normalize_radians(angle: f32) -> f32 {
    angle - 2.0 * PI * ((angle + PI) / (2.0 * PI)).floor()
}

/// 检测结果 → 关键点模型 ROI
///
/// 关键点 0 为中心, 到关键点 1 距离的两倍为边长, 旋转使 0→1 指向正上方;
/// 再按长边取正方形并放大 1.25 倍
pub fn detection_to_roi(detection: &Detection, width: u32, height: u32) -> Option<Roi> {
    let (p0, p1) = (detection.keypoints.first()?, detection.keypoints.get(1)?);
    let (w, h) = (width as f32, height as f32);

    let (x0, y0) = (p0.x * w, p0.y * h);
    let (x1, y1) = (p1.x * w, p1.y * h);
    let side = 2.0 * ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt();
    let rotation = normalize_radians(FRAC_PI_2 - (-(y1 - y0)).atan2(x1 - x0));

    let long = side * ROI_SCALE;
    Some(Roi {
        x_center: x0 / w,
        y_center: y0 / h,
        width: long / w,
        height: long / h,
        rotation,
    })
}

/// BlazePose 检测器
pub struct PoseDetector {
    engine: OrtBackend,
    anchors: Vec<Point2>,
    min_score: f32,
    iou: f32,
}

impl PoseDetector {
    #[tracing::instrument(name = "Initialize pose detector", skip(path), fields(model = %path.display()), err)]
    pub fn new(path: &Path, intra_threads: usize, min_score: f32) -> Result<Self> {
        let engine = OrtBackend::build(OrtConfig {
            f: path.to_path_buf(),
            intra_threads,
            image_size: (224, 224),
        })?;
        let anchors = generate_anchors(engine.width(), engine.height());

        Ok(Self {
            engine,
            anchors,
            min_score,
            iou: NMS_IOU,
        })
    }

    /// 检测 → ROI (只取最高分的人体)
    pub fn detect_roi(&mut self, image: &RgbImage) -> Result<Option<Roi>> {
        let detections = self.forward(image)?;
        Ok(detections
            .first()
            .and_then(|d| detection_to_roi(d, image.width(), image.height())))
    }

    fn size(&self) -> (u32, u32) {
        (self.engine.width(), self.engine.height())
    }
}

impl Model for PoseDetector {
    type Input = RgbImage;
    type Output = Vec<Detection>;

    fn preprocess(&self, image: &RgbImage) -> Result<Array<f32, IxDyn>> {
        let letterbox = Letterbox::fit(image.width(), image.height(), self.size());
        let img = warp_affine_rgb(image, &letterbox.matrix(), self.size(), [0, 0, 0])
            .context("degenerate letterbox transform")?;
        // [0, 255] → [-1, 1]
        Ok(to_nhwc(&img, 1.0 / 127.5, -1.0))
    }

    fn postprocess(&self, ys: Vec<Array<f32, IxDyn>>, image: &RgbImage) -> Result<Vec<Detection>> {
        let letterbox = Letterbox::fit(image.width(), image.height(), self.size());
        detections_from_outputs(&ys, &self.anchors, self.min_score, self.iou, &letterbox)
    }

    fn engine_mut(&mut self) -> &mut OrtBackend {
        &mut self.engine
    }

    fn summary(&self) {
        tracing::debug!(
            "\nSummary:\n> Model: {}\n> Layout: {:?}, Height: {}, Width: {}\n> Anchors: {}, min score: {}, iou: {}",
            self.engine.name(),
            self.engine.layout(),
            self.engine.height(),
            self.engine.width(),
            self.anchors.len(),
            self.min_score,
            self.iou,
        );
    }
}
