// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 命令行/姿态/运行时配置
pub mod error; // 错误类型
pub mod estimator; // 姿态估计器 (检测 + 关键点, 按调用获取与释放)
pub mod keypoints; // 关键点提取与 JSON 结果
pub mod logging; // tracing 日志 (stderr)
pub mod models; // 模型接口与具体实现
pub mod ort_backend;
pub mod utils;

pub use crate::config::{Args, PoseConfig, RuntimeConfig};
pub use crate::error::{PoseError, PoseResult};
pub use crate::estimator::{PoseBackend, PoseEstimator};
pub use crate::keypoints::{
    extract_keypoints, extract_keypoints_with, KeypointsResult, LandmarkXyz, MISSING_IMAGE_PATH,
};
pub use crate::models::{ModelComplexity, LANDMARK_NAMES};
pub use crate::ort_backend::{OrtBackend, OrtConfig, TensorLayout};

/// 每个人体输出的关键点数量
pub const NUM_LANDMARKS: usize = 33;

/// 加权非极大值抑制
///
/// 与最高分候选 IoU 超过阈值的所有候选按分数加权平均 (框和关键点),
/// 合并结果保留最高分。返回按分数降序排列
pub fn weighted_non_max_suppression(mut xs: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    xs.sort_by(|a, b| b.score().total_cmp(&a.score()));

    let mut ys = Vec::new();
    while !xs.is_empty() {
        let top = xs.remove(0);
        let (others, rest): (Vec<_>, Vec<_>) = xs
            .into_iter()
            .partition(|d| d.bbox.iou(&top.bbox) > iou_threshold);
        xs = rest;

        // 面积为 0 的框与自身 IoU 也为 0, 所以 top 单独放入
        let mut overlapping = Vec::with_capacity(others.len() + 1);
        overlapping.push(top.clone());
        overlapping.extend(others);
        let total: f32 = overlapping.iter().map(Detection::score).sum();
        if overlapping.len() == 1 || total <= 0.0 {
            ys.push(top);
            continue;
        }

        let (mut xmin, mut ymin, mut xmax, mut ymax) = (0.0, 0.0, 0.0, 0.0);
        let mut keypoints = vec![Point2::default(); top.keypoints.len()];
        for d in &overlapping {
            let w = d.score() / total;
            xmin += d.bbox.xmin() * w;
            ymin += d.bbox.ymin() * w;
            xmax += d.bbox.xmax() * w;
            ymax += d.bbox.ymax() * w;
            for (acc, kp) in keypoints.iter_mut().zip(&d.keypoints) {
                acc.x += kp.x * w;
                acc.y += kp.y * w;
            }
        }

        ys.push(Detection {
            bbox: Bbox::new(xmin, ymin, xmax - xmin, ymax - ymin, top.score()),
            keypoints,
        });
    }
    ys
}

#[derive(Debug, PartialEq, Clone, Copy, Default)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bbox {
    // 归一化坐标下的检测框
    xmin: f32,
    ymin: f32,
    width: f32,
    height: f32,
    confidence: f32,
}

impl Bbox {
    pub fn new(xmin: f32, ymin: f32, width: f32, height: f32, confidence: f32) -> Self {
        Self {
            xmin,
            ymin,
            width,
            height,
            confidence,
        }
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn xmin(&self) -> f32 {
        self.xmin
    }

    pub fn ymin(&self) -> f32 {
        self.ymin
    }

    pub fn xmax(&self) -> f32 {
        self.xmin + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.ymin + self.height
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn intersection_area(&self, another: &Bbox) -> f32 {
        let l = self.xmin.max(another.xmin);
        let r = self.xmax().min(another.xmax());
        let t = self.ymin.max(another.ymin);
        let b = self.ymax().min(another.ymax());
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn union(&self, another: &Bbox) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    pub fn iou(&self, another: &Bbox) -> f32 {
        let union = self.union(another);
        if union <= 0.0 {
            return 0.0;
        }
        self.intersection_area(another) / union
    }
}

/// 检测器输出: 人体框 + 对齐关键点 (0: 髋部中心, 1: 尺度/旋转参考点, ...)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Detection {
    pub bbox: Bbox,
    pub keypoints: Vec<Point2>,
}

impl Detection {
    pub fn score(&self) -> f32 {
        self.bbox.confidence()
    }
}

/// 旋转矩形感兴趣区域 (归一化坐标, rotation 为弧度)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Roi {
    pub x_center: f32,
    pub y_center: f32,
    pub width: f32,
    pub height: f32,
    pub rotation: f32,
}

/// 单个关键点 (归一化图像坐标, z 为相对深度)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub visibility: f32,
    pub presence: f32,
}

/// 一个人体的 33 个关键点
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PoseLandmarks {
    landmarks: Vec<Landmark>,
}

impl PoseLandmarks {
    pub fn new(landmarks: Vec<Landmark>) -> Self {
        Self { landmarks }
    }

    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }

    pub fn len(&self) -> usize {
        self.landmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }

    /// 按名称查找, 例如 `"left_wrist"`
    pub fn get(&self, name: &str) -> Option<&Landmark> {
        LANDMARK_NAMES
            .iter()
            .position(|n| *n == name)
            .and_then(|i| self.landmarks.get(i))
    }
}
