/// 模型统一接口与实现
///
/// # 架构说明
///
/// BlazePose 两阶段流程, 每张图片各跑一次:
/// - **PoseDetector**: 224x224 SSD 检测器, 输出人体框 + 4 个对齐关键点
///   - 文件: `pose_detector.rs`
/// - **PoseLandmarker**: 在旋转 ROI 上回归 39 个关键点 (取前 33 个)
///   - 文件: `pose_landmarker.rs`
///
/// ## Model Trait
/// 统一的模型接口,定义标准流程: preprocess → run → postprocess
use anyhow::Result;
use image::RgbImage;
use ndarray::{Array, IxDyn};
use serde::{Deserialize, Serialize};

use crate::OrtBackend;

pub mod pose_detector;
pub mod pose_landmarker;

pub use pose_detector::PoseDetector;
pub use pose_landmarker::{PoseLandmarker, RoiCrop};

/// 检测器模型文件
pub const DETECTOR_MODEL: &str = "pose_detection.onnx";

/// BlazePose 33 个关键点名称 (按输出顺序)
pub const LANDMARK_NAMES: [&str; 33] = [
    "nose",
    "left_eye_inner",
    "left_eye",
    "left_eye_outer",
    "right_eye_inner",
    "right_eye",
    "right_eye_outer",
    "left_ear",
    "right_ear",
    "mouth_left",
    "mouth_right",
    "left_shoulder",
    "right_shoulder",
    "left_elbow",
    "right_elbow",
    "left_wrist",
    "right_wrist",
    "left_pinky",
    "right_pinky",
    "left_index",
    "right_index",
    "left_thumb",
    "right_thumb",
    "left_hip",
    "right_hip",
    "left_knee",
    "right_knee",
    "left_ankle",
    "right_ankle",
    "left_heel",
    "right_heel",
    "left_foot_index",
    "right_foot_index",
];

/// 关键点模型复杂度 (0=lite, 1=full, 2=heavy)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelComplexity {
    Lite = 0,  // 最快, 精度最低
    Full = 1,  // 平衡
    Heavy = 2, // 最慢, 精度最高
}

impl ModelComplexity {
    /// 对应的关键点模型文件名
    pub fn landmark_model(&self) -> &'static str {
        match self {
            ModelComplexity::Lite => "pose_landmark_lite.onnx",
            ModelComplexity::Full => "pose_landmark_full.onnx",
            ModelComplexity::Heavy => "pose_landmark_heavy.onnx",
        }
    }
}

/// 统一的深度学习模型接口
///
/// ## 核心流程
/// ```text
/// 输入 → preprocess → NHWC 张量
///          ↓
///     推理引擎 run
///          ↓
///     原始输出 → postprocess → 结果
/// ```
pub trait Model {
    type Input;
    type Output;

    /// 预处理: 输入 → NHWC 张量 `[1, H, W, 3]`
    fn preprocess(&self, input: &Self::Input) -> Result<Array<f32, IxDyn>>;

    /// 推理: 执行模型前向传播, 返回未解码的原始输出
    fn run(&mut self, xs: Array<f32, IxDyn>, profile: bool) -> Result<Vec<Array<f32, IxDyn>>> {
        self.engine_mut().run(xs, profile)
    }

    /// 后处理: 原始输出 → 结果 (`input` 用于坐标还原)
    fn postprocess(&self, ys: Vec<Array<f32, IxDyn>>, input: &Self::Input) -> Result<Self::Output>;

    /// 完整的推理流程: preprocess → run → postprocess
    fn forward(&mut self, input: &Self::Input) -> Result<Self::Output> {
        let xs = self.preprocess(input)?;
        let ys = self.run(xs, tracing::enabled!(tracing::Level::DEBUG))?;
        self.postprocess(ys, input)
    }

    /// 获取底层推理引擎的可变引用
    fn engine_mut(&mut self) -> &mut OrtBackend;

    /// 打印模型信息 (debug 日志)
    fn summary(&self);
}

/// RGB 图像 → NHWC 张量, 每个像素值映射为 `v * scale + offset`
pub(crate) fn to_nhwc(image: &RgbImage, scale: f32, offset: f32) -> Array<f32, IxDyn> {
    let (w, h) = image.dimensions();
    let mut ys = Array::zeros((1, h as usize, w as usize, 3)).into_dyn();
    for (x, y, rgb) in image.enumerate_pixels() {
        for c in 0..3 {
            ys[[0, y as usize, x as usize, c]] = rgb.0[c] as f32 * scale + offset;
        }
    }
    ys
}

pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
