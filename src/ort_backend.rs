// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// ONNX Runtime 推理后端: 加载会话, 读取输入布局, 执行前向推理

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use ndarray::{Array, IxDyn};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

/// 输入张量布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    /// [batch, height, width, channel] (MediaPipe 导出的模型)
    Nhwc,
    /// [batch, channel, height, width]
    Nchw,
}

/// 后端构建参数
#[derive(Debug, Clone)]
pub struct OrtConfig {
    /// 模型文件
    pub f: PathBuf,
    pub intra_threads: usize,
    /// 输入尺寸为动态维度时使用的 (height, width)
    pub image_size: (u32, u32),
}

pub struct OrtBackend {
    session: Session,
    name: String,
    output_names: Vec<String>,
    layout: TensorLayout,
    height: u32,
    width: u32,
}

impl OrtBackend {
    pub fn build(config: OrtConfig) -> Result<Self> {
        let name = config
            .f
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| config.f.display().to_string());

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.intra_threads)?
            .commit_from_file(&config.f)
            .with_context(|| format!("Failed to load ONNX model {}", config.f.display()))?;

        let Some(input) = session.inputs.first() else {
            bail!("{name} has no inputs");
        };
        let shape: Vec<i64> = input
            .input_type
            .tensor_shape()
            .map(|s| s.iter().copied().collect())
            .with_context(|| format!("{name}: input `{}` is not a tensor", input.name))?;
        if shape.len() != 4 {
            bail!("{name}: expected a 4-d image input, got shape {shape:?}");
        }

        // 通道维为 3 的一侧决定布局
        let layout = if shape[3] == 3 {
            TensorLayout::Nhwc
        } else if shape[1] == 3 {
            TensorLayout::Nchw
        } else {
            bail!("{name}: cannot infer channel axis from input shape {shape:?}");
        };
        let (h_axis, w_axis) = match layout {
            TensorLayout::Nhwc => (1, 2),
            TensorLayout::Nchw => (2, 3),
        };
        let dim = |v: i64, fallback: u32| if v > 0 { v as u32 } else { fallback };
        let height = dim(shape[h_axis], config.image_size.0);
        let width = dim(shape[w_axis], config.image_size.1);

        let output_names = session.outputs.iter().map(|o| o.name.clone()).collect();

        Ok(Self {
            session,
            name,
            output_names,
            layout,
            height,
            width,
        })
    }

    /// 前向推理
    ///
    /// `xs` 始终是 NHWC, 模型需要 NCHW 时在这里转置; 输出按模型声明顺序返回
    pub fn run(&mut self, xs: Array<f32, IxDyn>, profile: bool) -> Result<Vec<Array<f32, IxDyn>>> {
        let xs = match self.layout {
            TensorLayout::Nhwc => xs,
            TensorLayout::Nchw => xs
                .permuted_axes(IxDyn(&[0, 3, 1, 2]))
                .as_standard_layout()
                .into_owned(),
        };

        let t = Instant::now();
        let input = Tensor::from_array(xs)?;
        let outputs = self
            .session
            .run(ort::inputs![input])
            .with_context(|| format!("Failed to run {}", self.name))?;
        if profile {
            tracing::debug!("[{} Inference]: {:?}", self.name, t.elapsed());
        }

        let mut ys = Vec::with_capacity(self.output_names.len());
        for name in &self.output_names {
            let y: ndarray::ArrayViewD<f32> = outputs[name.as_str()]
                .try_extract_array()
                .with_context(|| format!("Failed to extract output `{name}` of {}", self.name))?;
            ys.push(y.into_owned());
        }
        Ok(ys)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> TensorLayout {
        self.layout
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }
}

impl std::fmt::Debug for OrtBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrtBackend")
            .field("name", &self.name)
            .field("layout", &self.layout)
            .field("height", &self.height)
            .field("width", &self.width)
            .field("outputs", &self.output_names)
            .finish()
    }
}
