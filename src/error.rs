// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use std::path::PathBuf;

/// 关键点提取错误
///
/// 所有变体最终都会被折叠进 JSON 的 `error` 字段, 不会变成进程级错误
#[derive(Debug, thiserror::Error)]
pub enum PoseError {
    /// 图片无法读取或解码
    #[error("Could not read image from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("Pose model not found: {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("Failed to download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    /// ONNX Runtime / 张量形状错误 (anyhow 链)
    #[error("{0:#}")]
    Backend(#[from] anyhow::Error),
}

pub type PoseResult<T> = Result<T, PoseError>;
