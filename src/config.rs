// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 配置: 命令行参数 / 姿态估计参数 / 运行时(模型位置)参数

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::{PoseError, PoseResult};
use crate::models::ModelComplexity;
use crate::utils::download;

pub const ENV_CONFIG: &str = "KEYPOINTS_CONFIG";
pub const ENV_MODEL_DIR: &str = "KEYPOINTS_MODEL_DIR";
pub const ENV_MODEL_URL: &str = "KEYPOINTS_MODEL_URL";
pub const ENV_THREADS: &str = "KEYPOINTS_THREADS";

/// 提取 33 个人体关键点并以 JSON 输出
///
/// 唯一的参数就是图片路径: 不提供任何开关, `-` 开头的参数也按路径处理
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    about,
    long_about = None,
    disable_help_flag = true,
    disable_version_flag = true
)]
pub struct Args {
    /// 输入图片路径
    #[arg(allow_hyphen_values = true)]
    pub image_path: Option<OsString>,

    /// 多余的位置参数 (忽略)
    #[arg(hide = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub extra: Vec<OsString>,
}

impl Args {
    /// 解析命令行; clap 拒绝时退回到 "第一个参数即路径"
    pub fn parse_lossless<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        match Self::try_parse_from(&args) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!("命令行解析失败, 按原样取第一个参数: {}", e);
                let mut rest = args.into_iter().skip(1);
                Self {
                    image_path: rest.next(),
                    extra: rest.collect(),
                }
            }
        }
    }

    /// 图片路径 (非 UTF-8 字符按 U+FFFD 替换)
    pub fn image_path_lossy(&self) -> Option<String> {
        self.image_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
    }
}

/// 姿态估计参数
///
/// CLI 固定使用 `Default`: 单图模式, heavy 模型, 不做分割, 检测置信度 0.5
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseConfig {
    pub static_image_mode: bool,
    pub model_complexity: ModelComplexity,
    pub enable_segmentation: bool,
    pub min_detection_confidence: f32,
    /// 关键点模型的人体存在阈值
    pub min_presence_confidence: f32,
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            static_image_mode: true,
            model_complexity: ModelComplexity::Heavy,
            enable_segmentation: false,
            min_detection_confidence: 0.5,
            min_presence_confidence: 0.5,
        }
    }
}

/// 运行时参数: 模型文件在哪里, 用几个线程跑
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub model_dir: Option<PathBuf>,
    pub model_url: Option<String>,
    pub intra_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            model_dir: None,
            model_url: None,
            intra_threads: 1,
        }
    }
}

impl RuntimeConfig {
    /// 默认值 → `KEYPOINTS_CONFIG` 指向的 JSON 文件 → 环境变量
    pub fn from_env() -> PoseResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> PoseResult<Self> {
        let mut config = match lookup(ENV_CONFIG) {
            Some(path) => Self::load(Path::new(&path))?,
            None => Self::default(),
        };

        if let Some(dir) = lookup(ENV_MODEL_DIR).filter(|s| !s.is_empty()) {
            config.model_dir = Some(PathBuf::from(dir));
        }
        if let Some(url) = lookup(ENV_MODEL_URL).filter(|s| !s.is_empty()) {
            config.model_url = Some(url);
        }
        if let Some(threads) = lookup(ENV_THREADS) {
            config.intra_threads = threads.trim().parse().map_err(|_| {
                PoseError::Config(format!("{ENV_THREADS} must be a positive integer, got {threads:?}"))
            })?;
        }
        config.validate()?;

        Ok(config)
    }

    /// 从JSON文件加载配置
    pub fn load(path: &Path) -> PoseResult<Self> {
        let json = fs::read_to_string(path).map_err(|e| {
            PoseError::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|e| {
            PoseError::Config(format!("cannot parse config file {}: {e}", path.display()))
        })?;
        tracing::debug!("✅ 配置已从 {} 加载", path.display());
        Ok(config)
    }

    fn validate(&self) -> PoseResult<()> {
        if self.intra_threads == 0 {
            return Err(PoseError::Config("intra_threads must be at least 1".into()));
        }
        Ok(())
    }

    /// 模型目录: 显式指定 > ./models > <可执行文件目录>/models > <数据目录>/pose-keypoints/models
    pub fn model_dir(&self) -> PathBuf {
        if let Some(dir) = &self.model_dir {
            return dir.clone();
        }
        let candidates = Self::candidate_dirs();
        candidates
            .iter()
            .find(|dir| dir.is_dir())
            .or(candidates.last())
            .cloned()
            .unwrap_or_else(|| PathBuf::from("models"))
    }

    fn candidate_dirs() -> Vec<PathBuf> {
        let mut dirs = vec![PathBuf::from("models")];
        if let Some(exe_dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            dirs.push(exe_dir.join("models"));
        }
        if let Some(data) = dirs::data_dir() {
            dirs.push(data.join(env!("CARGO_PKG_NAME")).join("models"));
        }
        dirs
    }

    /// 定位模型文件, 缺失且配置了 `model_url` 时下载一次
    pub fn resolve_model(&self, file_name: &str) -> PoseResult<PathBuf> {
        let dir = self.model_dir();
        let path = dir.join(file_name);
        if path.is_file() {
            return Ok(path);
        }

        match &self.model_url {
            Some(base) => {
                let url = format!("{}/{}", base.trim_end_matches('/'), file_name);
                download::fetch(&url, &path)?;
                Ok(path)
            }
            None => Err(PoseError::ModelNotFound(path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_pose_config_is_static_heavy() {
        let config = PoseConfig::default();
        assert!(config.static_image_mode);
        assert!(!config.enable_segmentation);
        assert_eq!(config.model_complexity, ModelComplexity::Heavy);
        assert_eq!(config.min_detection_confidence, 0.5);
    }

    #[test]
    fn env_overrides_defaults() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            (ENV_MODEL_DIR, "/opt/pose"),
            (ENV_THREADS, " 4 "),
        ]))
        .unwrap();
        assert_eq!(config.model_dir, Some(PathBuf::from("/opt/pose")));
        assert_eq!(config.intra_threads, 4);
        assert_eq!(config.model_url, None);
        assert_eq!(config.model_dir(), PathBuf::from("/opt/pose"));
    }

    #[test]
    fn bad_thread_count_is_config_error() {
        let err = RuntimeConfig::from_lookup(lookup(&[(ENV_THREADS, "many")])).unwrap_err();
        assert!(matches!(err, PoseError::Config(_)));

        let err = RuntimeConfig::from_lookup(lookup(&[(ENV_THREADS, "0")])).unwrap_err();
        assert!(matches!(err, PoseError::Config(_)));
    }

    #[test]
    fn env_wins_over_config_file() {
        let dir = std::env::temp_dir().join(format!("pose-keypoints-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let file = dir.join("keypoints.json");
        fs::write(
            &file,
            r#"{ "model_dir": "/from/file", "model_url": "https://models.example/pose", "intra_threads": 2 }"#,
        )
        .unwrap();

        let config = RuntimeConfig::from_lookup(lookup(&[
            (ENV_CONFIG, file.to_str().unwrap()),
            (ENV_MODEL_DIR, "/from/env"),
        ]))
        .unwrap();
        assert_eq!(config.model_dir, Some(PathBuf::from("/from/env")));
        assert_eq!(config.model_url.as_deref(), Some("https://models.example/pose"));
        assert_eq!(config.intra_threads, 2);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_config_file_is_config_error() {
        let err = RuntimeConfig::from_lookup(lookup(&[(ENV_CONFIG, "/nonexistent/keypoints.json")]))
            .unwrap_err();
        assert!(matches!(err, PoseError::Config(_)));
    }

    #[test]
    fn missing_model_without_url_is_not_found() {
        let config = RuntimeConfig {
            model_dir: Some(PathBuf::from("/nonexistent/models")),
            ..Default::default()
        };
        let err = config.resolve_model("pose_detection.onnx").unwrap_err();
        match err {
            PoseError::ModelNotFound(path) => {
                assert_eq!(path, PathBuf::from("/nonexistent/models/pose_detection.onnx"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn args_accept_zero_or_one_path() {
        let args = Args::parse_lossless(["extract_keypoints"]);
        assert!(args.image_path.is_none());

        let args = Args::parse_lossless(["extract_keypoints", "person.jpg", "ignored"]);
        assert_eq!(args.image_path_lossy().as_deref(), Some("person.jpg"));
        assert_eq!(args.extra, vec![OsString::from("ignored")]);
    }

    #[test]
    fn hyphen_and_flag_like_arguments_are_paths() {
        for arg in ["-x.jpg", "--version", "--help", "-h", "-"] {
            let args = Args::parse_lossless(["extract_keypoints", arg]);
            assert_eq!(args.image_path_lossy().as_deref(), Some(arg), "{arg}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_path_is_kept_lossily() {
        use std::os::unix::ffi::OsStringExt;

        let raw = OsString::from_vec(b"/tmp/caf\xe9.jpg".to_vec());
        let args = Args::parse_lossless([OsString::from("extract_keypoints"), raw.clone()]);
        assert_eq!(args.image_path, Some(raw));
        assert_eq!(args.image_path_lossy().as_deref(), Some("/tmp/caf\u{FFFD}.jpg"));
    }
}
