// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 关键点提取: 读图 → 姿态估计 → 固定格式的 JSON 结果

use image::{ImageError, ImageReader, RgbImage};
use serde::{Deserialize, Serialize};

use crate::config::{PoseConfig, RuntimeConfig};
use crate::error::{PoseError, PoseResult};
use crate::estimator::{PoseBackend, PoseEstimator};
use crate::{PoseLandmarks, NUM_LANDMARKS};

/// 缺少命令行参数时的错误信息
pub const MISSING_IMAGE_PATH: &str = "Image path required";

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LandmarkXyz {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// 一次提取的输出
///
/// 三种形态:
/// - 检测到人体: 33 个关键点, `detected = true`
/// - 未检测到: 33 个零值关键点, `detected = false`
/// - 出错: 空数组, `total_keypoints = 0`, 带 `error`
///
/// 字段顺序即 JSON 键顺序
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeypointsResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub landmarks: Vec<LandmarkXyz>,
    pub visibility: Vec<f64>,
    pub presence: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    pub detected: bool,
    pub total_keypoints: usize,
}

impl KeypointsResult {
    pub fn detected(image_path: &str, pose: &PoseLandmarks) -> Self {
        let lms = pose.landmarks();
        Self {
            error: None,
            landmarks: lms
                .iter()
                .map(|lm| LandmarkXyz {
                    x: lm.x as f64,
                    y: lm.y as f64,
                    z: lm.z as f64,
                })
                .collect(),
            visibility: lms.iter().map(|lm| lm.visibility as f64).collect(),
            presence: lms.iter().map(|lm| lm.presence as f64).collect(),
            image_path: Some(image_path.to_string()),
            detected: true,
            total_keypoints: lms.len(),
        }
    }

    pub fn not_detected(image_path: &str) -> Self {
        Self {
            error: None,
            landmarks: vec![LandmarkXyz::default(); NUM_LANDMARKS],
            visibility: vec![0.0; NUM_LANDMARKS],
            presence: vec![0.0; NUM_LANDMARKS],
            image_path: Some(image_path.to_string()),
            detected: false,
            total_keypoints: NUM_LANDMARKS,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            landmarks: Vec::new(),
            visibility: Vec::new(),
            presence: Vec::new(),
            image_path: None,
            detected: false,
            total_keypoints: 0,
        }
    }

    pub fn from_outcome(image_path: &str, outcome: PoseResult<Option<PoseLandmarks>>) -> Self {
        match outcome {
            Ok(Some(pose)) => Self::detected(image_path, &pose),
            Ok(None) => Self::not_detected(image_path),
            Err(e) => Self::failure(e.to_string()),
        }
    }

    /// 2 空格缩进的 JSON
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// 读取并解码图片 (按内容识别格式), 统一转为 8 位 RGB
pub fn load_image(path: &str) -> PoseResult<RgbImage> {
    let decode = |source: ImageError| PoseError::Decode {
        path: path.to_string(),
        source,
    };
    let image = ImageReader::open(path)
        .map_err(|e| decode(ImageError::IoError(e)))?
        .with_guessed_format()
        .map_err(|e| decode(ImageError::IoError(e)))?
        .decode()
        .map_err(decode)?;
    Ok(image.to_rgb8())
}

/// 使用默认配置 (单图模式, heavy 模型, 置信度 0.5) 提取关键点
///
/// 任何失败都体现在返回值的 `error` 字段中
pub fn extract_keypoints(image_path: &str) -> KeypointsResult {
    extract_keypoints_with(image_path, || {
        let runtime = RuntimeConfig::from_env()?;
        PoseEstimator::new(&PoseConfig::default(), &runtime)
    })
}

/// 用 `open` 创建的后端提取关键点; 后端在本函数内获取并释放
#[tracing::instrument(name = "Extract keypoints", skip(open))]
pub fn extract_keypoints_with<B, F>(image_path: &str, open: F) -> KeypointsResult
where
    B: PoseBackend,
    F: FnOnce() -> PoseResult<B>,
{
    let outcome = load_image(image_path).and_then(|image| {
        let mut backend = open()?;
        let result = backend.process(&image);
        backend.close();
        result
    });

    if let Err(e) = &outcome {
        tracing::warn!("❌ 关键点提取失败: {}", e);
    }
    KeypointsResult::from_outcome(image_path, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Landmark;
    use std::cell::Cell;
    use std::path::PathBuf;
    use std::rc::Rc;

    enum Reply {
        Pose,
        Nothing,
        Fail,
    }

    struct FakeBackend {
        reply: Reply,
        releases: Rc<Cell<usize>>,
    }

    impl PoseBackend for FakeBackend {
        fn process(&mut self, image: &RgbImage) -> PoseResult<Option<PoseLandmarks>> {
            assert_eq!(image.dimensions(), (8, 6));
            match self.reply {
                Reply::Pose => {
                    let lms = (0..NUM_LANDMARKS)
                        .map(|i| Landmark {
                            x: i as f32 / 64.0,
                            y: 0.5,
                            z: -0.25,
                            visibility: 0.75,
                            presence: 1.0,
                        })
                        .collect();
                    Ok(Some(PoseLandmarks::new(lms)))
                }
                Reply::Nothing => Ok(None),
                Reply::Fail => Err(PoseError::Inference("session exploded".into())),
            }
        }

        fn close(self) {}
    }

    impl Drop for FakeBackend {
        fn drop(&mut self) {
            self.releases.set(self.releases.get() + 1);
        }
    }

    fn sample_image(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pose-keypoints-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        image::RgbaImage::new(8, 6).save(&path).unwrap();
        path
    }

    fn run(reply: Reply, file: &str) -> (KeypointsResult, usize) {
        let path = sample_image(file);
        let releases = Rc::new(Cell::new(0));
        let counter = releases.clone();
        let result = extract_keypoints_with(path.to_str().unwrap(), move || {
            Ok(FakeBackend {
                reply,
                releases: counter,
            })
        });
        (result, releases.get())
    }

    fn assert_invariants(r: &KeypointsResult) {
        assert_eq!(r.total_keypoints, r.landmarks.len());
        assert_eq!(r.visibility.len(), r.landmarks.len());
        assert_eq!(r.presence.len(), r.landmarks.len());
        assert!(r.landmarks.len() == NUM_LANDMARKS || r.landmarks.is_empty());
    }

    #[test]
    fn detected_pose_is_copied_verbatim() {
        let (r, releases) = run(Reply::Pose, "pose.png");
        assert_eq!(releases, 1);
        assert!(r.detected);
        assert!(r.error.is_none());
        assert_eq!(r.total_keypoints, 33);
        assert_eq!(r.landmarks[2], LandmarkXyz { x: 2.0 / 64.0, y: 0.5, z: -0.25 });
        assert_eq!(r.visibility[32], 0.75);
        assert_eq!(r.presence[0], 1.0);
        assert!(r.image_path.as_deref().unwrap().ends_with("pose.png"));
        assert_invariants(&r);
    }

    #[test]
    fn no_pose_yields_zero_filled_landmarks() {
        let (r, releases) = run(Reply::Nothing, "blank.png");
        assert_eq!(releases, 1);
        assert!(!r.detected);
        assert!(r.error.is_none());
        assert_eq!(r.total_keypoints, 33);
        assert!(r.landmarks.iter().all(|l| *l == LandmarkXyz::default()));
        assert!(r.visibility.iter().chain(&r.presence).all(|v| *v == 0.0));
        assert_invariants(&r);
    }

    #[test]
    fn inference_failure_is_error_payload_and_still_releases() {
        let (r, releases) = run(Reply::Fail, "fail.png");
        assert_eq!(releases, 1);
        assert_eq!(r.error.as_deref(), Some("Inference failed: session exploded"));
        assert!(!r.detected);
        assert!(r.image_path.is_none());
        assert_invariants(&r);
    }

    #[test]
    fn unreadable_image_never_opens_backend() {
        let opened = Cell::new(false);
        let r = extract_keypoints_with("/nonexistent/person.jpg", || {
            opened.set(true);
            Err::<FakeBackend, _>(PoseError::Config("unreachable".into()))
        });
        assert!(!opened.get());
        assert!(r
            .error
            .as_deref()
            .unwrap()
            .starts_with("Could not read image from /nonexistent/person.jpg"));
        assert_eq!(r.total_keypoints, 0);
        assert_invariants(&r);
    }

    #[test]
    fn backend_open_failure_is_error_payload() {
        let path = sample_image("open.png");
        let r = extract_keypoints_with(path.to_str().unwrap(), || {
            Err::<FakeBackend, _>(PoseError::ModelNotFound(PathBuf::from("models/pose_detection.onnx")))
        });
        assert!(r.error.unwrap().contains("pose_detection.onnx"));
        assert!(!r.detected);
    }

    #[test]
    fn garbage_bytes_are_decode_error() {
        let dir = std::env::temp_dir().join(format!("pose-keypoints-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("garbage.jpg");
        std::fs::write(&path, b"definitely not an image").unwrap();
        let err = load_image(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, PoseError::Decode { .. }));
    }

    #[test]
    fn failure_json_has_fixed_shape() {
        let json = KeypointsResult::failure(MISSING_IMAGE_PATH).to_json_pretty().unwrap();
        assert_eq!(
            json,
            "{\n  \"error\": \"Image path required\",\n  \"landmarks\": [],\n  \"visibility\": [],\n  \"presence\": [],\n  \"detected\": false,\n  \"total_keypoints\": 0\n}"
        );
    }

    #[test]
    fn not_detected_json_orders_keys_like_success() {
        let json = KeypointsResult::not_detected("a.jpg").to_json_pretty().unwrap();
        assert!(json.starts_with("{\n  \"landmarks\": [\n    {\n      \"x\": 0.0,"));
        let keys = ["\"presence\"", "\"image_path\": \"a.jpg\"", "\"detected\": false", "\"total_keypoints\": 33"];
        let positions: Vec<usize> = keys.iter().map(|k| json.find(k).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(!json.contains("\"error\""));

        let back: KeypointsResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, KeypointsResult::not_detected("a.jpg"));
    }
}
