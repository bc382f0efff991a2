// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 姿态估计器: 检测器 + 关键点模型, 每次调用获取, 用完立即释放

use image::RgbImage;

use crate::config::{PoseConfig, RuntimeConfig};
use crate::error::{PoseError, PoseResult};
use crate::models::{Model, PoseDetector, PoseLandmarker, DETECTOR_MODEL};
use crate::PoseLandmarks;

/// 姿态估计后端接口
///
/// `process` 没有检测到人体时返回 `Ok(None)`; `close` 释放底层会话
pub trait PoseBackend {
    fn process(&mut self, image: &RgbImage) -> PoseResult<Option<PoseLandmarks>>;

    fn close(self)
    where
        Self: Sized;
}

/// BlazePose 估计器, 持有两个 ONNX Runtime 会话
///
/// 显式 `close()` 或 drop 时释放, 只释放一次
pub struct PoseEstimator {
    detector: Option<PoseDetector>,
    landmarker: Option<PoseLandmarker>,
}

impl PoseEstimator {
    #[tracing::instrument(name = "Initialize pose estimator", skip(runtime), err)]
    pub fn new(config: &PoseConfig, runtime: &RuntimeConfig) -> PoseResult<Self> {
        if !config.static_image_mode {
            return Err(PoseError::Config("only static image mode is supported".into()));
        }
        if config.enable_segmentation {
            return Err(PoseError::Config("segmentation is not supported".into()));
        }
        for (name, v) in [
            ("min_detection_confidence", config.min_detection_confidence),
            ("min_presence_confidence", config.min_presence_confidence),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(PoseError::Config(format!("{name} must be within [0, 1], got {v}")));
            }
        }

        let detector_path = runtime.resolve_model(DETECTOR_MODEL)?;
        let landmark_path = runtime.resolve_model(config.model_complexity.landmark_model())?;
        tracing::debug!(
            "📦 检测模型: {}, 🦴 关键点模型: {}",
            detector_path.display(),
            landmark_path.display()
        );

        let detector = PoseDetector::new(
            &detector_path,
            runtime.intra_threads,
            config.min_detection_confidence,
        )?;
        detector.summary();
        let landmarker = PoseLandmarker::new(
            &landmark_path,
            runtime.intra_threads,
            config.min_presence_confidence,
        )?;
        landmarker.summary();

        Ok(Self {
            detector: Some(detector),
            landmarker: Some(landmarker),
        })
    }

    fn release(&mut self) {
        let detector = self.detector.take();
        let landmarker = self.landmarker.take();
        if detector.is_some() || landmarker.is_some() {
            drop(detector);
            drop(landmarker);
            tracing::debug!("🔒 姿态估计器已释放");
        }
    }
}

impl PoseBackend for PoseEstimator {
    fn process(&mut self, image: &RgbImage) -> PoseResult<Option<PoseLandmarks>> {
        let (Some(detector), Some(landmarker)) = (self.detector.as_mut(), self.landmarker.as_mut())
        else {
            return Err(PoseError::Inference("pose estimator is closed".into()));
        };

        let Some(roi) = detector.detect_roi(image)? else {
            tracing::debug!("未检测到人体");
            return Ok(None);
        };
        Ok(landmarker.landmarks(image, roi)?)
    }

    fn close(mut self) {
        self.release();
    }
}

impl Drop for PoseEstimator {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelComplexity;
    use std::path::PathBuf;

    fn missing_models() -> RuntimeConfig {
        RuntimeConfig {
            model_dir: Some(PathBuf::from("/nonexistent/pose-models")),
            ..Default::default()
        }
    }

    #[test]
    fn video_mode_is_rejected() {
        let config = PoseConfig {
            static_image_mode: false,
            ..Default::default()
        };
        let err = PoseEstimator::new(&config, &missing_models()).err().unwrap();
        assert!(matches!(err, PoseError::Config(_)));
    }

    #[test]
    fn out_of_range_confidence_is_rejected() {
        let config = PoseConfig {
            min_detection_confidence: 1.5,
            ..Default::default()
        };
        let err = PoseEstimator::new(&config, &missing_models()).err().unwrap();
        assert!(err.to_string().contains("min_detection_confidence"));
    }

    #[test]
    fn missing_detector_model_is_reported() {
        let config = PoseConfig {
            model_complexity: ModelComplexity::Lite,
            ..Default::default()
        };
        let err = PoseEstimator::new(&config, &missing_models()).err().unwrap();
        match err {
            PoseError::ModelNotFound(path) => assert!(path.ends_with(DETECTOR_MODEL)),
            other => panic!("unexpected error: {other}"),
        }
    }
}
