//! 关键点提取命令行
//!
//! 用法: extract_keypoints <image_path>
//!
//! 没有任何开关: `--help`, `-x.jpg` 等一律当作图片路径
//!
//! 结果以 2 空格缩进 JSON 输出到 stdout:
//! - 缺少图片路径: 输出错误 JSON, 退出码 1
//! - 其余情况 (包括提取失败): 输出结果 JSON, 退出码 0
use std::process::ExitCode;

use pose_keypoints::{extract_keypoints, logging, Args, KeypointsResult, MISSING_IMAGE_PATH};

fn print(result: &KeypointsResult) -> ExitCode {
    match result.to_json_pretty() {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("❌ 序列化结果失败: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    logging::init();
    let args = Args::parse_lossless(std::env::args_os());

    let Some(image_path) = args.image_path_lossy() else {
        print(&KeypointsResult::failure(MISSING_IMAGE_PATH));
        return ExitCode::from(1);
    };
    if !args.extra.is_empty() {
        tracing::debug!("忽略多余参数: {:?}", args.extra);
    }

    let result = extract_keypoints(&image_path);
    print(&result)
}
