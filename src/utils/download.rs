// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 模型文件下载 (只尝试一次)

use std::fs;
use std::io;
use std::path::Path;

use crate::error::{PoseError, PoseResult};

/// 下载 `url` 到 `dest`; 先写入 `.part` 临时文件, 完成后再改名
pub fn fetch(url: &str, dest: &Path) -> PoseResult<()> {
    let fail = |reason: String| PoseError::Download {
        url: url.to_string(),
        reason,
    };

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| fail(format!("cannot create {}: {e}", parent.display())))?;
    }

    tracing::info!("⬇️  下载模型 {} → {}", url, dest.display());
    let response = ureq::get(url).call().map_err(|e| fail(e.to_string()))?;

    let part = dest.with_extension("part");
    let written = {
        let mut file = fs::File::create(&part)
            .map_err(|e| fail(format!("cannot create {}: {e}", part.display())))?;
        io::copy(&mut response.into_reader(), &mut file)
    };
    let bytes = match written {
        Ok(n) => n,
        Err(e) => {
            fs::remove_file(&part).ok();
            return Err(fail(e.to_string()));
        }
    };

    fs::rename(&part, dest).map_err(|e| fail(format!("cannot move into place: {e}")))?;
    tracing::info!("✅ 下载完成 {} ({} bytes)", dest.display(), bytes);
    Ok(())
}
