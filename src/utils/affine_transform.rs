/// 仿射变换工具模块
/// 实现类似于 cv2::warpAffine 的功能, 用于检测器的 letterbox 和关键点模型的旋转裁剪
use image::{Rgb, RgbImage};

/// 仿射变换矩阵 (2x3)
/// | a11 a12 b1 |
/// | a21 a22 b2 |
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineMatrix {
    pub a11: f32,
    pub a12: f32,
    pub b1: f32,
    pub a21: f32,
    pub a22: f32,
    pub b2: f32,
}

impl AffineMatrix {
    /// 创建单位仿射矩阵
    pub fn identity() -> Self {
        Self {
            a11: 1.0,
            a12: 0.0,
            b1: 0.0,
            a21: 0.0,
            a22: 1.0,
            b2: 0.0,
        }
    }

    /// 应用仿射变换到点 (x, y)
    pub fn transform_point(&self, x: f32, y: f32) -> (f32, f32) {
        let new_x = self.a11 * x + self.a12 * y + self.b1;
        let new_y = self.a21 * x + self.a22 * y + self.b2;
        (new_x, new_y)
    }

    /// 计算逆矩阵 (用于反向映射)
    pub fn inverse(&self) -> Option<Self> {
        let det = self.a11 * self.a22 - self.a12 * self.a21;
        if det.abs() < 1e-10 {
            return None; // 矩阵不可逆
        }

        let inv_det = 1.0 / det;
        Some(Self {
            a11: self.a22 * inv_det,
            a12: -self.a12 * inv_det,
            b1: (self.a12 * self.b2 - self.a22 * self.b1) * inv_det,
            a21: -self.a21 * inv_det,
            a22: self.a11 * inv_det,
            b2: (self.a21 * self.b1 - self.a11 * self.b2) * inv_det,
        })
    }

    /// 创建平移矩阵
    pub fn translation(dx: f32, dy: f32) -> Self {
        Self {
            b1: dx,
            b2: dy,
            ..Self::identity()
        }
    }

    /// 创建缩放矩阵
    pub fn scale(sx: f32, sy: f32) -> Self {
        Self {
            a11: sx,
            a22: sy,
            ..Self::identity()
        }
    }

    /// 创建旋转矩阵 (弧度, 图像坐标系下 y 轴向下)
    pub fn rotation(angle: f32) -> Self {
        let (sin_a, cos_a) = angle.sin_cos();
        Self {
            a11: cos_a,
            a12: -sin_a,
            b1: 0.0,
            a21: sin_a,
            a22: cos_a,
            b2: 0.0,
        }
    }

    /// 矩阵组合 (self * other), 先应用 other 再应用 self
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            a11: self.a11 * other.a11 + self.a12 * other.a21,
            a12: self.a11 * other.a12 + self.a12 * other.a22,
            b1: self.a11 * other.b1 + self.a12 * other.b2 + self.b1,
            a21: self.a21 * other.a11 + self.a22 * other.a21,
            a22: self.a21 * other.a12 + self.a22 * other.a22,
            b2: self.a21 * other.b1 + self.a22 * other.b2 + self.b2,
        }
    }
}

/// 仿射变换 (RGB图像, 双线性插值, 常数边界)
///
/// # 参数
/// - `src`: 源图像
/// - `matrix`: 源坐标 → 目标坐标 的仿射矩阵
/// - `dst_size`: 目标图像尺寸 (width, height)
/// - `border`: 超出源图像范围时的填充色
///
/// 矩阵不可逆时返回 `None`
pub fn warp_affine_rgb(
    src: &RgbImage,
    matrix: &AffineMatrix,
    dst_size: (u32, u32),
    border: [u8; 3],
) -> Option<RgbImage> {
    let (dst_width, dst_height) = dst_size;
    let mut dst = RgbImage::from_pixel(dst_width, dst_height, Rgb(border));

    // 使用逆变换进行反向映射, 像素中心对齐
    let inv_matrix = matrix.inverse()?;

    for dst_y in 0..dst_height {
        for dst_x in 0..dst_width {
            let (src_x, src_y) =
                inv_matrix.transform_point(dst_x as f32 + 0.5, dst_y as f32 + 0.5);
            let pixel = sample_bilinear(src, src_x - 0.5, src_y - 0.5, border);
            dst.put_pixel(dst_x, dst_y, Rgb(pixel));
        }
    }

    Some(dst)
}

/// 双线性插值 (RGB)
fn sample_bilinear(src: &RgbImage, x: f32, y: f32, border: [u8; 3]) -> [u8; 3] {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let x1 = x0 + 1;
    let y1 = y0 + 1;

    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = border_pixel(src, x0, y0, border);
    let p01 = border_pixel(src, x0, y1, border);
    let p10 = border_pixel(src, x1, y0, border);
    let p11 = border_pixel(src, x1, y1, border);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let v0 = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let v1 = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        out[c] = (v0 * (1.0 - fy) + v1 * fy).round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// 边界处理: 越界返回填充色
fn border_pixel(src: &RgbImage, x: i64, y: i64, border: [u8; 3]) -> [u8; 3] {
    if x >= 0 && y >= 0 && x < src.width() as i64 && y < src.height() as i64 {
        src.get_pixel(x as u32, y as u32).0
    } else {
        border
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let matrix = AffineMatrix::identity();
        let (x, y) = matrix.transform_point(10.0, 20.0);
        assert_eq!(x, 10.0);
        assert_eq!(y, 20.0);
    }

    #[test]
    fn test_rotation_quarter_turn() {
        let matrix = AffineMatrix::rotation(std::f32::consts::FRAC_PI_2);
        let (x, y) = matrix.transform_point(1.0, 0.0);
        assert!(x.abs() < 1e-6);
        assert!((y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_compose_applies_right_first() {
        let m = AffineMatrix::translation(5.0, 0.0).compose(&AffineMatrix::scale(2.0, 2.0));
        let (x, y) = m.transform_point(1.0, 1.0);
        assert_eq!((x, y), (7.0, 2.0));
    }

    #[test]
    fn test_inverse() {
        let matrix = AffineMatrix::translation(5.0, 10.0)
            .compose(&AffineMatrix::rotation(0.3))
            .compose(&AffineMatrix::scale(2.0, 0.5));
        let composed = matrix.compose(&matrix.inverse().unwrap());

        assert!((composed.a11 - 1.0).abs() < 1e-5);
        assert!((composed.a22 - 1.0).abs() < 1e-5);
        assert!(composed.a12.abs() < 1e-5);
        assert!(composed.a21.abs() < 1e-5);
        assert!(composed.b1.abs() < 1e-4);
        assert!(composed.b2.abs() < 1e-4);
    }

    #[test]
    fn test_singular_matrix_has_no_warp() {
        let src = RgbImage::new(4, 4);
        let singular = AffineMatrix::scale(0.0, 1.0);
        assert!(warp_affine_rgb(&src, &singular, (2, 2), [0, 0, 0]).is_none());
    }

    #[test]
    fn test_warp_identity_copies_pixels() {
        let mut src = RgbImage::new(3, 2);
        src.put_pixel(1, 1, Rgb([200, 100, 50]));
        let dst = warp_affine_rgb(&src, &AffineMatrix::identity(), (3, 2), [0, 0, 0]).unwrap();
        assert_eq!(dst.get_pixel(1, 1).0, [200, 100, 50]);
        assert_eq!(dst.get_pixel(0, 0).0, [0, 0, 0]);
    }

    #[test]
    fn test_warp_fills_border_outside_source() {
        let src = RgbImage::from_pixel(2, 2, Rgb([255, 255, 255]));
        let shift = AffineMatrix::translation(10.0, 10.0);
        let dst = warp_affine_rgb(&src, &shift, (4, 4), [7, 8, 9]).unwrap();
        assert_eq!(dst.get_pixel(0, 0).0, [7, 8, 9]);
    }
}
