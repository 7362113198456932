//! Image-quality metrics
//!
//! - [`psnr`]: peak signal-to-noise ratio over a whole image set
//! - [`ssim`]: Gaussian-weighted structural similarity of one image pair
//! - [`PerceptualMetric`]: seam for a learned perceptual distance

use crate::error::MetricError;
use image::Rgb32FImage;

/// Gaussian window standard deviation.
pub const SSIM_SIGMA: f32 = 1.5;
/// Window radius: `int(3.5 * sigma + 0.5)`.
pub const SSIM_RADIUS: usize = 5;
const SSIM_WINDOW: usize = 2 * SSIM_RADIUS + 1;
const K1: f32 = 0.01;
const K2: f32 = 0.03;

/// Mean squared error over every channel of every pixel of two image sets.
pub fn mse(rendered: &[Rgb32FImage], reference: &[Rgb32FImage]) -> Result<f32, MetricError> {
    check_pairs(rendered, reference)?;
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for (a, b) in rendered.iter().zip(reference) {
        for (x, y) in a.as_raw().iter().zip(b.as_raw()) {
            let d = (*x - *y) as f64;
            sum += d * d;
        }
        count += a.as_raw().len();
    }
    if count == 0 {
        return Err(MetricError::Failed("no pixels to compare".into()));
    }
    Ok((sum / count as f64) as f32)
}

/// `-10 * log10(mse)`.
pub fn psnr_from_mse(mse: f32) -> f32 {
    -10.0 * mse.log10()
}

pub fn psnr(rendered: &[Rgb32FImage], reference: &[Rgb32FImage]) -> Result<f32, MetricError> {
    Ok(psnr_from_mse(mse(rendered, reference)?))
}

/// Structural similarity of two RGB images with data range 1.
///
/// Each channel is filtered with an 11-tap Gaussian (sigma 1.5, reflected
/// borders), variances use the sample normalization, and the similarity map
/// is averaged after cropping the window radius from every side. The result
/// is the mean over the three channels.
pub fn ssim(a: &Rgb32FImage, b: &Rgb32FImage) -> Result<f32, MetricError> {
    if a.dimensions() != b.dimensions() {
        return Err(MetricError::DimensionMismatch(a.dimensions(), b.dimensions()));
    }
    let (width, height) = a.dimensions();
    let (w, h) = (width as usize, height as usize);
    if w < SSIM_WINDOW || h < SSIM_WINDOW {
        return Err(MetricError::Failed(format!(
            "images of {}x{} are smaller than the {}-pixel SSIM window",
            width, height, SSIM_WINDOW
        )));
    }

    let kernel = gaussian_kernel();
    let c1 = K1 * K1;
    let c2 = K2 * K2;
    let np = (SSIM_WINDOW * SSIM_WINDOW) as f32;
    let cov_norm = np / (np - 1.0);

    let mut total = 0.0f64;
    for channel in 0..3 {
        let x = plane(a, channel);
        let y = plane(b, channel);
        let xx: Vec<f32> = x.iter().map(|v| v * v).collect();
        let yy: Vec<f32> = y.iter().map(|v| v * v).collect();
        let xy: Vec<f32> = x.iter().zip(&y).map(|(p, q)| p * q).collect();

        let ux = filter(&x, w, h, &kernel);
        let uy = filter(&y, w, h, &kernel);
        let uxx = filter(&xx, w, h, &kernel);
        let uyy = filter(&yy, w, h, &kernel);
        let uxy = filter(&xy, w, h, &kernel);

        let mut sum = 0.0f64;
        let mut count = 0usize;
        for row in SSIM_RADIUS..h - SSIM_RADIUS {
            for col in SSIM_RADIUS..w - SSIM_RADIUS {
                let i = row * w + col;
                let vx = cov_norm * (uxx[i] - ux[i] * ux[i]);
                let vy = cov_norm * (uyy[i] - uy[i] * uy[i]);
                let vxy = cov_norm * (uxy[i] - ux[i] * uy[i]);
                let num = (2.0 * ux[i] * uy[i] + c1) * (2.0 * vxy + c2);
                let den = (ux[i] * ux[i] + uy[i] * uy[i] + c1) * (vx + vy + c2);
                sum += (num / den) as f64;
                count += 1;
            }
        }
        total += sum / count as f64;
    }
    Ok((total / 3.0) as f32)
}

/// Learned or analytic perceptual distance between image pairs.
///
/// Implementations may hold large resources; callers bound peak memory by
/// passing at most a chunk of the evaluation set per call.
pub trait PerceptualMetric {
    /// Short key used when the distance is logged, e.g. `lpips`.
    fn name(&self) -> &str {
        "perceptual"
    }

    /// One distance per `(rendered[i], reference[i])` pair.
    fn distances(&self, rendered: &[Rgb32FImage], reference: &[Rgb32FImage]) -> Result<Vec<f32>, MetricError>;
}

/// `(1 - SSIM) / 2`, a network-free stand-in in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralDissimilarity;

impl PerceptualMetric for StructuralDissimilarity {
    fn name(&self) -> &str {
        "dssim"
    }

    fn distances(&self, rendered: &[Rgb32FImage], reference: &[Rgb32FImage]) -> Result<Vec<f32>, MetricError> {
        check_pairs(rendered, reference)?;
        rendered
            .iter()
            .zip(reference)
            .map(|(a, b)| Ok((1.0 - ssim(a, b)?) / 2.0))
            .collect()
    }
}

fn check_pairs(rendered: &[Rgb32FImage], reference: &[Rgb32FImage]) -> Result<(), MetricError> {
    if rendered.len() != reference.len() {
        return Err(MetricError::CountMismatch {
            rendered: rendered.len(),
            reference: reference.len(),
        });
    }
    for (a, b) in rendered.iter().zip(reference) {
        if a.dimensions() != b.dimensions() {
            return Err(MetricError::DimensionMismatch(a.dimensions(), b.dimensions()));
        }
    }
    Ok(())
}

fn gaussian_kernel() -> [f32; SSIM_WINDOW] {
    let mut kernel = [0.0; SSIM_WINDOW];
    for (i, k) in kernel.iter_mut().enumerate() {
        let x = i as f32 - SSIM_RADIUS as f32;
        *k = (-0.5 * x * x / (SSIM_SIGMA * SSIM_SIGMA)).exp();
    }
    let sum: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}

fn plane(image: &Rgb32FImage, channel: usize) -> Vec<f32> {
    image.pixels().map(|p| p.0[channel]).collect()
}

/// Half-sample symmetric index: `d c b a | a b c d | d c b a`.
fn reflect(i: isize, n: usize) -> usize {
    let n = n as isize;
    let mut i = i;
    if i < 0 {
        i = -i - 1;
    }
    if i >= n {
        i = 2 * n - i - 1;
    }
    i as usize
}

/// Separable Gaussian filter with reflected borders.
fn filter(data: &[f32], w: usize, h: usize, kernel: &[f32; SSIM_WINDOW]) -> Vec<f32> {
    let r = SSIM_RADIUS as isize;
    let mut rows = vec![0.0; data.len()];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = reflect(x as isize + k as isize - r, w);
                acc += weight * data[y * w + sx];
            }
            rows[y * w + x] = acc;
        }
    }
    let mut out = vec![0.0; data.len()];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = reflect(y as isize + k as isize - r, h);
                acc += weight * rows[sy * w + x];
            }
            out[y * w + x] = acc;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient(w: u32, h: u32, offset: f32) -> Rgb32FImage {
        Rgb32FImage::from_fn(w, h, |x, y| {
            let v = ((x + 2 * y) as f32 / (w + 2 * h) as f32 + offset).clamp(0.0, 1.0);
            Rgb([v, 1.0 - v, 0.5 * v])
        })
    }

    fn noise(w: u32, h: u32) -> Rgb32FImage {
        Rgb32FImage::from_fn(w, h, |x, y| {
            let v = ((x * 7919 + y * 104_729) % 97) as f32 / 96.0;
            Rgb([v, v, v])
        })
    }

    #[test]
    fn test_psnr_known_value() {
        let a = vec![Rgb32FImage::from_pixel(4, 4, Rgb([0.5, 0.5, 0.5]))];
        let b = vec![Rgb32FImage::from_pixel(4, 4, Rgb([0.6, 0.6, 0.6]))];
        // mse = 0.01
        assert!((psnr(&a, &b).unwrap() - 20.0).abs() < 1e-3);
    }

    #[test]
    fn test_psnr_count_mismatch() {
        let a = vec![Rgb32FImage::new(2, 2)];
        assert!(matches!(psnr(&a, &[]), Err(MetricError::CountMismatch { .. })));
    }

    #[test]
    fn test_ssim_identical_is_one() {
        let img = gradient(16, 12, 0.0);
        assert!((ssim(&img, &img).unwrap() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_ssim_degrades_with_noise() {
        let img = gradient(16, 16, 0.0);
        let shifted = gradient(16, 16, 0.05);
        let s_shift = ssim(&img, &shifted).unwrap();
        let s_noise = ssim(&img, &noise(16, 16)).unwrap();
        assert!(s_shift < 1.0);
        assert!(s_noise < s_shift);
    }

    #[test]
    fn test_ssim_rejects_small_images() {
        let img = Rgb32FImage::new(8, 8);
        assert!(ssim(&img, &img).is_err());
    }

    #[test]
    fn test_structural_dissimilarity_range() {
        let a = vec![gradient(12, 12, 0.0), gradient(12, 12, 0.0)];
        let b = vec![gradient(12, 12, 0.0), noise(12, 12)];
        let d = StructuralDissimilarity.distances(&a, &b).unwrap();
        assert!(d[0].abs() < 1e-4);
        assert!(d[1] > 0.0 && d[1] <= 1.0);
    }

    #[test]
    fn test_reflect_indexing() {
        assert_eq!(reflect(-1, 5), 0);
        assert_eq!(reflect(-2, 5), 1);
        assert_eq!(reflect(5, 5), 4);
        assert_eq!(reflect(6, 5), 3);
    }
}
