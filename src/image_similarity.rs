use image::{DynamicImage, GenericImageView};
use rayon::prelude::*;
use std::path::Path;

const SIMILARITY_SIDE: u32 = 64;
const SSIM_C1: f64 = 6.5025;
const SSIM_C2: f64 = 58.5225;

/// Compute the best (maximum) SSIM score between `candidate` and every
/// image file in `blocklist_dir`. Returns `0.0` if the folder is
/// missing, empty, or unreadable — a read failure here must never
/// block the request.
pub fn best_similarity_against_folder(candidate_bytes: &[u8], blocklist_dir: &Path) -> f64 {
    let Ok(candidate_img) = image::load_from_memory(candidate_bytes) else {
        return 0.0;
    };
    let candidate_gray = prepare(&candidate_img);

    let Ok(entries) = std::fs::read_dir(blocklist_dir) else {
        return 0.0;
    };

    let paths: Vec<_> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();

    paths
        .par_iter()
        .filter_map(|path| {
            let bytes = std::fs::read(path).ok()?;
            let img = image::load_from_memory(&bytes).ok()?;
            let gray = prepare(&img);
            Some(ssim(&candidate_gray, &gray))
        })
        .reduce(|| 0.0, f64::max)
}

/// Grayscale, square-pad, and resize to a fixed comparison size so SSIM can
/// be computed between images of differing dimensions and aspect ratios.
fn prepare(img: &DynamicImage) -> Vec<f64> {
    let (w, h) = img.dimensions();
    let side = w.max(h).max(1);

    let mut square = image::RgbaImage::from_pixel(side, side, image::Rgba([0, 0, 0, 255]));
    let offset_x = (side - w) / 2;
    let offset_y = (side - h) / 2;
    image::imageops::overlay(&mut square, &img.to_rgba8(), offset_x as i64, offset_y as i64);

    let resized = image::imageops::resize(
        &square,
        SIMILARITY_SIDE,
        SIMILARITY_SIDE,
        image::imageops::FilterType::Triangle,
    );

    image::DynamicImage::ImageRgba8(resized)
        .to_luma8()
        .pixels()
        .map(|p| p[0] as f64)
        .collect()
}

/// Single-window (whole-image) SSIM between two equal-length grayscale
/// pixel buffers, per the standard SSIM formula.
fn ssim(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let n = a.len() as f64;

    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let var_a = a.iter().map(|v| (v - mean_a).powi(2)).sum::<f64>() / n;
    let var_b = b.iter().map(|v| (v - mean_b).powi(2)).sum::<f64>() / n;
    let covar = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (x - mean_a) * (y - mean_b))
        .sum::<f64>()
        / n;

    let numerator = (2.0 * mean_a * mean_b + SSIM_C1) * (2.0 * covar + SSIM_C2);
    let denominator = (mean_a.powi(2) + mean_b.powi(2) + SSIM_C1) * (var_a + var_b + SSIM_C2);

    numerator / denominator
}
