// src/enhancement.rs
//
// Frame contrast enhancement ahead of the reasoning pipeline. Improves
// marking/signal visibility under fog, rain, and glare by equalizing the
// luma histogram, with optional gamma correction for underexposed feeds.

use crate::types::Frame;

pub struct ImageEnhancer {
    gamma_lut: [u8; 256],
}

impl Default for ImageEnhancer {
    fn default() -> Self {
        Self::new(1.2)
    }
}

impl ImageEnhancer {
    pub fn new(gamma: f64) -> Self {
        let inv_gamma = 1.0 / gamma;
        let mut lut = [0u8; 256];
        for (i, entry) in lut.iter_mut().enumerate() {
            *entry = (255.0 * (i as f64 / 255.0).powf(inv_gamma)).round() as u8;
        }
        Self { gamma_lut: lut }
    }

    pub fn apply_gamma_correction(&self, frame: &Frame) -> Frame {
        let data = frame.data.iter().map(|&v| self.gamma_lut[v as usize]).collect();
        Frame::new(data, frame.width, frame.height, frame.timestamp)
    }

    /// Equalize the luma histogram, scaling RGB channels proportionally so
    /// hue is preserved.
    pub fn enhance_visibility(&self, frame: &Frame) -> Frame {
        let n = frame.width * frame.height;
        if n == 0 {
            return frame.clone();
        }

        let mut hist = [0u32; 256];
        let mut lumas = Vec::with_capacity(n);
        for pixel in frame.data.chunks_exact(3) {
            let l = luma(pixel[0], pixel[1], pixel[2]);
            hist[l as usize] += 1;
            lumas.push(l);
        }

        // Standard CDF remap, anchored at the darkest occupied bin
        let mut cdf = [0u32; 256];
        let mut running = 0u32;
        for (i, &count) in hist.iter().enumerate() {
            running += count;
            cdf[i] = running;
        }
        let cdf_min = cdf
            .iter()
            .copied()
            .find(|&c| c > 0)
            .unwrap_or(0);
        let denom = (n as u32).saturating_sub(cdf_min).max(1);

        let mut remap = [0u8; 256];
        for i in 0..256 {
            let num = cdf[i].saturating_sub(cdf_min) as f64;
            remap[i] = ((num / denom as f64) * 255.0).round() as u8;
        }

        let mut data = Vec::with_capacity(frame.data.len());
        for (pixel, &l) in frame.data.chunks_exact(3).zip(lumas.iter()) {
            if l == 0 {
                data.extend_from_slice(pixel);
                continue;
            }
            let scale = remap[l as usize] as f32 / l as f32;
            for &c in pixel {
                data.push((c as f32 * scale).min(255.0) as u8);
            }
        }
        Frame::new(data, frame.width, frame.height, frame.timestamp)
    }

    pub fn preprocess(&self, frame: &Frame) -> Frame {
        // Equalization alone is usually enough for local contrast; gamma
        // stays available for persistently dark feeds.
        self.enhance_visibility(frame)
    }
}

#[inline]
fn luma(r: u8, g: u8, b: u8) -> u8 {
    // ITU-R BT.601
    (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimensions_preserved() {
        let frame = Frame::black(64, 32, 0.0);
        let out = ImageEnhancer::default().preprocess(&frame);
        assert_eq!(out.width, 64);
        assert_eq!(out.height, 32);
        assert_eq!(out.data.len(), frame.data.len());
    }

    #[test]
    fn test_black_stays_black() {
        let frame = Frame::black(16, 16, 0.0);
        let out = ImageEnhancer::default().preprocess(&frame);
        assert!(out.data.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_equalization_expands_low_contrast_range() {
        // Half the pixels at luma 100, half at 110 — a compressed range
        let mut frame = Frame::black(32, 2, 0.0);
        for x in 0..32 {
            frame.set_rgb(x, 0, 100, 100, 100);
            frame.set_rgb(x, 1, 110, 110, 110);
        }
        let out = ImageEnhancer::default().enhance_visibility(&frame);
        let min = out.data.iter().copied().min().unwrap();
        let max = out.data.iter().copied().max().unwrap();
        assert!(max as i32 - min as i32 > 100, "range {}..{}", min, max);
    }

    #[test]
    fn test_gamma_brightens_midtones() {
        let mut frame = Frame::black(4, 1, 0.0);
        for x in 0..4 {
            frame.set_rgb(x, 0, 64, 64, 64);
        }
        let out = ImageEnhancer::new(2.0).apply_gamma_correction(&frame);
        assert!(out.rgb(0, 0).0 > 64);
    }
}
