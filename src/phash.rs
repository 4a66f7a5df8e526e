use image::{DynamicImage, GrayImage};
use rustdct::{DctPlanner, TransformType2And3};
use std::sync::Arc;

use crate::media::Fingerprint;

//     This program is free software: you can redistribute it and/or modify it under the terms of the
//     GNU General Public License as published by the Free Software Foundation, either version 3 of
//     the License, or (at your option) any later version.
//     This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
//     without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
//     the GNU General Public License for more details.
//     You should have received a copy of the GNU General Public License along with this program.
//     If not, see <https://www.gnu.org/licenses/>.

/// Standard pHash constants
pub const DCT_SIZE: usize = 32; // Frames and images are normalized to 32x32 grayscale
const HASH_SIZE: usize = 8; // The hash is based on the top-left 8x8 low frequencies

pub struct DctPhash {
    row_dct: Arc<dyn TransformType2And3<f32>>,
    col_dct: Arc<dyn TransformType2And3<f32>>,
    scratch_len: usize,
}

impl Default for DctPhash {
    fn default() -> Self {
        Self::new()
    }
}

impl DctPhash {
    /// Plans the 32-point DCTs once; reuse the hasher across files.
    pub fn new() -> Self {
        let mut planner = DctPlanner::new();

        let row_dct = planner.plan_dct2(DCT_SIZE);
        let col_dct = planner.plan_dct2(DCT_SIZE);

        let scratch_len = std::cmp::max(row_dct.get_scratch_len(), col_dct.get_scratch_len());
        let scratch_len = std::cmp::max(scratch_len, DCT_SIZE);

        Self { row_dct, col_dct, scratch_len }
    }

    /// Grayscale at the fixed target size. Every still image and every sampled
    /// video frame goes through here before hashing.
    pub fn normalize(img: &DynamicImage) -> GrayImage {
        img.resize_exact(DCT_SIZE as u32, DCT_SIZE as u32, image::imageops::FilterType::Triangle)
            .to_luma8()
    }

    pub fn hash_image(&self, img: &DynamicImage) -> Fingerprint {
        self.hash_normalized(&Self::normalize(img))
    }

    /// Hashes an already normalized 32x32 frame.
    pub fn hash_normalized(&self, gray: &GrayImage) -> Fingerprint {
        debug_assert_eq!(gray.dimensions(), (DCT_SIZE as u32, DCT_SIZE as u32));

        let mut pixels: Vec<f32> = gray.as_raw().iter().map(|&b| b as f32).collect();
        self.perform_dct_2d(&mut pixels);

        let low_freqs = crop_8x8(&pixels);

        // The DC term is flat luminance, keep it out of the median
        let mut sorted = low_freqs[1..].to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let median = sorted[sorted.len() / 2];

        let mut hash: u64 = 0;
        for (i, &val) in low_freqs.iter().enumerate() {
            if val > median {
                // bit 63 is (0,0), bit 0 is (7,7)
                hash |= 1 << (63 - i);
            }
        }

        Fingerprint(hash)
    }

    /// In-place 2D DCT on a 32x32 buffer
    fn perform_dct_2d(&self, buffer: &mut Vec<f32>) {
        let mut scratch = vec![0.0f32; self.scratch_len];

        for row in buffer.chunks_mut(DCT_SIZE) {
            self.row_dct.process_dct2_with_scratch(row, &mut scratch);
        }

        let mut transposed = vec![0.0f32; DCT_SIZE * DCT_SIZE];
        transpose::transpose(buffer, &mut transposed, DCT_SIZE, DCT_SIZE);

        for col in transposed.chunks_mut(DCT_SIZE) {
            self.col_dct.process_dct2_with_scratch(col, &mut scratch);
        }

        transpose::transpose(&transposed, buffer, DCT_SIZE, DCT_SIZE);
    }
}

fn crop_8x8(full_dct: &[f32]) -> Vec<f32> {
    let mut crop = Vec::with_capacity(HASH_SIZE * HASH_SIZE);
    for y in 0..HASH_SIZE {
        let start = y * DCT_SIZE;
        crop.extend_from_slice(&full_dct[start..start + HASH_SIZE]);
    }
    crop
}
