//! 4-D float tensors with shared ownership.

use std::io::{Read, Write};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::reader::{BinReader, BinWriter};

/// A `(n, c, h, w)` tensor of f32 values. Cloning shares the underlying
/// data; mutation replaces it.
#[derive(Debug, Clone)]
pub struct Blob {
    shape: [usize; 4],
    data: Arc<Vec<f32>>,
}

impl Blob {
    pub fn new(n: usize, c: usize, h: usize, w: usize) -> Self {
        Self {
            shape: [n, c, h, w],
            data: Arc::new(vec![0.0; n * c * h * w]),
        }
    }

    pub fn from_data(n: usize, c: usize, h: usize, w: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != n * c * h * w {
            return Err(Error::InvalidArgument(format!(
                "blob data length {} does not match shape ({},{},{},{})",
                data.len(),
                n,
                c,
                h,
                w
            )));
        }
        Ok(Self {
            shape: [n, c, h, w],
            data: Arc::new(data),
        })
    }

    /// Deserialize shape and data from a model stream.
    pub fn from_reader<R: Read>(reader: &mut BinReader<R>) -> Result<Self> {
        let mut shape = [0usize; 4];
        for s in shape.iter_mut() {
            *s = reader.read_count("blob dimension")?;
        }
        let count = shape.iter().product();
        let data = reader.read_f32_vec(count)?;
        Ok(Self {
            shape,
            data: Arc::new(data),
        })
    }

    /// Serialize shape and data in the format [`from_reader`] parses.
    pub fn write<W: Write>(&self, writer: &mut BinWriter<W>) -> Result<()> {
        for s in &self.shape {
            writer.write_i32(*s as i32)?;
        }
        writer.write_f32_slice(&self.data)?;
        Ok(())
    }

    pub fn num(&self) -> usize {
        self.shape[0]
    }

    pub fn channels(&self) -> usize {
        self.shape[1]
    }

    pub fn height(&self) -> usize {
        self.shape[2]
    }

    pub fn width(&self) -> usize {
        self.shape[3]
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn count(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn offset(&self, n: usize, c: usize, h: usize, w: usize) -> usize {
        debug_assert!(n < self.shape[0] && c < self.shape[1] && h < self.shape[2] && w < self.shape[3]);
        ((n * self.shape[1] + c) * self.shape[2] + h) * self.shape[3] + w
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Update the shape. Data is preserved when the element count is
    /// unchanged and zeroed otherwise.
    pub fn reshape(&mut self, n: usize, c: usize, h: usize, w: usize) {
        let new_count = n * c * h * w;
        if new_count != self.data.len() {
            self.data = Arc::new(vec![0.0; new_count]);
        }
        self.shape = [n, c, h, w];
    }

    /// Reorder axes: `order[i]` names the old axis that becomes axis `i`.
    /// The data is rewritten through a scratch copy.
    pub fn permute(&mut self, order: [usize; 4]) {
        let old_shape = self.shape;
        let mut new_shape = [0usize; 4];
        for i in 0..4 {
            new_shape[i] = old_shape[order[i]];
        }

        let mut scratch = vec![0.0f32; self.data.len()];
        let mut cnt = 0;
        let mut old_idx = [0usize; 4];
        for i0 in 0..new_shape[0] {
            for i1 in 0..new_shape[1] {
                for i2 in 0..new_shape[2] {
                    for i3 in 0..new_shape[3] {
                        let new_idx = [i0, i1, i2, i3];
                        for axis in 0..4 {
                            old_idx[order[axis]] = new_idx[axis];
                        }
                        scratch[cnt] =
                            self.data[self.offset(old_idx[0], old_idx[1], old_idx[2], old_idx[3])];
                        cnt += 1;
                    }
                }
            }
        }

        self.shape = new_shape;
        self.data = Arc::new(scratch);
    }

    /// Widening conversion from interleaved bytes.
    pub fn from_bytes(n: usize, c: usize, h: usize, w: usize, src: &[u8]) -> Self {
        let count = n * c * h * w;
        let mut data = Vec::with_capacity(count);
        data.extend(src[..count].iter().map(|v| f32::from(*v)));
        Self {
            shape: [n, c, h, w],
            data: Arc::new(data),
        }
    }

    /// Widening copy from interleaved bytes.
    pub fn copy_from_bytes(&mut self, n: usize, c: usize, h: usize, w: usize, src: &[u8]) {
        *self = Self::from_bytes(n, c, h, w, src);
    }

    /// Saturating copy out: clamp to [0, 255] and truncate.
    pub fn copy_to_bytes(&self, dest: &mut [u8]) {
        for (d, s) in dest.iter_mut().zip(self.data.iter()) {
            *d = s.clamp(0.0, 255.0) as u8;
        }
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.data.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reshape_with_same_count_preserves_elements() {
        let data: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let mut blob = Blob::from_data(1, 3, 2, 2, data).unwrap();
        blob.reshape(1, 2, 3, 2);
        assert_eq!(blob.count(), 12);
        assert_eq!(blob.data()[0], 0.0);
        assert_eq!(blob.data()[11], 11.0);
        assert_eq!(blob.shape(), [1, 2, 3, 2]);
    }

    #[test]
    fn reshape_with_different_count_zeroes() {
        let mut blob = Blob::from_data(1, 1, 2, 2, vec![1.0; 4]).unwrap();
        blob.reshape(1, 1, 3, 3);
        assert_eq!(blob.count(), 9);
        assert!(blob.data().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn permute_transposes_axes() {
        // (1, 1, 2, 3) -> transpose h and w -> (1, 1, 3, 2).
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut blob = Blob::from_data(1, 1, 2, 3, data).unwrap();
        blob.permute([0, 1, 3, 2]);
        assert_eq!(blob.shape(), [1, 1, 3, 2]);
        assert_eq!(blob.data(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn permute_composition_matches_composed_permutation() {
        let data: Vec<f32> = (0..24).map(|v| v as f32).collect();
        let base = Blob::from_data(2, 3, 2, 2, data).unwrap();

        let sigma1 = [1, 0, 3, 2];
        let sigma2 = [3, 2, 1, 0];
        // Applying sigma1 then sigma2 equals applying their composition
        // sigma1 . sigma2 directly.
        let mut step = base.clone();
        step.permute(sigma1);
        step.permute(sigma2);

        let mut composed = base.clone();
        let mut sigma = [0usize; 4];
        for i in 0..4 {
            sigma[i] = sigma1[sigma2[i]];
        }
        composed.permute(sigma);

        assert_eq!(step.shape(), composed.shape());
        assert_eq!(step.data(), composed.data());
    }

    #[test]
    fn byte_round_trip_saturates() {
        let mut blob = Blob::new(1, 1, 1, 4);
        blob.copy_from_bytes(1, 1, 1, 4, &[0, 100, 200, 255]);
        assert_eq!(blob.data(), &[0.0, 100.0, 200.0, 255.0]);

        let blob = Blob::from_data(1, 1, 1, 4, vec![-5.0, 0.4, 254.6, 300.0]).unwrap();
        let mut bytes = [0u8; 4];
        blob.copy_to_bytes(&mut bytes);
        assert_eq!(bytes, [0, 0, 254, 255]);
    }

    #[test]
    fn serialization_round_trip() {
        let data: Vec<f32> = (0..8).map(|v| v as f32 * 0.5).collect();
        let blob = Blob::from_data(1, 2, 2, 2, data).unwrap();

        let mut buf = Vec::new();
        blob.write(&mut BinWriter::new(&mut buf)).unwrap();
        let read = Blob::from_reader(&mut BinReader::new(buf.as_slice())).unwrap();
        assert_eq!(read.shape(), blob.shape());
        assert_eq!(read.data(), blob.data());
    }
}
