//! Scalar math kernels shared by the feature maps and the classifiers.
//!
//! Integral-image arithmetic deliberately uses wrapping operations: prefix
//! sums over large images may exceed `i32`, but corner differences of the
//! wrapped values are still exact as long as the rectangle sum itself fits.

/// Widen unsigned bytes into 32-bit signed integers.
pub fn u8_to_i32(src: &[u8], dest: &mut [i32]) {
    for (d, s) in dest.iter_mut().zip(src.iter()) {
        *d = i32::from(*s);
    }
}

/// Element-wise accumulate `z += x`.
pub fn vector_add(x: &[i32], z: &mut [i32]) {
    for (z, x) in z.iter_mut().zip(x.iter()) {
        *z = z.wrapping_add(*x);
    }
}

/// Element-wise `z = x - y`.
pub fn vector_sub(x: &[i32], y: &[i32], z: &mut [i32]) {
    for ((z, x), y) in z.iter_mut().zip(x.iter()).zip(y.iter()) {
        *z = x.wrapping_sub(*y);
    }
}

/// Element-wise absolute value.
pub fn vector_abs(src: &[i32], dest: &mut [i32]) {
    for (d, s) in dest.iter_mut().zip(src.iter()) {
        *d = s.wrapping_abs();
    }
}

/// Element-wise square, widened into unsigned 32-bit.
pub fn square(src: &[i32], dest: &mut [u32]) {
    for (d, s) in dest.iter_mut().zip(src.iter()) {
        *d = (*s as u32).wrapping_mul(*s as u32);
    }
}

/// Inner product of two equally sized f32 slices.
pub fn vector_inner_product(x: &[f32], y: &[f32]) -> f32 {
    debug_assert_eq!(x.len(), y.len());
    let mut prod = 0.0f32;
    for (a, b) in x.iter().zip(y.iter()) {
        prod += a * b;
    }
    prod
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widen_bytes() {
        let src = [0u8, 1, 128, 255];
        let mut dest = [0i32; 4];
        u8_to_i32(&src, &mut dest);
        assert_eq!(dest, [0, 1, 128, 255]);
    }

    #[test]
    fn add_sub_abs() {
        let x = [1, -2, 3];
        let y = [4, 5, -6];
        let mut z = [0i32; 3];

        vector_sub(&x, &y, &mut z);
        assert_eq!(z, [-3, -7, 9]);

        vector_add(&x, &mut z);
        assert_eq!(z, [-2, -9, 12]);

        vector_abs(&z.clone(), &mut z);
        assert_eq!(z, [2, 9, 12]);
    }

    #[test]
    fn square_widens() {
        let src = [0, 255, -255];
        let mut dest = [0u32; 3];
        square(&src, &mut dest);
        assert_eq!(dest, [0, 65025, 65025]);
    }

    #[test]
    fn inner_product() {
        let x = [1.0f32, 2.0, 3.0];
        let y = [4.0f32, 5.0, 6.0];
        assert!((vector_inner_product(&x, &y) - 32.0).abs() < 1e-6);
    }

    #[test]
    fn wrapping_sums_cancel() {
        // Differences of wrapped prefix sums recover the exact value.
        let big = i32::MAX - 10;
        let a = big.wrapping_add(100);
        assert_eq!(a.wrapping_sub(big), 100);
    }
}
