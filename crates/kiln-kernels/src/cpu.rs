//! Host math kernels over typed slices.
//!
//! These are the CPU halves of the primitives the execution contexts expose.
//! Large buffers are split across the rayon pool; small ones stay on the
//! calling thread where a fork/join would cost more than the work.

use kiln_core::{Element, KilnError, Result};
use rayon::prelude::*;

/// Minimum elements before we use rayon parallelism.
const PAR_THRESHOLD: usize = 1 << 16;

/// Set the first `count` elements of `y` to `value`.
pub fn fill<T: Element>(count: usize, value: T, y: &mut [T]) -> Result<()> {
    let y = prefix_mut(y, count, "fill")?;
    if count >= PAR_THRESHOLD {
        y.par_iter_mut().for_each(|v| *v = value);
    } else {
        y.fill(value);
    }
    Ok(())
}

/// Copy the first `count` elements of `x` into `y`.
pub fn copy<T: Element>(count: usize, x: &[T], y: &mut [T]) -> Result<()> {
    if x.len() < count {
        return Err(KilnError::ShapeMismatch {
            expected: vec![count],
            got: vec![x.len()],
        });
    }
    let y = prefix_mut(y, count, "copy")?;
    y.copy_from_slice(&x[..count]);
    Ok(())
}

/// Scatter `on_value` into a `[count, depth]` row-major output.
///
/// Row `p` receives `on_value` at column `x[p]` (truncated toward zero).
/// Indices outside `[0, depth)` leave their row untouched; callers that
/// treat those as errors validate with [`find_out_of_range`] first.
pub fn one_hot<T: Element>(count: usize, depth: usize, on_value: T, x: &[T], y: &mut [T]) -> Result<()> {
    if x.len() < count {
        return Err(KilnError::ShapeMismatch {
            expected: vec![count],
            got: vec![x.len()],
        });
    }
    let y = prefix_mut(y, count * depth, "one_hot")?;
    if depth == 0 {
        return Ok(());
    }
    let scatter = |(row, &idx): (&mut [T], &T)| {
        let v = idx.to_f32().trunc();
        if v >= 0.0 && (v as usize) < depth {
            row[v as usize] = on_value;
        }
    };
    if count * depth >= PAR_THRESHOLD {
        y.par_chunks_mut(depth).zip(x[..count].par_iter()).for_each(scatter);
    } else {
        y.chunks_mut(depth).zip(x[..count].iter()).for_each(scatter);
    }
    Ok(())
}

/// Position and value of the first index outside `[0, depth)`.
pub fn find_out_of_range<T: Element>(x: &[T], depth: usize) -> Option<(usize, f32)> {
    x.iter().enumerate().find_map(|(p, &idx)| {
        let v = idx.to_f32().trunc();
        // NaN fails both comparisons and is reported as out of range.
        if v >= 0.0 && v < depth as f32 {
            None
        } else {
            Some((p, idx.to_f32()))
        }
    })
}

fn prefix_mut<'a, T>(y: &'a mut [T], count: usize, what: &str) -> Result<&'a mut [T]> {
    let len = y.len();
    y.get_mut(..count).ok_or_else(|| {
        KilnError::StorageError(format!(
            "{what}: output holds {len} elements, {count} requested"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::f16;

    #[test]
    fn test_fill() {
        let mut y = vec![0.0f32; 5];
        fill(3, 2.5, &mut y).unwrap();
        assert_eq!(y, vec![2.5, 2.5, 2.5, 0.0, 0.0]);
    }

    #[test]
    fn test_fill_large_parallel() {
        let n = PAR_THRESHOLD + 17;
        let mut y = vec![0.0f32; n];
        fill(n, -1.0, &mut y).unwrap();
        assert!(y.iter().all(|&v| v == -1.0));
    }

    #[test]
    fn test_fill_too_short() {
        let mut y = vec![0.0f32; 2];
        assert!(fill(3, 1.0, &mut y).is_err());
    }

    #[test]
    fn test_copy_f16() {
        let x: Vec<f16> = [1.0f32, -2.0, 3.5].iter().map(|&v| f16::from_f32(v)).collect();
        let mut y = vec![f16::ZERO; 3];
        copy(3, &x, &mut y).unwrap();
        assert_eq!(x, y);
    }

    #[test]
    fn test_copy_source_too_short() {
        let mut y = vec![0.0f32; 4];
        assert!(matches!(
            copy(4, &[1.0, 2.0], &mut y),
            Err(KilnError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_one_hot() {
        let x = [2.0f32, 0.0, 3.0];
        let mut y = vec![0.0f32; 12];
        one_hot(3, 4, 1.0, &x, &mut y).unwrap();
        assert_eq!(
            y,
            vec![
                0.0, 0.0, 1.0, 0.0, //
                1.0, 0.0, 0.0, 0.0, //
                0.0, 0.0, 0.0, 1.0,
            ]
        );
    }

    #[test]
    fn test_one_hot_skips_out_of_range() {
        let x = [5.0f32, -1.0];
        let mut y = vec![0.0f32; 6];
        one_hot(2, 3, 1.0, &x, &mut y).unwrap();
        assert!(y.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_find_out_of_range() {
        assert_eq!(find_out_of_range(&[0.0f32, 3.0, 1.0], 4), None);
        assert_eq!(find_out_of_range(&[0.0f32, 4.0, 1.0], 4), Some((1, 4.0)));
        assert_eq!(find_out_of_range(&[-1.0f32], 4), Some((0, -1.0)));
        assert_eq!(find_out_of_range(&[3.9f32], 4), None);
        assert!(find_out_of_range(&[f32::NAN], 4).is_some());
    }
}
