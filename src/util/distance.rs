//! Distance helpers used by quantizers.

/// Squared Euclidean distance between two equally sized slices.
#[inline]
pub fn euclidean_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}

/// Index of the centroid closest to `vector`, or `None` when there are none.
///
/// Ties resolve to the lowest index; NaN distances never win.
pub fn nearest_centroid<C: AsRef<[f32]>>(vector: &[f32], centroids: &[C]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, centroid) in centroids.iter().enumerate() {
        let dist = euclidean_squared(vector, centroid.as_ref());
        if dist.is_nan() {
            continue;
        }
        if best.is_none_or(|(_, best_dist)| dist < best_dist) {
            best = Some((idx, dist));
        }
    }
    best.map(|(idx, _)| idx)
}

/// Dot product of two equally sized slices.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(&x, &y)| x * y).sum()
}
