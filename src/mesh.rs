use num_traits::{Num, NumAssignOps};

/// Iterates over every multi-index `[i_1, ..., i_D]` of a control mesh with
/// `shape[k]` coefficients along direction `k`, in flat-mesh order: the
/// last direction varies fastest, matching `strides_for`. Empty when any
/// direction has extent zero.
pub fn mesh_indices_excl<const D: usize, T>(shape: [T; D]) -> impl Iterator<Item = [T; D]>
where
    T: Num + NumAssignOps + Copy + PartialOrd,
{
    let mut cursor = shape
        .iter()
        .all(|&s| s > T::zero())
        .then_some([T::zero(); D]);

    std::iter::from_fn(move || {
        let current = cursor?;

        // Odometer advance; when every direction wraps the walk is over.
        let mut advanced = false;
        if let Some(index) = cursor.as_mut() {
            for d in (0..D).rev() {
                index[d] += T::one();
                if index[d] < shape[d] {
                    advanced = true;
                    break;
                }
                index[d] = T::zero();
            }
        }
        if !advanced {
            cursor = None;
        }

        Some(current)
    })
}

/// As `mesh_indices_excl`, but with `0 <= i_k <= shape[k]` per direction.
/// Convenient when `shape` holds degrees rather than coefficient counts.
pub fn mesh_indices_incl<const D: usize, T>(shape: [T; D]) -> impl Iterator<Item = [T; D]>
where
    T: Num + NumAssignOps + Copy + PartialOrd,
{
    mesh_indices_excl(shape.map(|s| s + T::one()))
}

/// Stride lengths for each direction of a flattened mesh, last direction
/// contiguous.
pub fn strides_for<const D: usize>(shape: [usize; D]) -> [usize; D] {
    let mut strides = [1usize; D];
    for i in (0..D.saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

#[cfg(test)]
mod tests {
    use pretty_assertions as pa;

    use super::*;

    #[test]
    fn exclusive_walks_in_flat_order() {
        let indexes = mesh_indices_excl([2u8, 3]).collect::<Vec<_>>();

        pa::assert_eq!(
            indexes,
            vec![[0, 0], [0, 1], [0, 2], [1, 0], [1, 1], [1, 2]]
        );
    }

    #[test]
    fn inclusive_covers_both_ends() {
        let indexes = mesh_indices_incl([3u8]).collect::<Vec<_>>();
        pa::assert_eq!(indexes, vec![[0], [1], [2], [3]]);
    }

    #[test]
    fn zero_extent_yields_nothing() {
        pa::assert_eq!(mesh_indices_excl([2usize, 0]).count(), 0);
    }

    #[test]
    fn indices_match_stride_offsets() {
        let shape = [3usize, 2, 4];
        let strides = strides_for(shape);
        for (flat, index) in mesh_indices_excl(shape).enumerate() {
            let offset: usize = (0..3).map(|d| index[d] * strides[d]).sum();
            pa::assert_eq!(offset, flat);
        }
    }

    #[test]
    fn strides_last_fastest() {
        pa::assert_eq!(strides_for([4, 3, 2]), [6, 2, 1]);
        pa::assert_eq!(strides_for([5]), [1]);
    }
}
