use rayon::prelude::*;

/// Smallest useful distance threshold.
pub const MIN_SIMILARITY_64: u32 = 1;
// 30 bits for 64-bit hash (approx 47% difference). Anything looser groups unrelated images.
pub const MAX_SIMILARITY_64: u32 = 30;

/// Trait to support generic Hamming distance grouping.
pub trait HammingHash: Copy + Send + Sync + 'static {
    fn hamming_distance(&self, other: &Self) -> u32;
}

// --- Implementation for 64-bit pHash ---
impl HammingHash for u64 {
    #[inline(always)]
    fn hamming_distance(&self, other: &Self) -> u32 {
        (*self ^ *other).count_ones()
    }
}

// --- Main Grouping Function ---

/// Connected components of the graph where two hashes are adjacent iff their
/// distance is at most `max_dist`. Returns index lists of size > 1, each sorted,
/// in order of their smallest index.
///
/// Every ordered pair is compared, so the adjacency is symmetric even if a
/// `HammingHash` impl were not.
pub fn find_groups<H: HammingHash>(hashes: &[H], max_dist: u32) -> Vec<Vec<u32>> {
    let n = hashes.len();

    // Step 1: Parallel exhaustive neighbor discovery
    let adjacency: Vec<Vec<u32>> = hashes
        .par_iter()
        .enumerate()
        .map(|(i, query)| {
            hashes.iter()
                .enumerate()
                .filter(|&(j, cand)| j != i && (query.hamming_distance(cand) <= max_dist || cand.hamming_distance(query) <= max_dist))
                .map(|(j, _)| j as u32)
                .collect()
        })
        .collect();

    // Step 2: Transitive closure (DFS over adjacency)
    let mut visited = vec![false; n];
    let mut groups = Vec::new();

    for i in 0..n {
        if visited[i] { continue; }
        if adjacency[i].is_empty() { continue; }

        let mut group = vec![i as u32];
        visited[i] = true;
        let mut stack = adjacency[i].clone();

        while let Some(neighbor) = stack.pop() {
            if !visited[neighbor as usize] {
                visited[neighbor as usize] = true;
                group.push(neighbor);
                stack.extend_from_slice(&adjacency[neighbor as usize]);
            }
        }
        if group.len() > 1 {
            group.sort_unstable();
            groups.push(group);
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    #[test]
    fn test_distance_is_popcount_of_xor() {
        assert_eq!(0u64.hamming_distance(&0), 0);
        assert_eq!(0u64.hamming_distance(&0xFFF), 12);
        assert_eq!(u64::MAX.hamming_distance(&0), 64);
        assert_eq!(0xF0u64.hamming_distance(&0x0F), 8);
    }

    #[test]
    fn test_high_similarity_support() {
        let base = 0u64;
        // Create a target distance 30 away
        let target: u64 = (1 << 30) - 1;
        assert_eq!(target.count_ones(), 30);

        let groups = find_groups(&[base, target], 30);
        assert_eq!(groups, vec![vec![0, 1]]);

        let groups = find_groups(&[base, target], 29);
        assert!(groups.is_empty());
    }

    #[test]
    fn test_chain_is_transitive() {
        // d(a,b)=8, d(b,c)=8, d(a,c)=16
        let a = 0u64;
        let b = 0xFFu64;
        let c = 0xFFFFu64;
        let groups = find_groups(&[a, b, c], 10);
        assert_eq!(groups, vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_isolated_hashes_are_not_grouped() {
        let groups = find_groups(&[0u64, u64::MAX, 0x00FF_00FF_00FF_00FF], 5);
        assert!(groups.is_empty());
    }

    #[test]
    fn test_random_pairs_within_threshold_share_a_group() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut hashes: Vec<u64> = (0..300).map(|_| rng.random()).collect();

        // Plant a few near copies so the test exercises real merges
        for i in 0..20 {
            let src = hashes[i];
            hashes.push(src ^ (1u64 << rng.random_range(0..64u32)));
        }

        let max_dist = 6;
        let groups = find_groups(&hashes, max_dist);

        let mut owner = vec![None; hashes.len()];
        for (g_idx, group) in groups.iter().enumerate() {
            assert!(group.len() > 1);
            for &m in group {
                assert!(owner[m as usize].is_none(), "index {} in two groups", m);
                owner[m as usize] = Some(g_idx);
            }
        }

        for i in 0..hashes.len() {
            for j in (i + 1)..hashes.len() {
                if hashes[i].hamming_distance(&hashes[j]) <= max_dist {
                    assert!(owner[i].is_some());
                    assert_eq!(owner[i], owner[j], "pair ({}, {}) split", i, j);
                }
            }
        }
    }
}
