//! Weight normalization for dialects that require a closed distribution.

/// Result of normalizing a weight list to a fixed total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub weights: Vec<u32>,
    /// False when the input already summed to the total.
    pub changed: bool,
}

/// Scales `weights` to sum exactly to `total` using the largest-remainder
/// method. Ties are broken by position so the result is deterministic. An
/// all-zero input is spread evenly.
pub fn normalize(weights: &[u32], total: u32) -> Normalized {
    if weights.is_empty() {
        return Normalized {
            weights: Vec::new(),
            changed: false,
        };
    }

    let sum: u64 = weights.iter().map(|w| u64::from(*w)).sum();
    if sum == u64::from(total) {
        return Normalized {
            weights: weights.to_vec(),
            changed: false,
        };
    }

    let source: Vec<u64> = if sum == 0 {
        vec![1; weights.len()]
    } else {
        weights.iter().map(|w| u64::from(*w)).collect()
    };
    let source_sum: u64 = source.iter().sum();

    let mut scaled: Vec<(usize, u64, u64)> = source
        .iter()
        .enumerate()
        .map(|(i, w)| {
            let numerator = w * u64::from(total);
            (i, numerator / source_sum, numerator % source_sum)
        })
        .collect();

    let assigned: u64 = scaled.iter().map(|(_, q, _)| q).sum();
    let mut remaining = u64::from(total).saturating_sub(assigned);

    let mut order: Vec<usize> = (0..scaled.len()).collect();
    order.sort_by(|a, b| scaled[*b].2.cmp(&scaled[*a].2).then(a.cmp(b)));
    for idx in order {
        if remaining == 0 {
            break;
        }
        scaled[idx].1 += 1;
        remaining -= 1;
    }

    Normalized {
        weights: scaled.into_iter().map(|(_, q, _)| q as u32).collect(),
        changed: true,
    }
}

/// Percentage share of each weight as a float, for dialects that take
/// fractional percentages (e.g. `split_clients`).
pub fn percentages(weights: &[u32]) -> Vec<f64> {
    let sum: u64 = weights.iter().map(|w| u64::from(*w)).sum();
    if sum == 0 {
        let even = 100.0 / weights.len().max(1) as f64;
        return vec![even; weights.len()];
    }
    weights
        .iter()
        .map(|w| f64::from(*w) * 100.0 / sum as f64)
        .collect()
}

/// Human-readable description of a normalization, for diagnostics.
pub fn describe(before: &[u32], after: &[u32]) -> String {
    let join = |ws: &[u32]| {
        ws.iter()
            .map(|w| w.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!("weights [{}] normalized to [{}]", join(before), join(after))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_to_one_becomes_percentages() {
        let n = normalize(&[2, 1], 100);
        assert!(n.changed);
        assert_eq!(n.weights, vec![67, 33]);
        assert_eq!(n.weights.iter().sum::<u32>(), 100);
    }

    #[test]
    fn already_closed_distribution_is_untouched() {
        let n = normalize(&[70, 30], 100);
        assert!(!n.changed);
        assert_eq!(n.weights, vec![70, 30]);
    }

    #[test]
    fn all_zero_is_spread_evenly() {
        let n = normalize(&[0, 0, 0], 100);
        assert_eq!(n.weights, vec![34, 33, 33]);
    }

    #[test]
    fn percentages_sum_to_hundred() {
        let p = percentages(&[1, 1, 2]);
        assert!((p.iter().sum::<f64>() - 100.0).abs() < 1e-9);
        assert!((p[2] - 50.0).abs() < 1e-9);
    }
}
