#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeBucket {
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub label: String,
}

impl RangeBucket {
    pub fn contains(&self, value: i64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }

    fn condition(&self, column: &str) -> String {
        match (self.min, self.max) {
            (Some(min), Some(max)) => format!("{column} >= {min} AND {column} <= {max}"),
            (Some(min), None) => format!("{column} >= {min}"),
            (None, Some(max)) => format!("{column} <= {max}"),
            (None, None) => "TRUE".to_string(),
        }
    }
}

pub const UNKNOWN_RANGE_LABEL: &str = "Unknown";

/// Splits `[a, b, c]` into `a-b`, `b+1-c`, `c+1+`. A leading 0 becomes an open `<b` bucket.
pub fn num_range_buckets(ranges: &[i64]) -> Vec<RangeBucket> {
    let Some((&last, _)) = ranges.split_last() else {
        return Vec::new();
    };

    if ranges.len() == 1 {
        return vec![RangeBucket {
            min: Some(last),
            max: None,
            label: format!("{last}+"),
        }];
    }

    let mut buckets = Vec::with_capacity(ranges.len());
    for (idx, pair) in ranges.windows(2).enumerate() {
        let high = pair[1];
        if idx == 0 {
            let low = pair[0];
            if low == 0 {
                buckets.push(RangeBucket {
                    min: None,
                    max: Some(high),
                    label: format!("<{high}"),
                });
            } else {
                buckets.push(RangeBucket {
                    min: Some(low),
                    max: Some(high),
                    label: format!("{low}-{high}"),
                });
            }
        } else {
            let low = pair[0] + 1;
            buckets.push(RangeBucket {
                min: Some(low),
                max: Some(high),
                label: format!("{low}-{high}"),
            });
        }
    }

    let open = last + 1;
    buckets.push(RangeBucket {
        min: Some(open),
        max: None,
        label: format!("{open}+"),
    });
    buckets
}

pub fn num_range_case(column: &str, ranges: &[i64]) -> String {
    let buckets = num_range_buckets(ranges);
    if buckets.is_empty() {
        return format!("'{UNKNOWN_RANGE_LABEL}'");
    }

    let whens = buckets
        .iter()
        .map(|b| format!("WHEN {} THEN '{}'", b.condition(column), b.label))
        .collect::<Vec<_>>()
        .join(" ");
    format!("CASE {whens} ELSE '{UNKNOWN_RANGE_LABEL}' END")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_bounds() {
        assert_eq!(
            num_range_case("a", &[1, 5]),
            "CASE WHEN a >= 1 AND a <= 5 THEN '1-5' WHEN a >= 6 THEN '6+' ELSE 'Unknown' END"
        );
    }

    #[test]
    fn single_value() {
        assert_eq!(
            num_range_case("a", &[1]),
            "CASE WHEN a >= 1 THEN '1+' ELSE 'Unknown' END"
        );
    }

    #[test]
    fn empty_ranges() {
        assert_eq!(num_range_case("a", &[]), "'Unknown'");
    }

    #[test]
    fn begin_with_zero() {
        assert_eq!(
            num_range_case("a", &[0, 3, 5]),
            "CASE WHEN a <= 3 THEN '<3' WHEN a >= 4 AND a <= 5 THEN '4-5' WHEN a >= 6 THEN '6+' ELSE 'Unknown' END"
        );
    }

    #[test]
    fn buckets_are_contiguous_and_exhaustive() {
        for ranges in [vec![0, 3, 5], vec![0, 1], vec![0, 10, 20, 50]] {
            let buckets = num_range_buckets(&ranges);
            assert_eq!(buckets.first().unwrap().min, None);
            assert_eq!(buckets.last().unwrap().max, None);
            for pair in buckets.windows(2) {
                assert_eq!(pair[1].min, pair[0].max.map(|max| max + 1));
            }
            for value in 0..100 {
                assert_eq!(buckets.iter().filter(|b| b.contains(value)).count(), 1);
            }
        }
    }
}
