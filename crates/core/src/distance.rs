//! Distance metrics over feature rows

use crate::params::invalid_value;
use biocluster_common::Result;
use ndarray::ArrayView1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Metric {
    Euclidean,
    Manhattan,
    Chebyshev,
    Minkowski(f64),
    Cosine,
}

impl Metric {
    /// Resolve a metric name; `p` only matters for `minkowski` (default 2)
    pub fn parse(key: &str, name: &str, p: Option<f64>) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            "manhattan" | "cityblock" | "l1" => Ok(Metric::Manhattan),
            "chebyshev" => Ok(Metric::Chebyshev),
            "cosine" => Ok(Metric::Cosine),
            "minkowski" => {
                let p = p.unwrap_or(2.0);
                if p < 1.0 {
                    return Err(invalid_value("p", p, "a power >= 1"));
                }
                Ok(Metric::Minkowski(p))
            }
            other => Err(invalid_value(
                key,
                format!("{other:?}"),
                "euclidean, manhattan, chebyshev, minkowski or cosine",
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Euclidean => "euclidean",
            Metric::Manhattan => "manhattan",
            Metric::Chebyshev => "chebyshev",
            Metric::Minkowski(_) => "minkowski",
            Metric::Cosine => "cosine",
        }
    }

    pub fn distance(&self, a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
        match *self {
            Metric::Euclidean => squared_euclidean(a, b).sqrt(),
            Metric::Manhattan => a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum(),
            Metric::Chebyshev => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y).abs())
                .fold(0.0, f64::max),
            Metric::Minkowski(p) if p == 2.0 => squared_euclidean(a, b).sqrt(),
            Metric::Minkowski(p) => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y).abs().powf(p))
                .sum::<f64>()
                .powf(1.0 / p),
            Metric::Cosine => cosine_distance(a, b),
        }
    }
}

pub fn squared_euclidean(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// `1 - cos(a, b)`; a zero vector has similarity 0 with everything
fn cosine_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    (1.0 - a.dot(&b) / (norm_a * norm_b)).clamp(0.0, 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_metrics() {
        let a = array![0.0, 0.0];
        let b = array![3.0, 4.0];
        assert_eq!(Metric::Euclidean.distance(a.view(), b.view()), 5.0);
        assert_eq!(Metric::Manhattan.distance(a.view(), b.view()), 7.0);
        assert_eq!(Metric::Chebyshev.distance(a.view(), b.view()), 4.0);
        assert_eq!(Metric::Minkowski(2.0).distance(a.view(), b.view()), 5.0);
        let m1 = Metric::Minkowski(1.0).distance(a.view(), b.view());
        assert!((m1 - 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_cosine() {
        let a = array![1.0, 0.0];
        let b = array![0.0, 2.0];
        let c = array![2.0, 0.0];
        assert!((Metric::Cosine.distance(a.view(), b.view()) - 1.0).abs() < 1e-12);
        assert!(Metric::Cosine.distance(a.view(), c.view()).abs() < 1e-12);
        let zero = array![0.0, 0.0];
        assert_eq!(Metric::Cosine.distance(zero.view(), a.view()), 1.0);
    }

    #[test]
    fn test_parse() {
        assert_eq!(Metric::parse("metric", "L1", None).unwrap(), Metric::Manhattan);
        assert_eq!(
            Metric::parse("metric", "minkowski", Some(3.0)).unwrap(),
            Metric::Minkowski(3.0)
        );
        assert!(Metric::parse("metric", "minkowski", Some(0.5)).is_err());
        assert!(Metric::parse("metric", "haversine", None).is_err());
    }
}
