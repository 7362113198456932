//! Coverage-maximizing view selection.
//!
//! Camera centers are clustered with k-means (k-means++ seeding, several
//! restarts, lowest inertia wins) and the member closest to each centroid
//! becomes that cluster's representative view.

use crate::error::DataError;
use glam::Vec3;
use ordered_float::OrderedFloat;
use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use std::collections::BTreeSet;
use tracing::debug;

/// Result of one k-means fit.
#[derive(Debug, Clone)]
pub struct Clustering {
    /// Cluster centers.
    pub centroids: Vec<Vec3>,
    /// Cluster index of every input point.
    pub labels: Vec<usize>,
    /// Sum of squared distances from points to their centroid.
    pub inertia: f32,
}

impl Clustering {
    /// Distance from every point to the centroid of its own cluster.
    pub fn distances(&self, points: &[Vec3]) -> Vec<f32> {
        points
            .iter()
            .zip(&self.labels)
            .map(|(p, &label)| p.distance(self.centroids[label]))
            .collect()
    }

    /// Index of the member closest to its centroid, one per cluster.
    ///
    /// Candidates are filtered to the cluster before the scan, so a
    /// representative never comes from a neighbouring cluster.
    pub fn representatives(&self, points: &[Vec3]) -> Vec<usize> {
        let distances = self.distances(points);
        (0..self.centroids.len())
            .filter_map(|cluster| {
                self.labels
                    .iter()
                    .enumerate()
                    .filter(|&(_, &label)| label == cluster)
                    .min_by_key(|&(i, _)| OrderedFloat(distances[i]))
                    .map(|(i, _)| i)
            })
            .collect()
    }
}

/// Lloyd's k-means with k-means++ seeding.
#[derive(Debug, Clone, Copy)]
pub struct KMeans {
    n_clusters: usize,
    n_init: usize,
    max_iter: usize,
    tol: f32,
}

impl KMeans {
    pub fn new(n_clusters: usize) -> Self {
        Self {
            n_clusters,
            n_init: 10,
            max_iter: 300,
            tol: 1e-4,
        }
    }

    /// Number of random restarts.
    pub fn with_n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init.max(1);
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter.max(1);
        self
    }

    /// Fit `n_clusters` clusters; every cluster ends up with at least one member.
    pub fn fit<R: Rng + ?Sized>(&self, points: &[Vec3], rng: &mut R) -> Result<Clustering, DataError> {
        let k = self.n_clusters;
        if k == 0 {
            return Err(DataError::InvalidArgument(
                "number of clusters must be positive".into(),
            ));
        }
        let distinct = distinct_count(points);
        if k > distinct {
            return Err(DataError::InvalidArgument(format!(
                "requested {k} clusters but only {distinct} distinct points are available"
            )));
        }

        // tolerance is relative to the spread of the data
        let tol = self.tol * mean_variance(points);

        let mut best: Option<Clustering> = None;
        for _ in 0..self.n_init {
            let run = self.fit_once(points, tol, rng)?;
            if best.as_ref().is_none_or(|b| run.inertia < b.inertia) {
                best = Some(run);
            }
        }

        let best = best.ok_or_else(|| DataError::InvalidArgument("no k-means restarts ran".into()))?;
        debug!("k-means: {} clusters, inertia {:.5}", k, best.inertia);
        Ok(best)
    }

    fn fit_once<R: Rng + ?Sized>(
        &self,
        points: &[Vec3],
        tol: f32,
        rng: &mut R,
    ) -> Result<Clustering, DataError> {
        let mut centroids = init_plus_plus(points, self.n_clusters, rng)?;
        let mut labels = vec![0; points.len()];

        for _ in 0..self.max_iter {
            assign(points, &centroids, &mut labels);
            fill_empty_clusters(points, &mut centroids, &mut labels);

            let updated = update_centroids(points, &labels, &centroids);
            let shift: f32 = centroids
                .iter()
                .zip(&updated)
                .map(|(a, b)| a.distance_squared(*b))
                .sum();
            centroids = updated;
            if shift <= tol {
                break;
            }
        }

        // labels must agree with the final centroids
        assign(points, &centroids, &mut labels);
        fill_empty_clusters(points, &mut centroids, &mut labels);

        let inertia = points
            .iter()
            .zip(&labels)
            .map(|(p, &l)| p.distance_squared(centroids[l]))
            .sum();

        Ok(Clustering {
            centroids,
            labels,
            inertia,
        })
    }
}

/// Pick `k` unique view indices that spread across the camera positions.
///
/// Reproducibility is the caller's concern: seed `rng`.
pub fn select_views<R: Rng + ?Sized>(
    positions: &[Vec3],
    k: usize,
    rng: &mut R,
) -> Result<Vec<usize>, DataError> {
    if k > positions.len() {
        return Err(DataError::InvalidArgument(format!(
            "requested {k} views but only {} are available",
            positions.len()
        )));
    }
    let clustering = KMeans::new(k).fit(positions, rng)?;
    let indices = clustering.representatives(positions);
    debug!("Selected views: {:?}", indices);
    Ok(indices)
}

fn init_plus_plus<R: Rng + ?Sized>(
    points: &[Vec3],
    k: usize,
    rng: &mut R,
) -> Result<Vec<Vec3>, DataError> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..points.len())]);

    let mut closest: Vec<f32> = points
        .iter()
        .map(|p| p.distance_squared(centroids[0]))
        .collect();

    while centroids.len() < k {
        let dist = WeightedIndex::new(&closest)
            .map_err(|e| DataError::InvalidArgument(format!("k-means++ seeding failed: {e}")))?;
        let next = points[dist.sample(rng)];
        centroids.push(next);
        for (d, p) in closest.iter_mut().zip(points) {
            *d = d.min(p.distance_squared(next));
        }
    }

    Ok(centroids)
}

fn assign(points: &[Vec3], centroids: &[Vec3], labels: &mut [usize]) {
    for (label, p) in labels.iter_mut().zip(points) {
        *label = centroids
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| OrderedFloat(p.distance_squared(**c)))
            .map(|(i, _)| i)
            .unwrap_or(0);
    }
}

/// Move the point farthest from its centroid into each empty cluster.
fn fill_empty_clusters(points: &[Vec3], centroids: &mut [Vec3], labels: &mut [usize]) {
    let mut sizes = vec![0usize; centroids.len()];
    for &l in labels.iter() {
        sizes[l] += 1;
    }

    for cluster in 0..centroids.len() {
        if sizes[cluster] > 0 {
            continue;
        }
        let donor = labels
            .iter()
            .enumerate()
            .filter(|&(_, &l)| sizes[l] > 1)
            .max_by_key(|&(i, &l)| OrderedFloat(points[i].distance_squared(centroids[l])))
            .map(|(i, _)| i);

        if let Some(i) = donor {
            sizes[labels[i]] -= 1;
            sizes[cluster] += 1;
            labels[i] = cluster;
            centroids[cluster] = points[i];
        }
    }
}

fn update_centroids(points: &[Vec3], labels: &[usize], previous: &[Vec3]) -> Vec<Vec3> {
    let mut sums = vec![Vec3::ZERO; previous.len()];
    let mut counts = vec![0usize; previous.len()];
    for (p, &l) in points.iter().zip(labels) {
        sums[l] += *p;
        counts[l] += 1;
    }
    sums.into_iter()
        .zip(counts)
        .zip(previous)
        .map(|((sum, count), prev)| {
            if count == 0 {
                *prev
            } else {
                sum / count as f32
            }
        })
        .collect()
}

fn distinct_count(points: &[Vec3]) -> usize {
    points
        .iter()
        .map(|p| [OrderedFloat(p.x), OrderedFloat(p.y), OrderedFloat(p.z)])
        .collect::<BTreeSet<_>>()
        .len()
}

fn mean_variance(points: &[Vec3]) -> f32 {
    if points.is_empty() {
        return 0.0;
    }
    let n = points.len() as f32;
    let mean = points.iter().copied().sum::<Vec3>() / n;
    let var = points
        .iter()
        .map(|p| (*p - mean) * (*p - mean))
        .sum::<Vec3>()
        / n;
    (var.x + var.y + var.z) / 3.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn ring(n: usize, radius: f32) -> Vec<Vec3> {
        (0..n)
            .map(|i| {
                let t = i as f32 / n as f32 * std::f32::consts::TAU;
                Vec3::new(radius * t.cos(), radius * t.sin(), 1.0 + 0.1 * i as f32)
            })
            .collect()
    }

    #[test]
    fn test_select_views_unique_and_sized() {
        let positions = ring(40, 4.0);
        let mut rng = StdRng::seed_from_u64(42);
        for k in [1, 3, 7, 20, 40] {
            let idxs = select_views(&positions, k, &mut rng).unwrap();
            assert_eq!(idxs.len(), k);
            let unique: BTreeSet<_> = idxs.iter().collect();
            assert_eq!(unique.len(), k);
        }
    }

    #[test]
    fn test_representative_is_closest_member_of_its_cluster() {
        let positions = ring(30, 3.0);
        let mut rng = StdRng::seed_from_u64(7);
        let clustering = KMeans::new(6).fit(&positions, &mut rng).unwrap();
        let distances = clustering.distances(&positions);
        let reps = clustering.representatives(&positions);

        assert_eq!(reps.len(), 6);
        for (cluster, &rep) in reps.iter().enumerate() {
            assert_eq!(clustering.labels[rep], cluster);
            for (i, &label) in clustering.labels.iter().enumerate() {
                if label == cluster {
                    assert!(distances[rep] <= distances[i]);
                }
            }
        }
    }

    #[test]
    fn test_two_obvious_groups() {
        let mut positions = vec![
            Vec3::new(-5.0, 0.0, 0.0),
            Vec3::new(-5.1, 0.1, 0.0),
            Vec3::new(-4.9, -0.1, 0.0),
        ];
        positions.extend([
            Vec3::new(5.0, 0.0, 0.0),
            Vec3::new(5.1, 0.1, 0.0),
            Vec3::new(4.9, -0.1, 0.0),
        ]);
        let mut rng = StdRng::seed_from_u64(1);
        let idxs = select_views(&positions, 2, &mut rng).unwrap();
        let left = idxs.iter().filter(|&&i| i < 3).count();
        assert_eq!(left, 1);
    }

    #[test]
    fn test_too_many_views_is_invalid() {
        let positions = ring(4, 1.0);
        let mut rng = StdRng::seed_from_u64(0);
        let err = select_views(&positions, 5, &mut rng).unwrap_err();
        assert!(matches!(err, DataError::InvalidArgument(_)));
    }

    #[test]
    fn test_duplicate_positions_limit_clusters() {
        let positions = vec![Vec3::ONE; 5];
        let mut rng = StdRng::seed_from_u64(0);
        assert!(select_views(&positions, 2, &mut rng).is_err());
        assert_eq!(select_views(&positions, 1, &mut rng).unwrap().len(), 1);
    }
}
