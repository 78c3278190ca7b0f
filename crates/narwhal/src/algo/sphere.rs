//! Community centroids on a sphere.
//!
//! Communities are sorted by id and assigned the points of an evenly spaced Fibonacci
//! (golden-angle) lattice. The tiny cases use the exact optimum instead of the spiral: one
//! community sits on the pole, two on opposite poles, three on an equatorial triangle.

use crate::graph::Position;
use std::collections::BTreeMap;

pub fn place_communities<S: AsRef<str>>(
    community_ids: &[S],
    radius: f64,
) -> BTreeMap<String, Position> {
    let mut ids: Vec<&str> = community_ids.iter().map(AsRef::as_ref).collect();
    ids.sort_unstable();
    ids.dedup();

    let points = sphere_points(ids.len(), radius);
    ids.into_iter()
        .zip(points)
        .map(|(id, p)| (id.to_string(), p))
        .collect()
}

/// `n` points spread over a sphere of the given radius, in assignment order. Y is the polar axis.
pub fn sphere_points(n: usize, radius: f64) -> Vec<Position> {
    match n {
        0 => Vec::new(),
        1 => vec![Position::new(0.0, radius, 0.0)],
        2 => vec![
            Position::new(0.0, radius, 0.0),
            Position::new(0.0, -radius, 0.0),
        ],
        3 => (0..3)
            .map(|i| {
                let theta = std::f64::consts::TAU * (i as f64) / 3.0;
                Position::new(radius * theta.cos(), 0.0, radius * theta.sin())
            })
            .collect(),
        _ => {
            let golden_angle = std::f64::consts::PI * (3.0 - 5.0f64.sqrt());
            (0..n)
                .map(|i| {
                    let y = 1.0 - 2.0 * ((i as f64) + 0.5) / (n as f64);
                    let ring = (1.0 - y * y).max(0.0).sqrt();
                    let theta = golden_angle * (i as f64);
                    Position::new(
                        radius * ring * theta.cos(),
                        radius * y,
                        radius * ring * theta.sin(),
                    )
                })
                .collect()
        }
    }
}
