use rand::{rngs::StdRng, Rng, SeedableRng};
use sylva_core::containers::PointCloud;

/// Elevation of the terrain, slightly sloped along X
pub fn ground(x: f64) -> f64 {
    100.0 + 0.02 * x
}

/// A synthetic vertical trunk
#[derive(Debug, Clone, Copy)]
pub struct Stem {
    pub id: f64,
    pub x: f64,
    pub y: f64,
    /// Normalized elevation of the highest trunk point
    pub top: f64,
    /// Number of points of this stem inside the stripe
    pub stripe_points: usize,
}

impl Stem {
    pub fn new(id: f64, x: f64, y: f64) -> Self {
        Self {
            id,
            x,
            y,
            top: 10.0,
            stripe_points: 100,
        }
    }
}

fn surface_point(rng: &mut StdRng, stem: &Stem, z0: f64) -> [f64; 4] {
    let angle = rng.gen_range(0.0..std::f64::consts::TAU);
    let radius = rng.gen_range(0.1..0.2);
    let x = stem.x + radius * angle.cos();
    let y = stem.y + radius * angle.sin();
    [x, y, ground(x) + z0, z0]
}

/// Builds a plot with the given stems. Returns the cloud with rows `[x, y, z, z0]` and the clustered stripe with
/// rows `[x, y, z, z0, cluster]`. Every stem contributes 200 trunk points from `z0 = 0.1` to its top plus its
/// stripe points, spread evenly between `z0 = 0.75` and `z0 = 3.45`
pub fn synthetic_plot(seed: u64, stems: &[Stem]) -> (PointCloud, PointCloud) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut cloud = PointCloud::new(4);
    let mut stripe = PointCloud::new(5);
    for stem in stems {
        for i in 0..200 {
            let z0 = 0.1 + (stem.top - 0.1) * f64::from(i) / 199.0;
            let row = surface_point(&mut rng, stem, z0);
            cloud.push_row(&row).unwrap();
        }
        for i in 0..stem.stripe_points {
            let t = i as f64 / (stem.stripe_points.max(2) - 1) as f64;
            let row = surface_point(&mut rng, stem, 0.75 + 2.7 * t);
            cloud.push_row(&row).unwrap();
            stripe
                .push_row(&[row[0], row[1], row[2], row[3], stem.id])
                .unwrap();
        }
    }
    (cloud, stripe)
}
