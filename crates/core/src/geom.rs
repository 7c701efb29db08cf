//! Geometry and projection support.
//!
//! All internal geometry lives in the domain's fixed Lambert conformal
//! conic (LCC) projection (standard parallels 33N/45N, origin 40N/97W, on
//! a 6 370 997 m sphere). [`LCC_DOMAIN`] implements the closed-form
//! forward projection directly (cheap, called once per CTM/census point
//! during grid build) rather than through a generic projection crate;
//! inputs that arrive in another coordinate reference system are instead
//! routed through [`reproject_to_domain`], which defers to `proj4rs` for
//! the general case.

use geo_types::{Coord, LineString, Point, Polygon};
use std::f64::consts::PI;

pub type Poly = Polygon<f64>;

/// The fixed projection every internal `Cell` geometry is expressed in.
#[derive(Debug, Clone, Copy)]
pub struct LambertConformalConic {
    pub standard_parallel_1: f64,
    pub standard_parallel_2: f64,
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub sphere_radius: f64,
}

/// InMAP's fixed domain projection.
pub const LCC_DOMAIN: LambertConformalConic = LambertConformalConic {
    standard_parallel_1: 33.0,
    standard_parallel_2: 45.0,
    origin_lat: 40.0,
    origin_lon: -97.0,
    sphere_radius: 6_370_997.0,
};

fn deg2rad(d: f64) -> f64 {
    d * PI / 180.0
}

impl LambertConformalConic {
    /// Forward-project a (lon, lat) pair in degrees to (x, y) meters in
    /// the domain projection.
    #[must_use]
    pub fn project(&self, lon_deg: f64, lat_deg: f64) -> (f64, f64) {
        let phi = deg2rad(lat_deg);
        let phi0 = deg2rad(self.origin_lat);
        let phi1 = deg2rad(self.standard_parallel_1);
        let phi2 = deg2rad(self.standard_parallel_2);
        let lambda = deg2rad(lon_deg);
        let lambda0 = deg2rad(self.origin_lon);
        let r = self.sphere_radius;

        let n = if (phi1 - phi2).abs() < 1e-12 {
            phi1.sin()
        } else {
            ((phi1.cos() / phi2.cos()).ln()
                / ((PI / 4.0 + phi2 / 2.0).tan().ln() - (PI / 4.0 + phi1 / 2.0).tan().ln()))
        };
        let f = phi1.cos() * (PI / 4.0 + phi1 / 2.0).tan().powf(n) / n;
        let rho = |p: f64| r * f / (PI / 4.0 + p / 2.0).tan().powf(n);

        let rho_phi = rho(phi);
        let rho_0 = rho(phi0);
        let theta = n * (lambda - lambda0);

        let x = rho_phi * theta.sin();
        let y = rho_0 - rho_phi * theta.cos();
        (x, y)
    }
}

/// Reproject a point expressed in an arbitrary PROJ-describable CRS into
/// the fixed domain projection. Delegates to `proj4rs` for the general
/// pipeline (datum shift + whatever projection the source uses); falls
/// back to treating the input as already-LCC-domain coordinates if no
/// source CRS is given, matching "inputs in other projections are
/// reprojected at load time" while keeping the fixed-LCC hot
/// path in [`LambertConformalConic::project`] free of generic-projection
/// overhead.
///
/// # Errors
/// Returns an error if `proj4rs` cannot parse `source_proj4` or the
/// transform fails to converge.
pub fn reproject_to_domain(
    source_proj4: &str,
    x: f64,
    y: f64,
) -> Result<(f64, f64), proj4rs::errors::Error> {
    let domain_proj4 = "+proj=lcc +lat_1=33 +lat_2=45 +lat_0=40 +lon_0=-97 \
         +R=6370997 +units=m +no_defs";
    let from = proj4rs::Proj::from_proj_string(source_proj4)?;
    let to = proj4rs::Proj::from_proj_string(domain_proj4)?;

    let mut point_3d = (x, y, 0.0_f64);
    proj4rs::transform::transform(&from, &to, &mut point_3d)?;
    Ok((point_3d.0, point_3d.1))
}

/// Build an axis-aligned rectangular polygon in domain coordinates.
#[must_use]
pub fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Poly {
    Polygon::new(
        LineString(vec![
            Coord { x: x0, y: y0 },
            Coord { x: x1, y: y0 },
            Coord { x: x1, y: y1 },
            Coord { x: x0, y: y1 },
            Coord { x: x0, y: y0 },
        ]),
        vec![],
    )
}

/// Area-weighted intersection fraction of `a` covered by `b`, used both
/// for population apportionment and SR source-column
/// weighting. Returns 0 when the polygons don't overlap.
#[must_use]
pub fn overlap_fraction(a: &Poly, b: &Poly) -> f64 {
    use geo::{Area, BooleanOps};
    let area_a = a.unsigned_area();
    if area_a <= 0.0 {
        return 0.0;
    }
    let inter = a.intersection(b);
    let inter_area: f64 = inter.0.iter().map(Area::unsigned_area).sum();
    (inter_area / area_a).clamp(0.0, 1.0)
}

/// `true` if `p` lies inside `poly` (boundary inclusive), used by the
/// R-tree point-query contract.
#[must_use]
pub fn contains_point(poly: &Poly, p: Point<f64>) -> bool {
    use geo::Contains;
    poly.contains(&p) || poly.exterior().contains(&p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_projects_near_zero() {
        let (x, y) = LCC_DOMAIN.project(-97.0, 40.0);
        assert!(x.abs() < 1.0, "x={x}");
        assert!(y.abs() < 1.0, "y={y}");
    }

    #[test]
    fn east_of_origin_is_positive_x() {
        let (x, _) = LCC_DOMAIN.project(-90.0, 40.0);
        assert!(x > 0.0);
    }

    #[test]
    fn overlap_fraction_full_cover_is_one() {
        let a = rect(0.0, 0.0, 10.0, 10.0);
        let b = rect(-5.0, -5.0, 20.0, 20.0);
        assert!((overlap_fraction(&a, &b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn overlap_fraction_disjoint_is_zero() {
        let a = rect(0.0, 0.0, 10.0, 10.0);
        let b = rect(100.0, 100.0, 110.0, 110.0);
        assert_eq!(overlap_fraction(&a, &b), 0.0);
    }

    #[test]
    fn overlap_fraction_half_cover() {
        let a = rect(0.0, 0.0, 10.0, 10.0);
        let b = rect(0.0, 0.0, 5.0, 10.0);
        assert!((overlap_fraction(&a, &b) - 0.5).abs() < 1e-9);
    }
}
