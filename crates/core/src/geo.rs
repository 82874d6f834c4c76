//! Volumetric footprints used to derive cell coverings.
//!
//! Coordinates are degrees on the lat/lng plane. Footprints crossing the
//! antimeridian are rejected rather than wrapped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.lat.is_finite() || !self.lng.is_finite() {
            return Err(CoreError::InvalidGeometry(format!(
                "non-finite coordinate ({}, {})",
                self.lat, self.lng
            )));
        }
        if !(-90.0..=90.0).contains(&self.lat) || !(-180.0..=180.0).contains(&self.lng) {
            return Err(CoreError::InvalidGeometry(format!(
                "coordinate out of range ({}, {})",
                self.lat, self.lng
            )));
        }
        Ok(())
    }

    /// Great-circle distance in metres.
    pub fn distance_m(&self, other: &LatLng) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlng = (other.lng - self.lng).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
    }
}

/// Axis-aligned lat/lng rectangle, bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLngRect {
    pub lo: LatLng,
    pub hi: LatLng,
}

impl LatLngRect {
    pub fn contains(&self, p: &LatLng) -> bool {
        (self.lo.lat..=self.hi.lat).contains(&p.lat) && (self.lo.lng..=self.hi.lng).contains(&p.lng)
    }

    pub fn corners(&self) -> [LatLng; 4] {
        [
            self.lo,
            LatLng::new(self.lo.lat, self.hi.lng),
            self.hi,
            LatLng::new(self.hi.lat, self.lo.lng),
        ]
    }

    /// Point of the rectangle closest to `p` in lat/lng space.
    pub fn clamp(&self, p: &LatLng) -> LatLng {
        LatLng::new(
            p.lat.clamp(self.lo.lat, self.hi.lat),
            p.lng.clamp(self.lo.lng, self.hi.lng),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub vertices: Vec<LatLng>,
}

impl Polygon {
    pub fn new(vertices: Vec<LatLng>) -> Self {
        Self { vertices }
    }

    /// Vertex ring without a repeated closing vertex.
    pub fn ring(&self) -> &[LatLng] {
        match (self.vertices.first(), self.vertices.last()) {
            (Some(first), Some(last)) if self.vertices.len() > 1 && first == last => {
                &self.vertices[..self.vertices.len() - 1]
            }
            _ => &self.vertices,
        }
    }

    pub fn edges(&self) -> impl Iterator<Item = (LatLng, LatLng)> + '_ {
        let ring = self.ring();
        (0..ring.len()).map(move |i| (ring[i], ring[(i + 1) % ring.len()]))
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let ring = self.ring();
        if ring.len() < 3 {
            return Err(CoreError::InvalidGeometry(format!(
                "polygon needs at least 3 vertices, got {}",
                ring.len()
            )));
        }
        for v in ring {
            v.validate()?;
        }
        let bounds = self.bounds();
        if bounds.hi.lng - bounds.lo.lng > 180.0 {
            return Err(CoreError::InvalidGeometry(
                "polygon crosses the antimeridian".into(),
            ));
        }

        let edges: Vec<_> = self.edges().collect();
        let n = edges.len();
        for i in 0..n {
            for j in (i + 1)..n {
                let adjacent = j == i + 1 || (i == 0 && j == n - 1);
                if !adjacent && segments_intersect(edges[i].0, edges[i].1, edges[j].0, edges[j].1) {
                    return Err(CoreError::InvalidGeometry(format!(
                        "polygon self-intersects between edges {i} and {j}"
                    )));
                }
            }
        }
        // Relative to the bounding box so small but real polygons pass.
        let extent = (bounds.hi.lat - bounds.lo.lat) * (bounds.hi.lng - bounds.lo.lng);
        if signed_area(ring).abs() <= f64::EPSILON * ring.len() as f64 * extent {
            return Err(CoreError::InvalidGeometry("polygon has zero area".into()));
        }
        Ok(())
    }

    pub fn bounds(&self) -> LatLngRect {
        let ring = self.ring();
        let mut lo = LatLng::new(f64::INFINITY, f64::INFINITY);
        let mut hi = LatLng::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
        for v in ring {
            lo.lat = lo.lat.min(v.lat);
            lo.lng = lo.lng.min(v.lng);
            hi.lat = hi.lat.max(v.lat);
            hi.lng = hi.lng.max(v.lng);
        }
        LatLngRect { lo, hi }
    }

    /// Even-odd ray cast; points on the boundary may land either side.
    pub fn contains(&self, p: &LatLng) -> bool {
        let mut inside = false;
        for (a, b) in self.edges() {
            if (a.lat > p.lat) != (b.lat > p.lat) {
                let t = (p.lat - a.lat) / (b.lat - a.lat);
                if p.lng < a.lng + t * (b.lng - a.lng) {
                    inside = !inside;
                }
            }
        }
        inside
    }

    pub fn intersects_rect(&self, rect: &LatLngRect) -> bool {
        if self.ring().iter().any(|v| rect.contains(v)) {
            return true;
        }
        let corners = rect.corners();
        if corners.iter().any(|c| self.contains(c)) {
            return true;
        }
        self.edges().any(|(a, b)| {
            (0..4).any(|k| segments_intersect(a, b, corners[k], corners[(k + 1) % 4]))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub center: LatLng,
    pub radius_m: f64,
}

impl Circle {
    pub fn new(center: LatLng, radius_m: f64) -> Self {
        Self { center, radius_m }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        self.center.validate()?;
        if !self.radius_m.is_finite() || self.radius_m <= 0.0 {
            return Err(CoreError::InvalidGeometry(format!(
                "circle radius must be positive, got {}",
                self.radius_m
            )));
        }
        let bounds = self.bounds();
        if bounds.lo.lng < -180.0 || bounds.hi.lng > 180.0 {
            return Err(CoreError::InvalidGeometry(
                "circle crosses the antimeridian".into(),
            ));
        }
        Ok(())
    }

    pub fn bounds(&self) -> LatLngRect {
        let dlat = (self.radius_m / EARTH_RADIUS_M).to_degrees();
        let lat_lo = (self.center.lat - dlat).max(-90.0);
        let lat_hi = (self.center.lat + dlat).min(90.0);
        // Near a pole the circle spans every longitude.
        let widest = self.center.lat.abs().max(lat_lo.abs()).max(lat_hi.abs());
        let (lng_lo, lng_hi) = if widest >= 89.999 {
            (-180.0, 180.0)
        } else {
            let dlng = dlat / widest.to_radians().cos();
            (self.center.lng - dlng, self.center.lng + dlng)
        };
        LatLngRect {
            lo: LatLng::new(lat_lo, lng_lo),
            hi: LatLng::new(lat_hi, lng_hi),
        }
    }

    pub fn intersects_rect(&self, rect: &LatLngRect) -> bool {
        // The lat/lng clamp is not the exact spherical nearest point; the
        // slack keeps the covering an over-approximation.
        self.center.distance_m(&rect.clamp(&self.center)) <= self.radius_m * 1.01 + 1.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Footprint {
    Polygon(Polygon),
    Circle(Circle),
}

impl Footprint {
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            Footprint::Polygon(p) => p.validate(),
            Footprint::Circle(c) => c.validate(),
        }
    }

    pub fn bounds(&self) -> LatLngRect {
        match self {
            Footprint::Polygon(p) => p.bounds(),
            Footprint::Circle(c) => c.bounds(),
        }
    }

    pub fn intersects_rect(&self, rect: &LatLngRect) -> bool {
        match self {
            Footprint::Polygon(p) => p.intersects_rect(rect),
            Footprint::Circle(c) => c.intersects_rect(rect),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Volume3D {
    pub footprint: Option<Footprint>,
    pub altitude_lo: Option<f64>,
    pub altitude_hi: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Volume4D {
    pub spatial: Volume3D,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

fn signed_area(ring: &[LatLng]) -> f64 {
    let n = ring.len();
    let Some(&origin) = ring.first() else {
        return 0.0;
    };
    (0..n)
        .map(|i| {
            // Offsets from the first vertex keep far-from-origin rings precise.
            let (a, b) = (ring[i], ring[(i + 1) % n]);
            let (ax, ay) = (a.lng - origin.lng, a.lat - origin.lat);
            let (bx, by) = (b.lng - origin.lng, b.lat - origin.lat);
            ax * by - bx * ay
        })
        .sum::<f64>()
        / 2.0
}

fn orientation(a: LatLng, b: LatLng, c: LatLng) -> f64 {
    (b.lng - a.lng) * (c.lat - a.lat) - (b.lat - a.lat) * (c.lng - a.lng)
}

fn on_segment(a: LatLng, b: LatLng, p: LatLng) -> bool {
    p.lng >= a.lng.min(b.lng)
        && p.lng <= a.lng.max(b.lng)
        && p.lat >= a.lat.min(b.lat)
        && p.lat <= a.lat.max(b.lat)
}

/// Closed-segment intersection test, touching endpoints included.
pub fn segments_intersect(p1: LatLng, p2: LatLng, q1: LatLng, q2: LatLng) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    (d1 == 0.0 && on_segment(q1, q2, p1))
        || (d2 == 0.0 && on_segment(q1, q2, p2))
        || (d3 == 0.0 && on_segment(p1, p2, q1))
        || (d4 == 0.0 && on_segment(p1, p2, q2))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(lat: f64, lng: f64, size: f64) -> Polygon {
        Polygon::new(vec![
            LatLng::new(lat, lng),
            LatLng::new(lat, lng + size),
            LatLng::new(lat + size, lng + size),
            LatLng::new(lat + size, lng),
        ])
    }

    #[test]
    fn valid_square_passes() {
        assert!(square(47.0, 8.0, 0.1).validate().is_ok());
    }

    #[test]
    fn closing_vertex_is_ignored() {
        let mut p = square(47.0, 8.0, 0.1);
        p.vertices.push(p.vertices[0]);
        assert_eq!(p.ring().len(), 4);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn degenerate_polygons_rejected() {
        let two = Polygon::new(vec![LatLng::new(0.0, 0.0), LatLng::new(1.0, 1.0)]);
        assert!(matches!(two.validate(), Err(CoreError::InvalidGeometry(_))));

        let collinear = Polygon::new(vec![
            LatLng::new(0.0, 0.0),
            LatLng::new(1.0, 1.0),
            LatLng::new(2.0, 2.0),
        ]);
        assert!(matches!(collinear.validate(), Err(CoreError::InvalidGeometry(_))));

        let nan = Polygon::new(vec![
            LatLng::new(0.0, 0.0),
            LatLng::new(f64::NAN, 1.0),
            LatLng::new(1.0, 0.0),
        ]);
        assert!(matches!(nan.validate(), Err(CoreError::InvalidGeometry(_))));
    }

    #[test]
    fn tiny_polygon_passes() {
        // Roughly 10 cm on a side, far from the origin.
        assert!(square(47.0, 170.0, 1e-6).validate().is_ok());
        assert!(square(-33.9, 18.4, 1e-8).validate().is_ok());
    }

    #[test]
    fn bowtie_rejected() {
        let bowtie = Polygon::new(vec![
            LatLng::new(0.0, 0.0),
            LatLng::new(1.0, 1.0),
            LatLng::new(1.0, 0.0),
            LatLng::new(0.0, 1.0),
        ]);
        let err = bowtie.validate().unwrap_err();
        assert!(err.to_string().contains("self-intersects"), "{err}");
    }

    #[test]
    fn point_in_polygon() {
        let p = square(0.0, 0.0, 1.0);
        assert!(p.contains(&LatLng::new(0.5, 0.5)));
        assert!(!p.contains(&LatLng::new(1.5, 0.5)));
    }

    #[test]
    fn rect_enclosing_polygon_intersects() {
        let p = square(0.4, 0.4, 0.1);
        let rect = LatLngRect {
            lo: LatLng::new(0.0, 0.0),
            hi: LatLng::new(1.0, 1.0),
        };
        assert!(p.intersects_rect(&rect));
        let far = LatLngRect {
            lo: LatLng::new(5.0, 5.0),
            hi: LatLng::new(6.0, 6.0),
        };
        assert!(!p.intersects_rect(&far));
    }

    #[test]
    fn circle_validation() {
        assert!(Circle::new(LatLng::new(47.0, 8.0), 500.0).validate().is_ok());
        assert!(Circle::new(LatLng::new(47.0, 8.0), 0.0).validate().is_err());
        assert!(Circle::new(LatLng::new(0.0, 179.999), 5_000.0).validate().is_err());
    }

    #[test]
    fn distance_of_one_degree_latitude() {
        let d = LatLng::new(0.0, 0.0).distance_m(&LatLng::new(1.0, 0.0));
        assert!((d - 111_195.0).abs() < 100.0, "{d}");
    }
}
