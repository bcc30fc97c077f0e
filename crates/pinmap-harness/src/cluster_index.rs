#![forbid(unsafe_code)]

//! Deterministic point clustering per zoom level.
//!
//! # Design
//!
//! Points are projected into Web-Mercator pixel space at 512-px tiles for
//! each integer zoom `0..=max_zoom`, bucketed into a uniform grid whose cell
//! size equals the cluster radius, and grouped greedily in ascending id
//! order: each unassigned point claims every unassigned neighbour within
//! the radius. Above `max_zoom` every point renders individually.
//!
//! Cluster ids encode their zoom in the low five bits, so an expansion
//! query needs nothing but the id.
//!
//! # Invariants
//!
//! 1. At every level each point belongs to exactly one group
//!    (member conservation).
//! 2. Only groups with at least two members are reported as clusters.
//! 3. The same input always yields the same ids (ordering is by user id).
//!
//! # Failure Modes
//!
//! - Unknown or stale cluster ids resolve to `None` rather than panicking.

use std::f64::consts::PI;

use pinmap_core::feature::{ClusterId, RenderedFeature};
use pinmap_core::geometry::LngLat;
use pinmap_core::id::UserId;
use rustc_hash::FxHashMap;

/// Tile size the radius is measured against.
pub const TILE_SIZE: f64 = 512.0;

const ZOOM_BITS: u64 = 5;
const ZOOM_MASK: u64 = (1 << ZOOM_BITS) - 1;

#[derive(Debug, Clone)]
struct Group {
    members: Vec<usize>,
    center: LngLat,
}

#[derive(Debug, Clone)]
struct Level {
    groups: Vec<Group>,
    /// Group index per point.
    assignment: Vec<usize>,
}

/// Cluster hierarchy over a fixed point set.
#[derive(Debug, Clone)]
pub struct ClusterIndex {
    points: Vec<(UserId, LngLat)>,
    max_zoom: u8,
    levels: Vec<Level>,
}

/// Project to world pixel coordinates at `zoom`.
#[must_use]
pub fn project(position: LngLat, zoom: u8) -> (f64, f64) {
    let size = TILE_SIZE * f64::from(1u32 << zoom.min(24));
    let x = (position.lng + 180.0) / 360.0 * size;
    let sin = position.lat.to_radians().sin().clamp(-0.9999, 0.9999);
    let y = (0.5 - ((1.0 + sin) / (1.0 - sin)).ln() / (4.0 * PI)) * size;
    (x, y)
}

impl ClusterIndex {
    /// Build the index. With `cluster == false` no level is computed and
    /// every point renders individually.
    #[must_use]
    pub fn new(
        mut points: Vec<(UserId, LngLat)>,
        radius: u16,
        max_zoom: u8,
        cluster: bool,
    ) -> Self {
        points.sort_by_key(|(id, _)| *id);
        points.dedup_by_key(|(id, _)| *id);
        let max_zoom = max_zoom.min(24);
        let levels = if cluster && radius > 0 {
            (0..=max_zoom)
                .map(|zoom| build_level(&points, f64::from(radius), zoom))
                .collect()
        } else {
            Vec::new()
        };
        Self {
            points,
            max_zoom,
            levels,
        }
    }

    /// Number of indexed points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Indexed ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = UserId> + '_ {
        self.points.iter().map(|(id, _)| *id)
    }

    fn level(&self, zoom: f64) -> Option<(u8, &Level)> {
        let z = zoom.floor().max(0.0);
        if z > f64::from(self.max_zoom) {
            return None;
        }
        let z = z as u8;
        self.levels.get(usize::from(z)).map(|level| (z, level))
    }

    /// Clusters and unclustered points visible at `zoom`.
    #[must_use]
    pub fn features_at(&self, zoom: f64) -> Vec<RenderedFeature> {
        let Some((z, level)) = self.level(zoom) else {
            return self
                .points
                .iter()
                .map(|(id, pos)| RenderedFeature::point(*id, *pos))
                .collect();
        };
        level
            .groups
            .iter()
            .enumerate()
            .map(|(idx, group)| match group.members.as_slice() {
                [single] => {
                    let (id, pos) = self.points[*single];
                    RenderedFeature::point(id, pos)
                }
                members => RenderedFeature::cluster(
                    encode(idx, z),
                    u32::try_from(members.len()).unwrap_or(u32::MAX),
                    group.center,
                ),
            })
            .collect()
    }

    /// Member ids of a cluster.
    #[must_use]
    pub fn members(&self, cluster: ClusterId) -> Option<Vec<UserId>> {
        let group = self.group(cluster)?;
        Some(group.members.iter().map(|&i| self.points[i].0).collect())
    }

    fn group(&self, cluster: ClusterId) -> Option<&Group> {
        let (idx, zoom) = decode(cluster);
        let group = self.levels.get(usize::from(zoom))?.groups.get(idx)?;
        (group.members.len() >= 2).then_some(group)
    }

    /// Smallest zoom at which the members of `cluster` stop sharing a
    /// single group; `max_zoom + 1` if they stay together until clustering
    /// ends.
    #[must_use]
    pub fn expansion_zoom(&self, cluster: ClusterId) -> Option<f64> {
        let (_, zoom) = decode(cluster);
        let group = self.group(cluster)?;
        let first = group.members[0];
        for z in (zoom + 1)..=self.max_zoom {
            let level = &self.levels[usize::from(z)];
            let home = level.assignment[first];
            if group.members.iter().any(|&m| level.assignment[m] != home) {
                return Some(f64::from(z));
            }
        }
        Some(f64::from(self.max_zoom) + 1.0)
    }
}

fn encode(group_index: usize, zoom: u8) -> ClusterId {
    ClusterId(((group_index as u64) << ZOOM_BITS) | u64::from(zoom))
}

fn decode(cluster: ClusterId) -> (usize, u8) {
    let zoom = (cluster.0 & ZOOM_MASK) as u8;
    let idx = usize::try_from(cluster.0 >> ZOOM_BITS).unwrap_or(usize::MAX);
    (idx, zoom)
}

fn build_level(points: &[(UserId, LngLat)], radius: f64, zoom: u8) -> Level {
    let projected: Vec<(f64, f64)> = points.iter().map(|(_, p)| project(*p, zoom)).collect();
    let cell_of = |(x, y): (f64, f64)| ((x / radius).floor() as i64, (y / radius).floor() as i64);

    let mut grid: FxHashMap<(i64, i64), Vec<usize>> = FxHashMap::default();
    for (i, xy) in projected.iter().enumerate() {
        grid.entry(cell_of(*xy)).or_default().push(i);
    }

    let unassigned = usize::MAX;
    let mut assignment = vec![unassigned; points.len()];
    let mut groups = Vec::new();
    let radius_sq = radius * radius;

    for seed in 0..points.len() {
        if assignment[seed] != unassigned {
            continue;
        }
        let group_idx = groups.len();
        assignment[seed] = group_idx;
        let mut members = vec![seed];
        let (sx, sy) = projected[seed];
        let (cx, cy) = cell_of((sx, sy));
        for dx in -1..=1 {
            for dy in -1..=1 {
                let Some(bucket) = grid.get(&(cx + dx, cy + dy)) else {
                    continue;
                };
                for &j in bucket {
                    if assignment[j] != unassigned {
                        continue;
                    }
                    let (jx, jy) = projected[j];
                    if (jx - sx).powi(2) + (jy - sy).powi(2) <= radius_sq {
                        assignment[j] = group_idx;
                        members.push(j);
                    }
                }
            }
        }
        members.sort_unstable();
        let n = members.len() as f64;
        let (lng, lat) = members.iter().fold((0.0, 0.0), |(lng, lat), &m| {
            (lng + points[m].1.lng, lat + points[m].1.lat)
        });
        groups.push(Group {
            members,
            center: LngLat::new(lng / n, lat / n),
        });
    }

    Level { groups, assignment }
}
