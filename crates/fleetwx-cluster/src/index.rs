//! Hierarchical point clustering over Web Mercator
//!
//! The index keeps one level per zoom. The top level (`max_zoom`) holds every
//! valid point on its own; each lower level is built by greedily merging the
//! nodes of the level above that fall within the clustering radius for that
//! zoom. Because levels are built from each other, a cluster at zoom z is
//! always contained in a single node at every zoom below z.

use crate::projection::{lat_y, lng_x, radius_at_zoom, x_lng, y_lat};
use crate::ClusterError;
use fleetwx_core::Coordinate;
use rstar::primitives::GeomWithData;
use rstar::{RTree, AABB};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Highest zoom the id encoding supports
pub const MAX_SUPPORTED_ZOOM: u8 = 24;

/// Latitude where the rendered map ends; bbox edges at or past it reach the pole
const MAP_EDGE_LAT: f64 = 85.0;

type IndexedNode = GeomWithData<[f64; 2], usize>;

/// A geo-located input point with an opaque payload
#[derive(Debug, Clone, PartialEq)]
pub struct GeoPoint<P> {
    pub longitude: f64,
    pub latitude: f64,
    pub payload: P,
}

impl<P> GeoPoint<P> {
    pub fn new(longitude: f64, latitude: f64, payload: P) -> Self {
        Self {
            longitude,
            latitude,
            payload,
        }
    }
}

/// Clustering options
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterOptions {
    /// Clustering radius in screen pixels
    pub radius_px: f64,
    /// Tile extent in pixels; the world is `extent * 2^zoom` pixels wide
    pub extent: f64,
    pub min_zoom: u8,
    /// Zoom at which every point is shown individually
    pub max_zoom: u8,
    /// Minimum number of points to form a cluster
    pub min_points: usize,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            radius_px: 40.0,
            extent: 512.0,
            min_zoom: 0,
            max_zoom: 16,
            min_points: 2,
        }
    }
}

impl ClusterOptions {
    pub fn validate(&self) -> Result<(), ClusterError> {
        if !(self.radius_px.is_finite() && self.radius_px > 0.0) {
            return Err(ClusterError::InvalidOptions(format!(
                "radius_px must be positive, got {}",
                self.radius_px
            )));
        }
        if !(self.extent.is_finite() && self.extent > 0.0) {
            return Err(ClusterError::InvalidOptions(format!(
                "extent must be positive, got {}",
                self.extent
            )));
        }
        if self.max_zoom > MAX_SUPPORTED_ZOOM {
            return Err(ClusterError::InvalidOptions(format!(
                "max_zoom must be at most {MAX_SUPPORTED_ZOOM}, got {}",
                self.max_zoom
            )));
        }
        if self.min_zoom > self.max_zoom {
            return Err(ClusterError::InvalidOptions(format!(
                "min_zoom {} exceeds max_zoom {}",
                self.min_zoom, self.max_zoom
            )));
        }
        if self.min_points < 2 {
            return Err(ClusterError::InvalidOptions(
                "min_points must be at least 2".into(),
            ));
        }
        Ok(())
    }
}

/// Map region as `[west, south, east, north]` in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub const WORLD: BoundingBox = BoundingBox {
        west: -180.0,
        south: -85.0,
        east: 180.0,
        north: 85.0,
    };

    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::WORLD
    }
}

impl FromStr for BoundingBox {
    type Err = ClusterError;

    /// Parse `west,south,east,north`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ClusterError::InvalidBoundingBox(format!("{s}: {e}")))?;
        match parts.as_slice() {
            [w, s_, e, n] if parts.iter().all(|v| v.is_finite()) => Ok(Self::new(*w, *s_, *e, *n)),
            _ => Err(ClusterError::InvalidBoundingBox(format!(
                "expected four finite numbers, got {s}"
            ))),
        }
    }
}

/// Currently visible map region
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub bbox: BoundingBox,
    pub zoom: f64,
}

impl Viewport {
    pub fn new(bbox: BoundingBox, zoom: f64) -> Self {
        Self { bbox, zoom }
    }

    /// Whole-world viewport at a zoom level
    pub fn world(zoom: f64) -> Self {
        Self::new(BoundingBox::WORLD, zoom)
    }
}

/// Identifier of a cluster, stable only within one index.
///
/// Encodes the zoom level the cluster was formed at and its position there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(u64);

impl ClusterId {
    fn new(zoom: u8, node: usize) -> Self {
        Self(((node as u64) << 5) | u64::from(zoom))
    }

    pub fn zoom(self) -> u8 {
        (self.0 & 0x1f) as u8
    }

    fn node(self) -> usize {
        (self.0 >> 5) as usize
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn from_u64(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ClusterId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// A point the index refused because its coordinates are unusable
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DroppedPoint {
    pub index: usize,
    pub longitude: f64,
    pub latitude: f64,
}

/// Render-ready marker
#[derive(Debug, Clone, PartialEq)]
pub enum MapMarker<'a, P> {
    Cluster {
        id: ClusterId,
        /// Count-weighted centroid of the members
        coordinate: Coordinate,
        count: usize,
    },
    Point {
        /// Position of the point in the loaded input
        index: usize,
        coordinate: Coordinate,
        payload: &'a P,
    },
}

impl<'a, P> MapMarker<'a, P> {
    pub fn coordinate(&self) -> Coordinate {
        match self {
            MapMarker::Cluster { coordinate, .. } | MapMarker::Point { coordinate, .. } => {
                *coordinate
            }
        }
    }

    /// Number of input points the marker stands for
    pub fn count(&self) -> usize {
        match self {
            MapMarker::Cluster { count, .. } => *count,
            MapMarker::Point { .. } => 1,
        }
    }

    pub fn is_cluster(&self) -> bool {
        matches!(self, MapMarker::Cluster { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Point(usize),
    Cluster(ClusterId),
}

#[derive(Debug, Clone)]
struct Node {
    x: f64,
    y: f64,
    count: usize,
    kind: NodeKind,
    /// Positions in the level above; only set on the level a cluster was formed at
    children: Vec<usize>,
}

impl Node {
    fn carried(&self) -> Node {
        Node {
            x: self.x,
            y: self.y,
            count: self.count,
            kind: self.kind,
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Level {
    nodes: Vec<Node>,
    tree: RTree<IndexedNode>,
}

impl Level {
    fn new(nodes: Vec<Node>) -> Self {
        let entries = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| GeomWithData::new([n.x, n.y], i))
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
            nodes,
        }
    }
}

/// Spatial clustering index over a snapshot of points
#[derive(Debug)]
pub struct ClusterIndex<P> {
    options: ClusterOptions,
    points: Vec<GeoPoint<P>>,
    levels: Vec<Level>,
    dropped: Vec<DroppedPoint>,
}

impl<P> ClusterIndex<P> {
    /// Build every zoom level for the given points.
    ///
    /// Points with invalid coordinates are dropped and reported through
    /// [`ClusterIndex::dropped`]; they never fail the load.
    pub fn load(points: Vec<GeoPoint<P>>, options: ClusterOptions) -> Self {
        let max_zoom = options.max_zoom.min(MAX_SUPPORTED_ZOOM);
        let min_zoom = options.min_zoom.min(max_zoom);
        let options = ClusterOptions {
            max_zoom,
            min_zoom,
            ..options
        };

        let mut dropped = Vec::new();
        let mut leaves = Vec::with_capacity(points.len());
        for (index, point) in points.iter().enumerate() {
            if Coordinate::new(point.latitude, point.longitude).is_err() {
                tracing::warn!(
                    index,
                    longitude = point.longitude,
                    latitude = point.latitude,
                    "dropping point with invalid coordinates"
                );
                dropped.push(DroppedPoint {
                    index,
                    longitude: point.longitude,
                    latitude: point.latitude,
                });
                continue;
            }
            leaves.push(Node {
                x: lng_x(point.longitude),
                y: lat_y(point.latitude),
                count: 1,
                kind: NodeKind::Point(index),
                children: Vec::new(),
            });
        }

        let mut levels: Vec<Level> = (0..=max_zoom).map(|_| Level::default()).collect();
        levels[usize::from(max_zoom)] = Level::new(leaves);
        for zoom in (min_zoom..max_zoom).rev() {
            let nodes = cluster_level(&levels[usize::from(zoom) + 1], zoom, &options);
            levels[usize::from(zoom)] = Level::new(nodes);
        }

        tracing::debug!(
            points = points.len(),
            dropped = dropped.len(),
            min_zoom,
            max_zoom,
            "cluster index built"
        );

        Self {
            options,
            points,
            levels,
            dropped,
        }
    }

    pub fn dropped(&self) -> &[DroppedPoint] {
        &self.dropped
    }

    /// Floor and clamp a requested zoom into the supported range
    pub fn limit_zoom(&self, zoom: f64) -> u8 {
        let floor = zoom.floor();
        if floor.is_nan() {
            return self.options.min_zoom;
        }
        floor.clamp(f64::from(self.options.min_zoom), f64::from(self.options.max_zoom)) as u8
    }

    /// Markers visible in a viewport
    pub fn markers(&self, viewport: &Viewport) -> Vec<MapMarker<'_, P>> {
        let zoom = self.limit_zoom(viewport.zoom);
        let level = &self.levels[usize::from(zoom)];
        let bbox = viewport.bbox;

        let south = if bbox.south <= -MAP_EDGE_LAT {
            -90.0
        } else {
            bbox.south.min(90.0)
        };
        let north = if bbox.north >= MAP_EDGE_LAT {
            90.0
        } else {
            bbox.north.max(-90.0)
        };
        let mut west = wrap_lng(bbox.west);
        let mut east = if bbox.east == 180.0 {
            180.0
        } else {
            wrap_lng(bbox.east)
        };

        let mut found = Vec::new();
        if bbox.east - bbox.west >= 360.0 {
            west = -180.0;
            east = 180.0;
            collect_in_range(level, west, south, east, north, &mut found);
        } else if west > east {
            // crosses the antimeridian
            collect_in_range(level, west, south, 180.0, north, &mut found);
            collect_in_range(level, -180.0, south, east, north, &mut found);
        } else {
            collect_in_range(level, west, south, east, north, &mut found);
        }
        found.sort_unstable();
        found.dedup();

        found
            .into_iter()
            .map(|i| self.marker(&level.nodes[i]))
            .collect()
    }

    /// Markers one zoom level below a cluster
    pub fn cluster_children(&self, id: ClusterId) -> Result<Vec<MapMarker<'_, P>>, ClusterError> {
        let node = self.cluster_node(id)?;
        let above = &self.levels[usize::from(id.zoom()) + 1];
        Ok(node
            .children
            .iter()
            .map(|&c| self.marker(&above.nodes[c]))
            .collect())
    }

    /// Every input point contained in a cluster, in input order
    pub fn cluster_leaves(&self, id: ClusterId) -> Result<Vec<MapMarker<'_, P>>, ClusterError> {
        let root = self.cluster_node(id)?;

        let mut indices = Vec::with_capacity(root.count);
        let mut stack = vec![(id.zoom(), root)];
        while let Some((zoom, node)) = stack.pop() {
            let above = &self.levels[usize::from(zoom) + 1];
            for &c in &node.children {
                let child = &above.nodes[c];
                match child.kind {
                    NodeKind::Point(index) => indices.push(index),
                    NodeKind::Cluster(child_id) => {
                        stack.push((child_id.zoom(), self.cluster_node(child_id)?))
                    }
                }
            }
        }
        indices.sort_unstable();

        Ok(indices
            .into_iter()
            .map(|index| self.point_marker(index))
            .collect())
    }

    /// Zoom at which a cluster first splits into several markers
    pub fn cluster_expansion_zoom(&self, id: ClusterId) -> Result<u8, ClusterError> {
        self.cluster_node(id)?;
        Ok((id.zoom() + 1).min(self.options.max_zoom))
    }

    /// Look up the marker for a cluster id
    pub fn cluster_marker(&self, id: ClusterId) -> Result<MapMarker<'_, P>, ClusterError> {
        let node = self.cluster_node(id)?;
        Ok(self.marker(node))
    }

    fn cluster_node(&self, id: ClusterId) -> Result<&Node, ClusterError> {
        let zoom = usize::from(id.zoom());
        if zoom >= usize::from(self.options.max_zoom) {
            return Err(ClusterError::UnknownCluster(id));
        }
        self.levels[zoom]
            .nodes
            .get(id.node())
            .filter(|n| n.kind == NodeKind::Cluster(id))
            .ok_or(ClusterError::UnknownCluster(id))
    }

    fn marker(&self, node: &Node) -> MapMarker<'_, P> {
        match node.kind {
            NodeKind::Point(index) => self.point_marker(index),
            NodeKind::Cluster(id) => MapMarker::Cluster {
                id,
                coordinate: Coordinate {
                    latitude: y_lat(node.y),
                    longitude: x_lng(node.x),
                },
                count: node.count,
            },
        }
    }

    fn point_marker(&self, index: usize) -> MapMarker<'_, P> {
        let point = &self.points[index];
        MapMarker::Point {
            index,
            coordinate: Coordinate {
                latitude: point.latitude,
                longitude: point.longitude,
            },
            payload: &point.payload,
        }
    }
}

/// Cluster the nodes of `above` for display at `zoom`
fn cluster_level(above: &Level, zoom: u8, options: &ClusterOptions) -> Vec<Node> {
    let radius = radius_at_zoom(options.radius_px, options.extent, zoom);
    let radius_2 = radius * radius;

    let mut visited = vec![false; above.nodes.len()];
    let mut nodes = Vec::with_capacity(above.nodes.len());

    for i in 0..above.nodes.len() {
        if visited[i] {
            continue;
        }
        visited[i] = true;
        let seed = &above.nodes[i];

        let mut neighbors: Vec<usize> = above
            .tree
            .locate_within_distance([seed.x, seed.y], radius_2)
            .map(|entry| entry.data)
            .filter(|&j| !visited[j])
            .collect();
        neighbors.sort_unstable();

        let count = seed.count + neighbors.iter().map(|&j| above.nodes[j].count).sum::<usize>();

        if neighbors.is_empty() || count < options.min_points {
            nodes.push(seed.carried());
            for &j in &neighbors {
                visited[j] = true;
                nodes.push(above.nodes[j].carried());
            }
            continue;
        }

        let mut wx = seed.x * seed.count as f64;
        let mut wy = seed.y * seed.count as f64;
        let mut children = Vec::with_capacity(neighbors.len() + 1);
        children.push(i);
        for &j in &neighbors {
            visited[j] = true;
            let n = &above.nodes[j];
            wx += n.x * n.count as f64;
            wy += n.y * n.count as f64;
            children.push(j);
        }

        let id = ClusterId::new(zoom, nodes.len());
        nodes.push(Node {
            x: wx / count as f64,
            y: wy / count as f64,
            count,
            kind: NodeKind::Cluster(id),
            children,
        });
    }

    nodes
}

fn collect_in_range(level: &Level, west: f64, south: f64, east: f64, north: f64, out: &mut Vec<usize>) {
    let envelope = AABB::from_corners([lng_x(west), lat_y(north)], [lng_x(east), lat_y(south)]);
    out.extend(level.tree.locate_in_envelope(&envelope).map(|entry| entry.data));
}

fn wrap_lng(lng: f64) -> f64 {
    (lng + 180.0).rem_euclid(360.0) - 180.0
}

/// Result of a one-shot clustering pass
#[derive(Debug, Clone)]
pub struct ClusterOutput<'a, P> {
    pub markers: Vec<MapMarker<'a, P>>,
    pub dropped: Vec<DroppedPoint>,
}

/// Cluster a borrowed point set for one viewport.
///
/// Builds a throwaway index; callers that query several viewports over the
/// same points should keep a [`ClusterIndex`] instead.
pub fn cluster<'a, P>(
    points: &'a [GeoPoint<P>],
    viewport: &Viewport,
    options: &ClusterOptions,
) -> ClusterOutput<'a, P> {
    let borrowed = points
        .iter()
        .map(|p| GeoPoint::new(p.longitude, p.latitude, &p.payload))
        .collect();
    let index = ClusterIndex::load(borrowed, *options);

    let markers = index
        .markers(viewport)
        .into_iter()
        .map(|marker| match marker {
            MapMarker::Cluster {
                id,
                coordinate,
                count,
            } => MapMarker::Cluster {
                id,
                coordinate,
                count,
            },
            MapMarker::Point {
                index,
                coordinate,
                payload,
            } => MapMarker::Point {
                index,
                coordinate,
                payload: *payload,
            },
        })
        .collect();

    ClusterOutput {
        markers,
        dropped: index.dropped().to_vec(),
    }
}
