use super::{Boundary, LocalDof};
use crate::basis::{lobatto_at, LegendreShapeFn, LobattoShapeFn, ShapeFn};
use crate::domain::mesh::{elem::Elem, space::Point, Mesh};
use crate::domain::DomainError;
use crate::integration::glq::{cached_gauss_quadrature_points, MAX_CACHED_GLQ_POINTS};

use std::collections::{BTreeMap, HashMap};

/// Bits of a lattice coordinate spent on the position inside a cell of the base grid
const FRACTION_BITS: u32 = 32;
const CELL: u64 = 1 << FRACTION_BITS;

const BOTTOM: usize = 0;
const TOP: usize = 1;
const LEFT: usize = 2;
const RIGHT: usize = 3;

/// Exact integer coordinates for every vertex of the Mesh
///
/// The base Elements must tile a grid of cells. Inside a cell, refinement produces dyadic fractions of the cell
/// width, which are stored exactly in the low [FRACTION_BITS] bits.
struct Lattice {
    xs: Vec<f64>,
    ys: Vec<f64>,
    cells: Vec<[usize; 2]>,
}

impl Lattice {
    fn new(mesh: &Mesh) -> Result<Self, DomainError> {
        let (x_min, x_max, y_min, y_max) = mesh.elements.iter().fold(
            (f64::MAX, f64::MIN, f64::MAX, f64::MIN),
            |(x0, x1, y0, y1), element| {
                (
                    x0.min(element.bounds.min.x),
                    x1.max(element.bounds.max.x),
                    y0.min(element.bounds.min.y),
                    y1.max(element.bounds.max.y),
                )
            },
        );
        let tol = 1e-12 * (x_max - x_min).max(y_max - y_min);

        let xs = distinct(
            mesh.elements
                .iter()
                .flat_map(|element| [element.bounds.min.x, element.bounds.max.x]),
            tol,
        );
        let ys = distinct(
            mesh.elements
                .iter()
                .flat_map(|element| [element.bounds.min.y, element.bounds.max.y]),
            tol,
        );
        let nx = xs.len() - 1;

        let mut cells = vec![[0; 2]; mesh.elements.len()];
        let mut covered = vec![false; nx * (ys.len() - 1)];

        for element in mesh.elements.iter() {
            let grid_index = |coords: &[f64], value: f64| coords.iter().position(|c| (c - value).abs() <= tol);
            let (ix, iy) = match (
                grid_index(&xs[..], element.bounds.min.x),
                grid_index(&xs[..], element.bounds.max.x),
                grid_index(&ys[..], element.bounds.min.y),
                grid_index(&ys[..], element.bounds.max.y),
            ) {
                (Some(ix0), Some(ix1), Some(iy0), Some(iy1)) if ix1 == ix0 + 1 && iy1 == iy0 + 1 => (ix0, iy0),
                _ => {
                    return Err(DomainError::NonConformingMesh(format!(
                        "Element {} spans more than one cell of the vertex grid",
                        element.id
                    )))
                }
            };

            if covered[iy * nx + ix] {
                return Err(DomainError::NonConformingMesh(format!(
                    "Element {} overlaps another Element",
                    element.id
                )));
            }
            covered[iy * nx + ix] = true;
            cells[element.id] = [ix, iy];
        }

        if covered.iter().any(|c| !c) {
            return Err(DomainError::NonConformingMesh(String::from(
                "Elements do not cover a rectangle",
            )));
        }

        Ok(Self { xs, ys, cells })
    }

    /// `[[x0, x1], [y0, y1]]` of an Elem in lattice coordinates
    fn elem_span(&self, elem: &Elem) -> [[u64; 2]; 2] {
        let [ix, iy] = self.cells[elem.element.id];
        let [[u0, u1], [v0, v1]] = elem.parametric_range();
        [
            [to_lattice(ix, u0), to_lattice(ix, u1)],
            [to_lattice(iy, v0), to_lattice(iy, v1)],
        ]
    }

    fn point(&self, [x, y]: [u64; 2]) -> Point {
        Point::new(to_real(&self.xs, x), to_real(&self.ys, y))
    }

    fn line_on_boundary(&self, dir: Dir, coord: u64) -> bool {
        let last = match dir {
            Dir::Horizontal => self.ys.len() - 1,
            Dir::Vertical => self.xs.len() - 1,
        } as u64
            * CELL;
        coord == 0 || coord == last
    }

    fn vertex_on_boundary(&self, [x, y]: [u64; 2]) -> bool {
        self.line_on_boundary(Dir::Vertical, x) || self.line_on_boundary(Dir::Horizontal, y)
    }
}

fn distinct(values: impl Iterator<Item = f64>, tol: f64) -> Vec<f64> {
    let mut values: Vec<f64> = values.collect();
    values.sort_by(|a, b| a.total_cmp(b));
    values.dedup_by(|a, b| (*a - *b).abs() <= tol);
    values
}

fn to_lattice(cell: usize, t: f64) -> u64 {
    cell as u64 * CELL + ((t + 1.0) / 2.0 * CELL as f64).round() as u64
}

fn to_real(coords: &[f64], l: u64) -> f64 {
    let cell = (l / CELL) as usize;
    if cell + 1 >= coords.len() {
        return coords[coords.len() - 1];
    }
    let frac = (l % CELL) as f64 / CELL as f64;
    coords[cell] + frac * (coords[cell + 1] - coords[cell])
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Dir {
    /// `y = const`
    Horizontal,
    /// `x = const`
    Vertical,
}

/// Which side of a line an Elem lies on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Below,
    Above,
}

/// One edge of an active Elem lying on a line of the lattice
#[derive(Clone, Copy, Debug)]
struct Segment {
    elem: usize,
    edge: usize,
    side: Side,
    span: [u64; 2],
    order: usize,
}

/// An edge that carries its own bubble functions
#[derive(Clone, Copy, Debug)]
struct EdgeEntity {
    dir: Dir,
    coord: u64,
    span: [u64; 2],
    /// Bubbles `2..=order` are active
    order: usize,
    on_boundary: bool,
    owner: usize,
}

impl EdgeEntity {
    fn vertex(&self, position: u64) -> [u64; 2] {
        match self.dir {
            Dir::Horizontal => [position, self.coord],
            Dir::Vertical => [self.coord, position],
        }
    }

    /// Parametric coordinate of a position along the edge
    fn param(&self, position: u64) -> f64 {
        let [a, b] = self.span;
        2.0 * (position - a) as f64 / (b - a) as f64 - 1.0
    }
}

#[derive(Clone, Copy, Debug)]
enum Role {
    /// The Elem's edge is (or shares) an [EdgeEntity]
    Master(usize),
    /// The Elem's edge covers `range` (in parametric coordinates) of a larger neighbor's edge
    Slave { master: usize, range: [f64; 2] },
}

/// A vertex in the interior of a master edge
#[derive(Clone, Copy, Debug)]
struct Hanging {
    master: usize,
    s: f64,
}

/// Find the segment among `others` (sorted and disjoint) that contains `segment`
fn container<'s>(others: &'s [Segment], segment: &Segment) -> Option<&'s Segment> {
    let idx = others.partition_point(|other| other.span[0] <= segment.span[0]);
    let candidate = others.get(idx.checked_sub(1)?)?;
    (candidate.span[1] >= segment.span[1]).then(|| candidate)
}

struct EdgeGraph {
    entities: Vec<EdgeEntity>,
    roles: Vec<[Option<Role>; 4]>,
    hanging: HashMap<[u64; 2], Hanging>,
}

impl EdgeGraph {
    fn build(mesh: &Mesh, lattice: &Lattice, spans: &[Option<[[u64; 2]; 2]>]) -> Result<Self, DomainError> {
        let mut lines: BTreeMap<(Dir, u64), Vec<Segment>> = BTreeMap::new();

        for elem in mesh.shell_elems() {
            let [[x0, x1], [y0, y1]] = match spans[elem.id] {
                Some(span) => span,
                None => continue,
            };
            let ni = elem.poly_orders.ni as usize;
            let nj = elem.poly_orders.nj as usize;

            for (edge, dir, coord, side, span, order) in [
                (BOTTOM, Dir::Horizontal, y0, Side::Above, [x0, x1], ni),
                (TOP, Dir::Horizontal, y1, Side::Below, [x0, x1], ni),
                (LEFT, Dir::Vertical, x0, Side::Above, [y0, y1], nj),
                (RIGHT, Dir::Vertical, x1, Side::Below, [y0, y1], nj),
            ] {
                lines.entry((dir, coord)).or_default().push(Segment {
                    elem: elem.id,
                    edge,
                    side,
                    span,
                    order,
                });
            }
        }

        let mut graph = Self {
            entities: Vec::new(),
            roles: vec![[None; 4]; mesh.elems().len()],
            hanging: HashMap::new(),
        };

        for ((dir, coord), segments) in lines {
            let on_boundary = lattice.line_on_boundary(dir, coord);
            let (mut below, mut above): (Vec<Segment>, Vec<Segment>) =
                segments.into_iter().partition(|segment| segment.side == Side::Below);
            below.sort_by_key(|segment| segment.span[0]);
            above.sort_by_key(|segment| segment.span[0]);

            // segments that are not strictly inside a segment on the other side own an edge
            for (own, other) in [(&below, &above), (&above, &below)] {
                for segment in own.iter() {
                    let partner = match container(other, segment) {
                        Some(c) if c.span == segment.span => {
                            if segment.side == Side::Above {
                                continue;
                            }
                            Some(*c)
                        }
                        Some(_) => continue,
                        None => None,
                    };

                    let id = graph.entities.len();
                    graph.entities.push(EdgeEntity {
                        dir,
                        coord,
                        span: segment.span,
                        order: partner.map_or(segment.order, |p| p.order.min(segment.order)),
                        on_boundary,
                        owner: segment.elem,
                    });
                    graph.roles[segment.elem][segment.edge] = Some(Role::Master(id));
                    if let Some(p) = partner {
                        graph.roles[p.elem][p.edge] = Some(Role::Master(id));
                    }
                }
            }

            for (own, other) in [(&below, &above), (&above, &below)] {
                for segment in own.iter() {
                    let master_segment = match container(other, segment) {
                        Some(c) if c.span != segment.span => c,
                        _ => continue,
                    };
                    let master = match graph.roles[master_segment.elem][master_segment.edge] {
                        Some(Role::Master(id)) => id,
                        _ => {
                            return Err(DomainError::NonConformingMesh(format!(
                                "edge of Elem {} is not nested inside its neighbors",
                                segment.elem
                            )))
                        }
                    };

                    let entity = &mut graph.entities[master];
                    entity.order = entity.order.min(segment.order);
                    let range = [entity.param(segment.span[0]), entity.param(segment.span[1])];
                    graph.roles[segment.elem][segment.edge] = Some(Role::Slave { master, range });

                    for (position, s) in segment.span.into_iter().zip(range) {
                        if position > entity.span[0] && position < entity.span[1] {
                            graph.hanging.insert(entity.vertex(position), Hanging { master, s });
                        }
                    }
                }
            }
        }

        Ok(graph)
    }
}

/// Kind of an Elem-local Lobatto function
enum LocalKind {
    /// `[i, j]` in `{0, 1}`: left/bottom or right/top
    Vertex([usize; 2]),
    /// Local edge and bubble order
    Edge(usize, usize),
    Interior,
}

fn local_kind([i, j]: [usize; 2]) -> LocalKind {
    match (i < 2, j < 2) {
        (true, true) => LocalKind::Vertex([i, j]),
        (false, true) => LocalKind::Edge(if j == 0 { BOTTOM } else { TOP }, i),
        (true, false) => LocalKind::Edge(if i == 0 { LEFT } else { RIGHT }, j),
        (false, false) => LocalKind::Interior,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Entity {
    Vertex([u64; 2]),
    Bubble(usize, usize),
    Interior(usize, usize),
}

enum VertexState {
    Visiting,
    Resolved(LocalDof),
}

/// The result of DoF assignment: one [LocalDof] per Elem-local function
pub(super) struct ConformingSpace {
    pub elem_ranges: Vec<Option<(usize, usize)>>,
    pub local: Vec<LocalDof>,
    pub num_dofs: usize,
    pub num_hanging: usize,
}

struct Builder<'a> {
    lattice: Lattice,
    spans: Vec<Option<[[u64; 2]; 2]>>,
    graph: EdgeGraph,
    boundary: &'a Boundary,
    lifts: Vec<Vec<f64>>,
    index: HashMap<Entity, usize>,
    vertices: HashMap<[u64; 2], VertexState>,
}

impl ConformingSpace {
    pub fn build(mesh: &Mesh, boundary: &Boundary) -> Result<Self, DomainError> {
        let lattice = Lattice::new(mesh)?;
        let spans: Vec<Option<[[u64; 2]; 2]>> = mesh
            .elems()
            .iter()
            .map(|elem| (!elem.has_children()).then(|| lattice.elem_span(elem)))
            .collect();
        let graph = EdgeGraph::build(mesh, &lattice, &spans)?;

        let lifts = match boundary {
            Boundary::Essential(g) => graph
                .entities
                .iter()
                .map(|entity| {
                    if entity.on_boundary {
                        boundary_lift(&lattice, entity, g.as_ref())
                    } else {
                        Vec::new()
                    }
                })
                .collect(),
            Boundary::Natural => Vec::new(),
        };

        let mut builder = Builder {
            lattice,
            spans,
            graph,
            boundary,
            lifts,
            index: HashMap::new(),
            vertices: HashMap::new(),
        };

        for elem in mesh.shell_elems() {
            for (local, ij) in elem.poly_orders.permutations().enumerate() {
                if let Some(entity) = builder.free_entity(elem.id, local, ij) {
                    let next = builder.index.len();
                    builder.index.entry(entity).or_insert(next);
                }
            }
        }

        let mut elem_ranges = vec![None; mesh.elems().len()];
        let mut local = Vec::new();
        for elem in mesh.shell_elems() {
            let start = local.len();
            for (local_idx, ij) in elem.poly_orders.permutations().enumerate() {
                local.push(builder.local_dof(elem.id, local_idx, ij)?);
            }
            elem_ranges[elem.id] = Some((start, local.len()));
        }

        Ok(Self {
            elem_ranges,
            local,
            num_dofs: builder.index.len(),
            num_hanging: builder.graph.hanging.len(),
        })
    }
}

impl<'a> Builder<'a> {
    fn essential(&self) -> bool {
        self.boundary.is_essential()
    }

    fn vertex_key(&self, elem_id: usize, [i, j]: [usize; 2]) -> [u64; 2] {
        match self.spans[elem_id] {
            Some([xs, ys]) => [xs[i], ys[j]],
            None => [0, 0],
        }
    }

    /// The unconstrained entity a local function belongs to (if any)
    fn free_entity(&self, elem_id: usize, local: usize, ij: [usize; 2]) -> Option<Entity> {
        match local_kind(ij) {
            LocalKind::Vertex(corner) => {
                let key = self.vertex_key(elem_id, corner);
                let fixed = self.essential() && self.lattice.vertex_on_boundary(key);
                (!fixed && !self.graph.hanging.contains_key(&key)).then(|| Entity::Vertex(key))
            }
            LocalKind::Edge(edge, k) => match self.graph.roles[elem_id][edge] {
                Some(Role::Master(id)) => {
                    let entity = &self.graph.entities[id];
                    let fixed = self.essential() && entity.on_boundary;
                    (!fixed && k <= entity.order).then(|| Entity::Bubble(id, k))
                }
                _ => None,
            },
            LocalKind::Interior => Some(Entity::Interior(elem_id, local)),
        }
    }

    fn free(&self, entity: Entity) -> Result<LocalDof, DomainError> {
        self.index
            .get(&entity)
            .map(|index| LocalDof::free(*index))
            .ok_or_else(|| DomainError::NonConformingMesh(format!("{:?} was never numbered", entity)))
    }

    fn local_dof(&mut self, elem_id: usize, local: usize, ij: [usize; 2]) -> Result<LocalDof, DomainError> {
        match local_kind(ij) {
            LocalKind::Vertex(corner) => {
                let key = self.vertex_key(elem_id, corner);
                self.vertex_dof(key)
            }
            LocalKind::Edge(edge, k) => match self.graph.roles[elem_id][edge] {
                Some(Role::Master(id)) if k <= self.graph.entities[id].order => self.bubble_dof(id, k),
                Some(Role::Master(_)) => Ok(LocalDof::default()),
                Some(Role::Slave { master, range }) => self.slave_bubble(master, range, k),
                None => Err(DomainError::NonConformingMesh(format!(
                    "Elem {} has an edge outside of the lattice",
                    elem_id
                ))),
            },
            LocalKind::Interior => self.free(Entity::Interior(elem_id, local)),
        }
    }

    fn bubble_dof(&self, master: usize, k: usize) -> Result<LocalDof, DomainError> {
        if self.essential() && self.graph.entities[master].on_boundary {
            Ok(LocalDof::fixed(self.lifts[master][k - 2]))
        } else {
            self.free(Entity::Bubble(master, k))
        }
    }

    /// Bubble `k` of an edge covering `[sa, sb]` of a master edge, written in terms of the master's bubbles
    ///
    /// `c_km = ∫ d/dt l_m(s(t)) l_k'(t) dt` where `s(t)` maps the slave edge into the master edge. Master bubbles
    /// of lower order than `k` don't contribute.
    fn slave_bubble(&self, master: usize, [sa, sb]: [f64; 2], k: usize) -> Result<LocalDof, DomainError> {
        let order = self.graph.entities[master].order;
        if k > order {
            return Ok(LocalDof::default());
        }

        let (t, weights) = cached_gauss_quadrature_points(order + 1);
        let s: Vec<f64> = t.iter().map(|t| sa + (t + 1.0) * (sb - sa) / 2.0).collect();
        let on_master = LobattoShapeFn::with(order, &s);
        let on_slave = LobattoShapeFn::with(k, &t);

        let mut dof = LocalDof::default();
        for m in k..=order {
            let c = (sb - sa) / 2.0
                * (0..t.len())
                    .map(|p| on_master.poly_d1(m, p) * on_slave.poly_d1(k, p) * weights[p])
                    .sum::<f64>();
            dof.add_scaled(c, &self.bubble_dof(master, m)?);
        }

        Ok(dof)
    }

    fn vertex_dof(&mut self, key: [u64; 2]) -> Result<LocalDof, DomainError> {
        match self.vertices.get(&key) {
            Some(VertexState::Resolved(dof)) => return Ok(dof.clone()),
            Some(VertexState::Visiting) => {
                let owner = self.graph.hanging.get(&key).map_or(0, |h| self.graph.entities[h.master].owner);
                return Err(DomainError::CircularConstraint(owner));
            }
            None => (),
        }

        let dof = match self.graph.hanging.get(&key).copied() {
            Some(Hanging { master, s }) => {
                self.vertices.insert(key, VertexState::Visiting);

                let entity = self.graph.entities[master];
                let (l, _) = lobatto_at(entity.order.max(1), s);

                let mut dof = LocalDof::default();
                dof.add_scaled(l[0], &self.vertex_dof(entity.vertex(entity.span[0]))?);
                dof.add_scaled(l[1], &self.vertex_dof(entity.vertex(entity.span[1]))?);
                for (k, lk) in l.iter().enumerate().skip(2) {
                    dof.add_scaled(*lk, &self.bubble_dof(master, k)?);
                }
                dof
            }
            None => match self.boundary.value(&self.lattice.point(key)) {
                Some(value) if self.lattice.vertex_on_boundary(key) => LocalDof::fixed(value),
                _ => self.free(Entity::Vertex(key))?,
            },
        };

        self.vertices.insert(key, VertexState::Resolved(dof.clone()));
        Ok(dof)
    }
}

/// Coefficients of the edge bubbles `2..=order` approximating boundary data `g` along an edge
///
/// The bubble part of `g` is projected in the `H1` seminorm: `b_k = ∫ g' l_k'`, integrated by parts so that only
/// values of `g` are needed.
fn boundary_lift(lattice: &Lattice, entity: &EdgeEntity, g: &(dyn Fn(&Point) -> f64 + Send + Sync)) -> Vec<f64> {
    if entity.order < 2 {
        return Vec::new();
    }

    let start = lattice.point(entity.vertex(entity.span[0]));
    let end = lattice.point(entity.vertex(entity.span[1]));
    let along = |s: f64| {
        Point::new(
            start.x + (s + 1.0) / 2.0 * (end.x - start.x),
            start.y + (s + 1.0) / 2.0 * (end.y - start.y),
        )
    };

    let (points, weights) = cached_gauss_quadrature_points((2 * entity.order + 2).min(MAX_CACHED_GLQ_POINTS));
    let samples: Vec<f64> = points.iter().map(|s| g(&along(*s))).collect();
    let legendre = LegendreShapeFn::with(entity.order, &points);
    let (g_start, g_end) = (g(&start), g(&end));

    (2..=entity.order)
        .map(|k| {
            // P_n(-1) = (-1)^n
            let n = k - 1;
            let sign = if n % 2 == 0 { 1.0 } else { -1.0 };
            let interior: f64 = (0..points.len())
                .map(|p| samples[p] * legendre.poly_d1(n, p) * weights[p])
                .sum();
            ((2 * k - 1) as f64 / 2.0).sqrt() * (g_end - sign * g_start - interior)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mesh::{h_refinement::HRef, space::Rect};

    #[test]
    fn lattice_coordinates_are_exact() {
        let mut mesh = Mesh::rectangular(Rect::new(Point::new(-1.0, 0.0), Point::new(2.0, 1.0)), [3, 1]);
        mesh.h_refine_elems(vec![1], HRef::T).unwrap();
        mesh.h_refine_elems(vec![3], HRef::U).unwrap();

        let lattice = Lattice::new(&mesh).unwrap();
        let [[x0, x1], [y0, y1]] = lattice.elem_span(&mesh.elems()[8]);
        assert_eq!(x0, CELL + CELL / 4);
        assert_eq!(x1, CELL + CELL / 2);
        assert_eq!([y0, y1], [0, CELL / 2]);

        let corner = lattice.point([x1, y1]);
        assert!((corner.x - 0.5).abs() < 1e-14);
        assert!((corner.y - 0.5).abs() < 1e-14);
        assert!(lattice.vertex_on_boundary([x0, y0]));
        assert!(!lattice.vertex_on_boundary([x1, y1]));
    }

    #[test]
    fn slave_edges_follow_their_master() {
        let mut mesh = Mesh::rectangular(Rect::new(Point::new(0.0, 0.0), Point::new(2.0, 1.0)), [2, 1]);
        mesh.set_global_expansion_orders([3, 3]).unwrap();
        mesh.h_refine_elems(vec![1], HRef::V).unwrap();
        mesh.set_expansion_on_elems(vec![2], [4, 4]).unwrap();

        let space = ConformingSpace::build(&mesh, &Boundary::Natural).unwrap();
        assert_eq!(space.num_hanging, 1);

        // the restriction of a cubic master bubble onto a half edge spans the slave bubbles up to order 3
        let (start, _) = space.elem_ranges[2].unwrap();
        let orders = mesh.elems()[2].poly_orders;
        let bubble = |k: usize| &space.local[start + crate::basis::basis_index(&orders, [0, k])];
        assert_eq!(bubble(2).terms.len(), 2);
        assert_eq!(bubble(3).terms.len(), 1);
        assert!((bubble(3).terms[0].1 - 0.125).abs() < 1e-12);
        assert_eq!(bubble(4), &LocalDof::default());
    }
}
