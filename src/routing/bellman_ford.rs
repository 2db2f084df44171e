//! Negative-cycle detection over a weighted currency graph
//!
//! Edge weights are the negative logarithm of a quoted exchange rate, so a
//! negative-weight cycle corresponds to a round trip whose rate product
//! exceeds one: a profitable arbitrage loop. The functions here are pure;
//! given identical input they always produce identical output.

/// A weighted directed edge between two dense vertex ids
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    /// Source vertex
    pub from: usize,
    /// Destination vertex
    pub to: usize,
    /// Edge weight
    pub weight: f64,
}

impl Edge {
    /// Create an edge with an explicit weight
    pub fn new(from: usize, to: usize, weight: f64) -> Self {
        Self { from, to, weight }
    }

    /// Create an edge from a directly quoted exchange rate
    pub fn from_rate(from: usize, to: usize, rate: f64) -> Self {
        Self {
            from,
            to,
            weight: -rate.ln(),
        }
    }
}

/// A directed weighted graph over vertices `0..vertex_count`
#[derive(Debug, Clone)]
pub struct Graph {
    vertex_count: usize,
    edges: Vec<Edge>,
}

impl Graph {
    /// Create a graph; vertex ids in `edges` must be below `vertex_count`
    pub fn new(vertex_count: usize, edges: Vec<Edge>) -> Self {
        Self {
            vertex_count,
            edges,
        }
    }

    /// Number of vertices
    pub fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    /// Shortest-path tree from `source`: `(predecessors, distances)`.
    ///
    /// Standard Bellman-Ford: `|V| - 1` relaxation passes over the edge
    /// list, stopping early as soon as a full pass changes nothing. The
    /// early exit is an optimization only; correctness does not depend on
    /// it. Distances start at positive infinity except the source.
    pub fn bellman_ford(&self, source: usize) -> (Vec<usize>, Vec<f64>) {
        let size = self.vertex_count;
        let mut distances = vec![f64::INFINITY; size];
        let mut predecessors = vec![0usize; size];
        distances[source] = 0.0;

        for _ in 0..size.saturating_sub(1) {
            let mut changes = 0usize;
            for edge in &self.edges {
                let candidate = distances[edge.from] + edge.weight;
                if candidate < distances[edge.to] {
                    distances[edge.to] = candidate;
                    predecessors[edge.to] = edge.from;
                    changes += 1;
                }
            }
            if changes == 0 {
                break;
            }
        }
        (predecessors, distances)
    }

    /// A negative-weight cycle reachable from `source`, or `None`.
    ///
    /// After full relaxation, any edge that still admits an improvement
    /// proves a negative cycle; the cycle itself is recovered by walking
    /// predecessor links backward from the search source until a vertex
    /// repeats, then slicing from its first occurrence to the repetition
    /// inclusive. The result starts and ends at the repeated vertex.
    pub fn find_negative_cycle(
        &self,
        predecessors: &[usize],
        distances: &[f64],
        source: usize,
    ) -> Option<Vec<usize>> {
        for edge in &self.edges {
            if distances[edge.from] + edge.weight < distances[edge.to] {
                return Some(cycle_from(predecessors, source));
            }
        }
        None
    }

    /// Relax and extract in one call
    pub fn find_arbitrage_loop(&self, source: usize) -> Option<Vec<usize>> {
        let (predecessors, distances) = self.bellman_ford(source);
        self.find_negative_cycle(&predecessors, &distances, source)
    }
}

/// Walk predecessor links from `source` until a vertex repeats and return
/// the closed cycle in walk order.
fn cycle_from(predecessors: &[usize], source: usize) -> Vec<usize> {
    let size = predecessors.len();
    let mut walk = Vec::with_capacity(size + 1);
    walk.push(source);

    let mut first_seen = vec![usize::MAX; size];
    first_seen[source] = 0;

    let mut next = source;
    loop {
        next = predecessors[next];
        walk.push(next);
        if first_seen[next] != usize::MAX {
            return walk[first_seen[next]..].to_vec();
        }
        first_seen[next] = walk.len() - 1;
    }
}
