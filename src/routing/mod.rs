//! Currency routing over the graph of tradable pairs
//!
//! [`find_path`] answers "how do I convert currency A into currency B on
//! this exchange" with an ordered list of currency codes; [`cross_rate`]
//! prices such a path by multiplying last-trade prices along it. The
//! negative-cycle arbitrage detector lives in [`bellman_ford`].

pub mod bellman_ford;

pub use bellman_ford::{Edge, Graph};

use crate::exchange::{AssetClass, Currency, ExchangeConnector, Pair};
use crate::{EngineError, Result};
use petgraph::algo::astar;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use tracing::debug;

/// All pairs on `exchange` whose base currency is `code`
pub async fn match_pairs_for_currency(
    exchange: &dyn ExchangeConnector,
    code: &Currency,
    asset: AssetClass,
) -> Result<Vec<Pair>> {
    let available = exchange.available_pairs(asset).await?;
    Ok(available
        .into_iter()
        .filter(|pair| &pair.base == code)
        .collect())
}

fn intern(
    graph: &mut DiGraph<Currency, u32>,
    vertices: &mut HashMap<Currency, NodeIndex>,
    code: &Currency,
) -> NodeIndex {
    if let Some(index) = vertices.get(code) {
        return *index;
    }
    let index = graph.add_node(code.clone());
    vertices.insert(code.clone(), index);
    index
}

/// Shortest conversion path from `source` to `dest`, as currency codes.
///
/// The graph is built two levels deep: the pairs based on the source
/// currency, then one expansion hop over each of their quote currencies.
/// Routes needing three or more hops are therefore not found; callers that
/// hit this limit get [`EngineError::NoPathFound`] rather than a wrong
/// answer. Arcs run base to quote and are weighted by discovery level, and
/// equal-cost ties resolve to the first edge added, so repeated queries
/// over the same pair metadata always return the same path.
pub async fn find_path(
    exchange: &dyn ExchangeConnector,
    source: &Currency,
    dest: &Currency,
    asset: AssetClass,
) -> Result<Vec<Currency>> {
    let available = exchange.available_pairs(asset).await?;
    let direct: Vec<Pair> = available
        .iter()
        .filter(|pair| &pair.base == source)
        .cloned()
        .collect();
    if direct.is_empty() {
        return Err(EngineError::NoPairsFound(source.to_string()).into());
    }

    let no_path = || EngineError::NoPathFound {
        from: source.to_string(),
        to: dest.to_string(),
    };

    // Level 0 holds the direct pairs; level i + 1 holds the pairs based on
    // the quote currency of the i-th direct pair.
    let mut groups: Vec<(u32, Vec<Pair>)> = vec![(0, direct.clone())];
    for (hop, pair) in direct.iter().enumerate() {
        let expansion: Vec<Pair> = available
            .iter()
            .filter(|candidate| candidate.base == pair.quote)
            .cloned()
            .collect();
        groups.push(((hop + 1) as u32, expansion));
    }

    let mut graph: DiGraph<Currency, u32> = DiGraph::new();
    let mut vertices: HashMap<Currency, NodeIndex> = HashMap::new();
    for (level, pairs) in &groups {
        for pair in pairs {
            let from = intern(&mut graph, &mut vertices, &pair.base);
            let to = intern(&mut graph, &mut vertices, &pair.quote);
            graph.add_edge(from, to, *level);
        }
    }
    debug!(
        source = %source,
        dest = %dest,
        vertices = graph.node_count(),
        edges = graph.edge_count(),
        "currency graph built"
    );

    let start = *vertices.get(source).ok_or_else(no_path)?;
    let goal = *vertices.get(dest).ok_or_else(no_path)?;

    let (_cost, path) = astar(
        &graph,
        start,
        |node| node == goal,
        |edge| *edge.weight(),
        |_| 0,
    )
    .ok_or_else(no_path)?;

    Ok(path.into_iter().map(|index| graph[index].clone()).collect())
}

/// Multiply last-trade prices along a conversion path into one cross rate.
///
/// Consecutive codes form the pairs to price; any failing ticker fetch
/// fails the whole computation.
pub async fn cross_rate(
    exchange: &dyn ExchangeConnector,
    path: &[Currency],
    asset: AssetClass,
) -> Result<f64> {
    if path.len() < 2 {
        anyhow::bail!("conversion path needs at least two currencies");
    }
    let mut rate = 1.0;
    for window in path.windows(2) {
        let pair = Pair::new(window[0].as_str(), window[1].as_str());
        let ticker = exchange.fetch_ticker(&pair, asset).await?;
        rate *= ticker.last;
    }
    Ok(rate)
}

/// Price `base` in units of `target` by routing through intermediate pairs.
pub async fn quote_price(
    exchange: &dyn ExchangeConnector,
    base: &Currency,
    target: &Currency,
    asset: AssetClass,
) -> Result<f64> {
    let target_pairs = match_pairs_for_currency(exchange, target, asset).await?;
    if target_pairs.is_empty() {
        return Err(EngineError::NoPairsFound(target.to_string()).into());
    }

    let path = find_path(exchange, base, target, asset).await?;
    cross_rate(exchange, &path, asset).await
}
