use crate::error::{PipelineError, Result};
use crate::geo::{GeoId, Vintage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// One weighted correspondence between a source-vintage tract and a
/// target-vintage tract. Weight is the estimated share of the source
/// geography's housing units falling inside the target geography.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrosswalkEdge {
    pub source: GeoId,
    pub source_vintage: Vintage,
    pub target: GeoId,
    pub target_vintage: Vintage,
    pub weight: f64,
}

/// The full many-to-many correspondence table as read from disk.
#[derive(Debug, Default)]
pub struct CrosswalkTable {
    edges: Vec<CrosswalkEdge>,
}

impl CrosswalkTable {
    pub fn new(edges: Vec<CrosswalkEdge>) -> Self {
        Self { edges }
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Collapse the weighted many-to-many correspondence into a single-valued
    /// mapping usable as a join key.
    ///
    /// Per source (GeoId, vintage) group: edges with weight <= 0 are
    /// discarded, the maximum-weight edge wins, and a weight tie goes to the
    /// lexicographically smallest target id. The tie-break is arbitrary but
    /// reproducible; it is kept for output compatibility, not because the
    /// smallest id is the "true" plurality winner. A group left with no
    /// candidate is a hard failure naming the offending source id.
    pub fn resolve(&self) -> Result<ResolvedMapping> {
        let mut groups: BTreeMap<(GeoId, Vintage), Vec<&CrosswalkEdge>> = BTreeMap::new();
        for edge in &self.edges {
            groups
                .entry((edge.source.clone(), edge.source_vintage))
                .or_default()
                .push(edge);
        }

        let group_count = groups.len();
        let mut map: BTreeMap<(GeoId, Vintage), GeoId> = BTreeMap::new();
        for ((source, vintage), candidates) in groups {
            let mut best: Option<&CrosswalkEdge> = None;
            for edge in candidates {
                if edge.weight <= 0.0 {
                    continue;
                }
                best = match best {
                    None => Some(edge),
                    Some(b) if edge.weight > b.weight => Some(edge),
                    Some(b) if edge.weight == b.weight && edge.target < b.target => Some(edge),
                    keep => keep,
                };
            }

            match best {
                Some(edge) => {
                    map.insert((source, vintage), edge.target.clone());
                }
                None => {
                    return Err(PipelineError::Crosswalk {
                        geoid: source.to_string(),
                        vintage,
                        reason: "no positive-weight target edge".to_string(),
                    });
                }
            }
        }

        // One target per source group, by construction
        debug_assert_eq!(map.len(), group_count);
        info!(
            edges = self.edges.len(),
            sources = map.len(),
            "crosswalk resolved"
        );
        Ok(ResolvedMapping { map })
    }
}

/// Single-valued function (source GeoId, source vintage) -> target GeoId.
#[derive(Debug, Default)]
pub struct ResolvedMapping {
    map: BTreeMap<(GeoId, Vintage), GeoId>,
}

impl ResolvedMapping {
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Target-vintage id for a source id, or `None` when the source tract is
    /// absent from the correspondence table. The identity era (source vintage
    /// equal to target vintage) maps every id to itself without a lookup.
    pub fn target_for(
        &self,
        source: &GeoId,
        source_vintage: Vintage,
        target_vintage: Vintage,
    ) -> Option<GeoId> {
        if source_vintage == target_vintage {
            return Some(source.clone());
        }
        self.map.get(&(source.clone(), source_vintage)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(source: &str, sv: Vintage, target: &str, tv: Vintage, weight: f64) -> CrosswalkEdge {
        CrosswalkEdge {
            source: GeoId::from_canonical(source).unwrap(),
            source_vintage: sv,
            target: GeoId::from_canonical(target).unwrap(),
            target_vintage: tv,
            weight,
        }
    }

    #[test]
    fn test_max_weight_wins() {
        let table = CrosswalkTable::new(vec![
            edge("06037123400", 1990, "06037123401", 2010, 0.3),
            edge("06037123400", 1990, "06037123402", 2010, 0.7),
        ]);
        let mapping = table.resolve().unwrap();
        let src = GeoId::from_canonical("06037123400").unwrap();
        assert_eq!(
            mapping.target_for(&src, 1990, 2010).unwrap().as_str(),
            "06037123402"
        );
    }

    #[test]
    fn test_tie_breaks_to_lexicographically_smallest_target() {
        // Equal weights: "...01" < "...02" must win, every run
        for _ in 0..5 {
            let table = CrosswalkTable::new(vec![
                edge("06037123400", 1990, "06037123402", 2010, 0.5),
                edge("06037123400", 1990, "06037123401", 2010, 0.5),
            ]);
            let mapping = table.resolve().unwrap();
            let src = GeoId::from_canonical("06037123400").unwrap();
            assert_eq!(
                mapping.target_for(&src, 1990, 2010).unwrap().as_str(),
                "06037123401"
            );
        }
    }

    #[test]
    fn test_zero_weight_edges_are_discarded() {
        let table = CrosswalkTable::new(vec![
            edge("06037123400", 1990, "06037123409", 2010, 0.0),
            edge("06037123400", 1990, "06037123405", 2010, 0.1),
        ]);
        let mapping = table.resolve().unwrap();
        let src = GeoId::from_canonical("06037123400").unwrap();
        assert_eq!(
            mapping.target_for(&src, 1990, 2010).unwrap().as_str(),
            "06037123405"
        );
    }

    #[test]
    fn test_group_without_positive_weight_aborts_naming_the_source() {
        let table = CrosswalkTable::new(vec![edge(
            "06037123400",
            1990,
            "06037123409",
            2010,
            0.0,
        )]);
        let err = table.resolve().unwrap_err();
        assert!(err.to_string().contains("06037123400"));
    }

    #[test]
    fn test_every_source_resolves_to_exactly_one_target() {
        let table = CrosswalkTable::new(vec![
            edge("06037123400", 1990, "06037123401", 2010, 0.4),
            edge("06037123400", 1990, "06037123402", 2010, 0.6),
            edge("06037567800", 1990, "06037567801", 2010, 1.0),
            edge("06037567800", 2000, "06037567802", 2010, 1.0),
        ]);
        let mapping = table.resolve().unwrap();
        // Three distinct (source, vintage) groups, three rows out
        assert_eq!(mapping.len(), 3);
    }

    #[test]
    fn test_identity_era_bypasses_the_table() {
        let mapping = ResolvedMapping::default();
        let src = GeoId::from_canonical("06037123456").unwrap();
        assert_eq!(mapping.target_for(&src, 2010, 2010).unwrap(), src);
        assert!(mapping.target_for(&src, 1990, 2010).is_none());
    }
}
