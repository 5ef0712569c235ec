//! Lineage traversal over the index's edge lookups.
//!
//! Backends only answer "who are the parents of X" and "who are the
//! children of X"; the walk itself lives here so every backend gets
//! identical traversal, dedup, and cycle detection.

use std::collections::{BTreeMap, HashSet};

use larder_core::{Error, Result};

use crate::index::{Index, IndexEntry};

/// Bounds for a lineage walk.
#[derive(Debug, Clone, Copy)]
pub struct LineageOptions {
    /// Maximum number of generations away from the starting basket.
    pub max_depth: usize,
}

impl Default for LineageOptions {
    fn default() -> Self {
        Self { max_depth: 999 }
    }
}

/// One basket in a lineage result, with its distance from the start.
///
/// `generation_level` is positive for ancestors and negative for
/// descendants; a basket reachable at several distances appears once
/// per distance.
#[derive(Debug, Clone)]
pub struct LineageRow {
    /// The related basket.
    pub entry: IndexEntry,
    /// Signed generation distance from the starting basket.
    pub generation_level: i64,
}

enum Direction {
    Parents,
    Children,
}

/// All ancestors of `address_or_uuid`, nearest first.
///
/// # Errors
///
/// Returns `NotFound` when the basket is not in the index and
/// `LineageCycle` when the walk revisits a basket already on its own
/// path.
pub async fn get_parents(
    index: &mut (dyn Index + '_),
    address_or_uuid: &str,
    options: LineageOptions,
) -> Result<Vec<LineageRow>> {
    traverse(index, address_or_uuid, options, Direction::Parents).await
}

/// All descendants of `address_or_uuid`, nearest first.
///
/// # Errors
///
/// Same error surface as [`get_parents`].
pub async fn get_children(
    index: &mut (dyn Index + '_),
    address_or_uuid: &str,
    options: LineageOptions,
) -> Result<Vec<LineageRow>> {
    traverse(index, address_or_uuid, options, Direction::Children).await
}

async fn traverse(
    index: &mut (dyn Index + '_),
    address_or_uuid: &str,
    options: LineageOptions,
    direction: Direction,
) -> Result<Vec<LineageRow>> {
    let start = index
        .resolve_uuid(address_or_uuid)
        .await?
        .ok_or_else(|| Error::NotFound(format!("basket not found in index: {address_or_uuid}")))?;

    // Rows keyed by (distance, uuid) so output order falls out of the
    // map. Expansion is deduped per (uuid, distance) to keep diamond
    // graphs linear; the per-branch path still catches cycles because
    // distance grows strictly along any one path.
    let mut rows: BTreeMap<(usize, String), IndexEntry> = BTreeMap::new();
    let mut expanded: HashSet<(String, usize)> = HashSet::new();
    let mut stack: Vec<(String, usize, Vec<String>)> = vec![(start, 0, Vec::new())];

    while let Some((uuid, distance, path)) = stack.pop() {
        if distance >= options.max_depth {
            continue;
        }
        if !expanded.insert((uuid.clone(), distance)) {
            continue;
        }
        let neighbors = match direction {
            Direction::Parents => index.lookup_edges_forward(&uuid).await?,
            Direction::Children => index.lookup_edges_reverse(&uuid).await?,
        };
        let mut next_path = path;
        next_path.push(uuid);
        for neighbor in neighbors {
            if next_path.contains(&neighbor.uuid) {
                return Err(Error::LineageCycle {
                    uuid: neighbor.uuid,
                });
            }
            let key = (distance + 1, neighbor.uuid.clone());
            stack.push((neighbor.uuid.clone(), distance + 1, next_path.clone()));
            rows.entry(key).or_insert(neighbor);
        }
    }

    let sign: i64 = match direction {
        Direction::Parents => 1,
        Direction::Children => -1,
    };
    Ok(rows
        .into_iter()
        .map(|((distance, _), entry)| LineageRow {
            entry,
            generation_level: sign * distance as i64,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::FileIndex;
    use chrono::Utc;
    use larder_core::MemoryBackend;
    use std::sync::Arc;

    async fn seeded_index(edges: &[(&str, &[&str])]) -> FileIndex {
        let storage = Arc::new(MemoryBackend::new());
        let mut index = FileIndex::new(storage, "pantry");
        let entries = edges
            .iter()
            .map(|(uuid, parents)| IndexEntry {
                uuid: uuid.to_string(),
                upload_time: Utc::now(),
                parent_uuids: parents.iter().map(|p| p.to_string()).collect(),
                basket_type: "raw".into(),
                label: String::new(),
                format_version: "0.1.0".into(),
                address: format!("pantry/raw/{uuid}"),
                storage_type: "memory".into(),
            })
            .collect();
        index.track_baskets(entries).await.unwrap();
        index
    }

    #[tokio::test]
    async fn parents_and_children_are_signed_and_sorted() {
        // c -> b -> a
        let mut index = seeded_index(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]).await;

        let parents = get_parents(&mut index, "c", LineageOptions::default())
            .await
            .unwrap();
        let got: Vec<(i64, &str)> = parents
            .iter()
            .map(|r| (r.generation_level, r.entry.uuid.as_str()))
            .collect();
        assert_eq!(got, vec![(1, "b"), (2, "a")]);

        let children = get_children(&mut index, "a", LineageOptions::default())
            .await
            .unwrap();
        let got: Vec<(i64, &str)> = children
            .iter()
            .map(|r| (r.generation_level, r.entry.uuid.as_str()))
            .collect();
        assert_eq!(got, vec![(-1, "b"), (-2, "c")]);
    }

    #[tokio::test]
    async fn diamond_keeps_one_row_per_distance() {
        // d has parents b and c, both with parent a.
        let mut index = seeded_index(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["a"]),
            ("d", &["b", "c"]),
        ])
        .await;

        let parents = get_parents(&mut index, "d", LineageOptions::default())
            .await
            .unwrap();
        let got: Vec<(i64, &str)> = parents
            .iter()
            .map(|r| (r.generation_level, r.entry.uuid.as_str()))
            .collect();
        assert_eq!(got, vec![(1, "b"), (1, "c"), (2, "a")]);
    }

    #[tokio::test]
    async fn same_basket_at_two_distances_appears_twice() {
        // a is both parent and grandparent of c.
        let mut index = seeded_index(&[("a", &[]), ("b", &["a"]), ("c", &["a", "b"])]).await;

        let parents = get_parents(&mut index, "c", LineageOptions::default())
            .await
            .unwrap();
        let got: Vec<(i64, &str)> = parents
            .iter()
            .map(|r| (r.generation_level, r.entry.uuid.as_str()))
            .collect();
        assert_eq!(got, vec![(1, "a"), (1, "b"), (2, "a")]);
    }

    #[tokio::test]
    async fn two_node_cycle_is_detected() {
        let mut index = seeded_index(&[("a", &["b"]), ("b", &["a"])]).await;

        let err = get_parents(&mut index, "a", LineageOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LineageCycle { .. }));
    }

    #[tokio::test]
    async fn depth_bound_truncates_the_walk() {
        let mut index = seeded_index(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]).await;

        let parents = get_parents(&mut index, "c", LineageOptions { max_depth: 1 })
            .await
            .unwrap();
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].entry.uuid, "b");
    }

    #[tokio::test]
    async fn unknown_basket_is_not_found() {
        let mut index = seeded_index(&[("a", &[])]).await;
        let err = get_parents(&mut index, "nope", LineageOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
