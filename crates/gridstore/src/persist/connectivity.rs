use std::collections::{HashMap, VecDeque};

use crate::host::TileCoord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilePlacement {
    pub coord: TileCoord,
    pub tile_type: String,
}

impl TilePlacement {
    pub fn new(x: i32, y: i32, tile_type: impl Into<String>) -> Self {
        Self {
            coord: TileCoord::new(x, y),
            tile_type: tile_type.into(),
        }
    }
}

/// A group of placements unreachable from the main lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetachedFragment {
    pub seed: TileCoord,
    pub tiles: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortedPlacements {
    pub placements: Vec<TilePlacement>,
    pub detached: Vec<DetachedFragment>,
}

/// Orders placements so that, for the fragment containing the seed tile,
/// every prefix of the output is 4-connected.
///
/// The seed is the placement nearest the origin (ties: lowest `y`, lowest
/// `x`, earliest input). Placements the flood fill cannot reach follow the
/// main fragment, each remaining fragment flood-filled from its own seed
/// and reported in `detached`.
pub fn sort_for_connectivity(placements: Vec<TilePlacement>) -> SortedPlacements {
    let unique = dedup_last_wins(placements);
    if unique.len() <= 1 {
        return SortedPlacements {
            placements: unique,
            detached: Vec::new(),
        };
    }

    let index_by_coord = unique
        .iter()
        .enumerate()
        .map(|(index, placement)| (placement.coord, index))
        .collect::<HashMap<_, _>>();
    let mut visited = vec![false; unique.len()];
    let mut order = Vec::with_capacity(unique.len());
    let mut detached = Vec::new();

    while let Some(seed) = pick_seed(&unique, &visited) {
        let fragment_start = order.len();
        visited[seed] = true;
        let mut frontier = VecDeque::from([seed]);
        while let Some(current) = frontier.pop_front() {
            order.push(current);
            for neighbor in unique[current].coord.neighbors() {
                if let Some(&next) = index_by_coord.get(&neighbor) {
                    if !visited[next] {
                        visited[next] = true;
                        frontier.push_back(next);
                    }
                }
            }
        }
        if fragment_start > 0 {
            detached.push(DetachedFragment {
                seed: unique[seed].coord,
                tiles: order.len() - fragment_start,
            });
        }
    }

    let mut slots = unique.into_iter().map(Some).collect::<Vec<_>>();
    let placements = order
        .into_iter()
        .filter_map(|index| slots[index].take())
        .collect();
    SortedPlacements {
        placements,
        detached,
    }
}

fn dedup_last_wins(placements: Vec<TilePlacement>) -> Vec<TilePlacement> {
    let mut index_by_coord = HashMap::<TileCoord, usize>::with_capacity(placements.len());
    let mut unique = Vec::<TilePlacement>::with_capacity(placements.len());
    for placement in placements {
        match index_by_coord.get(&placement.coord) {
            Some(&index) => unique[index] = placement,
            None => {
                index_by_coord.insert(placement.coord, unique.len());
                unique.push(placement);
            }
        }
    }
    unique
}

fn pick_seed(placements: &[TilePlacement], visited: &[bool]) -> Option<usize> {
    placements
        .iter()
        .enumerate()
        .filter(|(index, _)| !visited[*index])
        .min_by_key(|(index, placement)| {
            (
                placement.coord.distance_sq_to_origin(),
                placement.coord.y,
                placement.coord.x,
                *index,
            )
        })
        .map(|(index, _)| index)
}
