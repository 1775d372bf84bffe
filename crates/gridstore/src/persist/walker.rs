use std::collections::HashSet;

use tracing::debug;

use crate::host::{EntityId, GridHandle, SceneHost};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainmentEdge {
    pub parent: EntityId,
    pub slot: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedEntity {
    pub entity: EntityId,
    /// Owns at least one containment slot.
    pub is_container: bool,
    /// `None` for root-layer entities.
    pub containment: Option<ContainmentEdge>,
}

impl WalkedEntity {
    pub fn is_root(&self) -> bool {
        self.containment.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainmentWalk {
    /// Depth-first order: every container precedes its contents.
    pub entities: Vec<WalkedEntity>,
    pub cycles_skipped: usize,
    pub anchored_skipped: usize,
}

/// Collects the anchored root layer of a grid and everything reachable
/// through containment slots.
pub fn walk_grid<H: SceneHost + ?Sized>(host: &H, grid: GridHandle) -> ContainmentWalk {
    let mut walk = ContainmentWalk::default();
    let mut visited = HashSet::<EntityId>::new();

    let roots = host
        .grid_children(grid)
        .into_iter()
        .filter(|entity| host.is_anchored(*entity))
        .collect::<Vec<_>>();
    let mut pending = roots
        .into_iter()
        .rev()
        .map(|entity| (entity, None))
        .collect::<Vec<(EntityId, Option<ContainmentEdge>)>>();

    while let Some((entity, containment)) = pending.pop() {
        if !visited.insert(entity) {
            walk.cycles_skipped += 1;
            debug!(grid = %grid, entity = %entity, "walk_cycle_skipped");
            continue;
        }

        let mut slots = host.container_slots(entity);
        slots.sort();
        let mut children = Vec::new();
        for slot in &slots {
            for child in host.slot_contents(entity, slot) {
                if host.is_anchored(child) {
                    walk.anchored_skipped += 1;
                    debug!(
                        grid = %grid,
                        container = %entity,
                        entity = %child,
                        slot = %slot,
                        "walk_anchored_content_skipped"
                    );
                    continue;
                }
                children.push((
                    child,
                    Some(ContainmentEdge {
                        parent: entity,
                        slot: slot.clone(),
                    }),
                ));
            }
        }
        pending.extend(children.into_iter().rev());

        walk.entities.push(WalkedEntity {
            entity,
            is_container: !slots.is_empty(),
            containment,
        });
    }
    walk
}
