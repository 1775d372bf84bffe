use std::io::Write;
use std::path::{Path, PathBuf};

use gridstore::host::{load_prototype_registry, parse_prototype_defs};
use gridstore::{
    read_document_file, validate_document, write_document_file, Document, EntityId,
    GridHandle, GridPersistence, LoadRequest, LoadSummary, MapId, MemoryScene, PersistConfig,
    PrototypeRegistry, SaveRequest, SceneHost, TileCoord, Vec2, FORMAT_VERSION,
};
use serde_json::json;
use tracing::info;

const SAMPLE_PROTOTYPES: &str = include_str!("../assets/prototypes.xml");
const SAMPLE_PROTOTYPES_PATH: &str = "assets/prototypes.xml";
const DEMO_MAP: MapId = MapId(1);
const MAX_DEMO_TICKS: u32 = 100_000;

#[derive(Debug, Clone, Default)]
pub struct CommonOptions {
    /// Directory of XML prototype files; the built-in sample set otherwise.
    pub prototypes_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DemoOptions {
    pub synchronous: bool,
    pub entities_per_tick: Option<usize>,
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Inspect { path: PathBuf },
    Migrate { input: PathBuf, output: PathBuf },
    Demo(DemoOptions),
}

pub fn run<W: Write>(kind: CommandKind, opts: CommonOptions, stdout: &mut W) -> Result<(), String> {
    match kind {
        CommandKind::Inspect { path } => inspect(&path, stdout),
        CommandKind::Migrate { input, output } => migrate(&input, &output, stdout),
        CommandKind::Demo(demo) => run_demo(&demo, &opts, stdout),
    }
}

pub fn sample_registry() -> Result<PrototypeRegistry, String> {
    let defs = parse_prototype_defs(Path::new(SAMPLE_PROTOTYPES_PATH), SAMPLE_PROTOTYPES)
        .map_err(|error| error.to_string())?;
    Ok(PrototypeRegistry::from_defs(defs))
}

fn inspect<W: Write>(path: &Path, stdout: &mut W) -> Result<(), String> {
    let decoded = read_document_file(path).map_err(|error| error.to_string())?;
    let document = &decoded.document;
    emit(
        stdout,
        format!(
            "{}: formatVersion={} convention={:?} migratedMeta={} migratedVersion={}",
            path.display(),
            document.format_version,
            decoded.convention,
            decoded.migration.renamed_metadata_key,
            decoded.migration.renamed_version_key
        ),
    )?;
    emit(
        stdout,
        format!(
            "metadata: originalId={} author={} name={:?} timestamp={} category={}",
            document.metadata.original_id,
            document.metadata.author_id,
            document.metadata.display_name,
            document.metadata.timestamp,
            document.metadata.category.as_deref().unwrap_or("-")
        ),
    )?;
    for grid in &document.grids {
        let contained = grid
            .entities
            .iter()
            .filter(|entity| entity.is_contained)
            .count();
        let components = grid
            .entities
            .iter()
            .map(|entity| entity.components.len())
            .sum::<usize>();
        emit(
            stdout,
            format!(
                "grid {}: tiles={} entities={} contained={} components={} decals={}",
                grid.grid_id,
                grid.tiles.len(),
                grid.entities.len(),
                contained,
                components,
                grid.decal_data.is_some()
            ),
        )?;
    }
    let warnings = validate_document(document);
    if warnings.is_empty() {
        emit(stdout, "validation: ok".to_string())?;
    }
    for warning in warnings {
        emit(stdout, format!("warning: {warning}"))?;
    }
    Ok(())
}

fn migrate<W: Write>(input: &Path, output: &Path, stdout: &mut W) -> Result<(), String> {
    let decoded = read_document_file(input).map_err(|error| error.to_string())?;
    let mut document = decoded.document;
    let from_version = document.format_version;
    document.format_version = document.format_version.max(FORMAT_VERSION);
    write_document_file(output, &document).map_err(|error| error.to_string())?;
    emit(
        stdout,
        format!(
            "migrated {} -> {}: formatVersion {} -> {} (read as {:?})",
            input.display(),
            output.display(),
            from_version,
            document.format_version,
            decoded.convention
        ),
    )
}

fn run_demo<W: Write>(
    demo: &DemoOptions,
    opts: &CommonOptions,
    stdout: &mut W,
) -> Result<(), String> {
    let registry = match &opts.prototypes_dir {
        Some(dir) => load_prototype_registry(dir).map_err(|error| error.to_string())?,
        None => sample_registry()?,
    };
    let mut config = PersistConfig::from_env().map_err(|error| error.to_string())?;
    if demo.synchronous {
        config.incremental_loading = false;
    }
    if let Some(limit) = demo.entities_per_tick {
        config.budgets.entities_per_tick = limit;
    }

    let mut source = MemoryScene::new(registry.clone());
    source.add_map(DEMO_MAP);
    let grid = build_demo_grid(&mut source)?;

    let mut persistence = GridPersistence::new(config);
    let saved = persistence
        .save_grid(&source, grid, &SaveRequest::new("Demo outpost").with_category("grid"))
        .map_err(|error| error.to_string())?;
    emit(
        stdout,
        format!(
            "saved {grid}: tiles={} entities={} skipped={} components={} warnings={}",
            saved.summary.tiles_written,
            saved.summary.entities_written,
            saved.summary.entities_skipped,
            saved.summary.components_written,
            saved.summary.warnings.len()
        ),
    )?;
    if let Some(path) = &demo.output {
        write_document_file(path, &saved.document).map_err(|error| error.to_string())?;
        emit(stdout, format!("wrote {}", path.display()))?;
    }

    let mut target = MemoryScene::new(registry);
    target.add_map(DEMO_MAP);
    let summaries = reload(&mut persistence, &mut target, saved.document)?;
    for summary in &summaries {
        emit(stdout, describe_load(summary))?;
        for warning in &summary.warnings {
            emit(stdout, format!("warning: {warning}"))?;
        }
        emit(
            stdout,
            format!(
                "live {}: entities={} tile_fragments={}",
                summary.grid,
                target.entities_on_grid(summary.grid).len(),
                target.tile_fragment_count(summary.grid)
            ),
        )?;
    }
    Ok(())
}

fn reload(
    persistence: &mut GridPersistence,
    target: &mut MemoryScene,
    document: Document,
) -> Result<Vec<LoadSummary>, String> {
    let request = LoadRequest::new(DEMO_MAP)
        .at(Vec2::ZERO, document.metadata.original_rotation.unwrap_or(0.0))
        .expecting_category("grid");
    let outcome = persistence
        .load_document(target, document, &request)
        .map_err(|error| error.to_string())?;
    if !outcome.is_scheduled() {
        return Ok(outcome.summaries);
    }

    let mut completed = Vec::new();
    let mut ticks = 0u32;
    while !persistence.scheduler().is_idle() {
        if ticks >= MAX_DEMO_TICKS {
            return Err(format!("load did not finish within {MAX_DEMO_TICKS} ticks"));
        }
        ticks += 1;
        let report = persistence.tick(target);
        completed.extend(report.completed);
        if !report.abandoned.is_empty() {
            return Err(format!("load abandoned for {:?}", report.abandoned));
        }
    }
    info!(ticks, grids = completed.len(), "demo_reload_finished");
    Ok(completed)
}

fn describe_load(summary: &LoadSummary) -> String {
    let decals = summary
        .decals
        .map(|counts| format!("{}/{}", counts.restored, counts.restored + counts.failed))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "loaded {}: mode={} ticks={} tiles={} phase1={}/{} (failed {}) phase2={}/{} (failed {}) decals={} warnings={}",
        summary.grid,
        if summary.legacy_mode { "legacy" } else { "containment" },
        summary.ticks,
        summary.tiles_placed,
        summary.phase1.succeeded,
        summary.phase1.attempted,
        summary.phase1.failed,
        summary.phase2.succeeded,
        summary.phase2.attempted,
        summary.phase2.failed,
        decals,
        summary.warnings.len()
    )
}

/// A walled 10x8 room with storage, a chemistry station, a power
/// controller, and one stray tile off the main lattice.
fn build_demo_grid(scene: &mut MemoryScene) -> Result<GridHandle, String> {
    let to_string = |error: gridstore::HostError| error.to_string();
    let grid = scene
        .create_grid(DEMO_MAP, Vec2::new(32.0, -8.0), 0.0)
        .map_err(to_string)?;
    for x in 0..10 {
        for y in 0..8 {
            scene
                .set_tile(grid, TileCoord::new(x, y), "FloorSteel")
                .map_err(to_string)?;
            if x == 0 || y == 0 || x == 9 || y == 7 {
                scene
                    .spawn("Wall", grid, Vec2::new(x as f32 + 0.5, y as f32 + 0.5), 0.0)
                    .map_err(to_string)?;
            }
        }
    }
    scene
        .set_tile(grid, TileCoord::new(14, 3), "Lattice")
        .map_err(to_string)?;

    for index in 0..3 {
        let locker = scene
            .spawn("Locker", grid, Vec2::new(2.5 + index as f32, 6.5), 0.0)
            .map_err(to_string)?;
        let toolbox: EntityId = scene
            .spawn("Toolbox", grid, Vec2::ZERO, 0.0)
            .map_err(to_string)?;
        scene
            .insert_into(toolbox, locker, "storage")
            .map_err(to_string)?;
    }
    scene
        .spawn("ChemMaster", grid, Vec2::new(7.5, 1.5), std::f32::consts::FRAC_PI_2)
        .map_err(to_string)?;
    scene
        .spawn("APC", grid, Vec2::new(1.5, 1.5), 0.0)
        .map_err(to_string)?;
    scene.set_decals(
        grid,
        vec![
            json!({"id": "Dirt", "position": [3.0, 3.0], "color": "#5a4b3c"}),
            json!({"id": "WarnLines", "position": [1.0, 1.0]}),
        ],
    );
    Ok(grid)
}

fn emit<W: Write>(stdout: &mut W, line: String) -> Result<(), String> {
    writeln!(stdout, "{line}").map_err(|error| format!("failed to write output: {error}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_to_string(kind: CommandKind) -> String {
        let mut out = Vec::new();
        run(kind, CommonOptions::default(), &mut out).expect("command");
        String::from_utf8(out).expect("utf8")
    }

    #[test]
    fn sample_registry_parses() {
        let registry = sample_registry().expect("registry");
        assert_eq!(registry.len(), 10);
        assert!(registry.get("Locker").is_some_and(|def| def.anchored));
    }

    #[test]
    fn demo_reloads_synchronously_and_incrementally() {
        let sync = run_to_string(CommandKind::Demo(DemoOptions {
            synchronous: true,
            ..DemoOptions::default()
        }));
        assert!(sync.contains("mode=containment ticks=0"), "{sync}");
        assert!(sync.contains("decals=2/2"), "{sync}");
        assert!(sync.contains("tile_fragments=2"), "{sync}");

        let incremental = run_to_string(CommandKind::Demo(DemoOptions {
            synchronous: false,
            entities_per_tick: Some(5),
            output: None,
        }));
        assert!(incremental.contains("loaded grid#0"), "{incremental}");
        assert!(!incremental.contains("ticks=0"), "{incremental}");
    }

    #[test]
    fn inspect_and_migrate_round_trip_a_written_demo() {
        let temp = tempfile::TempDir::new().expect("temp");
        let saved = temp.path().join("demo.json");
        run_to_string(CommandKind::Demo(DemoOptions {
            synchronous: true,
            entities_per_tick: None,
            output: Some(saved.clone()),
        }));

        let report = run_to_string(CommandKind::Inspect {
            path: saved.clone(),
        });
        assert!(report.contains("formatVersion=3 convention=CamelCase"), "{report}");
        assert!(report.contains("validation: ok"), "{report}");

        let migrated = temp.path().join("out").join("demo.json");
        let message = run_to_string(CommandKind::Migrate {
            input: saved,
            output: migrated.clone(),
        });
        assert!(message.contains("formatVersion 3 -> 3"), "{message}");
        assert!(migrated.is_file());
    }
}
