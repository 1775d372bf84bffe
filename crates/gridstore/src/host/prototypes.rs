use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use roxmltree::{Document, Node};
use serde_json::Value;

use super::SolutionState;

#[derive(Debug, Clone, PartialEq)]
pub struct SlotDef {
    pub name: String,
    pub capacity: usize,
    /// Prototype ids spawned into the slot whenever the owner is spawned.
    pub default_contents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrototypeDef {
    pub id: String,
    pub anchored: bool,
    pub slots: Vec<SlotDef>,
    pub components: BTreeMap<String, Value>,
    pub solutions: BTreeMap<String, SolutionState>,
}

impl PrototypeDef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            anchored: false,
            slots: Vec::new(),
            components: BTreeMap::new(),
            solutions: BTreeMap::new(),
        }
    }

    pub fn anchored(mut self, anchored: bool) -> Self {
        self.anchored = anchored;
        self
    }

    pub fn with_slot(mut self, name: &str, capacity: usize, default_contents: &[&str]) -> Self {
        self.slots.push(SlotDef {
            name: name.to_string(),
            capacity,
            default_contents: default_contents.iter().map(ToString::to_string).collect(),
        });
        self
    }

    pub fn with_component(mut self, component_type: &str, payload: Value) -> Self {
        self.components.insert(component_type.to_string(), payload);
        self
    }

    pub fn with_solution(mut self, component_type: &str, state: SolutionState) -> Self {
        self.solutions.insert(component_type.to_string(), state);
        self
    }
}

#[derive(Debug, Default, Clone)]
pub struct PrototypeRegistry {
    defs: Vec<PrototypeDef>,
    index_by_id: HashMap<String, usize>,
}

impl PrototypeRegistry {
    pub fn from_defs(defs: Vec<PrototypeDef>) -> Self {
        let mut registry = Self::default();
        for def in defs {
            registry.insert(def);
        }
        registry
    }

    /// Later definitions replace earlier ones with the same id.
    pub fn insert(&mut self, def: PrototypeDef) {
        match self.index_by_id.get(&def.id) {
            Some(&index) => self.defs[index] = def,
            None => {
                self.index_by_id.insert(def.id.clone(), self.defs.len());
                self.defs.push(def);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&PrototypeDef> {
        self.index_by_id.get(id).and_then(|&index| self.defs.get(index))
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrototypeErrorCode {
    ReadFile,
    XmlMalformed,
    InvalidRoot,
    UnknownDefType,
    UnknownField,
    MissingField,
    InvalidValue,
    DuplicatePrototype,
}

#[derive(Debug, Clone)]
pub struct PrototypeDefError {
    pub code: PrototypeErrorCode,
    pub message: String,
    pub file_path: PathBuf,
    pub location: Option<SourceLocation>,
}

impl fmt::Display for PrototypeDefError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(
                f,
                "{:?}: {} (file={}, line={}, column={})",
                self.code,
                self.message,
                self.file_path.display(),
                loc.line,
                loc.column
            ),
            None => write!(
                f,
                "{:?}: {} (file={})",
                self.code,
                self.message,
                self.file_path.display()
            ),
        }
    }
}

impl std::error::Error for PrototypeDefError {}

/// Loads every `*.xml` file under `root` (sorted by relative path) into one
/// registry. A prototype id may be defined once per file; across files the
/// last definition wins.
pub fn load_prototype_registry(root: &Path) -> Result<PrototypeRegistry, PrototypeDefError> {
    let files = collect_xml_files_sorted(root).map_err(|error| PrototypeDefError {
        code: PrototypeErrorCode::ReadFile,
        message: format!("failed to read directory: {}", error.source),
        file_path: error.path,
        location: None,
    })?;

    let mut registry = PrototypeRegistry::default();
    for file in files {
        let raw = fs::read_to_string(&file).map_err(|source| PrototypeDefError {
            code: PrototypeErrorCode::ReadFile,
            message: format!("failed to read file: {source}"),
            file_path: file.clone(),
            location: None,
        })?;
        for def in parse_prototype_defs(&file, &raw)? {
            registry.insert(def);
        }
    }
    Ok(registry)
}

pub fn parse_prototype_defs(
    file_path: &Path,
    raw: &str,
) -> Result<Vec<PrototypeDef>, PrototypeDefError> {
    let doc = Document::parse(raw).map_err(|error| PrototypeDefError {
        code: PrototypeErrorCode::XmlMalformed,
        message: format!("malformed XML: {error}"),
        file_path: file_path.to_path_buf(),
        location: Some(SourceLocation {
            line: error.pos().row as usize,
            column: error.pos().col as usize,
        }),
    })?;

    let root = doc.root_element();
    if root.tag_name().name() != "Prototypes" {
        return Err(error_at_node(
            PrototypeErrorCode::InvalidRoot,
            "root element must be <Prototypes>".to_string(),
            file_path,
            &doc,
            root,
        ));
    }

    let mut seen = HashSet::<String>::new();
    let mut defs = Vec::<PrototypeDef>::new();
    for child in root.children().filter(|node| node.is_element()) {
        if child.tag_name().name() != "Prototype" {
            return Err(error_at_node(
                PrototypeErrorCode::UnknownDefType,
                format!(
                    "unsupported element <{}>; expected <Prototype>",
                    child.tag_name().name()
                ),
                file_path,
                &doc,
                child,
            ));
        }
        let def = parse_prototype(file_path, &doc, child)?;
        if !seen.insert(def.id.clone()) {
            return Err(error_at_node(
                PrototypeErrorCode::DuplicatePrototype,
                format!("duplicate prototype '{}' in one file", def.id),
                file_path,
                &doc,
                child,
            ));
        }
        defs.push(def);
    }
    Ok(defs)
}

fn parse_prototype(
    file_path: &Path,
    doc: &Document<'_>,
    node: Node<'_, '_>,
) -> Result<PrototypeDef, PrototypeDefError> {
    let mut id: Option<String> = None;
    let mut def = PrototypeDef::new(String::new());

    for field in node.children().filter(|child| child.is_element()) {
        match field.tag_name().name() {
            "id" => id = Some(required_text(file_path, doc, field, "id")?),
            "anchored" => {
                let value = required_text(file_path, doc, field, "anchored")?;
                def.anchored = match value.as_str() {
                    "true" => true,
                    "false" => false,
                    _ => {
                        return Err(error_at_node(
                            PrototypeErrorCode::InvalidValue,
                            format!("anchored '{value}' must be true or false"),
                            file_path,
                            doc,
                            field,
                        ))
                    }
                };
            }
            "slot" => def.slots.push(parse_slot(file_path, doc, field)?),
            "component" => {
                let component_type = required_attr(file_path, doc, field, "type")?;
                let text = field.text().map(str::trim).unwrap_or_default();
                let payload = if text.is_empty() {
                    Value::Object(serde_json::Map::new())
                } else {
                    serde_json::from_str::<Value>(text).map_err(|error| {
                        error_at_node(
                            PrototypeErrorCode::InvalidValue,
                            format!("component '{component_type}' payload is not JSON: {error}"),
                            file_path,
                            doc,
                            field,
                        )
                    })?
                };
                def.components.insert(component_type, payload);
            }
            "solution" => {
                let component_type = required_attr(file_path, doc, field, "type")?;
                let state = parse_solution(file_path, doc, field)?;
                def.solutions.insert(component_type, state);
            }
            other => {
                return Err(error_at_node(
                    PrototypeErrorCode::UnknownField,
                    format!("unknown field <{other}> in <Prototype>"),
                    file_path,
                    doc,
                    field,
                ))
            }
        }
    }

    let Some(id) = id else {
        return Err(error_at_node(
            PrototypeErrorCode::MissingField,
            "missing required field <id> in <Prototype>".to_string(),
            file_path,
            doc,
            node,
        ));
    };
    def.id = id;
    Ok(def)
}

fn parse_slot(
    file_path: &Path,
    doc: &Document<'_>,
    node: Node<'_, '_>,
) -> Result<SlotDef, PrototypeDefError> {
    let name = required_attr(file_path, doc, node, "name")?;
    let capacity = match node.attribute("capacity") {
        Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
            error_at_node(
                PrototypeErrorCode::InvalidValue,
                format!("slot capacity '{raw}' is not a non-negative integer"),
                file_path,
                doc,
                node,
            )
        })?,
        None => 1,
    };
    let mut default_contents = Vec::new();
    for item in node.children().filter(|child| child.is_element()) {
        if item.tag_name().name() != "item" {
            return Err(error_at_node(
                PrototypeErrorCode::UnknownField,
                format!("unknown field <{}> in <slot>", item.tag_name().name()),
                file_path,
                doc,
                item,
            ));
        }
        default_contents.push(required_text(file_path, doc, item, "item")?);
    }
    Ok(SlotDef {
        name,
        capacity,
        default_contents,
    })
}

fn parse_solution(
    file_path: &Path,
    doc: &Document<'_>,
    node: Node<'_, '_>,
) -> Result<SolutionState, PrototypeDefError> {
    let volume = parse_f32_attr(file_path, doc, node, "volume")?.unwrap_or(0.0);
    let temperature = parse_f32_attr(file_path, doc, node, "temperature")?.unwrap_or(293.15);
    let mut contents = BTreeMap::new();
    for reagent in node.children().filter(|child| child.is_element()) {
        if reagent.tag_name().name() != "reagent" {
            return Err(error_at_node(
                PrototypeErrorCode::UnknownField,
                format!("unknown field <{}> in <solution>", reagent.tag_name().name()),
                file_path,
                doc,
                reagent,
            ));
        }
        let name = required_attr(file_path, doc, reagent, "name")?;
        let raw = required_text(file_path, doc, reagent, "reagent")?;
        let quantity = raw.parse::<f32>().map_err(|_| {
            error_at_node(
                PrototypeErrorCode::InvalidValue,
                format!("reagent quantity '{raw}' is not a valid number"),
                file_path,
                doc,
                reagent,
            )
        })?;
        contents.insert(name, quantity);
    }
    Ok(SolutionState {
        volume,
        temperature,
        contents,
    })
}

fn parse_f32_attr(
    file_path: &Path,
    doc: &Document<'_>,
    node: Node<'_, '_>,
    attr: &str,
) -> Result<Option<f32>, PrototypeDefError> {
    let Some(raw) = node.attribute(attr) else {
        return Ok(None);
    };
    let parsed = raw.trim().parse::<f32>().map_err(|_| {
        error_at_node(
            PrototypeErrorCode::InvalidValue,
            format!("{attr} '{raw}' is not a valid number"),
            file_path,
            doc,
            node,
        )
    })?;
    if !parsed.is_finite() {
        return Err(error_at_node(
            PrototypeErrorCode::InvalidValue,
            format!("{attr} must be finite"),
            file_path,
            doc,
            node,
        ));
    }
    Ok(Some(parsed))
}

fn required_attr(
    file_path: &Path,
    doc: &Document<'_>,
    node: Node<'_, '_>,
    attr: &str,
) -> Result<String, PrototypeDefError> {
    match node.attribute(attr).map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(error_at_node(
            PrototypeErrorCode::MissingField,
            format!(
                "<{}> requires a non-empty '{attr}' attribute",
                node.tag_name().name()
            ),
            file_path,
            doc,
            node,
        )),
    }
}

fn required_text(
    file_path: &Path,
    doc: &Document<'_>,
    node: Node<'_, '_>,
    field_name: &str,
) -> Result<String, PrototypeDefError> {
    let value = node.text().map(str::trim).unwrap_or_default().to_string();
    if value.is_empty() {
        return Err(error_at_node(
            PrototypeErrorCode::MissingField,
            format!("field <{field_name}> must not be empty"),
            file_path,
            doc,
            node,
        ));
    }
    Ok(value)
}

fn error_at_node(
    code: PrototypeErrorCode,
    message: String,
    file_path: &Path,
    doc: &Document<'_>,
    node: Node<'_, '_>,
) -> PrototypeDefError {
    let pos = doc.text_pos_at(node.range().start);
    PrototypeDefError {
        code,
        message,
        file_path: file_path.to_path_buf(),
        location: Some(SourceLocation {
            line: pos.row as usize,
            column: pos.col as usize,
        }),
    }
}

struct ReadError {
    path: PathBuf,
    source: std::io::Error,
}

fn collect_xml_files_sorted(root: &Path) -> Result<Vec<PathBuf>, ReadError> {
    let mut files = Vec::<PathBuf>::new();
    collect_recursive(root, &mut files)?;
    files.sort_by_key(|path| normalize_rel_path(path.strip_prefix(root).unwrap_or(path)));
    Ok(files)
}

fn collect_recursive(current: &Path, files: &mut Vec<PathBuf>) -> Result<(), ReadError> {
    let entries = fs::read_dir(current).map_err(|source| ReadError {
        path: current.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| ReadError {
            path: current.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_recursive(&path, files)?;
        } else if path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"))
        {
            files.push(path);
        }
    }
    Ok(())
}

fn normalize_rel_path(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn write_file(path: &Path, text: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, text).expect("write");
    }

    #[test]
    fn parses_slots_components_and_solutions() {
        let raw = r#"<Prototypes>
            <Prototype>
                <id>Locker</id>
                <anchored>true</anchored>
                <slot name="storage" capacity="4"><item>Crowbar</item><item>Crowbar</item></slot>
                <component type="AccessReader">{"access":["Security"]}</component>
                <solution type="SolutionContainerManager" volume="50" temperature="300"><reagent name="Water">20</reagent></solution>
            </Prototype>
        </Prototypes>"#;
        let defs = parse_prototype_defs(Path::new("defs.xml"), raw).expect("parse");
        assert_eq!(defs.len(), 1);
        let locker = &defs[0];
        assert!(locker.anchored);
        assert_eq!(locker.slots[0].capacity, 4);
        assert_eq!(locker.slots[0].default_contents.len(), 2);
        assert_eq!(
            locker.components["AccessReader"]["access"][0],
            Value::String("Security".to_string())
        );
        let solution = &locker.solutions["SolutionContainerManager"];
        assert!((solution.volume - 50.0).abs() < f32::EPSILON);
        assert_eq!(solution.contents.get("Water").copied(), Some(20.0));
    }

    #[test]
    fn missing_id_reports_location() {
        let raw = "<Prototypes>\n  <Prototype><anchored>true</anchored></Prototype>\n</Prototypes>";
        let err = parse_prototype_defs(Path::new("defs.xml"), raw).expect_err("error");
        assert_eq!(err.code, PrototypeErrorCode::MissingField);
        assert_eq!(err.location.map(|loc| loc.line), Some(2));
    }

    #[test]
    fn malformed_xml_fails() {
        let err = parse_prototype_defs(Path::new("defs.xml"), "<Prototypes><Prototype>")
            .expect_err("error");
        assert_eq!(err.code, PrototypeErrorCode::XmlMalformed);
    }

    #[test]
    fn unknown_field_fails() {
        let raw = "<Prototypes><Prototype><id>A</id><color>red</color></Prototype></Prototypes>";
        let err = parse_prototype_defs(Path::new("defs.xml"), raw).expect_err("error");
        assert_eq!(err.code, PrototypeErrorCode::UnknownField);
    }

    #[test]
    fn duplicate_in_one_file_fails() {
        let raw = "<Prototypes><Prototype><id>A</id></Prototype><Prototype><id>A</id></Prototype></Prototypes>";
        let err = parse_prototype_defs(Path::new("defs.xml"), raw).expect_err("error");
        assert_eq!(err.code, PrototypeErrorCode::DuplicatePrototype);
    }

    #[test]
    fn later_file_overrides_earlier_definition() {
        let temp = TempDir::new().expect("temp");
        write_file(
            &temp.path().join("a.xml"),
            "<Prototypes><Prototype><id>Wall</id></Prototype></Prototypes>",
        );
        write_file(
            &temp.path().join("nested").join("b.xml"),
            "<Prototypes><Prototype><id>Wall</id><anchored>true</anchored></Prototype></Prototypes>",
        );
        let registry = load_prototype_registry(temp.path()).expect("load");
        assert_eq!(registry.len(), 1);
        assert!(registry.get("Wall").expect("wall").anchored);
    }
}
