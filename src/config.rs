use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::domain::{AnalysisMode, LineageScope};
use crate::error::BuscoError;
use crate::schema::{self, OptionType, keys};
use crate::settings::{RawSettings, SettingsOrigin, Value};
use crate::sources::{ConfigSource, DefaultsSource, EnvironmentSource, FileSource};

/// Finds executables for dependency sections that carry no explicit path.
pub trait ToolLocator {
    fn locate(&self, command: &str) -> Option<PathBuf>;
}

impl<F> ToolLocator for F
where
    F: Fn(&str) -> Option<PathBuf>,
{
    fn locate(&self, command: &str) -> Option<PathBuf> {
        self(command)
    }
}

/// Looks executables up on `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathLocator;

impl ToolLocator for PathLocator {
    fn locate(&self, command: &str) -> Option<PathBuf> {
        which::which(command).ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolSettings {
    pub name: String,
    pub path: Option<PathBuf>,
    pub parameters: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    values: BTreeMap<String, Value>,
    provenance: BTreeMap<String, SettingsOrigin>,
    tools: BTreeMap<String, ToolSettings>,
    mode: AnalysisMode,
}

impl ResolvedConfig {
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn origin(&self, key: &str) -> Option<SettingsOrigin> {
        self.provenance.get(key).copied()
    }

    pub fn flag(&self, key: &str) -> bool {
        self.value(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.value(key).and_then(Value::as_str)
    }

    fn integer(&self, key: &str) -> Option<i64> {
        self.value(key).and_then(Value::as_int)
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn input(&self) -> &Path {
        Path::new(self.text(keys::INPUT).unwrap_or_default())
    }

    pub fn out_name(&self) -> &str {
        self.text(keys::OUT).unwrap_or_default()
    }

    pub fn out_path(&self) -> &Path {
        Path::new(self.text(keys::OUT_PATH).unwrap_or("."))
    }

    /// `<out_path>/<out>`: the folder holding everything a run produces.
    pub fn output_root(&self) -> PathBuf {
        self.out_path().join(self.out_name())
    }

    pub fn mode(&self) -> AnalysisMode {
        self.mode
    }

    pub fn lineage(&self) -> Option<&str> {
        self.text(keys::LINEAGE_DATASET)
    }

    pub fn download_path(&self) -> &Path {
        Path::new(self.text(keys::DOWNLOAD_PATH).unwrap_or("./busco_downloads"))
    }

    pub fn datasets_version(&self) -> &str {
        self.text(keys::DATASETS_VERSION).unwrap_or("odb10")
    }

    pub fn cpu(&self) -> usize {
        self.integer(keys::CPU)
            .and_then(|cpu| usize::try_from(cpu).ok())
            .unwrap_or(1)
            .max(1)
    }

    pub fn evalue(&self) -> f64 {
        self.value(keys::EVALUE)
            .and_then(Value::as_float)
            .unwrap_or(1e-3)
    }

    pub fn limit(&self) -> usize {
        self.integer(keys::LIMIT)
            .and_then(|limit| usize::try_from(limit).ok())
            .unwrap_or(3)
            .max(1)
    }

    pub fn force(&self) -> bool {
        self.flag(keys::FORCE)
    }

    pub fn restart(&self) -> bool {
        self.flag(keys::RESTART)
    }

    pub fn quiet(&self) -> bool {
        self.flag(keys::QUIET)
    }

    pub fn batch_mode(&self) -> bool {
        self.flag(keys::BATCH_MODE)
    }

    pub fn fail_fast(&self) -> bool {
        self.flag(keys::FAIL_FAST)
    }

    pub fn tar(&self) -> bool {
        self.flag(keys::TAR)
    }

    pub fn use_augustus(&self) -> bool {
        self.flag(keys::USE_AUGUSTUS)
    }

    pub fn auto_lineage(&self) -> Option<LineageScope> {
        auto_lineage_scope(|key| self.flag(key))
    }

    pub fn tool(&self, name: &str) -> Option<&ToolSettings> {
        self.tools.get(name)
    }

    pub fn tools(&self) -> impl Iterator<Item = &ToolSettings> {
        self.tools.values()
    }

    /// A copy with the lineage fixed and every auto-lineage switch cleared.
    pub fn with_lineage(&self, lineage: &str) -> ResolvedConfig {
        let mut next = self.clone();
        next.values
            .insert(keys::LINEAGE_DATASET.to_string(), Value::text(lineage));
        for flag in schema::AUTO_LINEAGE_FLAGS {
            next.values.insert(flag.to_string(), Value::Bool(false));
        }
        next
    }

    /// A single-target copy for one member of a batch, writing below this
    /// run's output root.
    pub fn for_target(&self, target: &Path) -> ResolvedConfig {
        let mut next = self.clone();
        let name = target
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| target.display().to_string());
        let root = self.output_root();
        next.values.insert(
            keys::INPUT.to_string(),
            Value::text(target.display().to_string()),
        );
        next.values.insert(
            keys::OUT_PATH.to_string(),
            Value::text(root.display().to_string()),
        );
        next.values.insert(keys::OUT.to_string(), Value::text(name));
        next.values
            .insert(keys::BATCH_MODE.to_string(), Value::Bool(false));
        next
    }
}

fn auto_lineage_scope(flag: impl Fn(&str) -> bool) -> Option<LineageScope> {
    if flag(keys::AUTO_LINEAGE) {
        Some(LineageScope::All)
    } else if flag(keys::AUTO_LINEAGE_PROK) {
        Some(LineageScope::Prokaryota)
    } else if flag(keys::AUTO_LINEAGE_EUK) {
        Some(LineageScope::Eukaryota)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Tool(&'static str),
    AnyOf(Vec<&'static str>),
}

fn workflow_requirements(
    mode: AnalysisMode,
    scope: Option<LineageScope>,
    use_augustus: bool,
) -> Vec<Requirement> {
    let mut requirements = vec![Requirement::Tool(keys::HMMSEARCH)];
    if !mode.needs_gene_prediction() {
        return requirements;
    }
    let eukaryote_predictor = if use_augustus {
        keys::AUGUSTUS
    } else {
        keys::METAEUK
    };
    match scope {
        Some(LineageScope::Prokaryota) => requirements.push(Requirement::Tool(keys::PRODIGAL)),
        Some(LineageScope::Eukaryota) => requirements.push(Requirement::Tool(eukaryote_predictor)),
        Some(LineageScope::All) => {
            requirements.push(Requirement::Tool(keys::PRODIGAL));
            requirements.push(Requirement::Tool(eukaryote_predictor));
        }
        None => requirements.push(Requirement::AnyOf(vec![keys::PRODIGAL, eukaryote_predictor])),
    }
    requirements
}

pub struct ConfigResolver<L> {
    locator: L,
}

impl<L: ToolLocator> ConfigResolver<L> {
    pub fn new(locator: L) -> Self {
        Self { locator }
    }

    /// Merge `sources` (lowest precedence first) and `cli` on top, then
    /// validate. Every violation found is reported together.
    pub fn resolve(
        &self,
        cli: &RawSettings,
        sources: &[RawSettings],
    ) -> Result<ResolvedConfig, BuscoError> {
        let mut merged = BTreeMap::<String, (Value, SettingsOrigin)>::new();
        let mut tool_sections = BTreeMap::<String, BTreeMap<String, Value>>::new();
        for layer in sources.iter().chain(std::iter::once(cli)) {
            for (key, value) in &layer.options {
                merged.insert(key.clone(), (value.clone(), layer.origin));
            }
            for (tool, section) in &layer.tools {
                let target = tool_sections.entry(tool.clone()).or_default();
                for (key, value) in section {
                    target.insert(key.clone(), value.clone());
                }
            }
        }

        let mut violations = Vec::new();
        let mut rejected = BTreeSet::new();
        let mut values = BTreeMap::new();
        let mut provenance = BTreeMap::new();

        for (key, (value, origin)) in merged {
            let Some(spec) = schema::lookup(&key) else {
                violations.push(format!("{key}: unknown option (set by {origin})"));
                continue;
            };
            if spec.kind == OptionType::Section {
                violations.push(format!("{key}: is a tool section, not an option"));
                continue;
            }
            match schema::coerce(spec, &value) {
                Ok(value) => {
                    values.insert(key.clone(), value);
                    provenance.insert(key, origin);
                }
                Err(violation) => {
                    violations.push(violation);
                    rejected.insert(key);
                }
            }
        }

        for spec in schema::OPTIONS.iter().filter(|spec| spec.required) {
            if !values.contains_key(spec.name) && !rejected.contains(spec.name) {
                violations.push(format!("{}: required option is missing", spec.name));
            }
        }

        let enabled = schema::AUTO_LINEAGE_FLAGS
            .iter()
            .filter(|flag| values.get(**flag).and_then(Value::as_bool).unwrap_or(false))
            .map(|flag| format!("--{flag}"))
            .collect::<Vec<_>>();
        if enabled.len() > 1 {
            violations.push(format!(
                "auto-lineage: options {} are mutually exclusive",
                enabled.join(", ")
            ));
        } else {
            harmonize_lineage_settings(&mut values);
        }

        let tools = self.resolve_tools(&tool_sections, &mut violations);

        let mode = values
            .get(keys::MODE)
            .and_then(Value::as_str)
            .and_then(|mode| mode.parse::<AnalysisMode>().ok());

        if let Some(mode) = mode {
            let scope = auto_lineage_scope(|key| {
                values.get(key).and_then(Value::as_bool).unwrap_or(false)
            });
            let use_augustus = values
                .get(keys::USE_AUGUSTUS)
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let available = |name: &str| tools.get(name).is_some_and(|tool| tool.path.is_some());
            for requirement in workflow_requirements(mode, scope, use_augustus) {
                match requirement {
                    Requirement::Tool(name) if !available(name) => violations.push(format!(
                        "{name}: executable not found; install it or set `path` in the [{name}] section"
                    )),
                    Requirement::AnyOf(names) if !names.iter().copied().any(|name| available(name)) => {
                        violations.push(format!(
                            "{}: no gene predictor found for {mode} mode",
                            names.join(" or ")
                        ))
                    }
                    _ => {}
                }
            }
        }

        for spec in schema::OPTIONS {
            if let (Some(bound), Some(value)) = (spec.bound, values.get(spec.name)) {
                if !bound.check(value) {
                    violations.push(format!("{}: {} (got {value})", spec.name, bound.describe()));
                }
            }
        }

        if !violations.is_empty() {
            return Err(BuscoError::ConfigValidation { violations });
        }

        let mode = mode.ok_or_else(|| BuscoError::validation("mode: required option is missing"))?;
        let config = ResolvedConfig {
            values,
            provenance,
            tools,
            mode,
        };
        log_resolved(&config);
        Ok(config)
    }

    fn resolve_tools(
        &self,
        sections: &BTreeMap<String, BTreeMap<String, Value>>,
        violations: &mut Vec<String>,
    ) -> BTreeMap<String, ToolSettings> {
        for name in sections.keys() {
            if !schema::is_dependency_section(name) {
                violations.push(format!("{name}: unknown dependency section"));
            }
        }

        let mut tools = BTreeMap::new();
        for spec in schema::dependency_sections() {
            let mut parameters = sections.get(spec.name).cloned().unwrap_or_default();
            let explicit = match parameters.remove(keys::TOOL_PATH) {
                Some(Value::Text(path)) if !path.trim().is_empty() => Some(PathBuf::from(path.trim())),
                Some(other) => {
                    violations.push(format!(
                        "{}.{}: expected a path, got {} `{other}`",
                        spec.name,
                        keys::TOOL_PATH,
                        other.kind()
                    ));
                    None
                }
                None => None,
            };
            let path = explicit.or_else(|| self.locator.locate(spec.name));
            tools.insert(
                spec.name.to_string(),
                ToolSettings {
                    name: spec.name.to_string(),
                    path,
                    parameters,
                },
            );
        }
        tools
    }
}

/// A given lineage wins over the auto-lineage switches; no lineage and no
/// switch means a full automatic search.
fn harmonize_lineage_settings(values: &mut BTreeMap<String, Value>) {
    let auto_requested = schema::AUTO_LINEAGE_FLAGS
        .iter()
        .any(|flag| values.get(*flag).and_then(Value::as_bool).unwrap_or(false));
    if values.contains_key(keys::LINEAGE_DATASET) {
        if auto_requested {
            warn!(
                "auto-lineage was requested together with a lineage dataset; proceeding with the given dataset"
            );
            for flag in schema::AUTO_LINEAGE_FLAGS {
                values.insert(flag.to_string(), Value::Bool(false));
            }
        }
    } else if !auto_requested {
        warn!(
            "no lineage dataset was specified; running automatic lineage selection, which takes longer"
        );
        values.insert(keys::AUTO_LINEAGE.to_string(), Value::Bool(true));
    }
}

fn log_resolved(config: &ResolvedConfig) {
    for (key, value) in config.values() {
        let origin = config
            .origin(key)
            .map(|origin| origin.to_string())
            .unwrap_or_else(|| "derived".to_string());
        debug!(option = %key, %value, %origin, "resolved option");
    }
    for tool in config.tools() {
        match &tool.path {
            Some(path) => debug!(tool = %tool.name, path = %path.display(), "resolved tool"),
            None => debug!(tool = %tool.name, "tool not available"),
        }
    }
    info!(
        input = %config.input().display(),
        mode = %config.mode(),
        lineage = config.lineage().unwrap_or("auto"),
        "configuration resolved"
    );
}

/// Reads every configuration source in precedence order and resolves them
/// together with the command-line overrides.
pub struct ConfigLoader<L> {
    resolver: ConfigResolver<L>,
    environment: EnvironmentSource,
}

impl<L: ToolLocator> ConfigLoader<L> {
    pub fn new(locator: L, environment: EnvironmentSource) -> Self {
        Self {
            resolver: ConfigResolver::new(locator),
            environment,
        }
    }

    pub fn load(
        &self,
        cli: &RawSettings,
        config_file: Option<&Path>,
    ) -> Result<ResolvedConfig, BuscoError> {
        let file = match config_file {
            Some(path) => FileSource::new(path, true).read()?,
            None => RawSettings::new(SettingsOrigin::ConfigFile),
        };
        let sources = [DefaultsSource.read()?, self.environment.read()?, file];
        self.resolver.resolve(cli, &sources)
    }
}
