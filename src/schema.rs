//! The option schema: every recognised configuration key, its default, its
//! type and its constraints. The resolver consults nothing else for defaulting
//! and type checking.

use crate::settings::{RawSettings, SettingsOrigin, Value};

/// Option identifiers. Code outside the schema refers to keys only through
/// these constants.
pub mod keys {
    pub const INPUT: &str = "in";
    pub const OUT: &str = "out";
    pub const MODE: &str = "mode";
    pub const LINEAGE_DATASET: &str = "lineage_dataset";
    pub const OUT_PATH: &str = "out_path";
    pub const CPU: &str = "cpu";
    pub const FORCE: &str = "force";
    pub const RESTART: &str = "restart";
    pub const QUIET: &str = "quiet";
    pub const DOWNLOAD_PATH: &str = "download_path";
    pub const DATASETS_VERSION: &str = "datasets_version";
    pub const OFFLINE: &str = "offline";
    pub const DOWNLOAD_BASE_URL: &str = "download_base_url";
    pub const AUTO_LINEAGE: &str = "auto-lineage";
    pub const AUTO_LINEAGE_PROK: &str = "auto-lineage-prok";
    pub const AUTO_LINEAGE_EUK: &str = "auto-lineage-euk";
    pub const UPDATE_DATA: &str = "update-data";
    pub const EVALUE: &str = "evalue";
    pub const LIMIT: &str = "limit";
    pub const USE_AUGUSTUS: &str = "use_augustus";
    pub const AUGUSTUS_PARAMETERS: &str = "augustus_parameters";
    pub const AUGUSTUS_SPECIES: &str = "augustus_species";
    pub const LONG: &str = "long";
    pub const METAEUK_PARAMETERS: &str = "metaeuk_parameters";
    pub const METAEUK_RERUN_PARAMETERS: &str = "metaeuk_rerun_parameters";
    pub const BATCH_MODE: &str = "batch_mode";
    pub const TAR: &str = "tar";
    pub const FAIL_FAST: &str = "fail_fast";

    pub const HMMSEARCH: &str = "hmmsearch";
    pub const PRODIGAL: &str = "prodigal";
    pub const METAEUK: &str = "metaeuk";
    pub const AUGUSTUS: &str = "augustus";

    /// Key inside a dependency section naming the executable.
    pub const TOOL_PATH: &str = "path";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionType {
    Bool,
    Int,
    Float,
    Text,
    Path,
    /// Text restricted to a closed vocabulary; the first alias of each group
    /// is the canonical spelling.
    Choice(&'static [&'static [&'static str]]),
    /// Marks a dependency tool section rather than a scalar option.
    Section,
}

impl OptionType {
    pub fn describe(&self) -> &'static str {
        match self {
            OptionType::Bool => "a boolean",
            OptionType::Int => "an integer",
            OptionType::Float => "a number",
            OptionType::Text => "a string",
            OptionType::Path => "a path",
            OptionType::Choice(_) => "one of the accepted values",
            OptionType::Section => "a tool section",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StaticValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(&'static str),
}

impl StaticValue {
    pub fn to_value(self) -> Value {
        match self {
            StaticValue::Bool(value) => Value::Bool(value),
            StaticValue::Int(value) => Value::Int(value),
            StaticValue::Float(value) => Value::Float(value),
            StaticValue::Text(value) => Value::Text(value.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    GreaterThan(f64),
    AtLeast(i64),
}

impl Bound {
    pub fn check(&self, value: &Value) -> bool {
        match (self, value) {
            (Bound::GreaterThan(min), value) => value.as_float().is_some_and(|v| v > *min),
            (Bound::AtLeast(min), Value::Int(v)) => v >= min,
            (Bound::AtLeast(_), _) => false,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Bound::GreaterThan(min) => format!("must be greater than {min}"),
            Bound::AtLeast(min) => format!("must be at least {min}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptionSpec {
    pub name: &'static str,
    pub default: Option<StaticValue>,
    pub kind: OptionType,
    pub dependency_section: bool,
    pub required: bool,
    pub bound: Option<Bound>,
}

impl OptionSpec {
    const fn option(name: &'static str, kind: OptionType, default: Option<StaticValue>) -> Self {
        Self {
            name,
            default,
            kind,
            dependency_section: false,
            required: false,
            bound: None,
        }
    }

    const fn flag(name: &'static str) -> Self {
        Self::option(name, OptionType::Bool, Some(StaticValue::Bool(false)))
    }

    const fn required(name: &'static str, kind: OptionType) -> Self {
        Self {
            required: true,
            ..Self::option(name, kind, None)
        }
    }

    const fn bounded(self, bound: Bound) -> Self {
        Self {
            bound: Some(bound),
            ..self
        }
    }

    const fn section(name: &'static str) -> Self {
        Self {
            dependency_section: true,
            ..Self::option(name, OptionType::Section, None)
        }
    }
}

pub const MODE_CHOICES: &[&[&str]] = &[
    &["genome", "geno"],
    &["transcriptome", "tran"],
    &["proteins", "prot"],
];

pub static OPTIONS: &[OptionSpec] = &[
    OptionSpec::required(keys::INPUT, OptionType::Path),
    OptionSpec::required(keys::OUT, OptionType::Text),
    OptionSpec::required(keys::MODE, OptionType::Choice(MODE_CHOICES)),
    OptionSpec::option(keys::LINEAGE_DATASET, OptionType::Text, None),
    OptionSpec::option(keys::OUT_PATH, OptionType::Path, Some(StaticValue::Text("."))),
    OptionSpec::option(keys::CPU, OptionType::Int, Some(StaticValue::Int(1)))
        .bounded(Bound::AtLeast(1)),
    OptionSpec::flag(keys::FORCE),
    OptionSpec::flag(keys::RESTART),
    OptionSpec::flag(keys::QUIET),
    OptionSpec::option(
        keys::DOWNLOAD_PATH,
        OptionType::Path,
        Some(StaticValue::Text("./busco_downloads")),
    ),
    OptionSpec::option(
        keys::DATASETS_VERSION,
        OptionType::Text,
        Some(StaticValue::Text("odb10")),
    ),
    OptionSpec::flag(keys::OFFLINE),
    OptionSpec::option(
        keys::DOWNLOAD_BASE_URL,
        OptionType::Text,
        Some(StaticValue::Text("https://busco-data.ezlab.org/v5/data/")),
    ),
    OptionSpec::flag(keys::AUTO_LINEAGE),
    OptionSpec::flag(keys::AUTO_LINEAGE_PROK),
    OptionSpec::flag(keys::AUTO_LINEAGE_EUK),
    OptionSpec::flag(keys::UPDATE_DATA),
    OptionSpec::option(keys::EVALUE, OptionType::Float, Some(StaticValue::Float(1e-3)))
        .bounded(Bound::GreaterThan(0.0)),
    OptionSpec::option(keys::LIMIT, OptionType::Int, Some(StaticValue::Int(3)))
        .bounded(Bound::AtLeast(1)),
    OptionSpec::flag(keys::USE_AUGUSTUS),
    OptionSpec::option(keys::AUGUSTUS_PARAMETERS, OptionType::Text, None),
    OptionSpec::option(keys::AUGUSTUS_SPECIES, OptionType::Text, None),
    OptionSpec::flag(keys::LONG),
    OptionSpec::option(keys::METAEUK_PARAMETERS, OptionType::Text, None),
    OptionSpec::option(keys::METAEUK_RERUN_PARAMETERS, OptionType::Text, None),
    OptionSpec::flag(keys::BATCH_MODE),
    OptionSpec::flag(keys::TAR),
    OptionSpec::flag(keys::FAIL_FAST),
    OptionSpec::section(keys::HMMSEARCH),
    OptionSpec::section(keys::PRODIGAL),
    OptionSpec::section(keys::METAEUK),
    OptionSpec::section(keys::AUGUSTUS),
];

/// The three mutually exclusive auto-lineage switches.
pub const AUTO_LINEAGE_FLAGS: [&str; 3] = [
    keys::AUTO_LINEAGE,
    keys::AUTO_LINEAGE_PROK,
    keys::AUTO_LINEAGE_EUK,
];

pub fn lookup(name: &str) -> Option<&'static OptionSpec> {
    OPTIONS.iter().find(|spec| spec.name == name)
}

pub fn dependency_sections() -> impl Iterator<Item = &'static OptionSpec> {
    OPTIONS.iter().filter(|spec| spec.dependency_section)
}

pub fn is_dependency_section(name: &str) -> bool {
    lookup(name).is_some_and(|spec| spec.dependency_section)
}

/// Built-in defaults as a settings layer.
pub fn defaults() -> RawSettings {
    let mut settings = RawSettings::new(SettingsOrigin::Defaults);
    for spec in OPTIONS {
        if let Some(default) = spec.default {
            settings.set(spec.name, default.to_value());
        }
    }
    settings
}

/// Coerce a merged value to the type the schema declares for it.
pub fn coerce(spec: &OptionSpec, value: &Value) -> Result<Value, String> {
    let mismatch = || {
        format!(
            "{}: expected {}, got {} `{value}`",
            spec.name,
            spec.kind.describe(),
            value.kind()
        )
    };
    match (spec.kind, value) {
        (OptionType::Bool, Value::Bool(v)) => Ok(Value::Bool(*v)),
        (OptionType::Bool, Value::Text(text)) => parse_bool(text).map(Value::Bool).ok_or_else(mismatch),
        (OptionType::Int, Value::Int(v)) => Ok(Value::Int(*v)),
        (OptionType::Int, Value::Text(text)) => {
            text.trim().parse::<i64>().map(Value::Int).map_err(|_| mismatch())
        }
        (OptionType::Float, Value::Float(v)) => Ok(Value::Float(*v)),
        (OptionType::Float, Value::Int(v)) => Ok(Value::Float(*v as f64)),
        (OptionType::Float, Value::Text(text)) => {
            text.trim().parse::<f64>().map(Value::Float).map_err(|_| mismatch())
        }
        (OptionType::Text | OptionType::Path, Value::Text(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                Err(format!("{}: must not be empty", spec.name))
            } else {
                Ok(Value::Text(trimmed.to_string()))
            }
        }
        (OptionType::Text, Value::Int(_) | Value::Float(_)) => Ok(Value::Text(value.to_string())),
        (OptionType::Choice(groups), Value::Text(text)) => {
            let needle = text.trim().to_ascii_lowercase();
            groups
                .iter()
                .find(|aliases| aliases.contains(&needle.as_str()))
                .map(|aliases| Value::Text(aliases[0].to_string()))
                .ok_or_else(|| {
                    let accepted = groups
                        .iter()
                        .flat_map(|aliases| aliases.iter())
                        .copied()
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!("{}: `{text}` is not one of {accepted}", spec.name)
                })
        }
        _ => Err(mismatch()),
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn option_names_are_unique() {
        let mut seen = HashSet::new();
        for spec in OPTIONS {
            assert!(seen.insert(spec.name), "duplicate option {}", spec.name);
        }
    }

    #[test]
    fn defaults_match_declared_types() {
        for spec in OPTIONS {
            if let Some(default) = spec.default {
                let value = default.to_value();
                assert_eq!(coerce(spec, &value).unwrap(), value, "{}", spec.name);
            }
        }
    }

    #[test]
    fn defaults_satisfy_bounds() {
        for spec in OPTIONS {
            if let (Some(default), Some(bound)) = (spec.default, spec.bound) {
                assert!(bound.check(&default.to_value()), "{}", spec.name);
            }
        }
    }

    #[test]
    fn mode_aliases_are_canonicalised() {
        let spec = lookup(keys::MODE).unwrap();
        assert_eq!(coerce(spec, &Value::text("geno")).unwrap(), Value::text("genome"));
        assert_eq!(coerce(spec, &Value::text("PROT")).unwrap(), Value::text("proteins"));
        assert!(coerce(spec, &Value::text("metagenome")).is_err());
    }

    #[test]
    fn text_numbers_are_coerced() {
        let cpu = lookup(keys::CPU).unwrap();
        assert_eq!(coerce(cpu, &Value::text("8")).unwrap(), Value::Int(8));
        let evalue = lookup(keys::EVALUE).unwrap();
        assert_eq!(coerce(evalue, &Value::text("1e-05")).unwrap(), Value::Float(1e-5));
        assert_eq!(coerce(evalue, &Value::Int(1)).unwrap(), Value::Float(1.0));
        let err = coerce(cpu, &Value::text("many")).unwrap_err();
        assert!(err.starts_with("cpu:"));
    }

    #[test]
    fn dependency_sections_are_declared() {
        let names = dependency_sections().map(|spec| spec.name).collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![keys::HMMSEARCH, keys::PRODIGAL, keys::METAEUK, keys::AUGUSTUS]
        );
        assert!(!is_dependency_section(keys::CPU));
    }
}
