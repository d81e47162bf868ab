use std::fs;
use std::path::PathBuf;

use assert_matches::assert_matches;

use busco_runner::config::{ConfigLoader, ConfigResolver};
use busco_runner::domain::{AnalysisMode, LineageScope};
use busco_runner::error::BuscoError;
use busco_runner::schema::{self, keys};
use busco_runner::settings::{RawSettings, SettingsOrigin, Value};
use busco_runner::sources::{ConfigSource, EnvironmentSource, FileSource};

fn everywhere(command: &str) -> Option<PathBuf> {
    Some(PathBuf::from(format!("/usr/bin/{command}")))
}

fn nowhere(_command: &str) -> Option<PathBuf> {
    None
}

fn cli() -> RawSettings {
    RawSettings::new(SettingsOrigin::CommandLine)
        .with(keys::INPUT, "genome.fna")
        .with(keys::OUT, "run1")
        .with(keys::MODE, "geno")
        .with(keys::LINEAGE_DATASET, "bacteria_odb10")
}

fn violations(err: BuscoError) -> Vec<String> {
    match err {
        BuscoError::ConfigValidation { violations } => violations,
        other => panic!("expected a validation error, got {other:?}"),
    }
}

#[test]
fn command_line_beats_file_and_defaults_fill_the_rest() {
    let resolver = ConfigResolver::new(everywhere);
    let file = RawSettings::new(SettingsOrigin::ConfigFile)
        .with(keys::CPU, 2_i64)
        .with(keys::EVALUE, 1e-5);
    let cli = cli().with(keys::CPU, 4_i64);

    let config = resolver.resolve(&cli, &[schema::defaults(), file]).unwrap();
    assert_eq!(config.cpu(), 4);
    assert_eq!(config.evalue(), 1e-5);
    assert_eq!(config.limit(), 3);
    assert_eq!(config.origin(keys::CPU), Some(SettingsOrigin::CommandLine));
    assert_eq!(config.origin(keys::EVALUE), Some(SettingsOrigin::ConfigFile));
    assert_eq!(config.origin(keys::LIMIT), Some(SettingsOrigin::Defaults));
    assert_eq!(config.mode(), AnalysisMode::Genome);
}

#[test]
fn environment_sits_between_defaults_and_file() {
    let resolver = ConfigResolver::new(everywhere);
    let env = RawSettings::new(SettingsOrigin::Environment)
        .with(keys::LIMIT, 5_i64)
        .with(keys::DATASETS_VERSION, "odb12");
    let file = RawSettings::new(SettingsOrigin::ConfigFile).with(keys::LIMIT, 7_i64);

    let config = resolver
        .resolve(&cli(), &[schema::defaults(), env, file])
        .unwrap();
    assert_eq!(config.limit(), 7);
    assert_eq!(config.datasets_version(), "odb12");
}

#[test]
fn resolving_twice_gives_equal_configs() {
    let resolver = ConfigResolver::new(everywhere);
    let sources = [schema::defaults()];
    let first = resolver.resolve(&cli(), &sources).unwrap();
    let second = resolver.resolve(&cli(), &sources).unwrap();
    assert_eq!(first, second);
}

#[test]
fn two_auto_lineage_flags_are_rejected() {
    let resolver = ConfigResolver::new(everywhere);
    for (a, b) in [
        (keys::AUTO_LINEAGE, keys::AUTO_LINEAGE_PROK),
        (keys::AUTO_LINEAGE, keys::AUTO_LINEAGE_EUK),
        (keys::AUTO_LINEAGE_PROK, keys::AUTO_LINEAGE_EUK),
    ] {
        let cli = cli().with(a, true).with(b, "yes");
        let found = violations(resolver.resolve(&cli, &[schema::defaults()]).unwrap_err());
        assert!(
            found.iter().any(|v| v.contains("mutually exclusive")),
            "{a} + {b}: {found:?}"
        );
    }
}

#[test]
fn all_violations_are_reported_together() {
    let resolver = ConfigResolver::new(everywhere);
    let cli = RawSettings::new(SettingsOrigin::CommandLine)
        .with(keys::MODE, "genome")
        .with(keys::CPU, 0_i64)
        .with(keys::EVALUE, -1.0)
        .with(keys::LIMIT, "three")
        .with("colour", "blue");

    let found = violations(resolver.resolve(&cli, &[schema::defaults()]).unwrap_err());
    for key in ["in:", "out:", "cpu:", "evalue:", "limit:", "colour:"] {
        assert!(found.iter().any(|v| v.starts_with(key)), "{key} missing from {found:?}");
    }
    assert_eq!(
        found.iter().filter(|v| v.starts_with("limit:")).count(),
        1,
        "{found:?}"
    );
}

#[test]
fn missing_executables_are_named() {
    let resolver = ConfigResolver::new(nowhere);
    let found = violations(resolver.resolve(&cli(), &[schema::defaults()]).unwrap_err());
    assert!(found.iter().any(|v| v.starts_with("hmmsearch:")), "{found:?}");
    assert!(found.iter().any(|v| v.contains("prodigal or metaeuk")), "{found:?}");
}

#[test]
fn tool_sections_supply_paths() {
    let resolver = ConfigResolver::new(nowhere);
    let file = RawSettings::new(SettingsOrigin::ConfigFile)
        .with_tool(keys::HMMSEARCH, keys::TOOL_PATH, "/opt/hmmer/hmmsearch")
        .with_tool(keys::METAEUK, keys::TOOL_PATH, "/opt/metaeuk/metaeuk");
    let config = resolver.resolve(&cli(), &[schema::defaults(), file]).unwrap();
    assert_eq!(
        config.tool(keys::HMMSEARCH).and_then(|tool| tool.path.clone()),
        Some(PathBuf::from("/opt/hmmer/hmmsearch"))
    );
    assert_eq!(config.tool(keys::PRODIGAL).and_then(|tool| tool.path.clone()), None);
}

#[test]
fn unknown_tool_sections_are_rejected() {
    let resolver = ConfigResolver::new(everywhere);
    let file = RawSettings::new(SettingsOrigin::ConfigFile).with_tool("blast", "path", "/bin/blast");
    let found = violations(resolver.resolve(&cli(), &[schema::defaults(), file]).unwrap_err());
    assert_eq!(found, vec!["blast: unknown dependency section".to_string()]);
}

#[test]
fn auto_scope_decides_required_predictors() {
    let only_prodigal = |command: &str| {
        (command == keys::HMMSEARCH || command == keys::PRODIGAL)
            .then(|| PathBuf::from(format!("/usr/bin/{command}")))
    };
    let resolver = ConfigResolver::new(only_prodigal);
    let base = RawSettings::new(SettingsOrigin::CommandLine)
        .with(keys::INPUT, "genome.fna")
        .with(keys::OUT, "run1")
        .with(keys::MODE, "genome");

    let prok = base.clone().with(keys::AUTO_LINEAGE_PROK, true);
    let config = resolver.resolve(&prok, &[schema::defaults()]).unwrap();
    assert_eq!(config.auto_lineage(), Some(LineageScope::Prokaryota));

    let found = violations(resolver.resolve(&base, &[schema::defaults()]).unwrap_err());
    assert_eq!(found.len(), 1, "{found:?}");
    assert!(found[0].starts_with("metaeuk:"));
}

#[test]
fn proteins_mode_needs_only_hmmsearch() {
    let only_hmmsearch = |command: &str| {
        (command == keys::HMMSEARCH).then(|| PathBuf::from("/usr/bin/hmmsearch"))
    };
    let resolver = ConfigResolver::new(only_hmmsearch);
    let cli = cli().with(keys::MODE, "prot");
    let config = resolver.resolve(&cli, &[schema::defaults()]).unwrap();
    assert_eq!(config.mode(), AnalysisMode::Proteins);
    assert_eq!(config.value(keys::MODE), Some(&Value::text("proteins")));
}

#[test]
fn loader_reads_environment_and_config_files() {
    let temp = tempfile::tempdir().unwrap();
    let env_path = temp.path().join("site.toml");
    fs::write(&env_path, "cpu = 2\nlimit = 4\n").unwrap();
    let file_path = temp.path().join("run.toml");
    fs::write(
        &file_path,
        "[busco_run]\ncpu = 3\nevalue = 1e-5\n\n[hmmsearch]\npath = \"/opt/hmmsearch\"\n",
    )
    .unwrap();

    let loader = ConfigLoader::new(everywhere, EnvironmentSource::new(Some(env_path)));
    let config = loader.load(&cli(), Some(file_path.as_path())).unwrap();
    assert_eq!(config.cpu(), 3);
    assert_eq!(config.limit(), 4);
    assert_eq!(config.evalue(), 1e-5);
    assert_eq!(config.origin(keys::LIMIT), Some(SettingsOrigin::Environment));
    assert_eq!(
        config.tool(keys::HMMSEARCH).and_then(|tool| tool.path.clone()),
        Some(PathBuf::from("/opt/hmmsearch"))
    );
}

#[test]
fn malformed_config_file_is_a_file_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("broken.toml");
    fs::write(&path, "cpu = = 3\n").unwrap();
    assert_matches!(
        FileSource::new(&path, false).read(),
        Err(BuscoError::ConfigFile { .. })
    );
}

#[test]
fn absent_sources_are_empty_unless_required() {
    let temp = tempfile::tempdir().unwrap();
    let missing = temp.path().join("missing.toml");

    assert!(FileSource::new(&missing, false).read().unwrap().is_empty());
    assert!(EnvironmentSource::new(Some(missing.clone())).read().unwrap().is_empty());
    assert!(EnvironmentSource::new(None).read().unwrap().is_empty());
    assert_matches!(
        FileSource::new(&missing, true).read(),
        Err(BuscoError::MissingConfigFile(_))
    );

    let loader = ConfigLoader::new(everywhere, EnvironmentSource::new(None));
    assert_matches!(
        loader.load(&cli(), Some(missing.as_path())),
        Err(BuscoError::MissingConfigFile(_))
    );
}
