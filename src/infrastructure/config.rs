use clap::builder::PossibleValuesParser;
use clap::parser::ValueSource;
use clap::{Arg, ArgAction, ArgMatches, Command};
use config::{Config as ConfigStore, Value};

use crate::infrastructure::logging::{FORMAT_CHOICES, LEVEL_CHOICES};
use crate::shared::error::SvckitError;

/// Value kind of a config parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Str,
    Int,
    Float,
    Bool,
}

/// Command-line counterpart of a config parameter.
#[derive(Debug, Clone)]
pub struct CliEntry {
    pub short: Option<char>,
    pub long: String,
    pub choices: Option<Vec<String>>,
    pub is_flag: bool,
}

impl CliEntry {
    pub fn new(short: Option<char>, long: &str) -> Self {
        Self {
            short,
            long: long.to_string(),
            choices: None,
            is_flag: false,
        }
    }

    /// A boolean switch set by presence, e.g. `--dump-config`.
    pub fn flag(short: Option<char>, long: &str) -> Self {
        Self {
            short,
            long: long.to_string(),
            choices: None,
            is_flag: true,
        }
    }

    /// Restrict the accepted values. Only meaningful for string entries.
    pub fn with_choices(mut self, choices: &[&str]) -> Self {
        self.choices = Some(choices.iter().map(|c| c.to_string()).collect());
        self
    }
}

/// Descriptor of one config parameter: name, help text, typed default and
/// the optional CLI counterpart.
///
/// The name doubles as the environment variable name in upper case, so
/// `log_level` is overridden by `LOG_LEVEL`.
#[derive(Debug, Clone)]
pub struct ConfigEntry {
    pub name: String,
    pub help: String,
    pub kind: EntryKind,
    pub default: Value,
    pub cli: Option<CliEntry>,
}

impl ConfigEntry {
    pub fn string(name: &str, help: &str, default: &str) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            kind: EntryKind::Str,
            default: Value::from(default.to_string()),
            cli: None,
        }
    }

    pub fn int(name: &str, help: &str, default: i64) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            kind: EntryKind::Int,
            default: Value::from(default),
            cli: None,
        }
    }

    pub fn float(name: &str, help: &str, default: f64) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            kind: EntryKind::Float,
            default: Value::from(default),
            cli: None,
        }
    }

    pub fn boolean(name: &str, help: &str, default: bool) -> Self {
        Self {
            name: name.to_string(),
            help: help.to_string(),
            kind: EntryKind::Bool,
            default: Value::from(default),
            cli: None,
        }
    }

    pub fn with_cli(mut self, cli: CliEntry) -> Self {
        self.cli = Some(cli);
        self
    }
}

/// Declarative description of an application's configuration.
///
/// [`ConfigSpec::new`] seeds the standard entries every application carries:
/// `log_level`, `log_format` and `dump_config`.
#[derive(Debug, Clone)]
pub struct ConfigSpec {
    pub app_name: String,
    pub app_description: String,
    pub entries: Vec<ConfigEntry>,
}

impl ConfigSpec {
    pub fn new(app_name: &str, app_description: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            app_description: app_description.to_string(),
            entries: standard_entries(),
        }
    }

    pub fn with_entry(mut self, entry: ConfigEntry) -> Self {
        self.entries.push(entry);
        self
    }
}

/// The entries the lifecycle core itself reads.
pub fn standard_entries() -> Vec<ConfigEntry> {
    vec![
        ConfigEntry::string(
            "log_level",
            &format!("Log level {LEVEL_CHOICES:?}"),
            "info",
        )
        .with_cli(CliEntry::new(Some('l'), "log-level").with_choices(LEVEL_CHOICES)),
        ConfigEntry::string(
            "log_format",
            &format!("The format of the log messages {FORMAT_CHOICES:?}"),
            "text",
        )
        .with_cli(CliEntry::new(Some('f'), "log-format").with_choices(FORMAT_CHOICES)),
        ConfigEntry::boolean(
            "dump_config",
            "Dump the actual configuration parameters of the application",
            false,
        )
        .with_cli(CliEntry::flag(Some('d'), "dump-config")),
    ]
}

/// Immutable, resolved configuration.
///
/// Resolution happens exactly once, with ascending precedence: typed
/// defaults, then environment variables, then command-line arguments. After
/// that the mapping is read-only and safe to share across tasks.
pub struct AppConfig {
    app_name: String,
    app_description: String,
    entries: Vec<ConfigEntry>,
    store: ConfigStore,
}

impl AppConfig {
    /// Resolve the configuration. `argv` is the CLI argument list without
    /// the program name; `None` reads the process arguments.
    pub fn resolve(spec: ConfigSpec, argv: Option<&[String]>) -> Result<Self, SvckitError> {
        let matches = parse_cli(&spec, argv)?;

        let mut builder = ConfigStore::builder();
        for entry in &spec.entries {
            builder = builder.set_default(&entry.name, entry.default.clone())?;
        }
        // Only the declared entries consult the environment; an unrelated
        // variable never enters the store. CLI overrides replace environment
        // overrides below because later `set_override` calls win per key.
        for entry in &spec.entries {
            if let Some(value) = env_value(entry)? {
                builder = builder.set_override(&entry.name, value)?;
            }
        }
        for entry in &spec.entries {
            if entry.cli.is_none() {
                continue;
            }
            if matches.value_source(&entry.name) != Some(ValueSource::CommandLine) {
                continue;
            }
            let value = cli_value(entry, &matches)?;
            builder = builder.set_override(&entry.name, value)?;
        }

        let store = builder.build()?;
        Ok(Self {
            app_name: spec.app_name,
            app_description: spec.app_description,
            entries: spec.entries,
            store,
        })
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn app_description(&self) -> &str {
        &self.app_description
    }

    pub fn get_str(&self, name: &str) -> Option<String> {
        self.store.get_string(name).ok()
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.store.get_int(name).ok()
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.store.get_float(name).ok()
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.store.get_bool(name).ok()
    }

    /// Print the resolved parameters to the console.
    pub fn dump(&self) {
        println!("\nConfig:");
        for entry in &self.entries {
            let value = self.store.get_string(&entry.name).unwrap_or_default();
            println!("  {}: '{}'", entry.name, value);
        }
    }
}

/// Read the entry's environment variable (its upper-cased name) and coerce
/// the text to the entry's kind. Unset and empty variables count as absent;
/// a value that does not parse is a hard error rather than a silent
/// fall-back to the default.
fn env_value(entry: &ConfigEntry) -> Result<Option<Value>, SvckitError> {
    let raw = match std::env::var(entry.name.to_uppercase()) {
        Ok(raw) if !raw.is_empty() => raw,
        _ => return Ok(None),
    };

    let value = Value::from(raw);
    let value = match entry.kind {
        EntryKind::Str => value,
        EntryKind::Int => Value::from(value.into_int()?),
        EntryKind::Float => Value::from(value.into_float()?),
        EntryKind::Bool => Value::from(value.into_bool()?),
    };
    Ok(Some(value))
}

fn parse_cli(spec: &ConfigSpec, argv: Option<&[String]>) -> Result<ArgMatches, SvckitError> {
    let command = build_command(spec);
    let parsed = match argv {
        Some(args) => command.try_get_matches_from(
            std::iter::once(spec.app_name.clone()).chain(args.iter().cloned()),
        ),
        None => command.try_get_matches_from(std::env::args()),
    };
    parsed.map_err(|err| match err.kind() {
        clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => err.exit(),
        _ => SvckitError::from(err),
    })
}

fn build_command(spec: &ConfigSpec) -> Command {
    let mut command = Command::new(spec.app_name.clone()).about(spec.app_description.clone());

    for entry in &spec.entries {
        let Some(cli) = &entry.cli else { continue };

        let mut arg = Arg::new(entry.name.clone())
            .long(cli.long.clone())
            .help(entry.help.clone());
        if let Some(short) = cli.short {
            arg = arg.short(short);
        }

        if cli.is_flag {
            arg = arg.action(ArgAction::SetTrue);
        } else {
            arg = arg.action(ArgAction::Set);
            arg = match entry.kind {
                EntryKind::Str => match &cli.choices {
                    Some(choices) => arg.value_parser(PossibleValuesParser::new(choices.clone())),
                    None => arg.value_parser(clap::value_parser!(String)),
                },
                EntryKind::Int => arg.value_parser(clap::value_parser!(i64)),
                EntryKind::Float => arg.value_parser(clap::value_parser!(f64)),
                EntryKind::Bool => arg.value_parser(clap::value_parser!(bool)),
            };
        }
        command = command.arg(arg);
    }

    command
}

fn cli_value(entry: &ConfigEntry, matches: &ArgMatches) -> Result<Value, SvckitError> {
    let missing = || SvckitError::Cli(format!("missing value for '{}'", entry.name));

    if entry
        .cli
        .as_ref()
        .map(|cli| cli.is_flag)
        .unwrap_or(false)
    {
        return Ok(Value::from(matches.get_flag(&entry.name)));
    }

    let value = match entry.kind {
        EntryKind::Str => matches
            .get_one::<String>(&entry.name)
            .cloned()
            .map(Value::from)
            .ok_or_else(missing)?,
        EntryKind::Int => matches
            .get_one::<i64>(&entry.name)
            .copied()
            .map(Value::from)
            .ok_or_else(missing)?,
        EntryKind::Float => matches
            .get_one::<f64>(&entry.name)
            .copied()
            .map(Value::from)
            .ok_or_else(missing)?,
        EntryKind::Bool => matches
            .get_one::<bool>(&entry.name)
            .copied()
            .map(Value::from)
            .ok_or_else(missing)?,
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_defaults_resolve() {
        let spec = ConfigSpec::new("test-app", "A test application")
            .with_entry(ConfigEntry::int("workers", "Worker count", 4));
        let config = AppConfig::resolve(spec, Some(&[])).unwrap();

        assert_eq!(config.app_name(), "test-app");
        assert_eq!(config.get_i64("workers"), Some(4));
        assert_eq!(config.get_str("log_level").as_deref(), Some("info"));
        assert_eq!(config.get_str("log_format").as_deref(), Some("text"));
        assert_eq!(config.get_bool("dump_config"), Some(false));
    }

    #[test]
    fn test_cli_overrides_default() {
        let spec = ConfigSpec::new("test-app", "A test application").with_entry(
            ConfigEntry::int("workers", "Worker count", 4)
                .with_cli(CliEntry::new(Some('w'), "workers")),
        );
        let args = argv(&["--workers", "8", "-l", "debug", "-d"]);
        let config = AppConfig::resolve(spec, Some(&args)).unwrap();

        assert_eq!(config.get_i64("workers"), Some(8));
        assert_eq!(config.get_str("log_level").as_deref(), Some("debug"));
        assert_eq!(config.get_bool("dump_config"), Some(true));
    }

    #[test]
    fn test_absent_parameter_is_none() {
        let spec = ConfigSpec::new("test-app", "A test application");
        let config = AppConfig::resolve(spec, Some(&[])).unwrap();
        assert_eq!(config.get_str("no_such_parameter"), None);
    }

    #[test]
    fn test_invalid_cli_value_rejected() {
        let spec = ConfigSpec::new("test-app", "A test application").with_entry(
            ConfigEntry::int("workers", "Worker count", 4)
                .with_cli(CliEntry::new(Some('w'), "workers")),
        );
        let args = argv(&["--workers", "many"]);
        assert!(AppConfig::resolve(spec, Some(&args)).is_err());
    }

    #[test]
    fn test_choice_violation_rejected() {
        let spec = ConfigSpec::new("test-app", "A test application");
        let args = argv(&["--log-level", "loud"]);
        assert!(AppConfig::resolve(spec, Some(&args)).is_err());
    }

    #[test]
    fn test_malformed_environment_value_rejected() {
        std::env::set_var("RETRY_BUDGET", "plenty");
        let spec = ConfigSpec::new("test-app", "A test application")
            .with_entry(ConfigEntry::int("retry_budget", "Retry budget", 3));
        assert!(AppConfig::resolve(spec, Some(&[])).is_err());
        std::env::remove_var("RETRY_BUDGET");
    }

    #[test]
    fn test_typed_accessor_mismatch_is_none() {
        let spec = ConfigSpec::new("test-app", "A test application")
            .with_entry(ConfigEntry::string("label", "A label", "blue"));
        let config = AppConfig::resolve(spec, Some(&[])).unwrap();
        assert_eq!(config.get_i64("label"), None);
    }
}
