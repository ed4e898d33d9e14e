//! Settings for the `schemagen` binary.
//!
//! Sources, later ones winning:
//! - `schemagen.toml` or `.schemagen.toml` in the working directory
//! - the file given with `--config`
//! - environment variables `SCHEMAGEN_*` (`SCHEMAGEN_SQL__DIALECT=postgres`,
//!   comma-separated lists for `SCHEMAGEN_GENERATORS` and `SCHEMAGEN_PLUGINS`)
//!
//! Command-line flags override all of them.
//!
//! ```toml
//! schema_dir = "schemas"
//! output_dir = "generated"
//! recursive = true
//! generators = ["sql", "rust"]
//! plugins = ["target/release/libschemagen_graphql.so"]
//!
//! [sql]
//! dialect = "postgres"
//! powerset_queries = false
//! ```

use std::path::{Path, PathBuf};

use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::generators::{BUILTIN_GENERATORS, GeneratorArgs, sql};

const CONFIG_LOCATIONS: [&str; 2] = ["schemagen.toml", ".schemagen.toml"];
const ENV_PREFIX: &str = "SCHEMAGEN";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config_crate::ConfigError),
    #[error("no {what} given; pass `--{flag}` or set `{key}` in schemagen.toml")]
    Missing {
        what: &'static str,
        flag: &'static str,
        key: &'static str,
    },
    #[error("unknown generator `{0}`, expected one of: {list}", list = BUILTIN_GENERATORS.join(", "))]
    UnknownGenerator(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub schema_dir: Option<PathBuf>,

    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// Descend into subdirectories of `schema_dir`
    #[serde(default)]
    pub recursive: bool,

    /// Built-in generators to enable
    #[serde(default)]
    pub generators: Vec<String>,

    /// Shared libraries to load generators from
    #[serde(default)]
    pub plugins: Vec<PathBuf>,

    #[serde(default)]
    pub sql: SqlSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SqlSettings {
    #[serde(default)]
    pub dialect: Option<String>,

    /// Emit the filtered-query surface; the CLI still asks first
    #[serde(default)]
    pub powerset_queries: bool,
}

impl Settings {
    /// Load from the default locations, `path` and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, environment())
    }

    fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        for location in CONFIG_LOCATIONS {
            builder = builder.add_source(File::with_name(location).required(false));
        }
        if let Some(path) = path {
            builder = builder.add_source(File::from(path.to_path_buf()).required(true));
        }
        builder = builder.add_source(env);

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.check_generators()?;
        Ok(settings)
    }

    fn check_generators(&self) -> Result<(), ConfigError> {
        match self
            .generators
            .iter()
            .find(|g| !BUILTIN_GENERATORS.contains(&g.as_str()))
        {
            Some(unknown) => Err(ConfigError::UnknownGenerator(unknown.clone())),
            None => Ok(()),
        }
    }

    pub fn schema_dir(&self) -> Result<&Path, ConfigError> {
        self.schema_dir.as_deref().ok_or(ConfigError::Missing {
            what: "schema directory",
            flag: "schema-dir",
            key: "schema_dir",
        })
    }

    pub fn output_dir(&self) -> Result<&Path, ConfigError> {
        self.output_dir.as_deref().ok_or(ConfigError::Missing {
            what: "output directory",
            flag: "output-dir",
            key: "output_dir",
        })
    }

    /// Enables a built-in generator once.
    pub fn enable(&mut self, generator: &str) {
        if !self.generators.iter().any(|g| g == generator) {
            self.generators.push(generator.to_string());
        }
    }

    /// Arguments for a built-in generator's `configure`.
    pub fn generator_args(&self, generator: &str) -> GeneratorArgs {
        let mut args = GeneratorArgs::new();
        if generator == sql::NAME {
            if let Some(dialect) = &self.sql.dialect {
                args.set("dialect", dialect.clone());
            }
            args.set("powerset_queries", self.sql.powerset_queries.to_string());
        }
        args
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("generators")
        .with_list_parse_key("plugins")
}
