//! Chain.toml manifest parsing.
//!
//! The manifest declares a build chain for the command line: item types,
//! steps with their produce/consume declarations, and optionally a shell
//! command per step. All items declared this way carry `String` values.
//!
//! ```toml
//! [chain]
//! finals = ["jar"]
//!
//! [items]
//! sources = "multi"
//! jar = "simple"
//!
//! [[step]]
//! name = "scan"
//! produces = ["sources"]
//! run = "ls src"
//!
//! [[step]]
//! name = "package"
//! consumes = [{ item = "sources", destructive = true }]
//! produces = ["jar"]
//! run = "echo app.jar"
//! ```
//!
//! A command step sees every consumed item as a `BUILDCHAIN_ITEM_<NAME>`
//! environment variable: simple values verbatim, multi values joined by
//! newlines, markers as `1`. Its trimmed stdout becomes the value of each
//! produced simple item and each non-empty stdout line becomes an instance
//! of each produced multi item.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::builder::{BuildResult, StepContext};
use crate::core::chain::ChainBuilder;
use crate::core::item::{ItemId, ItemKey, ItemKind, Marker};
use crate::core::step::{
    new_step, Consumption, ProduceFlags, Requirement, StepBuilder, StepDescriptor,
};
use crate::resolver::{ChainError, ChainErrors};
use crate::util::diagnostic::{suggestions, Diagnostic};
use crate::util::process::ProcessBuilder;

/// Canonical manifest filename.
pub const MANIFEST_NAME: &str = "Chain.toml";

/// Prefix of the environment variables carrying consumed items.
pub const ITEM_ENV_PREFIX: &str = "BUILDCHAIN_ITEM_";

/// Errors loading a chain manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("could not find `{}` in `{}` or any parent directory", MANIFEST_NAME, dir.display())]
    NotFound { dir: PathBuf },

    #[error("failed to read manifest `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest `{}`", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid kind for item `{item}`: {message}")]
    InvalidKind { item: String, message: String },

    #[error(transparent)]
    Chain(#[from] ChainErrors),
}

impl ManifestError {
    /// Convert to user-friendly diagnostics.
    pub fn to_diagnostics(&self) -> Vec<Diagnostic> {
        match self {
            ManifestError::NotFound { .. } => {
                vec![Diagnostic::error(self.to_string()).with_suggestion(suggestions::NO_MANIFEST)]
            }
            ManifestError::Parse { source, .. } => vec![Diagnostic::error(self.to_string())
                .with_context(source.message().to_string())],
            ManifestError::Io { source, .. } => {
                vec![Diagnostic::error(self.to_string()).with_context(source.to_string())]
            }
            ManifestError::InvalidKind { .. } => vec![Diagnostic::error(self.to_string())
                .with_suggestion("Use one of `simple`, `multi`, or `marker`")],
            ManifestError::Chain(errors) => errors.to_diagnostics(),
        }
    }
}

/// Find the manifest in `dir` or its nearest ancestor.
pub fn find_manifest(dir: &Path) -> Result<PathBuf, ManifestError> {
    dir.ancestors()
        .map(|d| d.join(MANIFEST_NAME))
        .find(|p| p.is_file())
        .ok_or_else(|| ManifestError::NotFound {
            dir: dir.to_path_buf(),
        })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    #[serde(default)]
    chain: RawChain,
    #[serde(default)]
    items: BTreeMap<String, String>,
    #[serde(default, rename = "step")]
    steps: Vec<RawStep>,
    #[serde(default)]
    initial: BTreeMap<String, RawInitial>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawChain {
    #[serde(default)]
    finals: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStep {
    name: String,
    #[serde(default)]
    produces: Vec<RawProduce>,
    #[serde(default)]
    consumes: Vec<RawConsume>,
    run: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawProduce {
    Name(String),
    Detailed {
        item: String,
        #[serde(default)]
        optional: bool,
        #[serde(default)]
        overridable: bool,
        #[serde(default)]
        weak: bool,
    },
}

impl RawProduce {
    fn into_parts(self) -> (String, ProduceFlags) {
        match self {
            RawProduce::Name(item) => (item, ProduceFlags::NONE),
            RawProduce::Detailed {
                item,
                optional,
                overridable,
                weak,
            } => (
                item,
                ProduceFlags {
                    optional,
                    overridable,
                    weak,
                },
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawConsume {
    Name(String),
    Detailed {
        item: String,
        #[serde(default)]
        optional: bool,
        #[serde(default)]
        destructive: bool,
    },
}

impl RawConsume {
    fn into_parts(self) -> (String, Requirement, Consumption) {
        match self {
            RawConsume::Name(item) => (item, Requirement::Required, Consumption::NonDestructive),
            RawConsume::Detailed {
                item,
                optional,
                destructive,
            } => (
                item,
                if optional {
                    Requirement::Optional
                } else {
                    Requirement::Required
                },
                if destructive {
                    Consumption::Destructive
                } else {
                    Consumption::NonDestructive
                },
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawInitial {
    Flag(bool),
    One(String),
    Many(Vec<String>),
}

/// Typed key of a manifest item.
#[derive(Debug, Clone)]
pub enum ManifestKey {
    /// Simple or multi item carrying strings.
    Value(ItemKey<String>),
    Marker(ItemKey<Marker>),
}

impl ManifestKey {
    pub fn id(&self) -> &ItemId {
        match self {
            ManifestKey::Value(k) => k.id(),
            ManifestKey::Marker(k) => k.id(),
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            ManifestKey::Value(k) => k.kind(),
            ManifestKey::Marker(k) => k.kind(),
        }
    }

    fn declare_produce(&self, builder: StepBuilder, flags: ProduceFlags) -> StepBuilder {
        match self {
            ManifestKey::Value(k) => builder.produces_with(k, flags),
            ManifestKey::Marker(k) => builder.produces_with(k, flags),
        }
    }

    fn declare_consume(
        &self,
        builder: StepBuilder,
        requirement: Requirement,
        consumption: Consumption,
    ) -> StepBuilder {
        match self {
            ManifestKey::Value(k) => builder.consumes(k, requirement, consumption),
            ManifestKey::Marker(k) => builder.consumes(k, requirement, consumption),
        }
    }
}

/// A chain loaded from a manifest.
#[derive(Debug)]
pub struct LoadedChain {
    pub chain: ChainBuilder,
    pub keys: BTreeMap<ItemId, ManifestKey>,
    /// Final items named in `[chain]`.
    pub finals: Vec<ItemId>,
    /// Directory commands run in.
    pub root: PathBuf,
}

impl LoadedChain {
    /// Load and register a manifest file.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    /// Parse manifest content. `path` is used for messages and as the
    /// command working directory.
    pub fn parse(content: &str, path: &Path) -> Result<Self, ManifestError> {
        let raw: RawManifest = toml::from_str(content).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut chain = ChainBuilder::new();
        let mut keys = BTreeMap::new();
        for (name, kind) in &raw.items {
            let kind: ItemKind = kind.parse().map_err(|message| ManifestError::InvalidKind {
                item: name.clone(),
                message,
            })?;
            let key = match kind {
                ItemKind::Simple => ManifestKey::Value(chain.declare_simple::<String>(name).map_err(ChainErrors::from)?),
                ItemKind::Multi => ManifestKey::Value(chain.declare_multi::<String>(name).map_err(ChainErrors::from)?),
                ItemKind::Marker => ManifestKey::Marker(chain.declare_marker(name).map_err(ChainErrors::from)?),
            };
            keys.insert(key.id().clone(), key);
        }

        let mut errors = Vec::new();
        for raw_step in raw.steps {
            match build_step(raw_step, &keys, &root) {
                Ok(step) => {
                    if let Err(e) = chain.register_step(step) {
                        errors.extend_from_slice(e.errors());
                    }
                }
                Err(e) => errors.extend(e),
            }
        }

        for (name, value) in raw.initial {
            let Some(key) = keys.get(&ItemId::new(&name)) else {
                errors.push(ChainError::UnregisteredItem {
                    step: "<initial>".to_string(),
                    item: name,
                });
                continue;
            };
            let added = match (key, value) {
                (ManifestKey::Marker(k), RawInitial::Flag(present)) => {
                    if present {
                        chain.add_initial(k, Marker)
                    } else {
                        Ok(())
                    }
                }
                (ManifestKey::Value(k), RawInitial::One(v)) => chain.add_initial(k, v),
                (ManifestKey::Value(k), RawInitial::Many(vs)) if k.kind() == ItemKind::Multi => {
                    vs.into_iter().try_for_each(|v| chain.add_initial(k, v))
                }
                (key, _) => Err(ChainError::InvalidInitial {
                    item: name,
                    expected: match key.kind() {
                        ItemKind::Simple => "a string",
                        ItemKind::Multi => "a string or an array of strings",
                        ItemKind::Marker => "a boolean",
                    },
                }),
            };
            if let Err(e) = added {
                errors.push(e);
            }
        }

        if !errors.is_empty() {
            return Err(ChainErrors::new(errors).into());
        }

        tracing::debug!(
            "loaded {} item(s) and {} step(s) from {}",
            keys.len(),
            chain.len(),
            path.display()
        );

        Ok(LoadedChain {
            chain,
            keys,
            finals: raw.chain.finals.iter().map(ItemId::new).collect(),
            root,
        })
    }

    /// Render an item of a finished build as JSON.
    ///
    /// Simple items become a string (or null when never produced), multi
    /// items an array, markers a boolean.
    pub fn item_value(&self, result: &BuildResult, id: &ItemId) -> serde_json::Value {
        use serde_json::Value;

        match self.keys.get(id) {
            Some(ManifestKey::Value(k)) if k.kind() == ItemKind::Simple => result
                .get(k)
                .map(|v| Value::String(v.to_string()))
                .unwrap_or(Value::Null),
            Some(ManifestKey::Value(k)) => Value::Array(
                result
                    .get_all(k)
                    .unwrap_or_default()
                    .iter()
                    .map(|v| Value::String(v.to_string()))
                    .collect(),
            ),
            Some(ManifestKey::Marker(k)) => Value::Bool(result.is_present(k)),
            None => Value::Null,
        }
    }
}

/// Environment variable name for an item.
pub fn item_env_var(id: &ItemId) -> String {
    let name: String = id
        .as_str()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}{}", ITEM_ENV_PREFIX, name)
}

fn build_step(
    raw: RawStep,
    keys: &BTreeMap<ItemId, ManifestKey>,
    root: &Path,
) -> Result<StepDescriptor, Vec<ChainError>> {
    let mut builder = new_step(&raw.name);
    let mut missing = Vec::new();
    let mut produces = Vec::new();
    let mut consumes = Vec::new();

    for produce in raw.produces {
        let (item, flags) = produce.into_parts();
        match keys.get(&ItemId::new(&item)) {
            Some(key) => {
                builder = key.declare_produce(builder, flags);
                produces.push(key.clone());
            }
            None => missing.push(ChainError::UnregisteredItem {
                step: raw.name.clone(),
                item,
            }),
        }
    }

    for consume in raw.consumes {
        let (item, requirement, consumption) = consume.into_parts();
        match keys.get(&ItemId::new(&item)) {
            Some(key) => {
                builder = key.declare_consume(builder, requirement, consumption);
                consumes.push((key.clone(), consumption == Consumption::Destructive));
            }
            None => missing.push(ChainError::UnregisteredItem {
                step: raw.name.clone(),
                item,
            }),
        }
    }

    if !missing.is_empty() {
        return Err(missing);
    }

    let action = CommandAction {
        run: raw.run,
        root: root.to_path_buf(),
        produces,
        consumes,
    };
    builder
        .build(move |ctx| action.execute(ctx))
        .map_err(|e| e.errors().to_vec())
}

struct CommandAction {
    run: Option<String>,
    root: PathBuf,
    produces: Vec<ManifestKey>,
    /// Consumed keys with their destructive flag.
    consumes: Vec<(ManifestKey, bool)>,
}

impl CommandAction {
    fn execute(&self, ctx: &mut StepContext<'_>) -> anyhow::Result<()> {
        let Some(run) = &self.run else {
            let value = ctx.step_name().to_string();
            return self.produce_all(ctx, &value, std::iter::once(value.as_str()));
        };

        let mut process = ProcessBuilder::shell(run)
            .cwd(&self.root)
            .env("BUILDCHAIN_STEP", ctx.step_name());
        for (key, destructive) in &self.consumes {
            if let Some(value) = read_item(ctx, key, *destructive)? {
                process = process.env(item_env_var(key.id()), value);
            }
        }

        tracing::debug!("`{}`: {}", ctx.step_name(), process.display_command());
        let stdout = process.run()?;
        let lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
        self.produce_all(ctx, stdout.trim(), lines)
    }

    fn produce_all<'s>(
        &self,
        ctx: &mut StepContext<'_>,
        simple: &str,
        lines: impl Iterator<Item = &'s str> + Clone,
    ) -> anyhow::Result<()> {
        for key in &self.produces {
            match key {
                ManifestKey::Value(k) if k.kind() == ItemKind::Simple => {
                    ctx.produce(k, simple.to_string())?
                }
                ManifestKey::Value(k) => {
                    for line in lines.clone() {
                        ctx.produce(k, line.to_string())?;
                    }
                }
                ManifestKey::Marker(k) => ctx.produce_marker(k)?,
            }
        }
        Ok(())
    }
}

fn read_item(
    ctx: &StepContext<'_>,
    key: &ManifestKey,
    destructive: bool,
) -> anyhow::Result<Option<String>> {
    let value = match key {
        ManifestKey::Value(k) if k.kind() == ItemKind::Simple => {
            let value = if destructive { ctx.take(k)? } else { ctx.get(k)? };
            value.map(|v| v.to_string())
        }
        ManifestKey::Value(k) => {
            let values = if destructive { ctx.take_all(k)? } else { ctx.get_all(k)? };
            let values: Vec<&str> = values.iter().map(|v| v.as_str()).collect();
            Some(values.join("\n"))
        }
        ManifestKey::Marker(k) => ctx.is_present(k)?.then(|| "1".to_string()),
    };
    Ok(value)
}
