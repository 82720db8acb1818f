//! The `file` provider: entities and relations declared in YAML documents.
//!
//! ```yaml
//! entities:
//!   - kind: Repo
//!     name: api
//!     properties: { language: rust }
//! relations:
//!   - relation: OWNS
//!     source: { kind: Team, name: platform }
//!     target: { selector: "language=rust", kind: Repo }
//! ```
//!
//! A missing namespace falls back to the instance namespace. Every matched
//! file is one discovery batch; a file that fails to parse fails the tick.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use graphsync_core::entity::MAX_NAME_LEN;
use graphsync_core::{
    Capability, Endpoint, Entity, EntityKey, EntityTypeDef, Error, FieldSelector,
    ProviderDescriptor, ProviderInstanceConfig, Properties, Relation, RelationTypeDecl,
    ReportedState, Result, ResultExt, sanitize_name,
};
use graphsync_registry::{
    ConfigVersionInfo, ConfigVersionSupport, Discovery, DiscoveryScope, Incremental, Migration,
    Provider, RelationProducing,
};
use semver::Version;
use serde::Deserialize;
use tracing::{debug, info};

pub const PROVIDER_NAME: &str = "file";

/// Options schema version this provider reads.
pub const CONFIG_VERSION: u32 = 2;

fn default_base_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_paths() -> Vec<String> {
    vec!["**/*.yaml".to_string()]
}

const fn default_true() -> bool {
    true
}

/// Instance options for the file provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileProviderOptions {
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,
    /// Glob patterns relative to `base_path`.
    #[serde(default = "default_paths")]
    pub paths: Vec<String>,
    /// Pass entity names through [`sanitize_name`] before validation.
    #[serde(default = "default_true")]
    pub sanitize_names: bool,
    /// Entity types to register even if no document mentions them yet.
    #[serde(default)]
    pub types: Vec<EntityTypeDef>,
}

pub fn descriptor() -> ProviderDescriptor {
    ProviderDescriptor::new(PROVIDER_NAME, Version::new(1, 0, 0))
        .with_display_name("YAML files")
        .with_description("Entities and relations declared in YAML documents on disk")
        .with_capability(Capability::Discovery)
        .with_capability(Capability::Incremental)
        .with_capability(Capability::Relations)
        .with_min_framework_version(Version::new(0, 1, 0))
}

/// Version 1 took a single `pattern` string instead of a `paths` list.
fn migrate_v1(mut options: serde_json::Value) -> Result<serde_json::Value> {
    let Some(map) = options.as_object_mut() else {
        return Err(Error::config("file provider options must be a mapping"));
    };
    if let Some(pattern) = map.remove("pattern") {
        map.entry("paths")
            .or_insert_with(|| serde_json::Value::Array(vec![pattern]));
    }
    Ok(options)
}

/// Supported option versions and the v1 to v2 migration.
///
/// # Errors
///
/// Never fails for the built-in table; the `Result` comes from
/// [`ConfigVersionSupport::new`].
pub fn config_versions() -> Result<ConfigVersionSupport> {
    ConfigVersionSupport::new(
        CONFIG_VERSION,
        [ConfigVersionInfo::new(1), ConfigVersionInfo::new(CONFIG_VERSION)],
        [(1, migrate_v1 as Migration)],
    )
}

// ============================================================================
// Document shape
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct GraphDocument {
    #[serde(default)]
    entities: Vec<EntityDoc>,
    #[serde(default)]
    relations: Vec<RelationDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EntityDoc {
    kind: String,
    name: String,
    namespace: Option<String>,
    #[serde(default)]
    properties: Properties,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RelationDoc {
    relation: String,
    namespace: Option<String>,
    source: EndpointDoc,
    target: EndpointDoc,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EndpointDoc {
    Selector {
        selector: String,
        kind: Option<String>,
        namespace: Option<String>,
    },
    Concrete {
        kind: String,
        name: String,
        namespace: Option<String>,
    },
}

/// Turns parsed documents into reported state for one namespace.
struct DocumentReader<'a> {
    namespace: &'a str,
    sanitize: bool,
}

impl DocumentReader<'_> {
    fn name(&self, raw: String) -> String {
        if self.sanitize {
            sanitize_name(&raw, MAX_NAME_LEN)
        } else {
            raw
        }
    }

    fn namespace(&self, declared: Option<String>) -> String {
        declared.unwrap_or_else(|| self.namespace.to_string())
    }

    fn entity(&self, doc: EntityDoc) -> Result<Entity> {
        let namespace = self.namespace(doc.namespace);
        Ok(Entity::new(doc.kind, namespace, self.name(doc.name))?.with_properties(doc.properties))
    }

    fn endpoint(&self, doc: EndpointDoc) -> Result<Endpoint> {
        match doc {
            EndpointDoc::Selector {
                selector,
                kind,
                namespace,
            } => {
                let mut parsed =
                    FieldSelector::parse(&selector)?.with_namespace(self.namespace(namespace));
                if let Some(kind) = kind {
                    parsed = parsed.with_kind(kind);
                }
                Ok(Endpoint::Deferred(parsed))
            }
            EndpointDoc::Concrete {
                kind,
                name,
                namespace,
            } => Ok(Endpoint::Concrete(EntityKey::new(
                kind,
                self.namespace(namespace),
                self.name(name),
            )?)),
        }
    }

    fn relation(&self, doc: RelationDoc) -> Result<Relation> {
        Relation::new(
            doc.relation,
            self.namespace(doc.namespace),
            self.endpoint(doc.source)?,
            self.endpoint(doc.target)?,
        )
    }

    fn state(&self, doc: GraphDocument) -> Result<ReportedState> {
        let entities = doc
            .entities
            .into_iter()
            .map(|e| self.entity(e))
            .collect::<Result<Vec<_>>>()?;
        let relations = doc
            .relations
            .into_iter()
            .map(|r| self.relation(r))
            .collect::<Result<Vec<_>>>()?;
        Ok(ReportedState {
            entities,
            relations,
        })
    }
}

fn parse_document(path: &Path, raw: &str) -> Result<GraphDocument> {
    if raw.trim().is_empty() {
        return Ok(GraphDocument::default());
    }
    serde_yaml::from_str(raw)
        .map_err(|e| Error::yaml_parse_failed(format!("{}: {e}", path.display())))
}

// ============================================================================
// Provider
// ============================================================================

pub struct FileProvider {
    descriptor: ProviderDescriptor,
    options: FileProviderOptions,
}

impl FileProvider {
    pub fn new(options: FileProviderOptions) -> Self {
        Self {
            descriptor: descriptor(),
            options,
        }
    }

    /// Build from an instance config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the options do not match
    /// [`FileProviderOptions`].
    pub fn from_config(config: &ProviderInstanceConfig) -> Result<Self> {
        let options: FileProviderOptions = config.options_as()?;
        if options.paths.is_empty() {
            return Err(Error::config(format!(
                "instance '{}': paths must not be empty",
                config.name
            )));
        }
        info!(
            instance = %config.name,
            base_path = %options.base_path.display(),
            patterns = options.paths.len(),
            "File provider configured"
        );
        Ok(Self::new(options))
    }

    pub const fn options(&self) -> &FileProviderOptions {
        &self.options
    }

    /// Files matching any pattern, sorted and deduplicated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a malformed pattern and
    /// [`Error::FileReadFailed`] for an unreadable directory entry.
    pub fn matched_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for pattern in &self.options.paths {
            let full = self.options.base_path.join(pattern);
            let full = full.to_string_lossy();
            let entries = glob::glob(&full)
                .map_err(|e| Error::config(format!("invalid glob pattern '{full}': {e}")))?;
            for entry in entries {
                let path = entry
                    .map_err(|e| Error::file_read_failed(e.path(), e.error().to_string()))?;
                if path.is_file() {
                    files.push(path);
                }
            }
        }
        files.sort();
        files.dedup();
        Ok(files)
    }

    async fn load(&self, path: &Path, namespace: &str) -> Result<ReportedState> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
        let doc = parse_document(path, &raw)?;
        let state = self.reader(namespace).state(doc)?;
        debug!(
            path = %path.display(),
            entities = state.entities.len(),
            relations = state.relations.len(),
            "Document loaded"
        );
        Ok(state)
    }

    fn reader<'a>(&self, namespace: &'a str) -> DocumentReader<'a> {
        DocumentReader {
            namespace,
            sanitize: self.options.sanitize_names,
        }
    }
}

#[async_trait]
impl Discovery for FileProvider {
    async fn discover(&self, scope: &DiscoveryScope) -> Result<ReportedState> {
        let mut state = ReportedState::new();
        for path in self.matched_files()? {
            state.extend(self.load(&path, &scope.namespace).await?);
        }
        Ok(state)
    }
}

impl Incremental for FileProvider {
    fn discover_batches<'a>(
        &'a self,
        scope: &'a DiscoveryScope,
    ) -> BoxStream<'a, Result<ReportedState>> {
        match self.matched_files() {
            Ok(files) => {
                debug!(instance = %scope.instance, files = files.len(), "Streaming documents");
                stream::iter(files)
                    .then(move |path| async move { self.load(&path, &scope.namespace).await })
                    .boxed()
            }
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        }
    }
}

impl RelationProducing for FileProvider {
    fn relation_types(&self) -> Vec<RelationTypeDecl> {
        self.descriptor.relation_types.clone()
    }
}

impl Provider for FileProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    /// Declared types plus every kind the documents currently mention.
    /// Unreadable documents are skipped here; discovery reports them.
    fn entity_types(&self) -> Vec<EntityTypeDef> {
        let mut types: BTreeMap<String, EntityTypeDef> = self
            .options
            .types
            .iter()
            .map(|def| (def.kind.clone(), def.clone()))
            .collect();

        let files = self
            .matched_files()
            .into_option_logged("Failed to scan documents for entity types")
            .unwrap_or_default();
        for path in files {
            let doc = std::fs::read_to_string(&path)
                .map_err(|e| Error::file_read_failed(&path, e.to_string()))
                .and_then(|raw| parse_document(&path, &raw))
                .into_option_logged("Skipping document while collecting entity types");
            for entity in doc.into_iter().flat_map(|d| d.entities) {
                types
                    .entry(entity.kind.clone())
                    .or_insert_with(|| EntityTypeDef::new(entity.kind));
            }
        }
        types.into_values().collect()
    }

    fn discovery(&self) -> Option<&dyn Discovery> {
        Some(self)
    }

    fn relations(&self) -> Option<&dyn RelationProducing> {
        Some(self)
    }

    fn incremental(&self) -> Option<&dyn Incremental> {
        Some(self)
    }
}
