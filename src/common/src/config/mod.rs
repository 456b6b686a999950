use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::policy::Aggregation;

/// Where collections are loaded from
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding one `<collection>.json`, `.ndjson` or `.parquet` file per collection
    pub data_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: ".data/collections".to_string(),
        }
    }
}

/// Which collections are exposed and how their documents map onto series
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeriesConfig {
    /// Exposed collection names, as a list or a comma-separated string
    #[serde(deserialize_with = "deserialize_collections")]
    pub collections: Vec<String>,
    pub date_field: String,
    /// SQL expression evaluated per document; overrides `date_field`
    pub date_expression: Option<String>,
    /// SQL predicate conjoined with the time range filter
    pub filter_expression: Option<String>,
    pub value_field: String,
    /// SQL expression evaluated per document; overrides `value_field`
    pub value_expression: Option<String>,
    #[serde(default)]
    pub aggregation: Aggregation,
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            collections: Vec::new(),
            date_field: "date".to_string(),
            date_expression: None,
            filter_expression: None,
            value_field: "value".to_string(),
            value_expression: None,
            aggregation: Aggregation::None,
        }
    }
}

impl SeriesConfig {
    pub fn date_override(&self) -> Option<&str> {
        non_blank(&self.date_expression)
    }

    pub fn value_override(&self) -> Option<&str> {
        non_blank(&self.value_expression)
    }

    pub fn filter_override(&self) -> Option<&str> {
        non_blank(&self.filter_expression)
    }
}

// Blank expressions count as unset.
fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Basic-auth credentials clients must present
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    /// When unset only the username is checked
    pub password: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: None,
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    pub store: StoreConfig,
    pub series: SeriesConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid service configuration. No collections are exposed")]
    NoCollections,
    #[error("Invalid service configuration. {0} must not be empty")]
    Empty(&'static str),
    #[error("Invalid service configuration. Unknown collection: {0}")]
    UnknownCollection(String),
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file("docseries.toml"))
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(path))
    }

    fn figment(file: figment::providers::Data<Toml>) -> Result<Self, Box<figment::Error>> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(file)
            .merge(Env::prefixed("DOCSERIES__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    /// Checks that don't need the store. Collection existence is checked
    /// once the store is open.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.series.collections.is_empty() {
            return Err(ConfigError::NoCollections);
        }
        if self.series.date_override().is_none() && self.series.date_field.trim().is_empty() {
            return Err(ConfigError::Empty("series.date_field"));
        }
        if self.series.value_override().is_none() && self.series.value_field.trim().is_empty() {
            return Err(ConfigError::Empty("series.value_field"));
        }
        if self.auth.username.is_empty() {
            return Err(ConfigError::Empty("auth.username"));
        }
        Ok(())
    }

    pub fn is_exposed(&self, collection: &str) -> bool {
        self.series.collections.iter().any(|c| c == collection)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CollectionList {
    Csv(String),
    List(Vec<String>),
}

fn deserialize_collections<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = match CollectionList::deserialize(deserializer)? {
        CollectionList::Csv(csv) => csv.split(',').map(str::to_string).collect::<Vec<_>>(),
        CollectionList::List(list) => list,
    };

    let mut collections: Vec<String> = Vec::with_capacity(entries.len());
    for entry in entries {
        let name = entry.trim();
        if !name.is_empty() && !collections.iter().any(|c| c == name) {
            collections.push(name.to_string());
        }
    }
    Ok(collections)
}
