use serde::{Deserialize, Serialize};

/// Connection string understood by the external database tools. Treated as
/// opaque by the engine; any embedded credentials follow the tools' own
/// conventions.
#[derive(Debug, Default, PartialEq, Eq, Hash, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locator(pub String);

#[derive(Debug, Default, PartialEq, Eq, Hash, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatabaseName(pub String);

impl std::fmt::Display for DatabaseName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One side of a migration: where to connect, and which logical database.
#[derive(Debug, Default, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub locator: Locator,
    pub database: DatabaseName,
}

impl Endpoint {
    pub fn new(locator: impl Into<String>, database: impl Into<String>) -> Self {
        Endpoint {
            locator: Locator(locator.into()),
            database: DatabaseName(database.into()),
        }
    }
}
