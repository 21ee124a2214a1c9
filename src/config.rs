//! Link configuration
//!
//! A `LinkConfig` deserializes from TOML and opens a connection. The link
//! is named either by a `url` string or by an explicit `[endpoint]` table;
//! exactly one of the two must be present. `system_id`/`component_id`
//! default to the crate defaults and lose to a `?ids=` query in the URL.

use crate::connection::Connection;
use crate::constants::{DEFAULT_COMPONENT_ID, DEFAULT_SYSTEM_ID};
use crate::error::{LinkError, Result};
use crate::transport::Endpoint;
use crate::url;
use serde::{Deserialize, Serialize};

/// Declarative description of one link
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Link URL; mutually exclusive with `endpoint`
    pub url: Option<String>,
    /// Explicit endpoint table; mutually exclusive with `url`
    pub endpoint: Option<Endpoint>,
    /// System id for outgoing frames (a `?ids=` in `url` wins)
    pub system_id: u8,
    /// Component id for outgoing frames (a `?ids=` in `url` wins)
    pub component_id: u8,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            url: None,
            endpoint: None,
            system_id: DEFAULT_SYSTEM_ID,
            component_id: DEFAULT_COMPONENT_ID,
        }
    }
}

impl LinkConfig {
    /// Parse a config from TOML text
    ///
    /// Parsing accepts an under-specified config; [`LinkConfig::validate`]
    /// or [`LinkConfig::open`] reject it.
    pub fn from_toml_str(text: &str) -> Result<LinkConfig> {
        toml::from_str(text).map_err(|e| LinkError::ConfigParse {
            reason: e.to_string(),
        })
    }

    /// Check that the config names exactly one link
    pub fn validate(&self) -> Result<()> {
        match (&self.url, &self.endpoint) {
            (Some(_), Some(_)) => Err(LinkError::ConfigValidation {
                field: "url",
                reason: "provide either a url or an endpoint, not both".to_string(),
            }),
            (None, None) => Err(LinkError::ConfigValidation {
                field: "url",
                reason: "one of url or endpoint is required".to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Open the connection this config describes
    pub fn open(&self) -> Result<Connection> {
        self.validate()?;

        if let Some(url) = &self.url {
            let parsed = url::parse_url(url)?;
            let (system_id, component_id) =
                parsed.ids.unwrap_or((self.system_id, self.component_id));
            return Connection::open(&parsed.endpoint, system_id, component_id);
        }

        match &self.endpoint {
            Some(endpoint) => Connection::open(endpoint, self.system_id, self.component_id),
            // validate() already rejected this shape.
            None => Err(LinkError::ConfigValidation {
                field: "url",
                reason: "one of url or endpoint is required".to_string(),
            }),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
