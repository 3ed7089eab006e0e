use serde::{Deserialize, Serialize};

/// Per-factory settings applied to every session it builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Label attached to the session's tracing span.
    pub name: String,
    /// Methods of an [`Exposed`](crate::Exposed) object whose names start
    /// with this token are callable by the peer, under the rest of the name.
    pub method_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "peer".to_owned(),
            method_prefix: "do_".to_owned(),
        }
    }
}

impl Config {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn method_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.method_prefix = prefix.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: Config = serde_json::from_str(r#"{"name":"docker"}"#).unwrap();
        assert_eq!(config.name, "docker");
        assert_eq!(config.method_prefix, "do_");
    }

    #[test]
    fn builder_overrides_prefix() {
        let config = Config::named("gateway").method_prefix("rpc_");
        assert_eq!(config.method_prefix, "rpc_");
        assert_eq!(config, Config { name: "gateway".into(), method_prefix: "rpc_".into() });
    }
}
