//! Coordinator configuration.
//!
//! Values come from environment variables, parsed once at startup. Missing
//! or malformed values are reported before any message is consumed.
//!
//! ```rust
//! use drainweave::config::CoordinatorConfig;
//! use drainweave::coordinator::Variant;
//!
//! let config = CoordinatorConfig::new(3, "/var/lib/coordinator/games.log")
//!   .with_variant(Variant::Plain)
//!   .with_game_tags(["game"]);
//! assert!(config.validate().is_ok());
//! ```

use crate::barrier::Resource;
use crate::coordinator::Variant;
use crate::transport::TcpTransportConfig;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::Level;

/// Error type for configuration loading.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
  /// A required variable is unset.
  #[error("missing required variable {0}")]
  Missing(&'static str),
  /// A variable is set to a value that cannot be used.
  #[error("invalid value {value:?} for {name}: {reason}")]
  Invalid {
    /// Variable name.
    name: &'static str,
    /// Offending value.
    value: String,
    /// What is wrong with it.
    reason: String,
  },
  /// The global tracing subscriber could not be installed.
  #[error("logging setup failed: {0}")]
  Logging(String),
}

impl ConfigError {
  fn invalid(name: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
    ConfigError::Invalid {
      name,
      value: value.into(),
      reason: reason.into(),
    }
  }
}

/// Routing tags an emitted END is written under, per resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTags {
  /// Tags for game ENDs.
  pub games: Vec<String>,
  /// Tags for review ENDs, both phases.
  pub reviews: Vec<String>,
}

impl Default for RoutingTags {
  fn default() -> Self {
    Self {
      games: vec!["game".to_string()],
      reviews: vec!["review".to_string()],
    }
  }
}

impl RoutingTags {
  /// Tags an END for `resource` must be written to.
  pub fn tags_for(&self, resource: Resource) -> &[String] {
    match resource {
      Resource::Games => &self.games,
      Resource::Reviews | Resource::FinalReviews => &self.reviews,
    }
  }

  fn all(&self) -> impl Iterator<Item = &String> {
    self.games.iter().chain(self.reviews.iter())
  }
}

/// Settings for one [`CoordinatorController`](crate::coordinator::CoordinatorController).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
  /// Upstream replica count; node ids `1..=expected_nodes` must all report.
  pub expected_nodes: u32,
  /// Transaction log file.
  pub log_path: PathBuf,
  /// Plain or joiner coordinator.
  pub variant: Variant,
  /// Node id stamped on emitted ENDs.
  pub node_id: u32,
  /// Where emitted ENDs go.
  pub routes: RoutingTags,
  /// Wait between detecting a drained barrier and emitting its END.
  pub grace_delay: Duration,
  /// Drop superseded snapshots before each commit.
  pub compaction: bool,
}

impl Default for CoordinatorConfig {
  fn default() -> Self {
    Self {
      expected_nodes: 1,
      log_path: PathBuf::from("coordinator.log"),
      variant: Variant::Plain,
      node_id: 1,
      routes: RoutingTags::default(),
      grace_delay: Duration::ZERO,
      compaction: false,
    }
  }
}

impl CoordinatorConfig {
  /// Creates a configuration with the two required settings.
  pub fn new(expected_nodes: u32, log_path: impl Into<PathBuf>) -> Self {
    Self {
      expected_nodes,
      log_path: log_path.into(),
      ..Self::default()
    }
  }

  /// Sets the coordinator variant.
  #[must_use]
  pub fn with_variant(mut self, variant: Variant) -> Self {
    self.variant = variant;
    self
  }

  /// Sets the node id of emitted ENDs.
  #[must_use]
  pub fn with_node_id(mut self, node_id: u32) -> Self {
    self.node_id = node_id;
    self
  }

  /// Replaces the game routing tags.
  #[must_use]
  pub fn with_game_tags<I, S>(mut self, tags: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.routes.games = tags.into_iter().map(Into::into).collect();
    self
  }

  /// Replaces the review routing tags.
  #[must_use]
  pub fn with_review_tags<I, S>(mut self, tags: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.routes.reviews = tags.into_iter().map(Into::into).collect();
    self
  }

  /// Sets the grace delay.
  #[must_use]
  pub fn with_grace_delay(mut self, delay: Duration) -> Self {
    self.grace_delay = delay;
    self
  }

  /// Enables snapshot compaction.
  #[must_use]
  pub fn with_compaction(mut self, compaction: bool) -> Self {
    self.compaction = compaction;
    self
  }

  /// Checks the settings are usable.
  ///
  /// # Errors
  ///
  /// Returns [`ConfigError::Invalid`] for a zero node count or an empty tag
  /// list.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.expected_nodes == 0 {
      return Err(ConfigError::invalid(
        "EXPECTED_NODES",
        "0",
        "at least one upstream node is required",
      ));
    }
    if self.routes.games.is_empty() {
      return Err(ConfigError::invalid("GAME_TAGS", "", "no routing tag"));
    }
    if self.routes.reviews.is_empty() {
      return Err(ConfigError::invalid("REVIEW_TAGS", "", "no routing tag"));
    }
    Ok(())
  }

  /// Loads the configuration from the process environment.
  ///
  /// # Errors
  ///
  /// Returns a [`ConfigError`] if a required variable is missing or any
  /// variable is malformed.
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_lookup(|name| std::env::var(name).ok())
  }

  /// Loads the configuration through `lookup`, which maps a variable name
  /// to its value.
  ///
  /// # Errors
  ///
  /// See [`CoordinatorConfig::from_env`].
  pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let expected_nodes = lookup("EXPECTED_NODES").ok_or(ConfigError::Missing("EXPECTED_NODES"))?;
    let expected_nodes = parse_number::<u32>("EXPECTED_NODES", &expected_nodes)?;
    let log_path = lookup("TRANSACTION_LOG_FILE")
      .filter(|v| !v.trim().is_empty())
      .ok_or(ConfigError::Missing("TRANSACTION_LOG_FILE"))?;

    let mut config = Self::new(expected_nodes, log_path.trim());

    if let Some(raw) = lookup("COORDINATOR_VARIANT") {
      config.variant = match raw.trim().to_ascii_lowercase().as_str() {
        "plain" => Variant::Plain,
        "joiner" => Variant::Joiner,
        _ => {
          return Err(ConfigError::invalid(
            "COORDINATOR_VARIANT",
            raw,
            "expected plain or joiner",
          ));
        }
      };
    }
    if let Some(raw) = lookup("NODE_ID") {
      config.node_id = parse_number("NODE_ID", &raw)?;
    }

    if let Some(raw) = lookup("PROPAGATE_TAGS") {
      let tags = parse_list(&raw);
      config.routes.games = tags.clone();
      config.routes.reviews = tags;
    }
    if let Some(raw) = lookup("GAME_TAGS") {
      config.routes.games = parse_list(&raw);
    }
    if let Some(raw) = lookup("REVIEW_TAGS") {
      config.routes.reviews = parse_list(&raw);
    }

    if let Some(raw) = lookup("GRACE_DELAY_MS") {
      config.grace_delay = Duration::from_millis(parse_number("GRACE_DELAY_MS", &raw)?);
    }
    if let Some(raw) = lookup("LOG_COMPACTION") {
      config.compaction = parse_bool("LOG_COMPACTION", &raw)?;
    }

    config.validate()?;
    Ok(config)
  }
}

/// Everything the `coordinator` binary needs.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
  /// Barrier settings.
  pub coordinator: CoordinatorConfig,
  /// Listen address and outbound routes.
  pub tcp: TcpTransportConfig,
  /// Maximum log level.
  pub log_level: Level,
}

impl ProcessConfig {
  /// Loads the process configuration from the environment.
  ///
  /// # Errors
  ///
  /// Returns a [`ConfigError`] on any missing or malformed variable, or if a
  /// routing tag has no matching `OUTPUT_ROUTES` entry.
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_lookup(|name| std::env::var(name).ok())
  }

  /// Loads the process configuration through `lookup`.
  ///
  /// # Errors
  ///
  /// See [`ProcessConfig::from_env`].
  pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
  where
    F: Fn(&str) -> Option<String>,
  {
    let log_level = match lookup("LOGGER_LEVEL") {
      Some(raw) => crate::logging::parse_level(&raw)?,
      None => Level::INFO,
    };
    let coordinator = CoordinatorConfig::from_lookup(&lookup)?;

    let mut tcp = TcpTransportConfig::default();
    if let Some(raw) = lookup("BIND_ADDRESS") {
      tcp.bind_address = raw.trim().to_string();
    }
    if let Some(raw) = lookup("OUTPUT_ROUTES") {
      tcp.routes = parse_routes(&raw)?;
    }

    for tag in coordinator.routes.all() {
      if !tcp.routes.contains_key(tag) {
        return Err(ConfigError::invalid(
          "OUTPUT_ROUTES",
          lookup("OUTPUT_ROUTES").unwrap_or_default(),
          format!("no route for tag {tag:?}"),
        ));
      }
    }

    Ok(Self {
      coordinator,
      tcp,
      log_level,
    })
  }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
  T::Err: std::fmt::Display,
{
  raw
    .trim()
    .parse()
    .map_err(|e: T::Err| ConfigError::invalid(name, raw, e.to_string()))
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
  match raw.trim().to_ascii_lowercase().as_str() {
    "1" | "true" | "yes" | "on" => Ok(true),
    "0" | "false" | "no" | "off" | "" => Ok(false),
    _ => Err(ConfigError::invalid(name, raw, "expected a boolean")),
  }
}

fn parse_list(raw: &str) -> Vec<String> {
  raw
    .split(',')
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_string)
    .collect()
}

fn parse_routes(raw: &str) -> Result<HashMap<String, String>, ConfigError> {
  let mut routes = HashMap::new();
  for entry in parse_list(raw) {
    let Some((tag, address)) = entry.split_once('=') else {
      return Err(ConfigError::invalid("OUTPUT_ROUTES", raw, "expected tag=host:port"));
    };
    let (tag, address) = (tag.trim(), address.trim());
    if tag.is_empty() || address.is_empty() {
      return Err(ConfigError::invalid("OUTPUT_ROUTES", raw, "expected tag=host:port"));
    }
    routes.insert(tag.to_string(), address.to_string());
  }
  Ok(routes)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    move |name: &str| map.get(name).cloned()
  }

  #[test]
  fn test_required_variables() {
    let err = CoordinatorConfig::from_lookup(lookup_from(&[])).unwrap_err();
    assert_eq!(err, ConfigError::Missing("EXPECTED_NODES"));

    let err = CoordinatorConfig::from_lookup(lookup_from(&[("EXPECTED_NODES", "3")])).unwrap_err();
    assert_eq!(err, ConfigError::Missing("TRANSACTION_LOG_FILE"));
  }

  #[test]
  fn test_defaults() {
    let config = CoordinatorConfig::from_lookup(lookup_from(&[
      ("EXPECTED_NODES", "3"),
      ("TRANSACTION_LOG_FILE", "/tmp/games.log"),
    ]))
    .unwrap();

    assert_eq!(config.expected_nodes, 3);
    assert_eq!(config.log_path, PathBuf::from("/tmp/games.log"));
    assert_eq!(config.variant, Variant::Plain);
    assert_eq!(config.node_id, 1);
    assert_eq!(config.routes, RoutingTags::default());
    assert_eq!(config.grace_delay, Duration::ZERO);
    assert!(!config.compaction);
  }

  #[test]
  fn test_overrides() {
    let config = CoordinatorConfig::from_lookup(lookup_from(&[
      ("EXPECTED_NODES", " 5 "),
      ("TRANSACTION_LOG_FILE", "joiner.log"),
      ("COORDINATOR_VARIANT", "Joiner"),
      ("NODE_ID", "4"),
      ("PROPAGATE_TAGS", "a, b"),
      ("REVIEW_TAGS", "review_final"),
      ("GRACE_DELAY_MS", "250"),
      ("LOG_COMPACTION", "true"),
    ]))
    .unwrap();

    assert_eq!(config.expected_nodes, 5);
    assert_eq!(config.variant, Variant::Joiner);
    assert_eq!(config.node_id, 4);
    assert_eq!(config.routes.tags_for(Resource::Games), ["a", "b"]);
    assert_eq!(config.routes.tags_for(Resource::FinalReviews), ["review_final"]);
    assert_eq!(config.grace_delay, Duration::from_millis(250));
    assert!(config.compaction);
  }

  #[test]
  fn test_invalid_values() {
    let base = [("EXPECTED_NODES", "3"), ("TRANSACTION_LOG_FILE", "x.log")];

    for (name, value) in [
      ("EXPECTED_NODES", "three"),
      ("EXPECTED_NODES", "0"),
      ("COORDINATOR_VARIANT", "counter"),
      ("GRACE_DELAY_MS", "-1"),
      ("LOG_COMPACTION", "maybe"),
      ("GAME_TAGS", " , "),
    ] {
      let mut pairs = base.to_vec();
      pairs.retain(|(k, _)| *k != name);
      pairs.push((name, value));
      assert!(
        matches!(
          CoordinatorConfig::from_lookup(lookup_from(&pairs)),
          Err(ConfigError::Invalid { .. })
        ),
        "{name}={value} should be rejected"
      );
    }
  }

  #[test]
  fn test_process_config_requires_routes_for_tags() {
    let base = [
      ("EXPECTED_NODES", "2"),
      ("TRANSACTION_LOG_FILE", "x.log"),
      ("LOGGER_LEVEL", "debug"),
      ("BIND_ADDRESS", "127.0.0.1:9100"),
    ];

    let mut pairs = base.to_vec();
    pairs.push(("OUTPUT_ROUTES", "game=127.0.0.1:9200"));
    assert!(matches!(
      ProcessConfig::from_lookup(lookup_from(&pairs)),
      Err(ConfigError::Invalid { name: "OUTPUT_ROUTES", .. })
    ));

    let mut pairs = base.to_vec();
    pairs.push(("OUTPUT_ROUTES", "game=127.0.0.1:9200, review=127.0.0.1:9201"));
    let config = ProcessConfig::from_lookup(lookup_from(&pairs)).unwrap();
    assert_eq!(config.log_level, Level::DEBUG);
    assert_eq!(config.tcp.bind_address, "127.0.0.1:9100");
    assert_eq!(config.tcp.routes["review"], "127.0.0.1:9201");
  }

  #[test]
  fn test_malformed_routes() {
    assert!(parse_routes("game").is_err());
    assert!(parse_routes("=127.0.0.1:1").is_err());
    assert!(parse_routes("").unwrap().is_empty());
  }

  #[test]
  fn test_builder_and_validate() {
    let config = CoordinatorConfig::new(2, "x.log")
      .with_node_id(9)
      .with_grace_delay(Duration::from_millis(10))
      .with_compaction(true);
    assert!(config.validate().is_ok());

    assert!(CoordinatorConfig::new(0, "x.log").validate().is_err());
    assert!(
      CoordinatorConfig::new(1, "x.log")
        .with_review_tags(Vec::<String>::new())
        .validate()
        .is_err()
    );
  }
}
