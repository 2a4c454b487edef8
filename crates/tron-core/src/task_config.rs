//! Task configuration handed to the cluster runner.

use crate::ids::TaskId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Placement constraint, e.g. `("pool", "LIKE", "default")`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub attribute: String,
    pub operator: String,
    pub value: String,
}

impl Constraint {
    /// Create a new constraint.
    pub fn new(
        attribute: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            attribute: attribute.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }
}

/// Extra `docker run` parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerParameter {
    pub key: String,
    pub value: String,
}

impl DockerParameter {
    /// Create a new docker parameter.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Volume access mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VolumeMode {
    #[default]
    Ro,
    Rw,
}

/// Host path mounted into the task container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub container_path: String,
    pub host_path: String,
    #[serde(default)]
    pub mode: VolumeMode,
}

impl Volume {
    /// Create a new volume.
    pub fn new(
        container_path: impl Into<String>,
        host_path: impl Into<String>,
        mode: VolumeMode,
    ) -> Self {
        Self {
            container_path: container_path.into(),
            host_path: host_path.into(),
            mode,
        }
    }
}

/// Caller supplied parameters for a task.
///
/// Identity, fetched URIs and the offer timeout are not part of this: they are
/// filled in by the coordinator when the configuration is built.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    pub command: String,
    pub cpus: f64,
    pub mem: f64,
    pub constraints: Vec<Constraint>,
    pub image: Option<String>,
    pub docker_parameters: Vec<DockerParameter>,
    pub environment: HashMap<String, String>,
    pub extra_volumes: Vec<Volume>,
}

impl TaskSpec {
    /// Create a spec for `command` with the given resources.
    pub fn new(command: impl Into<String>, cpus: f64, mem: f64) -> Self {
        Self {
            command: command.into(),
            cpus,
            mem,
            ..Self::default()
        }
    }

    /// Builder method to set the container image.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Builder method to add a constraint.
    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Builder method to add a docker parameter.
    pub fn with_docker_parameter(mut self, parameter: DockerParameter) -> Self {
        self.docker_parameters.push(parameter);
        self
    }

    /// Builder method to add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Builder method to add a volume.
    pub fn with_volume(mut self, volume: Volume) -> Self {
        self.extra_volumes.push(volume);
        self
    }
}

/// Fully built configuration for one task attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub task_id: TaskId,
    pub name: String,
    pub cmd: String,
    pub cpus: f64,
    pub mem: f64,
    pub constraints: Vec<Constraint>,
    pub image: Option<String>,
    pub docker_parameters: Vec<DockerParameter>,
    pub environment: HashMap<String, String>,
    pub volumes: Vec<Volume>,
    /// Resources fetched into the sandbox before launch.
    pub uris: Vec<String>,
    /// How long the cluster may wait for a matching offer.
    #[serde(with = "duration_secs")]
    pub offer_timeout: Duration,
}

impl TaskConfig {
    /// Build a configuration from a spec.
    pub fn from_spec(
        task_id: TaskId,
        name: impl Into<String>,
        spec: TaskSpec,
        uris: Vec<String>,
        offer_timeout: Duration,
    ) -> Self {
        Self {
            task_id,
            name: name.into(),
            cmd: spec.command,
            cpus: spec.cpus,
            mem: spec.mem,
            constraints: spec.constraints,
            image: spec.image,
            docker_parameters: spec.docker_parameters,
            environment: spec.environment,
            volumes: spec.extra_volumes,
            uris,
            offer_timeout,
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_spec_carries_every_field() {
        let spec = TaskSpec::new("echo hi", 1.0, 10.0)
            .with_image("container:latest")
            .with_env("TESTING", "true")
            .with_constraint(Constraint::new("pool", "LIKE", "default"))
            .with_docker_parameter(DockerParameter::new("label", "team=batch"))
            .with_volume(Volume::new("/nail/tmp", "/tmp", VolumeMode::Rw));

        let config = TaskConfig::from_spec(
            TaskId::new("action_c.1"),
            "action_c",
            spec,
            vec!["file:///root/.dockercfg".to_string()],
            Duration::from_secs(300),
        );

        assert_eq!(config.cmd, "echo hi");
        assert_eq!(config.image.as_deref(), Some("container:latest"));
        assert_eq!(config.environment.get("TESTING").map(String::as_str), Some("true"));
        assert_eq!(config.constraints.len(), 1);
        assert_eq!(config.docker_parameters[0].key, "label");
        assert_eq!(config.volumes[0].mode, VolumeMode::Rw);
        assert_eq!(config.uris, vec!["file:///root/.dockercfg".to_string()]);
    }

    #[test]
    fn test_offer_timeout_is_seconds_on_the_wire() {
        let config = TaskConfig::from_spec(
            TaskId::new("t"),
            "t",
            TaskSpec::new("true", 0.1, 16.0),
            Vec::new(),
            Duration::from_secs(300),
        );
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["offer_timeout"], 300.0);

        let back: TaskConfig = serde_json::from_value(value).unwrap();
        assert_eq!(back.offer_timeout, Duration::from_secs(300));
    }
}
