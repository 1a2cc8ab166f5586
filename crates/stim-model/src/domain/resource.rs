use serde::{Deserialize, Serialize};

/// Download state of a declared resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceStatus {
    /// Declared but not yet requested.
    Registered,
    /// Request in flight.
    Downloading,
    /// Payload available.
    Downloaded,
    /// Download failed; the resource is unavailable for the rest of the run.
    Error,
}

impl ResourceStatus {
    /// Returns `true` once the download reached an outcome (success or failure).
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResourceStatus::Downloaded | ResourceStatus::Error)
    }

    /// Returns `true` while the download has not reached an outcome yet.
    pub fn is_pending(&self) -> bool {
        !self.is_terminal()
    }
}

/// Declaration of a resource, as found in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub name: String,
    pub path: String,
}

impl ResourceSpec {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Current state of a declared resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    pub name: String,
    pub path: String,
    pub status: ResourceStatus,
    /// Failure reason when `status` is `Error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResourceRecord {
    /// Create a freshly registered record.
    pub fn registered(spec: &ResourceSpec) -> Self {
        Self {
            name: spec.name.clone(),
            path: spec.path.clone(),
            status: ResourceStatus::Registered,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(ResourceStatus::Downloaded.is_terminal());
        assert!(ResourceStatus::Error.is_terminal());

        assert!(ResourceStatus::Registered.is_pending());
        assert!(ResourceStatus::Downloading.is_pending());
    }

    #[test]
    fn manifest_entry_deserializes() {
        let spec: ResourceSpec =
            serde_json::from_str(r#"{"name":"face.png","path":"stimuli/face.png"}"#).unwrap();
        assert_eq!(spec, ResourceSpec::new("face.png", "stimuli/face.png"));

        let record = ResourceRecord::registered(&spec);
        assert_eq!(record.status, ResourceStatus::Registered);
        assert!(record.error.is_none());
    }
}
