//! Configuration for the orchestrator and the handlers it manages.

use std::collections::HashMap;
use std::path::PathBuf;

use serde_derive::{Deserialize, Serialize};

use crate::entry_point::Runtime;

/// One entry in `lambdaHandlers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LambdaHandlerConfig {
    /// Relative to `appPath`.
    pub src_path: String,
    /// `dir/file.symbol` for node/python, `dir/file.go` or a directory for go.
    pub handler: String,
    pub runtime: Runtime,
    pub bundle: Option<BundleConfig>,
}

impl serde::Serialize for Runtime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let s = match self {
            Runtime::Node => "node",
            Runtime::Go => "go",
            Runtime::Python => "python",
        };
        serializer.serialize_str(s)
    }
}

impl<'de> serde::Deserialize<'de> for Runtime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "node" => Ok(Runtime::Node),
            "go" => Ok(Runtime::Go),
            "python" => Ok(Runtime::Python),
            other => Err(serde::de::Error::custom(format!("unknown runtime: {}", other))),
        }
    }
}

/// Host-supplied bundler options for a node-like handler. Opaque to the
/// core beyond being handed back to the `Bundler` trait.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BundleConfig {
    pub external_modules: Vec<String>,
    pub node_modules: Vec<String>,
    pub minify: bool,
}

/// Per-stack content hash, produced by the synth step.
pub type ChecksumData = HashMap<String, String>;

/// Plain, serializable configuration. Host callbacks
/// (`onReSynthApp`, `onReDeployApp`) are not serializable and live
/// separately in [`crate::orchestrator::HostCallbacks`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub app_path: PathBuf,
    pub lambda_handlers: Vec<LambdaHandlerConfig>,
    pub cdk_input_files: Vec<PathBuf>,
    #[serde(default)]
    pub cdk_checksum_data: ChecksumData,
    pub is_lint_enabled: bool,
    pub is_type_check_enabled: bool,
}

impl OrchestratorConfig {
    pub fn new(app_path: PathBuf, lambda_handlers: Vec<LambdaHandlerConfig>) -> Self {
        OrchestratorConfig {
            app_path,
            lambda_handlers,
            cdk_input_files: Vec::new(),
            cdk_checksum_data: HashMap::new(),
            is_lint_enabled: true,
            is_type_check_enabled: true,
        }
    }
}
