//! Executable discovery and launch parameters

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;

use chatbridge_protocol::Role;

use crate::config::{BinariesConfig, Layout};

/// Everything needed to spawn one role's executable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Executable to run
    pub program: PathBuf,
    /// Arguments placed before the caller's arguments
    pub leading_args: Vec<String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Environment variables to set
    pub env: HashMap<String, String>,
}

impl LaunchSpec {
    /// Create a spec for a specific program
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
        }
    }

    /// Set working directory
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add an argument ahead of the caller's arguments
    pub fn with_leading_arg(mut self, arg: impl Into<String>) -> Self {
        self.leading_args.push(arg.into());
        self
    }

    /// Full argument list: leading args, then `args`
    pub fn arguments(&self, args: &[String]) -> Vec<String> {
        self.leading_args
            .iter()
            .chain(args.iter())
            .cloned()
            .collect()
    }
}

/// Answer from a [`BinaryLocator`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locate {
    Ready(LaunchSpec),
    /// The data needed to resolve the path is not available yet; ask again later
    Pending,
}

/// Resolves where a role's executable lives
///
/// Called from the launch task and may be re-polled while it answers
/// [`Locate::Pending`], so implementations must be cheap and non-blocking.
pub trait BinaryLocator: Send + Sync {
    fn locate(&self, role: Role) -> Locate;
}

/// Locator for the dev and packaged directory layouts
///
/// - dev: `<dev_root>/bin/<name><EXE_SUFFIX>`
/// - packaged: `<$resources_env>/app/bin/<name><EXE_SUFFIX>`
///
/// The bin directory doubles as the working directory.
#[derive(Debug, Clone)]
pub struct LayoutLocator {
    layout: Layout,
    dev_root: PathBuf,
    resources_env: String,
    server_name: String,
    client_name: String,
    env: HashMap<String, String>,
}

impl LayoutLocator {
    pub fn from_config(config: &BinariesConfig) -> Self {
        Self {
            layout: config.layout.resolve(),
            dev_root: config.dev_root.clone(),
            resources_env: config.resources_env.clone(),
            server_name: config.server_name.clone(),
            client_name: config.client_name.clone(),
            env: config.env.clone(),
        }
    }

    /// Override the configured layout
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout.resolve();
        self
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    fn bin_dir(&self) -> Option<PathBuf> {
        match self.layout {
            Layout::Packaged => std::env::var_os(&self.resources_env)
                .filter(|dir| !dir.is_empty())
                .map(packaged_bin_dir),
            Layout::Dev | Layout::Auto => Some(self.dev_root.join("bin")),
        }
    }

    fn executable_name(&self, role: Role) -> String {
        let name = match role {
            Role::Server => &self.server_name,
            Role::Client => &self.client_name,
        };
        format!("{}{}", name, std::env::consts::EXE_SUFFIX)
    }
}

fn packaged_bin_dir(resources: OsString) -> PathBuf {
    PathBuf::from(resources).join("app").join("bin")
}

impl BinaryLocator for LayoutLocator {
    fn locate(&self, role: Role) -> Locate {
        let Some(bin_dir) = self.bin_dir() else {
            return Locate::Pending;
        };

        let mut spec = LaunchSpec::new(bin_dir.join(self.executable_name(role))).with_cwd(bin_dir);
        for (key, value) in &self.env {
            spec = spec.with_env(key, value);
        }
        Locate::Ready(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn dev_config(root: &str) -> BinariesConfig {
        BinariesConfig {
            layout: Layout::Dev,
            dev_root: PathBuf::from(root),
            ..Default::default()
        }
    }

    #[test]
    fn test_launch_spec_builder() {
        let spec = LaunchSpec::new("/bin/sh")
            .with_cwd("/tmp")
            .with_env("FOO", "bar")
            .with_leading_arg("-c")
            .with_leading_arg("echo hi");

        assert_eq!(spec.program, PathBuf::from("/bin/sh"));
        assert_eq!(spec.cwd, Some(PathBuf::from("/tmp")));
        assert_eq!(spec.env.get("FOO"), Some(&"bar".to_string()));
        assert_eq!(
            spec.arguments(&["a".to_string(), "b".to_string()]),
            vec!["-c", "echo hi", "a", "b"]
        );
    }

    #[test]
    fn test_dev_layout_paths() {
        let locator = LayoutLocator::from_config(&dev_config("/work/chat"));
        let Locate::Ready(spec) = locator.locate(Role::Server) else {
            panic!("dev layout should always be ready");
        };

        let expected = format!("server{}", std::env::consts::EXE_SUFFIX);
        assert_eq!(spec.program, Path::new("/work/chat/bin").join(expected));
        assert_eq!(spec.cwd, Some(PathBuf::from("/work/chat/bin")));
        assert_eq!(spec.env.get("LANG").map(String::as_str), Some("ru_RU.UTF-8"));
        assert!(spec.leading_args.is_empty());
    }

    #[test]
    fn test_dev_layout_client_name() {
        let mut config = dev_config("/w");
        config.client_name = "chat-client".into();
        let locator = LayoutLocator::from_config(&config);

        let Locate::Ready(spec) = locator.locate(Role::Client) else {
            panic!("dev layout should always be ready");
        };
        assert!(spec
            .program
            .to_string_lossy()
            .contains("chat-client"));
    }

    #[test]
    fn test_packaged_layout_pending_without_resources() {
        let config = BinariesConfig {
            layout: Layout::Packaged,
            resources_env: "CHATBRIDGE_TEST_RESOURCES_UNSET".into(),
            ..Default::default()
        };
        let locator = LayoutLocator::from_config(&config);
        assert_eq!(locator.locate(Role::Client), Locate::Pending);
    }

    #[test]
    fn test_packaged_layout_uses_resources_dir() {
        let var = "CHATBRIDGE_TEST_RESOURCES_SET";
        std::env::set_var(var, "/opt/chat/resources");

        let config = BinariesConfig {
            layout: Layout::Packaged,
            resources_env: var.into(),
            ..Default::default()
        };
        let locator = LayoutLocator::from_config(&config);
        let Locate::Ready(spec) = locator.locate(Role::Client) else {
            panic!("resources dir is set");
        };
        assert_eq!(
            spec.cwd,
            Some(PathBuf::from("/opt/chat/resources/app/bin"))
        );

        std::env::remove_var(var);
    }

    #[test]
    fn test_with_layout_override() {
        let locator = LayoutLocator::from_config(&BinariesConfig::default())
            .with_layout(Layout::Dev);
        assert_eq!(locator.layout(), Layout::Dev);
    }
}
