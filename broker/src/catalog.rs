//! Static table of integrations the broker knows how to spawn.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{
    AvailableServer, BrokerError, EnvironmentReport, MissingServer, Result, VirtualTool,
};

/// How to start the worker for one integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerDescriptor {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variable names the worker needs. Values are taken from the
    /// broker's environment at spawn time.
    #[serde(default)]
    pub credentials: Vec<String>,
    /// Advertised tool count, diagnostics only.
    #[serde(default)]
    pub tool_count: usize,
    #[serde(default)]
    pub categories: Vec<String>,
}

impl WorkerDescriptor {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            credentials: Vec::new(),
            tool_count: 0,
            categories: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_credentials<I, S>(mut self, credentials: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.credentials = credentials.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tools<I, S>(mut self, tool_count: usize, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tool_count = tool_count;
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    /// Credential variables that are unset or empty according to `lookup`.
    pub fn missing_credentials<F>(&self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.credentials
            .iter()
            .filter(|var| lookup(var.as_str()).is_none_or(|v| v.is_empty()))
            .cloned()
            .collect()
    }
}

/// Read-only catalog of worker descriptors, keyed by integration name.
#[derive(Debug, Clone, Default)]
pub struct WorkerCatalog {
    entries: BTreeMap<String, WorkerDescriptor>,
}

impl WorkerCatalog {
    /// Build a catalog, rejecting duplicate names.
    pub fn new(descriptors: impl IntoIterator<Item = WorkerDescriptor>) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for descriptor in descriptors {
            if descriptor.name.is_empty() {
                return Err(BrokerError::Config("worker name must not be empty".to_string()));
            }
            if descriptor.command.is_empty() {
                return Err(BrokerError::Config(format!(
                    "worker '{}' has no command",
                    descriptor.name
                )));
            }
            let name = descriptor.name.clone();
            if entries.insert(name.clone(), descriptor).is_some() {
                return Err(BrokerError::Config(format!("duplicate worker '{}'", name)));
            }
        }
        Ok(Self { entries })
    }

    /// Parse a JSON array of descriptors.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let descriptors: Vec<WorkerDescriptor> = serde_json::from_str(json)?;
        Self::new(descriptors)
    }

    /// Load a JSON catalog file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    /// The integrations shipped with the toolkit.
    pub fn builtin() -> Self {
        let npx = |name: &str| WorkerDescriptor::new(name, "npx").with_args([name]);

        let descriptors = vec![
            npx("github-mcp").with_credentials(["GITHUB_TOKEN"]).with_tools(
                199,
                ["repositories", "branches", "commits", "issues", "pull-requests", "workflows", "releases"],
            ),
            npx("vercel-mcp")
                .with_credentials(["VERCEL_TOKEN"])
                .with_tools(150, ["projects", "deployments", "domains", "env-vars", "logs", "analytics"]),
            npx("neon-mcp")
                .with_credentials(["NEON_API_KEY"])
                .with_tools(145, ["projects", "branches", "sql", "databases", "roles", "endpoints"]),
            npx("playwright-mcp").with_tools(42, ["browser", "navigation", "screenshots", "testing"]),
            npx("stripe-mcp")
                .with_credentials(["STRIPE_SECRET_KEY"])
                .with_tools(105, ["customers", "subscriptions", "payments", "products", "invoices"]),
            npx("supabase-mcp")
                .with_credentials(["SUPABASE_URL", "SUPABASE_ANON_KEY"])
                .with_tools(80, ["auth", "database", "storage", "realtime", "functions"]),
            npx("twilio-mcp")
                .with_credentials(["TWILIO_ACCOUNT_SID", "TWILIO_AUTH_TOKEN"])
                .with_tools(60, ["sms", "voice", "messaging", "phone-numbers"]),
            npx("resend-mcp").with_credentials(["RESEND_API_KEY"]).with_tools(15, ["email"]),
            npx("cloudflare-mcp")
                .with_credentials(["CLOUDFLARE_API_TOKEN"])
                .with_tools(78, ["dns", "workers", "kv", "r2", "pages"]),
            npx("openai-mcp")
                .with_credentials(["OPENAI_API_KEY"])
                .with_tools(40, ["chat", "completions", "embeddings", "models"]),
            npx("redis-mcp")
                .with_credentials(["REDIS_URL"])
                .with_tools(80, ["cache", "strings", "hashes", "lists", "sets", "sorted-sets"]),
            npx("google-workspace-mcp")
                .with_credentials(["GOOGLE_SERVICE_ACCOUNT_KEY", "GOOGLE_USER_EMAIL"])
                .with_tools(120, ["gmail", "calendar", "drive", "sheets", "docs"]),
            npx("fly-mcp")
                .with_credentials(["FLY_API_TOKEN"])
                .with_tools(83, ["apps", "deployments", "secrets", "volumes", "machines"]),
        ];

        let entries = descriptors
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();
        Self { entries }
    }

    /// Find the descriptor for `name`.
    pub fn lookup(&self, name: &str) -> Result<&WorkerDescriptor> {
        self.entries
            .get(name)
            .ok_or_else(|| BrokerError::UnknownServer {
                name: name.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Integration names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &WorkerDescriptor> {
        self.entries.values()
    }

    /// Credential readiness against the process environment.
    pub fn diagnose(&self) -> EnvironmentReport {
        self.diagnose_with(|key| std::env::var(key).ok())
    }

    /// Credential readiness against an explicit lookup. Never spawns anything.
    pub fn diagnose_with<F>(&self, lookup: F) -> EnvironmentReport
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut report = EnvironmentReport {
            available: Vec::new(),
            missing: Vec::new(),
            available_tools: 0,
            total_tools: 0,
        };

        for descriptor in self.entries.values() {
            report.total_tools += descriptor.tool_count;

            let missing = descriptor.missing_credentials(&lookup);
            if missing.is_empty() {
                report.available_tools += descriptor.tool_count;
                report.available.push(AvailableServer {
                    name: descriptor.name.clone(),
                    tool_count: descriptor.tool_count,
                    categories: descriptor.categories.clone(),
                });
            } else {
                report.missing.push(MissingServer {
                    name: descriptor.name.clone(),
                    tool_count: descriptor.tool_count,
                    missing_credentials: missing,
                });
            }
        }

        report
    }

    /// Placeholder listing of every advertised tool, built from metadata only.
    pub fn virtual_catalog(&self) -> Vec<VirtualTool> {
        self.entries
            .values()
            .flat_map(|descriptor| {
                (1..=descriptor.tool_count).map(move |i| VirtualTool {
                    server: descriptor.name.clone(),
                    name: format!("{}_tool_{}", descriptor.name, i),
                    description: format!("Tool from {}", descriptor.name),
                    categories: descriptor.categories.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn small_catalog() -> WorkerCatalog {
        WorkerCatalog::new(vec![
            WorkerDescriptor::new("beta", "beta-bin")
                .with_credentials(["BETA_TOKEN"])
                .with_tools(3, ["b"]),
            WorkerDescriptor::new("alpha", "alpha-bin").with_tools(2, ["a"]),
            WorkerDescriptor::new("gamma", "gamma-bin")
                .with_credentials(["GAMMA_URL", "GAMMA_KEY"])
                .with_tools(5, ["g"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_lookup() {
        let catalog = small_catalog();
        assert_eq!(catalog.lookup("alpha").unwrap().command, "alpha-bin");
        assert!(matches!(
            catalog.lookup("delta"),
            Err(BrokerError::UnknownServer { name }) if name == "delta"
        ));
    }

    #[test]
    fn test_names_are_sorted() {
        let catalog = small_catalog();
        let names: Vec<_> = catalog.names().collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let result = WorkerCatalog::new(vec![
            WorkerDescriptor::new("a", "x"),
            WorkerDescriptor::new("a", "y"),
        ]);
        assert!(matches!(result, Err(BrokerError::Config(msg)) if msg.contains("duplicate")));
    }

    #[test]
    fn test_diagnose_with() {
        let catalog = small_catalog();
        let env: HashMap<&str, &str> = [("BETA_TOKEN", "secret"), ("GAMMA_URL", "")]
            .into_iter()
            .collect();

        let report = catalog.diagnose_with(|key| env.get(key).map(|v| v.to_string()));

        let available: Vec<_> = report.available.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(available, vec!["alpha", "beta"]);
        assert_eq!(report.missing.len(), 1);
        assert_eq!(report.missing[0].name, "gamma");
        // Empty values count as missing.
        assert_eq!(report.missing[0].missing_credentials, vec!["GAMMA_URL", "GAMMA_KEY"]);
        assert_eq!(report.available_tools, 5);
        assert_eq!(report.total_tools, 10);
    }

    #[test]
    fn test_diagnose_is_deterministic() {
        let catalog = small_catalog();
        let first = catalog.diagnose_with(|_| None);
        let second = catalog.diagnose_with(|_| None);
        assert_eq!(first, second);
        assert_eq!(first.available.len(), 1);
    }

    #[test]
    fn test_from_json_str() {
        let catalog = WorkerCatalog::from_json_str(
            r#"[
                {"name": "echo-mcp", "command": "echo-worker", "args": ["--stdio"],
                 "credentials": ["ECHO_KEY"], "toolCount": 4, "categories": ["misc"]},
                {"name": "bare-mcp", "command": "bare"}
            ]"#,
        )
        .unwrap();

        let echo = catalog.lookup("echo-mcp").unwrap();
        assert_eq!(echo.args, vec!["--stdio"]);
        assert_eq!(echo.credentials, vec!["ECHO_KEY"]);
        assert_eq!(echo.tool_count, 4);
        assert!(catalog.lookup("bare-mcp").unwrap().args.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, r#"[{"name": "file-mcp", "command": "file-worker"}]"#).unwrap();

        let catalog = WorkerCatalog::load(&path).unwrap();
        assert_eq!(catalog.len(), 1);

        assert!(WorkerCatalog::load(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_builtin_catalog() {
        let catalog = WorkerCatalog::builtin();
        assert_eq!(catalog.len(), 13);

        let github = catalog.lookup("github-mcp").unwrap();
        assert_eq!(github.command, "npx");
        assert_eq!(github.args, vec!["github-mcp"]);
        assert_eq!(github.tool_count, 199);

        let playwright = catalog.lookup("playwright-mcp").unwrap();
        assert!(playwright.credentials.is_empty());
    }

    #[test]
    fn test_virtual_catalog() {
        let catalog = small_catalog();
        let tools = catalog.virtual_catalog();
        assert_eq!(tools.len(), 10);
        assert_eq!(tools[0].server, "alpha");
        assert_eq!(tools[0].name, "alpha_tool_1");
        assert_eq!(tools[1].name, "alpha_tool_2");
        assert_eq!(tools[2].server, "beta");
    }
}
