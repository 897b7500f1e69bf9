//! Bridge to the beads CLI binary (`bd`).
//!
//! beads is a binary-only tool, so we shell out and parse its `--json`
//! output. The binary name is read once at construction from the
//! `RALPH_BD_BIN` env var, defaulting to `"bd"`; every command runs in
//! the configured work directory.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// Label the tracker uses to flag beads waiting on a person.
pub const NEEDS_HUMAN_LABEL: &str = "needs-human";

/// Status string the tracker uses for finished beads. Anything else is
/// treated as open.
pub const STATUS_CLOSED: &str = "closed";

/// A bead as returned by `bd ready --json` / `bd list --json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bead {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub status: String,
}

impl Bead {
    pub fn is_closed(&self) -> bool {
        self.status == STATUS_CLOSED
    }
}

/// A dependency or dependent entry inside `bd show` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeadRef {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub dependency_type: Option<String>,
}

impl BeadRef {
    pub fn is_open(&self) -> bool {
        self.status != STATUS_CLOSED
    }

    pub fn needs_human(&self) -> bool {
        self.labels.iter().any(|l| l == NEEDS_HUMAN_LABEL)
    }
}

/// Detailed view of one bead as returned by `bd show <id> --json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeadShow {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub dependencies: Vec<BeadRef>,
    #[serde(default)]
    pub dependents: Vec<BeadRef>,
}

impl BeadShow {
    pub fn is_closed(&self) -> bool {
        self.status == STATUS_CLOSED
    }

    /// IDs of open dependencies and dependents carrying the
    /// `needs-human` label, dependencies first.
    pub fn open_needs_human(&self) -> Vec<&str> {
        self.dependencies
            .iter()
            .chain(self.dependents.iter())
            .filter(|r| r.is_open() && r.needs_human())
            .map(|r| r.id.as_str())
            .collect()
    }
}

/// `bd show` returns a single-element array; take the first entry and
/// reject empty output.
pub fn parse_show_output(bytes: &[u8]) -> Result<BeadShow> {
    let mut shows: Vec<BeadShow> =
        serde_json::from_slice(bytes).context("parse bd show output")?;
    if shows.is_empty() {
        bail!("bd show returned an empty array");
    }
    Ok(shows.remove(0))
}

/// Abstraction over the tracker so orchestrators and the assessor can
/// be driven by a fake in tests.
#[async_trait]
pub trait Tracker: Send + Sync {
    /// Beads whose dependencies are satisfied, optionally scoped to an
    /// epic.
    async fn ready(&self, epic: Option<&str>) -> Result<Vec<Bead>>;

    /// Detailed view of one bead.
    async fn show(&self, id: &str) -> Result<BeadShow>;

    /// Flush tracker state. Best-effort at every call site.
    async fn sync(&self) -> Result<()>;
}

/// The real `bd` subprocess client.
pub struct BeadsBridge {
    bin: String,
    work_dir: PathBuf,
}

impl BeadsBridge {
    pub fn new(work_dir: impl AsRef<Path>) -> Self {
        let bin = std::env::var("RALPH_BD_BIN").unwrap_or_else(|_| "bd".into());
        Self::with_binary(work_dir, bin)
    }

    pub fn with_binary(work_dir: impl AsRef<Path>, bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            work_dir: work_dir.as_ref().to_path_buf(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>> {
        let output = Command::new(&self.bin)
            .args(args)
            .current_dir(&self.work_dir)
            .output()
            .await
            .with_context(|| format!("failed to run `{} {}`", self.bin, args.join(" ")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} {} failed: {}",
                self.bin,
                args.join(" "),
                stderr.trim()
            );
        }
        Ok(output.stdout)
    }

    /// All beads, optionally capped. Used by the CLI status view.
    pub async fn list(&self, limit: Option<usize>) -> Result<Vec<Bead>> {
        let limit_arg;
        let mut args = vec!["list", "--json"];
        if let Some(n) = limit {
            limit_arg = n.to_string();
            args.push("--limit");
            args.push(&limit_arg);
        }
        let stdout = self.run(&args).await?;
        serde_json::from_slice(&stdout).context("parse bd list output")
    }
}

#[async_trait]
impl Tracker for BeadsBridge {
    async fn ready(&self, epic: Option<&str>) -> Result<Vec<Bead>> {
        let mut args = vec!["ready"];
        if let Some(epic) = epic {
            args.push("--epic");
            args.push(epic);
        }
        args.push("--json");
        let stdout = self.run(&args).await?;
        serde_json::from_slice(&stdout).context("parse bd ready output")
    }

    async fn show(&self, id: &str) -> Result<BeadShow> {
        let stdout = self.run(&["show", id, "--json"]).await?;
        parse_show_output(&stdout).with_context(|| format!("bd show {id}"))
    }

    async fn sync(&self) -> Result<()> {
        self.run(&["sync"]).await?;
        Ok(())
    }
}
