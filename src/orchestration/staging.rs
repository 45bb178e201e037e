//! Artifact staging ahead of a sync session.
//!
//! The release packages live in an svn working copy. Staging brings the
//! working copy up to date, reports its revision and checks that every
//! package a sync session may push is present.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use super::operation::SyncMode;
use crate::backend::{BatchExecutor, ExecutionResult};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{ProgressEvent, ZoneManifest};
use crate::stats::StatsAggregator;
use crate::stream::EventSender;
use crate::util::{shell_escape, shell_join};
use crate::{olog, olog_error};

/// Child environment variable carrying the svn password to `--password-from-stdin`.
const PASSWORD_ENV: &str = "ZONEOPS_STAGE_SVN_PASSWORD";

/// Where each channel's packages live inside the checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactLayout {
    pub checkout_dir: PathBuf,
    /// Channels that share another channel's artifact directory.
    pub aliases: HashMap<String, String>,
}

impl ArtifactLayout {
    pub fn new(checkout_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkout_dir: checkout_dir.into(),
            aliases: HashMap::new(),
        }
    }

    pub fn with_alias(mut self, channel: &str, dir: &str) -> Self {
        self.aliases.insert(channel.to_string(), dir.to_string());
        self
    }

    pub fn channel_dir(&self, channel: &str) -> PathBuf {
        let dir = self.aliases.get(channel).map(String::as_str).unwrap_or(channel);
        self.checkout_dir.join(dir)
    }

    pub fn package(&self, channel: &str, mode: SyncMode) -> PathBuf {
        mode.package_path(&self.channel_dir(channel))
    }
}

/// Prepares artifacts before sync tasks are dispatched.
#[async_trait]
pub trait ArtifactStager: Send + Sync {
    /// Returns the staged revision. Any `Err` aborts the sync session.
    async fn stage(
        &self,
        manifest: &ZoneManifest,
        events: &EventSender,
        stats: &Arc<StatsAggregator>,
    ) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct SvnStager {
    svn_bin: String,
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    layout: ArtifactLayout,
    timeout: Duration,
}

impl SvnStager {
    pub fn new(svn_bin: impl Into<String>, layout: ArtifactLayout, timeout: Duration) -> Self {
        Self {
            svn_bin: svn_bin.into(),
            url: None,
            username: None,
            password: None,
            layout,
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let layout = ArtifactLayout {
            checkout_dir: config.checkout_dir()?,
            aliases: config.artifacts.channel_aliases.clone(),
        };
        Ok(Self {
            url: config.artifacts.url.clone(),
            username: config.artifacts.username.clone(),
            password: config.artifacts.password.clone(),
            ..Self::new(config.artifacts.svn_bin.clone(), layout, config.default_timeout())
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// `svn` plus credential flags, escaped for the shell.
    ///
    /// The password never appears in the command line: it is piped from
    /// [`PASSWORD_ENV`], which [`step`](Self::step) sets on the child.
    fn svn(&self, args: &[&str]) -> String {
        let mut words = vec![self.svn_bin.clone()];
        if let Some(user) = &self.username {
            words.push(format!("--username={}", user));
        }
        if self.password.is_some() {
            words.push("--password-from-stdin".to_string());
        }
        if self.username.is_some() || self.password.is_some() {
            words.push("--no-auth-cache".to_string());
        }
        words.extend(args.iter().map(|a| a.to_string()));
        let command = shell_join(words);
        if self.password.is_some() {
            format!("printf '%s' \"${}\" | {}", PASSWORD_ENV, command)
        } else {
            command
        }
    }

    async fn step(
        &self,
        exec: &BatchExecutor,
        command: &str,
        prefix: &str,
    ) -> Result<ExecutionResult> {
        let env: Vec<(&str, &str)> = self
            .password
            .as_deref()
            .map(|pass| (PASSWORD_ENV, pass))
            .into_iter()
            .collect();
        let result = exec
            .run_with_env(command, &env, Some(self.timeout))
            .await;
        if result.success {
            return Ok(result);
        }
        let detail = result
            .error
            .clone()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| result.stderr.clone());
        olog_error!("{}: {}", prefix, detail);
        Err(Error::Staging(format!("{}: {}", prefix, detail)))
    }

    async fn package_times(&self, manifest: &ZoneManifest, events: &EventSender) -> Result<()> {
        let packages: BTreeSet<PathBuf> = manifest
            .channels()
            .flat_map(|channel| SyncMode::ALL.map(|mode| self.layout.package(channel, mode)))
            .collect();
        for package in packages {
            let modified = tokio::fs::metadata(&package)
                .await
                .and_then(|meta| meta.modified())
                .map_err(|e| {
                    Error::Staging(format!(
                        "package info failed: {}: {}",
                        package.display(),
                        e
                    ))
                })?;
            let stamp = chrono::DateTime::<chrono::Local>::from(modified);
            events.send(ProgressEvent::info(format!(
                "package ({}) built at {}",
                package.display(),
                stamp.format("%Y-%m-%d %H:%M:%S")
            )));
        }
        Ok(())
    }
}

/// Extract the last changed revision from `svn info` output.
pub fn parse_revision(info: &str) -> Option<String> {
    let re = Regex::new(r"(?m)^Last Changed Rev:\s*(\d+)").ok()?;
    re.captures(info).map(|caps| caps[1].to_string())
}

#[async_trait]
impl ArtifactStager for SvnStager {
    async fn stage(
        &self,
        manifest: &ZoneManifest,
        events: &EventSender,
        stats: &Arc<StatsAggregator>,
    ) -> Result<String> {
        let exec = BatchExecutor::new(self.timeout)
            .with_events(events.clone(), false)
            .with_stats(Arc::clone(stats));
        let dir = self.layout.checkout_dir.display().to_string();

        self.step(
            &exec,
            &format!("mkdir -p {}", shell_escape(&dir)),
            "create checkout directory failed",
        )
        .await?;

        if working_copy(&self.layout.checkout_dir) {
            events.send(ProgressEvent::info("updating artifact checkout, please wait..."));
            let command = format!(
                "{} > /dev/null 2>&1 && {}",
                self.svn(&["cleanup", &dir]),
                self.svn(&["update", &dir])
            );
            self.step(&exec, &command, "svn update failed").await?;
            events.send(ProgressEvent::info("artifact checkout updated"));
        } else {
            let url = self
                .url
                .as_deref()
                .ok_or_else(|| Error::Staging("svn url is not configured".to_string()))?;
            events.send(ProgressEvent::info("checking out artifacts, please wait..."));
            let command = format!("{} > /dev/null", self.svn(&["checkout", url, &dir]));
            self.step(&exec, &command, "svn checkout failed").await?;
            events.send(ProgressEvent::info("artifact checkout finished"));
        }

        let info = self
            .step(&exec, &self.svn(&["info", &dir]), "read svn revision failed")
            .await?;
        let revision = parse_revision(&info.stdout).ok_or_else(|| {
            Error::Staging("read svn revision failed: no Last Changed Rev".to_string())
        })?;

        self.package_times(manifest, events).await?;

        olog!("artifacts staged at revision {}", revision);
        events.send(ProgressEvent::info(format!("package svn revision: {}", revision)));
        Ok(revision)
    }
}

fn working_copy(dir: &Path) -> bool {
    dir.join(".svn").exists()
}
