//! Batch Script Builder
//!
//! Renders a Slurm batch script from a name, a resource request, optional
//! `afterok` dependencies and body lines, and writes it next to its
//! siblings with execute permissions.
//!
//! # Layout
//!
//! ```text
//! #!/bin/bash
//! #SBATCH --job-name=<name>
//! #SBATCH --time=... / --mem=... / --ntasks / --cpus-per-task
//! #SBATCH --output=<name>_%j.out
//! #SBATCH --dependency=afterok:<id>:<id>
//! #SBATCH --mail-user=... / --mail-type=...
//! # generated by poolrunner <version> on <timestamp>
//! set -e
//! <body>
//! ```

use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::NotifyConfig;
use crate::error::Result;
use crate::scheduler::JobId;

/// Per-job resource request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResourceRequest {
    /// Wall time, `HH:MM:SS` or any format `sbatch --time` accepts.
    pub time: String,
    pub mem: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ntasks: Option<u32>,
}

impl ResourceRequest {
    pub fn new(time: impl Into<String>, mem: impl Into<String>) -> Self {
        Self {
            time: time.into(),
            mem: mem.into(),
            cpus: None,
            ntasks: None,
        }
    }

    pub fn with_cpus(mut self, cpus: u32) -> Self {
        self.cpus = Some(cpus);
        self
    }

    pub fn with_ntasks(mut self, ntasks: u32) -> Self {
        self.ntasks = Some(ntasks);
        self
    }
}

#[derive(Debug, Clone)]
pub struct JobScript {
    name: String,
    resources: ResourceRequest,
    dependencies: Vec<JobId>,
    mail: Option<(String, String)>,
    body: Vec<String>,
}

impl JobScript {
    pub fn new(name: impl Into<String>, resources: &ResourceRequest) -> Self {
        Self {
            name: name.into(),
            resources: resources.clone(),
            dependencies: Vec::new(),
            mail: None,
            body: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Holds the job until every listed job completed successfully.
    pub fn after_ok(mut self, jobs: &[JobId]) -> Self {
        self.dependencies.extend_from_slice(jobs);
        self
    }

    pub fn notify(mut self, notify: &NotifyConfig) -> Self {
        self.mail = notify
            .mail_user
            .as_ref()
            .map(|user| (user.clone(), notify.mail_type.clone()));
        self
    }

    pub fn comment(self, text: &str) -> Self {
        self.line(format!("# {}", text))
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.body.push(line.into());
        self
    }

    pub fn lines<I, L>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        self.body.extend(lines.into_iter().map(Into::into));
        self
    }

    pub fn blank(self) -> Self {
        self.line(String::new())
    }

    /// Script file name, `<name>.sh`.
    pub fn file_name(&self) -> String {
        format!("{}.sh", self.name)
    }

    pub fn render(&self) -> String {
        let mut text = String::from("#!/bin/bash\n");
        let res = &self.resources;

        // Writing to a String cannot fail.
        let _ = writeln!(text, "#SBATCH --job-name={}", self.name);
        let _ = writeln!(text, "#SBATCH --time={}", res.time);
        let _ = writeln!(text, "#SBATCH --mem={}", res.mem);
        if let Some(ntasks) = res.ntasks {
            let _ = writeln!(text, "#SBATCH --ntasks={}", ntasks);
        }
        if let Some(cpus) = res.cpus {
            let _ = writeln!(text, "#SBATCH --cpus-per-task={}", cpus);
        }
        let _ = writeln!(text, "#SBATCH --output={}_%j.out", self.name);
        if !self.dependencies.is_empty() {
            let ids: Vec<&str> = self.dependencies.iter().map(JobId::as_str).collect();
            let _ = writeln!(text, "#SBATCH --dependency=afterok:{}", ids.join(":"));
        }
        if let Some((user, kind)) = &self.mail {
            let _ = writeln!(text, "#SBATCH --mail-user={}", user);
            let _ = writeln!(text, "#SBATCH --mail-type={}", kind);
        }
        let _ = writeln!(
            text,
            "# generated by {} {} on {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        text.push_str("set -e\n\n");

        for line in &self.body {
            text.push_str(line);
            text.push('\n');
        }
        text
    }

    /// Writes the script into `dir` (created if needed) and returns its path.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;

        let script_path = dir.join(self.file_name());
        let mut file = File::create(&script_path)?;
        file.write_all(self.render().as_bytes())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755))?;
        }

        debug!("Wrote job script {}", script_path.display());
        Ok(script_path)
    }
}
