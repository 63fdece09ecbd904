use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::{fs, io};

use anyhow::{Context, Result};
use chrono::Utc;
use log::{info, warn};
use serde::Serialize;
use tinytemplate::TinyTemplate;

use crate::WorkingDirectory;

/// A JobPath is the path to a job script that's submitted to SLURM via sbatch
pub struct JobPath {
    pub path: PathBuf,
}

/// sbatch options an operator may want to tune per deployment
pub struct JobOptions {
    pub partition: String,
    pub job_time: String,
}

impl Default for JobOptions {
    fn default() -> Self {
        JobOptions {
            partition: "cpuonly".to_string(),
            job_time: "3-00:00:00".to_string(),
        }
    }
}

/// All rendered sections of one conversion job script
struct JobTemplate {
    header: String,
    workflow: String,
}

impl JobTemplate {
    /// Write the complete job script by appending the rendered sections
    fn write(self, out_path: &PathBuf) -> Result<(), io::Error> {
        let mut file = OpenOptions::new().create(true).append(true).open(out_path)?;

        // order is important when writing the file
        for content in [self.header, self.workflow] {
            file.write_all(content.as_bytes())?;
        }

        Ok(())
    }
}

/// Rendering context for the SBATCH header
#[derive(Serialize)]
struct HeaderContext {
    name: String,
    partition: String,
    job_time: String,
    work_dir: String,
    time_now: String,
}

/// Rendering context for the worker command
#[derive(Serialize)]
struct ConvertContext {
    assasdb_bin: String,
    work_dir: String,
    uuid: String,
}

/// Create the per-dataset job directory and render its job script
pub fn create_job_script(
    wd: &WorkingDirectory,
    uuid: &str,
    options: &JobOptions,
) -> Result<JobPath> {
    let instance_wd = wd.path.join(uuid);
    info!(
        "Creating job convert-{uuid} in working directory {}",
        instance_wd.display()
    );

    if instance_wd.exists() {
        warn!("Job directory already exists, files will be overwritten");
        fs::remove_dir_all(&instance_wd).context("delete existing job directory")?;
    }
    fs::create_dir_all(&instance_wd).context("create job directory")?;

    let job = JobTemplate {
        header: render_header(uuid, options, wd)?,
        workflow: render_convert(uuid, wd)?,
    };

    let path = instance_wd.join("job.sh");
    job.write(&path).context("write job script")?;

    Ok(JobPath { path })
}

/// Render the SBATCH header using TinyTemplate
fn render_header(uuid: &str, options: &JobOptions, wd: &WorkingDirectory) -> Result<String> {
    /// included header template
    static HEADER: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/data/templates/header.txt"
    ));
    let mut tt = TinyTemplate::new();
    tt.add_template("header", HEADER)?;

    let context = HeaderContext {
        name: format!("convert-{uuid}"),
        partition: options.partition.clone(),
        job_time: options.job_time.clone(),
        work_dir: wd.path.join(uuid).display().to_string(),
        time_now: Utc::now().to_string(),
    };

    Ok(tt.render("header", &context)?)
}

/// Render the worker command using TinyTemplate
fn render_convert(uuid: &str, wd: &WorkingDirectory) -> Result<String> {
    /// included workflow template
    static CONVERT: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/data/templates/convert.txt"
    ));
    let mut tt = TinyTemplate::new();
    tt.add_template("convert", CONVERT)?;

    let assasdb_bin = std::env::current_exe()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|_| "assasdb".to_string());

    let context = ConvertContext {
        assasdb_bin,
        work_dir: wd.path.display().to_string(),
        uuid: uuid.to_string(),
    };

    Ok(tt.render("convert", &context)?)
}
