//! Common test utilities and helpers

#![allow(dead_code)]

use anyhow::Result;
use qapflow::scan::{write_volume, ScanVolume};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Builder for a run directory holding scans, a config and a participant list
pub struct RunFixtureBuilder {
    temp_dir: TempDir,
    processors: usize,
    sessions: usize,
    memory_gb: f64,
    extra_config: Vec<String>,
}

impl RunFixtureBuilder {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp_dir: TempDir::new()?,
            processors: 1,
            sessions: 1,
            memory_gb: 2.0,
            extra_config: Vec::new(),
        })
    }

    /// Set the processor, session and memory ceilings
    pub fn with_budget(mut self, processors: usize, sessions: usize, memory_gb: f64) -> Self {
        self.processors = processors;
        self.sessions = sessions;
        self.memory_gb = memory_gb;
        self
    }

    /// Append a raw `key: value` line to the config
    pub fn with_config_line(mut self, line: &str) -> Self {
        self.extra_config.push(line.to_string());
        self
    }

    pub fn build(self) -> Result<RunFixture> {
        let root = self.temp_dir.path();
        fs::create_dir_all(root.join("data"))?;
        let mut config = format!(
            "num_processors: {}\nnum_sessions_at_once: {}\navailable_memory: {}\n\
             cluster_system: None\noutput_directory: {}\nworking_directory: {}\n",
            self.processors,
            self.sessions,
            self.memory_gb,
            root.join("out").display(),
            root.join("work").display(),
        );
        for line in &self.extra_config {
            config.push_str(line);
            config.push('\n');
        }
        fs::write(root.join("config.yml"), config)?;
        Ok(RunFixture {
            temp_dir: self.temp_dir,
        })
    }
}

pub struct RunFixture {
    temp_dir: TempDir,
}

impl RunFixture {
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.path().join("config.yml")
    }

    pub fn sublist_path(&self) -> PathBuf {
        self.path().join("sublist.yml")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.path().join("out")
    }

    pub fn working_dir(&self) -> PathBuf {
        self.path().join("work")
    }

    /// Write a small 3D anatomical volume under data/
    pub fn anatomical_scan(&self, name: &str) -> Result<PathBuf> {
        let data = (0..27).map(|v| (v % 9) as f32 + 1.0).collect();
        let volume = ScanVolume::from_f32([3, 3, 3, 1], data)?;
        self.write_scan(name, &volume)
    }

    /// Write a 2x2x1 functional volume with `frames` timepoints under data/
    pub fn functional_scan(&self, name: &str, frames: usize) -> Result<PathBuf> {
        let mut data = Vec::with_capacity(4 * frames);
        for t in 0..frames {
            for v in 0..4 {
                data.push(100.0 + (v * 10) as f32 + ((t * 7 + v) % 5) as f32);
            }
        }
        let volume = ScanVolume::from_f32([2, 2, 1, frames], data)?;
        self.write_scan(name, &volume)
    }

    /// Write bytes that are not a NIfTI file
    pub fn corrupt_scan(&self, name: &str) -> Result<PathBuf> {
        let path = self.path().join("data").join(name);
        fs::write(&path, b"definitely not a nifti header")?;
        Ok(path)
    }

    fn write_scan(&self, name: &str, volume: &ScanVolume) -> Result<PathBuf> {
        let path = self.path().join("data").join(name);
        write_volume(&path, volume)?;
        Ok(path)
    }

    pub fn write_sublist(&self, yaml: &str) -> Result<PathBuf> {
        let path = self.sublist_path();
        fs::write(&path, yaml)?;
        Ok(path)
    }

    /// Participant list with one anatomical scan per subject
    pub fn anatomical_sublist(&self, scans: &[(&str, &Path)]) -> Result<PathBuf> {
        let mut yaml = String::new();
        for (subject, path) in scans {
            yaml.push_str(&format!(
                "{}:\n  session_1:\n    site_name: site_a\n    anatomical_scan:\n      anat_1: {}\n",
                subject,
                path.display()
            ));
        }
        self.write_sublist(&yaml)
    }

    pub fn read_output(&self, name: &str) -> Result<String> {
        Ok(fs::read_to_string(self.output_dir().join(name))?)
    }

    /// Every regular file below the working directory
    pub fn working_files(&self) -> Vec<PathBuf> {
        walkdir::WalkDir::new(self.working_dir())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect()
    }
}

/// Parse a CSV table into its header and rows
pub fn read_table(content: &str) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let mut reader = csv::Reader::from_reader(content.as_bytes());
    let header = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record?.iter().map(str::to_string).collect());
    }
    Ok((header, rows))
}

/// Common assertion helpers
pub mod assertions {
    use std::path::Path;

    /// Assert that a file contains specific content
    pub fn assert_file_contains(path: &Path, content: &str) {
        let file_content = std::fs::read_to_string(path)
            .unwrap_or_else(|_| panic!("Failed to read file: {}", path.display()));
        assert!(
            file_content.contains(content),
            "File {} does not contain expected content: {}",
            path.display(),
            content
        );
    }
}
