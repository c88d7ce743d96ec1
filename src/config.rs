use anyhow::{Context, bail};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure that can be loaded from CLI or a config file
///
/// Example configuration file content
/// # Frame extractor configuration
///
/// # Server configuration
/// listen_on_port = 8501
/// permits = 2
/// workspace = "./data"
///
/// # Downloader configuration
/// downloader = "yt-dlp"
/// download_format = "best"
/// download_retries = 1
///
/// # Output configuration
/// jpeg_quality = 95
/// sample_count = 5
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[serde(default)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Port the browser UI listens on
    #[arg(short, long, default_value_t = 8501)]
    #[serde(default = "default_port")]
    pub listen_on_port: u16,

    /// Number of jobs (downloads or extractions) running at once
    #[arg(short, long, default_value_t = 2)]
    #[serde(default = "default_permits")]
    pub permits: usize,

    /// Working directory for downloads, frames and the pending job file
    #[arg(short = 'w', long, default_value = ".")]
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// Configuration file path (values given on the command line win)
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Downloader program invoked as `<downloader> -f <format> -o <file> <url>`
    #[arg(long, default_value = "yt-dlp")]
    #[serde(default = "default_downloader")]
    pub downloader: String,

    /// Format selector passed to the downloader
    #[arg(long, default_value = "best")]
    #[serde(default = "default_download_format")]
    pub download_format: String,

    /// How many times a failed download is retried
    #[arg(long, default_value_t = 0)]
    #[serde(default)]
    pub download_retries: u8,

    /// JPEG quality for extracted frames (1-100)
    #[arg(long, default_value_t = 95)]
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Number of sample frames shown once a job is done
    #[arg(long, default_value_t = 5)]
    #[serde(default = "default_sample_count")]
    pub sample_count: usize,

    /// Download and extract a single URL, then exit instead of serving the UI
    #[arg(short, long)]
    #[serde(skip)]
    pub url: Option<String>,

    /// Keep every Nth frame (one-shot mode)
    #[arg(short = 'n', long, default_value_t = 1)]
    #[serde(skip)]
    pub frame_skip: u32,

    /// Folder the frames are written to (one-shot mode)
    #[arg(short, long, default_value = "extracted_frames")]
    #[serde(skip)]
    pub output_folder: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_on_port: default_port(),
            permits: default_permits(),
            workspace: default_workspace(),
            config: None,
            downloader: default_downloader(),
            download_format: default_download_format(),
            download_retries: 0,
            jpeg_quality: default_jpeg_quality(),
            sample_count: default_sample_count(),
            url: None,
            frame_skip: 1,
            output_folder: crate::extract::DEFAULT_OUTPUT_FOLDER.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args, optionally merging with a config file
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Config::parse();

        if let Some(config_path) = &config.config {
            let file_config = Self::from_file(Path::new(config_path))?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge with file config, CLI args take precedence
    fn merge_with_file(mut self, file_config: Config) -> Self {
        // If CLI value is default, use file value
        if self.listen_on_port == default_port() {
            self.listen_on_port = file_config.listen_on_port;
        }
        if self.permits == default_permits() {
            self.permits = file_config.permits;
        }
        if self.workspace == default_workspace() {
            self.workspace = file_config.workspace;
        }
        if self.downloader == default_downloader() {
            self.downloader = file_config.downloader;
        }
        if self.download_format == default_download_format() {
            self.download_format = file_config.download_format;
        }
        if self.download_retries == 0 {
            self.download_retries = file_config.download_retries;
        }
        if self.jpeg_quality == default_jpeg_quality() {
            self.jpeg_quality = file_config.jpeg_quality;
        }
        if self.sample_count == default_sample_count() {
            self.sample_count = file_config.sample_count;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.permits == 0 {
            bail!("permits must be at least 1");
        }
        if self.downloader.trim().is_empty() {
            bail!("downloader cannot be empty");
        }
        if self.download_format.trim().is_empty() {
            bail!("download format cannot be empty");
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            bail!(
                "jpeg quality must be between 1 and 100, got {}",
                self.jpeg_quality
            );
        }
        if self.frame_skip == 0 {
            bail!("frame skip must be at least 1");
        }
        if let Some(url) = &self.url
            && url.trim().is_empty()
        {
            bail!("Please enter a valid YouTube URL.");
        }

        Ok(())
    }

    pub fn downloader(&self) -> crate::Downloader {
        crate::Downloader::new(self.downloader.clone(), self.download_format.clone())
    }
}

// Default value functions
fn default_port() -> u16 {
    8501
}

fn default_permits() -> usize {
    2
}

fn default_workspace() -> String {
    ".".to_string()
}

fn default_downloader() -> String {
    crate::download::DEFAULT_DOWNLOADER.to_string()
}

fn default_download_format() -> String {
    crate::download::DEFAULT_FORMAT.to_string()
}

fn default_jpeg_quality() -> u8 {
    crate::extract::DEFAULT_JPEG_QUALITY
}

fn default_sample_count() -> usize {
    5
}
