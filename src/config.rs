//! Per-view mode flags and tunables.
//!
//! Every `View` is built from a `ViewConfig` that it clones and then owns;
//! toggles only ever change that view's copy. To make the next view start
//! with the flags the user left the last one in, read them back with
//! `View::mode_config` and hand that to the next `View::new`.
//!
//! A config file is optional. Unknown keys are ignored so that old binaries
//! keep accepting newer files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::charset::Encoding;
use crate::error::ConfigError;

pub const CONFIG_FILE_NAME: &str = "fview.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum EncodingName {
    #[default]
    #[serde(rename = "utf-8", alias = "utf8")]
    Utf8,
    #[serde(rename = "latin1", alias = "iso-8859-1")]
    Latin1,
}

impl EncodingName {
    pub fn encoding(self) -> Encoding {
        match self {
            EncodingName::Utf8 => Encoding::Utf8,
            EncodingName::Latin1 => Encoding::latin1(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    /// Wrap long paragraphs onto several rows instead of scrolling sideways.
    pub wrap: bool,
    /// Interpret `X\bX` and `_\bX` overprint sequences as bold/underline.
    pub nroff: bool,
    pub tab_spacing: u64,
    pub encoding: EncodingName,
    /// Filler drawn on rows past the end of the data.
    pub show_eof: Option<String>,
    /// Mouse wheel scrolls by pages rather than by lines.
    pub mouse_move_pages: bool,
}

impl Default for ViewConfig {
    fn default() -> Self {
        ViewConfig {
            wrap: true,
            nroff: false,
            tab_spacing: 8,
            encoding: EncodingName::Utf8,
            show_eof: None,
            mouse_move_pages: true,
        }
    }
}

impl ViewConfig {
    /// Where a config file is looked for when none is given explicitly: the
    /// working directory first, then the platform config directory.
    pub fn discover() -> PathBuf {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return local;
        }
        if let Some(dir) = dirs::config_dir() {
            return dir.join("fview").join(CONFIG_FILE_NAME);
        }
        local
    }

    /// Load a config file. A missing file is not an error and yields the defaults.
    pub fn load_from(path: Option<&Path>) -> Result<ViewConfig, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => ViewConfig::discover(),
        };

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(target: "config", path = %path.display(), "no config file, using defaults");
                return Ok(ViewConfig::default());
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        let mut config: ViewConfig =
            toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;

        if config.tab_spacing == 0 {
            config.tab_spacing = ViewConfig::default().tab_spacing;
        }

        debug!(target: "config", path = %path.display(), ?config, "loaded config");
        Ok(config)
    }
}
