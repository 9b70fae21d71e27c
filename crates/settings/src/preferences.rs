use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const PREFERENCES_VERSION: u32 = 1;
const MIN_DEBOUNCE_MS: u64 = 50;
const MAX_DEBOUNCE_MS: u64 = 2_000;

#[derive(Debug, Error)]
pub enum PreferencesError {
    #[error("failed to read preferences {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse preferences {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize preferences {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write preferences {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to prepare directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub editor: EditorPreferences,
    #[serde(default)]
    pub build: BuildPreferences,
    #[serde(default)]
    pub ui: UiPreferences,
}

fn default_version() -> u32 {
    PREFERENCES_VERSION
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            version: PREFERENCES_VERSION,
            editor: EditorPreferences::default(),
            build: BuildPreferences::default(),
            ui: UiPreferences::default(),
        }
    }
}

impl Preferences {
    pub fn sanitize(&mut self) {
        if self.version == 0 {
            self.version = PREFERENCES_VERSION;
        }
        self.editor.sanitize();
        self.build.sanitize();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorPreferences {
    #[serde(default)]
    pub auto_save: bool,
    #[serde(default = "default_debounce_ms")]
    pub highlight_debounce_ms: u64,
}

fn default_debounce_ms() -> u64 {
    300
}

impl Default for EditorPreferences {
    fn default() -> Self {
        Self {
            auto_save: false,
            highlight_debounce_ms: default_debounce_ms(),
        }
    }
}

impl EditorPreferences {
    pub fn highlight_debounce(&self) -> Duration {
        Duration::from_millis(self.highlight_debounce_ms)
    }

    fn sanitize(&mut self) {
        self.highlight_debounce_ms = self
            .highlight_debounce_ms
            .clamp(MIN_DEBOUNCE_MS, MAX_DEBOUNCE_MS);
    }
}

/// 編譯與執行相關設定。 / Compile-and-run preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPreferences {
    /// Standard revision passed as `-std=c++<language_standard>`; a
    /// `gnu++` prefix selects the GNU dialect and is passed through as is.
    #[serde(default = "default_language_standard")]
    pub language_standard: String,
    #[serde(default)]
    pub always_external_terminal: bool,
    #[serde(default)]
    pub compiler_override: Option<PathBuf>,
}

fn default_language_standard() -> String {
    "17".to_string()
}

impl Default for BuildPreferences {
    fn default() -> Self {
        Self {
            language_standard: default_language_standard(),
            always_external_terminal: false,
            compiler_override: None,
        }
    }
}

impl BuildPreferences {
    fn sanitize(&mut self) {
        let trimmed = self.language_standard.trim();
        let (dialect, revision) = match trimmed.strip_prefix("gnu++") {
            Some(revision) => ("gnu++", revision),
            None => ("", trimmed.strip_prefix("c++").unwrap_or(trimmed)),
        };
        if revision.is_empty() || !revision.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            self.language_standard = default_language_standard();
        } else {
            self.language_standard = format!("{dialect}{revision}");
        }
        if self
            .compiler_override
            .as_ref()
            .is_some_and(|path| path.as_os_str().is_empty())
        {
            self.compiler_override = None;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiPreferences {
    #[serde(default)]
    pub theme_path: Option<PathBuf>,
}

#[derive(Debug)]
pub struct PreferencesStore {
    path: PathBuf,
    data: Preferences,
}

impl PreferencesStore {
    pub fn new(path: impl Into<PathBuf>, preferences: Preferences) -> Self {
        let mut data = preferences;
        data.sanitize();
        Self {
            path: path.into(),
            data,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PreferencesError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no preferences file; using defaults");
            return Ok(Self::new(path, Preferences::default()));
        }

        let contents = fs::read_to_string(&path).map_err(|source| PreferencesError::Read {
            path: path.clone(),
            source,
        })?;
        let data: Preferences =
            serde_json::from_str(&contents).map_err(|source| PreferencesError::Parse {
                path: path.clone(),
                source,
            })?;
        Ok(Self::new(path, data))
    }

    pub fn preferences(&self) -> &Preferences {
        &self.data
    }

    pub fn update<F>(&mut self, mut op: F) -> Result<(), PreferencesError>
    where
        F: FnMut(&mut Preferences),
    {
        op(&mut self.data);
        self.data.sanitize();
        self.save()
    }

    pub fn save(&self) -> Result<(), PreferencesError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| PreferencesError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let payload = serde_json::to_string_pretty(&self.data).map_err(|source| {
            PreferencesError::Serialize {
                path: self.path.clone(),
                source,
            }
        })?;

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, payload.as_bytes()).map_err(|source| PreferencesError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|source| PreferencesError::Write {
            path: self.path.clone(),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
