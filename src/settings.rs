use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::crop::{CropOptions, DEFAULT_UPSCALE, VERTICAL_TEXT_RATIO};
use crate::geometry::MIN_SELECTION_PX;
use crate::paths;
use crate::recognition::{
    MIN_TEXT_CHARS, OrchestratorOptions, RecognitionMode, TesseractConfig,
};
use crate::session::Session;
use crate::translate::DEFAULT_MAX_CHARS;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

#[derive(Debug, Clone)]
pub struct Settings {
    pub ocr: OcrSettings,
    pub remote: RemoteSettings,
    pub translation: TranslationSettings,
    pub store_path: PathBuf,
    pub server: ServerSettings,
    pub session_user: Option<String>,
    pub session_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OcrSettings {
    pub language: String,
    pub upscale: u32,
    pub vertical_ratio: f64,
    pub min_text_chars: usize,
    pub min_selection_px: f64,
    pub preserve_interword_spaces: bool,
    pub tesseract_path: String,
}

#[derive(Debug, Clone, Default)]
pub struct RemoteSettings {
    pub url: Option<String>,
    pub mode: RecognitionMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslationProvider {
    #[default]
    Http,
    OpenAI,
}

#[derive(Debug, Clone)]
pub struct TranslationSettings {
    pub provider: TranslationProvider,
    pub url: Option<String>,
    pub model: Option<String>,
    pub source_lang: String,
    pub target_lang: String,
    pub max_chars: usize,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: String,
    pub tokens: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ocr: OcrSettings {
                language: "jpn".to_string(),
                upscale: DEFAULT_UPSCALE,
                vertical_ratio: VERTICAL_TEXT_RATIO,
                min_text_chars: MIN_TEXT_CHARS,
                min_selection_px: MIN_SELECTION_PX,
                preserve_interword_spaces: true,
                tesseract_path: "tesseract".to_string(),
            },
            remote: RemoteSettings::default(),
            translation: TranslationSettings {
                provider: TranslationProvider::default(),
                url: None,
                model: None,
                source_lang: "ja".to_string(),
                target_lang: "en".to_string(),
                max_chars: DEFAULT_MAX_CHARS,
            },
            store_path: paths::default_store_path(),
            server: ServerSettings {
                addr: "127.0.0.1:8787".to_string(),
                tokens: Vec::new(),
            },
            session_user: None,
            session_token: None,
        }
    }
}

impl Settings {
    pub fn orchestrator_options(&self, mode: RecognitionMode) -> OrchestratorOptions {
        OrchestratorOptions {
            mode,
            crop: CropOptions {
                upscale: self.ocr.upscale,
                vertical_ratio: self.ocr.vertical_ratio,
            },
            min_text_chars: self.ocr.min_text_chars,
        }
    }

    pub fn tesseract_config(&self) -> TesseractConfig {
        TesseractConfig {
            binary: self.ocr.tesseract_path.clone(),
            language: self.ocr.language.clone(),
            preserve_interword_spaces: self.ocr.preserve_interword_spaces,
        }
    }

    pub fn session(&self) -> Option<Session> {
        Session::resolve(self.session_user.as_deref(), self.session_token.as_deref())
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    ocr: Option<OcrFile>,
    remote: Option<RemoteFile>,
    translation: Option<TranslationFile>,
    store: Option<StoreFile>,
    server: Option<ServerFile>,
    session: Option<SessionFile>,
}

#[derive(Debug, Default, Deserialize)]
struct OcrFile {
    language: Option<String>,
    upscale: Option<u32>,
    vertical_ratio: Option<f64>,
    min_text_chars: Option<usize>,
    min_selection_px: Option<f64>,
    preserve_interword_spaces: Option<bool>,
    tesseract_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RemoteFile {
    url: Option<String>,
    mode: Option<RecognitionMode>,
}

#[derive(Debug, Default, Deserialize)]
struct TranslationFile {
    provider: Option<TranslationProvider>,
    url: Option<String>,
    model: Option<String>,
    source_lang: Option<String>,
    target_lang: Option<String>,
    max_chars: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct StoreFile {
    path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerFile {
    addr: Option<String>,
    tokens: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionFile {
    user: Option<String>,
    token: Option<String>,
}

pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    ensure_home_settings_file()?;

    let mut ordered_paths = Vec::new();
    ordered_paths.push(PathBuf::from("settings.toml"));
    ordered_paths.push(PathBuf::from("settings.local.toml"));

    if let Some(home) = paths::settings_dir() {
        ordered_paths.push(home.join("settings.toml"));
        ordered_paths.push(home.join("settings.local.toml"));
    }

    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            let parsed: SettingsFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
            settings.merge(parsed);
        }
    }

    Ok(settings)
}

impl Settings {
    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(ocr) = incoming.ocr {
            if let Some(language) = non_blank(ocr.language) {
                self.ocr.language = language;
            }
            if let Some(upscale) = ocr.upscale
                && upscale > 0
            {
                self.ocr.upscale = upscale;
            }
            if let Some(ratio) = ocr.vertical_ratio
                && ratio > 0.0
            {
                self.ocr.vertical_ratio = ratio;
            }
            if let Some(min_chars) = ocr.min_text_chars {
                self.ocr.min_text_chars = min_chars;
            }
            if let Some(min_px) = ocr.min_selection_px
                && min_px >= 0.0
            {
                self.ocr.min_selection_px = min_px;
            }
            if let Some(preserve) = ocr.preserve_interword_spaces {
                self.ocr.preserve_interword_spaces = preserve;
            }
            if let Some(binary) = non_blank(ocr.tesseract_path) {
                self.ocr.tesseract_path = binary;
            }
        }
        if let Some(remote) = incoming.remote {
            if let Some(url) = non_blank(remote.url) {
                self.remote.url = Some(url);
            }
            if let Some(mode) = remote.mode {
                self.remote.mode = mode;
            }
        }
        if let Some(translation) = incoming.translation {
            if let Some(provider) = translation.provider {
                self.translation.provider = provider;
            }
            if let Some(url) = non_blank(translation.url) {
                self.translation.url = Some(url);
            }
            if let Some(model) = non_blank(translation.model) {
                self.translation.model = Some(model);
            }
            if let Some(lang) = non_blank(translation.source_lang) {
                self.translation.source_lang = lang;
            }
            if let Some(lang) = non_blank(translation.target_lang) {
                self.translation.target_lang = lang;
            }
            if let Some(max_chars) = translation.max_chars
                && max_chars > 0
            {
                self.translation.max_chars = max_chars;
            }
        }
        if let Some(store) = incoming.store
            && let Some(path) = store.path.as_deref().and_then(paths::expand_path)
        {
            self.store_path = path;
        }
        if let Some(server) = incoming.server {
            if let Some(addr) = non_blank(server.addr) {
                self.server.addr = addr;
            }
            if let Some(tokens) = server.tokens {
                self.server.tokens = tokens
                    .into_iter()
                    .map(|token| token.trim().to_string())
                    .filter(|token| !token.is_empty())
                    .collect();
            }
        }
        if let Some(session) = incoming.session {
            if let Some(user) = non_blank(session.user) {
                self.session_user = Some(user);
            }
            if let Some(token) = non_blank(session.token) {
                self.session_token = Some(token);
            }
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn ensure_home_settings_file() -> Result<()> {
    let Some(home) = paths::settings_dir() else {
        return Ok(());
    };
    fs::create_dir_all(&home)
        .with_context(|| format!("failed to create settings directory: {}", home.display()))?;
    let path = home.join("settings.toml");
    if !path.exists() {
        fs::write(&path, DEFAULT_SETTINGS_TOML)
            .with_context(|| format!("failed to write settings: {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::with_temp_home;

    #[test]
    fn embedded_defaults_match_builtin_values() {
        let parsed: SettingsFile = toml::from_str(DEFAULT_SETTINGS_TOML).unwrap();
        let mut settings = Settings::default();
        settings.merge(parsed);
        assert_eq!(settings.ocr.language, "jpn");
        assert_eq!(settings.ocr.upscale, 2);
        assert_eq!(settings.ocr.vertical_ratio, 1.2);
        assert_eq!(settings.ocr.min_text_chars, 2);
        assert_eq!(settings.remote.mode, RecognitionMode::RemoteFirst);
        assert_eq!(settings.translation.provider, TranslationProvider::Http);
        assert_eq!(settings.translation.max_chars, 500);
        assert_eq!(settings.server.addr, "127.0.0.1:8787");
        assert!(settings.server.tokens.is_empty());
    }

    #[test]
    fn home_file_is_created_and_layers_merge() {
        with_temp_home(|home| {
            let extra = home.join("extra.toml");
            fs::write(
                &extra,
                r#"
[remote]
mode = "local-only"

[translation]
provider = "openai"
model = "  "

[store]
path = "~/manga/store.json"

[server]
tokens = ["a", " ", "b "]
"#,
            )
            .unwrap();
            let settings = load_settings(Some(&extra)).unwrap();
            assert!(home.join(".manga-region-translator/settings.toml").exists());
            assert_eq!(settings.remote.mode, RecognitionMode::LocalOnly);
            assert_eq!(settings.translation.provider, TranslationProvider::OpenAI);
            assert_eq!(settings.translation.model, None);
            assert_eq!(settings.store_path, home.join("manga/store.json"));
            assert_eq!(settings.server.tokens, vec!["a", "b"]);
        });
    }

    #[test]
    fn home_local_file_overrides_home_file() {
        with_temp_home(|home| {
            let dir = home.join(".manga-region-translator");
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("settings.local.toml"), "[ocr]\nupscale = 3\n").unwrap();
            let settings = load_settings(None).unwrap();
            assert_eq!(settings.ocr.upscale, 3);
            assert_eq!(settings.orchestrator_options(RecognitionMode::LocalOnly).crop.upscale, 3);
        });
    }

    #[test]
    fn unknown_mode_is_rejected() {
        with_temp_home(|home| {
            let extra = home.join("bad.toml");
            fs::write(&extra, "[remote]\nmode = \"sideways\"\n").unwrap();
            let err = load_settings(Some(&extra)).unwrap_err();
            assert!(format!("{:#}", err).contains("failed to parse settings"));
        });
    }

    #[test]
    fn missing_extra_file_is_an_error() {
        with_temp_home(|home| {
            let err = load_settings(Some(&home.join("nope.toml"))).unwrap_err();
            assert!(err.to_string().contains("settings file not found"));
        });
    }
}
