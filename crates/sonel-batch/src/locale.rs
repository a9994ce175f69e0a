//! Locale dictionary for the analyzer's user-visible strings.
//!
//! Every string the drivers match against is addressed through a [`UiToken`].
//! Each token carries surface forms for the four languages the analyzer ships
//! with. Matching is done on normalized text, so markup, punctuation, case and
//! stray whitespace in the accessibility names never matter.

use crate::errors::LocaleError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

static MARKUP_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s.]").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Measurement-node fragments that make a tree item selection-worthy.
pub const SELECTION_FRAGMENTS: &[&str] = &[
    "tensión u",
    "tensión ul-l",
    "tensión u l-l",
    "potencia p",
    "potencia q1",
    "potencia sn",
    "potencia s",
];

static NORMALIZED_FRAGMENTS: Lazy<Vec<String>> =
    Lazy::new(|| SELECTION_FRAGMENTS.iter().map(|f| normalize(f)).collect());

/// Lowercase, trim, drop markup tags, drop punctuation other than dots and
/// collapse whitespace.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let without_tags = MARKUP_TAG.replace_all(lowered.trim(), "");
    let without_punct = NON_WORD.replace_all(&without_tags, "");
    WHITESPACE
        .replace_all(without_punct.trim(), " ")
        .into_owned()
}

/// True when the normalized text contains any selection fragment.
pub fn is_selection_worthy(normalized_text: &str) -> bool {
    NORMALIZED_FRAGMENTS
        .iter()
        .any(|fragment| normalized_text.contains(fragment.as_str()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "es")]
    Spanish,
    #[serde(rename = "en")]
    English,
    #[serde(rename = "pl")]
    Polish,
    #[serde(rename = "de")]
    German,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::Spanish,
        Language::English,
        Language::Polish,
        Language::German,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Language::Spanish => "es",
            Language::English => "en",
            Language::Polish => "pl",
            Language::German => "de",
        }
    }

    fn index(self) -> usize {
        match self {
            Language::Spanish => 0,
            Language::English => 1,
            Language::Polish => 2,
            Language::German => 3,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = LocaleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "es" | "spanish" | "español" => Ok(Language::Spanish),
            "en" | "english" => Ok(Language::English),
            "pl" | "polish" | "polski" => Ok(Language::Polish),
            "de" | "german" | "deutsch" => Ok(Language::German),
            other => Err(LocaleError::UnknownLanguage(other.to_string())),
        }
    }
}

/// Symbolic identifier of a UI string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UiToken {
    /// Keyword present in every analysis window title.
    Analysis,
    /// Title suffix of the configuration window ("configuration 1").
    ConfigurationSuffix,
    AnalysisData,
    Configuration,
    Measurements,
    User,
    Average,
    Minimum,
    Instantaneous,
    Maximum,
    SelectAll,
    ExpandAll,
    Report,
    Save,
    /// Default group of the save dialog that holds the file name edit.
    Pictures,
}

impl UiToken {
    pub const ALL: [UiToken; 15] = [
        UiToken::Analysis,
        UiToken::ConfigurationSuffix,
        UiToken::AnalysisData,
        UiToken::Configuration,
        UiToken::Measurements,
        UiToken::User,
        UiToken::Average,
        UiToken::Minimum,
        UiToken::Instantaneous,
        UiToken::Maximum,
        UiToken::SelectAll,
        UiToken::ExpandAll,
        UiToken::Report,
        UiToken::Save,
        UiToken::Pictures,
    ];

    pub fn key(self) -> &'static str {
        match self {
            UiToken::Analysis => "analysis",
            UiToken::ConfigurationSuffix => "configuration_suffix",
            UiToken::AnalysisData => "analysis_data",
            UiToken::Configuration => "configuration",
            UiToken::Measurements => "measurements",
            UiToken::User => "user",
            UiToken::Average => "average",
            UiToken::Minimum => "minimum",
            UiToken::Instantaneous => "instantaneous",
            UiToken::Maximum => "maximum",
            UiToken::SelectAll => "select_all",
            UiToken::ExpandAll => "expand_all",
            UiToken::Report => "report",
            UiToken::Save => "save",
            UiToken::Pictures => "pictures",
        }
    }

    /// Surface strings per language, indexed like [`Language::ALL`].
    fn surface(self) -> [&'static [&'static str]; 4] {
        match self {
            UiToken::Analysis => [&["Análisis"], &["Analysis"], &["Analiza"], &["Analyse"]],
            UiToken::ConfigurationSuffix => [
                &["Configuración 1"],
                &["Configuration 1"],
                &["Konfiguracja 1"],
                &["Konfiguration 1"],
            ],
            UiToken::AnalysisData => [
                &["Análisis de datos", "Analizar datos"],
                &["Data analysis", "Analyze data"],
                &["Analiza danych"],
                &["Datenanalyse", "Daten analysieren"],
            ],
            UiToken::Configuration => [
                &["Configuración"],
                &["Configuration"],
                &["Konfiguracja"],
                &["Konfiguration"],
            ],
            UiToken::Measurements => [
                &["Mediciones", "Medidas"],
                &["Measurements"],
                &["Pomiary"],
                &["Messungen"],
            ],
            UiToken::User => [&["Usuario"], &["User"], &["Użytkownik"], &["Benutzer"]],
            UiToken::Average => [&["Promedio", "Valor medio"], &["Average"], &["Średnia"], &["Mittelwert"]],
            UiToken::Minimum => [&["Mínimo"], &["Minimum"], &["Minimum"], &["Minimum"]],
            UiToken::Instantaneous => [
                &["Instantáneo", "Instantánea"],
                &["Instantaneous"],
                &["Chwilowa", "Chwilowe"],
                &["Momentanwert"],
            ],
            UiToken::Maximum => [&["Máximo"], &["Maximum"], &["Maksimum"], &["Maximum"]],
            UiToken::SelectAll => [
                &["Seleccionar todo", "Marcar todo"],
                &["Select all"],
                &["Zaznacz wszystko"],
                &["Alle auswählen"],
            ],
            UiToken::ExpandAll => [
                &["Expandir todo", "Desplegar todo"],
                &["Expand all"],
                &["Rozwiń wszystko"],
                &["Alle erweitern", "Alle aufklappen"],
            ],
            UiToken::Report => [
                &["Informe", "Reporte"],
                &["Report"],
                &["Raport"],
                &["Bericht"],
            ],
            UiToken::Save => [&["Guardar"], &["Save"], &["Zapisz"], &["Speichern"]],
            UiToken::Pictures => [
                &["Imágenes"],
                &["Pictures", "Images"],
                &["Obrazy"],
                &["Bilder"],
            ],
        }
    }
}

impl fmt::Display for UiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for UiToken {
    type Err = LocaleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UiToken::ALL
            .iter()
            .copied()
            .find(|token| token.key() == s)
            .ok_or_else(|| LocaleError::UnknownToken(s.to_string()))
    }
}

/// Translates tokens to surface strings and matches observed UI text.
#[derive(Debug, Clone)]
pub struct LocaleDictionary {
    preferred: Option<Language>,
    extension_marker: String,
}

impl LocaleDictionary {
    pub fn new(preferred: Option<Language>, extension_marker: impl Into<String>) -> Self {
        Self {
            preferred,
            extension_marker: normalize(&extension_marker.into()),
        }
    }

    fn language_order(&self) -> Vec<Language> {
        let mut order = Vec::with_capacity(Language::ALL.len());
        if let Some(preferred) = self.preferred {
            order.push(preferred);
        }
        order.extend(
            Language::ALL
                .iter()
                .copied()
                .filter(|lang| Some(*lang) != self.preferred),
        );
        order
    }

    /// All surface forms of `token`, preferred language first, deduplicated.
    pub fn candidates(&self, token: UiToken) -> Vec<&'static str> {
        let surface = token.surface();
        let mut out: Vec<&'static str> = Vec::new();
        for lang in self.language_order() {
            for candidate in surface[lang.index()] {
                if !out.contains(candidate) {
                    out.push(candidate);
                }
            }
        }
        out
    }

    /// Lookup by token key; unknown keys are a programming error.
    pub fn candidates_for_key(&self, key: &str) -> Result<Vec<&'static str>, LocaleError> {
        let token = UiToken::from_str(key)?;
        Ok(self.candidates(token))
    }

    pub fn matches(&self, observed_text: &str, token: UiToken) -> bool {
        let observed = normalize(observed_text);
        if observed.is_empty() {
            return false;
        }
        self.candidates(token)
            .iter()
            .any(|candidate| observed.contains(normalize(candidate).as_str()))
    }

    pub fn title_has_analysis_keyword(&self, title: &str) -> bool {
        self.matches(title, UiToken::Analysis)
    }

    fn title_ends_with_configuration_suffix(&self, title: &str) -> bool {
        let observed = normalize(title);
        self.candidates(UiToken::ConfigurationSuffix)
            .iter()
            .any(|suffix| observed.ends_with(normalize(suffix).as_str()))
    }

    fn title_is_capture_view(&self, title: &str) -> bool {
        self.title_has_analysis_keyword(title)
            && normalize(title).contains(self.extension_marker.as_str())
    }

    /// Analysis keyword and capture extension present, no configuration suffix.
    pub fn window_title_matches_analysis(&self, title: &str) -> bool {
        self.title_is_capture_view(title) && !self.title_ends_with_configuration_suffix(title)
    }

    /// Analysis keyword and capture extension present, ends with the
    /// configuration suffix.
    pub fn window_title_matches_configuration(&self, title: &str) -> bool {
        self.title_is_capture_view(title) && self.title_ends_with_configuration_suffix(title)
    }
}
