//! Theme and language preferences.
//!
//! Both are stored in cookies and written only through `PreferenceCookies`,
//! so there is one writer per key and the last write wins.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};

pub const THEME_COOKIE: &str = "fff_theme";
pub const LANGUAGE_COOKIE: &str = "fff_lang";

/// One year
const PREFERENCE_MAX_AGE_DAYS: i64 = 365;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
            Theme::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "light" => Some(Theme::Light),
            "dark" => Some(Theme::Dark),
            "system" => Some(Theme::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Fr,
    Es,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Fr => "fr",
            Language::Es => "es",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "en" => Some(Language::En),
            "fr" => Some(Language::Fr),
            "es" => Some(Language::Es),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    pub theme: Theme,
    pub language: Language,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PreferenceUpdate {
    #[serde(default)]
    pub theme: Option<Theme>,
    #[serde(default)]
    pub language: Option<Language>,
}

pub struct PreferenceCookies;

impl PreferenceCookies {
    /// Current preferences; unknown or missing cookie values fall back to defaults
    pub fn read(jar: &CookieJar) -> Preferences {
        Preferences {
            theme: jar
                .get(THEME_COOKIE)
                .and_then(|c| Theme::parse(c.value()))
                .unwrap_or_default(),
            language: jar
                .get(LANGUAGE_COOKIE)
                .and_then(|c| Language::parse(c.value()))
                .unwrap_or_default(),
        }
    }

    pub fn write(jar: CookieJar, update: PreferenceUpdate) -> (CookieJar, Preferences) {
        let mut jar = jar;
        if let Some(theme) = update.theme {
            jar = jar.add(preference_cookie(THEME_COOKIE, theme.as_str()));
        }
        if let Some(language) = update.language {
            jar = jar.add(preference_cookie(LANGUAGE_COOKIE, language.as_str()));
        }
        let preferences = Self::read(&jar);
        (jar, preferences)
    }
}

fn preference_cookie(name: &'static str, value: &'static str) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .same_site(SameSite::Lax)
        .max_age(time::Duration::days(PREFERENCE_MAX_AGE_DAYS))
        .build()
}
