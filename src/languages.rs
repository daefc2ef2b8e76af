/// A target language offered to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Language {
    pub code: &'static str,
    pub name: &'static str,
}

/// Languages the default translation model handles well, in display order.
pub const SUPPORTED_LANGUAGES: &[Language] = &[
    Language { code: "zh-TW", name: "繁體中文" },
    Language { code: "zh-CN", name: "简体中文" },
    Language { code: "en", name: "English" },
    Language { code: "ja", name: "日本語" },
    Language { code: "ko", name: "한국어" },
    Language { code: "es", name: "Español" },
    Language { code: "fr", name: "Français" },
    Language { code: "de", name: "Deutsch" },
    Language { code: "ru", name: "Русский" },
    Language { code: "ar", name: "العربية" },
    Language { code: "hi", name: "हिन्दी" },
    Language { code: "pt", name: "Português" },
    Language { code: "it", name: "Italiano" },
    Language { code: "nl", name: "Nederlands" },
    Language { code: "pl", name: "Polski" },
    Language { code: "tr", name: "Türkçe" },
    Language { code: "sv", name: "Svenska" },
    Language { code: "th", name: "ไทย" },
    Language { code: "vi", name: "Tiếng Việt" },
    Language { code: "id", name: "Bahasa Indonesia" },
];

pub fn find(code: &str) -> Option<&'static Language> {
    SUPPORTED_LANGUAGES
        .iter()
        .find(|lang| lang.code.eq_ignore_ascii_case(code))
}

/// Pick a default target language from a locale string such as `ja_JP.UTF-8`
/// or `zh-Hant-TW`.
pub fn default_target_for_locale(locale: &str) -> &'static str {
    let locale = locale.split('.').next().unwrap_or_default().replace('_', "-");

    if locale.starts_with("zh") {
        return if locale.contains("TW") || locale.contains("Hant") {
            "zh-TW"
        } else {
            "zh-CN"
        };
    }

    let lang_code = locale.split('-').next().unwrap_or_default();
    if lang_code.is_empty() {
        return "en";
    }

    SUPPORTED_LANGUAGES
        .iter()
        .find(|lang| lang.code.starts_with(lang_code))
        .map(|lang| lang.code)
        .unwrap_or("en")
}

/// Default target language for this process, derived from the usual locale
/// environment variables.
pub fn default_target_language() -> &'static str {
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|value| !value.is_empty() && value != "C" && value != "POSIX")
        .map(|locale| default_target_for_locale(&locale))
        .unwrap_or("en")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_target_for_locale() {
        assert_eq!(default_target_for_locale("ja_JP.UTF-8"), "ja");
        assert_eq!(default_target_for_locale("zh_TW.UTF-8"), "zh-TW");
        assert_eq!(default_target_for_locale("zh-Hant-HK"), "zh-TW");
        assert_eq!(default_target_for_locale("zh_CN"), "zh-CN");
        assert_eq!(default_target_for_locale("de_AT"), "de");
        assert_eq!(default_target_for_locale("xx_YY"), "en");
        assert_eq!(default_target_for_locale(""), "en");
    }

    #[test]
    fn test_find_is_case_insensitive() {
        assert_eq!(find("ZH-tw").map(|l| l.name), Some("繁體中文"));
        assert!(find("xx").is_none());
    }
}
