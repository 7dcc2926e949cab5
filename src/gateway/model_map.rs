//! Model identifier normalization. Hosts send anything from bare family
//! names to provider-prefixed effort variants; the backend only accepts the
//! canonical family ids.

use std::collections::HashMap;

use once_cell::sync::Lazy;

pub const MODEL_GPT_52_CODEX: &str = "gpt-5.2-codex";
pub const MODEL_GPT_52: &str = "gpt-5.2";
pub const MODEL_CODEX_MAX: &str = "gpt-5.1-codex-max";
pub const MODEL_CODEX_MINI: &str = "codex-mini-latest";
pub const MODEL_GPT_51_CODEX: &str = "gpt-5.1-codex";
pub const MODEL_GPT_51: &str = "gpt-5.1";

/// Known effort-suffixed aliases that map straight to a family.
static CANONICAL_IDS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("gpt-5.1-codex-low", MODEL_GPT_51_CODEX),
        ("gpt-5.1-codex-medium", MODEL_GPT_51_CODEX),
        ("gpt-5.1-codex-high", MODEL_GPT_51_CODEX),
        ("gpt-5.1-codex-mini", MODEL_CODEX_MINI),
        ("gpt-5.2-codex-low", MODEL_GPT_52_CODEX),
        ("gpt-5.2-codex-medium", MODEL_GPT_52_CODEX),
        ("gpt-5.2-codex-high", MODEL_GPT_52_CODEX),
        ("gpt-5.2-codex-xhigh", MODEL_GPT_52_CODEX),
        ("gpt-5.1-codex-max-xhigh", MODEL_CODEX_MAX),
        ("codex-mini", MODEL_CODEX_MINI),
    ])
});

/// Strips a provider prefix, consults the alias table, then walks a
/// most-specific-first substring ladder. Always returns a canonical family.
pub fn normalize_model(model: &str) -> &'static str {
    let bare = model.rsplit('/').next().unwrap_or(model).trim();
    if let Some(canonical) = CANONICAL_IDS.get(bare) {
        return canonical;
    }
    let lower = bare.to_ascii_lowercase();
    if lower.contains("5.2-codex") {
        MODEL_GPT_52_CODEX
    } else if lower.contains("5.2") {
        MODEL_GPT_52
    } else if lower.contains("codex-max") {
        MODEL_CODEX_MAX
    } else if lower.contains("codex-mini") {
        MODEL_CODEX_MINI
    } else if lower.contains("codex") {
        MODEL_GPT_51_CODEX
    } else {
        // "5.1" and anything unrecognized both land on the 5.1 base family.
        MODEL_GPT_51
    }
}

/// Which instruction text a family receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFamilyTag {
    Gpt52Codex,
    CodexMax,
    Codex,
    Gpt52,
    Gpt51,
}

impl ModelFamilyTag {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelFamilyTag::Gpt52Codex => "gpt-5.2-codex",
            ModelFamilyTag::CodexMax => "codex-max",
            ModelFamilyTag::Codex => "codex",
            ModelFamilyTag::Gpt52 => "gpt-5.2",
            ModelFamilyTag::Gpt51 => "gpt-5.1",
        }
    }
}

pub fn family_tag(canonical: &str) -> ModelFamilyTag {
    match canonical {
        MODEL_GPT_52_CODEX => ModelFamilyTag::Gpt52Codex,
        MODEL_CODEX_MAX => ModelFamilyTag::CodexMax,
        MODEL_GPT_52 => ModelFamilyTag::Gpt52,
        MODEL_GPT_51_CODEX | MODEL_CODEX_MINI => ModelFamilyTag::Codex,
        _ => ModelFamilyTag::Gpt51,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningEffort {
    None,
    Minimal,
    Low,
    Medium,
    High,
    XHigh,
}

impl ReasoningEffort {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Some(Self::None),
            "minimal" => Some(Self::Minimal),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "xhigh" => Some(Self::XHigh),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::XHigh => "xhigh",
        }
    }
}

/// Per-family effort envelope plus the coercion applied to out-of-range
/// requests.
#[derive(Debug, Clone, Copy)]
pub struct ReasoningProfile {
    pub default_effort: ReasoningEffort,
    pub supported: &'static [ReasoningEffort],
}

impl ReasoningProfile {
    pub fn supports(&self, effort: ReasoningEffort) -> bool {
        self.supported.contains(&effort)
    }

    /// Out-of-range efforts move to the nearest supported level: `xhigh`
    /// downgrades to `high`, `none`/`minimal` upgrade to `low`, and anything
    /// still unsupported lands on the family default.
    pub fn coerce(&self, effort: ReasoningEffort) -> ReasoningEffort {
        if self.supports(effort) {
            return effort;
        }
        let nearest = match effort {
            ReasoningEffort::XHigh => ReasoningEffort::High,
            ReasoningEffort::None | ReasoningEffort::Minimal => ReasoningEffort::Low,
            other => other,
        };
        if self.supports(nearest) {
            nearest
        } else {
            self.default_effort
        }
    }
}

pub fn reasoning_profile(canonical: &str) -> ReasoningProfile {
    use ReasoningEffort::*;
    match canonical {
        MODEL_GPT_52_CODEX => ReasoningProfile {
            default_effort: Medium,
            supported: &[Low, Medium, High, XHigh],
        },
        MODEL_GPT_52 => ReasoningProfile {
            default_effort: Medium,
            supported: &[None, Low, Medium, High, XHigh],
        },
        MODEL_CODEX_MAX => ReasoningProfile {
            default_effort: High,
            supported: &[Low, Medium, High, XHigh],
        },
        MODEL_CODEX_MINI => ReasoningProfile {
            default_effort: Medium,
            supported: &[Medium, High],
        },
        MODEL_GPT_51_CODEX => ReasoningProfile {
            default_effort: Medium,
            supported: &[Low, Medium, High],
        },
        _ => ReasoningProfile {
            default_effort: Medium,
            supported: &[None, Minimal, Low, Medium, High],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_prefix_is_stripped() {
        assert_eq!(normalize_model("openai/gpt-5.2-codex"), MODEL_GPT_52_CODEX);
        assert_eq!(normalize_model("github-copilot/gpt-5.1"), MODEL_GPT_51);
    }

    #[test]
    fn canonical_table_wins_before_the_ladder() {
        assert_eq!(normalize_model("gpt-5.1-codex-high"), MODEL_GPT_51_CODEX);
        assert_eq!(normalize_model("gpt-5.1-codex-mini"), MODEL_CODEX_MINI);
        assert_eq!(normalize_model("codex-mini"), MODEL_CODEX_MINI);
    }

    #[test]
    fn ladder_prefers_most_specific_family() {
        assert_eq!(normalize_model("my-gpt-5.2-codex-preview"), MODEL_GPT_52_CODEX);
        assert_eq!(normalize_model("gpt-5.2-turbo"), MODEL_GPT_52);
        assert_eq!(normalize_model("GPT-5.1-Codex-Max"), MODEL_CODEX_MAX);
        assert_eq!(normalize_model("codex"), MODEL_GPT_51_CODEX);
        assert_eq!(normalize_model("gpt-5.1"), MODEL_GPT_51);
        assert_eq!(normalize_model("something-else"), MODEL_GPT_51);
    }

    #[test]
    fn normalization_is_idempotent() {
        let samples = [
            "openai/gpt-5.2-codex-high",
            "gpt-5.1-codex-max-xhigh",
            "codex-mini",
            "codex",
            "gpt-5.2",
            "totally-unknown",
        ];
        for sample in samples {
            let once = normalize_model(sample);
            assert_eq!(normalize_model(once), once, "not idempotent for {sample}");
        }
    }

    #[test]
    fn family_tags_cover_all_canonicals() {
        assert_eq!(family_tag(MODEL_GPT_52_CODEX), ModelFamilyTag::Gpt52Codex);
        assert_eq!(family_tag(MODEL_CODEX_MAX), ModelFamilyTag::CodexMax);
        assert_eq!(family_tag(MODEL_GPT_51_CODEX), ModelFamilyTag::Codex);
        assert_eq!(family_tag(MODEL_CODEX_MINI), ModelFamilyTag::Codex);
        assert_eq!(family_tag(MODEL_GPT_52), ModelFamilyTag::Gpt52);
        assert_eq!(family_tag(MODEL_GPT_51), ModelFamilyTag::Gpt51);
    }

    #[test]
    fn codex_mini_forces_medium_or_high() {
        let profile = reasoning_profile(MODEL_CODEX_MINI);
        assert_eq!(profile.coerce(ReasoningEffort::Low), ReasoningEffort::Medium);
        assert_eq!(profile.coerce(ReasoningEffort::None), ReasoningEffort::Medium);
        assert_eq!(profile.coerce(ReasoningEffort::XHigh), ReasoningEffort::High);
        assert_eq!(profile.coerce(ReasoningEffort::High), ReasoningEffort::High);
    }

    #[test]
    fn xhigh_only_on_52_family_and_codex_max() {
        assert!(reasoning_profile(MODEL_GPT_52).supports(ReasoningEffort::XHigh));
        assert!(reasoning_profile(MODEL_GPT_52_CODEX).supports(ReasoningEffort::XHigh));
        assert!(reasoning_profile(MODEL_CODEX_MAX).supports(ReasoningEffort::XHigh));
        assert_eq!(
            reasoning_profile(MODEL_GPT_51_CODEX).coerce(ReasoningEffort::XHigh),
            ReasoningEffort::High
        );
        assert_eq!(
            reasoning_profile(MODEL_GPT_51).coerce(ReasoningEffort::XHigh),
            ReasoningEffort::High
        );
    }

    #[test]
    fn none_only_on_general_families() {
        assert!(reasoning_profile(MODEL_GPT_52).supports(ReasoningEffort::None));
        assert!(reasoning_profile(MODEL_GPT_51).supports(ReasoningEffort::None));
        assert_eq!(
            reasoning_profile(MODEL_GPT_52_CODEX).coerce(ReasoningEffort::None),
            ReasoningEffort::Low
        );
        assert_eq!(
            reasoning_profile(MODEL_CODEX_MAX).coerce(ReasoningEffort::None),
            ReasoningEffort::Low
        );
    }

    #[test]
    fn minimal_upgrades_to_low_outside_lightweight_families() {
        assert!(reasoning_profile(MODEL_GPT_51).supports(ReasoningEffort::Minimal));
        assert_eq!(
            reasoning_profile(MODEL_GPT_52_CODEX).coerce(ReasoningEffort::Minimal),
            ReasoningEffort::Low
        );
    }
}
