use crate::error::{ReaderError, Result};
use crate::models::ReplaceRule;
use crate::services::store::KeyValueStore;
use once_cell::sync::Lazy;
use regex::{NoExpand, Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// Store key holding the user's replace rules as a JSON array.
pub const RULES_KEY: &str = "replaceRules";

const FULL_WIDTH_SPACE: char = '\u{3000}';

// Compiled-size cap for user supplied patterns
const RULE_SIZE_LIMIT: usize = 1 << 20;

static RE_EXTRA_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").unwrap());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    pub normalize_indent: bool,
    /// Number of full-width spaces prefixed to every non-blank line.
    pub indent_width: usize,
    pub normalize_line_breaks: bool,
    pub max_consecutive_breaks: usize,
    pub trim_lines: bool,
    pub remove_extra_spaces: bool,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            normalize_indent: true,
            indent_width: 2,
            normalize_line_breaks: true,
            max_consecutive_breaks: 1,
            trim_lines: true,
            remove_extra_spaces: true,
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    regex: Regex,
    replacement: String,
    literal: bool,
}

/// Rewrites raw chapter text for display.
///
/// Owns its rule list; edits made elsewhere are picked up only through
/// [`ContentNormalizer::refresh`].
#[derive(Debug, Clone)]
pub struct ContentNormalizer {
    config: NormalizerConfig,
    rules: Vec<ReplaceRule>,
    compiled: Vec<CompiledRule>,
    line_breaks: Option<Regex>,
}

impl Default for ContentNormalizer {
    fn default() -> Self {
        Self::new(NormalizerConfig::default())
    }
}

impl ContentNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        let line_breaks = build_line_break_regex(config.max_consecutive_breaks);
        Self {
            config,
            rules: Vec::new(),
            compiled: Vec::new(),
            line_breaks,
        }
    }

    /// Builds a normalizer and loads the persisted rules. A missing or
    /// unreadable rule set leaves the normalizer with no rules.
    pub fn load<S: KeyValueStore>(config: NormalizerConfig, store: &S) -> Self {
        let mut normalizer = Self::new(config);
        normalizer.refresh(store);
        normalizer
    }

    pub fn with_rules(mut self, rules: Vec<ReplaceRule>) -> Self {
        self.set_rules(rules);
        self
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    pub fn rules(&self) -> &[ReplaceRule] {
        &self.rules
    }

    /// Reloads the rule set from `store`.
    pub fn refresh<S: KeyValueStore>(&mut self, store: &S) {
        let rules = match store.get_json::<Vec<ReplaceRule>>(RULES_KEY) {
            Ok(rules) => rules.unwrap_or_default(),
            Err(err) => {
                tracing::error!(error = %err, "failed to load replace rules");
                Vec::new()
            }
        };
        tracing::debug!(rules = rules.len(), "replace rules loaded");
        self.set_rules(rules);
    }

    pub fn save_rules<S: KeyValueStore>(&self, store: &mut S) -> Result<()> {
        store.set_json(RULES_KEY, &self.rules)
    }

    pub fn add_rule(&mut self, rule: ReplaceRule) {
        self.rules.push(rule);
        self.recompile();
    }

    /// Returns false when no rule has the given id.
    pub fn set_rule_enabled(&mut self, id: &str, enabled: bool) -> bool {
        let Some(rule) = self.rules.iter_mut().find(|r| r.id == id) else {
            return false;
        };
        rule.enabled = enabled;
        self.recompile();
        true
    }

    pub fn remove_rule(&mut self, id: &str) -> Option<ReplaceRule> {
        let pos = self.rules.iter().position(|r| r.id == id)?;
        let removed = self.rules.remove(pos);
        self.recompile();
        Some(removed)
    }

    fn set_rules(&mut self, rules: Vec<ReplaceRule>) {
        self.rules = rules;
        self.recompile();
    }

    fn recompile(&mut self) {
        self.compiled = self
            .rules
            .iter()
            .filter(|rule| rule.enabled)
            .filter_map(|rule| match compile_rule(rule) {
                Ok(compiled) => Some(compiled),
                Err(err) => {
                    tracing::warn!(rule = %rule.id, error = %err, "skipping replace rule");
                    None
                }
            })
            .collect();
    }

    /// Runs the full pipeline: replace rules, line breaks, indentation, spaces.
    pub fn process(&self, raw: &str) -> String {
        if raw.is_empty() {
            return String::new();
        }

        let mut result = self.apply_rules(raw);
        if self.config.normalize_line_breaks {
            result = self.normalize_line_breaks(&result);
        }
        if self.config.normalize_indent {
            result = self.normalize_indent(&result);
        }
        if self.config.remove_extra_spaces {
            result = remove_extra_spaces(&result);
        }
        result
    }

    fn apply_rules(&self, content: &str) -> String {
        let mut result = content.to_string();
        for rule in &self.compiled {
            let replaced = if rule.literal {
                rule.regex.replace_all(&result, NoExpand(&rule.replacement))
            } else {
                rule.regex.replace_all(&result, rule.replacement.as_str())
            };
            result = replaced.into_owned();
        }
        result
    }

    fn normalize_line_breaks(&self, content: &str) -> String {
        let unified = content.replace("\r\n", "\n").replace('\r', "\n");
        match &self.line_breaks {
            Some(re) => re
                .replace_all(&unified, "\n".repeat(self.config.max_consecutive_breaks))
                .into_owned(),
            None => unified,
        }
    }

    fn normalize_indent(&self, content: &str) -> String {
        let indent: String = std::iter::repeat_n(FULL_WIDTH_SPACE, self.config.indent_width).collect();
        content
            .split('\n')
            .map(|line| {
                let body = if self.config.trim_lines {
                    line.trim_start()
                } else {
                    line
                };
                if body.trim().is_empty() {
                    String::new()
                } else {
                    format!("{indent}{body}")
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn compile_rule(rule: &ReplaceRule) -> Result<CompiledRule> {
    let source = if rule.is_regex {
        rule.pattern.clone()
    } else {
        regex::escape(&rule.pattern)
    };
    if source.is_empty() {
        return Err(ReaderError::RuleApplicationFailed {
            rule_id: rule.id.clone(),
            reason: "empty pattern".to_string(),
        });
    }
    let regex = RegexBuilder::new(&source)
        .size_limit(RULE_SIZE_LIMIT)
        .build()
        .map_err(|err| ReaderError::RuleApplicationFailed {
            rule_id: rule.id.clone(),
            reason: err.to_string(),
        })?;
    Ok(CompiledRule {
        regex,
        replacement: rule.replacement.clone(),
        literal: !rule.is_regex,
    })
}

/// Matches runs of more than `max` line breaks, counting whitespace-only lines as blank.
fn build_line_break_regex(max: usize) -> Option<Regex> {
    let pattern = format!(r"\n(?:[^\S\n]*\n){{{max},}}");
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(err) => {
            tracing::warn!(max, error = %err, "line break collapsing disabled");
            None
        }
    }
}

fn remove_extra_spaces(content: &str) -> String {
    content
        .split('\n')
        .map(|line| {
            let rest = line.trim_start();
            let leading = &line[..line.len() - rest.len()];
            format!("{leading}{}", RE_EXTRA_SPACES.replace_all(rest, " "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}
