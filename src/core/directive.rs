use crate::core::current_user;
use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::str::FromStr;
use strum::{Display, EnumString};

const DIRECTIVE_PREFIX: &str = "#SBATCH";
const SUBMIT_COMMAND: &str = "sbatch";

/// A single `--option=value` scheduler directive.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Directive {
    pub name: String,
    pub value: String,
}

impl Directive {
    pub fn new(name: impl Into<String>, value: impl ToString) -> Self {
        Self {
            name: name.into(),
            value: value.to_string(),
        }
    }

    /// Option name as sbatch expects it (`mem_per_cpu` -> `mem-per-cpu`).
    pub fn option(&self) -> String {
        self.name.replace('_', "-")
    }

    pub fn token(&self) -> String {
        format!("--{}={}", self.option(), self.value)
    }

    /// [`token`](Self::token) quoted for a shell word. Plain tokens are left
    /// untouched; anything with whitespace or shell metacharacters is escaped.
    /// sbatch strips the same quotes from `#SBATCH` lines.
    pub fn quoted_token(&self) -> String {
        let token = self.token();
        if token.chars().all(is_plain_char) {
            token
        } else {
            shell_escape::escape(token.into()).into_owned()
        }
    }
}

fn is_plain_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-_=/,.+:%@".contains(c)
}

impl FromStr for Directive {
    type Err = anyhow::Error;

    /// Parses `key=value` (a leading `--` is tolerated).
    fn from_str(s: &str) -> Result<Self> {
        let (name, value) = s
            .trim()
            .split_once('=')
            .ok_or_else(|| anyhow!("Invalid directive '{s}'. Expected format like 'key=value'"))?;
        let name = name.trim().trim_start_matches("--");
        if name.is_empty() {
            return Err(anyhow!("Directive name cannot be empty in '{s}'"));
        }
        Ok(Self::new(name, value.trim()))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum RenderStyle {
    /// `#SBATCH --key=value` lines followed by a blank line
    #[default]
    MultiLine,
    /// `sbatch --key=value ...` on one line
    SingleLine,
}

/// Ordered directive mapping. Keys are unique; re-inserting a key keeps its
/// original position and replaces the value.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DirectiveSet {
    entries: Vec<Directive>,
}

impl DirectiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, directive: Directive) {
        let option = directive.option();
        match self.entries.iter_mut().find(|d| d.option() == option) {
            Some(existing) => existing.value = directive.value,
            None => self.entries.push(directive),
        }
    }

    pub fn set(&mut self, name: &str, value: impl ToString) {
        self.insert(Directive::new(name, value));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let option = name.replace('_', "-");
        self.entries
            .iter()
            .find(|d| d.option() == option)
            .map(|d| d.value.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Directive> {
        self.entries.iter()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.entries.iter().map(Directive::token).collect()
    }

    pub fn quoted_tokens(&self) -> Vec<String> {
        self.entries.iter().map(Directive::quoted_token).collect()
    }

    pub fn render(&self, style: RenderStyle) -> String {
        match style {
            RenderStyle::MultiLine => {
                let mut out = String::new();
                for token in self.quoted_tokens() {
                    out.push_str(&format!("{DIRECTIVE_PREFIX} {token}\n"));
                }
                out.push('\n');
                out
            }
            RenderStyle::SingleLine => std::iter::once(SUBMIT_COMMAND.to_string())
                .chain(self.quoted_tokens())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

impl Extend<Directive> for DirectiveSet {
    fn extend<T: IntoIterator<Item = Directive>>(&mut self, iter: T) {
        for directive in iter {
            self.insert(directive);
        }
    }
}

impl FromIterator<Directive> for DirectiveSet {
    fn from_iter<T: IntoIterator<Item = Directive>>(iter: T) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

/// Resource request for one job submission.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    #[serde(default = "default_time")]
    pub time: String,
    #[serde(default = "default_ntasks")]
    pub ntasks: u32,
    /// SLURM account; the invoking user when unset
    #[serde(default)]
    pub account: Option<String>,
    /// Memory in MB
    #[serde(default = "default_mem")]
    pub mem: u64,
    /// Extra directives, rendered after the defaults in this order
    #[serde(default)]
    pub directives: Vec<Directive>,
}

fn default_time() -> String {
    "3:00:00".to_string()
}

fn default_ntasks() -> u32 {
    1
}

fn default_mem() -> u64 {
    8000
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self {
            time: default_time(),
            ntasks: default_ntasks(),
            account: None,
            mem: default_mem(),
            directives: vec![],
        }
    }
}

impl ResourceRequest {
    pub fn directive(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }

    pub fn directives(&self) -> DirectiveSet {
        self.directives_with_fallback(&current_user())
    }

    pub fn directives_with_fallback(&self, fallback_account: &str) -> DirectiveSet {
        let mut set = self.default_directives_with_fallback(fallback_account);
        set.extend(self.directives.iter().cloned());
        set
    }

    /// `time`, `ntasks`, `account` and `mem` only, without the extras.
    pub fn default_directives(&self) -> DirectiveSet {
        self.default_directives_with_fallback(&current_user())
    }

    pub fn default_directives_with_fallback(&self, fallback_account: &str) -> DirectiveSet {
        let account = self
            .account
            .as_deref()
            .filter(|a| !a.is_empty())
            .unwrap_or(fallback_account);

        let mut set = DirectiveSet::new();
        set.set("time", &self.time);
        set.set("ntasks", self.ntasks);
        set.set("account", account);
        set.set("mem", self.mem);
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn example_request() -> ResourceRequest {
        ResourceRequest {
            time: "3:00:00".to_string(),
            ntasks: 1,
            account: Some("acct".to_string()),
            mem: 8000,
            directives: vec![],
        }
    }

    #[test]
    fn renders_default_directives_in_order() {
        let rendered = example_request()
            .directives_with_fallback("nobody")
            .render(RenderStyle::MultiLine);
        assert_eq!(
            rendered,
            "#SBATCH --time=3:00:00\n#SBATCH --ntasks=1\n#SBATCH --account=acct\n#SBATCH --mem=8000\n\n"
        );
    }

    #[test]
    fn renders_single_line() {
        let rendered = example_request()
            .directives_with_fallback("nobody")
            .render(RenderStyle::SingleLine);
        assert_eq!(
            rendered,
            "sbatch --time=3:00:00 --ntasks=1 --account=acct --mem=8000"
        );
    }

    #[test]
    fn extra_directives_follow_defaults_with_hyphens() {
        let request = example_request()
            .directive(Directive::new("mem_per_cpu", "4000"))
            .directive(Directive::new("array", "0-3"));
        let set = request.directives_with_fallback("nobody");
        assert_eq!(
            set.tokens(),
            vec![
                "--time=3:00:00",
                "--ntasks=1",
                "--account=acct",
                "--mem=8000",
                "--mem-per-cpu=4000",
                "--array=0-3",
            ]
        );
    }

    #[test]
    fn missing_account_uses_fallback() {
        let request = ResourceRequest {
            account: None,
            ..example_request()
        };
        let rendered = request
            .directives_with_fallback("alice")
            .render(RenderStyle::MultiLine);
        assert!(rendered.contains("#SBATCH --account=alice\n"));
        assert!(!rendered.contains("None"));
    }

    #[test]
    fn missing_account_falls_back_to_current_user() {
        let request = ResourceRequest::default();
        let set = request.directives();
        assert_eq!(set.get("account"), Some(current_user().as_str()));
    }

    #[test]
    fn reinserting_key_keeps_position() {
        let mut set = DirectiveSet::new();
        set.set("time", "1:00:00");
        set.set("mem", 100);
        set.set("time", "2:00:00");
        assert_eq!(set.tokens(), vec!["--time=2:00:00", "--mem=100"]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn underscore_and_hyphen_names_collide() {
        let mut set = DirectiveSet::new();
        set.set("mem_per_cpu", 1);
        set.set("mem-per-cpu", 2);
        assert_eq!(set.tokens(), vec!["--mem-per-cpu=2"]);
        assert_eq!(set.get("mem_per_cpu"), Some("2"));
    }

    #[test]
    fn parses_directive_from_str() {
        let d: Directive = "mem_per_cpu=4000".parse().unwrap();
        assert_eq!(d, Directive::new("mem_per_cpu", "4000"));
        let d: Directive = "--partition=gpu".parse().unwrap();
        assert_eq!(d.token(), "--partition=gpu");
        assert!("novalue".parse::<Directive>().is_err());
        assert!("=x".parse::<Directive>().is_err());
    }

    #[test]
    fn values_with_spaces_stay_one_word() {
        let set = example_request()
            .directive(Directive::new("comment", "two words"))
            .directive(Directive::new("output", "/my jobs/log/T01_%A_%a.out"))
            .directives_with_fallback("nobody");

        assert_eq!(
            set.render(RenderStyle::SingleLine),
            "sbatch --time=3:00:00 --ntasks=1 --account=acct --mem=8000 \
             '--comment=two words' '--output=/my jobs/log/T01_%A_%a.out'"
        );
        let rendered = set.render(RenderStyle::MultiLine);
        assert!(rendered.contains("#SBATCH '--comment=two words'\n"));
        assert!(rendered.contains("#SBATCH --mem=8000\n"));
    }

    #[test]
    fn quoted_token_escapes_single_quotes() {
        let d = Directive::new("comment", "it's");
        assert_eq!(d.token(), "--comment=it's");
        assert_eq!(d.quoted_token(), "'--comment=it'\\''s'");
    }

    #[test]
    fn default_directives_exclude_extras() {
        let request = example_request().directive(Directive::new("partition", "gpu"));
        let set = request.default_directives_with_fallback("nobody");
        assert_eq!(set.len(), 4);
        assert_eq!(set.get("partition"), None);
    }

    #[test]
    fn render_style_from_str() {
        assert_eq!(
            "single-line".parse::<RenderStyle>().unwrap(),
            RenderStyle::SingleLine
        );
        assert_eq!(RenderStyle::MultiLine.to_string(), "multi-line");
    }

    fn directive_strategy() -> impl Strategy<Value = Directive> {
        ("[a-z][a-z_]{0,8}", "[A-Za-z0-9:.-]{1,10}").prop_map(|(n, v)| Directive::new(n, v))
    }

    proptest! {
        #[test]
        fn rendering_is_deterministic(extra in proptest::collection::vec(directive_strategy(), 0..6)) {
            let request = ResourceRequest { directives: extra, ..example_request() };
            let first = request.directives_with_fallback("nobody");
            let second = request.directives_with_fallback("nobody");
            prop_assert_eq!(first.render(RenderStyle::MultiLine), second.render(RenderStyle::MultiLine));
            prop_assert_eq!(first.render(RenderStyle::SingleLine), second.render(RenderStyle::SingleLine));
        }

        #[test]
        fn single_and_multi_line_share_tokens(extra in proptest::collection::vec(directive_strategy(), 0..6)) {
            let set = ResourceRequest { directives: extra, ..example_request() }
                .directives_with_fallback("nobody");

            let multi: BTreeSet<String> = set
                .render(RenderStyle::MultiLine)
                .lines()
                .filter_map(|l| l.strip_prefix("#SBATCH "))
                .map(str::to_string)
                .collect();
            let single: BTreeSet<String> = set
                .render(RenderStyle::SingleLine)
                .split_whitespace()
                .skip(1)
                .map(str::to_string)
                .collect();
            prop_assert_eq!(multi, single);
        }
    }
}
