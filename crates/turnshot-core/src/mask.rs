//! Literal-text masking over cloned fragments.
//!
//! Rules are compiled once per profile and applied to every text leaf
//! of a clone in document order. Later rules operate on the output of
//! earlier ones, never on the original text. The live document is
//! never touched; callers hand in clones.

use anyhow::{Context, Result};
use regex::{NoExpand, RegexBuilder};

use crate::document::Element;
use crate::profile::MaskRule;

struct CompiledRule {
    re: regex::Regex,
    to: String,
}

/// A profile's mask rules, compiled for repeated application.
pub struct MaskSet {
    rules: Vec<CompiledRule>,
}

impl MaskSet {
    /// Compiles `rules` with one shared case-sensitivity flag.
    ///
    /// Literals are regex-escaped, so every rule is a plain substring
    /// match. The loader has already dropped empty literals; they are
    /// skipped here as well so a hand-built rule list cannot produce a
    /// match-everything pattern.
    pub fn compile(rules: &[MaskRule], case_insensitive: bool) -> Result<MaskSet> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            if rule.from.trim().is_empty() {
                continue;
            }
            let re = RegexBuilder::new(&regex::escape(&rule.from))
                .case_insensitive(case_insensitive)
                .build()
                .with_context(|| format!("compiling mask rule {:?}", rule.from))?;
            compiled.push(CompiledRule {
                re,
                to: rule.to.clone(),
            });
        }
        Ok(MaskSet { rules: compiled })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rewrites every text leaf of `root` in place.
    pub fn apply(&self, root: &mut Element) {
        if self.rules.is_empty() {
            return;
        }
        root.for_each_text_mut(&mut |text| {
            for rule in &self.rules {
                if rule.re.is_match(text) {
                    *text = rule
                        .re
                        .replace_all(text, NoExpand(&rule.to))
                        .into_owned();
                }
            }
        });
    }

    /// Masks a plain string (used by the text-synthesis tier).
    pub fn apply_str(&self, text: &str) -> String {
        let mut out = text.to_string();
        for rule in &self.rules {
            if rule.re.is_match(&out) {
                out = rule.re.replace_all(&out, NoExpand(&rule.to)).into_owned();
            }
        }
        out
    }
}
