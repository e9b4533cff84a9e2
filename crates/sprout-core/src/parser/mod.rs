//! Parser for the spec syntax.
//!
//! ```text
//! hdf5@1.14: %gcc@12 +mpi~fortran api=v18 arch=linux-rhel9-zen3 ^zlib@1.3 ^openmpi+cuda
//! ```
//!
//! Sigils: `@` versions, `%` compiler, `+`/`~` boolean variants,
//! `name=value` valued variants (or `arch`/`platform`/`os`/`target`),
//! `^` starts a dependency constraint. A bare word names the package.

use crate::error::{SproutError, SproutResult};
use crate::types::{ArchSpec, CompilerSpec, DepTypes, Spec, VariantValue, VersionConstraint};
use std::collections::BTreeSet;
use std::str::FromStr;

/// Parse one spec, including any `^` dependency constraints
pub fn parse_spec(input: &str) -> SproutResult<Spec> {
    Parser::new(input).parse()
}

impl FromStr for Spec {
    type Err = SproutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_spec(s)
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn error(&self, message: impl Into<String>, position: usize) -> SproutError {
        SproutError::Parse {
            input: self.input.to_string(),
            message: message.into(),
            position,
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().map_or(false, char::is_whitespace) {
            self.bump();
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().map_or(false, &pred) {
            self.bump();
        }
        &self.input[start..self.pos]
    }

    fn word(&mut self, what: &str) -> SproutResult<&'a str> {
        let start = self.pos;
        let word = self.take_while(is_name_char);
        if word.is_empty() {
            return Err(self.error(format!("expected {}", what), start));
        }
        Ok(word)
    }

    fn versions(&mut self) -> SproutResult<VersionConstraint> {
        let start = self.pos;
        let text = self.take_while(|c| c.is_ascii_alphanumeric() || ".-_:,=".contains(c));
        if text.is_empty() {
            return Err(self.error("expected a version after '@'", start));
        }
        VersionConstraint::parse(text).map_err(|e| self.error(e.to_string(), start))
    }

    fn parse(mut self) -> SproutResult<Spec> {
        let mut root = Spec::anonymous();
        let mut deps: Vec<(Spec, usize)> = Vec::new();

        loop {
            self.skip_whitespace();
            let start = self.pos;
            let Some(ch) = self.peek() else { break };

            if ch == '^' {
                self.bump();
                self.skip_whitespace();
                deps.push((Spec::anonymous(), self.pos));
                continue;
            }

            let current = match deps.last_mut() {
                Some((dep, _)) => dep,
                None => &mut root,
            };

            match ch {
                '@' => {
                    self.bump();
                    if !current.versions.is_any() {
                        return Err(self.error("version given twice", start));
                    }
                    current.versions = self.versions()?;
                },
                '%' => {
                    self.bump();
                    if current.compiler.is_some() {
                        return Err(self.error("compiler given twice", start));
                    }
                    let mut compiler = CompilerSpec::new(self.word("a compiler name after '%'")?);
                    if self.peek() == Some('@') {
                        self.bump();
                        compiler.versions = self.versions()?;
                    }
                    current.compiler = Some(compiler);
                },
                '+' | '~' => {
                    self.bump();
                    let name = self.word("a variant name")?;
                    set_variant(current, name, VariantValue::Bool(ch == '+'))
                        .map_err(|m| self.error(m, start))?;
                },
                c if is_name_char(c) => {
                    let word = self.word("a name")?;
                    if self.peek() == Some('=') {
                        self.bump();
                        let value_start = self.pos;
                        let value = self.take_while(|c| !c.is_whitespace() && c != '^');
                        if value.is_empty() {
                            return Err(self.error(format!("expected a value for '{}'", word), value_start));
                        }
                        apply_key_value(current, word, value).map_err(|m| self.error(m, start))?;
                    } else if current.name.is_empty() {
                        current.name = word.to_string();
                    } else {
                        return Err(self.error(
                            format!("unexpected name '{}' after '{}'", word, current.name),
                            start,
                        ));
                    }
                },
                other => return Err(self.error(format!("unexpected character '{}'", other), start)),
            }
        }

        for (dep, position) in deps {
            if dep.name.is_empty() {
                return Err(self.error("dependency after '^' needs a name", position));
            }
            root = root.with_dependency(dep, DepTypes::default())?;
        }
        Ok(root)
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'
}

fn set_variant(spec: &mut Spec, name: &str, value: VariantValue) -> Result<(), String> {
    if spec.variants.contains_key(name) {
        return Err(format!("variant '{}' given twice", name));
    }
    spec.variants.insert(name.to_string(), value);
    Ok(())
}

fn apply_key_value(spec: &mut Spec, key: &str, value: &str) -> Result<(), String> {
    let set = |slot: &mut Option<String>| -> Result<(), String> {
        if slot.is_some() {
            return Err(format!("'{}' given twice", key));
        }
        *slot = Some(value.to_string());
        Ok(())
    };

    match key {
        "arch" => {
            if !spec.arch.is_empty() {
                return Err("architecture given twice".to_string());
            }
            spec.arch = ArchSpec::parse_triple(value)
                .ok_or_else(|| format!("expected arch=platform-os-target, got '{}'", value))?;
            Ok(())
        },
        "platform" => set(&mut spec.arch.platform),
        "os" => set(&mut spec.arch.os),
        "target" => set(&mut spec.arch.target),
        _ => {
            let parsed = match value {
                "true" => VariantValue::Bool(true),
                "false" => VariantValue::Bool(false),
                _ => {
                    let values: BTreeSet<String> = value
                        .split(',')
                        .filter(|v| !v.is_empty())
                        .map(str::to_string)
                        .collect();
                    if values.is_empty() {
                        return Err(format!("expected a value for '{}'", key));
                    }
                    VariantValue::Values(values)
                },
            };
            set_variant(spec, key, parsed)
        },
    }
}
