//! Query language understood by the bundled search index.
//!
//! ```text
//! *                     every record
//! term  term*  "a b"    any indexed text field: exact, prefix, phrase
//! @field:term           restricted to one text field (also term*, "a b")
//! @field:[min max]      numeric range, `(` marks an exclusive bound
//! -clause               negation
//! a | b                 either clause
//! ```
//!
//! Clauses separated by whitespace must all match. `|` binds tighter than
//! the implicit AND. A backslash makes the next character part of a term,
//! so escaped stored values such as `hola\@nam\.com` form one term.

use crate::error::{HashDocError, Result};
use crate::escape::is_index_punctuation;
use crate::store::{FieldKind, FieldSpec, Fields};
use regex::Regex;
use std::collections::HashMap;

/// Split `s` into lowercase index terms.
pub fn tokenize(s: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                current.extend(next.to_lowercase());
            }
        } else if c.is_whitespace() || is_index_punctuation(c) {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        } else {
            current.extend(c.to_lowercase());
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeBound {
    pub value: f64,
    pub exclusive: bool,
}

impl RangeBound {
    fn below(&self, n: f64) -> bool {
        if self.exclusive {
            self.value < n
        } else {
            self.value <= n
        }
    }

    fn above(&self, n: f64) -> bool {
        if self.exclusive {
            n < self.value
        } else {
            n <= self.value
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    All,
    Term {
        field: Option<String>,
        term: String,
        prefix: bool,
    },
    /// Consecutive terms; with `prefix` the last one is prefix matched.
    Phrase {
        field: Option<String>,
        terms: Vec<String>,
        prefix: bool,
    },
    Range {
        field: String,
        min: RangeBound,
        max: RangeBound,
    },
    Not(Box<Clause>),
    Any(Vec<Clause>),
}

/// A parsed query: every clause must match.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    clauses: Vec<Clause>,
}

impl Query {
    pub fn parse(input: &str) -> Result<Query> {
        let mut parser = Parser::new(input);
        let mut clauses = Vec::new();

        loop {
            parser.skip_whitespace();
            if parser.peek().is_none() {
                break;
            }

            let mut alternatives = vec![parser.unit()?];
            loop {
                parser.skip_whitespace();
                if parser.peek() != Some('|') {
                    break;
                }
                parser.bump();
                parser.skip_whitespace();
                alternatives.push(parser.unit()?);
            }

            clauses.push(if alternatives.len() == 1 {
                alternatives.remove(0)
            } else {
                Clause::Any(alternatives)
            });
        }

        if clauses.is_empty() {
            return Err(query_error("empty query"));
        }
        Ok(Query { clauses })
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Reject clauses naming fields the index does not have, or naming
    /// them with the wrong kind.
    pub fn check_fields(&self, specs: &[FieldSpec]) -> Result<()> {
        self.clauses
            .iter()
            .try_for_each(|clause| check_clause(clause, specs))
    }

    pub fn matches(&self, record: &IndexedRecord, fuzziness: u8) -> bool {
        self.clauses
            .iter()
            .all(|clause| clause_matches(clause, record, fuzziness))
    }
}

fn check_clause(clause: &Clause, specs: &[FieldSpec]) -> Result<()> {
    let require_kind = |field: &str, kind: FieldKind| -> Result<()> {
        match specs.iter().find(|s| s.name == field) {
            Some(spec) if spec.kind == kind => Ok(()),
            Some(_) => Err(query_error(format!(
                "field '{field}' is not a {} field",
                match kind {
                    FieldKind::Text => "text",
                    FieldKind::Numeric => "numeric",
                }
            ))),
            None => Err(query_error(format!("unknown field '{field}'"))),
        }
    };

    match clause {
        Clause::All => Ok(()),
        Clause::Term { field, .. } | Clause::Phrase { field, .. } => match field {
            Some(field) => require_kind(field, FieldKind::Text),
            None => Ok(()),
        },
        Clause::Range { field, .. } => require_kind(field, FieldKind::Numeric),
        Clause::Not(inner) => check_clause(inner, specs),
        Clause::Any(alternatives) => alternatives
            .iter()
            .try_for_each(|clause| check_clause(clause, specs)),
    }
}

/// A stored record prepared for matching: tokens of its text fields and
/// values of its numeric fields.
#[derive(Debug, Default)]
pub struct IndexedRecord {
    text: HashMap<String, Vec<String>>,
    numbers: HashMap<String, f64>,
}

impl IndexedRecord {
    pub fn new(fields: &Fields, specs: &[FieldSpec]) -> Self {
        let mut record = IndexedRecord::default();
        for spec in specs {
            let Some(value) = fields.get(&spec.name) else {
                continue;
            };
            match spec.kind {
                FieldKind::Text => {
                    record.text.insert(spec.name.clone(), tokenize(value));
                }
                FieldKind::Numeric => {
                    if let Ok(n) = value.trim().parse::<f64>() {
                        record.numbers.insert(spec.name.clone(), n);
                    }
                }
            }
        }
        record
    }

    fn token_lists<'a>(&'a self, field: &'a Option<String>) -> Vec<&'a [String]> {
        match field {
            Some(name) => self.text.get(name).map(Vec::as_slice).into_iter().collect(),
            None => self.text.values().map(Vec::as_slice).collect(),
        }
    }
}

fn clause_matches(clause: &Clause, record: &IndexedRecord, fuzziness: u8) -> bool {
    match clause {
        Clause::All => true,
        Clause::Term {
            field,
            term,
            prefix,
        } => record.token_lists(field).iter().any(|tokens| {
            tokens
                .iter()
                .any(|token| term_matches(token, term, *prefix, fuzziness))
        }),
        Clause::Phrase {
            field,
            terms,
            prefix,
        } => record
            .token_lists(field)
            .iter()
            .any(|tokens| phrase_matches(tokens, terms, *prefix, fuzziness)),
        Clause::Range { field, min, max } => record
            .numbers
            .get(field)
            .is_some_and(|&n| min.below(n) && max.above(n)),
        Clause::Not(inner) => !clause_matches(inner, record, fuzziness),
        Clause::Any(alternatives) => alternatives
            .iter()
            .any(|clause| clause_matches(clause, record, fuzziness)),
    }
}

fn term_matches(token: &str, term: &str, prefix: bool, fuzziness: u8) -> bool {
    if prefix {
        token.starts_with(term)
    } else if fuzziness == 0 {
        token == term
    } else {
        levenshtein(token, term) <= usize::from(fuzziness)
    }
}

fn phrase_matches(tokens: &[String], terms: &[String], prefix: bool, fuzziness: u8) -> bool {
    if terms.is_empty() || tokens.len() < terms.len() {
        return false;
    }
    tokens.windows(terms.len()).any(|window| {
        window.iter().zip(terms).enumerate().all(|(i, (token, term))| {
            let last = i + 1 == terms.len();
            term_matches(token, term, prefix && last, fuzziness)
        })
    })
}

/// Edit distance between two strings, counted in characters.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

fn query_error(message: impl Into<String>) -> HashDocError {
    HashDocError::Query(message.into())
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(input: &str) -> Self {
        Parser {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn unit(&mut self) -> Result<Clause> {
        if self.peek() == Some('-') {
            self.bump();
            return Ok(Clause::Not(Box::new(self.unit()?)));
        }

        let field = if self.peek() == Some('@') {
            Some(self.field_name()?)
        } else {
            None
        };

        match (self.peek(), field) {
            (Some('"'), field) => self.phrase(field),
            (Some('['), Some(field)) => self.range(field),
            (Some('['), None) => Err(query_error("a numeric range needs an @field")),
            (Some(c), field) if !c.is_whitespace() && c != '|' => self.word(field),
            _ => Err(query_error(format!(
                "expected a term at position {}",
                self.pos
            ))),
        }
    }

    fn field_name(&mut self) -> Result<String> {
        self.bump();
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();
        if name.is_empty() || self.bump() != Some(':') {
            return Err(query_error(format!(
                "expected @field: at position {}",
                start - 1
            )));
        }
        Ok(name)
    }

    fn phrase(&mut self, field: Option<String>) -> Result<Clause> {
        self.bump();
        let mut raw = String::new();
        loop {
            match self.bump() {
                None => return Err(query_error("unterminated quote")),
                Some('"') => break,
                Some('\\') => {
                    raw.push('\\');
                    if let Some(c) = self.bump() {
                        raw.push(c);
                    }
                }
                Some(c) => raw.push(c),
            }
        }
        terms_clause(field, tokenize(&raw), false)
    }

    fn range(&mut self, field: String) -> Result<Clause> {
        let start = self.pos;
        loop {
            match self.bump() {
                None => return Err(query_error("unterminated numeric range")),
                Some(']') => break,
                Some(_) => {}
            }
        }
        let raw: String = self.chars[start..self.pos].iter().collect();
        parse_range(field, &raw)
    }

    fn word(&mut self, field: Option<String>) -> Result<Clause> {
        let mut raw = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == '|' || c == '"' {
                break;
            }
            self.bump();
            raw.push(c);
            if c == '\\' {
                if let Some(escaped) = self.bump() {
                    raw.push(escaped);
                }
            }
        }

        if raw == "*" && field.is_none() {
            return Ok(Clause::All);
        }
        let prefix = raw.ends_with('*') && !raw.ends_with("\\*");
        terms_clause(field, tokenize(&raw), prefix)
    }
}

fn terms_clause(field: Option<String>, mut terms: Vec<String>, prefix: bool) -> Result<Clause> {
    match terms.len() {
        0 => Err(query_error("term has no letters or digits")),
        1 => Ok(Clause::Term {
            field,
            term: terms.remove(0),
            prefix,
        }),
        _ => Ok(Clause::Phrase {
            field,
            terms,
            prefix,
        }),
    }
}

fn parse_range(field: String, raw: &str) -> Result<Clause> {
    let pattern = Regex::new(r"^\[\s*(\(?)\s*([^\s\]]+)\s+(\(?)\s*([^\s\]]+)\s*\]$")
        .map_err(|e| query_error(e.to_string()))?;
    let caps = pattern
        .captures(raw)
        .ok_or_else(|| query_error(format!("malformed numeric range {raw}")))?;

    let bound = |exclusive: &str, value: &str| -> Result<RangeBound> {
        let value = match value.to_ascii_lowercase().as_str() {
            "-inf" => f64::NEG_INFINITY,
            "inf" | "+inf" => f64::INFINITY,
            other => other
                .parse::<f64>()
                .map_err(|_| query_error(format!("'{value}' is not a number")))?,
        };
        Ok(RangeBound {
            value,
            exclusive: !exclusive.is_empty(),
        })
    };

    Ok(Clause::Range {
        field,
        min: bound(&caps[1], &caps[2])?,
        max: bound(&caps[3], &caps[4])?,
    })
}
