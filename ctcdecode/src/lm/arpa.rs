use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use super::{LanguageModel, LmError, LmState, WordIndex};

static NGRAM_COUNT_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^ngram\s+(\d+)\s*=\s*(\d+)$"));
static SECTION_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^\\(\d+)-grams:$"));

#[derive(Debug, Clone, Copy)]
struct NgramEntry {
    log10_prob: f32,
    backoff: f32,
}

/// Backoff n-gram model read from an ARPA file and held in memory.
#[derive(Debug, Clone)]
pub struct ArpaModel {
    order: usize,
    words: Vec<String>,
    index: HashMap<String, WordIndex>,
    ngrams: HashMap<Vec<WordIndex>, NgramEntry>,
}

#[derive(Clone, Copy)]
enum Section {
    Preamble,
    Data,
    Ngrams(usize),
    End,
}

impl ArpaModel {
    pub fn read(path: impl AsRef<Path>) -> Result<Self, LmError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| LmError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let model = Self::parse(&text)?;
        log::info!(
            "Loaded ARPA model {} (order {}, {} words, {} n-grams)",
            path.display(),
            model.order,
            model.words.len(),
            model.ngrams.len()
        );
        Ok(model)
    }

    pub fn parse(text: &str) -> Result<Self, LmError> {
        let regex_err = |e: &regex::Error| LmError::Parse {
            line: 0,
            reason: e.to_string(),
        };
        let count_re = NGRAM_COUNT_RE.as_ref().map_err(regex_err)?;
        let section_re = SECTION_RE.as_ref().map_err(regex_err)?;
        let mut declared: Vec<(usize, usize)> = Vec::new();
        let mut found: HashMap<usize, usize> = HashMap::new();
        let mut model = Self {
            order: 0,
            words: Vec::new(),
            index: HashMap::new(),
            ngrams: HashMap::new(),
        };
        let mut section = Section::Preamble;

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            let lineno = lineno + 1;
            if line.is_empty() {
                continue;
            }
            if line == "\\data\\" {
                section = Section::Data;
                continue;
            }
            if line == "\\end\\" {
                section = Section::End;
                continue;
            }
            if let Some(caps) = section_re.captures(line) {
                let n: usize = caps[1].parse().map_err(|_| LmError::Parse {
                    line: lineno,
                    reason: format!("bad section header {line:?}"),
                })?;
                if n == 0 {
                    return Err(LmError::Parse {
                        line: lineno,
                        reason: "0-gram section".to_string(),
                    });
                }
                section = Section::Ngrams(n);
                continue;
            }

            match section {
                Section::Preamble | Section::End => {}
                Section::Data => {
                    let caps = count_re.captures(line).ok_or_else(|| LmError::Parse {
                        line: lineno,
                        reason: format!("expected `ngram N=count`, got {line:?}"),
                    })?;
                    let n = caps[1].parse().unwrap_or(0);
                    let count = caps[2].parse().unwrap_or(0);
                    declared.push((n, count));
                }
                Section::Ngrams(n) => {
                    model.add_entry(n, line, lineno)?;
                    *found.entry(n).or_default() += 1;
                }
            }
        }

        for (order, declared) in declared {
            let found = found.get(&order).copied().unwrap_or(0);
            if found != declared {
                return Err(LmError::CountMismatch {
                    order,
                    declared,
                    found,
                });
            }
        }
        if model.words.is_empty() {
            return Err(LmError::Empty);
        }
        Ok(model)
    }

    fn add_entry(&mut self, n: usize, line: &str, lineno: usize) -> Result<(), LmError> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != n + 1 && fields.len() != n + 2 {
            return Err(LmError::Parse {
                line: lineno,
                reason: format!("expected {n} words, got {line:?}"),
            });
        }
        let parse = |field: &str| {
            field.parse::<f32>().map_err(|_| LmError::Parse {
                line: lineno,
                reason: format!("bad number {field:?}"),
            })
        };
        let log10_prob = parse(fields[0])?;
        let backoff = match fields.get(n + 1) {
            Some(field) => parse(*field)?,
            None => 0.0,
        };

        let key = fields[1..=n]
            .iter()
            .map(|word| self.intern(word, n == 1))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| LmError::Parse {
                line: lineno,
                reason: format!("{n}-gram uses a word with no unigram: {line:?}"),
            })?;

        self.order = self.order.max(n);
        self.ngrams.insert(
            key,
            NgramEntry {
                log10_prob,
                backoff,
            },
        );
        Ok(())
    }

    fn intern(&mut self, word: &str, create: bool) -> Option<WordIndex> {
        if let Some(&idx) = self.index.get(word) {
            return Some(idx);
        }
        if !create {
            return None;
        }
        let idx = self.words.len() as WordIndex;
        self.words.push(word.to_string());
        self.index.insert(word.to_string(), idx);
        Some(idx)
    }
}

impl LanguageModel for ArpaModel {
    fn order(&self) -> usize {
        self.order
    }

    fn vocabulary(&self) -> &[String] {
        &self.words
    }

    fn word_index(&self, word: &str) -> Option<WordIndex> {
        self.index.get(word).copied()
    }

    fn base_score(&self, state: &LmState, word: WordIndex) -> (f32, LmState) {
        let history = &state.0;
        let mut backoff = 0.0f32;
        let mut score = None;
        let mut key = Vec::with_capacity(history.len() + 1);

        // Longest history first; every miss adds that history's backoff weight.
        for start in 0..=history.len() {
            let context = &history[start..];
            key.clear();
            key.extend_from_slice(context);
            key.push(word);
            if let Some(entry) = self.ngrams.get(&key) {
                score = Some(backoff + entry.log10_prob);
                break;
            }
            if !context.is_empty() {
                if let Some(entry) = self.ngrams.get(context) {
                    backoff += entry.backoff;
                }
            }
        }

        let mut next = history.clone();
        next.push(word);
        let keep = self.order.saturating_sub(1);
        if next.len() > keep {
            next.drain(..next.len() - keep);
        }
        (score.unwrap_or(backoff), LmState(next))
    }
}
