//! Pattern-based topic and formula extraction.
//!
//! Every heuristic is a [`HeuristicSpec`]: a regex plus the capture groups a
//! match must provide. Heuristics are compiled and checked once in
//! [`PatternExtractor::with_heuristics`]; one whose regex lacks a declared
//! group never runs. At match time a missing group (optional branches) is a
//! local non-match that is logged and skipped.
//!
//! Heading heuristics run line by line, first match wins. Formula heuristics
//! run over the whole text; overlapping candidates are resolved by span
//! containment, then merged by a normalised-text key.

use std::collections::{BTreeSet, HashMap};

use regex::{Captures, Regex};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{Formula, FormulaKind, Topic};

/// Title given to the synthesized topic that owns text before the first heading.
pub const OVERVIEW_TITLE: &str = "Overview";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeuristicTarget {
    Heading { level: u8 },
    Formula(FormulaKind),
    PageBreak,
}

/// Declarative description of one heuristic.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicSpec {
    pub name: &'static str,
    pub pattern: &'static str,
    pub target: HeuristicTarget,
    /// Groups every match must carry. The first one is the payload.
    pub groups: &'static [&'static str],
    /// Headings only: the previous line must be blank.
    pub standalone: bool,
}

pub const PAGE_MARKER: HeuristicSpec = HeuristicSpec {
    name: "page_marker",
    pattern: r"^--- Page (?P<page>\d+) ---$",
    target: HeuristicTarget::PageBreak,
    groups: &["page"],
    standalone: false,
};

pub const HEADING_HEURISTICS: &[HeuristicSpec] = &[
    HeuristicSpec {
        name: "markdown_h1",
        pattern: r"^#[ \t]+(?P<title>.+?)[ \t#]*$",
        target: HeuristicTarget::Heading { level: 1 },
        groups: &["title"],
        standalone: false,
    },
    HeuristicSpec {
        name: "markdown_h2",
        pattern: r"^##[ \t]+(?P<title>.+?)[ \t#]*$",
        target: HeuristicTarget::Heading { level: 2 },
        groups: &["title"],
        standalone: false,
    },
    HeuristicSpec {
        name: "markdown_h3",
        pattern: r"^###[ \t]+(?P<title>.+?)[ \t#]*$",
        target: HeuristicTarget::Heading { level: 3 },
        groups: &["title"],
        standalone: false,
    },
    HeuristicSpec {
        name: "chapter",
        pattern: r"(?i)^chapter\s+(?P<num>\d+|[ivxlc]+)\s*[:.\-]?\s*(?P<title>.+)$",
        target: HeuristicTarget::Heading { level: 1 },
        groups: &["title", "num"],
        standalone: false,
    },
    HeuristicSpec {
        name: "section",
        pattern: r"(?i)^section\s+(?P<num>\d+(?:\.\d+)*)\s*[:.\-]?\s*(?P<title>.+)$",
        target: HeuristicTarget::Heading { level: 2 },
        groups: &["title", "num"],
        standalone: false,
    },
    HeuristicSpec {
        name: "numbered_subsection",
        pattern: r"^(?P<num>\d+\.\d+)\.?\s+(?P<title>[A-Za-z].*)$",
        target: HeuristicTarget::Heading { level: 3 },
        groups: &["title", "num"],
        standalone: false,
    },
    HeuristicSpec {
        name: "numbered_section",
        pattern: r"^(?P<num>\d+)\.\s+(?P<title>[A-Za-z].*)$",
        target: HeuristicTarget::Heading { level: 2 },
        groups: &["title", "num"],
        standalone: false,
    },
    HeuristicSpec {
        name: "title_case_line",
        pattern: r"^(?P<title>[A-Z][\w'-]*(?:[ \t]+(?:[A-Z][\w'-]*|of|and|the|in|for|to|on|with|a|an)){1,7})$",
        target: HeuristicTarget::Heading { level: 2 },
        groups: &["title"],
        standalone: true,
    },
];

pub const FORMULA_HEURISTICS: &[HeuristicSpec] = &[
    HeuristicSpec {
        name: "display_math",
        pattern: r"\$\$(?P<body>[^$]+?)\$\$",
        target: HeuristicTarget::Formula(FormulaKind::DisplayMath),
        groups: &["body"],
        standalone: false,
    },
    HeuristicSpec {
        name: "equation_env",
        pattern: r"(?s)\\begin\{equation\*?\}(?P<body>.*?)\\end\{equation\*?\}",
        target: HeuristicTarget::Formula(FormulaKind::EquationEnv),
        groups: &["body"],
        standalone: false,
    },
    HeuristicSpec {
        name: "align_env",
        pattern: r"(?s)\\begin\{align\*?\}(?P<body>.*?)\\end\{align\*?\}",
        target: HeuristicTarget::Formula(FormulaKind::AlignEnv),
        groups: &["body"],
        standalone: false,
    },
    HeuristicSpec {
        name: "inline_math",
        pattern: r"\$(?P<body>[^$\n]{3,})\$",
        target: HeuristicTarget::Formula(FormulaKind::InlineMath),
        groups: &["body"],
        standalone: false,
    },
    HeuristicSpec {
        name: "numbered_equation",
        pattern: r"(?m)^[ \t]*(?P<body>[^\n$=]{1,80}=[^\n$]{1,200}?)[ \t]*\((?P<number>\d+(?:\.\d+)?)\)[ \t]*$",
        target: HeuristicTarget::Formula(FormulaKind::NumberedEquation),
        groups: &["body", "number"],
        standalone: false,
    },
    HeuristicSpec {
        name: "assignment",
        pattern: r"(?P<body>\b[A-Za-z_][A-Za-z0-9_]*(?:\([^()\n]*\))?[ \t]*=[ \t]*[^,;.\n$=]{3,})",
        target: HeuristicTarget::Formula(FormulaKind::Assignment),
        groups: &["body"],
        standalone: false,
    },
    HeuristicSpec {
        name: "keyword_definition",
        pattern: r"(?i)\b(?:is defined as|is given by)[ \t]*:?[ \t]*(?P<body>[^\n;$]{3,})",
        target: HeuristicTarget::Formula(FormulaKind::Definition),
        groups: &["body"],
        standalone: false,
    },
];

#[derive(Debug, Error)]
pub enum HeuristicError {
    #[error("heuristic {name}: invalid pattern: {source}")]
    Pattern {
        name: &'static str,
        source: regex::Error,
    },

    #[error("heuristic {name}: pattern does not declare group `{group}`")]
    MissingGroup {
        name: &'static str,
        group: &'static str,
    },

    #[error("heuristic {name}: no capture groups declared")]
    NoGroups { name: &'static str },
}

/// A compiled and validated heuristic.
#[derive(Debug, Clone)]
pub struct Heuristic {
    spec: HeuristicSpec,
    regex: Regex,
}

struct Matched<'t> {
    start: usize,
    end: usize,
    payload: regex::Match<'t>,
}

impl Heuristic {
    pub fn compile(spec: HeuristicSpec) -> Result<Self, HeuristicError> {
        if spec.groups.is_empty() {
            return Err(HeuristicError::NoGroups { name: spec.name });
        }
        let regex = Regex::new(spec.pattern).map_err(|source| HeuristicError::Pattern {
            name: spec.name,
            source,
        })?;
        let declared: BTreeSet<&str> = regex.capture_names().flatten().collect();
        if let Some(&group) = spec.groups.iter().find(|g| !declared.contains(**g)) {
            return Err(HeuristicError::MissingGroup {
                name: spec.name,
                group,
            });
        }
        Ok(Self { spec, regex })
    }

    pub fn name(&self) -> &'static str {
        self.spec.name
    }

    /// Resolves the declared groups of one match. A missing group makes the
    /// match a non-match.
    fn resolve<'t>(&self, caps: &Captures<'t>) -> Option<Matched<'t>> {
        for group in self.spec.groups {
            if caps.name(group).is_none() {
                debug!(heuristic = self.spec.name, group, "match lacks expected group, skipped");
                return None;
            }
        }
        let full = caps.get(0)?;
        let payload = caps.name(self.spec.groups[0])?;
        Some(Matched {
            start: full.start(),
            end: full.end(),
            payload,
        })
    }
}

/// Tunables for extraction.
#[derive(Debug, Clone)]
pub struct PatternOptions {
    pub max_key_terms: usize,
    /// Lines after a heading folded into the topic description.
    pub context_lines: usize,
    /// Characters on each side of a formula kept as source context.
    pub context_chars: usize,
}

impl Default for PatternOptions {
    fn default() -> Self {
        Self {
            max_key_terms: 10,
            context_lines: 50,
            context_chars: 100,
        }
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    start: usize,
    end: usize,
    priority: usize,
    body: String,
    kind: FormulaKind,
    context: String,
}

#[derive(Debug)]
struct Heading {
    line: usize,
    offset: usize,
    title: String,
    level: u8,
    page: u32,
}

#[derive(Debug, Clone, Copy)]
struct Line<'t> {
    offset: usize,
    text: &'t str,
}

fn split_lines(text: &str) -> Vec<Line<'_>> {
    let mut offset = 0;
    text.split('\n')
        .map(|line| {
            let l = Line { offset, text: line };
            offset += line.len() + 1;
            l
        })
        .collect()
}

/// Runs the heading and formula heuristics over extracted text.
#[derive(Debug, Clone)]
pub struct PatternExtractor {
    headings: Vec<Heuristic>,
    formulas: Vec<Heuristic>,
    page_marker: Option<Heuristic>,
    options: PatternOptions,
}

impl Default for PatternExtractor {
    fn default() -> Self {
        Self::new(PatternOptions::default())
    }
}

impl PatternExtractor {
    pub fn new(options: PatternOptions) -> Self {
        Self::with_heuristics(options, HEADING_HEURISTICS, FORMULA_HEURISTICS)
    }

    /// Compiles the given specs. Invalid specs are dropped with a warning.
    pub fn with_heuristics(
        options: PatternOptions,
        headings: &[HeuristicSpec],
        formulas: &[HeuristicSpec],
    ) -> Self {
        fn compile_all(specs: &[HeuristicSpec]) -> Vec<Heuristic> {
            specs
                .iter()
                .filter_map(|spec| match Heuristic::compile(*spec) {
                    Ok(h) => Some(h),
                    Err(e) => {
                        warn!("dropping heuristic: {e}");
                        None
                    }
                })
                .collect()
        }

        Self {
            headings: compile_all(headings),
            formulas: compile_all(formulas),
            page_marker: compile_all(&[PAGE_MARKER]).into_iter().next(),
            options,
        }
    }

    pub fn heuristic_names(&self) -> Vec<&'static str> {
        self.headings
            .iter()
            .chain(&self.formulas)
            .map(Heuristic::name)
            .collect()
    }

    /// Topics and formulas in one pass. Never fails; empty text yields nothing.
    pub fn extract(&self, text: &str) -> (Vec<Topic>, Vec<Formula>) {
        let mut topics = self.topics(text);
        let formulas = self.formulas(text, &topics);
        if topics.is_empty() && !formulas.is_empty() {
            topics.push(self.overview_topic(text, text.len()));
        }
        (topics, formulas)
    }

    /// Topics in first-occurrence order. Text before the first heading, or a
    /// document without headings, is owned by an [`OVERVIEW_TITLE`] topic.
    pub fn topics(&self, text: &str) -> Vec<Topic> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let lines = split_lines(text);
        let headings = self.headings_in(&lines);
        let heading_lines: BTreeSet<usize> = headings.iter().map(|h| h.line).collect();

        let first_heading_line = headings.first().map(|h| h.line).unwrap_or(lines.len());
        let has_preamble = lines[..first_heading_line]
            .iter()
            .any(|l| !l.text.trim().is_empty() && self.page_number(l.text.trim()).is_none());

        let mut topics: Vec<Topic> = Vec::new();
        if has_preamble {
            let end = headings.first().map(|h| h.offset).unwrap_or(text.len());
            topics.push(self.overview_topic(text, end));
        }

        let mut seen: BTreeSet<String> = topics.iter().map(|t| normalize_title(&t.title)).collect();
        for heading in &headings {
            let key = normalize_title(&heading.title);
            if !seen.insert(key) {
                debug!(title = %heading.title, "repeated heading merged into first occurrence");
                continue;
            }
            let description = self.description_after(&lines, heading.line, &heading_lines);
            let parent = topics
                .iter()
                .rev()
                .find(|t| t.level < heading.level)
                .map(|t| t.order);
            topics.push(Topic {
                title: heading.title.clone(),
                key_terms: key_terms(&description, self.options.max_key_terms),
                description,
                order: topics.len(),
                level: heading.level,
                page: heading.page,
                parent,
                offset: heading.offset,
            });
        }
        topics
    }

    /// Builds the topic that owns `text[..end]`.
    pub fn overview_topic(&self, text: &str, end: usize) -> Topic {
        let description = text[..end]
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && self.page_number(l).is_none())
            .take(self.options.context_lines)
            .collect::<Vec<_>>()
            .join("\n");
        Topic {
            title: OVERVIEW_TITLE.to_string(),
            key_terms: key_terms(&description, self.options.max_key_terms),
            description,
            order: 0,
            level: 1,
            page: 1,
            parent: None,
            offset: 0,
        }
    }

    /// Formula candidates merged and assigned to their owning topic.
    pub fn formulas(&self, text: &str, topics: &[Topic]) -> Vec<Formula> {
        let anchors = self.anchors(text, topics);
        let mut candidates = Vec::new();
        for (priority, heuristic) in self.formulas.iter().enumerate() {
            let HeuristicTarget::Formula(kind) = heuristic.spec.target else {
                continue;
            };
            for caps in heuristic.regex.captures_iter(text) {
                let Some(m) = heuristic.resolve(&caps) else {
                    continue;
                };
                let Some(body) = clean_body(m.payload.as_str(), kind) else {
                    continue;
                };
                candidates.push(Candidate {
                    start: m.start,
                    end: m.end,
                    priority,
                    body,
                    kind,
                    context: context_around(text, m.start, m.end, self.options.context_chars),
                });
            }
        }

        // Widest span first at each position; ties go to the earlier heuristic.
        candidates.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then((b.end - b.start).cmp(&(a.end - a.start)))
                .then(a.priority.cmp(&b.priority))
        });

        let mut accepted: Vec<Candidate> = Vec::new();
        let mut by_key: HashMap<String, usize> = HashMap::new();
        for candidate in candidates {
            if accepted
                .iter()
                .any(|a| a.start <= candidate.start && candidate.end <= a.end)
            {
                continue;
            }
            let key = dedup_key(&candidate.body);
            if key.chars().count() <= 2 {
                continue;
            }
            match by_key.get(&key) {
                Some(&idx) => {
                    if candidate.context.len() > accepted[idx].context.len() {
                        accepted[idx].context = candidate.context;
                    }
                }
                None => {
                    by_key.insert(key, accepted.len());
                    accepted.push(candidate);
                }
            }
        }

        accepted
            .into_iter()
            .enumerate()
            .map(|(idx, c)| Formula {
                id: format!("formula_{}", idx + 1),
                name: format!("Formula {}", idx + 1),
                latex_or_text: c.body,
                kind: c.kind,
                explanation: None,
                applications: Vec::new(),
                source_context: c.context,
                topic_order: owner_of(&anchors, c.start),
                offset: c.start,
            })
            .collect()
    }

    /// `(offset, topic order)` for every heading, repeats included, so text
    /// under a repeated heading resolves to the first topic with that title.
    fn anchors(&self, text: &str, topics: &[Topic]) -> Vec<(usize, usize)> {
        let by_title: HashMap<String, usize> = topics
            .iter()
            .map(|t| (normalize_title(&t.title), t.order))
            .collect();
        let mut anchors: Vec<(usize, usize)> = topics.iter().map(|t| (t.offset, t.order)).collect();
        for heading in self.headings_in(&split_lines(text)) {
            if let Some(&order) = by_title.get(&normalize_title(&heading.title)) {
                anchors.push((heading.offset, order));
            }
        }
        anchors.sort_unstable();
        anchors.dedup();
        anchors
    }

    fn headings_in(&self, lines: &[Line<'_>]) -> Vec<Heading> {
        let mut headings = Vec::new();
        let mut page = 1u32;
        let mut prev_blank = true;
        for (idx, line) in lines.iter().enumerate() {
            let trimmed = line.text.trim();
            if let Some(p) = self.page_number(trimmed) {
                page = p;
                prev_blank = true;
                continue;
            }
            if trimmed.is_empty() {
                prev_blank = true;
                continue;
            }
            if let Some((title, level)) = self.match_heading(trimmed, prev_blank) {
                let leading = line.text.len() - line.text.trim_start().len();
                headings.push(Heading {
                    line: idx,
                    offset: line.offset + leading,
                    title,
                    level,
                    page,
                });
            }
            prev_blank = false;
        }
        headings
    }

    fn match_heading(&self, line: &str, prev_blank: bool) -> Option<(String, u8)> {
        for heuristic in &self.headings {
            let HeuristicTarget::Heading { level } = heuristic.spec.target else {
                continue;
            };
            if heuristic.spec.standalone && !prev_blank {
                continue;
            }
            let Some(caps) = heuristic.regex.captures(line) else {
                continue;
            };
            let Some(m) = heuristic.resolve(&caps) else {
                continue;
            };
            let title = m.payload.as_str().trim();
            if plausible_title(title) {
                return Some((title.to_string(), level));
            }
        }
        None
    }

    fn page_number(&self, line: &str) -> Option<u32> {
        let marker = self.page_marker.as_ref()?;
        let caps = marker.regex.captures(line)?;
        let m = marker.resolve(&caps)?;
        m.payload.as_str().parse().ok()
    }

    fn description_after(
        &self,
        lines: &[Line<'_>],
        heading_line: usize,
        heading_lines: &BTreeSet<usize>,
    ) -> String {
        lines
            .iter()
            .enumerate()
            .skip(heading_line + 1)
            .take_while(|(idx, _)| !heading_lines.contains(idx))
            .take(self.options.context_lines)
            .map(|(_, l)| l.text.trim())
            .filter(|l| !l.is_empty() && self.page_number(l).is_none())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn plausible_title(title: &str) -> bool {
    let chars = title.chars().count();
    (3..=100).contains(&chars)
        && !title.chars().all(|c| c.is_ascii_digit() || c.is_whitespace())
        && !title.ends_with(['.', ',', ';'])
        && title.split_whitespace().count() <= 12
}

fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalised formula text used to merge candidates across heuristics.
pub fn dedup_key(body: &str) -> String {
    body.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn clean_body(raw: &str, kind: FormulaKind) -> Option<String> {
    let mut body = raw.trim();
    if kind == FormulaKind::Definition {
        body = body.trim_end_matches(['.', ',']).trim_end();
        if !body.contains(['=', '+', '-', '*', '/', '^', '\\', '_', '<', '>'])
            && !body.chars().any(|c| c.is_ascii_digit())
        {
            return None;
        }
    }
    if body.chars().count() < 3 || body.chars().all(|c| c.is_ascii_digit() || c.is_whitespace()) {
        return None;
    }
    Some(body.to_string())
}

fn context_around(text: &str, start: usize, end: usize, radius: usize) -> String {
    let mut from = start.saturating_sub(radius);
    while !text.is_char_boundary(from) {
        from -= 1;
    }
    let mut to = (end + radius).min(text.len());
    while !text.is_char_boundary(to) {
        to += 1;
    }
    text[from..to]
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn owner_of(anchors: &[(usize, usize)], offset: usize) -> usize {
    anchors
        .iter()
        .rev()
        .find(|(at, _)| *at <= offset)
        .or_else(|| anchors.first())
        .map(|&(_, order)| order)
        .unwrap_or(0)
}

const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "also", "another", "because", "been", "before", "being",
    "below", "between", "both", "came", "could", "different", "does", "each", "even", "every",
    "from", "give", "given", "good", "great", "have", "here", "into", "just", "large", "many",
    "more", "most", "much", "must", "need", "only", "other", "over", "same", "should", "show",
    "since", "some", "such", "than", "that", "their", "them", "then", "there", "these", "they",
    "this", "those", "through", "under", "upon", "very", "were", "what", "when", "where",
    "which", "while", "will", "with", "would", "your",
];

/// Frequency-ranked terms (length >= 4, seen more than once).
pub fn key_terms(text: &str, max: usize) -> BTreeSet<String> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let words = text
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|w| w.len() >= 4)
        .map(str::to_lowercase)
        .filter(|w| !STOP_WORDS.contains(&w.as_str()));
    for (idx, word) in words.enumerate() {
        counts.entry(word).or_insert((0, idx)).0 += 1;
    }
    let mut ranked: Vec<(String, usize, usize)> = counts
        .into_iter()
        .filter(|(_, (freq, _))| *freq > 1)
        .map(|(w, (freq, first))| (w, freq, first))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.into_iter().take(max).map(|(w, _, _)| w).collect()
}
