// 🗣️ Interactive Resolver & Auto-Accept Policy
// The policy decides what can be resolved without a human; everything else
// goes through the `CandidatePrompt` seam, which does not care whether the
// answer comes from a terminal, a script, or a test.

use anyhow::Result;
use std::collections::{HashSet, VecDeque};
use std::io::{BufRead, Write};

use crate::matching::Candidate;

// ============================================================================
// POLICY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Accept the top candidate without asking.
    Accept,

    /// No candidate reached the cutoff; add as a new entry without asking.
    AutoNew,

    /// Ambiguous; a human has to decide.
    Defer,
}

pub struct AutoAcceptPolicy {
    /// Top score must exceed this for the high-confidence path (default: 95)
    pub min_score: u8,

    /// Runner-up score must not exceed this (default: 90)
    pub runner_up_max: u8,

    /// Exact-key fast path requires a key longer than this (default: 5)
    pub exact_len_guard: usize,
}

impl AutoAcceptPolicy {
    pub fn new() -> Self {
        AutoAcceptPolicy {
            min_score: 95,
            runner_up_max: 90,
            exact_len_guard: 5,
        }
    }

    /// Decide whether the ranked candidates allow an automatic resolution.
    ///
    /// The exact-match fast path fires regardless of score: a key identical
    /// to a canonical key (beyond the short-name guard), or a raw display
    /// name equal case-insensitively to a canonical name, is never sent to
    /// a human. The high-confidence path additionally requires clear
    /// separation from the runner-up and an unclaimed candidate.
    pub fn decide(
        &self,
        query_key: &str,
        raw_name: &str,
        candidates: &[Candidate],
        taken: &HashSet<String>,
    ) -> PolicyDecision {
        let Some(top) = candidates.first() else {
            return PolicyDecision::AutoNew;
        };

        let exact_key =
            top.match_key == query_key && query_key.chars().count() > self.exact_len_guard;
        let exact_name = top.display_name.to_lowercase() == raw_name.to_lowercase();
        if exact_key || exact_name {
            return PolicyDecision::Accept;
        }

        let clear_separation =
            candidates.len() == 1 || candidates[1].score <= self.runner_up_max;
        if top.score > self.min_score
            && clear_separation
            && !taken.contains(top.entry_key.as_str())
        {
            return PolicyDecision::Accept;
        }

        PolicyDecision::Defer
    }
}

impl Default for AutoAcceptPolicy {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// PROMPT CONTRACT
// ============================================================================

/// What a prompt implementation gets to show.
pub struct PromptContext<'a> {
    pub source: &'a str,
    pub record_line: String,
    pub candidates: &'a [Candidate],
    pub taken: &'a HashSet<String>,
}

/// Terminal reply of a prompt. Invalid input is handled inside the
/// implementation (re-prompt); it never surfaces here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptReply {
    /// 0-based index into the candidate list.
    Selected(usize),
    NewEntry,
    Skip,
    Abort,
}

pub trait CandidatePrompt {
    fn resolve(&mut self, ctx: &PromptContext<'_>) -> Result<PromptReply>;
}

/// Parse one input line against the current candidate count.
/// `1..=n` selects, `x` adds as new entry, `s` skips, `a` aborts.
pub fn parse_reply(line: &str, candidate_count: usize) -> Option<PromptReply> {
    match line.trim() {
        "x" => Some(PromptReply::NewEntry),
        "s" => Some(PromptReply::Skip),
        "a" => Some(PromptReply::Abort),
        other => match other.parse::<usize>() {
            Ok(i) if i >= 1 && i <= candidate_count => Some(PromptReply::Selected(i - 1)),
            _ => None,
        },
    }
}

// ============================================================================
// STDIN PROMPT
// ============================================================================

/// Line-oriented prompt on stdin/stdout. Re-prompts on invalid input;
/// end of input is treated as abort so truncated pipes exit cleanly.
pub struct StdinPrompt;

impl StdinPrompt {
    pub fn new() -> Self {
        StdinPrompt
    }

    fn print_candidates(ctx: &PromptContext<'_>) {
        println!("Looking for match: {}", ctx.record_line);
        for (i, candidate) in ctx.candidates.iter().enumerate() {
            let dup = if ctx.taken.contains(candidate.entry_key.as_str()) {
                "!taken already! "
            } else {
                ""
            };
            println!(
                " ({}) [{} %] {}{}",
                i + 1,
                candidate.score,
                dup,
                candidate.display_name
            );
        }
        println!(" (x) Add as new entry");
        println!(" (s) Skip this record");
        println!(" (a) Abort processing");
    }
}

impl Default for StdinPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl CandidatePrompt for StdinPrompt {
    fn resolve(&mut self, ctx: &PromptContext<'_>) -> Result<PromptReply> {
        Self::print_candidates(ctx);

        let stdin = std::io::stdin();
        let mut lines = stdin.lock().lines();
        loop {
            print!("> ");
            std::io::stdout().flush()?;

            let Some(line) = lines.next() else {
                // End of input: controlled abort, not an error.
                println!();
                return Ok(PromptReply::Abort);
            };
            let line = line?;

            match parse_reply(&line, ctx.candidates.len()) {
                Some(reply) => return Ok(reply),
                None => {
                    println!(
                        "Enter a number between 1 and {}, or x (new entry), s (skip), a (abort).",
                        ctx.candidates.len()
                    );
                }
            }
        }
    }
}

// ============================================================================
// NON-TERMINAL PROMPTS
// ============================================================================

/// Replays a fixed list of replies; deterministic stand-in for a terminal.
pub struct ScriptedPrompt {
    replies: VecDeque<PromptReply>,
}

impl ScriptedPrompt {
    pub fn new<I: IntoIterator<Item = PromptReply>>(replies: I) -> Self {
        ScriptedPrompt {
            replies: replies.into_iter().collect(),
        }
    }

    pub fn exhausted(&self) -> bool {
        self.replies.is_empty()
    }
}

impl CandidatePrompt for ScriptedPrompt {
    fn resolve(&mut self, _ctx: &PromptContext<'_>) -> Result<PromptReply> {
        self.replies
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("scripted prompt ran out of replies"))
    }
}

/// Always aborts: batch mode stops cleanly at the first record that
/// would need a human.
pub struct AbortingPrompt;

impl CandidatePrompt for AbortingPrompt {
    fn resolve(&mut self, ctx: &PromptContext<'_>) -> Result<PromptReply> {
        tracing::info!(
            source = %ctx.source,
            record = %ctx.record_line,
            "batch mode: stopping at first ambiguous record"
        );
        Ok(PromptReply::Abort)
    }
}

// ============================================================================
// TESTS
// ============================================================================
