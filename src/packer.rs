/// Token-budgeted context packing and result summaries
///
/// Candidates arrive in rank order and are accepted greedily. A chunk that
/// does not fit the remaining budget is trimmed three trailing lines at a
/// time; once the surviving text drops under the minimum useful size the
/// chunk is skipped instead. The whole pass is a pure function of its
/// inputs, so the same query against the same index packs the same context.
use crate::text::{est_tokens, tokenize};
use crate::types::{ContextPackResponse, PackedSection};

/// Trimming step, in lines
const TRIM_STEP: usize = 3;
/// Chunks trimmed below this many characters are dropped, not packed
const MIN_USEFUL_CHARS: usize = 40;
/// Cap on lines shown in a search-hit summary
const SUMMARY_MAX_LINES: usize = 18;

/// A ranked chunk offered to the packer
#[derive(Debug, Clone)]
pub struct PackCandidate {
    pub chunk_id: String,
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
}

fn header(path: &str, start_line: usize, end_line: usize) -> String {
    format!("== {}:{}-{} ==", path, start_line, end_line)
}

/// Pack candidates into a token budget
pub fn pack(query: &str, candidates: Vec<PackCandidate>, budget: usize) -> ContextPackResponse {
    let mut sections = Vec::new();
    let mut tokens_used = 0usize;

    for candidate in candidates {
        let remaining = budget.saturating_sub(tokens_used);
        if remaining == 0 {
            break;
        }
        let head = header(&candidate.path, candidate.start_line, candidate.end_line);
        let mut lines: Vec<&str> = candidate.content.lines().collect();
        let mut truncated = false;

        loop {
            let body = lines.join("\n");
            let text = format!("{}\n{}", head, body);
            let tokens = est_tokens(&text);
            if tokens <= remaining {
                let end_line = if truncated {
                    candidate.start_line + lines.len().saturating_sub(1)
                } else {
                    candidate.end_line
                };
                sections.push(PackedSection {
                    chunk_id: candidate.chunk_id.clone(),
                    path: candidate.path.clone(),
                    start_line: candidate.start_line,
                    end_line,
                    tokens,
                    truncated,
                    text,
                });
                tokens_used += tokens;
                break;
            }
            if lines.len() <= TRIM_STEP {
                break;
            }
            let keep = lines.len() - TRIM_STEP;
            lines.truncate(keep);
            truncated = true;
            if lines.iter().map(|l| l.len() + 1).sum::<usize>() < MIN_USEFUL_CHARS {
                break;
            }
        }
    }

    let budget_remaining = budget.saturating_sub(tokens_used);
    ContextPackResponse {
        query: query.to_string(),
        sections,
        budget_requested: budget,
        tokens_used,
        budget_remaining,
        utilization: if budget > 0 {
            tokens_used as f32 / budget as f32
        } else {
            0.0
        },
        cached: false,
    }
}

/// Build the summary shown with a search hit
///
/// The header names the location; the body shows the lines that mention a
/// query term, falling back to the leading lines when nothing matches.
pub fn summarize(
    path: &str,
    start_line: usize,
    end_line: usize,
    content: &str,
    query: &str,
) -> String {
    let query_terms: std::collections::HashSet<String> = tokenize(query).into_iter().collect();
    let mut picked: Vec<&str> = content
        .lines()
        .filter(|line| tokenize(line).iter().any(|t| query_terms.contains(t)))
        .take(SUMMARY_MAX_LINES)
        .collect();
    if picked.is_empty() {
        picked = content.lines().take(SUMMARY_MAX_LINES).collect();
    }
    format!("{}\n{}", header(path, start_line, end_line), picked.join("\n"))
}
