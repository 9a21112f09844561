/// Line-window chunking with boundary-aware adjustment
///
/// Chunking is a pure function of (path, content, config): no clock, no
/// filesystem, no randomness. Re-chunking unchanged input always yields
/// byte-identical chunks with identical ids.
use tracing::trace;

use crate::config::IndexingConfig;
use crate::indexer::{compute_chunk_id, content_signature, Chunk};

const STRATEGY_LINE_AWARE: &str = "line-aware";
const STRATEGY_FIXED_WINDOW: &str = "fixed-window";

/// Keywords that open a definition in the languages we commonly index
const DEFINITION_PREFIXES: [&str; 12] = [
    "fn ", "pub ", "def ", "class ", "func ", "function ", "impl ", "struct ", "enum ",
    "trait ", "mod ", "async ",
];

/// Split a file into overlapping line-window chunks
pub fn chunk_file(rel_path: &str, content: &str, config: &IndexingConfig) -> Vec<Chunk> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() || content.trim().is_empty() {
        return Vec::new();
    }

    let window = config.chunk_lines.max(1);
    let overlap = config.overlap_lines.min(window.saturating_sub(1));
    let language = detect_language(rel_path);

    let mut chunks = Vec::new();
    let mut ordinal = 0;
    let mut start = 0;

    while start < lines.len() {
        let mut end = (start + window).min(lines.len());
        // The strategy label records whether the end was actually adjusted
        let mut strategy = STRATEGY_FIXED_WINDOW;

        if config.boundary_aware
            && end < lines.len()
            && let Some(adjusted) =
                find_boundary(&lines, end, start + 1, config.boundary_search_lines)
        {
            trace!(
                "Boundary adjustment in {}: {} -> {}",
                rel_path, end, adjusted
            );
            end = adjusted;
            strategy = STRATEGY_LINE_AWARE;
        }

        let text = lines[start..end].join("\n");
        if !text.trim().is_empty() {
            chunks.push(Chunk {
                id: compute_chunk_id(rel_path, ordinal, &text),
                path: rel_path.to_string(),
                ordinal,
                start_line: start + 1,
                end_line: end,
                language: language.clone(),
                strategy: strategy.to_string(),
                signature: content_signature(&text),
                content: text,
            });
            ordinal += 1;
        }

        if end >= lines.len() {
            break;
        }
        let next = end.saturating_sub(overlap);
        // Guarantee forward progress even with aggressive overlap
        start = if next > start { next } else { end };
    }

    chunks
}

/// Find a better chunk end near `end`, preferring the smallest move
///
/// A good boundary is a blank line (the chunk ends before it) or a line that
/// opens a definition (the definition starts the next chunk). Candidates are
/// examined nearest-first, earlier position winning ties, and never move the
/// end at or before `min_end`.
fn find_boundary(lines: &[&str], end: usize, min_end: usize, search: usize) -> Option<usize> {
    for distance in 0..=search {
        for candidate in [end.saturating_sub(distance), end + distance] {
            if candidate <= min_end || candidate >= lines.len() {
                continue;
            }
            if is_boundary_line(lines[candidate]) {
                return Some(candidate);
            }
        }
    }
    None
}

fn is_boundary_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    if line.trim().is_empty() {
        return true;
    }
    DEFINITION_PREFIXES.iter().any(|p| trimmed.starts_with(p))
}

/// Map a file extension to a language label
pub fn detect_language(path: &str) -> String {
    let ext = path.rsplit('.').next().unwrap_or("");
    match ext {
        "rs" => "rust",
        "py" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "jsx" => "javascript",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "hpp" | "cxx" => "cpp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "kt" | "kts" => "kotlin",
        "sh" | "bash" => "shell",
        "sql" => "sql",
        "md" => "markdown",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "json" => "json",
        "html" => "html",
        "css" => "css",
        _ => "text",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(window: usize, overlap: usize) -> IndexingConfig {
        IndexingConfig {
            chunk_lines: window,
            overlap_lines: overlap,
            boundary_aware: false,
            ..IndexingConfig::default()
        }
    }

    fn numbered_lines(n: usize) -> String {
        (1..=n)
            .map(|i| format!("line number {}", i))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_empty_file_yields_no_chunks() {
        assert!(chunk_file("a.rs", "", &config(10, 2)).is_empty());
        assert!(chunk_file("a.rs", "   \n  \n", &config(10, 2)).is_empty());
    }

    #[test]
    fn test_small_file_is_one_chunk() {
        let chunks = chunk_file("a.rs", "fn main() {}\n", &config(80, 12));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 1);
        assert_eq!(chunks[0].ordinal, 0);
    }

    #[test]
    fn test_windows_overlap() {
        let content = numbered_lines(25);
        let chunks = chunk_file("a.rs", &content, &config(10, 3));
        assert!(chunks.len() > 1);
        // Each next chunk starts overlap lines before the previous end
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start_line, pair[0].end_line - 3 + 1);
        }
        // Last chunk reaches the end of the file
        assert_eq!(chunks.last().unwrap().end_line, 25);
    }

    #[test]
    fn test_chunking_is_idempotent() {
        let content = numbered_lines(100);
        let first = chunk_file("src/a.rs", &content, &config(10, 2));
        let second = chunk_file("src/a.rs", &content, &config(10, 2));
        assert_eq!(first, second);
    }

    #[test]
    fn test_ordinals_are_sequential() {
        let content = numbered_lines(50);
        let chunks = chunk_file("a.rs", &content, &config(10, 2));
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.ordinal, i);
        }
    }

    #[test]
    fn test_boundary_snaps_to_blank_line() {
        // Blank line at index 8 (line 9); cut would land at index 10
        let mut lines: Vec<String> = (0..20).map(|i| format!("code {}", i)).collect();
        lines[8] = String::new();
        let content = lines.join("\n");

        let cfg = IndexingConfig {
            chunk_lines: 10,
            overlap_lines: 0,
            boundary_aware: true,
            boundary_search_lines: 5,
            ..IndexingConfig::default()
        };
        let chunks = chunk_file("a.rs", &content, &cfg);
        assert_eq!(chunks[0].end_line, 8);
        assert_eq!(chunks[0].strategy, "line-aware");
    }

    #[test]
    fn test_boundary_snaps_to_definition_start() {
        let mut lines: Vec<String> = (0..20).map(|i| format!("    body {}", i)).collect();
        lines[11] = "fn second() {".to_string();
        let content = lines.join("\n");

        let cfg = IndexingConfig {
            chunk_lines: 10,
            overlap_lines: 0,
            boundary_aware: true,
            boundary_search_lines: 5,
            ..IndexingConfig::default()
        };
        let chunks = chunk_file("a.rs", &content, &cfg);
        // The definition opens the next chunk
        assert_eq!(chunks[0].end_line, 11);
        assert_eq!(chunks[1].start_line, 12);
    }

    #[test]
    fn test_final_chunk_without_adjustment_is_fixed_window() {
        let content = numbered_lines(5);
        let cfg = IndexingConfig {
            chunk_lines: 10,
            overlap_lines: 0,
            boundary_aware: true,
            boundary_search_lines: 5,
            ..IndexingConfig::default()
        };
        let chunks = chunk_file("a.rs", &content, &cfg);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].strategy, "fixed-window");
    }

    #[test]
    fn test_no_boundary_falls_back_to_fixed_window() {
        let content = numbered_lines(30);
        let cfg = IndexingConfig {
            chunk_lines: 10,
            overlap_lines: 0,
            boundary_aware: true,
            boundary_search_lines: 3,
            ..IndexingConfig::default()
        };
        let chunks = chunk_file("a.rs", &content, &cfg);
        assert_eq!(chunks[0].end_line, 10);
        assert_eq!(chunks[0].strategy, "fixed-window");
    }

    #[test]
    fn test_single_line_window_yields_line_chunks() {
        let chunks = chunk_file("a.rs", "alpha beta\nbeta gamma\ngamma delta", &config(1, 0));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].content, "alpha beta");
        assert_eq!(chunks[2].content, "gamma delta");
    }

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language("src/main.rs"), "rust");
        assert_eq!(detect_language("app.py"), "python");
        assert_eq!(detect_language("odd.xyz"), "text");
        assert_eq!(detect_language("Makefile"), "text");
    }
}
