//! Chunk assembly for the semantic index.
//!
//! Each declaration becomes an embedding-friendly text block with a
//! `File:/Type:/Name:` header so retrieval matches on names and signatures,
//! not just body text. Declarations in test files index as `test` chunks,
//! which is what the impact analysis coverage term counts.

use crate::indexer::parser::ParsedFile;
use crate::models::{chunk_id, Chunk, ChunkKind, Layer};

/// Code body length kept in an implementation chunk's text.
const MAX_BODY_CHARS: usize = 800;

/// Whether a repository-relative path holds tests.
pub fn is_test_path(path: &str) -> bool {
    let normalized = path.replace('\\', "/");
    let file_name = normalized.rsplit('/').next().unwrap_or(&normalized);
    normalized.split('/').any(|part| part == "tests" || part == "test")
        || file_name.starts_with("test_")
        || file_name.contains("_test.")
        || file_name.contains(".test.")
        || file_name.contains(".spec.")
}

/// Byte offset of the start of each 1-based line.
fn line_offsets(source: &str) -> Vec<usize> {
    let mut offsets = vec![0usize];
    for (index, byte) in source.bytes().enumerate() {
        if byte == b'\n' {
            offsets.push(index + 1);
        }
    }
    offsets
}

fn byte_range(offsets: &[usize], source_len: usize, start_line: i64, end_line: i64) -> (i64, i64) {
    let start_index = (start_line.max(1) - 1) as usize;
    let end_index = end_line.max(1) as usize;
    let start = offsets.get(start_index).copied().unwrap_or(0);
    let end = offsets.get(end_index).copied().unwrap_or(source_len);
    (start as i64, end as i64)
}

fn slice_source(source: &str, start: i64, end: i64) -> &str {
    let start = (start.max(0) as usize).min(source.len());
    let end = (end.max(0) as usize).min(source.len());
    &source[start..end]
}

fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((offset, _)) => &text[..offset],
        None => text,
    }
}

/// Split one parsed file into semantic chunks.
pub fn chunk_file(parsed: &ParsedFile, source: &str, repo_id: &str, layer: Layer) -> Vec<Chunk> {
    let offsets = line_offsets(source);
    let mut chunks = Vec::new();
    let in_tests = is_test_path(&parsed.path);

    for function in &parsed.functions {
        let (start, end) = byte_range(&offsets, source.len(), function.start_line, function.end_line);
        let body = slice_source(source, start, end);
        if body.trim().is_empty() {
            continue;
        }
        let kind = if in_tests { ChunkKind::Test } else { ChunkKind::Implementation };
        let doc_part = match &function.docstring {
            Some(doc) => format!("\nDocstring: {doc}"),
            None => String::new(),
        };
        let text = format!(
            "File: {}\nType: Function\nName: {}\nSignature: {}{}\nCode:\n{}",
            parsed.path,
            function.qualified_name,
            function.signature,
            doc_part,
            truncate_chars(body, MAX_BODY_CHARS),
        );
        chunks.push(Chunk {
            id: chunk_id(repo_id, &parsed.path, start, end, kind),
            repo_id: repo_id.to_string(),
            file_path: parsed.path.clone(),
            symbol: Some(function.qualified_name.clone()),
            kind,
            language: parsed.language.clone(),
            layer,
            byte_start: start,
            byte_end: end,
            text,
        });

        if let Some(doc) = &function.docstring {
            if !in_tests {
                chunks.push(Chunk {
                    id: chunk_id(repo_id, &parsed.path, start, end, ChunkKind::Docstring),
                    repo_id: repo_id.to_string(),
                    file_path: parsed.path.clone(),
                    symbol: Some(function.qualified_name.clone()),
                    kind: ChunkKind::Docstring,
                    language: parsed.language.clone(),
                    layer,
                    byte_start: start,
                    byte_end: end,
                    text: format!(
                        "File: {}\nType: Docstring\nName: {}\n\n{}",
                        parsed.path, function.qualified_name, doc
                    ),
                });
            }
        }
    }

    for class in &parsed.classes {
        let (start, end) = byte_range(&offsets, source.len(), class.start_line, class.end_line);
        if in_tests {
            continue;
        }
        let doc = class.docstring.clone().unwrap_or_default();
        chunks.push(Chunk {
            id: chunk_id(repo_id, &parsed.path, start, end, ChunkKind::Implementation),
            repo_id: repo_id.to_string(),
            file_path: parsed.path.clone(),
            symbol: Some(class.name.clone()),
            kind: ChunkKind::Implementation,
            language: parsed.language.clone(),
            layer,
            byte_start: start,
            byte_end: end,
            text: format!(
                "File: {}\nType: Class\nName: {}\nDocstring: {}\nBases: {}",
                parsed.path,
                class.name,
                doc,
                class.bases.join(", "),
            ),
        });

        // Inheritance is worth indexing on its own: "what extends X" queries
        // match on the pattern chunk.
        if !class.bases.is_empty() {
            chunks.push(Chunk {
                id: chunk_id(repo_id, &parsed.path, start, end, ChunkKind::Pattern),
                repo_id: repo_id.to_string(),
                file_path: parsed.path.clone(),
                symbol: Some(class.name.clone()),
                kind: ChunkKind::Pattern,
                language: parsed.language.clone(),
                layer,
                byte_start: start,
                byte_end: end,
                text: format!(
                    "File: {}\nType: Pattern\nName: {}\nInheritance: {} extends {}",
                    parsed.path,
                    class.name,
                    class.name,
                    class.bases.join(", "),
                ),
            });
        }
    }

    chunks
}

/// Wrap a generated architecture-insight sentence as a chunk.
pub fn insight_chunk(repo_id: &str, sequence: i64, sentence: &str) -> Chunk {
    let path = format!("insights/{sequence}");
    Chunk {
        id: chunk_id(repo_id, &path, 0, sentence.len() as i64, ChunkKind::Insight),
        repo_id: repo_id.to_string(),
        file_path: path,
        symbol: None,
        kind: ChunkKind::Insight,
        language: "text".to_string(),
        layer: Layer::Unknown,
        byte_start: 0,
        byte_end: sentence.len() as i64,
        text: sentence.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::parser::{RegexParser, SourceParser};

    #[test]
    fn function_chunks_carry_headers_and_symbols() {
        let source = "def add(a, b):\n    \"\"\"Add two numbers.\"\"\"\n    return a + b\n";
        let parsed = RegexParser.parse("src/math_util.py", "python", source).unwrap();
        let chunks = chunk_file(&parsed, source, "r1", Layer::Core);

        let implementation = chunks
            .iter()
            .find(|c| c.kind == ChunkKind::Implementation)
            .unwrap();
        assert!(implementation.text.starts_with("File: src/math_util.py\nType: Function\nName: add"));
        assert_eq!(implementation.symbol.as_deref(), Some("add"));

        let docstring = chunks.iter().find(|c| c.kind == ChunkKind::Docstring).unwrap();
        assert!(docstring.text.contains("Add two numbers."));
    }

    #[test]
    fn test_files_produce_test_chunks() {
        let source = "def test_add():\n    assert add(1, 2) == 3\n";
        let parsed = RegexParser.parse("tests/test_math.py", "python", source).unwrap();
        let chunks = chunk_file(&parsed, source, "r1", Layer::Unknown);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Test);
        assert!(chunks[0].text.contains("add(1, 2)"));
    }

    #[test]
    fn classes_with_bases_emit_pattern_chunks() {
        let source = "class Child(Base):\n    def run(self):\n        pass\n";
        let parsed = RegexParser.parse("src/child.py", "python", source).unwrap();
        let chunks = chunk_file(&parsed, source, "r1", Layer::Unknown);
        let pattern = chunks.iter().find(|c| c.kind == ChunkKind::Pattern).unwrap();
        assert!(pattern.text.contains("Child extends Base"));
    }

    #[test]
    fn chunk_ids_are_stable_across_runs() {
        let source = "def f():\n    pass\n";
        let parsed = RegexParser.parse("src/f.py", "python", source).unwrap();
        let first = chunk_file(&parsed, source, "r1", Layer::Unknown);
        let second = chunk_file(&parsed, source, "r1", Layer::Unknown);
        assert_eq!(first[0].id, second[0].id);
    }

    #[test]
    fn test_path_detection() {
        assert!(is_test_path("tests/test_api.py"));
        assert!(is_test_path("pkg/store_test.go"));
        assert!(is_test_path("src/app.test.ts"));
        assert!(!is_test_path("src/app.py"));
    }
}
