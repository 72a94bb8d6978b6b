//! Source parsing collaborator: declarations, imports, and call sites.
//!
//! The engine consumes parsing through the [`SourceParser`] trait — a pure
//! function from source text to extracted structure, or a [`ParseWarning`]
//! for malformed input. The bundled [`RegexParser`] is a line-scanning
//! reference implementation; heavier parsers (tree-sitter and friends) can
//! implement the same trait externally.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::ParseWarning;

// ---------------------------------------------------------------------------
// Extracted types
// ---------------------------------------------------------------------------

/// A function or method declaration.
#[derive(Clone, Debug)]
pub struct FunctionDecl {
    pub name: String,
    /// `Class.method` for methods, otherwise the bare name.
    pub qualified_name: String,
    /// Enclosing class, when this is a method.
    pub owner: Option<String>,
    pub start_line: i64,
    pub end_line: i64,
    pub signature: String,
    pub docstring: Option<String>,
    pub param_count: i64,
    /// Branch-count cyclomatic complexity estimate.
    pub complexity: i64,
}

/// A class (or struct) declaration.
#[derive(Clone, Debug)]
pub struct ClassDecl {
    pub name: String,
    pub start_line: i64,
    pub end_line: i64,
    pub bases: Vec<String>,
    pub docstring: Option<String>,
}

/// An import statement resolved to a module name.
#[derive(Clone, Debug)]
pub struct ImportDecl {
    pub module: String,
    pub line: i64,
}

/// A single call-site with its sensitivity-relevant facts.
#[derive(Clone, Debug)]
pub struct CallSite {
    /// Qualified name of the enclosing function, when the call happens
    /// inside one.
    pub caller: Option<String>,
    pub callee: String,
    pub receiver: Option<String>,
    pub line: i64,
    /// The call passes at least one argument.
    pub has_args: bool,
    /// The call's return value is consumed (assigned, returned, tested, or
    /// nested in another expression).
    pub uses_return: bool,
}

/// Everything extracted from one source file.
#[derive(Clone, Debug, Default)]
pub struct ParsedFile {
    pub path: String,
    pub language: String,
    pub module_name: String,
    pub line_count: i64,
    pub functions: Vec<FunctionDecl>,
    pub classes: Vec<ClassDecl>,
    pub imports: Vec<ImportDecl>,
    pub calls: Vec<CallSite>,
}

/// Parsing collaborator. Implementations must be pure: no side effects, same
/// output for the same input.
pub trait SourceParser: Send + Sync {
    fn parse(&self, path: &str, language: &str, source: &str) -> Result<ParsedFile, ParseWarning>;
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Convert a file path to a dotted module name.
pub fn to_module_name(path: &str) -> String {
    let without_ext = Path::new(path).with_extension("");
    let parts: Vec<&str> = without_ext
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(os) => os.to_str(),
            _ => None,
        })
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    parts.join(".")
}

// ---------------------------------------------------------------------------
// Regex patterns (compiled once)
// ---------------------------------------------------------------------------

static PY_DEF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*)(?:async\s+)?def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(([^)]*)\)?").unwrap()
});

static PY_CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*)class\s+([A-Za-z_][A-Za-z0-9_]*)\s*(?:\(([^)]*)\))?\s*:").unwrap()
});

static PY_FROM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*from\s+([A-Za-z0-9_\.]+)\s+import").unwrap());

static PY_IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*import\s+([A-Za-z0-9_\.]+)").unwrap());

static TS_FUNC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:export\s+)?(?:async\s+)?function\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*\(([^)]*)\)?")
        .unwrap()
});

static TS_CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:export\s+)?(?:abstract\s+)?class\s+([A-Za-z_$][A-Za-z0-9_$]*)(?:\s+extends\s+([A-Za-z_$][A-Za-z0-9_$\.]*))?",
    )
    .unwrap()
});

static TS_IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"from\s+['"]([^'"]+)['"]"#).unwrap());

static GO_FUNC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^func\s+(?:\(\s*[A-Za-z_][A-Za-z0-9_]*\s+\*?([A-Za-z_][A-Za-z0-9_]*)\s*\)\s*)?([A-Za-z_][A-Za-z0-9_]*)\s*\(([^)]*)\)?",
    )
    .unwrap()
});

static GO_TYPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^type\s+([A-Za-z_][A-Za-z0-9_]*)\s+struct\b").unwrap());

static GO_IMPORT_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*(?:import\s+)?"([^"]+)"\s*$"#).unwrap());

static JAVA_CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:public\s+|abstract\s+|final\s+)*class\s+([A-Za-z_][A-Za-z0-9_]*)(?:\s+extends\s+([A-Za-z_][A-Za-z0-9_\.]*))?",
    )
    .unwrap()
});

static JAVA_METHOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:public|protected|private)\s+(?:static\s+)?[A-Za-z0-9_<>\[\],\s]+\s([A-Za-z_][A-Za-z0-9_]*)\s*\(([^)]*)\)",
    )
    .unwrap()
});

static JAVA_IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*import\s+(?:static\s+)?([A-Za-z0-9_\.]+)").unwrap());

static CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:([A-Za-z_][A-Za-z0-9_]*)\s*\.\s*)?([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap()
});

/// Language keywords that look like function calls but are not.
fn is_call_keyword(name: &str) -> bool {
    matches!(
        name,
        "if" | "elif"
            | "for"
            | "while"
            | "switch"
            | "match"
            | "return"
            | "new"
            | "function"
            | "func"
            | "def"
            | "class"
            | "catch"
            | "except"
            | "assert"
            | "super"
    )
}

const BRANCH_KEYWORDS: &[&str] = &["if ", "elif ", "else if", "for ", "while ", "case ", "catch"];

// ---------------------------------------------------------------------------
// RegexParser
// ---------------------------------------------------------------------------

/// Line-scanning reference parser for python, typescript, go, and java.
#[derive(Default)]
pub struct RegexParser;

impl SourceParser for RegexParser {
    fn parse(&self, path: &str, language: &str, source: &str) -> Result<ParsedFile, ParseWarning> {
        if let Some(message) = delimiter_imbalance(source) {
            return Err(ParseWarning {
                file_path: path.to_string(),
                message,
            });
        }

        let lines: Vec<&str> = source.lines().collect();
        let mut parsed = ParsedFile {
            path: path.to_string(),
            language: language.to_string(),
            module_name: to_module_name(path),
            line_count: lines.len() as i64,
            ..ParsedFile::default()
        };

        match language {
            "python" => parse_python(&lines, &mut parsed),
            "typescript" => parse_braced(&lines, &mut parsed, Flavor::TypeScript),
            "go" => parse_braced(&lines, &mut parsed, Flavor::Go),
            "java" => parse_braced(&lines, &mut parsed, Flavor::Java),
            other => {
                return Err(ParseWarning {
                    file_path: path.to_string(),
                    message: format!("unsupported language: {other}"),
                })
            }
        }

        extract_calls(&lines, &mut parsed);
        attach_complexity(&lines, &mut parsed);
        Ok(parsed)
    }
}

/// Cheap structural sanity check: delimiter balance outside string literals
/// and line comments. Catches truncated and mangled files without a full
/// grammar.
fn delimiter_imbalance(source: &str) -> Option<String> {
    let mut paren = 0i64;
    let mut brace = 0i64;
    let mut bracket = 0i64;
    for line in source.lines() {
        let mut in_string: Option<char> = None;
        let mut escaped = false;
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            if escaped {
                escaped = false;
                continue;
            }
            match in_string {
                Some(quote) => match c {
                    '\\' => escaped = true,
                    _ if c == quote => in_string = None,
                    _ => {}
                },
                None => match c {
                    '\'' | '"' => in_string = Some(c),
                    '#' => break,
                    '/' if chars.peek() == Some(&'/') => break,
                    '(' => paren += 1,
                    ')' => paren -= 1,
                    '{' => brace += 1,
                    '}' => brace -= 1,
                    '[' => bracket += 1,
                    ']' => bracket -= 1,
                    _ => {}
                },
            }
        }
    }
    if paren != 0 || brace != 0 || bracket != 0 {
        Some(format!(
            "unbalanced delimiters (paren {paren:+}, brace {brace:+}, bracket {bracket:+})"
        ))
    } else {
        None
    }
}

fn indent_width(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn param_count(raw: &str) -> i64 {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty() && *p != "self" && *p != "cls")
        .count() as i64
}

/// End of an indentation-delimited block starting at `start` (0-based).
fn python_block_end(lines: &[&str], start: usize, indent: usize) -> usize {
    let mut end = start;
    for (offset, line) in lines.iter().enumerate().skip(start + 1) {
        if line.trim().is_empty() {
            continue;
        }
        if indent_width(line) <= indent {
            break;
        }
        end = offset;
    }
    end
}

/// End of a brace-delimited block: scan from `start` until braces balance.
fn brace_block_end(lines: &[&str], start: usize) -> usize {
    let mut depth = 0i64;
    let mut opened = false;
    for (offset, line) in lines.iter().enumerate().skip(start) {
        for c in line.chars() {
            match c {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if opened && depth <= 0 {
            return offset;
        }
    }
    lines.len().saturating_sub(1)
}

/// First docstring line directly below a python declaration.
fn python_docstring(lines: &[&str], decl_line: usize) -> Option<String> {
    let next = lines.iter().skip(decl_line + 1).find(|l| !l.trim().is_empty())?;
    let trimmed = next.trim();
    for quote in ["\"\"\"", "'''"] {
        if let Some(rest) = trimmed.strip_prefix(quote) {
            let text = rest.strip_suffix(quote).unwrap_or(rest).trim();
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
    }
    None
}

fn parse_python(lines: &[&str], parsed: &mut ParsedFile) {
    // Classes first: function ownership is decided by class line ranges.
    for (index, line) in lines.iter().enumerate() {
        if let Some(caps) = PY_CLASS_RE.captures(line) {
            let indent = caps.get(1).map(|m| m.as_str().len()).unwrap_or(0);
            let name = caps[2].to_string();
            let bases = caps
                .get(3)
                .map(|m| {
                    m.as_str()
                        .split(',')
                        .map(|b| b.trim().to_string())
                        .filter(|b| !b.is_empty() && b != "object")
                        .collect()
                })
                .unwrap_or_default();
            let end = python_block_end(lines, index, indent);
            parsed.classes.push(ClassDecl {
                name,
                start_line: (index + 1) as i64,
                end_line: (end + 1) as i64,
                bases,
                docstring: python_docstring(lines, index),
            });
        }
    }

    for (index, line) in lines.iter().enumerate() {
        if let Some(caps) = PY_DEF_RE.captures(line) {
            let indent = caps.get(1).map(|m| m.as_str().len()).unwrap_or(0);
            let name = caps[2].to_string();
            let params = caps.get(3).map(|m| m.as_str()).unwrap_or("");
            let start = (index + 1) as i64;
            let end = (python_block_end(lines, index, indent) + 1) as i64;
            let owner = parsed
                .classes
                .iter()
                .filter(|c| indent > 0 && c.start_line < start && start <= c.end_line)
                .last()
                .map(|c| c.name.clone());
            let qualified_name = match &owner {
                Some(class) => format!("{class}.{name}"),
                None => name.clone(),
            };
            parsed.functions.push(FunctionDecl {
                signature: format!("def {name}({})", params.trim()),
                docstring: python_docstring(lines, index),
                param_count: param_count(params),
                complexity: 1,
                name,
                qualified_name,
                owner,
                start_line: start,
                end_line: end,
            });
        }
    }

    for (index, line) in lines.iter().enumerate() {
        if let Some(caps) = PY_FROM_RE.captures(line) {
            parsed.imports.push(ImportDecl {
                module: caps[1].to_string(),
                line: (index + 1) as i64,
            });
        } else if let Some(caps) = PY_IMPORT_RE.captures(line) {
            parsed.imports.push(ImportDecl {
                module: caps[1].to_string(),
                line: (index + 1) as i64,
            });
        }
    }
}

enum Flavor {
    TypeScript,
    Go,
    Java,
}

fn parse_braced(lines: &[&str], parsed: &mut ParsedFile, flavor: Flavor) {
    match flavor {
        Flavor::TypeScript => {
            for (index, line) in lines.iter().enumerate() {
                if let Some(caps) = TS_CLASS_RE.captures(line) {
                    let bases = caps.get(2).map(|m| vec![m.as_str().to_string()]).unwrap_or_default();
                    parsed.classes.push(ClassDecl {
                        name: caps[1].to_string(),
                        start_line: (index + 1) as i64,
                        end_line: (brace_block_end(lines, index) + 1) as i64,
                        bases,
                        docstring: None,
                    });
                }
                if let Some(caps) = TS_FUNC_RE.captures(line) {
                    let params = caps.get(2).map(|m| m.as_str()).unwrap_or("");
                    push_braced_function(parsed, lines, index, &caps[1], params, None);
                }
                if let Some(caps) = TS_IMPORT_RE.captures(line) {
                    parsed.imports.push(ImportDecl {
                        module: caps[1].trim_start_matches("./").replace('/', "."),
                        line: (index + 1) as i64,
                    });
                }
            }
        }
        Flavor::Go => {
            let mut in_import_block = false;
            for (index, line) in lines.iter().enumerate() {
                if let Some(caps) = GO_TYPE_RE.captures(line) {
                    parsed.classes.push(ClassDecl {
                        name: caps[1].to_string(),
                        start_line: (index + 1) as i64,
                        end_line: (brace_block_end(lines, index) + 1) as i64,
                        bases: Vec::new(),
                        docstring: None,
                    });
                }
                if let Some(caps) = GO_FUNC_RE.captures(line) {
                    let owner = caps.get(1).map(|m| m.as_str().to_string());
                    let params = caps.get(3).map(|m| m.as_str()).unwrap_or("");
                    let name = caps[2].to_string();
                    push_braced_function(parsed, lines, index, &name, params, owner);
                }
                let trimmed = line.trim();
                if trimmed.starts_with("import (") {
                    in_import_block = true;
                } else if in_import_block && trimmed == ")" {
                    in_import_block = false;
                } else if in_import_block || trimmed.starts_with("import ") {
                    if let Some(caps) = GO_IMPORT_LINE_RE.captures(line) {
                        parsed.imports.push(ImportDecl {
                            module: caps[1].replace('/', "."),
                            line: (index + 1) as i64,
                        });
                    }
                }
            }
        }
        Flavor::Java => {
            for (index, line) in lines.iter().enumerate() {
                if let Some(caps) = JAVA_CLASS_RE.captures(line) {
                    let bases = caps.get(2).map(|m| vec![m.as_str().to_string()]).unwrap_or_default();
                    parsed.classes.push(ClassDecl {
                        name: caps[1].to_string(),
                        start_line: (index + 1) as i64,
                        end_line: (brace_block_end(lines, index) + 1) as i64,
                        bases,
                        docstring: None,
                    });
                }
                if let Some(caps) = JAVA_METHOD_RE.captures(line) {
                    let params = caps.get(2).map(|m| m.as_str()).unwrap_or("");
                    let name = caps[1].to_string();
                    let start = (index + 1) as i64;
                    let owner = parsed
                        .classes
                        .iter()
                        .filter(|c| c.start_line < start && start <= c.end_line)
                        .last()
                        .map(|c| c.name.clone());
                    push_braced_function(parsed, lines, index, &name, params, owner);
                }
                if let Some(caps) = JAVA_IMPORT_RE.captures(line) {
                    parsed.imports.push(ImportDecl {
                        module: caps[1].trim_end_matches(".*").to_string(),
                        line: (index + 1) as i64,
                    });
                }
            }
        }
    }
}

fn push_braced_function(
    parsed: &mut ParsedFile,
    lines: &[&str],
    index: usize,
    name: &str,
    params: &str,
    owner: Option<String>,
) {
    let qualified_name = match &owner {
        Some(class) => format!("{class}.{name}"),
        None => name.to_string(),
    };
    parsed.functions.push(FunctionDecl {
        name: name.to_string(),
        qualified_name,
        owner,
        start_line: (index + 1) as i64,
        end_line: (brace_block_end(lines, index) + 1) as i64,
        signature: format!("{name}({})", params.trim()),
        docstring: None,
        param_count: param_count(params),
        complexity: 1,
    });
}

/// Extract call sites and attribute each to its innermost enclosing function.
fn extract_calls(lines: &[&str], parsed: &mut ParsedFile) {
    for (index, line) in lines.iter().enumerate() {
        let line_number = (index + 1) as i64;
        for caps in CALL_RE.captures_iter(line) {
            let receiver = caps.get(1).map(|m| m.as_str().to_string());
            let name = match caps.get(2) {
                Some(m) => m.as_str(),
                None => continue,
            };
            if is_call_keyword(name) {
                continue;
            }
            let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
            let prefix = line[..whole.0].trim_end();
            if prefix.ends_with("def")
                || prefix.ends_with("function")
                || prefix.ends_with("func")
                || prefix.ends_with("class")
                || prefix.ends_with("new")
            {
                continue;
            }

            let rest = line[whole.1..].trim_start();
            let has_args = !rest.starts_with(')');
            let uses_return = consumes_return(prefix);

            let caller = parsed
                .functions
                .iter()
                .filter(|f| f.start_line <= line_number && line_number <= f.end_line)
                .max_by_key(|f| f.start_line)
                .map(|f| f.qualified_name.clone());

            parsed.calls.push(CallSite {
                caller,
                callee: name.to_string(),
                receiver,
                line: line_number,
                has_args,
                uses_return,
            });
        }
    }
}

/// Whether the text before a call site indicates the return value is consumed.
fn consumes_return(prefix: &str) -> bool {
    let trimmed = prefix.trim_end();
    if trimmed.ends_with(['=', '(', ',', '+', '-', '*', '/', '!']) {
        return true;
    }
    let last_token = trimmed
        .rsplit(|c: char| !c.is_alphanumeric() && c != '_')
        .find(|t| !t.is_empty())
        .unwrap_or("");
    matches!(
        last_token,
        "return" | "await" | "if" | "elif" | "while" | "assert" | "not" | "and" | "or"
    )
}

/// Fill in the branch-count complexity estimate per function body.
fn attach_complexity(lines: &[&str], parsed: &mut ParsedFile) {
    for function in &mut parsed.functions {
        let start = (function.start_line - 1).max(0) as usize;
        let end = (function.end_line as usize).min(lines.len());
        let mut branches = 0i64;
        for line in &lines[start..end] {
            let trimmed = line.trim_start();
            for keyword in BRANCH_KEYWORDS {
                if trimmed.starts_with(keyword) || trimmed.contains(&format!(" {keyword}")) {
                    branches += 1;
                    break;
                }
            }
        }
        function.complexity = 1 + branches;
    }
}
