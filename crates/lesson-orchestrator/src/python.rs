//! Lightweight Python syntax checking.
//!
//! This is not a parser. It tokenizes just enough of the language to catch
//! the mistakes generated code actually makes: unbalanced brackets,
//! unterminated strings, broken indentation, block headers without a colon
//! and invalid `class`/`def` names.

use std::sync::OnceLock;

use regex::Regex;

/// Width a tab advances indentation to (next multiple of).
const TAB_WIDTH: usize = 8;

/// Keywords that open a block and therefore need a `:`.
const BLOCK_KEYWORDS: &[&str] = &[
    "if", "elif", "else", "for", "while", "try", "except", "finally", "with", "def", "class",
];

/// A syntax problem found in Python source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct SyntaxIssue {
    /// 1-based line where the problem was detected.
    pub line: usize,
    /// What is wrong.
    pub message: String,
}

impl SyntaxIssue {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Compiles `pattern` once into `cell`.
pub(crate) fn cached_regex(
    cell: &'static OnceLock<Option<Regex>>,
    pattern: &str,
) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn class_header_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached_regex(&RE, r"^class\s+[A-Za-z_][A-Za-z0-9_]*\s*[(:]")
}

fn def_header_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached_regex(&RE, r"^(async\s+)?def\s+[A-Za-z_][A-Za-z0-9_]*\s*\(")
}

fn hyphenated_class_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached_regex(&RE, r"(?m)^([ \t]*class\s+)([A-Za-z_][A-Za-z0-9_\-]*)")
}

/// One logical line as seen by the indentation checker.
#[derive(Debug, Default)]
struct LogicalLine {
    line: usize,
    code: String,
    last_significant: Option<char>,
    top_level_colon: bool,
}

impl LogicalLine {
    fn first_word(&self) -> &str {
        let trimmed = self.code.trim_start();
        let end = trimmed
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(trimmed.len());
        &trimmed[..end]
    }

    fn check_header(&self) -> Result<(), SyntaxIssue> {
        let code = self.code.trim();
        let mut word = self.first_word();
        if word == "async" {
            word = code["async".len()..]
                .trim_start()
                .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .next()
                .unwrap_or("");
        }

        if !BLOCK_KEYWORDS.contains(&word) {
            return Ok(());
        }

        if word == "class" && !class_header_re().is_some_and(|re| re.is_match(code)) {
            return Err(SyntaxIssue::new(self.line, "invalid class name"));
        }
        if word == "def" && !def_header_re().is_some_and(|re| re.is_match(code)) {
            return Err(SyntaxIssue::new(self.line, "invalid function definition"));
        }
        if !self.top_level_colon {
            return Err(SyntaxIssue::new(
                self.line,
                format!("expected ':' after '{word}' statement"),
            ));
        }
        Ok(())
    }

    const fn opens_block(&self) -> bool {
        matches!(self.last_significant, Some(':'))
    }
}

/// Indentation bookkeeping across logical lines.
struct Indentation {
    stack: Vec<usize>,
    expect_indent: bool,
}

impl Indentation {
    fn new() -> Self {
        Self {
            stack: vec![0],
            expect_indent: false,
        }
    }

    fn top(&self) -> usize {
        self.stack.last().copied().unwrap_or(0)
    }

    fn enter(&mut self, indent: usize, line: usize) -> Result<(), SyntaxIssue> {
        if self.expect_indent {
            if indent <= self.top() {
                return Err(SyntaxIssue::new(line, "expected an indented block"));
            }
            self.stack.push(indent);
            self.expect_indent = false;
            return Ok(());
        }

        if indent > self.top() {
            return Err(SyntaxIssue::new(line, "unexpected indent"));
        }
        while indent < self.top() {
            self.stack.pop();
        }
        if indent != self.top() {
            return Err(SyntaxIssue::new(
                line,
                "unindent does not match any outer indentation level",
            ));
        }
        Ok(())
    }
}

const fn is_string_prefix(ident: &str) -> bool {
    matches!(
        ident.as_bytes(),
        [b'r' | b'R' | b'u' | b'U' | b'b' | b'B' | b'f' | b'F']
            | [b'r' | b'R', b'b' | b'B' | b'f' | b'F']
            | [b'b' | b'B' | b'f' | b'F', b'r' | b'R']
    )
}

fn closing_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

/// Checks Python source for syntax errors.
///
/// # Examples
///
/// ```
/// use lesson_orchestrator::python::check_syntax;
///
/// assert!(check_syntax("def greet(name):\n    return f\"hi {name}\"\n").is_ok());
/// assert!(check_syntax("print('unclosed'\n").is_err());
/// ```
pub fn check_syntax(source: &str) -> Result<(), SyntaxIssue> {
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    let mut line = 1;
    let mut brackets: Vec<(char, usize)> = Vec::new();
    let mut indentation = Indentation::new();
    let mut current: Option<LogicalLine> = None;
    let mut continuation = false;

    while i < chars.len() {
        if current.is_none() {
            // Start of a physical line that may begin a logical line.
            let mut indent = 0;
            while i < chars.len() && matches!(chars[i], ' ' | '\t' | '\x0c') {
                indent = if chars[i] == '\t' {
                    (indent / TAB_WIDTH + 1) * TAB_WIDTH
                } else {
                    indent + 1
                };
                i += 1;
            }
            if i >= chars.len() {
                break;
            }
            match chars[i] {
                '\n' => {
                    line += 1;
                    i += 1;
                    continue;
                }
                '\r' => {
                    i += 1;
                    continue;
                }
                '#' => {
                    while i < chars.len() && chars[i] != '\n' {
                        i += 1;
                    }
                    continue;
                }
                _ => {}
            }
            indentation.enter(indent, line)?;
            current = Some(LogicalLine {
                line,
                ..LogicalLine::default()
            });
        }

        let Some(logical) = current.as_mut() else {
            continue;
        };
        let c = chars[i];

        match c {
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '\\' if chars.get(i + 1) == Some(&'\n') => {
                continuation = true;
                line += 1;
                i += 2;
            }
            '\\' if chars.get(i + 1) == Some(&'\r') && chars.get(i + 2) == Some(&'\n') => {
                continuation = true;
                line += 1;
                i += 3;
            }
            '\n' => {
                line += 1;
                i += 1;
                if brackets.is_empty() {
                    let finished = current.take().unwrap_or_default();
                    finished.check_header()?;
                    indentation.expect_indent = finished.opens_block();
                }
            }
            '\'' | '"' => {
                i = skip_string(&chars, i, &mut line)?;
                logical.code.push_str("\"\"");
                logical.last_significant = Some(c);
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                if is_string_prefix(&ident) && matches!(chars.get(i), Some('\'' | '"')) {
                    let quote = chars[i];
                    i = skip_string(&chars, i, &mut line)?;
                    logical.code.push_str("\"\"");
                    logical.last_significant = Some(quote);
                } else {
                    logical.last_significant = ident.chars().last();
                    logical.code.push_str(&ident);
                }
            }
            '(' | '[' | '{' => {
                brackets.push((c, line));
                logical.code.push(c);
                logical.last_significant = Some(c);
                i += 1;
            }
            ')' | ']' | '}' => {
                match brackets.pop() {
                    Some((open, _)) if closing_for(open) == c => {}
                    Some((open, open_line)) => {
                        return Err(SyntaxIssue::new(
                            line,
                            format!(
                                "closing parenthesis '{c}' does not match opening parenthesis '{open}' on line {open_line}"
                            ),
                        ));
                    }
                    None => {
                        return Err(SyntaxIssue::new(line, format!("unmatched '{c}'")));
                    }
                }
                logical.code.push(c);
                logical.last_significant = Some(c);
                i += 1;
            }
            ':' => {
                if brackets.is_empty() {
                    logical.top_level_colon = true;
                }
                logical.code.push(c);
                logical.last_significant = Some(c);
                i += 1;
            }
            c if c.is_whitespace() => {
                logical.code.push(' ');
                i += 1;
            }
            _ => {
                logical.code.push(c);
                logical.last_significant = Some(c);
                i += 1;
            }
        }
        if c != '\\' {
            continuation = false;
        }
    }

    if let Some((open, open_line)) = brackets.last() {
        return Err(SyntaxIssue::new(
            *open_line,
            format!("'{open}' was never closed"),
        ));
    }
    if continuation {
        return Err(SyntaxIssue::new(
            line,
            "unexpected end of file after line continuation",
        ));
    }
    if let Some(last) = current.take() {
        last.check_header()?;
        indentation.expect_indent = last.opens_block();
    }
    if indentation.expect_indent {
        return Err(SyntaxIssue::new(
            line,
            "expected an indented block at end of file",
        ));
    }

    Ok(())
}

/// Skips a string literal starting at the quote at `start`.
///
/// Returns the index just past the closing quote.
fn skip_string(chars: &[char], start: usize, line: &mut usize) -> Result<usize, SyntaxIssue> {
    let quote = chars[start];
    let start_line = *line;
    let triple = chars.get(start + 1) == Some(&quote) && chars.get(start + 2) == Some(&quote);
    let mut i = start + if triple { 3 } else { 1 };

    while i < chars.len() {
        match chars[i] {
            '\\' => {
                if chars.get(i + 1) == Some(&'\n') {
                    *line += 1;
                }
                i += 2;
            }
            '\n' if !triple => {
                return Err(SyntaxIssue::new(
                    start_line,
                    "unterminated string literal",
                ));
            }
            '\n' => {
                *line += 1;
                i += 1;
            }
            c if c == quote => {
                if !triple {
                    return Ok(i + 1);
                }
                if chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote) {
                    return Ok(i + 3);
                }
                i += 1;
            }
            _ => i += 1,
        }
    }

    let message = if triple {
        "unterminated triple-quoted string literal"
    } else {
        "unterminated string literal"
    };
    Err(SyntaxIssue::new(start_line, message))
}

/// Applies the known fixes for common generation mistakes.
///
/// Hyphens are removed from `class` names and unterminated triple-quoted
/// strings are closed at the end of the source.
#[must_use]
pub fn repair(source: &str) -> String {
    let mut repaired = match hyphenated_class_re() {
        Some(re) => re
            .replace_all(source, |caps: &regex::Captures<'_>| {
                format!("{}{}", &caps[1], caps[2].replace('-', ""))
            })
            .into_owned(),
        None => source.to_string(),
    };

    for delimiter in ["\"\"\"", "'''"] {
        if repaired.matches(delimiter).count() % 2 == 1 {
            if !repaired.ends_with('\n') {
                repaired.push('\n');
            }
            repaired.push_str(delimiter);
            repaired.push('\n');
        }
    }

    repaired
}

/// Checks source and, if it is invalid, tries one repair pass.
///
/// Returns the valid code (repaired or not), or the original issue when the
/// repair did not help.
pub fn check_or_repair(source: &str) -> Result<String, SyntaxIssue> {
    match check_syntax(source) {
        Ok(()) => Ok(source.to_string()),
        Err(issue) => {
            let repaired = repair(source);
            if check_syntax(&repaired).is_ok() {
                Ok(repaired)
            } else {
                Err(issue)
            }
        }
    }
}
