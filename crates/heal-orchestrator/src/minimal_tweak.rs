//! Deterministic, conservative fallback patch used when the LLM consult
//! step is unavailable or its reply fails sanitization: balances unmatched
//! brackets and appends a trailing statement terminator where the
//! language's syntax expects one. Never attempts anything semantic.

const SEMICOLON_LANGUAGES: &[&str] = &["rust", "javascript", "typescript", "java", "c", "cpp", "c++"];

fn balance_brackets(code: &str) -> String {
    let pairs = [('(', ')'), ('[', ']'), ('{', '}')];
    let mut stack = Vec::new();

    for ch in code.chars() {
        if let Some(&(_, close)) = pairs.iter().find(|&&(open, _)| open == ch) {
            stack.push(close);
        } else if pairs.iter().any(|&(_, close)| close == ch) {
            if stack.last() == Some(&ch) {
                stack.pop();
            }
        }
    }

    let mut fixed = code.to_string();
    while let Some(closer) = stack.pop() {
        if !fixed.ends_with('\n') {
            fixed.push('\n');
        }
        fixed.push(closer);
    }
    fixed
}

fn append_missing_terminator(code: &str, language: &str) -> String {
    if !SEMICOLON_LANGUAGES.contains(&language.to_lowercase().as_str()) {
        return code.to_string();
    }
    let trimmed = code.trim_end();
    if trimmed.is_empty() {
        return code.to_string();
    }
    let last_line = trimmed.lines().last().unwrap_or("").trim();
    if last_line.is_empty() || last_line.ends_with([';', '{', '}']) {
        code.to_string()
    } else {
        format!("{trimmed};\n")
    }
}

/// The deterministic fallback: first balance brackets, then append a
/// trailing terminator if the language expects one.
pub fn minimal_tweak(original_code: &str, language: &str) -> String {
    let balanced = balance_brackets(original_code);
    append_missing_terminator(&balanced, language)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closes_unbalanced_braces() {
        let code = "fn main() {\n    println!(\"hi\");";
        let fixed = minimal_tweak(code, "rust");
        assert_eq!(fixed.matches('{').count(), fixed.matches('}').count());
    }

    #[test]
    fn appends_missing_semicolon_for_semicolon_language() {
        let code = "let x = 1";
        let fixed = minimal_tweak(code, "rust");
        assert!(fixed.trim_end().ends_with(';'));
    }

    #[test]
    fn leaves_python_untouched_by_terminator_logic() {
        let code = "x = 1";
        let fixed = minimal_tweak(code, "python");
        assert_eq!(fixed, "x = 1");
    }

    #[test]
    fn balanced_code_is_unchanged_by_bracket_pass() {
        let code = "fn main() {}";
        assert_eq!(balance_brackets(code), code);
    }

    #[test]
    fn does_not_double_append_when_line_already_ends_in_brace() {
        let code = "fn main() {\n}";
        let fixed = minimal_tweak(code, "rust");
        assert_eq!(fixed, code);
    }
}
